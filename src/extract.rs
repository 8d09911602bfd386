//! Pouring bottles into the Cellar.
//!
//! A bottle is a gzipped tarball laid out as `<name>/<version>/...`. It is unpacked
//! into a hidden staging directory inside the Cellar first, and only the exact
//! `<name>/<pkg_version>` tree is moved into place. Anything else the tarball holds
//! goes away with the staging directory. Configuration shipped in the bottle lives
//! under the keg's `.bottle/etc` and `.bottle/var` and is copied into the prefix
//! without clobbering files the user already has.

use crate::config::Config;
use crate::formula::Formula;
use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Archive;
use walkdir::WalkDir;

/// Unpack a bottle and return the keg it produced.
pub fn pour_bottle(config: &Config, bottle: &Path, formula: &Formula) -> Result<PathBuf> {
    fs::create_dir_all(&config.cellar)
        .with_context(|| format!("Failed to create Cellar: {}", config.cellar.display()))?;

    let staging = tempfile::Builder::new()
        .prefix(".pour-")
        .tempdir_in(&config.cellar)
        .with_context(|| format!("Failed to create staging directory in {}", config.cellar.display()))?;

    unpack_tar_gz(bottle, staging.path())
        .with_context(|| format!("Failed to extract bottle {}", bottle.display()))?;

    let version = formula.pkg_version();
    let unpacked = staging.path().join(&formula.name).join(&version);
    if !unpacked.is_dir() {
        bail!(
            "Bottle for {} did not contain {}/{}",
            formula.name,
            formula.name,
            version
        );
    }

    let rack = config.rack(&formula.name);
    let keg = rack.join(&version);
    if keg.symlink_metadata().is_ok() {
        bail!("{} already exists", keg.display());
    }
    fs::create_dir_all(&rack)
        .with_context(|| format!("Failed to create {}", rack.display()))?;
    fs::rename(&unpacked, &keg)
        .with_context(|| format!("Failed to move bottle contents to {}", keg.display()))?;

    Ok(keg)
}

/// Extract a `.tar.gz` into `dest`.
pub fn unpack_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive)
        .with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .with_context(|| format!("Failed to unpack into {}", dest.display()))?;
    Ok(())
}

/// Copy the bottle's `etc` and `var` into the prefix. Existing files are kept and
/// the shipped version is written next to them with a `.default` suffix.
pub fn install_etc_var(keg: &Path, prefix: &Path) -> Result<usize> {
    let bottle_prefix = keg.join(".bottle");
    let mut copied = 0;

    for dir in ["etc", "var"] {
        let root = bottle_prefix.join(dir);
        if !root.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&root) {
            let entry = entry?;
            let relative = entry.path().strip_prefix(&bottle_prefix)?;
            let dest = prefix.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)
                    .with_context(|| format!("Failed to create {}", dest.display()))?;
                continue;
            }

            let dest = if dest.exists() {
                let mut name = dest.as_os_str().to_owned();
                name.push(".default");
                PathBuf::from(name)
            } else {
                dest
            };
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("Failed to copy {}", dest.display()))?;
            copied += 1;
        }
    }

    Ok(copied)
}
