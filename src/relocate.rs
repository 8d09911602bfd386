//! Bottle relocation.
//!
//! Bottles are built with `@@HOMEBREW_PREFIX@@` and `@@HOMEBREW_CELLAR@@` in place
//! of the paths they will live at. After pouring, text files carrying those
//! placeholders are rewritten with the real prefix and Cellar. Binaries are left
//! alone: their embedded paths cannot change length.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const PREFIX_PLACEHOLDER: &str = "@@HOMEBREW_PREFIX@@";
const CELLAR_PLACEHOLDER: &str = "@@HOMEBREW_CELLAR@@";

/// Rewrite placeholders under `keg`. Returns the number of files changed.
pub fn relocate_keg(keg: &Path, prefix: &Path, cellar: &Path) -> Result<usize> {
    let prefix = prefix
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Prefix is not valid UTF-8: {}", prefix.display()))?;
    let cellar = cellar
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Cellar is not valid UTF-8: {}", cellar.display()))?;

    let files: Vec<PathBuf> = WalkDir::new(keg)
        .follow_links(false)
        .max_open(64)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let changed: Vec<Result<bool>> = files
        .par_iter()
        .map(|file| relocate_file(file, prefix, cellar))
        .collect();

    let mut count = 0;
    for result in changed {
        if result? {
            count += 1;
        }
    }
    Ok(count)
}

fn relocate_file(path: &Path, prefix: &str, cellar: &str) -> Result<bool> {
    if is_mach_o(path) {
        return Ok(false);
    }

    let Ok(contents) = fs::read_to_string(path) else {
        // Not UTF-8, so not a text file we can rewrite.
        return Ok(false);
    };
    if !contents.contains(PREFIX_PLACEHOLDER) && !contents.contains(CELLAR_PLACEHOLDER) {
        return Ok(false);
    }

    let relocated = contents
        .replace(CELLAR_PLACEHOLDER, cellar)
        .replace(PREFIX_PLACEHOLDER, prefix);

    let permissions = fs::metadata(path)?.permissions();
    let mut writable = permissions.clone();
    #[allow(clippy::permissions_set_readonly_false)]
    writable.set_readonly(false);
    fs::set_permissions(path, writable)?;
    fs::write(path, relocated).with_context(|| format!("Failed to relocate {}", path.display()))?;
    fs::set_permissions(path, permissions)?;

    Ok(true)
}

fn is_mach_o(path: &Path) -> bool {
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let mut bytes = [0u8; 4];
    if file.read_exact(&mut bytes).is_err() {
        return false;
    }
    matches!(
        u32::from_ne_bytes(bytes),
        0xfeedface | 0xfeedfacf | 0xcefaedfe | 0xcffaedfe
    )
}
