//! Reading installed kegs from the Cellar and their link records.

use crate::config::Config;
use crate::formula::compare_versions;
use crate::tab::Tab;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// An installed keg in the Cellar.
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub tab: Tab,
}

impl InstalledPackage {
    pub fn from_path(name: String, version: String, path: PathBuf) -> Self {
        let tab = Tab::for_keg(&path);
        Self {
            name,
            version,
            path,
            tab,
        }
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.tab
            .runtime_dependencies
            .iter()
            .any(|dep| dep.full_name == name || dep.full_name.rsplit('/').next() == Some(name))
    }
}

/// All installed kegs, sorted by name and then version.
pub fn list_installed(config: &Config) -> Result<Vec<InstalledPackage>> {
    if !config.cellar.exists() {
        return Ok(vec![]);
    }

    let mut packages = Vec::new();
    for entry in fs::read_dir(&config.cellar)
        .with_context(|| format!("Failed to read Cellar: {}", config.cellar.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        let mut versions = installed_versions(config, &name)?;
        versions.reverse();
        packages.extend(versions);
    }

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packages)
}

/// Installed versions of one formula, newest first.
pub fn installed_versions(config: &Config, name: &str) -> Result<Vec<InstalledPackage>> {
    let rack = config.rack(name);
    if !rack.is_dir() {
        return Ok(vec![]);
    }

    let mut packages = Vec::new();
    for entry in fs::read_dir(&rack)
        .with_context(|| format!("Failed to read rack: {}", rack.display()))?
    {
        let entry = entry?;
        let version = entry.file_name().to_string_lossy().to_string();
        // Kegs moved aside during reinstall end in `.tmp`.
        if version.starts_with('.') || version.ends_with(".tmp") || !entry.path().is_dir() {
            continue;
        }
        packages.push(InstalledPackage::from_path(
            name.to_string(),
            version,
            entry.path(),
        ));
    }

    packages.sort_by(|a, b| compare_versions(&b.version, &a.version));
    Ok(packages)
}

/// Keg recorded as linked into the prefix, if the record points at an existing keg.
pub fn linked_keg(config: &Config, name: &str) -> Option<PathBuf> {
    resolve_record(&config.linked_keg_record(name))
}

/// Keg the `opt` link points at.
pub fn opt_keg(config: &Config, name: &str) -> Option<PathBuf> {
    resolve_record(&config.opt_prefix(name))
}

pub fn is_linked(config: &Config, name: &str) -> bool {
    linked_keg(config, name).is_some()
}

/// Version directory name of a keg path.
pub fn keg_version(keg: &Path) -> Option<String> {
    keg.file_name().map(|v| v.to_string_lossy().to_string())
}

fn resolve_record(record: &Path) -> Option<PathBuf> {
    let target = fs::read_link(record).ok()?;
    let resolved = if target.is_relative() {
        record.parent()?.join(target)
    } else {
        target
    };
    let resolved = crate::keg::normalize_path(&resolved);
    resolved.is_dir().then_some(resolved)
}

/// Installed packages whose receipts list `name` as a runtime dependency.
pub fn dependents(config: &Config, name: &str) -> Result<Vec<String>> {
    let mut names: Vec<String> = list_installed(config)?
        .into_iter()
        .filter(|pkg| pkg.name != name && pkg.depends_on(name))
        .map(|pkg| pkg.name)
        .collect();
    names.dedup();
    Ok(names)
}
