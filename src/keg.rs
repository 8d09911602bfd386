//! Linking kegs into the prefix.
//!
//! A normal keg is exposed by mirroring its files from the linkable directories
//! into the prefix as relative symlinks:
//!
//! ```text
//! <prefix>/bin/wget -> ../Cellar/wget/1.24.5/bin/wget
//! <prefix>/opt/wget -> ../Cellar/wget/1.24.5
//! <prefix>/Library/LinkedKegs/wget -> ../../Cellar/wget/1.24.5
//! ```
//!
//! Linking is planned in full before anything is touched. Any existing path that is
//! neither missing, already ours, nor a stale link left by another version of the same
//! formula is a conflict, and a conflict aborts the whole operation with the prefix
//! unchanged unless the caller asked to overwrite. If applying the plan fails midway,
//! every link and directory created so far is removed again and whatever was
//! replaced is put back. A keg is never linked while another version of the same
//! formula is.
//!
//! Keg-only formulae only get the `opt` link.

use crate::config::Config;
use crate::error::{LinkConflictEntry, Result, TaproomError};
use anyhow::Context;
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directories whose contents are mirrored into the prefix.
pub const LINKABLE_DIRS: &[&str] = &[
    "bin",
    "sbin",
    "lib",
    "include",
    "share",
    "etc",
    "Frameworks",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkMode {
    /// Replace conflicting files instead of failing.
    pub overwrite: bool,
    /// Only report what would happen.
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct LinkReport {
    /// Paths in the prefix that were (or would be) linked.
    pub linked: Vec<PathBuf>,
    /// Existing paths that were (or would be) replaced.
    pub overwritten: Vec<PathBuf>,
    /// Conflicts found during a dry run.
    pub conflicts: Vec<LinkConflictEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    ReplaceStale,
    Overwrite,
}

#[derive(Debug)]
struct PlannedLink {
    target: PathBuf,
    source: PathBuf,
    action: Action,
}

#[derive(Debug)]
enum Existing {
    Missing,
    Ours,
    Stale,
    Foreign(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keg {
    path: PathBuf,
    name: String,
    version: String,
}

impl Keg {
    /// A keg at `<cellar>/<name>/<version>`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let version = file_name(&path);
        let name = path.parent().map(file_name).unwrap_or_default();
        Self {
            path,
            name,
            version,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn is_linked(&self, config: &Config) -> bool {
        crate::cellar::linked_keg(config, &self.name).as_deref() == Some(self.path.as_path())
    }

    /// Mirror the keg into the prefix and record it as linked. Refused while
    /// another version of the same formula is linked.
    pub fn link(&self, config: &Config, mode: LinkMode) -> Result<LinkReport> {
        if let Some(linked) = crate::cellar::linked_keg(config, &self.name)
            && linked != self.path
        {
            return Err(TaproomError::AlreadyLinked {
                name: self.name.clone(),
                version: self.version.clone(),
                linked: file_name(&linked),
            });
        }

        let (dirs, links, conflicts) = self.plan_links(config, mode)?;

        if mode.dry_run {
            return Ok(LinkReport {
                linked: links.iter().map(|l| l.target.clone()).collect(),
                overwritten: links
                    .iter()
                    .filter(|l| l.action == Action::Overwrite)
                    .map(|l| l.target.clone())
                    .collect(),
                conflicts,
            });
        }

        if !conflicts.is_empty() {
            return Err(TaproomError::LinkConflict {
                keg: format!("{} {}", self.name, self.version),
                conflicts,
            });
        }

        let mut applied = Applied::default();
        if let Err(err) = apply(&dirs, &links, &mut applied) {
            warn!("Linking {} failed, rolling back: {:#}", self.name, err);
            applied.rollback();
            return Err(err.into());
        }
        applied.commit();

        self.optlink(config)?;
        self.write_linked_record(config)?;

        debug!("Linked {} files for {}", links.len(), self.name);
        Ok(LinkReport {
            overwritten: links
                .iter()
                .filter(|l| l.action == Action::Overwrite)
                .map(|l| l.target.clone())
                .collect(),
            linked: applied.links,
            conflicts: Vec::new(),
        })
    }

    fn plan_links(
        &self,
        config: &Config,
        mode: LinkMode,
    ) -> Result<(Vec<PathBuf>, Vec<PlannedLink>, Vec<LinkConflictEntry>)> {
        let rack = config.rack(&self.name);
        let mut dirs = Vec::new();
        let mut links = Vec::new();
        let mut conflicts = Vec::new();

        for dir in LINKABLE_DIRS {
            let root = self.path.join(dir);
            if !root.is_dir() {
                continue;
            }

            let mut walker = WalkDir::new(&root).sort_by_file_name().into_iter();
            while let Some(entry) = walker.next() {
                let entry =
                    entry.with_context(|| format!("Failed to walk {}", root.display()))?;
                let relative = entry
                    .path()
                    .strip_prefix(&self.path)
                    .with_context(|| format!("{} is outside the keg", entry.path().display()))?;
                let target = config.prefix.join(relative);

                if entry.file_type().is_dir() {
                    match target.symlink_metadata() {
                        Err(_) => dirs.push(target),
                        Ok(meta) if meta.is_dir() => {}
                        Ok(_) => {
                            let owner = match classify(&target, entry.path(), &rack, config) {
                                Existing::Foreign(owner) => owner,
                                _ => None,
                            };
                            conflicts.push(LinkConflictEntry {
                                path: target,
                                owner,
                            });
                            walker.skip_current_dir();
                        }
                    }
                    continue;
                }

                let parent = target.parent().unwrap_or(&config.prefix);
                let source = relative_path(parent, entry.path());
                let action = match classify(&target, entry.path(), &rack, config) {
                    Existing::Missing => Action::Create,
                    Existing::Ours => continue,
                    Existing::Stale => Action::ReplaceStale,
                    Existing::Foreign(_) if mode.overwrite => Action::Overwrite,
                    Existing::Foreign(owner) => {
                        conflicts.push(LinkConflictEntry {
                            path: target,
                            owner,
                        });
                        continue;
                    }
                };
                links.push(PlannedLink {
                    target,
                    source,
                    action,
                });
            }
        }

        Ok((dirs, links, conflicts))
    }

    /// Point `opt/<name>` at this keg.
    pub fn optlink(&self, config: &Config) -> Result<()> {
        let opt = config.opt_prefix(&self.name);
        replace_symlink(&opt, &self.path)
    }

    fn write_linked_record(&self, config: &Config) -> Result<()> {
        replace_symlink(&config.linked_keg_record(&self.name), &self.path)
    }

    /// Remove every prefix symlink pointing into this keg. Returns how many were removed.
    pub fn unlink(&self, config: &Config) -> Result<usize> {
        let mut removed = 0;

        for dir in LINKABLE_DIRS {
            let root = self.path.join(dir);
            if !root.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&root).contents_first(true) {
                let entry =
                    entry.with_context(|| format!("Failed to walk {}", root.display()))?;
                let Ok(relative) = entry.path().strip_prefix(&self.path) else {
                    continue;
                };
                let target = config.prefix.join(relative);

                if entry.file_type().is_dir() {
                    // Keep the top-level prefix directories themselves.
                    if entry.depth() > 0 && is_empty_dir(&target) {
                        let _ = fs::remove_dir(&target);
                    }
                    continue;
                }

                if points_into(&target, &self.path) {
                    fs::remove_file(&target).with_context(|| {
                        format!("Failed to remove symlink: {}", target.display())
                    })?;
                    removed += 1;
                }
            }
        }

        let record = config.linked_keg_record(&self.name);
        if points_into(&record, &self.path) {
            fs::remove_file(&record)
                .with_context(|| format!("Failed to remove {}", record.display()))?;
        }

        Ok(removed)
    }

    /// Remove the `opt` link if it points at this keg.
    pub fn remove_opt_record(&self, config: &Config) -> Result<()> {
        let opt = config.opt_prefix(&self.name);
        if points_into(&opt, &self.path) {
            fs::remove_file(&opt).with_context(|| format!("Failed to remove {}", opt.display()))?;
        }
        Ok(())
    }

    /// Delete the keg, its records, and the rack if nothing else is left in it.
    pub fn uninstall(&self, config: &Config) -> Result<()> {
        self.unlink(config)?;
        self.remove_opt_record(config)?;
        if self.path.exists() {
            fs::remove_dir_all(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        }
        remove_rack_if_empty(&config.rack(&self.name));
        Ok(())
    }
}

/// What [`apply`] changed, so a failure midway can be undone.
#[derive(Debug, Default)]
struct Applied {
    dirs: Vec<PathBuf>,
    links: Vec<PathBuf>,
    displaced: Vec<Displaced>,
}

/// An existing prefix entry that a planned link replaced.
#[derive(Debug)]
enum Displaced {
    Link { target: PathBuf, dest: PathBuf },
    Moved { target: PathBuf, backup: PathBuf },
}

impl Applied {
    /// Drop the backups of overwritten files.
    fn commit(&mut self) {
        for displaced in self.displaced.drain(..) {
            if let Displaced::Moved { backup, .. } = displaced {
                let result = if backup.is_dir() {
                    fs::remove_dir_all(&backup)
                } else {
                    fs::remove_file(&backup)
                };
                if let Err(err) = result {
                    warn!("Failed to remove {}: {}", backup.display(), err);
                }
            }
        }
    }

    /// Remove what was created and put back what was replaced.
    fn rollback(&mut self) {
        for link in self.links.iter().rev() {
            let _ = fs::remove_file(link);
        }
        for displaced in self.displaced.drain(..).rev() {
            let result = match &displaced {
                Displaced::Link { target, dest } => unix_fs::symlink(dest, target),
                Displaced::Moved { target, backup } => fs::rename(backup, target),
            };
            if let Err(err) = result {
                warn!("Failed to restore {:?}: {}", displaced, err);
            }
        }
        for dir in self.dirs.iter().rev() {
            let _ = fs::remove_dir(dir);
        }
    }
}

fn apply(dirs: &[PathBuf], links: &[PlannedLink], applied: &mut Applied) -> anyhow::Result<()> {
    for dir in dirs {
        if dir.symlink_metadata().is_err() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            applied.dirs.push(dir.clone());
        }
    }

    for link in links {
        if link.action != Action::Create {
            applied.displaced.push(displace(&link.target)?);
        }
        unix_fs::symlink(&link.source, &link.target).with_context(|| {
            format!(
                "Failed to create symlink: {} -> {}",
                link.target.display(),
                link.source.display()
            )
        })?;
        applied.links.push(link.target.clone());
    }

    Ok(())
}

/// Clear `target` for a new link. Symlinks are remembered by destination, anything
/// else is moved to a backup next to it.
fn displace(target: &Path) -> anyhow::Result<Displaced> {
    let meta = target
        .symlink_metadata()
        .with_context(|| format!("Failed to inspect {}", target.display()))?;
    if meta.file_type().is_symlink() {
        let dest = fs::read_link(target)
            .with_context(|| format!("Failed to read {}", target.display()))?;
        fs::remove_file(target).with_context(|| format!("Failed to remove {}", target.display()))?;
        return Ok(Displaced::Link {
            target: target.to_path_buf(),
            dest,
        });
    }

    let mut backup = target.as_os_str().to_owned();
    backup.push(".taproom-backup");
    let backup = PathBuf::from(backup);
    fs::rename(target, &backup)
        .with_context(|| format!("Failed to move {} aside", target.display()))?;
    Ok(Displaced::Moved {
        target: target.to_path_buf(),
        backup,
    })
}

fn classify(target: &Path, source: &Path, rack: &Path, config: &Config) -> Existing {
    let Ok(meta) = target.symlink_metadata() else {
        return Existing::Missing;
    };
    if !meta.file_type().is_symlink() {
        return Existing::Foreign(None);
    }

    let Some(resolved) = resolve_link(target) else {
        return Existing::Foreign(None);
    };
    if resolved == source {
        Existing::Ours
    } else if resolved.starts_with(rack) || resolved.symlink_metadata().is_err() {
        Existing::Stale
    } else {
        Existing::Foreign(owner_of(&resolved, &config.cellar))
    }
}

/// Formula owning a path inside the Cellar.
fn owner_of(path: &Path, cellar: &Path) -> Option<String> {
    match path.strip_prefix(cellar).ok()?.components().next()? {
        Component::Normal(name) => Some(name.to_string_lossy().to_string()),
        _ => None,
    }
}

fn resolve_link(link: &Path) -> Option<PathBuf> {
    let dest = fs::read_link(link).ok()?;
    let joined = if dest.is_relative() {
        link.parent()?.join(dest)
    } else {
        dest
    };
    Some(normalize_path(&joined))
}

fn points_into(link: &Path, keg: &Path) -> bool {
    link.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
        && resolve_link(link).is_some_and(|resolved| resolved.starts_with(keg))
}

fn replace_symlink(link: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    if let Ok(meta) = link.symlink_metadata() {
        if !meta.file_type().is_symlink() {
            return Err(anyhow::anyhow!(
                "{} exists and is not a symlink",
                link.display()
            )
            .into());
        }
        fs::remove_file(link).with_context(|| format!("Failed to remove {}", link.display()))?;
    }

    let parent = link.parent().unwrap_or(Path::new("/"));
    let source = relative_path(parent, target);
    unix_fs::symlink(&source, link).with_context(|| {
        format!(
            "Failed to create symlink: {} -> {}",
            link.display(),
            source.display()
        )
    })?;
    Ok(())
}

fn is_empty_dir(path: &Path) -> bool {
    path.symlink_metadata().map(|m| m.is_dir()).unwrap_or(false)
        && fs::read_dir(path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false)
}

/// Remove a rack directory once it holds no kegs.
pub fn remove_rack_if_empty(rack: &Path) {
    if is_empty_dir(rack) {
        let _ = fs::remove_dir(rack);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Path to `to` relative to the directory `from`.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from = normalize_path(from);
    let to = normalize_path(to);
    let from_parts: Vec<Component> = from.components().collect();
    let to_parts: Vec<Component> = to.components().collect();

    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from_parts.len() {
        relative.push("..");
    }
    for part in &to_parts[common..] {
        relative.push(part.as_os_str());
    }
    relative
}
