//! Per-formula install locks.
//!
//! Each formula being installed is guarded by an advisory exclusive lock on
//! `Library/Locks/<name>.brewing`. Locks never wait: if another process holds one,
//! acquisition fails immediately with "operation in progress". The holder's PID is
//! written into the lock file so the error can name it. Locks are released when
//! dropped, which also covers early returns and interrupted installs; the kernel
//! releases them if the process dies.

use crate::config::Config;
use crate::error::{Result, TaproomError};
use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct LockMetadata {
    pid: u32,
    started_at: String,
}

#[derive(Debug)]
pub struct FormulaLock {
    name: String,
    file: File,
}

impl FormulaLock {
    pub fn acquire(config: &Config, name: &str) -> Result<Self> {
        let dir = config.locks_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create lock directory: {}", dir.display()))?;

        // Tap-qualified names lock on their short name.
        let short = name.rsplit('/').next().unwrap_or(name);
        let path = dir.join(format!("{}.brewing", short));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(TaproomError::OperationInProgress {
                    name: name.to_string(),
                    pid: read_holder(&path),
                    lock_path: path,
                });
            }
            return Err(err.into());
        }

        write_holder(&file).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Locked {}", name);

        Ok(Self {
            name: name.to_string(),
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FormulaLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
        debug!("Unlocked {}", self.name);
    }
}

fn write_holder(mut file: &File) -> io::Result<()> {
    let metadata = LockMetadata {
        pid: std::process::id(),
        started_at: chrono::Utc::now().to_rfc3339(),
    };
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    serde_json::to_writer(&mut file, &metadata).map_err(io::Error::other)?;
    file.flush()
}

fn read_holder(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    serde_json::from_str::<LockMetadata>(&contents)
        .ok()
        .map(|m| m.pid)
}

/// Locks for a set of formulae, acquired together in name order.
#[derive(Debug, Default)]
pub struct LockGroup {
    locks: Vec<FormulaLock>,
}

impl LockGroup {
    /// Lock every name or none of them.
    pub fn acquire<I, S>(config: &Config, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        names.sort();
        names.dedup();

        let mut locks = Vec::with_capacity(names.len());
        for name in &names {
            // Locks already taken are released by drop on the error path.
            locks.push(FormulaLock::acquire(config, name)?);
        }
        Ok(Self { locks })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.locks.iter().map(FormulaLock::name)
    }
}
