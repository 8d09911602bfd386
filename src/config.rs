//! Filesystem layout and run-wide settings.
//!
//! A [`Config`] is computed once per process from the environment and passed down
//! explicitly. Every path the installer touches is derived from the prefix:
//!
//! ```text
//! <prefix>/
//!   Cellar/<name>/<version>/     kegs
//!   opt/<name>                   -> active keg
//!   bin, lib, share, ...         symlink farm
//!   Library/
//!     Formula/<name>.json        core formula definitions
//!     Taps/<user>/<repo>/Formula/<name>.json
//!     LinkedKegs/<name>          -> keg linked into the farm
//!     Locks/<name>.brewing       per-formula install locks
//!     Logs/<name>/               build logs
//! ```

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub cellar: PathBuf,
    /// Download cache for bottles and source archives.
    pub cache: PathBuf,
    pub logs: PathBuf,
    /// Executable re-invoked as the isolated build worker.
    pub worker_exe: PathBuf,
    /// Build every formula from source, dependencies included.
    pub build_from_source: bool,
    pub developer: bool,
    pub jobs: usize,
}

impl Config {
    /// Build the configuration from environment variables, falling back to the
    /// architecture default prefix.
    pub fn from_env() -> Self {
        let prefix = std::env::var_os("TAPROOM_PREFIX")
            .or_else(|| std::env::var_os("HOMEBREW_PREFIX"))
            .map(PathBuf::from)
            .unwrap_or_else(default_prefix);

        let mut config = Self::for_prefix(&prefix);

        if let Some(cache) = std::env::var_os("TAPROOM_CACHE") {
            config.cache = PathBuf::from(cache);
        } else if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME") {
            config.cache = PathBuf::from(xdg).join("taproom");
        } else if let Some(home) = std::env::var_os("HOME") {
            config.cache = PathBuf::from(home).join(".cache").join("taproom");
        }

        if let Some(logs) = std::env::var_os("TAPROOM_LOGS") {
            config.logs = PathBuf::from(logs);
        }

        config.build_from_source = env_flag("TAPROOM_BUILD_FROM_SOURCE");
        config.developer = env_flag("TAPROOM_DEVELOPER");

        if let Ok(exe) = std::env::current_exe() {
            config.worker_exe = exe;
        }

        config
    }

    /// A self-contained layout rooted at `prefix`, with cache and logs inside it.
    pub fn for_prefix(prefix: &Path) -> Self {
        let prefix = prefix.to_path_buf();
        Self {
            cellar: prefix.join("Cellar"),
            cache: prefix.join("Library").join("Caches"),
            logs: prefix.join("Library").join("Logs"),
            worker_exe: PathBuf::from("taproom"),
            build_from_source: false,
            developer: false,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            prefix,
        }
    }

    pub fn with_worker(mut self, exe: impl Into<PathBuf>) -> Self {
        self.worker_exe = exe.into();
        self
    }

    /// Move the layout to another prefix, keeping the cache, flags and worker.
    pub fn with_prefix(mut self, prefix: &Path) -> Self {
        if self.logs == self.library().join("Logs") {
            self.logs = prefix.join("Library").join("Logs");
        }
        self.cellar = prefix.join("Cellar");
        self.prefix = prefix.to_path_buf();
        self
    }

    pub fn library(&self) -> PathBuf {
        self.prefix.join("Library")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    pub fn linked_kegs_dir(&self) -> PathBuf {
        self.library().join("LinkedKegs")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.library().join("Locks")
    }

    pub fn taps_dir(&self) -> PathBuf {
        self.library().join("Taps")
    }

    pub fn core_formula_dir(&self) -> PathBuf {
        self.library().join("Formula")
    }

    pub fn rack(&self, name: &str) -> PathBuf {
        self.cellar.join(name)
    }

    pub fn opt_prefix(&self, name: &str) -> PathBuf {
        self.opt_dir().join(name)
    }

    pub fn linked_keg_record(&self, name: &str) -> PathBuf {
        self.linked_kegs_dir().join(name)
    }

    pub fn formula_logs(&self, name: &str) -> PathBuf {
        self.logs.join(name)
    }
}

fn default_prefix() -> PathBuf {
    #[cfg(target_arch = "aarch64")]
    {
        PathBuf::from("/opt/homebrew")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        PathBuf::from("/usr/local")
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false)
}
