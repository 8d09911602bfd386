//! Running a source build in an isolated worker process.
//!
//! The parent serializes a [`BuildRequest`] (steps, options, flags and a fully
//! computed [`BuildEnvironment`]) to a file and re-invokes its own executable as
//! `taproom __build --request <file> --outcome <file>` with a cleared environment.
//! The worker writes back a [`BuildOutcome`]. The parent tells apart three kinds of
//! failure:
//!
//! - a structured failure reported by the worker, propagated with its fields,
//! - an interrupt (the run-wide [`Interrupt`] flag, or the worker dying from SIGINT),
//! - any other abnormal exit, reported as a suspicious build failure.
//!
//! Whatever the failure, the partially populated keg is removed before the error
//! is returned.

use crate::config::Config;
use crate::error::{BuildFailure, Result, TaproomError};
use crate::formula::{Formula, FormulaView};
use crate::interrupt::Interrupt;
use crate::keg::remove_rack_if_empty;
use crate::options::Options;
use crate::tab::RECEIPT_FILE;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// Hidden subcommand the worker runs under.
pub const WORKER_COMMAND: &str = "__build";

const SYSTEM_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";
const PASSTHROUGH_VARS: &[&str] = &["HOME", "USER", "LOGNAME", "TERM", "SHELL", "LANG", "TMPDIR"];

/// Top-level files that do not count as installed content.
const METAFILES: &[&str] = &[
    RECEIPT_FILE,
    "README",
    "README.md",
    "LICENSE",
    "LICENSE.txt",
    "COPYING",
    "AUTHORS",
    "ChangeLog",
    "NEWS",
];

/// Environment variables for one build, computed once and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    pub fn new(
        config: &Config,
        formula: &Formula,
        deps: &[Arc<Formula>],
        options: &Options,
        build_bottle: bool,
    ) -> Self {
        let mut vars = BTreeMap::new();

        for key in PASSTHROUGH_VARS {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }

        let mut path = Vec::new();
        let mut cppflags = Vec::new();
        let mut ldflags = Vec::new();
        let mut pkg_config = Vec::new();

        for dep in deps {
            let opt = config.opt_prefix(&dep.name);
            for bin in ["bin", "sbin"] {
                let dir = opt.join(bin);
                if dir.is_dir() {
                    path.push(dir.display().to_string());
                }
            }
            let pc = opt.join("lib").join("pkgconfig");
            if pc.is_dir() {
                pkg_config.push(pc.display().to_string());
            }
            // Linked dependencies are found through the prefix already.
            if dep.is_keg_only() {
                cppflags.push(format!("-I{}", opt.join("include").display()));
                ldflags.push(format!("-L{}", opt.join("lib").display()));
            }
        }

        path.push(config.prefix.join("bin").display().to_string());
        path.push(SYSTEM_PATH.to_string());
        cppflags.push(format!("-I{}", config.prefix.join("include").display()));
        ldflags.push(format!("-L{}", config.prefix.join("lib").display()));

        let view = FormulaView::new(formula, config);
        vars.insert("PATH".to_string(), path.join(":"));
        vars.insert("CPPFLAGS".to_string(), cppflags.join(" "));
        vars.insert("LDFLAGS".to_string(), ldflags.join(" "));
        if !pkg_config.is_empty() {
            vars.insert("PKG_CONFIG_PATH".to_string(), pkg_config.join(":"));
        }
        vars.insert("MAKEFLAGS".to_string(), format!("-j{}", config.jobs));
        vars.insert("PREFIX".to_string(), view.prefix().display().to_string());
        vars.insert("TAPROOM_PREFIX".to_string(), config.prefix.display().to_string());
        vars.insert("TAPROOM_CELLAR".to_string(), config.cellar.display().to_string());
        vars.insert("TAPROOM_FORMULA".to_string(), formula.name.clone());
        vars.insert("TAPROOM_VERSION".to_string(), formula.pkg_version());
        vars.insert("TAPROOM_OPTIONS".to_string(), options.to_string());
        vars.insert("TAPROOM_LOGS".to_string(), view.logs().display().to_string());
        if build_bottle {
            vars.insert("TAPROOM_BUILD_BOTTLE".to_string(), "1".to_string());
        }

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub formula: String,
    pub version: String,
    /// Keg directory the build installs into.
    pub keg: PathBuf,
    /// Downloaded source archive, if the formula has one.
    pub source: Option<PathBuf>,
    pub steps: Vec<String>,
    pub options: Options,
    pub env: BuildEnvironment,
    pub logs: PathBuf,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub debug: bool,
}

/// Result reported by the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    Ok,
    Error {
        kind: String,
        message: String,
        #[serde(default)]
        fields: BTreeMap<String, String>,
    },
}

impl BuildOutcome {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        BuildOutcome::Error {
            kind: kind.to_string(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        if let BuildOutcome::Error { fields, .. } = &mut self {
            fields.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, BuildOutcome::Ok)
    }
}

/// Build in a worker process, removing the keg again if anything goes wrong.
pub async fn run_build(config: &Config, request: &BuildRequest, interrupt: &Interrupt) -> Result<()> {
    let result = spawn_worker(config, request, interrupt).await;
    if let Err(err) = &result {
        debug!("Build of {} failed: {}", request.formula, err);
        discard_keg(&request.keg);
    }
    result
}

async fn spawn_worker(config: &Config, request: &BuildRequest, interrupt: &Interrupt) -> Result<()> {
    let exchange = tempfile::Builder::new()
        .prefix("taproom-build-")
        .tempdir()
        .context("Failed to create build exchange directory")?;
    let request_path = exchange.path().join("request.json");
    let outcome_path = exchange.path().join("outcome.json");
    tokio::fs::write(&request_path, serde_json::to_vec_pretty(request)?).await?;

    let mut command = Command::new(&config.worker_exe);
    command
        .arg(WORKER_COMMAND)
        .arg("--request")
        .arg(&request_path)
        .arg("--outcome")
        .arg(&outcome_path)
        .env_clear()
        .envs(request.env.vars())
        .kill_on_drop(true);
    if !request.interactive {
        command.stdin(Stdio::null());
    }

    let mut child = command.spawn().with_context(|| {
        format!(
            "Failed to start build worker {}",
            config.worker_exe.display()
        )
    })?;

    let status = if request.interactive {
        child.wait().await?
    } else {
        tokio::select! {
            status = child.wait() => status?,
            _ = interrupt.wait() => {
                let _ = child.kill().await;
                return Err(TaproomError::Interrupted { formula: request.formula.clone() });
            }
        }
    };

    match read_outcome(&outcome_path).await {
        Some(BuildOutcome::Ok) if status.success() => {}
        Some(BuildOutcome::Error {
            kind,
            message,
            fields,
        }) => {
            return Err(TaproomError::Build {
                formula: request.formula.clone(),
                failure: BuildFailure {
                    kind,
                    message,
                    fields,
                },
            });
        }
        _ if was_interrupted(&status) => {
            return Err(TaproomError::Interrupted {
                formula: request.formula.clone(),
            });
        }
        _ => {
            return Err(TaproomError::SuspiciousBuildFailure {
                formula: request.formula.clone(),
                status: status.to_string(),
                logs: request.logs.clone(),
            });
        }
    }

    if is_empty_installation(&request.keg) {
        return Err(TaproomError::EmptyInstallation {
            formula: request.formula.clone(),
            keg: request.keg.clone(),
        });
    }
    Ok(())
}

async fn read_outcome(path: &Path) -> Option<BuildOutcome> {
    let contents = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&contents) {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            warn!("Unreadable build outcome {}: {}", path.display(), err);
            None
        }
    }
}

fn was_interrupted(status: &ExitStatus) -> bool {
    status.code() == Some(130) || status.signal() == Some(2)
}

/// True when the keg holds nothing besides metadata files and empty directories.
pub fn is_empty_installation(keg: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(keg) else {
        return true;
    };
    entries.filter_map(|e| e.ok()).all(|entry| {
        let path = entry.path();
        if path.is_dir() {
            walkdir::WalkDir::new(&path)
                .into_iter()
                .filter_map(|e| e.ok())
                .all(|e| e.file_type().is_dir())
        } else {
            METAFILES.contains(&entry.file_name().to_string_lossy().as_ref())
        }
    })
}

/// Remove a keg left behind by a failed install, and its rack if that is now empty.
pub fn discard_keg(keg: &Path) {
    if keg.exists()
        && let Err(err) = std::fs::remove_dir_all(keg)
    {
        warn!("Failed to remove {}: {}", keg.display(), err);
    }
    if let Some(rack) = keg.parent() {
        remove_rack_if_empty(rack);
    }
}
