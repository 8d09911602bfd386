use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// One fatal requirement that could not be met, recorded against the formula that declared it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmetRequirement {
    pub dependent: String,
    pub message: String,
}

/// A formula declared as conflicting that is currently linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingFormula {
    pub name: String,
    pub reason: Option<String>,
}

/// A path in the prefix that blocks linking a keg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConflictEntry {
    pub path: PathBuf,
    /// Name of the formula whose keg owns the existing file, when it can be determined.
    pub owner: Option<String>,
}

/// Structured failure reported by the build worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub kind: String,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Error, Debug)]
pub enum TaproomError {
    #[error("No available formula with the name \"{name}\"{}{}", dependent_suffix(.dependent), suggestion_suffix(.suggestions))]
    FormulaUnavailable {
        name: String,
        dependent: Option<String>,
        suggestions: Vec<String>,
    },

    #[error("Formula name \"{name}\" is ambiguous, it matches: {}", .candidates.join(", "))]
    TapFormulaAmbiguity { name: String, candidates: Vec<String> },

    #[error("Invalid formula definition {}: {source}", .path.display())]
    InvalidFormula {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsatisfied requirements for {formula}:{}", unmet_lines(.unmet))]
    UnsatisfiedRequirements {
        formula: String,
        unmet: Vec<UnmetRequirement>,
    },

    #[error("Operation already in progress for {name}{}\nRemove {} if no other installer is running", pid_suffix(.pid), .lock_path.display())]
    OperationInProgress {
        name: String,
        pid: Option<u32>,
        lock_path: PathBuf,
    },

    #[error("Cannot install {name}: {reason}")]
    CannotInstall { name: String, reason: String },

    #[error("Cannot install {formula} because conflicting formulae are linked:{}", conflict_lines(.conflicts))]
    Conflict {
        formula: String,
        conflicts: Vec<ConflictingFormula>,
    },

    #[error("Could not link {keg}:{}", link_conflict_lines(.conflicts))]
    LinkConflict {
        keg: String,
        conflicts: Vec<LinkConflictEntry>,
    },

    #[error("Cannot link {name} {version}: {name} {linked} is already linked\nTo relink, run:\n  taproom unlink {name} && taproom link {name}")]
    AlreadyLinked {
        name: String,
        version: String,
        linked: String,
    },

    #[error("Circular dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("{formula} failed to build: {}", .failure.message)]
    Build {
        formula: String,
        failure: BuildFailure,
    },

    #[error("Build of {formula} exited unexpectedly ({status}); logs are in {}", .logs.display())]
    SuspiciousBuildFailure {
        formula: String,
        status: String,
        logs: PathBuf,
    },

    #[error("Empty installation: {formula} installed no files into {}", .keg.display())]
    EmptyInstallation { formula: String, keg: PathBuf },

    #[error("Installation of {formula} was interrupted")]
    Interrupted { formula: String },

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("Checksum mismatch for {}\n  expected: {expected}\n    actual: {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("No such keg: {0}")]
    NoSuchKeg(String),

    #[error("Refusing to uninstall {name} because it is required by: {}", .dependents.join(", "))]
    HasDependents {
        name: String,
        dependents: Vec<String>,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl TaproomError {
    /// True when the user cancelled the operation rather than it failing.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, TaproomError::Interrupted { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            TaproomError::Conflict { .. }
                | TaproomError::LinkConflict { .. }
                | TaproomError::AlreadyLinked { .. }
        )
    }

    /// Attach the formula that referred to an unavailable one.
    pub fn with_dependent(self, parent: &str) -> Self {
        match self {
            TaproomError::FormulaUnavailable {
                name,
                dependent: None,
                suggestions,
            } => TaproomError::FormulaUnavailable {
                name,
                dependent: Some(parent.to_string()),
                suggestions,
            },
            other => other,
        }
    }
}

fn dependent_suffix(dependent: &Option<String>) -> String {
    match dependent {
        Some(parent) => format!(" (dependency of {})", parent),
        None => String::new(),
    }
}

fn suggestion_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!("\nDid you mean: {}?", suggestions.join(", "))
    }
}

fn pid_suffix(pid: &Option<u32>) -> String {
    pid.map(|pid| format!(" (held by PID {})", pid))
        .unwrap_or_default()
}

fn unmet_lines(unmet: &[UnmetRequirement]) -> String {
    unmet
        .iter()
        .map(|u| format!("\n  {}: {}", u.dependent, u.message))
        .collect()
}

fn conflict_lines(conflicts: &[ConflictingFormula]) -> String {
    conflicts
        .iter()
        .map(|c| match &c.reason {
            Some(reason) => format!("\n  {}: because {}", c.name, reason),
            None => format!("\n  {}", c.name),
        })
        .collect()
}

fn link_conflict_lines(conflicts: &[LinkConflictEntry]) -> String {
    conflicts
        .iter()
        .map(|c| match &c.owner {
            Some(owner) => format!("\n  {} (belongs to {})", c.path.display(), owner),
            None => format!("\n  {} (already exists)", c.path.display()),
        })
        .collect()
}

pub type Result<T> = std::result::Result<T, TaproomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_mentions_dependent_and_suggestions() {
        let err = TaproomError::FormulaUnavailable {
            name: "wgte".to_string(),
            dependent: None,
            suggestions: vec!["wget".to_string()],
        }
        .with_dependent("curl");

        let msg = err.to_string();
        assert!(msg.contains("\"wgte\""));
        assert!(msg.contains("dependency of curl"));
        assert!(msg.contains("Did you mean: wget?"));
    }

    #[test]
    fn unsatisfied_requirements_lists_every_entry() {
        let err = TaproomError::UnsatisfiedRequirements {
            formula: "app".to_string(),
            unmet: vec![
                UnmetRequirement {
                    dependent: "app".to_string(),
                    message: "X11 is required".to_string(),
                },
                UnmetRequirement {
                    dependent: "lib".to_string(),
                    message: "Java is required".to_string(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("app: X11 is required"));
        assert!(msg.contains("lib: Java is required"));
    }

    #[test]
    fn classification_helpers() {
        assert!(
            TaproomError::Interrupted {
                formula: "a".into()
            }
            .is_interrupt()
        );
        assert!(
            TaproomError::LinkConflict {
                keg: "a".into(),
                conflicts: vec![]
            }
            .is_conflict()
        );
        assert!(
            TaproomError::AlreadyLinked {
                name: "a".into(),
                version: "2.0".into(),
                linked: "1.0".into()
            }
            .is_conflict()
        );
        assert!(!TaproomError::NoSuchKeg("a".into()).is_conflict());
    }
}
