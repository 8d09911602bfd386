//! Non-formula preconditions a formula can declare.
//!
//! Requirements are a closed set of kinds. Each kind knows how to test itself
//! against a [`SystemProbe`], what to tell the user when it is unmet, and whether
//! an installable formula can stand in for it.

use crate::formula::{DependencyTag, compare_versions};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Answers questions about the host for requirement checks.
pub trait SystemProbe: Send + Sync {
    /// Architecture in bottle-tag spelling (`arm64`, `x86_64`).
    fn arch(&self) -> String;
    fn os_version(&self) -> Option<String>;
    fn which(&self, executable: &str) -> Option<PathBuf>;
    /// Version of a named toolchain component: `x11`, `java`, `ruby` or `xcode`.
    fn tool_version(&self, tool: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementKind {
    Arch {
        arch: String,
    },
    MinimumOs {
        version: String,
    },
    MaximumOs {
        version: String,
    },
    /// An executable on PATH, optionally replaceable by installing a formula.
    Executable {
        name: String,
        #[serde(default)]
        alternatives: Vec<String>,
        #[serde(default)]
        default_formula: Option<String>,
    },
    X11 {
        #[serde(default)]
        min_version: Option<String>,
    },
    Java {
        #[serde(default)]
        min_version: Option<String>,
    },
    Ruby {
        min_version: String,
    },
    Xcode {
        #[serde(default)]
        min_version: Option<String>,
    },
}

impl RequirementKind {
    pub fn name(&self) -> String {
        match self {
            RequirementKind::Arch { .. } => "arch".to_string(),
            RequirementKind::MinimumOs { .. } | RequirementKind::MaximumOs { .. } => {
                "os".to_string()
            }
            RequirementKind::Executable { name, .. } => name.clone(),
            RequirementKind::X11 { .. } => "x11".to_string(),
            RequirementKind::Java { .. } => "java".to_string(),
            RequirementKind::Ruby { .. } => "ruby".to_string(),
            RequirementKind::Xcode { .. } => "xcode".to_string(),
        }
    }

    pub fn satisfied(&self, probe: &dyn SystemProbe) -> bool {
        match self {
            RequirementKind::Arch { arch } => arch_matches(arch, &probe.arch()),
            RequirementKind::MinimumOs { version } => probe
                .os_version()
                .is_some_and(|v| compare_versions(&v, version) != Ordering::Less),
            RequirementKind::MaximumOs { version } => probe
                .os_version()
                .is_some_and(|v| compare_versions(&v, version) != Ordering::Greater),
            RequirementKind::Executable {
                name, alternatives, ..
            } => std::iter::once(name)
                .chain(alternatives)
                .any(|exe| probe.which(exe).is_some()),
            RequirementKind::X11 { min_version }
            | RequirementKind::Java { min_version }
            | RequirementKind::Xcode { min_version } => {
                tool_at_least(probe, &self.name(), min_version.as_deref())
            }
            RequirementKind::Ruby { min_version } => {
                tool_at_least(probe, "ruby", Some(min_version))
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            RequirementKind::Arch { arch } => {
                format!("This formula requires a {} architecture.", arch)
            }
            RequirementKind::MinimumOs { version } => {
                format!("OS version {} or newer is required.", version)
            }
            RequirementKind::MaximumOs { version } => {
                format!("OS version {} or older is required.", version)
            }
            RequirementKind::Executable {
                name,
                default_formula,
                ..
            } => match default_formula {
                Some(formula) => format!(
                    "{} is required; install it with `taproom install {}`.",
                    name, formula
                ),
                None => format!("{} is required and was not found on PATH.", name),
            },
            RequirementKind::X11 { min_version } => versioned_message("X11", min_version),
            RequirementKind::Java { min_version } => versioned_message("Java", min_version),
            RequirementKind::Ruby { min_version } => {
                format!("Ruby {} or newer is required.", min_version)
            }
            RequirementKind::Xcode { min_version } => {
                versioned_message("Xcode", min_version)
            }
        }
    }

    /// Formula that can be installed instead of satisfying this from the host.
    pub fn default_formula(&self) -> Option<&str> {
        match self {
            RequirementKind::Executable {
                default_formula, ..
            } => default_formula.as_deref(),
            _ => None,
        }
    }
}

fn versioned_message(what: &str, min_version: &Option<String>) -> String {
    match min_version {
        Some(v) => format!("{} {} or newer is required.", what, v),
        None => format!("{} is required.", what),
    }
}

fn arch_matches(wanted: &str, actual: &str) -> bool {
    match wanted {
        "intel" | "x86_64" => actual == "x86_64",
        "arm" | "arm64" | "aarch64" => actual == "arm64",
        other => other == actual,
    }
}

fn tool_at_least(probe: &dyn SystemProbe, tool: &str, min: Option<&str>) -> bool {
    match (probe.tool_version(tool), min) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(found), Some(min)) => compare_versions(&found, min) != Ordering::Less,
    }
}

/// A declared requirement with its applicability tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(flatten)]
    pub kind: RequirementKind,
    #[serde(default)]
    pub tags: Vec<DependencyTag>,
    /// Overrides whether an unmet requirement aborts installation; fatal unless set.
    #[serde(default)]
    pub fatal: Option<bool>,
}

impl Requirement {
    pub fn new(kind: RequirementKind) -> Self {
        Self {
            kind,
            tags: Vec::new(),
            fatal: None,
        }
    }

    pub fn fatal(&self) -> bool {
        self.fatal.unwrap_or(true)
    }

    pub fn is_build(&self) -> bool {
        self.tags.contains(&DependencyTag::Build)
    }

    pub fn is_optional(&self) -> bool {
        self.tags.contains(&DependencyTag::Optional)
    }

    pub fn is_recommended(&self) -> bool {
        self.tags.contains(&DependencyTag::Recommended)
    }

    pub fn option_name(&self) -> String {
        self.kind.name()
    }

    pub fn satisfied(&self, probe: &dyn SystemProbe) -> bool {
        self.kind.satisfied(probe)
    }

    pub fn message(&self) -> String {
        self.kind.message()
    }

    pub fn default_formula(&self) -> Option<&str> {
        self.kind.default_formula()
    }
}

/// Probe backed by the running host.
#[derive(Debug, Default)]
pub struct HostProbe;

impl SystemProbe for HostProbe {
    fn arch(&self) -> String {
        crate::platform::arch().to_string()
    }

    fn os_version(&self) -> Option<String> {
        crate::platform::os_version()
    }

    fn which(&self, executable: &str) -> Option<PathBuf> {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(executable))
            .find(|candidate| is_executable(candidate))
    }

    fn tool_version(&self, tool: &str) -> Option<String> {
        let (program, args): (&str, &[&str]) = match tool {
            "ruby" => ("ruby", &["-e", "print RUBY_VERSION"]),
            "java" => ("java", &["-version"]),
            "xcode" => ("xcodebuild", &["-version"]),
            "x11" => {
                return self
                    .which("Xquartz")
                    .or_else(|| self.which("Xorg"))
                    .map(|_| "0".to_string());
            }
            _ => return None,
        };

        let output = Command::new(program).args(args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        // `java -version` reports on stderr.
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        first_version(&text)
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// First dotted number in `text`, e.g. `3.2.2` from `ruby 3.2.2p53`.
fn first_version(text: &str) -> Option<String> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|s| s.trim_matches('.'))
        .find(|s| s.contains('.') || s.parse::<u32>().is_ok())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Probe with fixed answers, for tests and dry runs on foreign hosts.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub arch: String,
    pub os_version: Option<String>,
    pub executables: HashSet<String>,
    pub tools: HashMap<String, String>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self {
            arch: crate::platform::arch().to_string(),
            ..Default::default()
        }
    }

    pub fn with_executable(mut self, name: &str) -> Self {
        self.executables.insert(name.to_string());
        self
    }

    pub fn with_tool(mut self, tool: &str, version: &str) -> Self {
        self.tools.insert(tool.to_string(), version.to_string());
        self
    }

    pub fn with_os_version(mut self, version: &str) -> Self {
        self.os_version = Some(version.to_string());
        self
    }
}

impl SystemProbe for StaticProbe {
    fn arch(&self) -> String {
        self.arch.clone()
    }

    fn os_version(&self) -> Option<String> {
        self.os_version.clone()
    }

    fn which(&self, executable: &str) -> Option<PathBuf> {
        self.executables
            .contains(executable)
            .then(|| PathBuf::from("/usr/bin").join(executable))
    }

    fn tool_version(&self, tool: &str) -> Option<String> {
        self.tools.get(tool).cloned()
    }
}
