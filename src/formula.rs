//! Formula definitions as loaded from JSON, plus the installer's read-only view of them.
//!
//! A formula document looks like:
//!
//! ```json
//! {
//!   "name": "wget",
//!   "version": "1.24.5",
//!   "url": "https://ftp.gnu.org/gnu/wget/wget-1.24.5.tar.gz",
//!   "sha256": "…",
//!   "dependencies": [
//!     { "name": "pkgconf", "tags": ["build"] },
//!     { "name": "openssl@3" },
//!     { "name": "libidn2", "tags": ["recommended"] }
//!   ],
//!   "requirements": [{ "kind": "minimum_os", "version": "11" }],
//!   "options": [{ "name": "with-debug", "description": "Build with debug symbols" }],
//!   "bottle": { "rebuild": 0, "files": { "arm64_sonoma": { "cellar": ":any", "url": "…", "sha256": "…" } } },
//!   "install": ["./configure --prefix=$PREFIX", "make install"]
//! }
//! ```

use crate::config::Config;
use crate::options::Options;
use crate::platform::UNIVERSAL_TAG;
use crate::requirement::Requirement;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyTag {
    /// Needed only while building the dependent.
    Build,
    /// On by default, can be disabled with `--without-<name>`.
    Recommended,
    /// Off by default, enabled with `--with-<name>`.
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<DependencyTag>,
    /// Options to build the dependency with.
    #[serde(default)]
    pub options: Options,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            options: Options::new(),
        }
    }

    pub fn with_tag(mut self, tag: DependencyTag) -> Self {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
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

    pub fn is_required(&self) -> bool {
        !self.is_optional() && !self.is_recommended()
    }

    /// Name used in `with-`/`without-` options; tap-qualified names use their last segment.
    pub fn option_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One platform's prebuilt archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleFile {
    /// `:any`, `:any_skip_relocation`, or the absolute Cellar path it was built for.
    pub cellar: String,
    pub url: String,
    pub sha256: String,
}

impl BottleFile {
    /// Whether the bottle can be poured into `cellar`.
    pub fn compatible_cellar(&self, cellar: &std::path::Path) -> bool {
        match self.cellar.as_str() {
            ":any" | ":any_skip_relocation" => true,
            path => std::path::Path::new(path) == cellar,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottle {
    #[serde(default)]
    pub rebuild: u32,
    #[serde(default)]
    pub root_url: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, BottleFile>,
}

impl Bottle {
    /// The bottle for `tag`, falling back to a platform-independent one.
    pub fn file_for(&self, tag: &str) -> Option<&BottleFile> {
        self.files
            .get(tag)
            .or_else(|| self.files.get(UNIVERSAL_TAG))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KegOnlyReason {
    pub reason: String,
    #[serde(default)]
    pub explanation: String,
}

impl KegOnlyReason {
    pub fn describe(&self) -> String {
        if !self.explanation.is_empty() {
            return self.explanation.clone();
        }
        match self.reason.trim_start_matches(':') {
            "provided_by_macos" | "provided_by_osx" => {
                "macOS already provides this software and installing another version in\nparallel can cause all kinds of trouble.".to_string()
            }
            "shadowed_by_macos" | "shadowed_by_osx" => {
                "macOS provides similar software and installing this software in\nparallel can cause all kinds of trouble.".to_string()
            }
            "versioned_formula" => "this is an alternate version of another formula.".to_string(),
            other => other.replace('_', " "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSpec {
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    /// Tap the definition was loaded from, `None` for core formulae.
    #[serde(skip)]
    pub tap: Option<String>,
    pub version: String,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    /// Source archive location; `file://` and plain paths are accepted.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
    #[serde(default)]
    pub bottle: Option<Bottle>,
    #[serde(default = "default_true")]
    pub pour_bottle: bool,
    #[serde(default)]
    pub keg_only: Option<KegOnlyReason>,
    #[serde(default)]
    pub conflicts_with: Vec<ConflictSpec>,
    /// Shell commands run in the unpacked source tree.
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub post_install: Vec<String>,
    #[serde(default)]
    pub caveats: Option<String>,
}

impl Formula {
    pub fn full_name(&self) -> String {
        match &self.tap {
            Some(tap) => format!("{}/{}", tap, self.name),
            None => self.name.clone(),
        }
    }

    /// Version directory name in the Cellar, `1.2.3` or `1.2.3_1` with a revision.
    pub fn pkg_version(&self) -> String {
        if self.revision > 0 {
            format!("{}_{}", self.version, self.revision)
        } else {
            self.version.clone()
        }
    }

    pub fn is_keg_only(&self) -> bool {
        self.keg_only.is_some()
    }

    /// Explicit options plus the implicit `with-`/`without-` switch of every
    /// optional or recommended dependency and requirement.
    pub fn declared_options(&self) -> Options {
        let mut declared = Options::new();
        for option in &self.options {
            declared.insert(&option.name);
        }
        for dep in &self.dependencies {
            if dep.is_optional() {
                declared.insert(&format!("with-{}", dep.option_name()));
            } else if dep.is_recommended() {
                declared.insert(&format!("without-{}", dep.option_name()));
            }
        }
        for req in &self.requirements {
            if req.is_optional() {
                declared.insert(&format!("with-{}", req.option_name()));
            } else if req.is_recommended() {
                declared.insert(&format!("without-{}", req.option_name()));
            }
        }
        declared
    }

    /// Option names with their descriptions, implicit ones described automatically.
    pub fn option_descriptions(&self) -> Vec<(String, String)> {
        self.declared_options()
            .iter()
            .map(|name| {
                let description = self
                    .options
                    .iter()
                    .find(|o| o.name == name)
                    .map(|o| o.description.clone())
                    .unwrap_or_else(|| implicit_description(name));
                (format!("--{}", name), description)
            })
            .collect()
    }
}

fn implicit_description(option: &str) -> String {
    if let Some(name) = option.strip_prefix("with-") {
        format!("Build with {} support", name)
    } else if let Some(name) = option.strip_prefix("without-") {
        format!("Build without {} support", name)
    } else {
        String::new()
    }
}

/// Installer-side helpers over a formula: where its kegs live and what to tell the user.
#[derive(Debug, Clone, Copy)]
pub struct FormulaView<'a> {
    formula: &'a Formula,
    config: &'a Config,
}

impl<'a> FormulaView<'a> {
    pub fn new(formula: &'a Formula, config: &'a Config) -> Self {
        Self { formula, config }
    }

    pub fn formula(&self) -> &'a Formula {
        self.formula
    }

    pub fn rack(&self) -> PathBuf {
        self.config.rack(&self.formula.name)
    }

    /// Keg directory of the current version.
    pub fn prefix(&self) -> PathBuf {
        self.rack().join(self.formula.pkg_version())
    }

    pub fn opt_prefix(&self) -> PathBuf {
        self.config.opt_prefix(&self.formula.name)
    }

    pub fn linked_keg_record(&self) -> PathBuf {
        self.config.linked_keg_record(&self.formula.name)
    }

    /// The current version's keg exists and is not empty.
    pub fn is_installed(&self) -> bool {
        std::fs::read_dir(self.prefix())
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    pub fn logs(&self) -> PathBuf {
        self.config.formula_logs(&self.formula.name)
    }

    pub fn keg_only_text(&self) -> Option<String> {
        let reason = self.formula.keg_only.as_ref()?;
        let opt = self.opt_prefix();
        Some(format!(
            "{name} is keg-only, which means it was not symlinked into {prefix},\nbecause {reason}\n\n\
             If you need to build against {name}, set:\n  LDFLAGS:  -L{lib}\n  CPPFLAGS: -I{include}",
            name = self.formula.name,
            prefix = self.config.prefix.display(),
            reason = reason.describe(),
            lib = opt.join("lib").display(),
            include = opt.join("include").display(),
        ))
    }

    /// Formula caveats followed by the keg-only explanation, if any.
    pub fn caveats(&self) -> Option<String> {
        let parts: Vec<String> = self
            .formula
            .caveats
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .chain(self.keg_only_text())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Compare version strings numerically segment by segment, then lexicographically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split(['.', '_', '-'])
            .map(|s| {
                s.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let a_parts = parse(a);
    let b_parts = parse(b);

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).copied().unwrap_or(0);
        let b_part = b_parts.get(i).copied().unwrap_or(0);
        match a_part.cmp(&b_part) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    a.cmp(b)
}
