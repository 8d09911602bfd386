//! Install receipts (`INSTALL_RECEIPT.json`).
//!
//! Every keg carries a receipt describing how it was produced: the options it was
//! built with, whether it came from a bottle, whether the user asked for it or it
//! was pulled in as a dependency, and the runtime dependencies it was installed
//! against. Receipts are written once the keg's files are final, through a
//! temporary file that is renamed into place.
//!
//! ```text
//! <prefix>/Cellar/wget/1.24.5/
//!   INSTALL_RECEIPT.json
//!   bin/
//! ```

use crate::formula::Formula;
use crate::options::Options;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub full_name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSource {
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub spec: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    #[serde(default)]
    pub installer: String,
    #[serde(default)]
    pub used_options: Options,
    #[serde(default)]
    pub unused_options: Options,
    #[serde(default)]
    pub built_as_bottle: bool,
    #[serde(default)]
    pub poured_from_bottle: bool,
    #[serde(default)]
    pub installed_as_dependency: bool,
    #[serde(default)]
    pub installed_on_request: bool,
    /// Unix timestamp of the install.
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
    #[serde(default)]
    pub source: TabSource,
}

/// How a keg came to be, used to fill in a new receipt.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallKind {
    pub poured_from_bottle: bool,
    pub built_as_bottle: bool,
    pub installed_on_request: bool,
}

impl Tab {
    pub fn create(
        formula: &Formula,
        used_options: Options,
        unused_options: Options,
        runtime_dependencies: Vec<RuntimeDependency>,
        kind: InstallKind,
    ) -> Self {
        Self {
            installer: format!("taproom/{}", env!("CARGO_PKG_VERSION")),
            used_options,
            unused_options,
            built_as_bottle: kind.built_as_bottle || kind.poured_from_bottle,
            poured_from_bottle: kind.poured_from_bottle,
            installed_as_dependency: !kind.installed_on_request,
            installed_on_request: kind.installed_on_request,
            time: Some(chrono::Utc::now().timestamp()),
            arch: Some(crate::platform::arch().to_string()),
            runtime_dependencies,
            source: TabSource {
                tap: formula.tap.clone(),
                spec: "stable".to_string(),
            },
        }
    }

    pub fn read(keg: &Path) -> Result<Self> {
        let path = keg.join(RECEIPT_FILE);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read receipt: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt: {}", path.display()))
    }

    /// The keg's receipt, or an empty one when it has none or it cannot be parsed.
    pub fn for_keg(keg: &Path) -> Self {
        Self::read(keg).unwrap_or_default()
    }

    pub fn write(&self, keg: &Path) -> Result<()> {
        let path = keg.join(RECEIPT_FILE);
        let tmp = keg.join(format!(".{}.tmp", RECEIPT_FILE));
        let json = serde_json::to_string_pretty(self).context("Failed to serialize receipt")?;

        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write receipt: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move receipt into place: {}", path.display()))?;
        Ok(())
    }

    /// Install time formatted for display.
    pub fn installed_at(&self) -> Option<String> {
        let time = self.time?;
        chrono::DateTime::from_timestamp(time, 0).map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
    }
}
