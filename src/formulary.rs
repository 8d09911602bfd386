//! Formula lookup across the core repository and taps.
//!
//! Bare names resolve to `Library/Formula/<name>.json` first, then to the single
//! tap that defines them. `user/repo/name` resolves inside that tap only. Loaded
//! definitions are cached for the lifetime of the formulary.

use crate::config::Config;
use crate::error::{Result, TaproomError};
use crate::formula::Formula;
use moka::sync::Cache;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const SUGGESTION_THRESHOLD: f64 = 0.8;
const MAX_SUGGESTIONS: usize = 3;

pub struct Formulary {
    core_dir: PathBuf,
    taps_dir: PathBuf,
    cache: Cache<String, Arc<Formula>>,
}

impl Formulary {
    pub fn new(config: &Config) -> Self {
        Self::with_dirs(config.core_formula_dir(), config.taps_dir())
    }

    pub fn with_dirs(core_dir: PathBuf, taps_dir: PathBuf) -> Self {
        Self {
            core_dir,
            taps_dir,
            cache: Cache::new(1_000),
        }
    }

    pub fn load(&self, name: &str) -> Result<Arc<Formula>> {
        if let Some(formula) = self.cache.get(name) {
            return Ok(formula);
        }

        let (path, tap) = self.resolve(name)?;
        let formula = Arc::new(read_definition(&path, tap)?);
        debug!("Loaded {} from {}", formula.full_name(), path.display());

        self.cache.insert(name.to_string(), Arc::clone(&formula));
        Ok(formula)
    }

    /// Load a formula named by `dependent`'s definition.
    pub fn load_for(&self, name: &str, dependent: &str) -> Result<Arc<Formula>> {
        self.load(name).map_err(|e| e.with_dependent(dependent))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    fn resolve(&self, name: &str) -> Result<(PathBuf, Option<String>)> {
        let segments: Vec<&str> = name.split('/').collect();
        if let [user, repo, short] = segments.as_slice() {
            let path = self.tap_formula_path(user, repo, short);
            if path.is_file() {
                return Ok((path, Some(format!("{}/{}", user, repo))));
            }
            return Err(self.unavailable(name));
        }

        let core = self.core_dir.join(format!("{}.json", name));
        if core.is_file() {
            return Ok((core, None));
        }

        let mut candidates: Vec<(PathBuf, String)> = self
            .taps()
            .into_iter()
            .filter_map(|(tap, dir)| {
                let path = dir.join("Formula").join(format!("{}.json", name));
                path.is_file().then_some((path, tap))
            })
            .collect();

        match candidates.len() {
            0 => Err(self.unavailable(name)),
            1 => {
                let (path, tap) = candidates.remove(0);
                Ok((path, Some(tap)))
            }
            _ => Err(TaproomError::TapFormulaAmbiguity {
                name: name.to_string(),
                candidates: candidates
                    .into_iter()
                    .map(|(_, tap)| format!("{}/{}", tap, name))
                    .collect(),
            }),
        }
    }

    fn tap_formula_path(&self, user: &str, repo: &str, name: &str) -> PathBuf {
        self.taps_dir
            .join(user)
            .join(repo)
            .join("Formula")
            .join(format!("{}.json", name))
    }

    /// Installed taps as (`user/repo`, directory), sorted by name.
    fn taps(&self) -> Vec<(String, PathBuf)> {
        let mut taps = Vec::new();
        for user in read_dirs(&self.taps_dir) {
            for repo in read_dirs(&user) {
                let (Some(u), Some(r)) = (user.file_name(), repo.file_name()) else {
                    continue;
                };
                taps.push((
                    format!("{}/{}", u.to_string_lossy(), r.to_string_lossy()),
                    repo.clone(),
                ));
            }
        }
        taps.sort();
        taps
    }

    /// Every formula name known to the core repository and taps.
    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = formula_names(&self.core_dir);
        for (_, dir) in self.taps() {
            names.extend(formula_names(&dir.join("Formula")));
        }
        names.sort();
        names.dedup();
        names
    }

    fn unavailable(&self, name: &str) -> TaproomError {
        let short = name.rsplit('/').next().unwrap_or(name);
        let mut scored: Vec<(f64, String)> = self
            .all_names()
            .into_iter()
            .map(|candidate| (strsim::jaro_winkler(short, &candidate), candidate))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        TaproomError::FormulaUnavailable {
            name: name.to_string(),
            dependent: None,
            suggestions: scored
                .into_iter()
                .take(MAX_SUGGESTIONS)
                .map(|(_, name)| name)
                .collect(),
        }
    }
}

fn read_definition(path: &Path, tap: Option<String>) -> Result<Formula> {
    let contents = fs::read_to_string(path)?;
    let mut formula: Formula =
        serde_json::from_str(&contents).map_err(|source| TaproomError::InvalidFormula {
            path: path.to_path_buf(),
            source,
        })?;
    formula.tap = tap;
    Ok(formula)
}

fn read_dirs(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default()
}

fn formula_names(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let path = e.path();
                    (path.extension()? == "json")
                        .then(|| path.file_stem().map(|s| s.to_string_lossy().to_string()))
                        .flatten()
                })
                .collect()
        })
        .unwrap_or_default()
}
