//! Choosing between pouring a bottle and building from source.

use crate::config::Config;
use crate::formula::{BottleFile, Formula};
use crate::install::InstallFlags;
use crate::options::Options;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The formula the user asked for.
    Root,
    /// Pulled in by another formula.
    Dependency,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BottleSource {
    /// A bottle already present in the download cache.
    Cached(PathBuf),
    Remote { tag: String, file: BottleFile },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceReason {
    PourFailed,
    Requested,
    NonDefaultOptions,
    NoBottle,
    PourDisabled,
    IncompatibleCellar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Pour(BottleSource),
    Build(SourceReason),
}

impl Decision {
    pub fn pours(&self) -> bool {
        matches!(self, Decision::Pour(_))
    }
}

pub struct BottleDecider<'a> {
    config: &'a Config,
    flags: &'a InstallFlags,
    tag: String,
    pour_failed: &'a HashSet<String>,
}

impl<'a> BottleDecider<'a> {
    pub fn new(
        config: &'a Config,
        flags: &'a InstallFlags,
        tag: impl Into<String>,
        pour_failed: &'a HashSet<String>,
    ) -> Self {
        Self {
            config,
            flags,
            tag: tag.into(),
            pour_failed,
        }
    }

    /// First matching rule wins. Flags that only make sense for the requested
    /// formula (forcing a bottle, interactive or bottle builds) are ignored for
    /// dependencies; building everything from source is not.
    pub fn decide(&self, formula: &Formula, options: &Options, role: Role) -> Decision {
        if self.pour_failed.contains(&formula.name) {
            return Decision::Build(SourceReason::PourFailed);
        }

        let cached = cached_bottle(self.config, formula, &self.tag);
        let remote = formula
            .bottle
            .as_ref()
            .and_then(|bottle| bottle.file_for(&self.tag));
        let is_root = role == Role::Root;

        if is_root && self.flags.force_bottle {
            if let Some(path) = cached {
                return Decision::Pour(BottleSource::Cached(path));
            }
            if let Some(file) = remote {
                return Decision::Pour(self.remote(file));
            }
        }

        if self.flags.build_from_source
            || self.config.build_from_source
            || (is_root && (self.flags.interactive || self.flags.build_bottle))
        {
            return Decision::Build(SourceReason::Requested);
        }

        if !formula.declared_options().intersection(options).is_empty() {
            return Decision::Build(SourceReason::NonDefaultOptions);
        }

        if let Some(path) = cached {
            return Decision::Pour(BottleSource::Cached(path));
        }

        match remote {
            None => Decision::Build(SourceReason::NoBottle),
            Some(_) if !formula.pour_bottle => Decision::Build(SourceReason::PourDisabled),
            Some(file) if !file.compatible_cellar(&self.config.cellar) => {
                Decision::Build(SourceReason::IncompatibleCellar)
            }
            Some(file) => Decision::Pour(self.remote(file)),
        }
    }

    fn remote(&self, file: &BottleFile) -> BottleSource {
        BottleSource::Remote {
            tag: self.tag.clone(),
            file: file.clone(),
        }
    }
}

/// Cache file name of a bottle, `<name>--<version>.<tag>.bottle[.<rebuild>].tar.gz`.
pub fn bottle_filename(formula: &Formula, tag: &str) -> String {
    let rebuild = formula.bottle.as_ref().map(|b| b.rebuild).unwrap_or(0);
    if rebuild > 0 {
        format!(
            "{}--{}.{}.bottle.{}.tar.gz",
            formula.name,
            formula.pkg_version(),
            tag,
            rebuild
        )
    } else {
        format!(
            "{}--{}.{}.bottle.tar.gz",
            formula.name,
            formula.pkg_version(),
            tag
        )
    }
}

/// A previously downloaded bottle, only considered while the formula still has one.
fn cached_bottle(config: &Config, formula: &Formula, tag: &str) -> Option<PathBuf> {
    formula.bottle.as_ref()?;
    let path = config.cache.join(bottle_filename(formula, tag));
    path.is_file().then_some(path)
}
