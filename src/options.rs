//! Build option sets and their precedence rules.
//!
//! Options are stored without the leading `--`. A formula with an optional
//! dependency `foo` implicitly declares `with-foo`; a recommended dependency
//! declares `without-foo`. The effective options of a formula are layered:
//! explicit user flags, then options inherited from the dependent that pulled the
//! formula in, then options recorded in an existing install receipt. A higher
//! layer that says `with-x` masks `without-x` from a lower one and vice versa.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Ordered set of option names; the first insertion of a name wins its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Options(Vec<String>);

// Receipts written by other tools store flags with their dashes.
impl<'de> Deserialize<'de> for Options {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flags = Vec::<String>::deserialize(deserializer)?;
        Ok(Options::from_flags(flags))
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse user flags, accepting both `--with-foo` and `with-foo`.
    pub fn from_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for flag in flags {
            options.insert(flag.as_ref());
        }
        options
    }

    pub fn insert(&mut self, name: &str) {
        let name = name.trim().trim_start_matches("--");
        if !name.is_empty() && !self.contains(name) {
            self.0.push(name.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|o| o == name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Options present in both sets, in `self`'s order.
    pub fn intersection(&self, other: &Options) -> Options {
        Options(self.iter().filter(|o| other.contains(o)).map(String::from).collect())
    }

    pub fn difference(&self, other: &Options) -> Options {
        Options(self.iter().filter(|o| !other.contains(o)).map(String::from).collect())
    }

    pub fn is_subset(&self, other: &Options) -> bool {
        self.iter().all(|o| other.contains(o))
    }

    /// Append another set, keeping existing entries first.
    pub fn extend(&mut self, other: &Options) {
        for option in other.iter() {
            self.insert(option);
        }
    }

    /// Merge option layers, highest precedence first.
    pub fn layered(layers: &[&Options]) -> Options {
        let mut merged = Options::new();
        for layer in layers {
            for option in layer.iter() {
                if let Some(opposite) = opposite(option)
                    && merged.contains(&opposite)
                {
                    continue;
                }
                merged.insert(option);
            }
        }
        merged
    }

    pub fn as_flags(&self) -> Vec<String> {
        self.iter().map(|o| format!("--{}", o)).collect()
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_flags().join(" "))
    }
}

impl<'a> FromIterator<&'a str> for Options {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Options::from_flags(iter)
    }
}

fn opposite(option: &str) -> Option<String> {
    if let Some(name) = option.strip_prefix("with-") {
        Some(format!("without-{}", name))
    } else {
        option
            .strip_prefix("without-")
            .map(|name| format!("with-{}", name))
    }
}

/// The requested options of one formula evaluated against what it declares.
#[derive(Debug, Clone)]
pub struct BuildOptions<'a> {
    args: &'a Options,
    declared: &'a Options,
}

impl<'a> BuildOptions<'a> {
    pub fn new(args: &'a Options, declared: &'a Options) -> Self {
        Self { args, declared }
    }

    /// Whether the feature `name` is enabled.
    ///
    /// A declared `with-name` means the feature is off unless requested; a declared
    /// `without-name` means it is on unless disabled. Undeclared features are off.
    pub fn with(&self, name: &str) -> bool {
        let with = format!("with-{}", name);
        let without = format!("without-{}", name);
        if self.declared.contains(&with) {
            self.args.contains(&with)
        } else if self.declared.contains(&without) {
            !self.args.contains(&without)
        } else {
            false
        }
    }

    pub fn without(&self, name: &str) -> bool {
        !self.with(name)
    }

    pub fn universal(&self) -> bool {
        self.args.contains("universal") && self.declared.contains("universal")
    }

    /// Requested options the formula understands.
    pub fn used_options(&self) -> Options {
        self.declared.intersection(self.args)
    }

    /// Declared options that were not requested.
    pub fn unused_options(&self) -> Options {
        self.declared.difference(self.args)
    }
}
