//! Dependency and requirement expansion into an install plan.
//!
//! The walk is depth-first from the requested formula. At every formula its
//! effective options decide which edges survive:
//!
//! 1. optional/recommended edges whose switch is off are dropped,
//! 2. build-only edges are dropped when the consumer will be poured from a bottle,
//! 3. an unmet requirement with an installable default formula becomes a
//!    dependency on that formula,
//! 4. met requirements are dropped,
//! 5. remaining unmet requirements are collected, and any fatal ones abort the
//!    whole expansion together once the walk is complete,
//! 6. a dependency that is already installed, linked and built with the options
//!    needed is left out of the plan, but its own dependencies are still walked.
//!
//! Dependencies are placed before their dependents and each formula appears once;
//! when a formula is reached along several paths the options of the first path win.

use crate::bottle::{BottleDecider, Role};
use crate::cellar;
use crate::config::Config;
use crate::error::{Result, TaproomError, UnmetRequirement};
use crate::formula::{Dependency, DependencyTag, Formula, FormulaView};
use crate::formulary::Formulary;
use crate::options::{BuildOptions, Options};
use crate::requirement::SystemProbe;
use crate::tab::{RuntimeDependency, Tab};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub formula: Arc<Formula>,
    pub options: Options,
}

/// Formulae to install in order; the requested formula is last.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub entries: Vec<PlanEntry>,
    /// Unmet requirements that were not fatal.
    pub warnings: Vec<UnmetRequirement>,
}

impl InstallPlan {
    pub fn root(&self) -> Option<&PlanEntry> {
        self.entries.last()
    }

    /// Everything except the requested formula.
    pub fn dependencies(&self) -> &[PlanEntry] {
        match self.entries.split_last() {
            Some((_, deps)) => deps,
            None => &[],
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.formula.name.clone()).collect()
    }

    pub fn runtime_dependencies(&self) -> Vec<RuntimeDependency> {
        self.dependencies()
            .iter()
            .map(|e| RuntimeDependency {
                full_name: e.formula.full_name(),
                version: e.formula.pkg_version(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildEdges {
    /// Drop them for consumers that will be poured.
    WhenPoured,
    /// Drop them everywhere, giving the runtime closure.
    Always,
    /// Keep them everywhere.
    Never,
}

#[derive(Debug, Clone, Copy)]
pub struct ExpandMode {
    pub skip_satisfied: bool,
    pub build_edges: BuildEdges,
    pub fail_on_unmet: bool,
}

impl ExpandMode {
    /// What still needs installing.
    pub const INSTALL: ExpandMode = ExpandMode {
        skip_satisfied: true,
        build_edges: BuildEdges::WhenPoured,
        fail_on_unmet: true,
    };

    /// Every formula needed at runtime, installed or not.
    pub const RUNTIME: ExpandMode = ExpandMode {
        skip_satisfied: false,
        build_edges: BuildEdges::Always,
        fail_on_unmet: false,
    };

    /// Every formula needed to build, installed or not.
    pub const BUILD: ExpandMode = ExpandMode {
        skip_satisfied: false,
        build_edges: BuildEdges::Never,
        fail_on_unmet: false,
    };
}

pub struct Expander<'a> {
    config: &'a Config,
    formulary: &'a Formulary,
    probe: &'a dyn SystemProbe,
    decider: &'a BottleDecider<'a>,
    mode: ExpandMode,
}

#[derive(Default)]
struct Walk {
    entries: Vec<PlanEntry>,
    placed: HashSet<String>,
    skipped: HashSet<String>,
    stack: Vec<String>,
    unmet: Vec<(UnmetRequirement, bool)>,
}

impl<'a> Expander<'a> {
    pub fn new(
        config: &'a Config,
        formulary: &'a Formulary,
        probe: &'a dyn SystemProbe,
        decider: &'a BottleDecider<'a>,
    ) -> Self {
        Self {
            config,
            formulary,
            probe,
            decider,
            mode: ExpandMode::INSTALL,
        }
    }

    pub fn with_mode(mut self, mode: ExpandMode) -> Self {
        self.mode = mode;
        self
    }

    /// Expand `root` requested with `options` into an ordered plan.
    pub fn expand(&self, root: Arc<Formula>, options: &Options) -> Result<InstallPlan> {
        let recorded = self.recorded_options(&root);
        let effective = Options::layered(&[options, &recorded]);

        let mut walk = Walk::default();
        self.visit(&mut walk, root.clone(), effective, Role::Root, true)?;

        let (fatal, warnings): (Vec<_>, Vec<_>) =
            walk.unmet.into_iter().partition(|(_, fatal)| *fatal);
        if self.mode.fail_on_unmet && !fatal.is_empty() {
            return Err(TaproomError::UnsatisfiedRequirements {
                formula: root.name.clone(),
                unmet: fatal.into_iter().map(|(u, _)| u).collect(),
            });
        }

        debug!(
            "Plan for {}: {}",
            root.name,
            walk.entries
                .iter()
                .map(|e| e.formula.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(InstallPlan {
            entries: walk.entries,
            warnings: warnings.into_iter().map(|(u, _)| u).collect(),
        })
    }

    fn visit(
        &self,
        walk: &mut Walk,
        formula: Arc<Formula>,
        options: Options,
        role: Role,
        place: bool,
    ) -> Result<()> {
        if let Some(pos) = walk.stack.iter().position(|n| *n == formula.name) {
            let mut chain = walk.stack[pos..].to_vec();
            chain.push(formula.name.clone());
            return Err(TaproomError::CircularDependency { chain });
        }
        walk.stack.push(formula.name.clone());

        let declared = formula.declared_options();
        let build = BuildOptions::new(&options, &declared);
        let prune_build = match self.mode.build_edges {
            BuildEdges::WhenPoured => self.decider.decide(&formula, &options, role).pours(),
            BuildEdges::Always => true,
            BuildEdges::Never => false,
        };

        let mut deps = self.requirement_dependencies(walk, &formula, &build, prune_build);
        deps.extend(formula.dependencies.iter().cloned());

        for dep in deps {
            if dep.option_name() == formula.name {
                continue;
            }
            if (dep.is_optional() || dep.is_recommended()) && build.without(dep.option_name()) {
                continue;
            }
            if dep.is_build() && prune_build {
                continue;
            }

            let dep_formula = self.formulary.load_for(&dep.name, &formula.name)?;
            if walk.placed.contains(&dep_formula.name) {
                continue;
            }

            let inherited = inherited_options(&dep, &dep_formula, &build);
            let satisfied = self.mode.skip_satisfied && self.is_satisfied(&dep_formula, &inherited);
            if satisfied && walk.skipped.contains(&dep_formula.name) {
                continue;
            }
            if satisfied {
                walk.skipped.insert(dep_formula.name.clone());
            }

            let recorded = self.recorded_options(&dep_formula);
            let effective = Options::layered(&[&inherited, &recorded]);
            self.visit(walk, dep_formula, effective, Role::Dependency, !satisfied)?;
        }

        walk.stack.pop();
        if place && walk.placed.insert(formula.name.clone()) {
            walk.entries.push(PlanEntry { formula, options });
        }
        Ok(())
    }

    /// Apply the requirement rules, returning substitute dependencies.
    fn requirement_dependencies(
        &self,
        walk: &mut Walk,
        formula: &Formula,
        build: &BuildOptions<'_>,
        prune_build: bool,
    ) -> Vec<Dependency> {
        let mut substitutes = Vec::new();

        for req in &formula.requirements {
            if (req.is_optional() || req.is_recommended()) && build.without(&req.option_name()) {
                continue;
            }
            if req.is_build() && prune_build {
                continue;
            }
            if req.satisfied(self.probe) {
                continue;
            }
            if let Some(default) = req.default_formula()
                && self.formulary.exists(default)
            {
                let mut dep = Dependency::new(default);
                if req.is_build() {
                    dep = dep.with_tag(DependencyTag::Build);
                }
                substitutes.push(dep);
                continue;
            }

            walk.unmet.push((
                UnmetRequirement {
                    dependent: formula.name.clone(),
                    message: req.message(),
                },
                req.fatal(),
            ));
        }

        substitutes
    }

    /// Installed at the current version, linked (or opt-linked when keg-only),
    /// and built with every option the dependent needs.
    fn is_satisfied(&self, formula: &Formula, needed: &Options) -> bool {
        let view = FormulaView::new(formula, self.config);
        if !view.is_installed() {
            return false;
        }

        let prefix = view.prefix();
        let active = if formula.is_keg_only() {
            cellar::opt_keg(self.config, &formula.name)
        } else {
            cellar::linked_keg(self.config, &formula.name)
        };
        if active.as_deref() != Some(prefix.as_path()) {
            return false;
        }

        let wanted = formula.declared_options().intersection(needed);
        wanted.is_subset(&Tab::for_keg(&prefix).used_options)
    }

    /// Options recorded in the receipt of the formula's active or current keg.
    fn recorded_options(&self, formula: &Formula) -> Options {
        let view = FormulaView::new(formula, self.config);
        let keg = cellar::linked_keg(self.config, &formula.name)
            .or_else(|| cellar::opt_keg(self.config, &formula.name))
            .or_else(|| view.is_installed().then(|| view.prefix()));

        match keg {
            Some(keg) => Tab::for_keg(&keg).used_options,
            None => Options::new(),
        }
    }
}

fn inherited_options(dep: &Dependency, dep_formula: &Formula, build: &BuildOptions<'_>) -> Options {
    let mut inherited = dep.options.clone();
    if build.universal() && !dep.is_build() && dep_formula.declared_options().contains("universal") {
        inherited.insert("universal");
    }
    inherited
}
