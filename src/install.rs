//! The installation orchestrator: install, upgrade and uninstall.
//!
//! One [`Installer`] drives a whole command-line run. It owns the run-scoped
//! state: which formulae were already attempted, which bottles failed to pour,
//! and which locks are held. Nested dependency installs go through the same
//! instance, so a formula reached along several paths is handled once.
//!
//! A top-level install runs these steps:
//!
//! 1. refuse while a conflicting formula is linked,
//! 2. expand dependencies and requirements into a plan,
//! 3. lock the plan and its runtime closure,
//! 4. install each dependency in plan order,
//! 5. pour or build the requested formula,
//! 6. clean, run post-install commands, link, and write the receipt.
//!
//! Downloads, pours and builds also watch the run-wide [`Interrupt`]. An interrupted
//! formula has its keg removed and any keg moved aside restored.

use crate::bottle::{BottleDecider, BottleSource, Decision, Role, bottle_filename};
use crate::build::{self, BuildEnvironment, BuildRequest, discard_keg};
use crate::cellar;
use crate::config::Config;
use crate::download::Downloader;
use crate::error::{ConflictingFormula, Result, TaproomError};
use crate::expand::{ExpandMode, Expander, InstallPlan, PlanEntry};
use crate::extract;
use crate::formula::{Formula, FormulaView, compare_versions};
use crate::formulary::Formulary;
use crate::interrupt::Interrupt;
use crate::keg::{Keg, LinkMode};
use crate::lock::{FormulaLock, LockGroup};
use crate::options::{BuildOptions, Options};
use crate::relocate;
use crate::requirement::{HostProbe, SystemProbe};
use crate::tab::{InstallKind, RuntimeDependency, Tab};
use crate::ui;
use anyhow::Context;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Modifiers for an install. Flags about how to build apply to the requested
/// formula only, except `build_from_source`, which applies to every formula.
#[derive(Debug, Clone, Default)]
pub struct InstallFlags {
    pub build_from_source: bool,
    pub force_bottle: bool,
    pub ignore_dependencies: bool,
    pub only_dependencies: bool,
    /// Reinstall over an existing keg and ignore conflicts.
    pub force: bool,
    pub build_bottle: bool,
    pub interactive: bool,
    pub debug: bool,
    pub verbose: bool,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
struct RunState {
    attempted: HashSet<String>,
    pour_failed: HashSet<String>,
    locked: HashSet<String>,
    held: Vec<LockGroup>,
}

impl RunState {
    fn release_locks(&mut self) {
        self.held.clear();
        self.locked.clear();
    }
}

#[derive(Debug)]
pub enum InstallOutcome {
    Installed {
        keg: PathBuf,
        poured: bool,
        dependencies: Vec<String>,
        /// Only set for the formula the user asked for.
        caveats: Option<String>,
    },
    AlreadyInstalled {
        version: String,
        linked: bool,
    },
    /// Already handled earlier in this run.
    Skipped,
    DependenciesOnly {
        dependencies: Vec<String>,
    },
    Planned(InstallPlan),
}

#[derive(Debug)]
pub enum UpgradeOutcome {
    Upgraded {
        from: String,
        to: String,
        outcome: InstallOutcome,
    },
    UpToDate {
        version: String,
    },
}

#[derive(Debug, Default)]
pub struct UninstallReport {
    pub removed: Vec<PathBuf>,
    /// Versions still in the Cellar afterwards.
    pub remaining: Vec<String>,
}

/// A keg that was moved out of the way before reinstalling, with the keg that
/// was linked at the time.
struct Aside {
    prefix: PathBuf,
    moved: Option<PathBuf>,
    linked: Option<Keg>,
}

pub struct Installer {
    config: Config,
    formulary: Formulary,
    probe: Box<dyn SystemProbe>,
    downloader: Downloader,
    tag: String,
    interrupt: Interrupt,
    state: RunState,
}

impl Installer {
    pub fn new(config: Config, tag: impl Into<String>) -> Self {
        Self {
            formulary: Formulary::new(&config),
            downloader: Downloader::new(config.cache.clone()),
            probe: Box::new(HostProbe),
            tag: tag.into(),
            interrupt: Interrupt::new(),
            state: RunState::default(),
            config,
        }
    }

    pub fn with_probe(mut self, probe: impl SystemProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn formulary(&self) -> &Formulary {
        &self.formulary
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Expand `formula` into the plan an install would follow.
    pub fn plan(&self, formula: Arc<Formula>, options: &Options, flags: &InstallFlags) -> Result<InstallPlan> {
        self.expand(formula, options, flags, ExpandMode::INSTALL)
    }

    /// Whether a formula would be poured or built.
    pub fn decide(&self, formula: &Formula, options: &Options, role: Role, flags: &InstallFlags) -> Decision {
        BottleDecider::new(&self.config, flags, self.tag.clone(), &self.state.pour_failed)
            .decide(formula, options, role)
    }

    fn expand(
        &self,
        formula: Arc<Formula>,
        options: &Options,
        flags: &InstallFlags,
        mode: ExpandMode,
    ) -> Result<InstallPlan> {
        let decider = BottleDecider::new(&self.config, flags, self.tag.clone(), &self.state.pour_failed);
        Expander::new(&self.config, &self.formulary, self.probe.as_ref(), &decider)
            .with_mode(mode)
            .expand(formula, options)
    }

    /// Install `name` and whatever it needs. Locks taken along the way are
    /// released before returning, whatever the result.
    pub async fn install(&mut self, name: &str, options: &Options, flags: &InstallFlags) -> Result<InstallOutcome> {
        let result = self.install_requested(name, options, flags).await;
        self.state.release_locks();
        result
    }

    async fn install_requested(
        &mut self,
        name: &str,
        options: &Options,
        flags: &InstallFlags,
    ) -> Result<InstallOutcome> {
        let formula = self.formulary.load(name)?;
        if self.state.attempted.contains(&formula.name) {
            debug!("{} was already handled in this run", formula.name);
            return Ok(InstallOutcome::Skipped);
        }

        let view = FormulaView::new(&formula, &self.config);
        let caveats = view.caveats();
        if !flags.force && !flags.only_dependencies {
            if view.is_installed() {
                let linked = if formula.is_keg_only() {
                    cellar::opt_keg(&self.config, &formula.name) == Some(view.prefix())
                } else {
                    cellar::linked_keg(&self.config, &formula.name) == Some(view.prefix())
                };
                return Ok(InstallOutcome::AlreadyInstalled {
                    version: formula.pkg_version(),
                    linked,
                });
            }
            if let Some(linked) = cellar::linked_keg(&self.config, &formula.name) {
                let version = cellar::keg_version(&linked).unwrap_or_default();
                return Err(TaproomError::CannotInstall {
                    name: formula.name.clone(),
                    reason: format!(
                        "{} {} is already installed and linked.\nTo install {}, run `taproom upgrade {}`",
                        formula.name,
                        version,
                        formula.pkg_version(),
                        formula.name
                    ),
                });
            }
        }

        if !flags.force {
            let conflicts = self.linked_conflicts(&formula);
            if !conflicts.is_empty() {
                return Err(TaproomError::Conflict {
                    formula: formula.name.clone(),
                    conflicts,
                });
            }
        }

        let mode = if flags.ignore_dependencies {
            ExpandMode {
                fail_on_unmet: false,
                ..ExpandMode::INSTALL
            }
        } else {
            ExpandMode::INSTALL
        };
        let mut plan = self.expand(formula.clone(), options, flags, mode)?;
        if flags.ignore_dependencies {
            plan.entries.retain(|e| e.formula.name == formula.name);
        }
        for unmet in &plan.warnings {
            ui::opoo(&format!("{}: {}", unmet.dependent, unmet.message));
        }
        if flags.dry_run {
            return Ok(InstallOutcome::Planned(plan));
        }

        let runtime = if flags.ignore_dependencies {
            Vec::new()
        } else {
            self.expand(formula.clone(), options, flags, ExpandMode::RUNTIME)?
                .dependencies()
                .to_vec()
        };

        let mut names: Vec<String> = plan.names();
        names.extend(runtime.iter().map(|e| e.formula.name.clone()));
        names.push(formula.name.clone());
        self.lock(&names)?;

        self.check_dependencies_linked(&formula, &runtime)?;

        let mut dependencies = Vec::new();
        for entry in plan.dependencies() {
            if self.install_dependency(entry, flags).await? {
                dependencies.push(entry.formula.name.clone());
            }
        }

        if flags.only_dependencies {
            return Ok(InstallOutcome::DependenciesOnly { dependencies });
        }

        let Some(root) = plan.root().cloned() else {
            return Err(TaproomError::CannotInstall {
                name: formula.name.clone(),
                reason: "dependency expansion produced an empty plan".to_string(),
            });
        };
        self.state.attempted.insert(formula.name.clone());

        let aside = self.set_aside(&formula)?;
        match self.install_keg(&root, flags, Role::Root).await {
            Ok((keg, poured)) => {
                self.finish_aside(aside);
                Ok(InstallOutcome::Installed {
                    keg,
                    poured,
                    dependencies,
                    caveats,
                })
            }
            Err(err) if err.is_conflict() => {
                // The keg is complete; only linking failed.
                self.finish_aside(aside);
                Err(err)
            }
            Err(err) => {
                self.restore_aside(aside);
                Err(err)
            }
        }
    }

    /// Install one dependency from the plan. Returns false if it had already been
    /// handled in this run.
    async fn install_dependency(&mut self, entry: &PlanEntry, flags: &InstallFlags) -> Result<bool> {
        let name = entry.formula.name.clone();
        if !self.state.attempted.insert(name.clone()) {
            return Ok(false);
        }
        ui::ohai(&format!("Installing dependency: {}", name));

        let aside = self.set_aside(&entry.formula)?;
        match self.install_keg(entry, flags, Role::Dependency).await {
            Ok(_) => {
                self.finish_aside(aside);
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                self.finish_aside(aside);
                Err(err)
            }
            Err(err) => {
                self.restore_aside(aside);
                Err(err)
            }
        }
    }

    /// Pour or build a keg, then finish it: clean, post-install, link, receipt.
    /// A link failure is returned after the receipt is written.
    async fn install_keg(&mut self, entry: &PlanEntry, flags: &InstallFlags, role: Role) -> Result<(PathBuf, bool)> {
        self.check_interrupt(&entry.formula.name)?;
        let runtime = self.runtime_dependencies(entry, flags)?;
        let (keg, poured) = self.materialize(entry, flags, role).await?;
        if let Err(err) = self.check_interrupt(&entry.formula.name) {
            discard_keg(&keg);
            return Err(err);
        }

        if !poured {
            match clean_keg(&keg) {
                Ok(removed) if removed > 0 => debug!("Cleaned {} paths from {}", removed, keg.display()),
                Ok(_) => {}
                Err(err) => ui::opoo(&format!("Failed to clean {}: {:#}", keg.display(), err)),
            }
        }

        self.post_install(&entry.formula, &entry.options, &keg).await;

        let linked = self.link_keg(&entry.formula, &keg);
        self.write_tab(entry, &keg, runtime, poured, role, flags)?;
        linked?;

        Ok((keg, poured))
    }

    /// Produce the keg, falling back to a source build if pouring fails.
    async fn materialize(&mut self, entry: &PlanEntry, flags: &InstallFlags, role: Role) -> Result<(PathBuf, bool)> {
        let formula = &entry.formula;
        let decision = BottleDecider::new(&self.config, flags, self.tag.clone(), &self.state.pour_failed)
            .decide(formula, &entry.options, role);

        if let Decision::Pour(source) = decision {
            match self.pour(formula, source).await {
                Ok(keg) => return Ok((keg, true)),
                Err(err) if err.is_interrupt() => {
                    discard_keg(&FormulaView::new(formula, &self.config).prefix());
                    return Err(err);
                }
                Err(err) => {
                    ui::opoo(&format!(
                        "Bottle installation failed: building {} from source.\n{}",
                        formula.name, err
                    ));
                    discard_keg(&FormulaView::new(formula, &self.config).prefix());
                    self.state.pour_failed.insert(formula.name.clone());
                    self.install_build_dependencies(entry, flags).await?;
                }
            }
        } else {
            debug!("Building {}: {:?}", formula.name, decision);
        }

        let keg = self.build(entry, flags, role).await?;
        Ok((keg, false))
    }

    /// After a failed pour the build-only dependencies pruned earlier are needed.
    async fn install_build_dependencies(&mut self, entry: &PlanEntry, flags: &InstallFlags) -> Result<()> {
        let plan = self.expand(entry.formula.clone(), &entry.options, flags, ExpandMode::INSTALL)?;
        let names: Vec<String> = plan.dependencies().iter().map(|e| e.formula.name.clone()).collect();
        self.lock(&names)?;
        for dep in plan.dependencies() {
            Box::pin(self.install_dependency(dep, flags)).await?;
        }
        Ok(())
    }

    async fn pour(&self, formula: &Formula, source: BottleSource) -> Result<PathBuf> {
        let bottle = match source {
            BottleSource::Cached(path) => path,
            BottleSource::Remote { tag, file } => {
                ui::step(false, &format!("Downloading {}", bottle_filename(formula, &tag)));
                self.interruptible(&formula.name, self.downloader.fetch_bottle(formula, &tag, &file))
                    .await?
            }
        };
        self.check_interrupt(&formula.name)?;
        ui::step(false, &format!("Pouring {}", bottle.file_name().unwrap_or_default().to_string_lossy()));

        let keg = extract::pour_bottle(&self.config, &bottle, formula)?;
        let relocated = relocate::relocate_keg(&keg, &self.config.prefix, &self.config.cellar)?;
        if relocated > 0 {
            debug!("Relocated {} files in {}", relocated, keg.display());
        }
        self.check_interrupt(&formula.name)?;
        extract::install_etc_var(&keg, &self.config.prefix)?;
        Ok(keg)
    }

    async fn build(&self, entry: &PlanEntry, flags: &InstallFlags, role: Role) -> Result<PathBuf> {
        let formula = &entry.formula;
        let view = FormulaView::new(formula, &self.config);
        let is_root = role == Role::Root;
        ui::step(false, &format!("Building {} {} from source", formula.name, formula.pkg_version()));

        let source = self
            .interruptible(&formula.name, self.downloader.fetch_source(formula))
            .await?;
        let deps: Vec<Arc<Formula>> = self
            .expand(formula.clone(), &entry.options, flags, ExpandMode::BUILD)?
            .dependencies()
            .iter()
            .map(|e| e.formula.clone())
            .collect();

        let declared = formula.declared_options();
        let used = BuildOptions::new(&entry.options, &declared).used_options();
        let env = BuildEnvironment::new(
            &self.config,
            formula,
            &deps,
            &used,
            is_root && flags.build_bottle,
        );

        let request = BuildRequest {
            formula: formula.name.clone(),
            version: formula.pkg_version(),
            keg: view.prefix(),
            source,
            steps: formula.install.clone(),
            options: used,
            env,
            logs: view.logs(),
            interactive: is_root && flags.interactive,
            verbose: flags.verbose,
            debug: flags.debug,
        };
        build::run_build(&self.config, &request, &self.interrupt).await?;
        Ok(request.keg)
    }

    /// Run the formula's post-install commands. Failures only warn.
    async fn post_install(&self, formula: &Formula, options: &Options, keg: &Path) {
        if formula.post_install.is_empty() {
            return;
        }
        let env = BuildEnvironment::new(&self.config, formula, &[], options, false);

        for command in &formula.post_install {
            let status = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(keg)
                .env_clear()
                .envs(env.vars())
                .env("PREFIX", keg)
                .stdin(Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) if status.success() => {}
                Ok(status) => ui::opoo(&format!(
                    "The post-install step did not complete successfully for {}: `{}` exited with {}",
                    formula.name, command, status
                )),
                Err(err) => ui::opoo(&format!(
                    "The post-install step could not be run for {}: {}",
                    formula.name, err
                )),
            }
        }
    }

    /// Keg-only formulae only get their `opt` link. A normal keg that cannot be
    /// linked still gets one, so dependents can find it.
    fn link_keg(&self, formula: &Formula, path: &Path) -> Result<()> {
        let keg = Keg::new(path);
        if formula.is_keg_only() {
            return keg.optlink(&self.config);
        }

        match keg.link(&self.config, LinkMode::default()) {
            Ok(report) => {
                debug!("Linked {} files for {}", report.linked.len(), formula.name);
                Ok(())
            }
            Err(err) => {
                if let Err(opt_err) = keg.optlink(&self.config) {
                    warn!("Failed to create opt link for {}: {}", formula.name, opt_err);
                }
                Err(err)
            }
        }
    }

    /// What the receipt records as runtime dependencies. Computed before the keg
    /// exists so a failure here leaves nothing behind.
    fn runtime_dependencies(&self, entry: &PlanEntry, flags: &InstallFlags) -> Result<Vec<RuntimeDependency>> {
        Ok(self
            .expand(entry.formula.clone(), &entry.options, flags, ExpandMode::RUNTIME)?
            .runtime_dependencies())
    }

    fn write_tab(
        &self,
        entry: &PlanEntry,
        keg: &Path,
        runtime: Vec<RuntimeDependency>,
        poured: bool,
        role: Role,
        flags: &InstallFlags,
    ) -> Result<()> {
        let declared = entry.formula.declared_options();
        let options = BuildOptions::new(&entry.options, &declared);

        let tab = Tab::create(
            &entry.formula,
            options.used_options(),
            options.unused_options(),
            runtime,
            InstallKind {
                poured_from_bottle: poured,
                built_as_bottle: role == Role::Root && flags.build_bottle,
                installed_on_request: role == Role::Root,
            },
        );
        tab.write(keg)?;
        Ok(())
    }

    fn linked_conflicts(&self, formula: &Formula) -> Vec<ConflictingFormula> {
        formula
            .conflicts_with
            .iter()
            .filter(|c| {
                let short = c.name.rsplit('/').next().unwrap_or(&c.name);
                cellar::is_linked(&self.config, short)
            })
            .map(|c| ConflictingFormula {
                name: c.name.clone(),
                reason: c.reason.clone(),
            })
            .collect()
    }

    /// Installed runtime dependencies must be linked, or builds and dependents
    /// would not find them.
    fn check_dependencies_linked(&self, formula: &Formula, runtime: &[PlanEntry]) -> Result<()> {
        let unlinked: Vec<String> = runtime
            .iter()
            .map(|e| &e.formula)
            .filter(|dep| !dep.is_keg_only())
            .filter(|dep| {
                cellar::installed_versions(&self.config, &dep.name)
                    .map(|versions| !versions.is_empty())
                    .unwrap_or(false)
            })
            .filter(|dep| !cellar::is_linked(&self.config, &dep.name))
            .map(|dep| dep.name.clone())
            .collect();

        if unlinked.is_empty() {
            return Ok(());
        }
        Err(TaproomError::CannotInstall {
            name: formula.name.clone(),
            reason: format!(
                "these dependencies are installed but not linked: {}\nRun `taproom link {}` to link them",
                unlinked.join(", "),
                unlinked.join(" ")
            ),
        })
    }

    fn check_interrupt(&self, formula: &str) -> Result<()> {
        if self.interrupt.is_triggered() {
            return Err(TaproomError::Interrupted {
                formula: formula.to_string(),
            });
        }
        Ok(())
    }

    /// Run `step` unless the run is interrupted first.
    async fn interruptible<T>(&self, formula: &str, step: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.interrupt.wait() => Err(TaproomError::Interrupted {
                formula: formula.to_string(),
            }),
            result = step => result,
        }
    }

    /// Lock names not already held in this run.
    fn lock(&mut self, names: &[String]) -> Result<()> {
        let wanted: Vec<&String> = names
            .iter()
            .filter(|n| !self.state.locked.contains(n.as_str()))
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }
        let group = LockGroup::acquire(&self.config, &wanted)?;
        self.state
            .locked
            .extend(group.names().map(String::from));
        self.state.held.push(group);
        Ok(())
    }

    /// Unlink whatever version is linked and move an existing keg at the target
    /// version to `<keg>.tmp`.
    fn set_aside(&self, formula: &Formula) -> Result<Aside> {
        let view = FormulaView::new(formula, &self.config);
        let prefix = view.prefix();

        let linked = cellar::linked_keg(&self.config, &formula.name).map(Keg::new);
        if let Some(keg) = &linked {
            keg.unlink(&self.config)?;
        }

        let moved = if prefix.is_dir() {
            let tmp = PathBuf::from(format!("{}.tmp", prefix.display()));
            if tmp.exists() {
                fs::remove_dir_all(&tmp)
                    .with_context(|| format!("Failed to remove stale {}", tmp.display()))?;
            }
            fs::rename(&prefix, &tmp)
                .with_context(|| format!("Failed to move {} aside", prefix.display()))?;
            Some(tmp)
        } else {
            None
        };

        Ok(Aside {
            prefix,
            moved,
            linked,
        })
    }

    fn finish_aside(&self, aside: Aside) {
        if let Some(tmp) = aside.moved
            && let Err(err) = fs::remove_dir_all(&tmp)
        {
            warn!("Failed to remove {}: {}", tmp.display(), err);
        }
    }

    /// Put the previous keg and link back after a failed reinstall.
    fn restore_aside(&self, aside: Aside) {
        if let Some(tmp) = &aside.moved {
            if aside.prefix.exists()
                && let Err(err) = fs::remove_dir_all(&aside.prefix)
            {
                warn!("Failed to remove {}: {}", aside.prefix.display(), err);
            }
            if let Err(err) = fs::rename(tmp, &aside.prefix) {
                ui::onoe(&format!("Failed to restore {}: {}", aside.prefix.display(), err));
                return;
            }
        }
        if let Some(keg) = aside.linked
            && let Err(err) = keg.link(&self.config, LinkMode::default())
        {
            ui::onoe(&format!("Failed to relink {} {}: {}", keg.name(), keg.version(), err));
        }
    }

    /// Reinstall an outdated formula with the options it was installed with.
    /// The old keg stays in the Cellar and is relinked if the upgrade fails.
    pub async fn upgrade(&mut self, name: &str, flags: &InstallFlags) -> Result<UpgradeOutcome> {
        let result = self.upgrade_formula(name, flags).await;
        self.state.release_locks();
        result
    }

    async fn upgrade_formula(&mut self, name: &str, flags: &InstallFlags) -> Result<UpgradeOutcome> {
        let formula = self.formulary.load(name)?;
        let installed = cellar::installed_versions(&self.config, &formula.name)?;
        let Some(newest) = installed.first() else {
            return Err(TaproomError::NoSuchKeg(formula.name.clone()));
        };

        let target = formula.pkg_version();
        if compare_versions(&newest.version, &target) != Ordering::Less && !flags.force {
            return Ok(UpgradeOutcome::UpToDate {
                version: newest.version.clone(),
            });
        }

        let old = cellar::linked_keg(&self.config, &formula.name)
            .or_else(|| cellar::opt_keg(&self.config, &formula.name))
            .map(Keg::new)
            .unwrap_or_else(|| Keg::new(&newest.path));
        let options = Tab::for_keg(old.path()).used_options;

        let was_linked = old.is_linked(&self.config);
        if was_linked {
            old.unlink(&self.config)?;
        }

        let flags = InstallFlags {
            force: false,
            ..flags.clone()
        };
        match self.install_requested(&formula.name, &options, &flags).await {
            Ok(outcome) => Ok(UpgradeOutcome::Upgraded {
                from: old.version().to_string(),
                to: target,
                outcome,
            }),
            Err(err) => {
                if was_linked && !cellar::is_linked(&self.config, &formula.name) {
                    if let Err(link_err) = old.link(&self.config, LinkMode::default()) {
                        ui::onoe(&format!(
                            "Failed to relink {} {}: {}",
                            old.name(),
                            old.version(),
                            link_err
                        ));
                    }
                }
                Err(err)
            }
        }
    }

    /// Installed formulae whose definition has a newer version.
    pub fn outdated(&self) -> Result<Vec<(String, String, String)>> {
        let mut outdated = Vec::new();
        let mut seen = HashSet::new();
        for package in cellar::list_installed(&self.config)? {
            if !seen.insert(package.name.clone()) {
                continue;
            }
            let Ok(formula) = self.formulary.load(&package.name) else {
                continue;
            };
            let newest = cellar::installed_versions(&self.config, &package.name)?
                .into_iter()
                .next()
                .map(|p| p.version)
                .unwrap_or(package.version);
            let current = formula.pkg_version();
            if compare_versions(&newest, &current) == Ordering::Less {
                outdated.push((package.name, newest, current));
            }
        }
        Ok(outdated)
    }

    /// Remove the active keg of `name`, or every version with `force`.
    pub fn uninstall(&mut self, name: &str, force: bool) -> Result<UninstallReport> {
        let name = name.rsplit('/').next().unwrap_or(name);
        let versions = cellar::installed_versions(&self.config, name)?;
        if versions.is_empty() {
            return Err(TaproomError::NoSuchKeg(name.to_string()));
        }

        if !force {
            let dependents = cellar::dependents(&self.config, name)?;
            if !dependents.is_empty() {
                return Err(TaproomError::HasDependents {
                    name: name.to_string(),
                    dependents,
                });
            }
        }

        let _lock = FormulaLock::acquire(&self.config, name)?;

        let targets: Vec<PathBuf> = if force {
            versions.iter().map(|v| v.path.clone()).collect()
        } else {
            let active = cellar::linked_keg(&self.config, name)
                .or_else(|| cellar::opt_keg(&self.config, name))
                .unwrap_or_else(|| versions[0].path.clone());
            vec![active]
        };

        let mut report = UninstallReport::default();
        for path in targets {
            Keg::new(&path).uninstall(&self.config)?;
            report.removed.push(path);
        }
        report.remaining = cellar::installed_versions(&self.config, name)?
            .into_iter()
            .map(|v| v.version)
            .collect();
        Ok(report)
    }
}

/// Remove libtool archives and empty directories left by a source build.
pub fn clean_keg(keg: &Path) -> anyhow::Result<usize> {
    let mut removed = 0;

    let lib = keg.join("lib");
    if lib.is_dir() {
        for entry in WalkDir::new(&lib) {
            let entry = entry?;
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "la") {
                fs::remove_file(entry.path())
                    .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
                removed += 1;
            }
        }
    }

    for entry in WalkDir::new(keg).min_depth(1).contents_first(true) {
        let entry = entry?;
        if entry.file_type().is_dir()
            && fs::read_dir(entry.path())?.next().is_none()
        {
            fs::remove_dir(entry.path())
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
            removed += 1;
        }
    }

    Ok(removed)
}
