use crate::bottle::{BottleSource, Decision, Role};
use crate::cellar;
use crate::config::Config;
use crate::error::{Result, TaproomError};
use crate::formula::Formula;
use crate::formulary::Formulary;
use crate::install::{InstallFlags, InstallOutcome, Installer, UpgradeOutcome};
use crate::keg::{Keg, LinkMode};
use crate::options::Options;
use crate::ui::{self, plural};
use colored::Colorize;
use std::sync::Arc;

pub async fn install(
    installer: &mut Installer,
    names: &[String],
    options: &Options,
    flags: &InstallFlags,
) -> Result<()> {
    if flags.dry_run {
        println!("Dry run mode - no formulae will be installed");
    }

    let mut failed = Vec::new();
    for name in names {
        match installer.install(name, options, flags).await {
            Ok(outcome) => report_install(name, outcome),
            Err(err) if err.is_interrupt() => return Err(err),
            Err(err) => {
                report_failure(name, &err);
                failed.push(name.clone());
            }
        }
    }

    finish("install", &failed)
}

fn report_install(name: &str, outcome: InstallOutcome) {
    match outcome {
        InstallOutcome::Installed {
            keg,
            poured,
            dependencies,
            caveats,
        } => {
            let how = if poured { "poured from bottle" } else { "built from source" };
            println!(
                "{} {} {} ({})",
                "✓".green(),
                name.bold(),
                keg.file_name().unwrap_or_default().to_string_lossy().dimmed(),
                how
            );
            if !dependencies.is_empty() {
                println!(
                    "  {} with {}: {}",
                    "└".dimmed(),
                    plural(dependencies.len(), "dependency"),
                    dependencies.join(", ")
                );
            }
            if let Some(caveats) = caveats {
                ui::ohai("Caveats");
                println!("{}", caveats);
            }
        }
        InstallOutcome::AlreadyInstalled { version, linked } => {
            ui::opoo(&format!("{} {} is already installed and up-to-date.", name, version));
            if !linked {
                println!("To link this version, run:\n  taproom link {}", name);
            } else {
                println!("To reinstall {}, run:\n  taproom install --force {}", version, name);
            }
        }
        InstallOutcome::Skipped => {}
        InstallOutcome::DependenciesOnly { dependencies } => {
            if dependencies.is_empty() {
                println!("{} All dependencies of {} are installed", "✓".green(), name.bold());
            } else {
                println!(
                    "{} Installed {} of {}: {}",
                    "✓".green(),
                    plural(dependencies.len(), "dependency"),
                    name.bold(),
                    dependencies.join(", ")
                );
            }
        }
        InstallOutcome::Planned(plan) => {
            ui::ohai(&format!("Would install {}", plural(plan.entries.len(), "formula")));
            let count = plan.entries.len();
            for (i, entry) in plan.entries.iter().enumerate() {
                ui::step(i + 1 == count, &describe_entry(&entry.formula, &entry.options));
            }
        }
    }
}

fn report_failure(name: &str, err: &TaproomError) {
    ui::onoe(&format!("{}: {}", name, err));
    match err {
        TaproomError::Build { failure, .. } => {
            for (key, value) in &failure.fields {
                println!("  {} {}: {}", "├".dimmed(), key, value);
            }
        }
        TaproomError::LinkConflict { keg, .. } => {
            println!(
                "The link step did not complete successfully.\nThe formula built, but is not symlinked into the prefix.\n\
                 To force the link and overwrite all conflicting files:\n  taproom link --overwrite {}",
                keg.split_whitespace().next().unwrap_or(name)
            );
        }
        _ => {}
    }
}

fn finish(action: &str, failed: &[String]) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "Failed to {} {}: {}",
        action,
        plural(failed.len(), "formula"),
        failed.join(", ")
    )
    .into())
}

fn describe_entry(formula: &Formula, options: &Options) -> String {
    if options.is_empty() {
        format!("{} {}", formula.name.bold(), formula.pkg_version())
    } else {
        format!("{} {} {}", formula.name.bold(), formula.pkg_version(), options.to_string().cyan())
    }
}

pub async fn upgrade(installer: &mut Installer, names: &[String], flags: &InstallFlags) -> Result<()> {
    let names: Vec<String> = if names.is_empty() {
        let outdated = installer.outdated()?;
        if outdated.is_empty() {
            println!("{} All formulae are up to date", "✓".green());
            return Ok(());
        }
        ui::ohai(&format!("Upgrading {}", plural(outdated.len(), "outdated formula")));
        for (name, from, to) in &outdated {
            println!("  {} {} -> {}", name.bold(), from.dimmed(), to.green());
        }
        outdated.into_iter().map(|(name, _, _)| name).collect()
    } else {
        names.to_vec()
    };

    let mut failed = Vec::new();
    for name in &names {
        match installer.upgrade(name, flags).await {
            Ok(UpgradeOutcome::Upgraded { from, to, outcome }) => {
                println!("{} {} {} -> {}", "✓".green(), name.bold(), from.dimmed(), to.green());
                if let InstallOutcome::Installed {
                    caveats: Some(caveats),
                    ..
                } = outcome
                {
                    ui::ohai("Caveats");
                    println!("{}", caveats);
                }
            }
            Ok(UpgradeOutcome::UpToDate { version }) => {
                ui::opoo(&format!("{} {} already installed", name, version));
            }
            Err(err) if err.is_interrupt() => return Err(err),
            Err(err) => {
                report_failure(name, &err);
                failed.push(name.clone());
            }
        }
    }

    finish("upgrade", &failed)
}

pub fn uninstall(installer: &mut Installer, names: &[String], force: bool) -> Result<()> {
    let mut failed = Vec::new();
    for name in names {
        match installer.uninstall(name, force) {
            Ok(report) => {
                for keg in &report.removed {
                    println!("{} Uninstalled {}", "✓".green(), keg.display().to_string().bold());
                }
                if !report.remaining.is_empty() {
                    println!(
                        "{} {} is still installed.\nTo remove all versions, run:\n  taproom uninstall --force {}",
                        name,
                        report.remaining.join(", "),
                        name
                    );
                }
            }
            Err(err) => {
                report_failure(name, &err);
                failed.push(name.clone());
            }
        }
    }

    finish("uninstall", &failed)
}

/// The keg `link`/`unlink` act on: the opt target, else the newest version.
fn current_keg(config: &Config, name: &str) -> Result<Keg> {
    if let Some(path) = cellar::opt_keg(config, name) {
        return Ok(Keg::new(path));
    }
    cellar::installed_versions(config, name)?
        .into_iter()
        .next()
        .map(|pkg| Keg::new(pkg.path))
        .ok_or_else(|| TaproomError::NoSuchKeg(name.to_string()))
}

pub fn link(
    config: &Config,
    formulary: &Formulary,
    names: &[String],
    mode: LinkMode,
    force: bool,
) -> Result<()> {
    let mut failed = Vec::new();

    for name in names {
        let short = name.rsplit('/').next().unwrap_or(name);
        let keg = match current_keg(config, short) {
            Ok(keg) => keg,
            Err(err) => {
                report_failure(name, &err);
                failed.push(name.clone());
                continue;
            }
        };

        if keg.is_linked(config) {
            ui::opoo(&format!("Already linked: {}", keg.path().display()));
            continue;
        }

        let keg_only = formulary.load(short).map(|f| f.is_keg_only()).unwrap_or(false);
        if keg_only && !force {
            if !mode.dry_run {
                keg.optlink(config)?;
            }
            ui::opoo(&format!(
                "{} is keg-only and must be linked with `--force`.",
                short
            ));
            continue;
        }

        match keg.link(config, mode) {
            Ok(report) if mode.dry_run => {
                let verb = if mode.overwrite { "overwritten" } else { "deleted" };
                if !report.overwritten.is_empty() {
                    println!("Would remove (the files would be {}):", verb);
                    for path in &report.overwritten {
                        println!("  {}", path.display());
                    }
                }
                if !report.conflicts.is_empty() {
                    println!("Conflicting files:");
                    for conflict in &report.conflicts {
                        println!("  {}", conflict.path.display());
                    }
                }
                println!("Would link:");
                for path in &report.linked {
                    println!("  {}", path.display());
                }
            }
            Ok(report) => {
                println!(
                    "{} Linking {} {}... {} created",
                    "✓".green(),
                    keg.name().bold(),
                    keg.version(),
                    plural(report.linked.len(), "symlink")
                );
            }
            Err(err) => {
                report_failure(name, &err);
                failed.push(name.clone());
            }
        }
    }

    finish("link", &failed)
}

pub fn unlink(config: &Config, names: &[String]) -> Result<()> {
    let mut failed = Vec::new();

    for name in names {
        let short = name.rsplit('/').next().unwrap_or(name);
        let versions = match cellar::installed_versions(config, short) {
            Ok(versions) if !versions.is_empty() => versions,
            Ok(_) => {
                report_failure(name, &TaproomError::NoSuchKeg(short.to_string()));
                failed.push(name.clone());
                continue;
            }
            Err(err) => {
                report_failure(name, &TaproomError::from(err));
                failed.push(name.clone());
                continue;
            }
        };

        let mut removed = 0;
        for version in versions {
            match Keg::new(&version.path).unlink(config) {
                Ok(count) => removed += count,
                Err(err) => {
                    report_failure(name, &err);
                    failed.push(name.clone());
                }
            }
        }
        println!(
            "{} Unlinking {}... {} removed",
            "✓".green(),
            short.bold(),
            plural(removed, "symlink")
        );
    }

    finish("unlink", &failed)
}

/// Print the install plan, marking what would be poured and what built.
pub fn deps(installer: &Installer, name: &str, options: &Options, flags: &InstallFlags) -> Result<()> {
    let formula = installer.formulary().load(name)?;
    let plan = installer.plan(formula.clone(), options, flags)?;

    ui::ohai(&format!("Install plan for {}", formula.name));
    let count = plan.entries.len();
    for (i, entry) in plan.entries.iter().enumerate() {
        let role = if entry.formula.name == formula.name {
            Role::Root
        } else {
            Role::Dependency
        };
        let how = match installer.decide(&entry.formula, &entry.options, role, flags) {
            Decision::Pour(_) => "bottle".green(),
            Decision::Build(_) => "source".yellow(),
        };
        ui::step(
            i + 1 == count,
            &format!("{} ({})", describe_entry(&entry.formula, &entry.options), how),
        );
    }
    for unmet in &plan.warnings {
        ui::opoo(&format!("{}: {}", unmet.dependent, unmet.message));
    }
    Ok(())
}

pub fn options(formulary: &Formulary, names: &[String]) -> Result<()> {
    for (i, name) in names.iter().enumerate() {
        let formula = formulary.load(name)?;
        if names.len() > 1 {
            if i > 0 {
                println!();
            }
            println!("{}", formula.full_name().bold());
        }
        let descriptions = formula.option_descriptions();
        if descriptions.is_empty() {
            println!("No options");
            continue;
        }
        for (option, description) in descriptions {
            println!("{}\n\t{}", option, description);
        }
    }
    Ok(())
}

/// Download bottles, or sources for formulae that would be built, in parallel.
pub async fn fetch(installer: &Installer, names: &[String], flags: &InstallFlags) -> Result<()> {
    let mut failed = Vec::new();
    let mut formulae: Vec<Arc<Formula>> = Vec::new();
    for name in names {
        match installer.formulary().load(name) {
            Ok(formula) => formulae.push(formula),
            Err(err) => {
                report_failure(name, &err);
                failed.push(name.clone());
            }
        }
    }

    let options = Options::new();
    let downloads = formulae.iter().map(|formula| {
        let decision = installer.decide(formula, &options, Role::Root, flags);
        let downloader = installer.downloader();
        async move {
            let path = match decision {
                Decision::Pour(BottleSource::Cached(path)) => Some(path),
                Decision::Pour(BottleSource::Remote { tag, file }) => {
                    Some(downloader.fetch_bottle(formula, &tag, &file).await?)
                }
                Decision::Build(_) => downloader.fetch_source(formula).await?,
            };
            Ok::<_, TaproomError>((formula.name.clone(), path))
        }
    });

    for (formula, result) in formulae.iter().zip(futures::future::join_all(downloads).await) {
        match result {
            Ok((name, Some(path))) => println!("{} {}: {}", "✓".green(), name.bold(), path.display()),
            Ok((name, None)) => ui::opoo(&format!("{} has nothing to download", name)),
            Err(err) => {
                report_failure(&formula.name, &err);
                failed.push(formula.name.clone());
            }
        }
    }

    finish("fetch", &failed)
}
