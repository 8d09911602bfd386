use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use indicatif::MultiProgress;
use std::path::PathBuf;
use std::process::ExitCode;
use taproom::config::Config;
use taproom::download::Downloader;
use taproom::install::{InstallFlags, Installer};
use taproom::interrupt::Interrupt;
use taproom::keg::LinkMode;
use taproom::options::Options;
use taproom::{commands, platform, ui, worker};

#[derive(Parser)]
#[command(name = "taproom")]
#[command(author, version, about = "Install Homebrew-style formulae from bottles or source", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Installation prefix (defaults to TAPROOM_PREFIX or the platform default)
    #[arg(long, global = true, value_name = "PATH")]
    prefix: Option<PathBuf>,
}

#[derive(clap::Args, Clone, Default)]
struct BuildArgs {
    /// Build from source even if a bottle is available
    #[arg(short = 's', long)]
    build_from_source: bool,

    /// Install from a bottle even with non-default options
    #[arg(long, conflicts_with = "build_from_source")]
    force_bottle: bool,

    /// Enable an optional feature (adds --with-<NAME>)
    #[arg(long = "with", value_name = "NAME")]
    with: Vec<String>,

    /// Disable a recommended feature (adds --without-<NAME>)
    #[arg(long = "without", value_name = "NAME")]
    without: Vec<String>,

    /// Pass a raw build option such as --option universal
    #[arg(long = "option", value_name = "OPTION")]
    option: Vec<String>,
}

impl BuildArgs {
    fn options(&self) -> Options {
        let mut options = Options::new();
        for name in &self.with {
            options.insert(&format!("with-{}", name));
        }
        for name in &self.without {
            options.insert(&format!("without-{}", name));
        }
        for raw in &self.option {
            options.insert(raw);
        }
        options
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Install formulae and their dependencies
    Install {
        /// Formula names
        #[arg(required = true)]
        formulae: Vec<String>,

        #[command(flatten)]
        build: BuildArgs,

        /// Do not install dependencies
        #[arg(long)]
        ignore_dependencies: bool,

        /// Install the dependencies but not the formulae themselves
        #[arg(long, conflicts_with = "ignore_dependencies")]
        only_dependencies: bool,

        /// Reinstall even if installed, and ignore conflicts
        #[arg(short, long)]
        force: bool,

        /// Prepare the build for bottling
        #[arg(long)]
        build_bottle: bool,

        /// Open a shell in the unpacked source instead of running the build
        #[arg(short, long)]
        interactive: bool,

        /// Keep going with more detail when a build fails
        #[arg(short, long)]
        debug: bool,

        /// Show what would be installed without installing
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Upgrade outdated formulae
    Upgrade {
        /// Formula names (or all outdated if empty)
        formulae: Vec<String>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Uninstall formulae
    #[command(alias = "remove", alias = "rm")]
    Uninstall {
        /// Formula names
        #[arg(required = true)]
        formulae: Vec<String>,

        /// Remove every installed version and ignore dependents
        #[arg(short, long)]
        force: bool,
    },

    /// Symlink a formula's installed files into the prefix
    #[command(alias = "ln")]
    Link {
        /// Formula names
        #[arg(required = true)]
        formulae: Vec<String>,

        /// Delete files that already exist in the prefix while linking
        #[arg(long)]
        overwrite: bool,

        /// List files that would be linked or deleted
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Allow keg-only formulae to be linked
        #[arg(short, long)]
        force: bool,
    },

    /// Remove a formula's symlinks from the prefix
    Unlink {
        /// Formula names
        #[arg(required = true)]
        formulae: Vec<String>,
    },

    /// Show the install plan for a formula
    Deps {
        /// Formula name
        formula: String,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Show the build options a formula accepts
    Options {
        /// Formula names
        #[arg(required = true)]
        formulae: Vec<String>,
    },

    /// Download bottles or sources without installing
    Fetch {
        /// Formula names
        #[arg(required = true)]
        formulae: Vec<String>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },

    #[command(name = "__build", hide = true)]
    Build {
        #[arg(long)]
        request: PathBuf,

        #[arg(long)]
        outcome: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "taproom=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
    ui::init_colors();

    if let Commands::Build { request, outcome } = &cli.command {
        let code = worker::run(request, outcome).await;
        return ExitCode::from(code.clamp(0, 255) as u8);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_interrupt() => {
            eprintln!();
            ui::onoe(&err.to_string());
            ExitCode::from(130)
        }
        Err(err) => {
            ui::onoe(&err.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> taproom::Result<()> {
    let mut config = Config::from_env();
    if let Some(prefix) = &cli.prefix {
        config = config.with_prefix(prefix);
    }

    let installer = || -> taproom::Result<Installer> {
        let tag = platform::bottle_tag()?;
        let downloader = Downloader::new(config.cache.clone()).with_progress(MultiProgress::new());
        Ok(Installer::new(config.clone(), tag).with_downloader(downloader))
    };
    // Commands that change the Cellar roll back on Ctrl-C instead of dying mid-way.
    let interruptible = || -> taproom::Result<Installer> {
        let interrupt = Interrupt::new();
        interrupt.listen();
        Ok(installer()?.with_interrupt(interrupt))
    };

    match cli.command {
        Commands::Install {
            formulae,
            build,
            ignore_dependencies,
            only_dependencies,
            force,
            build_bottle,
            interactive,
            debug,
            dry_run,
        } => {
            let flags = InstallFlags {
                build_from_source: build.build_from_source,
                force_bottle: build.force_bottle,
                ignore_dependencies,
                only_dependencies,
                force,
                build_bottle,
                interactive,
                debug,
                verbose: cli.verbose,
                dry_run,
            };
            // Ctrl-C inside an interactive build shell belongs to the shell.
            let mut installer = if interactive { installer()? } else { interruptible()? };
            commands::install(&mut installer, &formulae, &build.options(), &flags).await
        }
        Commands::Upgrade { formulae, build } => {
            let flags = InstallFlags {
                build_from_source: build.build_from_source,
                force_bottle: build.force_bottle,
                verbose: cli.verbose,
                ..Default::default()
            };
            commands::upgrade(&mut interruptible()?, &formulae, &flags).await
        }
        Commands::Uninstall { formulae, force } => {
            commands::uninstall(&mut installer()?, &formulae, force)
        }
        Commands::Link {
            formulae,
            overwrite,
            dry_run,
            force,
        } => {
            let installer = installer()?;
            commands::link(
                &config,
                installer.formulary(),
                &formulae,
                LinkMode { overwrite, dry_run },
                force,
            )
        }
        Commands::Unlink { formulae } => commands::unlink(&config, &formulae),
        Commands::Deps { formula, build } => {
            let flags = InstallFlags {
                build_from_source: build.build_from_source,
                force_bottle: build.force_bottle,
                ..Default::default()
            };
            commands::deps(&installer()?, &formula, &build.options(), &flags)
        }
        Commands::Options { formulae } => commands::options(installer()?.formulary(), &formulae),
        Commands::Fetch { formulae, build } => {
            let flags = InstallFlags {
                build_from_source: build.build_from_source,
                force_bottle: build.force_bottle,
                ..Default::default()
            };
            commands::fetch(&installer()?, &formulae, &flags).await
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "taproom", &mut std::io::stdout());
            Ok(())
        }
        Commands::Build { .. } => Ok(()),
    }
}
