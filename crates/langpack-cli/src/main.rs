//! langpacks - build and publish Ubuntu language packs
//!
//! ## Commands
//!
//! - `install`: install build dependencies, clone and build langpack-o-matic
//! - `update-checkout`: pull langpack-o-matic and rebuild its tools
//! - `build`: build the language pack sources for a series
//! - `upload`: upload the built source packages
//! - `schedule`: enable or disable the periodic builds
//! - `import-key`: import the signing key for uploads
//! - `series`: show the active and development series

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use langpack_core::{
    init_tracing, upload, BuildOutcome, BuildRequest, BuildVariant, EnvironmentBootstrap,
    LangpackBuilder, LangpackConfig, LaunchpadCatalog, LogFormat, ProcessRunner, ReleaseCatalog,
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "langpacks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ubuntu language pack builder", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines on stderr
    #[arg(long, global = true)]
    json: bool,

    /// Service account owning the checkout and build trees
    #[arg(long, global = true, env = "LANGPACK_USER")]
    user: Option<String>,

    /// Home directory of the service account
    #[arg(long, global = true, env = "LANGPACK_HOME")]
    home: Option<PathBuf>,

    /// Run service-account commands directly instead of via sudo
    #[arg(long, global = true)]
    no_elevate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install build dependencies and set up the langpack-o-matic checkout
    Install {
        /// Also install the crontab
        #[arg(long)]
        schedule: bool,
    },

    /// Pull langpack-o-matic and rebuild its helper tools
    UpdateCheckout,

    /// Build language pack sources for a series
    Build {
        /// Series name, or `devel` for the current development series
        release: String,

        /// Build the -updates packs instead of the base packs
        #[arg(long)]
        updates: bool,
    },

    /// Upload the built source packages
    Upload,

    /// Manage the periodic build schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Import the upload signing key (`-` reads from stdin)
    ImportKey {
        /// Path to the key file
        key: PathBuf,
    },

    /// Show active and development series
    Series,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Install the crontab
    Enable,
    /// Remove the crontab
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(LogFormat::from_json_flag(cli.json), level);

    let config = load_config(&cli)?;
    let runner = ProcessRunner::new();

    match cli.command {
        Commands::Install { schedule } => cmd_install(&config, &runner, schedule).await,
        Commands::UpdateCheckout => cmd_update_checkout(&config, &runner).await,
        Commands::Build { release, updates } => cmd_build(&config, &runner, &release, updates).await,
        Commands::Upload => cmd_upload(&config, &runner).await,
        Commands::Schedule { action } => cmd_schedule(&config, &runner, action).await,
        Commands::ImportKey { key } => cmd_import_key(&config, &runner, &key).await,
        Commands::Series => cmd_series(&config).await,
    }
}

fn load_config(cli: &Cli) -> Result<LangpackConfig> {
    let mut config = LangpackConfig::from_env().context("Failed to load configuration")?;
    if let Some(user) = &cli.user {
        config = config
            .with_service_user(user)
            .with_context(|| format!("Failed to resolve home of {user}"))?;
    }
    if let Some(home) = &cli.home {
        config = config.with_home(home);
    }
    if cli.no_elevate {
        config = config.with_elevation(false);
    }
    Ok(config)
}

async fn cmd_install(config: &LangpackConfig, runner: &ProcessRunner, schedule: bool) -> Result<()> {
    let bootstrap = EnvironmentBootstrap::new(config, runner);
    bootstrap
        .install_dependencies()
        .await
        .context("Failed to install build dependencies")?;
    bootstrap
        .clone_repository()
        .await
        .context("Failed to clone langpack-o-matic")?;
    bootstrap
        .pull_and_rebuild_tools()
        .await
        .context("Failed to build langpack-o-matic tools")?;
    if schedule {
        bootstrap
            .register_schedule()
            .await
            .context("Failed to install crontab")?;
    }

    println!("Build host ready: {}", config.checkout().display());
    Ok(())
}

async fn cmd_update_checkout(config: &LangpackConfig, runner: &ProcessRunner) -> Result<()> {
    EnvironmentBootstrap::new(config, runner)
        .pull_and_rebuild_tools()
        .await
        .context("Failed to update langpack-o-matic")?;
    println!("Checkout updated: {}", config.checkout().display());
    Ok(())
}

async fn cmd_build(
    config: &LangpackConfig,
    runner: &ProcessRunner,
    release: &str,
    updates: bool,
) -> Result<()> {
    let catalog = LaunchpadCatalog::from_config(config).context("Failed to set up Launchpad client")?;
    let builder = LangpackBuilder::new(config, runner, &catalog);
    let request = BuildRequest {
        release: release.to_string(),
        variant: BuildVariant::from_base_flag(!updates),
    };

    let outcome = builder
        .build(&request)
        .await
        .with_context(|| format!("Failed to build language packs for {release}"))?;

    match outcome {
        BuildOutcome::Completed(report) => {
            println!("Built language packs for {}", report.release);
            println!("  Archive: {}", report.archive.display());
            println!("  Tree:    {}", report.workspace.root.display());
        }
        BuildOutcome::Aborted(unsupported) => {
            info!("Nothing built: {unsupported}");
        }
        BuildOutcome::Unimplemented(gap) => {
            warn!("Nothing built: {gap}");
        }
    }
    Ok(())
}

async fn cmd_upload(config: &LangpackConfig, runner: &ProcessRunner) -> Result<()> {
    let output = upload(config, runner)
        .await
        .context("Failed to upload language packs")?;

    if !output.output.trim().is_empty() {
        println!("{}", output.output.trim_end());
    }
    Ok(())
}

async fn cmd_schedule(
    config: &LangpackConfig,
    runner: &ProcessRunner,
    action: ScheduleAction,
) -> Result<()> {
    let bootstrap = EnvironmentBootstrap::new(config, runner);
    match action {
        ScheduleAction::Enable => bootstrap
            .register_schedule()
            .await
            .context("Failed to install crontab")?,
        ScheduleAction::Disable => bootstrap
            .deregister_schedule()
            .await
            .context("Failed to remove crontab")?,
    }
    Ok(())
}

async fn cmd_import_key(config: &LangpackConfig, runner: &ProcessRunner, key: &Path) -> Result<()> {
    let material = if key.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read key from stdin")?;
        buf
    } else {
        std::fs::read(key)
            .with_context(|| format!("Failed to read key file {}", key.display()))?
    };

    EnvironmentBootstrap::new(config, runner)
        .import_signing_key(&material)
        .await
        .context("Failed to import signing key")?;
    Ok(())
}

async fn cmd_series(config: &LangpackConfig) -> Result<()> {
    let catalog = LaunchpadCatalog::from_config(config).context("Failed to set up Launchpad client")?;
    let active = catalog
        .active_series()
        .await
        .context("Failed to query active series")?;
    let development = catalog
        .development_series()
        .await
        .context("Failed to query development series")?;

    println!("Distribution: {}", config.distribution);
    println!("Development:  {development}");
    println!("Active:");
    for name in active {
        let marker = if name == development { " (devel)" } else { "" };
        println!("  {name}{marker}");
    }
    Ok(())
}
