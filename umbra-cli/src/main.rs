// umbra-cli: CLI entry point for the build-time weaver (weave, check, clean).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use umbra_weaver::{ModuleOutcome, UmbraConfig, WeaveError, WeaveOptions, WeaveReport};

#[derive(Parser)]
#[command(name = "umbra", about = "umbra CLI: weave reflected script modules")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Weave every configured module (or one) into its output directory.
    Weave {
        /// Path to umbra.config.toml.
        #[arg(long, default_value = "umbra.config.toml")]
        config: PathBuf,
        /// Weave only this module; its dependencies must already have manifests.
        #[arg(long)]
        module: Option<String>,
        /// Ignore the incremental cache.
        #[arg(long)]
        force: bool,
    },
    /// Validate reflected declarations without writing anything.
    Check {
        /// Path to umbra.config.toml.
        #[arg(long, default_value = "umbra.config.toml")]
        config: PathBuf,
        #[arg(long)]
        module: Option<String>,
    },
    /// Delete manifests and the incremental cache.
    Clean {
        /// Path to umbra.config.toml.
        #[arg(long, default_value = "umbra.config.toml")]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Weave { config, module, force } => load(&config).and_then(|config| {
            let options = WeaveOptions { only: module, force };
            umbra_weaver::weave(&config, &options).and_then(finish)
        }),
        Commands::Check { config, module } => {
            load(&config).and_then(|config| umbra_weaver::check(&config, module.as_deref()).and_then(finish))
        }
        Commands::Clean { config } => load(&config).and_then(|config| umbra_weaver::clean(&config).map(|_| ())),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load(path: &Path) -> Result<UmbraConfig, WeaveError> {
    UmbraConfig::load(path)
}

/// Summarise a report; any failed module fails the command.
fn finish(report: WeaveReport) -> Result<(), WeaveError> {
    let (mut woven, mut fresh, mut checked) = (0, 0, 0);
    for (module, outcome) in &report.modules {
        match outcome {
            ModuleOutcome::Woven { .. } => woven += 1,
            ModuleOutcome::UpToDate => fresh += 1,
            ModuleOutcome::Checked { .. } => checked += 1,
            ModuleOutcome::Failed(e) => log::debug!("{module}: {e:?}"),
        }
    }
    log::info!(
        "{} modules: {woven} woven, {fresh} up to date, {checked} checked, {} failed",
        report.modules.len(),
        report.failed()
    );
    report.into_result().map(|_| ())
}
