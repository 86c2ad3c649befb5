use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use campaign::{replay_design, Campaign, CampaignConfig, CampaignError};

#[derive(Parser)]
#[command(name = "cellcampaign", about = "Autonomous cell-perturbation campaigns")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a campaign.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        seed: u64,
        #[arg(long)]
        run_id: String,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long, default_value = "runs")]
        out: PathBuf,
    },
    /// Replay a persisted design; identical catalogs and seed reproduce
    /// identical artifacts.
    Replay {
        #[arg(long)]
        design: PathBuf,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value = "replays")]
        out: PathBuf,
    },
    /// Validate a design and exit.
    Validate {
        #[arg(long)]
        design: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // The exit code comes off the typed error; anyhow takes over
            // only for top-level reporting.
            let code = err.exit_code().clamp(0, 255) as u8;
            let report: anyhow::Error = err.into();
            tracing::error!(error = format!("{report:#}"), "campaign failed");
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<(), CampaignError> {
    match cli.command {
        Command::Run {
            config,
            seed,
            run_id,
            workers,
            out,
        } => {
            let mut cfg = match config {
                Some(path) => CampaignConfig::from_path(&path)?,
                None => CampaignConfig::default(),
            };
            cfg.workers = workers.max(1);
            let run_root = out.join(&run_id);
            let mut campaign = Campaign::new(cfg, seed, &run_id, &run_root)?;
            let summary = campaign.run()?;
            tracing::info!(
                status = %summary.status,
                reason = %summary.reason,
                last_cycle = summary.last_cycle,
                "campaign finished"
            );
            Ok(())
        }
        Command::Replay { design, seed, out } => replay_design(&design, seed, &out),
        Command::Validate { design } => {
            let loaded = design_bridge::load_design(&design)?;
            let catalog = bvm_core::Catalog::reference_library();
            let registry = design_bridge::ScaffoldRegistry::with_frozen(
                &design_bridge::Scaffold::reference(),
            );
            match design_bridge::validate(
                &loaded,
                &catalog,
                &registry,
                design_bridge::ValidatorMode::Full,
            ) {
                Ok(()) => {
                    println!("design {} valid", loaded.design_id);
                    Ok(())
                }
                Err(err) => {
                    eprintln!("invalid design: {err}");
                    Err(CampaignError::Bridge(design_bridge::BridgeError::Invalid(
                        err,
                    )))
                }
            }
        }
    }
}
