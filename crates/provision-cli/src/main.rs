mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, service::ServiceSubcommand, Overrides};
use provision_core::environment::Platform;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "provision",
    about = "Idempotent single-host stack provisioning: check, apply, verify, log",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .provision/ or .git/)
    #[arg(long, global = true, env = "PROVISION_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Override an environment variable (repeatable)
    #[arg(long = "var", global = true, value_name = "KEY=VALUE", value_parser = cmd::parse_var)]
    vars: Vec<(String, String)>,

    /// Target platform: linux, windows or macos (default: from config)
    #[arg(long, global = true, value_parser = cmd::parse_platform)]
    platform: Option<Platform>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .provision/ with a default plan for the target platform
    Init,

    /// Apply the plan: skip satisfied steps, run the rest, verify services
    Run {
        /// Outcomes to show in the failure report
        #[arg(long, default_value = "5")]
        tail: usize,
    },

    /// Report which steps are pending and which services are healthy, without changing anything
    #[command(alias = "status")]
    Check {
        /// Exit non-zero when anything is pending or unhealthy
        #[arg(long)]
        strict: bool,
    },

    /// Show a deployment log (latest run by default)
    Log {
        /// Run id to show
        #[arg(long)]
        run: Option<String>,

        /// Only failed outcomes
        #[arg(long)]
        failed: bool,

        /// Only the last N outcomes
        #[arg(long)]
        tail: Option<usize>,

        /// List recorded runs instead
        #[arg(long, conflicts_with_all = ["run", "failed", "tail"])]
        list: bool,
    },

    /// Control a single service directly
    Service {
        #[command(subcommand)]
        subcommand: ServiceSubcommand,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Service { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let overrides = Overrides {
        vars: cli.vars,
        platform: cli.platform,
    };

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, overrides.platform),
        Commands::Run { tail } => cmd::run::run(&root, &overrides, tail, cli.json),
        Commands::Check { strict } => cmd::check::run(&root, &overrides, strict, cli.json),
        Commands::Log {
            run,
            failed,
            tail,
            list,
        } => {
            let query = cmd::log::LogQuery {
                run,
                failed,
                tail,
                list,
            };
            cmd::log::run(&root, &overrides, query, cli.json)
        }
        Commands::Service { subcommand } => {
            cmd::service::run(&root, &overrides, subcommand, cli.json)
        }
        Commands::Config { subcommand } => {
            cmd::config::run(&root, &overrides, subcommand, cli.json)
        }
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
