use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use volume_reaper::{
    Reconciler,
    config::ReaperConfig,
    observability::{self, metrics},
    start_reconciler_worker,
};

const DEFAULT_CONFIG_PATH: &str = "volume-reaper.toml";

/// CLI arguments for the volume reaper
#[derive(Parser, Debug)]
#[command(version, about = "Delayed deletion of unattached block-storage volumes", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./volume-reaper.toml if it exists,
    /// otherwise built-in defaults are used)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run a single reconciliation pass and print its summary as JSON (default)
    Run,
    /// Run reconciliation passes on the configured interval until interrupted
    Worker,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./volume-reaper.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Show compile-time features and build profile
    Features,
}

fn default_config_toml() -> &'static str {
    r#"# Volume reaper configuration
#
# Unattached volumes are tagged `Delete = true` and tracked on the first pass.
# A later pass deletes them once the grace period has elapsed, unless an
# operator has removed the `Delete` tag or added `DoNotDelete`.

[reconciler]
interval_hours = 24
concurrency = 8
pass_timeout_secs = 900
# Log deletions instead of performing them
dry_run = true
# 0 = unlimited
max_deletes_per_run = 0

[policy]
grace_period_days = 1
truthy_values = ["true", "True", "1"]
updated_by = "Cleanup"

[inventory]
type = "aws"
# region = "ap-south-1"

[tracking]
type = "dynamodb"
table_name = "cleanup"

# Local alternative:
# [tracking]
# type = "file"
# path = "./tracked-volumes"

[notification]
type = "log"

# [notification]
# type = "sns"
# topic_arn = "${CLEANUP_TOPIC_ARN}"

[observability.logging]
level = "info"
format = "compact"

[observability.metrics]
enabled = false
listen = "0.0.0.0:9090"
"#
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => {
            run_init(output, force);
        }
        Some(Command::Features) => {
            run_features();
        }
        Some(Command::Worker) => {
            run_worker(args.config.as_deref()).await;
        }
        Some(Command::Run) | None => {
            run_once(args.config.as_deref()).await;
        }
    }
}

/// Load config and initialize logging, exiting on failure.
fn load_config(explicit_path: Option<&str>) -> ReaperConfig {
    let path = match explicit_path {
        Some(path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()),
    };

    let config = match &path {
        Some(path) => ReaperConfig::from_file(path),
        None => ReaperConfig::from_str(""),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    match &path {
        Some(path) => tracing::info!(path = %path.display(), "Loaded configuration"),
        None => tracing::info!("No config file found, using built-in defaults"),
    }

    config
}

async fn build_reconciler(config: &ReaperConfig) -> Reconciler {
    match Reconciler::from_config(config).await {
        Ok(reconciler) => reconciler,
        Err(e) => {
            tracing::error!(error = %e, "Failed to set up reconciler");
            std::process::exit(1);
        }
    }
}

/// Run one pass and print the summary.
async fn run_once(config_path: Option<&str>) {
    let config = load_config(config_path);
    let reconciler = build_reconciler(&config).await;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = reconciler
        .run_pass_at(chrono::Utc::now(), &shutdown)
        .await;

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize pass summary"),
    }

    if result.aborted {
        std::process::exit(1);
    }
}

/// Run passes until interrupted.
async fn run_worker(config_path: Option<&str>) {
    let config = load_config(config_path);

    if let Err(e) = metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        std::process::exit(1);
    }

    let reconciler = Arc::new(build_reconciler(&config).await);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    start_reconciler_worker(reconciler, shutdown).await;
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, aborting the current pass");
    shutdown.cancel();
}

/// Initialize a new configuration file
fn run_init(output: Option<String>, force: bool) {
    let output_path = PathBuf::from(output.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("The generated config has dry_run enabled. To try a pass, run:");
    println!("  volume-reaper --config {} run", output_path.display());
}

/// Print enabled compile-time features and build profile.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        ("cli", "Execution", cfg!(feature = "cli")),
        ("aws", "Backends", cfg!(feature = "aws")),
        ("redis", "Backends", cfg!(feature = "redis")),
        ("prometheus", "Observability", cfg!(feature = "prometheus")),
    ];

    let profile = if cfg!(feature = "full") {
        "full"
    } else if cfg!(feature = "minimal") {
        "minimal"
    } else {
        "custom"
    };

    println!("volume-reaper v{version}\n");
    println!("Build profile: {profile}");
    match profile {
        "full" => println!("  (full = minimal + aws, redis, prometheus)\n"),
        "minimal" => println!("  (minimal = cli with memory, file, webhook and log backends)\n"),
        _ => println!(),
    }

    println!("Compile-time features:");

    let mut current_group = "";
    for &(name, group, enabled) in features {
        if group != current_group {
            if !current_group.is_empty() {
                println!();
            }
            println!("  {group}:");
            current_group = group;
        }
        let status = if enabled { "enabled" } else { "disabled" };
        println!("    {name:<32} {status}");
    }
}
