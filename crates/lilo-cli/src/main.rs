use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lilo_core::config::{Config, GatewayConfig, LoggingConfig};

#[derive(Parser)]
#[command(
    name = "lilo",
    about = "Real-time room server for shared word canvases",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the room server
    Serve {
        /// Port to listen on (default: 3000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for mistakes
    Validate,
}

/// Build the default filter: `--verbose`, then the configured level and
/// per-crate overrides. `RUST_LOG` wins over both.
fn log_filter(logging: Option<&LoggingConfig>, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose {
        "debug"
    } else {
        logging.and_then(|l| l.level.as_deref()).unwrap_or("info")
    };
    let mut directives = vec![level.to_string()];
    if let Some(logging) = logging {
        directives.extend(logging.filters.iter().cloned());
    }
    EnvFilter::new(directives.join(","))
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let filter = log_filter(logging, verbose);
    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let mut config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Serve { port, bind } => {
            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                anyhow::bail!("Invalid configuration: {}", errors.join("; "));
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            if let Some(bind) = bind {
                config.gateway.get_or_insert_with(GatewayConfig::default).bind = Some(bind);
            }
            tracing::info!("Starting Lilo v{} on port {port}", env!("CARGO_PKG_VERSION"));

            let state = lilo_gateway::GatewayState::new(Arc::new(config));
            #[cfg(feature = "metrics")]
            let state = state.with_metrics(lilo_gateway::metrics::install_prometheus_recorder()?);

            lilo_gateway::start_gateway(Arc::new(state), port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}
