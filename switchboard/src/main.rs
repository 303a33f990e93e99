mod config;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "switchboard", about = "Session-affine gateway for conferencing backends")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the gateway
    Gateway(ConfigArgs),
    /// Load and validate a config file, then exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("config has no `{0}` section")]
    MissingSection(&'static str),
    #[error("invalid gateway config: {0}")]
    Invalid(#[from] gateway::config::ValidationError),
    #[error("could not set up statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Gateway(#[from] gateway::errors::GatewayError),
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Gateway(args) => {
            let config = Config::from_file(&args.config_file_path)?;
            let logging = config.common.logging.clone().unwrap_or_default();
            let _sentry = init_logging(&logging);
            if let Some(metrics) = &config.common.metrics {
                init_metrics(metrics)?;
            }

            let gateway_config = config.gateway.ok_or(CliError::MissingSection("gateway"))?;
            tracing::info!(
                host = %gateway_config.listener.host,
                port = gateway_config.listener.port,
                "Starting gateway"
            );

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(gateway::run(gateway_config))?;
        }
        CliCommand::Validate(args) => {
            let config = Config::from_file(&args.config_file_path)?;
            let gateway_config = config.gateway.ok_or(CliError::MissingSection("gateway"))?;
            gateway_config.validate()?;
            println!(
                "{}: ok ({} backends)",
                args.config_file_path.display(),
                gateway_config.backends.len()
            );
        }
    }

    Ok(())
}

/// Installs the global subscriber. The returned guard flushes sentry on drop.
fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let guard = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("switchboard"))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::RecorderInstalled)?;

    describe_all(affinity::metrics_defs::ALL_METRICS);
    describe_all(gateway::metrics_defs::ALL_METRICS);
    Ok(())
}
