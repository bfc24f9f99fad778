//! CoinKit CLI
//!
//! Command-line interface for the CoinKit market watcher.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use coinkit::alerting::{AlertDispatcher, DiscordWebhookSink, Engine, Scheduler};
use coinkit::api::HttpServer;
use coinkit::config::LoggingConfig;
use coinkit::db::Database;
use coinkit::Config;

/// CoinKit - DeFi rate, cap and ICO alerts
#[derive(Parser)]
#[command(name = "coinkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "COINKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the HTTP API
    Serve {
        /// HTTP API port (overrides server.http_port)
        #[arg(long, env = "COINKIT_HTTP_PORT")]
        http_port: Option<u16>,
    },

    /// Run a single evaluation cycle and print the alerts
    Once {
        /// Also deliver the alerts to the configured destinations
        #[arg(long)]
        notify: bool,
    },

    /// List tracked metrics
    Metrics,

    /// Manage mention subscriptions
    Subs {
        #[command(subcommand)]
        command: SubsCommands,
    },

    /// Database management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum SubsCommands {
    /// List a user's subscriptions
    List {
        /// User id
        #[arg(long)]
        user: String,
    },

    /// Subscribe a user to a metric
    Add {
        /// User id
        #[arg(long)]
        user: String,

        /// Metric key
        key: String,
    },

    /// Unsubscribe a user from a metric
    Remove {
        /// User id
        #[arg(long)]
        user: String,

        /// Metric key
        key: String,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create the schema if it is missing
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; the guard flushes buffered lines on exit
    let _guard = init_logging(&config.logging, cli.verbose);

    // Execute command
    let result = match cli.command {
        Commands::Serve { http_port } => run_serve(config, http_port).await,
        Commands::Once { notify } => run_once(config, notify, cli.format).await,
        Commands::Metrics => run_metrics(config, cli.format).await,
        Commands::Subs { command } => run_subs(config, command, cli.format).await,
        Commands::Db { command } => run_db(config, command).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> WorkerGuard {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init();
    }

    guard
}

fn install_prometheus(config: &Config) -> anyhow::Result<()> {
    if let Some(port) = config.telemetry.prometheus_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(port, "Prometheus exporter listening");
    }
    Ok(())
}

/// Open the store and wire the engine and dispatcher from config
async fn build(config: &Config) -> anyhow::Result<(Database, Arc<Engine>, Arc<AlertDispatcher>)> {
    let db = Database::new(&config.database)
        .await
        .with_context(|| format!("failed to open {}", config.database.url))?;

    let adapters = coinkit::sources::from_config(&config.sources)?;
    let engine = Arc::new(Engine::new(adapters, &db, &config.engine));

    let sink = Arc::new(DiscordWebhookSink::new(config.notifier.timeout)?);
    let dispatcher = Arc::new(AlertDispatcher::new(sink, &config.notifier, db.subscriptions.clone()));

    Ok((db, engine, dispatcher))
}

async fn run_serve(mut config: Config, http_port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = http_port {
        config.server.http_port = port;
    }
    install_prometheus(&config)?;

    let (db, engine, dispatcher) = build(&config).await?;
    info!(adapters = ?engine.adapter_names(), "Starting CoinKit");

    let scheduler = Scheduler::new(engine.clone(), dispatcher.clone(), config.engine.interval);
    let server = HttpServer::new(db, Some(engine), Some(dispatcher));
    let addr = format!("{}:{}", config.server.host, config.server.http_port);

    tokio::select! {
        () = scheduler.run() => {}
        result = server.serve(&addr) => result?,
    }

    info!("Shutting down");
    Ok(())
}

async fn run_once(config: Config, notify: bool, format: OutputFormat) -> anyhow::Result<()> {
    let (_db, engine, dispatcher) = build(&config).await?;

    let report = if notify {
        Scheduler::new(engine, dispatcher, config.engine.interval)
            .tick()
            .await?
    } else {
        engine.run_cycle().await?
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            for alert in &report.alerts {
                println!("[{}] {}\n", alert.severity.as_str(), alert.message());
            }
            for failure in &report.failures {
                println!("adapter {} failed: {}", failure.adapter, failure.reason);
            }
            println!(
                "{} alerts, {} records processed, {} rejected, {} adapters failed",
                report.alerts.len(),
                report.records_processed,
                report.records_rejected,
                report.failures.len()
            );
        }
    }

    Ok(())
}

async fn run_metrics(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let db = Database::new(&config.database).await?;
    let metrics = db.visible_metrics().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&metrics)?),
        OutputFormat::Text => {
            if metrics.is_empty() {
                println!("No metrics recorded yet. Run a cycle first.");
            }
            for metric in &metrics {
                println!("{} - {} ({})", metric.key, metric.name, metric.unit);
            }
        }
    }

    Ok(())
}

async fn run_subs(config: Config, command: SubsCommands, format: OutputFormat) -> anyhow::Result<()> {
    let db = Database::new(&config.database).await?;

    match command {
        SubsCommands::List { user } => {
            let keys = db.subscriptions.list_for_user(&user).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&keys)?),
                OutputFormat::Text if keys.is_empty() => println!("{user} has no subscriptions"),
                OutputFormat::Text => keys.iter().for_each(|key| println!("{key}")),
            }
        }
        SubsCommands::Add { user, key } => {
            if db.subscribe(&user, &key).await? {
                println!("Subscribed {user} to {key}");
            } else {
                println!("{user} is already subscribed to {key}");
            }
        }
        SubsCommands::Remove { user, key } => {
            if db.subscriptions.remove(&user, &key).await? {
                println!("Unsubscribed {user} from {key}");
            } else {
                println!("{user} was not subscribed to {key}");
            }
        }
    }

    Ok(())
}

async fn run_db(config: Config, command: DbCommands) -> anyhow::Result<()> {
    match command {
        DbCommands::Init => {
            // Opening the store creates the schema
            Database::new(&config.database).await?;
            println!("Database ready at {}", config.database.url);
        }
    }
    Ok(())
}
