//! C2PL CLI - centralized two-phase locking coordinator and sites

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use c2pl_core::config::Config;
use c2pl_core::coordinator::{Coordinator, spawn_deadlock_monitor};
use c2pl_core::domain::transaction::{SiteId, Transaction, load_script};
use c2pl_core::protocol::{
    CoordinatorEndpoint, CoordinatorHandler, SiteHandler, TcpCoordinatorClient, serve,
};
use c2pl_core::site::{AgentSettings, SiteAgent, SiteControl};
use c2pl_core::storage::{ItemStore, SqliteItemStore};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "c2pl")]
#[command(author, version, about = "Centralized two-phase locking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lock coordinator until Ctrl-C
    Coordinator {
        /// Address to listen on
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Milliseconds between deadlock checks
        #[arg(long)]
        check_interval_ms: Option<u64>,
    },

    /// Run a transaction site against a coordinator
    Site {
        /// Transaction script to execute
        #[arg(short, long)]
        transactions: PathBuf,
        /// Coordinator host
        #[arg(long)]
        host: Option<String>,
        /// Coordinator port
        #[arg(short, long)]
        port: Option<u16>,
        /// SQLite database holding the item values
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Address the site listens on for coordinator notifications
        #[arg(long)]
        listen_host: Option<String>,
        /// Port for coordinator notifications (0 picks a free one)
        #[arg(long, default_value_t = 0)]
        listen_port: u16,
        /// Pause after each operation
        #[arg(long)]
        operation_delay_ms: Option<u64>,
    },

    /// Parse a transaction script and print the transactions
    Parse {
        /// Transaction script
        file: PathBuf,
        /// Site id used to number the transactions
        #[arg(long, default_value_t = 1)]
        site_id: SiteId,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print one configuration value
    Get { key: String },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    let default_level = if cli.verbose || config.logging.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("c2pl_core={}", default_level).parse()?)
                .add_directive(format!("c2pl={}", default_level).parse()?),
        )
        .init();

    match cli.command {
        Commands::Coordinator {
            host,
            port,
            check_interval_ms,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.coordinator.host = host;
            }
            if let Some(port) = port {
                config.coordinator.port = port;
            }
            if let Some(interval) = check_interval_ms {
                config.coordinator.deadlock_check_interval_ms = interval;
            }
            config.validate()?;
            cmd_coordinator(&config, cli.quiet).await
        }

        Commands::Site {
            transactions,
            host,
            port,
            database,
            listen_host,
            listen_port,
            operation_delay_ms,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.coordinator.host = host;
            }
            if let Some(port) = port {
                config.coordinator.port = port;
            }
            if let Some(database) = database {
                config.site.database_path = database;
            }
            if let Some(listen_host) = listen_host {
                config.site.listen_host = listen_host;
            }
            if let Some(delay) = operation_delay_ms {
                config.site.operation_delay_ms = delay;
            }
            config.validate()?;
            cmd_site(&config, &transactions, listen_port, cli.format, cli.quiet).await
        }

        Commands::Parse { file, site_id } => cmd_parse(&file, site_id, cli.format),

        Commands::Config { action } => cmd_config(&config, action, cli.format),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_coordinator(config: &Config, quiet: bool) -> anyhow::Result<()> {
    let address = config.coordinator.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to listen on {}", address))?;
    let local = listener.local_addr()?;

    let coordinator = Arc::new(Coordinator::new());
    let shutdown = CancellationToken::new();

    let monitor = spawn_deadlock_monitor(
        coordinator.clone(),
        config.coordinator.deadlock_check_interval(),
        shutdown.clone(),
    );
    let handler = Arc::new(CoordinatorHandler::new(
        coordinator.clone(),
        config.coordinator.rpc_timeout(),
    ));
    let server = tokio::spawn(serve(listener, handler, shutdown.clone()));

    if !quiet {
        println!("Coordinator listening on {}", local);
        println!("Press Ctrl-C to stop.");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down coordinator");
    shutdown.cancel();
    monitor.await?;
    server.await??;

    let stats = coordinator.stats().await;
    if !quiet {
        println!(
            "Sites registered: {}, deadlocks resolved: {}, checks run: {}",
            stats.registered_sites, stats.deadlocks_found, stats.checks_run
        );
    }
    Ok(())
}

async fn cmd_site(
    config: &Config,
    transactions: &Path,
    listen_port: u16,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let client = TcpCoordinatorClient::new(
        config.coordinator.address(),
        config.coordinator.rpc_timeout(),
    );
    let site_id = client
        .register_site()
        .await
        .with_context(|| format!("Failed to register with coordinator at {}", client.address()))?;
    info!(site_id, "Registered with coordinator");

    let queue = load_script(transactions, site_id)?;
    let store = Arc::new(SqliteItemStore::open(&config.site.database_path).await?);
    store.health_check().await?;
    info!(path = %store.path().display(), "Item store ready");
    let control = Arc::new(SiteControl::new(site_id));

    let listener = TcpListener::bind((config.site.listen_host.as_str(), listen_port))
        .await
        .with_context(|| {
            format!(
                "Failed to listen on {}:{}",
                config.site.listen_host, listen_port
            )
        })?;
    let callback = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        Arc::new(SiteHandler::new(control.clone())),
        shutdown.clone(),
    ));
    client
        .bind_site(site_id, callback.to_string())
        .await
        .context("Failed to bind site callback address")?;

    let agent = SiteAgent::new(
        Arc::new(client),
        store.clone(),
        control,
        AgentSettings::from(&config.site),
    );
    let report = agent.run(queue).await;
    let items = store.items().await?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "report": report,
                "items": items.iter().cloned().collect::<BTreeMap<String, i64>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if !quiet {
                println!("{}", report);
                for (item, value) in &items {
                    println!("  {} = {}", item, value);
                }
            }
        }
    }

    if !quiet {
        println!("Site {} idle. Press Ctrl-C to stop.", site_id);
    }
    tokio::signal::ctrl_c().await?;
    shutdown.cancel();
    if let Err(e) = server.await? {
        warn!(error = %e, "Site listener stopped with an error");
    }
    store.close().await;
    Ok(())
}

fn cmd_parse(file: &Path, site_id: SiteId, format: OutputFormat) -> anyhow::Result<()> {
    let queue = load_script(file, site_id)?;
    match format {
        OutputFormat::Json => {
            let transactions: Vec<&Transaction> = queue.iter().collect();
            println!("{}", serde_json::to_string_pretty(&transactions)?);
        }
        OutputFormat::Text => {
            for transaction in queue.iter() {
                println!("{}", transaction);
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &Config, action: ConfigAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Text => {
                for (key, value) in config.list()? {
                    println!("{} = {}", key, value);
                }
            }
        },
        ConfigAction::Get { key } => {
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
