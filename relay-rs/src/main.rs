use anyhow::Context;
use clap::{Parser, Subcommand};
use relay_rs::config::{Config, LoggingConfig};
use relay_rs::queue::{FileQueueStore, Scheduler};
use relay_rs::security::tls::{generate_self_signed_cert, TlsConfig};
use relay_rs::smtp::{DeliveryClient, SmtpServer};
use relay_rs::utils::DnsMxResolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "relay-rs")]
#[command(about = "Minimal SMTP relay with a durable retry queue", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (defaults to ./config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a self-signed certificate and key for STARTTLS
    GenCert {
        /// Host name the certificate is issued for
        domain: String,
        #[arg(long, default_value = "cert.pem")]
        cert: String,
        #[arg(long, default_value = "key.pem")]
        key: String,
    },
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None if Path::new("config.toml").exists() => {
            Config::from_file("config.toml").context("loading ./config.toml")
        }
        None => Ok(Config::default()),
    }
}

fn load_tls(config: &Config) -> anyhow::Result<TlsConfig> {
    match (&config.smtp.tls_cert_path, &config.smtp.tls_key_path) {
        (Some(cert), Some(key)) => {
            info!("Loading TLS identity from {}", cert);
            Ok(TlsConfig::from_pem_files(cert, key)?)
        }
        (None, None) => Ok(TlsConfig::self_signed(&config.server.hostname)?),
        _ => anyhow::bail!("smtp.tls_cert_path and smtp.tls_key_path must be set together"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_logging(&config.logging);

    if let Some(Commands::GenCert { domain, cert, key }) = cli.command {
        generate_self_signed_cert(&domain, &cert, &key)?;
        return Ok(());
    }

    info!("Starting relay-rs v{}", env!("CARGO_PKG_VERSION"));
    info!("  Hostname: {}", config.server.hostname);
    info!("  SMTP listening on: {}", config.smtp.listen_addr);
    info!("  Spool directory: {}", config.queue.spool_dir);

    let tls = Arc::new(load_tls(&config)?);
    let store = Arc::new(FileQueueStore::open(&config.queue.spool_dir).await?);

    let deliverer = Arc::new(DeliveryClient::new(
        config.server.hostname.clone(),
        config.delivery.port,
        config.delivery.connect_timeout(),
        Arc::new(DnsMxResolver::new()),
        tls.connector(),
    ));

    let scheduler = Arc::new(Scheduler::new(store.clone(), deliverer, &config.delivery));
    let scheduler_handle = tokio::spawn(scheduler.run());

    let server = SmtpServer::bind(
        &config.smtp.listen_addr,
        config.server.hostname.clone(),
        store,
        tls,
    )
    .await?;
    let smtp_handle = tokio::spawn(server.run());

    tokio::select! {
        result = smtp_handle => {
            match result {
                Ok(Ok(())) => info!("SMTP server exited"),
                Ok(Err(e)) => error!("SMTP server error: {}", e),
                Err(e) => error!("SMTP task panic: {}", e),
            }
        }
        result = scheduler_handle => {
            if let Err(e) = result {
                error!("Scheduler task panic: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
