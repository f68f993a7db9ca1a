//! Prometheus exporter for Cosmos SDK chains.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cosmos_exporter_common::{LogFormat, init_tracing};
use tokio::sync::watch;
use tracing::{error, info};

use cosmos_exporter::{
    AppState, ExporterConfig, HttpServer, RestNodeClient, ScrapeSettings, Scraper, resolve,
};

/// Prometheus exporter for Cosmos SDK chains.
#[derive(Parser, Debug)]
#[command(name = "cosmos-exporter")]
#[command(
    about = "Scrape the data about the validators set, specific validators or wallets in the Cosmos network"
)]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen_address: Option<String>,

    /// Node REST (LCD) endpoint (overrides config).
    #[arg(long)]
    node: Option<String>,

    /// Display denomination symbol; empty means "ask the node".
    #[arg(long)]
    denom: Option<String>,

    /// Divisor applied to raw amounts; requires --denom.
    #[arg(long)]
    denom_coefficient: Option<f64>,

    /// Decimal exponent of the display unit; requires --denom.
    #[arg(long)]
    denom_exponent: Option<u32>,

    /// Base bech32 prefix all other prefixes are derived from.
    #[arg(long)]
    bech_prefix: Option<String>,

    /// Bech32 account prefix.
    #[arg(long)]
    bech_account_prefix: Option<String>,

    /// Bech32 validator operator prefix.
    #[arg(long)]
    bech_validator_prefix: Option<String>,

    /// Maximum validators fetched by the validators listing.
    #[arg(long)]
    limit: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON.
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Apply command line values on top of the file configuration.
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(listen) = self.listen_address {
            config.prometheus.listen = listen;
        }
        if let Some(node) = self.node {
            config.node.api = node;
        }
        if let Some(symbol) = self.denom {
            config.denom.symbol = Some(symbol);
        }
        if let Some(coefficient) = self.denom_coefficient {
            config.denom.coefficient = Some(coefficient);
        }
        if let Some(exponent) = self.denom_exponent {
            config.denom.exponent = Some(exponent);
        }
        if let Some(prefix) = self.bech_prefix {
            config.bech32.prefix = prefix;
        }
        if let Some(prefix) = self.bech_account_prefix {
            config.bech32.account_prefix = Some(prefix);
        }
        if let Some(prefix) = self.bech_validator_prefix {
            config.bech32.validator_prefix = Some(prefix);
        }
        if let Some(limit) = self.limit {
            config.node.validators_limit = limit;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json {
            config.logging.format = LogFormat::Json;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ExporterConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    let prefixes = config.bech32.resolve();
    info!(
        node = %config.node.api,
        listen = %config.prometheus.listen,
        path = %config.prometheus.path,
        denom = ?config.denom.symbol(),
        coefficient = ?config.denom.coefficient,
        exponent = ?config.denom.exponent,
        validators_limit = config.node.validators_limit,
        timeout_secs = config.node.timeout_secs,
        "Started with following parameters"
    );
    info!(
        account = %prefixes.account,
        account_pubkey = %prefixes.account_pubkey,
        validator = %prefixes.validator,
        validator_pubkey = %prefixes.validator_pubkey,
        consensus_node = %prefixes.consensus_node,
        consensus_node_pubkey = %prefixes.consensus_node_pubkey,
        "Bech32 prefixes"
    );

    let node = Arc::new(RestNodeClient::new(
        config.node.api.clone(),
        config.node.timeout(),
    )?);

    let denom = resolve(&config.denom, node.as_ref())
        .await
        .context("Could not resolve denomination")?;

    let settings = ScrapeSettings::new(
        config.prometheus.prefix.clone(),
        config.prometheus.default_labels.clone(),
        config.node.timeout(),
        config.node.validators_limit,
    );
    let scraper = Arc::new(Scraper::new(
        node,
        Arc::new(denom),
        settings,
        config.prometheus.max_error_series,
    ));

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .context("Invalid listen address")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        scraper: scraper.clone(),
        prefixes: Arc::new(prefixes),
    };
    let http_server = HttpServer::new(state, listen_addr, config.prometheus.path.clone());

    let mut http_task = tokio::spawn(async move { http_server.run(shutdown_rx).await });

    tokio::select! {
        result = &mut http_task => {
            // Server exited on its own, e.g. the listen address was taken
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
            };
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    match tokio::time::timeout(Duration::from_secs(5), http_task).await {
        Ok(Ok(Err(e))) => error!("HTTP server error: {}", e),
        Err(_) => error!("HTTP server did not stop in time"),
        _ => {}
    }

    info!(
        scrape_errors = scraper.errors().total(),
        error_series = scraper.errors().series_count(),
        "Exporter stopped"
    );
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
