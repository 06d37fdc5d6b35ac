//! Server entry point.
//!
//! Wires storage, the zone store, the DNSSEC signer, TSIG keys and the
//! replication workers together, then serves DNS on the configured
//! address. Configuration comes from environment variables (`DNS_PORT`,
//! `API_PORT`, `BIND_HOST`, `STORAGE_BACKEND`) plus the live document
//! persisted in the `config` table.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zone53::config::{BaseConfig, ConfigHandle};
use zone53::dnssec::{KeyStore, SignWorker};
use zone53::replication::{FetchWorker, NotifyEngine};
use zone53::server::{DnsServer, QueryHandler};
use zone53::storage::open_backend;
use zone53::tsig::TsigStore;
use zone53::zone::rtypes::Registry;
use zone53::zone::ZoneStore;

#[derive(Parser, Debug)]
#[command(name = "zone53")]
#[command(about = "Authoritative DNS server with DNSSEC and NOTIFY/AXFR replication")]
#[command(version)]
struct Args {
    /// Generate a default TSIG transfer key if none exists yet.
    #[arg(long)]
    generate_tsig: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let base = BaseConfig::from_env();

    let storage = open_backend(&base)?;
    let config = ConfigHandle::load(Arc::clone(&storage)).await?;
    let live = config.live().await;

    // RUST_LOG wins over the persisted log_level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(live.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?live.mode,
        backend = %base.storage_backend,
        "starting zone53"
    );

    let tsig = TsigStore::load(Arc::clone(&storage)).await?;
    if args.generate_tsig {
        tsig.ensure_default_key().await?;
    }

    let (store, sign_rx) = ZoneStore::load(Arc::clone(&storage)).await?;
    let keys = KeyStore::load(Arc::clone(&storage)).await?;
    let registry = Arc::new(Registry::standard());
    let (notify, fetch_rx) = NotifyEngine::new(Arc::clone(&config), Arc::clone(&tsig));

    // Background DNSSEC signing.
    let sign_worker = SignWorker::new(
        Arc::clone(&store),
        Arc::clone(&config),
        Arc::clone(&keys),
        Arc::clone(&registry),
    );
    tokio::spawn(sign_worker.run(sign_rx));

    // AXFR fetches triggered by inbound NOTIFY.
    let fetch_worker = FetchWorker::new(
        Arc::clone(&store),
        Arc::clone(&config),
        Arc::clone(&tsig),
        Arc::clone(&notify),
    );
    tokio::spawn(fetch_worker.run(fetch_rx));

    let handler = Arc::new(QueryHandler::new(
        store,
        registry,
        Arc::clone(&config),
        tsig,
        notify,
    ));
    let server = DnsServer::bind(&base.dns_addr(), handler, config).await?;

    info!(zones = "loaded", addr = %base.dns_addr(), "serving");
    server.run().await?;
    Ok(())
}
