//! The `mirrorvold` daemon: boots the reactor pool, the volume registry,
//! and the JSON-RPC control surface, then runs until a shutdown signal
//! arrives.

use clap::Parser;
use mirrorvol::{
    config::{Cli, Config},
    core::{MemDeviceCatalog, Reactors},
    nvmf::NullNvmfTarget,
    rpc::{client::RpcClient, RpcContext, RpcServer},
    volume::VolumeRegistry,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// A short hash of the effective config, logged once at startup so two
/// daemons' logs can be compared for a config drift without diffing the
/// whole struct.
fn config_fingerprint(config: &Config) -> String {
    let serialized = serde_yaml::to_string(config).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(&digest[.. 8])
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    mirrorvol::logger::init(&cli.log_level);

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(?config, fingerprint = %config_fingerprint(&config), "starting mirrorvold");

    Reactors::init(config.cores);

    let registry = Arc::new(VolumeRegistry::new());
    let catalog = Arc::new(MemDeviceCatalog::new());
    let nvmf = Arc::new(NullNvmfTarget);
    let lvs = Arc::new(mirrorvol::lvs::NullLogicalVolumeStore::new());
    let remote_snapshot = Arc::new(RpcClient::new());

    let ctx = Arc::new(RpcContext::new(
        registry,
        catalog,
        nvmf,
        lvs,
        remote_snapshot,
        config.org.clone(),
        config.date.clone(),
        config.nvmf_address.clone(),
    ));

    let server = match RpcServer::bind(&config.rpc_address, ctx).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, address = %config.rpc_address, "failed to bind control surface");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let signal_task = tokio::spawn(mirrorvol::wait_for_shutdown_signal(shutdown_tx));

    server.serve(shutdown_rx).await;
    signal_task.abort();
}
