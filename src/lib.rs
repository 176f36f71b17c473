//! Core of a distributed, mirrored block-device virtualization layer: a
//! single logical volume backed by N synchronously replicated copies.
//! [`core`] is the base device proxy and thread/reactor scheduling,
//! [`volume`] is the data path and membership machinery, [`rebuild`] is
//! the differential replica rebuild engine, and [`rpc`] is the control
//! surface.

pub mod config;
pub mod core;
pub mod logger;
pub mod lvs;
pub mod nvmf;
pub mod rebuild;
pub mod rpc;
pub mod volume;

/// Waits for SIGINT/SIGTERM, then flips the shared shutdown watch so
/// every long-running task (control surface, reactors) can wind down
/// cooperatively.
pub async fn wait_for_shutdown_signal(tx: tokio::sync::watch::Sender<bool>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;
    use futures::stream::StreamExt;

    let signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return;
        }
    };
    let handle = signals.handle();
    let mut signals = signals.fuse();
    if signals.next().await.is_some() {
        tracing::info!("shutdown signal received");
        let _ = tx.send(true);
    }
    handle.close();
}
