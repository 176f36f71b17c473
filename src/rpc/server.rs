//! The TCP carrier for the control surface: one newline-delimited JSON
//! request per line, one newline-delimited JSON response per reply.

use super::{
    methods::{self, RpcContext},
    types::{RpcRequest, RpcResponse},
};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

pub struct RpcServer {
    listener: TcpListener,
    ctx: Arc<RpcContext>,
}

impl RpcServer {
    pub async fn bind(addr: &str, ctx: Arc<RpcContext>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "control surface listening");
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn serve(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "control connection accepted");
                            let ctx = self.ctx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, ctx).await {
                                    warn!(%peer, error = %e, "control connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("control surface shutting down");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, ctx: Arc<RpcContext>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(req) => methods::dispatch(&ctx, req).await,
            Err(e) => RpcResponse::err(None, super::types::RpcErrorCode::INVALID_ARGUMENT, e.to_string()),
        };
        let mut encoded = serde_json::to_vec(&response).expect("RpcResponse always serializes");
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
    }
    Ok(())
}
