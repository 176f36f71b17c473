//! A minimal JSON-RPC client over the same newline-delimited TCP framing
//! the server speaks, used both by `volctl` and by the snapshot
//! orchestrator to reach a remote replica's own control endpoint.

use super::types::{RpcRequest, RpcResponse};
use crate::volume::snapshot::RemoteSnapshotClient;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

#[derive(Debug, Default, Clone)]
pub struct RpcClient;

impl RpcClient {
    pub fn new() -> Self {
        Self
    }

    /// Connects fresh for each call. The control surface is a low-volume
    /// management path, not the I/O fast path, so paying a connect
    /// per request keeps this client free of any connection-pool state.
    pub async fn call(&self, address: &str, port: u16, method: &str, params: Value) -> Result<Value, String> {
        let mut stream = TcpStream::connect((address, port))
            .await
            .map_err(|e| e.to_string())?;
        let request = RpcRequest {
            method: method.to_string(),
            params,
            id: Some(json!(1)),
        };
        let mut line = serde_json::to_vec(&request).map_err(|e| e.to_string())?;
        line.push(b'\n');
        stream.write_all(&line).await.map_err(|e| e.to_string())?;
        stream.flush().await.map_err(|e| e.to_string())?;

        let (reader, _writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let response_line = lines
            .next_line()
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "connection closed before a response arrived".to_string())?;
        let response: RpcResponse = serde_json::from_str(&response_line).map_err(|e| e.to_string())?;
        match (response.result, response.error) {
            (Some(result), _) => Ok(result),
            (None, Some(err)) => Err(format!("[{}] {}", err.code, err.message)),
            (None, None) => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl RemoteSnapshotClient for RpcClient {
    async fn replica_snapshot(
        &self,
        address: &str,
        control_port: u16,
        replica_name: &str,
        snapshot_name: &str,
    ) -> Result<(), String> {
        let (lvs, name) = replica_name
            .split_once('/')
            .ok_or_else(|| format!("replica device name '{replica_name}' has no lvs prefix"))?;
        self.call(
            address,
            control_port,
            "replica_snapshot",
            json!({"name": name, "snapshot": snapshot_name, "lvs": lvs}),
        )
        .await
        .map(|_| ())
    }
}
