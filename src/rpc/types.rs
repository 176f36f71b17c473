//! Wire types for the JSON-RPC control surface: one
//! request/response pair per line over the TCP carrier.

use crate::volume::Error as VolumeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Echoed back in the response so pipelined clients (like `volctl`)
    /// can match replies to requests; optional because not every caller
    /// needs it.
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Error categories surfaced on the wire, mapped from the richer
/// internal error enums. Kept as plain integers rather than an enum with
/// a wire encoding of its own, since the only consumer is JSON clients.
pub struct RpcErrorCode;

impl RpcErrorCode {
    pub const NOT_FOUND: i32 = 1;
    pub const INVALID_ARGUMENT: i32 = 2;
    pub const BUSY: i32 = 3;
    pub const EXHAUSTED: i32 = 4;
    pub const DEVICE_FAILED: i32 = 5;
    pub const NO_READABLE_REPLICA: i32 = 6;
    pub const PARTIAL: i32 = 7;
    pub const SHUTDOWN: i32 = 8;
    pub const INTERNAL: i32 = 9;
}

/// Maps a [`VolumeError`] to the wire error code it corresponds to.
pub fn code_for_volume_error(err: &VolumeError) -> i32 {
    use VolumeError::*;
    match err {
        NotFound { .. } | ReplicaNotFound { .. } => RpcErrorCode::NOT_FOUND,
        NameExists { .. } | TooManyReplicas { .. } | GeometryMismatch { .. } | InvalidState { .. } => {
            RpcErrorCode::INVALID_ARGUMENT
        }
        Busy { .. } => RpcErrorCode::BUSY,
        Shutdown { .. } => RpcErrorCode::SHUTDOWN,
        OpenReplica { .. } | Rebuild { .. } | NoRebuildDonor { .. } | Lvs { .. } => {
            RpcErrorCode::DEVICE_FAILED
        }
        PartialSnapshot { .. } => RpcErrorCode::PARTIAL,
    }
}
