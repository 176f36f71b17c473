//! The NVMe-over-Fabrics transport is an external collaborator:
//! specified here only as the operations the core invokes to publish or
//! withdraw a volume or replica.

use crate::core::{BlockDevice, CoreError};
use std::sync::Arc;

/// Default NVMf listen address/port when none is configured.
pub const DEFAULT_NVMF_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_NVMF_PORT: u16 = 4420;

/// Builds the NQN for a published volume.
pub fn volume_nqn(org: &str, date: &str, name: &str) -> String {
    format!("nqn.{date}.io.{org}.volume:{name}")
}

/// Builds the NQN for a published replica.
pub fn replica_nqn(org: &str, date: &str, lvs: &str, name: &str) -> String {
    format!("nqn.{date}.io.{org}.replica:{lvs}/{name}")
}

/// Builds the NQN for a published snapshot.
pub fn snapshot_nqn(org: &str, date: &str, name: &str) -> String {
    format!("nqn.{date}.io.{org}.snapshot:{name}")
}

/// Publishing surface for volumes/replicas/snapshots over NVMe-oF. Left
/// unimplemented against a real transport: production wiring of the
/// NVMe-oF target is external to this core.
pub trait NvmfTarget: Send + Sync {
    fn publish(&self, nqn: &str, address: &str, port: u16);
    fn unpublish(&self, nqn: &str);

    /// Attaches the remote NVMe subsystem named by `remote_nqn` at
    /// `address`:`nvmf_port`, returning a local proxy device for it.
    /// `local_name` is the collision-free name the proxy device should
    /// register under locally.
    fn connect_remote(
        &self,
        address: &str,
        nvmf_port: u16,
        remote_nqn: &str,
        local_name: &str,
    ) -> Result<Arc<dyn BlockDevice>, CoreError>;
}

/// No-op target used where no real NVMe-oF transport is wired up (tests,
/// and any deployment that only exposes volumes locally).
#[derive(Debug, Default)]
pub struct NullNvmfTarget;

impl NvmfTarget for NullNvmfTarget {
    fn publish(&self, _nqn: &str, _address: &str, _port: u16) {}
    fn unpublish(&self, _nqn: &str) {}

    fn connect_remote(
        &self,
        _address: &str,
        _nvmf_port: u16,
        remote_nqn: &str,
        _local_name: &str,
    ) -> Result<Arc<dyn BlockDevice>, CoreError> {
        Err(CoreError::DeviceNotFound {
            name: remote_nqn.to_string(),
        })
    }
}
