//! Replica membership data: identity, backing device, and the
//! participation state that governs whether a replica takes reads,
//! writes, or neither.

use crate::core::{BlockDeviceHandle, CoreError, DescriptorGuard};
use std::sync::Arc;

/// Participation state of one replica in I/O selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReplicaState {
    /// Eligible for both reads and writes.
    Rw,
    /// Receives writes but not reads; used while a rebuild is in flight.
    WriteOnly,
    /// Receives neither until re-added by an operator.
    Err,
}

/// Where a replica's backing device lives.
#[derive(Debug, Clone)]
pub enum Locality {
    Local,
    Remote {
        address: String,
        nvmf_port: u16,
        control_port: u16,
        remote_nqn: String,
    },
}

impl Locality {
    pub fn is_remote(&self) -> bool {
        matches!(self, Locality::Remote { .. })
    }
}

/// One physical copy of a volume's data.
#[derive(Debug, Clone)]
pub struct Replica {
    /// Process-unique handle, stable for the replica's lifetime. Channels
    /// refer to replicas by this id rather than by an owning reference, so
    /// that sub-channels never need a strong pointer back up to the
    /// membership list that owns them.
    pub id: u64,
    /// Donor device identifier, e.g. `<lvs>/<name>` for a local replica.
    pub device_name: String,
    pub descriptor: DescriptorGuard,
    pub state: ReplicaState,
    pub locality: Locality,
}

impl Replica {
    pub fn is_rw(&self) -> bool {
        matches!(self.state, ReplicaState::Rw)
    }

    /// Opens a fresh thread-local sub-channel onto this replica's device.
    /// Called once per channel that installs this replica, never shared
    /// across threads.
    pub fn open_sub_channel(&self) -> Result<Arc<dyn BlockDeviceHandle>, CoreError> {
        Ok(Arc::from(self.descriptor.device().open_handle()?))
    }

    /// The control-port address used to reach this replica's own JSON-RPC
    /// endpoint for remote operations (remote snapshot, rebuild source
    /// selection). `None` for local replicas, which are addressed through
    /// the local logical-volume store directly.
    pub fn control_endpoint(&self) -> Option<(String, u16)> {
        match &self.locality {
            Locality::Remote {
                address,
                control_port,
                ..
            } => Some((address.clone(), *control_port)),
            Locality::Local => None,
        }
    }
}
