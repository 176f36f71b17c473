//! Snapshot orchestrator: pause every channel, take
//! a point-in-time image of every replica (locally via the logical-volume
//! store, remotely via that replica's own control endpoint), then
//! unpause regardless of per-replica outcome.

use super::{replica::Locality, volume::Volume};
use crate::lvs::LogicalVolumeStore;
use async_trait::async_trait;
use std::sync::Arc;

/// What the snapshot orchestrator needs from the control-surface's
/// outbound RPC client to reach a remote replica's own control endpoint.
#[async_trait]
pub trait RemoteSnapshotClient: Send + Sync {
    async fn replica_snapshot(
        &self,
        address: &str,
        control_port: u16,
        replica_name: &str,
        snapshot_name: &str,
    ) -> Result<(), String>;
}

/// Per-replica result of a `volume_snapshot` call.
#[derive(Debug, Default)]
pub struct SnapshotOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SnapshotOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs the full pause -> snapshot-every-replica -> unpause sequence.
/// Reads are never paused; this function only touches the pause controller,
/// which already only gates the dispatcher's in-flight accounting, not
/// reads directly.
pub async fn snapshot(
    volume: Arc<Volume>,
    snapshot_name: &str,
    lvs: &dyn LogicalVolumeStore,
    remote: &dyn RemoteSnapshotClient,
) -> SnapshotOutcome {
    let pause = volume.pause_controller();
    pause.pause().await;

    let mut outcome = SnapshotOutcome::default();
    for replica in volume.replicas() {
        let result = match &replica.locality {
            Locality::Local => lvs
                .snapshot(&replica.device_name, snapshot_name)
                .await
                .map_err(|e| e.to_string()),
            Locality::Remote {
                address,
                control_port,
                ..
            } => {
                remote
                    .replica_snapshot(address, *control_port, &replica.device_name, snapshot_name)
                    .await
            }
        };
        match result {
            Ok(()) => outcome.succeeded.push(replica.device_name.clone()),
            Err(reason) => outcome.failed.push((replica.device_name.clone(), reason)),
        }
    }

    pause.unpause(&volume.in_flight);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{MemDeviceCatalog, Thread},
        lvs::NullLogicalVolumeStore,
        volume::lifecycle,
    };

    struct FailingRemote;

    #[async_trait]
    impl RemoteSnapshotClient for FailingRemote {
        async fn replica_snapshot(
            &self,
            _address: &str,
            _control_port: u16,
            _replica_name: &str,
            _snapshot_name: &str,
        ) -> Result<(), String> {
            Err("unreachable".to_string())
        }
    }

    #[tokio::test]
    async fn snapshot_succeeds_across_every_local_replica() {
        let catalog = MemDeviceCatalog::new();
        catalog.create("lvs1/v1", 4096, 4);
        catalog.create("lvs2/v1", 4096, 4);
        let volume = Volume::new("v1", 2);
        let thread = Thread::spawn("t").handle();
        lifecycle::add_local_replica(&volume, &thread, &catalog, "lvs1", "v1").await.unwrap();
        lifecycle::add_local_replica(&volume, &thread, &catalog, "lvs2", "v1").await.unwrap();

        let lvs = NullLogicalVolumeStore::new();
        lvs.seed("lvs1/v1", 4, 4096, &[0], 0);
        lvs.seed("lvs2/v1", 4, 4096, &[0], 0);

        let outcome = snapshot(volume, "snap_a", &lvs, &FailingRemote).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.succeeded.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_reports_partial_failure_for_unreachable_remote_replica() {
        use crate::core::{DescriptorGuard, MemBlockDevice};
        use crate::volume::replica::{Locality, Replica, ReplicaState};

        let volume = Volume::new("v1", 1);
        let thread = Thread::spawn("t").handle();
        let device = Arc::new(MemBlockDevice::new("remote-r1", 4096, 4));
        let descriptor = DescriptorGuard::open(device, thread.clone()).unwrap();
        volume.reconcile_geometry(descriptor.geometry()).unwrap();
        let replica = Replica {
            id: volume.alloc_replica_id(),
            device_name: "remote-r1".to_string(),
            descriptor,
            state: ReplicaState::Rw,
            locality: Locality::Remote {
                address: "10.0.0.1".to_string(),
                nvmf_port: 4420,
                control_port: 8420,
                remote_nqn: "nqn.test".to_string(),
            },
        };
        volume.push_replica(replica).unwrap();

        let lvs = NullLogicalVolumeStore::new();
        let outcome = snapshot(volume, "snap_a", &lvs, &FailingRemote).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.failed.len(), 1);
    }
}
