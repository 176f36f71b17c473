//! The volume itself. Owns the replica membership, the per-thread channel map, and
//! the aggregate in-flight counter; `lifecycle`, `snapshot`, and
//! `dispatch` all operate on a shared `Arc<Volume>`.

use super::{
    channel::ChannelHandle,
    dispatch,
    error::{self, Error, Result},
    io::{VolumeIo, VolumeIoResult},
    pause::PauseController,
    replica::{Replica, ReplicaState},
};
use crate::core::{Geometry, ThreadHandle};
use parking_lot::Mutex;
use snafu::{ensure, ResultExt};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Volume lifecycle state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VolumeState {
    Configuring,
    Online,
    Offline,
}

/// Everything about a volume that changes shape: membership, geometry
/// once established, lifecycle state, and the per-thread channel table.
/// Held under one mutex, taken briefly, never across a message
/// round-trip.
struct Inner {
    state: VolumeState,
    geometry: Option<Geometry>,
    replicas: Vec<Replica>,
    channels: HashMap<u32, ChannelHandle>,
}

pub struct Volume {
    pub name: String,
    /// Stable identity independent of `name`, surfaced on the control
    /// surface so a renamed or re-created volume of the same name can
    /// still be told apart in logs.
    pub uuid: uuid::Uuid,
    pub declared_replicas: usize,
    pub in_flight: Arc<AtomicU64>,
    next_replica_id: AtomicU64,
    inner: Mutex<Inner>,
}

impl Volume {
    pub fn new(name: impl Into<String>, declared_replicas: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            uuid: uuid::Uuid::new_v4(),
            declared_replicas,
            in_flight: Arc::new(AtomicU64::new(0)),
            next_replica_id: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                state: VolumeState::Configuring,
                geometry: None,
                replicas: Vec::new(),
                channels: HashMap::new(),
            }),
        })
    }

    pub fn alloc_replica_id(&self) -> u64 {
        self.next_replica_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn state(&self) -> VolumeState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: VolumeState) {
        self.inner.lock().state = state;
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.inner.lock().geometry
    }

    /// Checks a candidate geometry against the volume's established one,
    /// adopting it if this is the first replica.
    pub fn reconcile_geometry(&self, candidate: Geometry) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.geometry {
            None => {
                inner.geometry = Some(candidate);
                Ok(())
            }
            Some(existing) => {
                ensure!(
                    existing == candidate,
                    error::GeometryMismatch {
                        name: self.name.clone(),
                        replica: String::new(),
                        block_size: candidate.block_size,
                        num_blocks: candidate.num_blocks,
                        vol_block_size: existing.block_size,
                        vol_num_blocks: existing.num_blocks,
                    }
                );
                Ok(())
            }
        }
    }

    pub fn replica_count(&self) -> usize {
        self.inner.lock().replicas.len()
    }

    pub fn replicas(&self) -> Vec<Replica> {
        self.inner.lock().replicas.clone()
    }

    pub fn find_replica(&self, device_name: &str) -> Option<Replica> {
        self.inner
            .lock()
            .replicas
            .iter()
            .find(|r| r.device_name == device_name)
            .cloned()
    }

    /// Adds `replica` to membership and installs it into every live
    /// channel. Takes the membership lock with `try_lock` rather than
    /// `lock`: two membership changes against the same volume (e.g. two
    /// concurrent `volume_add_replica` calls) are a caller mistake, not
    /// something to queue behind, so the loser is told to retry instead of
    /// blocking.
    pub fn push_replica(&self, replica: Replica) -> Result<()> {
        let mut inner = self.inner.try_lock().ok_or_else(|| {
            error::Busy {
                name: self.name.clone(),
            }
            .build()
        })?;
        for channel in inner.channels.values() {
            let handle = replica.open_sub_channel().context(error::OpenReplica {
                name: self.name.clone(),
                replica: replica.device_name.clone(),
            })?;
            channel.install_sub_channel(replica.id, handle, replica.state);
        }
        inner.replicas.push(replica);
        Ok(())
    }

    pub fn set_replica_state(&self, replica_id: u64, new_state: ReplicaState) {
        let mut inner = self.inner.lock();
        if let Some(r) = inner.replicas.iter_mut().find(|r| r.id == replica_id) {
            r.state = new_state;
        }
        for channel in inner.channels.values() {
            channel.set_sub_channel_state(replica_id, new_state);
        }
    }

    /// Detaches a replica from membership and fans a remove-sub-channel
    /// message to every live channel. Returns the
    /// removed replica plus the channel handles that must each
    /// acknowledge before the descriptor can be closed.
    pub fn take_replica_for_removal(&self, device_name: &str) -> Result<(Replica, Vec<ChannelHandle>)> {
        let mut inner = self.inner.try_lock().ok_or_else(|| {
            error::Busy {
                name: self.name.clone(),
            }
            .build()
        })?;
        let pos = inner
            .replicas
            .iter()
            .position(|r| r.device_name == device_name)
            .ok_or_else(|| {
                error::ReplicaNotFound {
                    name: self.name.clone(),
                    replica: device_name.to_string(),
                }
                .build()
            })?;
        let replica = inner.replicas.remove(pos);
        let channels: Vec<ChannelHandle> = inner.channels.values().cloned().collect();
        for channel in &channels {
            channel.remove_sub_channel(replica.id);
        }
        Ok((replica, channels))
    }

    /// Returns the channel for `thread`, creating it (and installing a
    /// sub-channel per current replica) if this is the thread's first I/O
    /// against the volume.
    pub fn channel_for(&self, thread: &ThreadHandle) -> Result<ChannelHandle> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.channels.get(&thread.id()) {
            return Ok(existing.clone());
        }
        let channel = ChannelHandle::new(thread.clone());
        for replica in &inner.replicas {
            let handle = replica.open_sub_channel().context(error::OpenReplica {
                name: self.name.clone(),
                replica: replica.device_name.clone(),
            })?;
            channel.install_sub_channel(replica.id, handle, replica.state);
        }
        inner.channels.insert(thread.id(), channel.clone());
        Ok(channel)
    }

    pub fn all_channels(&self) -> Vec<ChannelHandle> {
        self.inner.lock().channels.values().cloned().collect()
    }

    pub fn pause_controller(&self) -> PauseController {
        PauseController::new(self.all_channels())
    }

    /// Submits one client I/O on behalf of `thread`. Lazily attaches the
    /// calling thread's channel first.
    pub async fn submit(self: &Arc<Self>, thread: &ThreadHandle, io: VolumeIo) -> Result<VolumeIoResult> {
        ensure!(
            self.state() != VolumeState::Offline,
            error::Shutdown {
                name: self.name.clone()
            }
        );
        let channel = self.channel_for(thread)?;
        let (result, drained_pause) = dispatch::submit(channel, self.in_flight.clone(), io).await;
        if drained_pause {
            self.pause_controller().check_complete();
        }
        Ok(result)
    }

    /// True once every declared replica is attached and geometry agrees.
    pub fn ready_to_publish(&self) -> bool {
        let inner = self.inner.lock();
        inner.replicas.len() == self.declared_replicas && inner.geometry.is_some()
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "volume({}, state={:?})", self.name, self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DescriptorGuard, MemBlockDevice, Thread};
    use crate::volume::replica::Locality;

    fn attach(volume: &Arc<Volume>, thread: &ThreadHandle, name: &str) -> Replica {
        let device = Arc::new(MemBlockDevice::new(name, 512, 64));
        let descriptor = DescriptorGuard::open(device, thread.clone()).unwrap();
        volume.reconcile_geometry(descriptor.geometry()).unwrap();
        let replica = Replica {
            id: volume.alloc_replica_id(),
            device_name: name.to_string(),
            descriptor,
            state: ReplicaState::Rw,
            locality: Locality::Local,
        };
        volume.push_replica(replica.clone()).unwrap();
        replica
    }

    #[test]
    fn reconcile_geometry_rejects_mismatch() {
        let volume = Volume::new("v", 2);
        volume
            .reconcile_geometry(Geometry { block_size: 512, num_blocks: 100 })
            .unwrap();
        let err = volume
            .reconcile_geometry(Geometry { block_size: 4096, num_blocks: 100 })
            .unwrap_err();
        assert!(matches!(err, Error::GeometryMismatch { .. }));
    }

    #[test]
    fn push_replica_installs_into_every_live_channel() {
        let volume = Volume::new("v", 2);
        let thread = Thread::spawn("t").handle();
        let channel = volume.channel_for(&thread).unwrap();
        assert_eq!(channel.num_sub_channels(), 0);
        attach(&volume, &thread, "r1");
        assert_eq!(channel.num_sub_channels(), 1);
    }

    #[test]
    fn channel_for_is_created_once_per_thread() {
        let volume = Volume::new("v", 1);
        let thread = Thread::spawn("t").handle();
        let a = volume.channel_for(&thread).unwrap();
        let b = volume.channel_for(&thread).unwrap();
        assert_eq!(a.thread.id(), b.thread.id());
        assert_eq!(volume.all_channels().len(), 1);
    }

    #[test]
    fn ready_to_publish_requires_every_declared_replica() {
        let volume = Volume::new("v", 2);
        let thread = Thread::spawn("t").handle();
        assert!(!volume.ready_to_publish());
        attach(&volume, &thread, "r1");
        assert!(!volume.ready_to_publish());
        attach(&volume, &thread, "r2");
        assert!(volume.ready_to_publish());
    }

    #[test]
    fn take_replica_for_removal_updates_every_channel() {
        let volume = Volume::new("v", 1);
        let thread = Thread::spawn("t").handle();
        let channel = volume.channel_for(&thread).unwrap();
        let replica = attach(&volume, &thread, "r1");
        assert_eq!(channel.num_sub_channels(), 1);
        let (removed, channels) = volume.take_replica_for_removal("r1").unwrap();
        assert_eq!(removed.id, replica.id);
        assert_eq!(channels.len(), 1);
        assert_eq!(channel.num_sub_channels(), 0);
        assert!(matches!(
            volume.take_replica_for_removal("r1").unwrap_err(),
            Error::ReplicaNotFound { .. }
        ));
    }

    #[test]
    fn push_replica_reports_busy_when_membership_is_locked_elsewhere() {
        let volume = Volume::new("v", 2);
        let thread = Thread::spawn("t").handle();
        let device = Arc::new(MemBlockDevice::new("r1", 512, 64));
        let descriptor = DescriptorGuard::open(device, thread.clone()).unwrap();
        volume.reconcile_geometry(descriptor.geometry()).unwrap();
        let replica = Replica {
            id: volume.alloc_replica_id(),
            device_name: "r1".to_string(),
            descriptor,
            state: ReplicaState::Rw,
            locality: Locality::Local,
        };

        let _guard = volume.inner.lock();
        let err = volume.push_replica(replica).unwrap_err();
        assert!(matches!(err, Error::Busy { .. }));
    }

    #[test]
    fn take_replica_for_removal_reports_busy_when_membership_is_locked_elsewhere() {
        let volume = Volume::new("v", 1);
        let thread = Thread::spawn("t").handle();
        attach(&volume, &thread, "r1");

        let _guard = volume.inner.lock();
        let err = volume.take_replica_for_removal("r1").unwrap_err();
        assert!(matches!(err, Error::Busy { .. }));
    }
}
