//! Replica lifecycle: attach a local or remote
//! replica through the common attach path, wire an online add through
//! the pause/snapshot/rebuild/relink sequence, or remove a replica from
//! every live channel.

use super::{
    error::{self, Result},
    replica::{Locality, Replica, ReplicaState},
    volume::{Volume, VolumeState},
};
use crate::{
    core::{BlockDevice, CoreError, DescriptorGuard, DeviceCatalog, ThreadHandle},
    lvs::LogicalVolumeStore,
    nvmf::NvmfTarget,
    rebuild::{self, RebuildJob},
};
use snafu::{IntoError, ResultExt};
use std::sync::Arc;

/// Outcome of a successful attach: the new replica, and whether this
/// attach was the one that brought the volume to Online.
#[derive(Debug)]
pub struct AttachOutcome {
    pub replica: Replica,
    pub became_online: bool,
}

/// Adds a local replica, synthesizing its device name from the
/// logical-volume-store name and the replica name.
pub async fn add_local_replica(
    volume: &Arc<Volume>,
    thread: &ThreadHandle,
    catalog: &dyn DeviceCatalog,
    lvs_name: &str,
    replica_name: &str,
) -> Result<AttachOutcome> {
    let device_name = format!("{lvs_name}/{replica_name}");
    let device = catalog.lookup(&device_name).ok_or_else(|| {
        error::OpenReplica {
            name: volume.name.clone(),
            replica: device_name.clone(),
        }
        .into_error(CoreError::DeviceNotFound {
            name: device_name.clone(),
        })
    })?;
    common_attach(volume, thread, device_name, device, Locality::Local).await
}

/// Adds a remote replica: connects the remote NVMe subsystem locally via
/// `nvmf`, then runs the common attach path.
pub async fn add_remote_replica(
    volume: &Arc<Volume>,
    thread: &ThreadHandle,
    nvmf: &dyn NvmfTarget,
    address: &str,
    nvmf_port: u16,
    control_port: u16,
    remote_nqn: &str,
    local_name: &str,
) -> Result<AttachOutcome> {
    let device = nvmf
        .connect_remote(address, nvmf_port, remote_nqn, local_name)
        .context(error::OpenReplica {
            name: volume.name.clone(),
            replica: local_name.to_string(),
        })?;
    common_attach(
        volume,
        thread,
        local_name.to_string(),
        device,
        Locality::Remote {
            address: address.to_string(),
            nvmf_port,
            control_port,
            remote_nqn: remote_nqn.to_string(),
        },
    )
    .await
}

/// Opens and claims `device`, checks its geometry against the volume's,
/// and inserts it into membership. A replica joining an already-Online
/// volume starts WriteOnly -- the caller is responsible for following up
/// with [`online_add`] to bring it to RW.
async fn common_attach(
    volume: &Arc<Volume>,
    thread: &ThreadHandle,
    device_name: String,
    device: Arc<dyn BlockDevice>,
    locality: Locality,
) -> Result<AttachOutcome> {
    let was_online = volume.state() == VolumeState::Online;
    snafu::ensure!(
        was_online || volume.replica_count() < volume.declared_replicas,
        error::TooManyReplicas {
            name: volume.name.clone(),
            have: volume.replica_count(),
            want: volume.declared_replicas,
        }
    );

    let descriptor = DescriptorGuard::open(device, thread.clone()).context(error::OpenReplica {
        name: volume.name.clone(),
        replica: device_name.clone(),
    })?;
    if let Err(e) = volume.reconcile_geometry(descriptor.geometry()) {
        descriptor.close(thread).await;
        return Err(e);
    }

    let id = volume.alloc_replica_id();
    let state = if was_online {
        ReplicaState::WriteOnly
    } else {
        ReplicaState::Rw
    };
    let replica = Replica {
        id,
        device_name,
        descriptor,
        state,
        locality,
    };
    volume.push_replica(replica.clone())?;

    let became_online = !was_online && volume.ready_to_publish();
    if became_online {
        volume.set_state(VolumeState::Online);
    }

    Ok(AttachOutcome {
        replica,
        became_online,
    })
}

/// Runs the online-add sequence: snapshots
/// every other RW replica, rebuilds the new replica from one of those
/// snapshots, links it into the chain, and promotes it to RW. The pause
/// is held for the whole sequence and always released, success or not.
pub async fn online_add(
    volume: Arc<Volume>,
    replica_id: u64,
    snapshot_name: &str,
    lvs: &dyn LogicalVolumeStore,
) -> Result<RebuildJob> {
    let pause = volume.pause_controller();
    pause.pause().await;
    let outcome = online_add_body(&volume, replica_id, snapshot_name, lvs).await;
    pause.unpause(&volume.in_flight);
    outcome
}

async fn online_add_body(
    volume: &Arc<Volume>,
    replica_id: u64,
    snapshot_name: &str,
    lvs: &dyn LogicalVolumeStore,
) -> Result<RebuildJob> {
    let target = volume
        .replicas()
        .into_iter()
        .find(|r| r.id == replica_id)
        .ok_or_else(|| {
            error::ReplicaNotFound {
                name: volume.name.clone(),
                replica: replica_id.to_string(),
            }
            .build()
        })?;

    let donors: Vec<Replica> = volume
        .replicas()
        .into_iter()
        .filter(|r| r.id != replica_id && r.is_rw())
        .collect();
    for donor in &donors {
        lvs.snapshot(&donor.device_name, snapshot_name)
            .await
            .context(error::Lvs {
                name: volume.name.clone(),
            })?;
    }
    // Spread rebuild load across donors rather than always hammering the
    // first RW replica when several are eligible.
    use rand::seq::SliceRandom;
    let donor = donors.choose(&mut rand::thread_rng()).ok_or_else(|| {
        error::NoRebuildDonor {
            name: volume.name.clone(),
        }
        .build()
    })?;
    let donor_snapshot = format!("{}@{}", donor.device_name, snapshot_name);

    let job = RebuildJob::new(donor_snapshot.clone(), target.device_name.clone());
    rebuild::copy_allocated_clusters(&job, lvs)
        .await
        .context(error::Rebuild {
            name: volume.name.clone(),
            replica: target.device_name.clone(),
        })?;
    rebuild::link(&target.device_name, &donor_snapshot, lvs)
        .await
        .context(error::Rebuild {
            name: volume.name.clone(),
            replica: target.device_name.clone(),
        })?;

    volume.set_replica_state(replica_id, ReplicaState::Rw);
    Ok(job)
}

/// Detaches a replica from membership, removes its sub-channel from every
/// live channel, and closes its descriptor on its home thread.
/// `take_replica_for_removal` does the membership update and the
/// sub-channel removal itself, synchronously, before returning -- the
/// channel list it hands back is only needed by the caller to know how
/// many callbacks to expect, not to drive the removal.
pub async fn remove_replica(volume: &Arc<Volume>, device_name: &str) -> Result<()> {
    let (replica, channels) = volume.take_replica_for_removal(device_name)?;
    let _ = channels.len();
    let home = replica.descriptor.home_thread().clone();
    replica.descriptor.close(&home).await;
    Ok(())
}
