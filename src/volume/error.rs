//! Volume-level errors: one enum covering membership, geometry, lifecycle,
//! and replication failures, with `source` chains into the subsystem
//! (core device, logical-volume store, rebuild) that actually failed.

use crate::{core::CoreError, lvs::LvsError, rebuild::RebuildError};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("volume '{}' does not exist", name))]
    NotFound { name: String },
    #[snafu(display("volume '{}' already exists", name))]
    NameExists { name: String },
    #[snafu(display(
        "replica '{}' of volume '{}' does not exist",
        replica,
        name
    ))]
    ReplicaNotFound { name: String, replica: String },
    #[snafu(display(
        "volume '{}' already has {} of {} declared replicas",
        name,
        have,
        want
    ))]
    TooManyReplicas { name: String, have: usize, want: usize },
    #[snafu(display(
        "replica '{}' geometry ({} x {}) disagrees with volume '{}' ({} x {})",
        replica,
        block_size,
        num_blocks,
        name,
        vol_block_size,
        vol_num_blocks
    ))]
    GeometryMismatch {
        name: String,
        replica: String,
        block_size: u64,
        num_blocks: u64,
        vol_block_size: u64,
        vol_num_blocks: u64,
    },
    #[snafu(display(
        "volume '{}' is in state {:?}, which does not permit this operation",
        name,
        state
    ))]
    InvalidState { name: String, state: String },
    #[snafu(display("volume '{}' mutex contended by a concurrent state change", name))]
    Busy { name: String },
    #[snafu(display("operation on '{}' refused: module shutdown in progress", name))]
    Shutdown { name: String },
    #[snafu(display("failed to open replica '{}' of volume '{}': {}", replica, name, source))]
    OpenReplica {
        name: String,
        replica: String,
        source: CoreError,
    },
    #[snafu(display("snapshot '{}' of volume '{}' partially failed: {:?}", snapshot, name, failed))]
    PartialSnapshot {
        name: String,
        snapshot: String,
        failed: Vec<String>,
    },
    #[snafu(display("logical volume store error while handling '{}': {}", name, source))]
    Lvs { name: String, source: LvsError },
    #[snafu(display("rebuild into replica '{}' of volume '{}' failed: {}", replica, name, source))]
    Rebuild {
        name: String,
        replica: String,
        source: RebuildError,
    },
    #[snafu(display("volume '{}' has no RW replica to rebuild from", name))]
    NoRebuildDonor { name: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
