//! The base device proxy. This module defines the interface
//! the volume engine uses to talk to a single underlying block device; it
//! never depends on a concrete transport. Production backends (AIO, NVMe,
//! uring) are external to this core and simply implement [`BlockDevice`].

use async_trait::async_trait;
use nix::errno::Errno;
use snafu::Snafu;
use std::fmt::Debug;

/// Errors surfaced by the base device proxy.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum CoreError {
    #[snafu(display("device '{}' not found", name))]
    DeviceNotFound { name: String },
    #[snafu(display("device '{}' is already claimed by another module", name))]
    AlreadyClaimed { name: String },
    #[snafu(display("device '{}' is out of capacity, retry later", name))]
    Exhausted { name: String },
    #[snafu(display("I/O against device '{}' failed: {}", name, errno))]
    DeviceFailed { name: String, errno: Errno },
    #[snafu(display("device '{}' must be closed on its home thread", name))]
    WrongThread { name: String },
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Kind of primitive a [`VolumeIo`](crate::volume::io::VolumeIo) is carrying.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IoType {
    Read,
    Write,
    Flush,
    Unmap,
    Reset,
}

/// Geometry reported by a device at open time. All replicas of a volume
/// must agree on this.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Geometry {
    pub block_size: u64,
    pub num_blocks: u64,
}

/// A named, openable block device. One `BlockDevice` may back many
/// [`BlockDeviceHandle`]s, one per thread that opens it.
#[async_trait]
pub trait BlockDevice: Debug + Send + Sync {
    /// Stable name used to look the device up again (e.g. `lvs1/v1`).
    fn device_name(&self) -> &str;

    fn geometry(&self) -> Geometry;

    /// Claims exclusive access for the volume module. Returns false if
    /// already claimed.
    fn claim(&self) -> bool;

    fn unclaim(&self);

    /// Opens a thread-local I/O handle. Must be called once per thread
    /// that intends to issue I/O.
    fn open_handle(&self) -> Result<Box<dyn BlockDeviceHandle>>;
}

/// Resolves a device name to an openable [`BlockDevice`]. Stands in for
/// the base layer's bdev lookup table.
pub trait DeviceCatalog: Debug + Send + Sync {
    fn lookup(&self, name: &str) -> Option<std::sync::Arc<dyn BlockDevice>>;
}

/// A thread-local handle onto a [`BlockDevice`]. All primitives are
/// non-blocking: the async fn suspends the calling task at the completion
/// boundary, which stands in for a completion callback on a cooperative
/// single-threaded reactor.
#[async_trait]
pub trait BlockDeviceHandle: Debug + Send + Sync {
    fn device_name(&self) -> &str;

    async fn readv(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    async fn writev(&self, offset: u64, buf: &[u8]) -> Result<()>;

    async fn flush(&self) -> Result<()>;

    async fn unmap(&self, offset: u64, len: u64) -> Result<()>;

    async fn reset(&self) -> Result<()>;
}
