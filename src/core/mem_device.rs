//! An in-memory [`BlockDevice`] used by the test suite, standing in for a
//! real AIO/NVMe/malloc backend.

use crate::core::block_device::{
    BlockDevice, BlockDeviceHandle, CoreError, DeviceCatalog, Geometry, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

/// Backing store shared by every handle opened against the same device.
struct MemStore {
    name: String,
    geometry: Geometry,
    claimed: AtomicBool,
    data: Mutex<Vec<u8>>,
    /// Remaining number of primitives to fail with `CoreError::Exhausted`
    /// before falling through to normal behaviour. Set by
    /// [`MemBlockDevice::inject_exhaustion`].
    exhausted_countdown: AtomicU32,
}

/// An in-memory block device: a fixed-size byte buffer behind a mutex.
#[derive(Clone)]
pub struct MemBlockDevice {
    inner: Arc<MemStore>,
}

impl Debug for MemBlockDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "mem:{}", self.inner.name)
    }
}

impl MemBlockDevice {
    pub fn new(name: &str, block_size: u64, num_blocks: u64) -> Self {
        let len = (block_size * num_blocks) as usize;
        Self {
            inner: Arc::new(MemStore {
                name: name.to_string(),
                geometry: Geometry {
                    block_size,
                    num_blocks,
                },
                claimed: AtomicBool::new(false),
                data: Mutex::new(vec![0u8; len]),
                exhausted_countdown: AtomicU32::new(0),
            }),
        }
    }

    /// Test helper: read the full device contents out (used to assert
    /// mirrored writes landed identically on every replica).
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        self.inner.data.lock().clone()
    }

    /// Test helper: makes the next `n` primitives issued against any handle
    /// opened from this device fail with `CoreError::Exhausted`, so the
    /// dispatcher's retry-on-exhaustion path can be exercised without a real
    /// allocator.
    pub fn inject_exhaustion(&self, n: u32) {
        self.inner.exhausted_countdown.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlockDevice for MemBlockDevice {
    fn device_name(&self) -> &str {
        &self.inner.name
    }

    fn geometry(&self) -> Geometry {
        self.inner.geometry
    }

    fn claim(&self) -> bool {
        self.inner
            .claimed
            .compare_exchange(
                false,
                true,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn unclaim(&self) {
        self.inner.claimed.store(false, Ordering::SeqCst);
    }

    fn open_handle(&self) -> Result<Box<dyn BlockDeviceHandle>> {
        Ok(Box::new(MemHandle {
            inner: self.inner.clone(),
        }))
    }
}

struct MemHandle {
    inner: Arc<MemStore>,
}

impl Debug for MemHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "mem-handle:{}", self.inner.name)
    }
}

impl MemHandle {
    /// Consumes one unit of injected exhaustion, if any remain, and reports
    /// whether this call should fail as exhausted.
    fn take_exhaustion(&self) -> bool {
        let mut cur = self.inner.exhausted_countdown.load(Ordering::SeqCst);
        while cur > 0 {
            match self.inner.exhausted_countdown.compare_exchange(
                cur,
                cur - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }
}

#[async_trait]
impl BlockDeviceHandle for MemHandle {
    fn device_name(&self) -> &str {
        &self.inner.name
    }

    async fn readv(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if self.take_exhaustion() {
            return Err(CoreError::Exhausted {
                name: self.inner.name.clone(),
            });
        }
        let data = self.inner.data.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(CoreError::DeviceFailed {
                name: self.inner.name.clone(),
                errno: nix::errno::Errno::EINVAL,
            });
        }
        buf.copy_from_slice(&data[start .. end]);
        Ok(())
    }

    async fn writev(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.take_exhaustion() {
            return Err(CoreError::Exhausted {
                name: self.inner.name.clone(),
            });
        }
        let mut data = self.inner.data.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(CoreError::DeviceFailed {
                name: self.inner.name.clone(),
                errno: nix::errno::Errno::EINVAL,
            });
        }
        data[start .. end].copy_from_slice(buf);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn unmap(&self, offset: u64, len: u64) -> Result<()> {
        if self.take_exhaustion() {
            return Err(CoreError::Exhausted {
                name: self.inner.name.clone(),
            });
        }
        let mut data = self.inner.data.lock();
        let start = offset as usize;
        let end = start + len as usize;
        if end > data.len() {
            return Err(CoreError::DeviceFailed {
                name: self.inner.name.clone(),
                errno: nix::errno::Errno::EINVAL,
            });
        }
        data[start .. end].iter_mut().for_each(|b| *b = 0);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }
}

/// A [`DeviceCatalog`] backed by an in-process map, used by tests and by
/// any deployment that keeps every replica's device local.
#[derive(Debug, Default)]
pub struct MemDeviceCatalog {
    devices: Mutex<HashMap<String, MemBlockDevice>>,
}

impl MemDeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device so it can later be found by `lookup`, and adds
    /// it for convenience of tests that also want a direct handle.
    pub fn insert(&self, device: MemBlockDevice) {
        self.devices
            .lock()
            .insert(device.device_name().to_string(), device);
    }

    /// Convenience for tests: creates, registers, and returns a device of
    /// the given geometry.
    pub fn create(&self, name: &str, block_size: u64, num_blocks: u64) -> MemBlockDevice {
        let device = MemBlockDevice::new(name, block_size, num_blocks);
        self.insert(device.clone());
        device
    }
}

impl DeviceCatalog for MemDeviceCatalog {
    fn lookup(&self, name: &str) -> Option<Arc<dyn BlockDevice>> {
        self.devices
            .lock()
            .get(name)
            .map(|d| Arc::new(d.clone()) as Arc<dyn BlockDevice>)
    }
}
