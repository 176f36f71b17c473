//! Opening, claiming, and closing a base device. Close must run on
//! the descriptor's home thread; a caller on another thread has its close
//! request posted there.

use crate::core::{
    block_device::{BlockDevice, CoreError, Geometry, Result},
    thread::ThreadHandle,
};
use std::{fmt::Debug, sync::Arc};

/// A claimed, opened device bound to the thread that opened it (the "home
/// thread").
#[derive(Clone)]
pub struct DescriptorGuard {
    device: Arc<dyn BlockDevice>,
    home_thread: ThreadHandle,
}

impl Debug for DescriptorGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "descriptor({}, home={:?})",
            self.device.device_name(),
            self.home_thread
        )
    }
}

impl DescriptorGuard {
    /// Opens and claims `device` on the calling thread, which becomes its
    /// home thread.
    pub fn open(
        device: Arc<dyn BlockDevice>,
        home_thread: ThreadHandle,
    ) -> Result<Self> {
        if !device.claim() {
            return Err(CoreError::AlreadyClaimed {
                name: device.device_name().to_string(),
            });
        }
        Ok(Self {
            device,
            home_thread,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.device.geometry()
    }

    pub fn device_name(&self) -> &str {
        self.device.device_name()
    }

    pub fn device(&self) -> Arc<dyn BlockDevice> {
        self.device.clone()
    }

    pub fn home_thread(&self) -> &ThreadHandle {
        &self.home_thread
    }

    /// Closes the descriptor, releasing the claim. If called from a thread
    /// other than the home thread, the close is posted there instead of run
    /// in place.
    pub async fn close(self, caller: &ThreadHandle) {
        if caller.id() == self.home_thread.id() {
            self.device.unclaim();
            return;
        }
        let device = self.device.clone();
        self.home_thread
            .call(move || device.unclaim())
            .await;
    }
}
