//! One VolumeChannel per (Volume, thread) pair. [`ChannelState`] -- the
//! sub-channel list, read cursor, and pause queue -- lives behind a plain
//! mutex rather than behind the owning thread's mailbox: both the owning
//! thread's dispatch path and cross-thread membership calls (attach,
//! detach, state change) reach it directly through [`ChannelHandle::with_state`].
//! Every such access is a short, synchronous map/vec mutation that never
//! spans an `.await`, so contention is brief even though it isn't
//! serialized through a message queue the way descriptor close is.

use super::{
    io::{IoBuffer, IoStatus, VolumeIo},
    replica::ReplicaState,
};
use crate::core::{BlockDeviceHandle, IoType, ThreadHandle};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::oneshot;

/// A channel's handle onto one replica.
pub struct BaseSubChannel {
    pub replica_id: u64,
    pub handle: Arc<dyn BlockDeviceHandle>,
    pub state: ReplicaState,
    /// Bytes-in-flight counter used by the read balancer; blocks
    /// are tracked in raw byte units here, the balancer doesn't care.
    pub bandwidth: u64,
}

impl BaseSubChannel {
    pub fn is_rw(&self) -> bool {
        matches!(self.state, ReplicaState::Rw)
    }
}

#[cfg(test)]
impl BaseSubChannel {
    pub fn new_for_test(replica_id: u64, state: ReplicaState) -> Self {
        use crate::core::block_device::BlockDevice;
        use crate::core::mem_device::MemBlockDevice;
        let dev = MemBlockDevice::new(&format!("test-{replica_id}"), 512, 64);
        Self {
            replica_id,
            handle: dev.open_handle().unwrap().into(),
            state,
            bandwidth: 0,
        }
    }
}

/// An IO suspended because its channel is paused, replayed in FIFO
/// order through the normal submit path on unpause.
pub struct PendingIo {
    pub io: VolumeIo,
    pub reply: oneshot::Sender<super::io::VolumeIoResult>,
}

/// Thread-confined, mutable state of one VolumeChannel.
pub struct ChannelState {
    pub sub_channels: Vec<BaseSubChannel>,
    pub read_cursor: usize,
    pub bandwidth_max: u64,
    pub paused: bool,
    pub suspended: VecDeque<PendingIo>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            sub_channels: Vec::new(),
            read_cursor: 0,
            bandwidth_max: 0,
            paused: false,
            suspended: VecDeque::new(),
        }
    }
}

/// The cross-thread-visible half of a VolumeChannel: atomics other threads
/// may read lock-free, the owning thread's handle (used to close its
/// descriptor on the right thread), and the sub-channel/pause state behind
/// a mutex reachable from any thread via [`ChannelHandle::with_state`].
#[derive(Clone)]
pub struct ChannelHandle {
    pub thread: ThreadHandle,
    pub in_flight: Arc<AtomicU64>,
    pub paused: Arc<AtomicBool>,
    pub pause_complete: Arc<AtomicBool>,
    state: Arc<Mutex<ChannelState>>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

impl ChannelHandle {
    pub fn new(thread: ThreadHandle) -> Self {
        Self {
            thread,
            in_flight: Arc::new(AtomicU64::new(0)),
            paused: Arc::new(AtomicBool::new(false)),
            pause_complete: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(ChannelState::new())),
        }
    }

    pub fn num_sub_channels(&self) -> usize {
        self.state.lock().sub_channels.len()
    }

    /// Installs a new sub-channel, mirroring an addition to the volume's
    /// membership.
    pub fn install_sub_channel(
        &self,
        replica_id: u64,
        handle: Arc<dyn BlockDeviceHandle>,
        state: ReplicaState,
    ) {
        let mut s = self.state.lock();
        s.sub_channels.push(BaseSubChannel {
            replica_id,
            handle,
            state,
            bandwidth: 0,
        });
    }

    /// Updates the participation state of an installed sub-channel.
    pub fn set_sub_channel_state(&self, replica_id: u64, new_state: ReplicaState) {
        let mut s = self.state.lock();
        if let Some(sub) = s
            .sub_channels
            .iter_mut()
            .find(|c| c.replica_id == replica_id)
        {
            sub.state = new_state;
        }
    }

    /// Removes a sub-channel, clearing any cursor pointing at it.
    pub fn remove_sub_channel(&self, replica_id: u64) {
        let mut s = self.state.lock();
        if let Some(pos) = s
            .sub_channels
            .iter()
            .position(|c| c.replica_id == replica_id)
        {
            s.sub_channels.remove(pos);
            if s.read_cursor >= s.sub_channels.len() {
                s.read_cursor = 0;
            }
        }
    }

    /// Sets the paused flag; if the channel is already idle this
    /// immediately flags pause-complete and returns `true` so the caller
    /// can trigger the volume's check-complete routine.
    pub fn begin_pause(&self) -> bool {
        self.paused.store(true, Ordering::SeqCst);
        self.state.lock().paused = true;
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            self.pause_complete.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Clears paused/pause-complete and drains the suspended queue,
    /// returning the queued IOs to be resubmitted through the normal
    /// submit path in FIFO order.
    pub fn end_pause(&self) -> Vec<PendingIo> {
        self.paused.store(false, Ordering::SeqCst);
        self.pause_complete.store(false, Ordering::SeqCst);
        let mut s = self.state.lock();
        s.paused = false;
        s.suspended.drain(..).collect()
    }

    /// Runs `f` against the channel's state under its mutex. Callable from
    /// any thread, not just the one that owns this channel; the closure
    /// must be synchronous and fast since it holds the lock for its
    /// duration.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ChannelState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Increments the channel's in-flight counter. Call sites also bump
    /// the volume-wide counter separately.
    pub fn begin_io(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the in-flight counter; if this channel is paused and the
    /// counter has reached zero, flags pause-complete and reports that the
    /// caller should trigger check-complete.
    pub fn end_io(&self) -> bool {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "in-flight counter underflow");
        if self.paused.load(Ordering::SeqCst) && prev - 1 == 0 {
            self.pause_complete.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

/// Worst status observed while fanning an IO out across sub-channels.
pub fn combine(acc: IoStatus, next: IoStatus) -> IoStatus {
    acc.worst(next)
}

/// Classifies an IO type purely for readability at call sites.
pub fn is_write_class(io_type: IoType) -> bool {
    matches!(io_type, IoType::Write | IoType::Flush | IoType::Unmap)
}

/// A minimal accessor used by the dispatcher to know which buffer kind it
/// is handling without matching on `VolumeIo` fields directly everywhere.
pub fn as_write_bytes(buf: &IoBuffer) -> Option<&[u8]> {
    match buf {
        IoBuffer::Write(b) => Some(b.as_ref()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::Thread, volume::io::VolumeIo};

    fn handle() -> ChannelHandle {
        let thread = Thread::spawn("test");
        ChannelHandle::new(thread.handle())
    }

    #[test]
    fn install_and_remove_tracks_count() {
        let channel = handle();
        assert_eq!(channel.num_sub_channels(), 0);
        let sub = BaseSubChannel::new_for_test(1, ReplicaState::Rw);
        channel.install_sub_channel(1, sub.handle, ReplicaState::Rw);
        assert_eq!(channel.num_sub_channels(), 1);
        channel.remove_sub_channel(1);
        assert_eq!(channel.num_sub_channels(), 0);
    }

    #[test]
    fn set_sub_channel_state_updates_participation() {
        let channel = handle();
        let sub = BaseSubChannel::new_for_test(7, ReplicaState::WriteOnly);
        channel.install_sub_channel(7, sub.handle, ReplicaState::WriteOnly);
        channel.set_sub_channel_state(7, ReplicaState::Rw);
        channel.with_state(|s| {
            assert!(s.sub_channels[0].is_rw());
        });
    }

    #[test]
    fn begin_pause_on_idle_channel_completes_immediately() {
        let channel = handle();
        assert!(channel.begin_pause());
        assert!(channel.pause_complete.load(Ordering::SeqCst));
    }

    #[test]
    fn begin_pause_with_in_flight_io_defers_completion() {
        let channel = handle();
        channel.begin_io();
        assert!(!channel.begin_pause());
        assert!(channel.end_io());
        assert!(channel.pause_complete.load(Ordering::SeqCst));
    }

    #[test]
    fn end_pause_drains_suspended_queue_in_order() {
        let channel = handle();
        channel.begin_pause();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        channel.with_state(|s| {
            s.suspended.push_back(PendingIo { io: VolumeIo::flush(), reply: tx1 });
            s.suspended.push_back(PendingIo { io: VolumeIo::reset(), reply: tx2 });
        });
        let drained = channel.end_pause();
        assert_eq!(drained.len(), 2);
        assert!(!channel.paused.load(Ordering::SeqCst));
    }

    #[test]
    fn combine_keeps_worst_status() {
        assert_eq!(combine(IoStatus::Success, IoStatus::DeviceFailed), IoStatus::DeviceFailed);
        assert_eq!(combine(IoStatus::Success, IoStatus::Success), IoStatus::Success);
    }

    #[test]
    fn is_write_class_matches_write_bearing_io_types() {
        assert!(is_write_class(IoType::Write));
        assert!(is_write_class(IoType::Flush));
        assert!(is_write_class(IoType::Unmap));
        assert!(!is_write_class(IoType::Read));
        assert!(!is_write_class(IoType::Reset));
    }
}
