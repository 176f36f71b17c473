//! The pause controller: quiesces every channel of a
//! volume before a membership change (add/remove replica, snapshot,
//! rebuild handoff), then releases them again. Completion is detected by
//! an idempotent re-scan rather than a per-request countdown, so it is
//! safe to call `check_complete` redundantly from both `pause()` itself
//! and from the dispatcher whenever a channel's last in-flight I/O drains.

use super::{channel::ChannelHandle, dispatch};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{atomic::Ordering, Arc},
};
use tokio::sync::oneshot;

pub struct PauseController {
    channels: Vec<ChannelHandle>,
    callbacks: Mutex<VecDeque<oneshot::Sender<()>>>,
}

impl PauseController {
    pub fn new(channels: Vec<ChannelHandle>) -> Self {
        Self {
            channels,
            callbacks: Mutex::new(VecDeque::new()),
        }
    }

    pub fn channels(&self) -> &[ChannelHandle] {
        &self.channels
    }

    /// Quiesces every channel and resolves once every one of them has
    /// reported pause-complete.
    pub async fn pause(&self) {
        for channel in &self.channels {
            if channel.begin_pause() {
                self.check_complete();
            }
        }
        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().push_back(tx);
        self.check_complete();
        let _ = rx.await;
    }

    /// Re-scans every channel; if all are paused and drained, wakes every
    /// caller blocked in [`pause`]. Safe to call any number of times.
    pub fn check_complete(&self) {
        let all_done = self
            .channels
            .iter()
            .all(|c| c.paused.load(Ordering::SeqCst) && c.pause_complete.load(Ordering::SeqCst));
        if !all_done {
            return;
        }
        let mut callbacks = self.callbacks.lock();
        for cb in callbacks.drain(..) {
            let _ = cb.send(());
        }
    }

    /// Releases every channel and replays whatever was queued while it was
    /// paused. Replays run as detached tasks so `unpause`
    /// itself returns as soon as every channel has been told to resume.
    pub fn unpause(&self, volume_in_flight: &Arc<std::sync::atomic::AtomicU64>) {
        for channel in &self.channels {
            let queued = channel.end_pause();
            if queued.is_empty() {
                continue;
            }
            let channel = channel.clone();
            let volume_in_flight = volume_in_flight.clone();
            tokio::spawn(dispatch::replay_suspended(channel, volume_in_flight, queued));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Thread;

    fn idle_channel() -> ChannelHandle {
        let thread = Thread::spawn("test");
        ChannelHandle::new(thread.handle())
    }

    #[tokio::test]
    async fn pause_resolves_immediately_on_idle_channels() {
        let controller = PauseController::new(vec![idle_channel(), idle_channel()]);
        controller.pause().await;
        for channel in controller.channels() {
            assert!(channel.paused.load(Ordering::SeqCst));
            assert!(channel.pause_complete.load(Ordering::SeqCst));
        }
    }

    #[tokio::test]
    async fn pause_waits_for_in_flight_io_to_drain() {
        let channel = idle_channel();
        channel.begin_io();
        let controller = PauseController::new(vec![channel.clone()]);
        let pause_fut = controller.pause();
        tokio::pin!(pause_fut);
        assert!(futures::poll!(&mut pause_fut).is_pending());
        channel.end_io();
        controller.check_complete();
        pause_fut.await;
        assert!(channel.pause_complete.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unpause_clears_pause_flags() {
        let channel = idle_channel();
        let controller = PauseController::new(vec![channel.clone()]);
        controller.pause().await;
        controller.unpause(&Arc::new(std::sync::atomic::AtomicU64::new(0)));
        assert!(!channel.paused.load(Ordering::SeqCst));
        assert!(!channel.pause_complete.load(Ordering::SeqCst));
    }

    #[test]
    fn check_complete_is_idempotent_with_no_callbacks() {
        let controller = PauseController::new(vec![idle_channel()]);
        controller.check_complete();
        controller.check_complete();
    }
}
