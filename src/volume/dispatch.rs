//! The per-channel I/O dispatcher. `submit` is the
//! single entry point every client request goes through: it accounts for
//! in-flight I/O, honours a paused channel by queuing, and fans a request
//! out to the right sub-channels.

use super::{
    balancer,
    channel::{as_write_bytes, combine, ChannelHandle, ChannelState, PendingIo},
    io::{IoBuffer, IoStatus, VolumeIo, VolumeIoResult},
    replica::ReplicaState,
};
use crate::core::{block_device, BlockDeviceHandle, CoreError, IoType};
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tokio::sync::oneshot;

/// Total attempts (including the first) made against a sub-channel primitive
/// before a sustained `CoreError::Exhausted` is surfaced to the caller as a
/// real failure rather than retried transparently.
const EXHAUSTED_MAX_ATTEMPTS: u32 = 4;
const EXHAUSTED_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Submits `io` against `channel`. Returns the result plus a flag telling
/// the caller whether this request's completion just drove the channel's
/// pause to completion, so the volume's pause controller can be polled
/// without every caller re-deriving that condition itself.
pub async fn submit(
    channel: ChannelHandle,
    volume_in_flight: Arc<std::sync::atomic::AtomicU64>,
    io: VolumeIo,
) -> (VolumeIoResult, bool) {
    if channel.paused.load(Ordering::SeqCst) {
        let (tx, rx) = oneshot::channel();
        channel.with_state(|s: &mut ChannelState| {
            s.suspended.push_back(PendingIo { io, reply: tx })
        });
        let result = rx.await.unwrap_or(VolumeIoResult {
            status: IoStatus::DeviceFailed,
            data: None,
        });
        return (result, false);
    }
    dispatch_now(channel, volume_in_flight, io).await
}

async fn dispatch_now(
    channel: ChannelHandle,
    volume_in_flight: Arc<std::sync::atomic::AtomicU64>,
    mut io: VolumeIo,
) -> (VolumeIoResult, bool) {
    channel.begin_io();
    volume_in_flight.fetch_add(1, Ordering::SeqCst);

    let result = match io.io_type {
        IoType::Read => dispatch_read(&channel, &mut io).await,
        IoType::Write => dispatch_write(&channel, &io).await,
        IoType::Flush => dispatch_flush(&channel).await,
        IoType::Unmap => dispatch_unmap(&channel, &io).await,
        IoType::Reset => dispatch_reset(&channel).await,
    };

    let drained_pause = channel.end_io();
    volume_in_flight.fetch_sub(1, Ordering::SeqCst);
    (result, drained_pause)
}

/// Replays IOs queued while a channel was paused, in FIFO order, back
/// through the normal dispatch path.
pub async fn replay_suspended(
    channel: ChannelHandle,
    volume_in_flight: Arc<std::sync::atomic::AtomicU64>,
    queued: Vec<PendingIo>,
) {
    for pending in queued {
        let (result, _) =
            dispatch_now(channel.clone(), volume_in_flight.clone(), pending.io).await;
        let _ = pending.reply.send(result);
    }
}

fn read_targets(channel: &ChannelHandle, blocks: u64) -> Option<Arc<dyn BlockDeviceHandle>> {
    channel.with_state(|s| {
        let ChannelState {
            sub_channels,
            read_cursor,
            bandwidth_max,
            ..
        } = s;
        balancer::select_reader(sub_channels, read_cursor, bandwidth_max, blocks)
            .map(|idx| sub_channels[idx].handle.clone())
    })
}

async fn dispatch_read(channel: &ChannelHandle, io: &mut VolumeIo) -> VolumeIoResult {
    let blocks = io.len().max(1);
    let Some(handle) = read_targets(channel, blocks) else {
        return VolumeIoResult {
            status: IoStatus::NoReadableReplica,
            data: None,
        };
    };
    let offset = io.offset;
    let buf = match &mut io.buffer {
        IoBuffer::Read(b) => b,
        _ => unreachable!("read IO must carry a Read buffer"),
    };
    match readv_with_retry(&handle, offset, buf).await {
        Ok(()) => VolumeIoResult {
            status: IoStatus::Success,
            data: Some(buf.clone()),
        },
        Err(CoreError::Exhausted { .. }) => VolumeIoResult {
            status: IoStatus::Exhausted,
            data: None,
        },
        Err(_) => VolumeIoResult {
            status: IoStatus::DeviceFailed,
            data: None,
        },
    }
}

/// Retries a sub-channel primitive across transient `CoreError::Exhausted`
/// failures, sleeping briefly between attempts. Any other error, or
/// exhaustion that persists across every attempt, is returned to the
/// caller as-is.
async fn readv_with_retry(
    handle: &Arc<dyn BlockDeviceHandle>,
    offset: u64,
    buf: &mut [u8],
) -> block_device::Result<()> {
    for attempt in 1 ..= EXHAUSTED_MAX_ATTEMPTS {
        match handle.readv(offset, buf).await {
            Err(CoreError::Exhausted { .. }) if attempt < EXHAUSTED_MAX_ATTEMPTS => {
                tokio::time::sleep(EXHAUSTED_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
    unreachable!()
}

async fn writev_with_retry(
    handle: &Arc<dyn BlockDeviceHandle>,
    offset: u64,
    data: &[u8],
) -> block_device::Result<()> {
    for attempt in 1 ..= EXHAUSTED_MAX_ATTEMPTS {
        match handle.writev(offset, data).await {
            Err(CoreError::Exhausted { .. }) if attempt < EXHAUSTED_MAX_ATTEMPTS => {
                tokio::time::sleep(EXHAUSTED_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
    unreachable!()
}

async fn flush_with_retry(handle: &Arc<dyn BlockDeviceHandle>) -> block_device::Result<()> {
    for attempt in 1 ..= EXHAUSTED_MAX_ATTEMPTS {
        match handle.flush().await {
            Err(CoreError::Exhausted { .. }) if attempt < EXHAUSTED_MAX_ATTEMPTS => {
                tokio::time::sleep(EXHAUSTED_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
    unreachable!()
}

async fn unmap_with_retry(
    handle: &Arc<dyn BlockDeviceHandle>,
    offset: u64,
    len: u64,
) -> block_device::Result<()> {
    for attempt in 1 ..= EXHAUSTED_MAX_ATTEMPTS {
        match handle.unmap(offset, len).await {
            Err(CoreError::Exhausted { .. }) if attempt < EXHAUSTED_MAX_ATTEMPTS => {
                tokio::time::sleep(EXHAUSTED_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
    unreachable!()
}

async fn reset_with_retry(handle: &Arc<dyn BlockDeviceHandle>) -> block_device::Result<()> {
    for attempt in 1 ..= EXHAUSTED_MAX_ATTEMPTS {
        match handle.reset().await {
            Err(CoreError::Exhausted { .. }) if attempt < EXHAUSTED_MAX_ATTEMPTS => {
                tokio::time::sleep(EXHAUSTED_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
    unreachable!()
}

/// Every sub-channel that is still taking writes: Rw and WriteOnly alike.
fn write_targets(channel: &ChannelHandle) -> Vec<Arc<dyn BlockDeviceHandle>> {
    channel.with_state(|s| {
        s.sub_channels
            .iter()
            .filter(|c| !matches!(c.state, ReplicaState::Err))
            .map(|c| c.handle.clone())
            .collect()
    })
}

async fn dispatch_write(channel: &ChannelHandle, io: &VolumeIo) -> VolumeIoResult {
    let targets = write_targets(channel);
    let data = as_write_bytes(&io.buffer).expect("write IO must carry a Write buffer");
    let offset = io.offset;
    let outcomes =
        futures::future::join_all(targets.iter().map(|h| writev_with_retry(h, offset, data)))
            .await;
    status_from(outcomes)
}

async fn dispatch_flush(channel: &ChannelHandle) -> VolumeIoResult {
    let targets = write_targets(channel);
    let outcomes = futures::future::join_all(targets.iter().map(|h| flush_with_retry(h))).await;
    status_from(outcomes)
}

async fn dispatch_unmap(channel: &ChannelHandle, io: &VolumeIo) -> VolumeIoResult {
    let targets = write_targets(channel);
    let len = io.len();
    let offset = io.offset;
    let outcomes =
        futures::future::join_all(targets.iter().map(|h| unmap_with_retry(h, offset, len))).await;
    status_from(outcomes)
}

/// Reset is driven sequentially: the count of sub-channels reset so far is
/// tracked separately from the fan-out writes above, so each child has
/// acknowledged before the next one is issued.
async fn dispatch_reset(channel: &ChannelHandle) -> VolumeIoResult {
    let targets = write_targets(channel);
    let mut status = IoStatus::Success;
    let mut submitted = 0usize;
    for handle in &targets {
        submitted += 1;
        match reset_with_retry(handle).await {
            Ok(()) => {}
            Err(CoreError::Exhausted { .. }) => status = status.worst(IoStatus::Exhausted),
            Err(_) => status = status.worst(IoStatus::DeviceFailed),
        }
    }
    debug_assert_eq!(submitted, targets.len());
    VolumeIoResult { status, data: None }
}

fn status_from(outcomes: Vec<block_device::Result<()>>) -> VolumeIoResult {
    let status = outcomes.into_iter().fold(IoStatus::Success, |acc, res| {
        let next = match res {
            Ok(()) => IoStatus::Success,
            Err(CoreError::Exhausted { .. }) => IoStatus::Exhausted,
            Err(_) => IoStatus::DeviceFailed,
        };
        combine(acc, next)
    });
    VolumeIoResult { status, data: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{block_device::BlockDevice, mem_device::MemBlockDevice, Thread},
        volume::io::VolumeIo,
    };
    use std::sync::atomic::AtomicU64;

    fn channel_with(devices: &[(&str, ReplicaState)]) -> ChannelHandle {
        let thread = Thread::spawn("test");
        let channel = ChannelHandle::new(thread.handle());
        for (i, (name, state)) in devices.iter().enumerate() {
            let dev = MemBlockDevice::new(name, 512, 64);
            let handle: Arc<dyn BlockDeviceHandle> = dev.open_handle().unwrap().into();
            channel.install_sub_channel(i as u64, handle, *state);
        }
        channel
    }

    #[tokio::test]
    async fn write_fans_out_to_rw_and_write_only_but_not_err() {
        let channel = channel_with(&[
            ("a", ReplicaState::Rw),
            ("b", ReplicaState::WriteOnly),
            ("c", ReplicaState::Err),
        ]);
        let io = VolumeIo::write(0, &[0xAA; 64]);
        let (result, _) = submit(channel, Arc::new(AtomicU64::new(0)), io).await;
        assert_eq!(result.status, IoStatus::Success);
    }

    #[tokio::test]
    async fn read_selects_an_rw_replica_and_returns_its_bytes() {
        let channel = channel_with(&[("a", ReplicaState::Rw)]);
        // Prime the device with a known pattern via a write first.
        let write = VolumeIo::write(0, &[0x42; 16]);
        submit(channel.clone(), Arc::new(AtomicU64::new(0)), write).await;
        let read = VolumeIo::read(0, 16);
        let (result, _) = submit(channel, Arc::new(AtomicU64::new(0)), read).await;
        assert_eq!(result.status, IoStatus::Success);
        assert_eq!(result.data.unwrap().as_ref(), &[0x42; 16]);
    }

    #[tokio::test]
    async fn read_with_no_rw_replica_reports_no_readable_replica() {
        let channel = channel_with(&[("a", ReplicaState::WriteOnly)]);
        let io = VolumeIo::read(0, 16);
        let (result, _) = submit(channel, Arc::new(AtomicU64::new(0)), io).await;
        assert_eq!(result.status, IoStatus::NoReadableReplica);
    }

    #[tokio::test]
    async fn paused_channel_queues_io_until_unpaused() {
        let channel = channel_with(&[("a", ReplicaState::Rw)]);
        channel.begin_pause();
        let volume_in_flight = Arc::new(AtomicU64::new(0));
        let io = VolumeIo::flush();
        let submit_fut = submit(channel.clone(), volume_in_flight.clone(), io);
        tokio::pin!(submit_fut);
        // Still paused: the future must not resolve yet, so queue depth is 1.
        let queued = channel.with_state(|s| s.suspended.len());
        assert_eq!(queued, 0, "submit hasn't polled yet");
        let queued_after_poll = futures::poll!(&mut submit_fut);
        assert!(queued_after_poll.is_pending());
        let queued = channel.with_state(|s| s.suspended.len());
        assert_eq!(queued, 1);
        let drained = channel.end_pause();
        replay_suspended(channel, volume_in_flight, drained).await;
        let (result, _) = submit_fut.await;
        assert_eq!(result.status, IoStatus::Success);
    }

    #[tokio::test]
    async fn write_retries_past_transient_exhaustion_then_succeeds() {
        let thread = Thread::spawn("test");
        let channel = ChannelHandle::new(thread.handle());
        let dev = MemBlockDevice::new("a", 512, 64);
        dev.inject_exhaustion(EXHAUSTED_MAX_ATTEMPTS - 1);
        let handle: Arc<dyn BlockDeviceHandle> = dev.open_handle().unwrap().into();
        channel.install_sub_channel(0, handle, ReplicaState::Rw);

        let io = VolumeIo::write(0, &[0x11; 16]);
        let (result, _) = submit(channel, Arc::new(AtomicU64::new(0)), io).await;
        assert_eq!(result.status, IoStatus::Success);
        assert_eq!(&dev.snapshot_bytes()[0 .. 16], &[0x11; 16]);
    }

    #[tokio::test]
    async fn write_reports_exhausted_once_retries_are_used_up() {
        let thread = Thread::spawn("test");
        let channel = ChannelHandle::new(thread.handle());
        let dev = MemBlockDevice::new("a", 512, 64);
        dev.inject_exhaustion(EXHAUSTED_MAX_ATTEMPTS + 5);
        let handle: Arc<dyn BlockDeviceHandle> = dev.open_handle().unwrap().into();
        channel.install_sub_channel(0, handle, ReplicaState::Rw);

        let io = VolumeIo::write(0, &[0x22; 16]);
        let (result, _) = submit(channel, Arc::new(AtomicU64::new(0)), io).await;
        assert_eq!(result.status, IoStatus::Exhausted);
    }
}
