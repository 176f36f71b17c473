//! One outstanding client request. Submission is expressed as a single
//! async call rather than a hand-rolled completion-callback chain: the
//! `.await` point where the handle's primitive is invoked is where the
//! calling task actually suspends.

use crate::core::IoType;
use bytes::BytesMut;

/// Worst-observed status across a fanned-out write's children, or the
/// single status of a read.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IoStatus {
    Success,
    /// A base primitive failed against at least one replica.
    DeviceFailed,
    /// Read selection found no RW replica.
    NoReadableReplica,
    /// A base primitive reported resource exhaustion (e.g. a thin-provisioned
    /// store out of backing space) against at least one replica, and it was
    /// still exhausted after the dispatcher's retries.
    Exhausted,
}

impl IoStatus {
    /// Combines two child statuses, keeping the worse of the two. Success
    /// is the identity element.
    pub fn worst(self, other: IoStatus) -> IoStatus {
        use IoStatus::*;
        match (self, other) {
            (Success, x) | (x, Success) => x,
            (x, _) => x,
        }
    }
}

/// Payload carried by a [`VolumeIo`]: an input buffer for writes, an
/// output buffer for reads, or nothing for flush/unmap/reset.
#[derive(Debug)]
pub enum IoBuffer {
    Read(BytesMut),
    Write(BytesMut),
    Len(u64),
    None,
}

/// A single outstanding request submitted to a [`VolumeChannel`](super::channel::ChannelHandle).
#[derive(Debug)]
pub struct VolumeIo {
    pub io_type: IoType,
    pub offset: u64,
    pub buffer: IoBuffer,
}

impl VolumeIo {
    pub fn read(offset: u64, len: u64) -> Self {
        Self {
            io_type: IoType::Read,
            offset,
            buffer: IoBuffer::Read(BytesMut::zeroed(len as usize)),
        }
    }

    pub fn write(offset: u64, data: &[u8]) -> Self {
        Self {
            io_type: IoType::Write,
            offset,
            buffer: IoBuffer::Write(BytesMut::from(data)),
        }
    }

    pub fn flush() -> Self {
        Self {
            io_type: IoType::Flush,
            offset: 0,
            buffer: IoBuffer::None,
        }
    }

    pub fn unmap(offset: u64, len: u64) -> Self {
        Self {
            io_type: IoType::Unmap,
            offset,
            buffer: IoBuffer::Len(len),
        }
    }

    pub fn reset() -> Self {
        Self {
            io_type: IoType::Reset,
            offset: 0,
            buffer: IoBuffer::None,
        }
    }

    pub fn len(&self) -> u64 {
        match &self.buffer {
            IoBuffer::Read(b) | IoBuffer::Write(b) => b.len() as u64,
            IoBuffer::Len(l) => *l,
            IoBuffer::None => 0,
        }
    }
}

/// Outcome of a completed [`VolumeIo`]: the status, and for reads the
/// bytes read back.
#[derive(Debug)]
pub struct VolumeIoResult {
    pub status: IoStatus,
    pub data: Option<BytesMut>,
}
