//! `core` contains the primary abstractions the volume engine is built on:
//! the base device interface, thread/reactor scheduling, and descriptor
//! lifetime. Everything here is either a trait or ambient runtime glue.

pub mod block_device;
pub mod descriptor;
pub mod mem_device;
pub mod reactor;
pub mod thread;

pub use block_device::{
    BlockDevice, BlockDeviceHandle, CoreError, DeviceCatalog, Geometry, IoType,
};
pub use descriptor::DescriptorGuard;
pub use mem_device::{MemBlockDevice, MemDeviceCatalog};
pub use reactor::Reactors;
pub use thread::{Thread, ThreadHandle};
