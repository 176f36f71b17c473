//! The volume data path: per-channel dispatch and read balancing (B/C),
//! the pause protocol (D), membership and the registry (E), replica
//! lifecycle (F), and snapshot orchestration (G). Rebuild (H) lives in
//! [`crate::rebuild`]; the control surface (I) in [`crate::rpc`].

pub mod balancer;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod pause;
pub mod registry;
pub mod replica;
pub mod snapshot;
pub mod volume;

pub use error::{Error, Result};
pub use registry::{ListCategory, VolumeRegistry};
pub use replica::{Locality, Replica, ReplicaState};
pub use volume::{Volume, VolumeState};
