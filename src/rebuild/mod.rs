//! Differential cluster-granular rebuild: copies only the clusters a
//! donor blob has allocated, either in-process (same logical-volume
//! store) or streamed over a TCP donor/receiver pair.

pub mod error;
pub mod job;
pub mod wire;

pub use error::{RebuildError, Result};
pub use job::{copy_allocated_clusters, fetch_into, link, serve_donor, RebuildJob};
