//! The logical-volume store (blob/cluster allocator) is an external
//! collaborator: specified here only as the metadata queries the
//! rebuild engine and snapshot orchestrator need from it.

use async_trait::async_trait;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum LvsError {
    #[snafu(display("blob '{}' not found in logical volume store", name))]
    BlobNotFound { name: String },
    #[snafu(display("snapshot operation failed for '{}': {}", name, reason))]
    SnapshotFailed { name: String, reason: String },
}

pub type Result<T, E = LvsError> = std::result::Result<T, E>;

/// Cluster-granular allocation metadata for one blob, as produced by the
/// donor side of a rebuild.
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub num_clusters: u64,
    pub cluster_size: u32,
    pub io_unit_size: u32,
    /// Cluster indices the donor considers non-empty, in ascending order.
    pub allocation_table: Vec<u32>,
}

/// Queries a logical-volume store needs to answer to support rebuild and
/// snapshot. A production implementation sits on top of the real blobstore;
/// this core only ever calls through the trait.
#[async_trait]
pub trait LogicalVolumeStore: Send + Sync {
    /// Returns allocation metadata for the named blob.
    async fn blob_info(&self, blob_name: &str) -> Result<BlobInfo>;

    /// Reads `buf.len()` bytes of cluster `cluster_idx` from `blob_name`.
    async fn read_cluster(
        &self,
        blob_name: &str,
        cluster_idx: u32,
        buf: &mut [u8],
    ) -> Result<()>;

    /// Writes cluster `cluster_idx` of `blob_name` from `buf`.
    async fn write_cluster(
        &self,
        blob_name: &str,
        cluster_idx: u32,
        buf: &[u8],
    ) -> Result<()>;

    /// Creates a new blob sized to hold `num_clusters * cluster_size`
    /// bytes, used by the rebuild receiver.
    async fn create_blob(
        &self,
        blob_name: &str,
        num_clusters: u64,
        cluster_size: u32,
    ) -> Result<()>;

    /// Takes a point-in-time snapshot of `blob_name`, naming it
    /// `snapshot_name`.
    async fn snapshot(&self, blob_name: &str, snapshot_name: &str) -> Result<()>;

    /// Sets the snapshot-parent attribute on `child`, linking it to
    /// `parent` in the snapshot chain.
    async fn link(&self, child: &str, parent: &str) -> Result<()>;
}

/// An in-memory [`LogicalVolumeStore`], used by tests and by any
/// deployment that has not wired up a real blobstore-backed one yet.
/// Clusters are addressed by index within a flat byte buffer per blob.
#[derive(Debug, Default)]
pub struct NullLogicalVolumeStore {
    blobs: parking_lot::Mutex<std::collections::HashMap<String, Blob>>,
}

#[derive(Debug, Clone)]
struct Blob {
    cluster_size: u32,
    data: Vec<u8>,
    allocated: Vec<u32>,
    parent: Option<String>,
}

impl NullLogicalVolumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper: creates a blob and marks the given clusters
    /// as allocated with the supplied fill byte.
    pub fn seed(&self, name: &str, num_clusters: u64, cluster_size: u32, allocated: &[u32], fill: u8) {
        let mut data = vec![0u8; (num_clusters * cluster_size as u64) as usize];
        for &idx in allocated {
            let start = idx as usize * cluster_size as usize;
            data[start .. start + cluster_size as usize].fill(fill);
        }
        self.blobs.lock().insert(
            name.to_string(),
            Blob {
                cluster_size,
                data,
                allocated: allocated.to_vec(),
                parent: None,
            },
        );
    }
}

#[async_trait]
impl LogicalVolumeStore for NullLogicalVolumeStore {
    async fn blob_info(&self, blob_name: &str) -> Result<BlobInfo> {
        let blobs = self.blobs.lock();
        let blob = blobs.get(blob_name).ok_or_else(|| BlobNotFound {
            name: blob_name.to_string(),
        }.build())?;
        Ok(BlobInfo {
            num_clusters: blob.data.len() as u64 / blob.cluster_size.max(1) as u64,
            cluster_size: blob.cluster_size,
            io_unit_size: blob.cluster_size,
            allocation_table: blob.allocated.clone(),
        })
    }

    async fn read_cluster(&self, blob_name: &str, cluster_idx: u32, buf: &mut [u8]) -> Result<()> {
        let blobs = self.blobs.lock();
        let blob = blobs.get(blob_name).ok_or_else(|| BlobNotFound {
            name: blob_name.to_string(),
        }.build())?;
        let start = cluster_idx as usize * blob.cluster_size as usize;
        buf.copy_from_slice(&blob.data[start .. start + buf.len()]);
        Ok(())
    }

    async fn write_cluster(&self, blob_name: &str, cluster_idx: u32, buf: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock();
        let blob = blobs.get_mut(blob_name).ok_or_else(|| BlobNotFound {
            name: blob_name.to_string(),
        }.build())?;
        let start = cluster_idx as usize * blob.cluster_size as usize;
        blob.data[start .. start + buf.len()].copy_from_slice(buf);
        if !blob.allocated.contains(&cluster_idx) {
            blob.allocated.push(cluster_idx);
        }
        Ok(())
    }

    async fn create_blob(&self, blob_name: &str, num_clusters: u64, cluster_size: u32) -> Result<()> {
        self.blobs.lock().insert(
            blob_name.to_string(),
            Blob {
                cluster_size,
                data: vec![0u8; (num_clusters * cluster_size as u64) as usize],
                allocated: Vec::new(),
                parent: None,
            },
        );
        Ok(())
    }

    async fn snapshot(&self, blob_name: &str, snapshot_name: &str) -> Result<()> {
        let mut blobs = self.blobs.lock();
        let source = blobs.get(blob_name).ok_or_else(|| BlobNotFound {
            name: blob_name.to_string(),
        }.build())?.clone();
        blobs.insert(format!("{blob_name}@{snapshot_name}"), source);
        Ok(())
    }

    async fn link(&self, child: &str, parent: &str) -> Result<()> {
        let mut blobs = self.blobs.lock();
        let blob = blobs.get_mut(child).ok_or_else(|| BlobNotFound {
            name: child.to_string(),
        }.build())?;
        blob.parent = Some(parent.to_string());
        Ok(())
    }
}
