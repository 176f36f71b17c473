//! The rebuild engine: differential cluster copy from
//! a donor blob to a target blob, guided by the donor's allocation table.
//! Two transports are supported: an in-process copy (used by online-add
//! when the donor and target share a logical-volume store) and a TCP
//! stream copy.

use super::{
    error::{self, Result},
    wire::{self, RebuildHeader},
};
use crate::lvs::LogicalVolumeStore;
use snafu::ResultExt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};

/// Progress of one rebuild, exposed to the `rebuild_status` diagnostic
/// command.
pub struct RebuildJob {
    pub donor: String,
    pub target: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    cluster_size: AtomicU64,
    total_clusters: AtomicU64,
    done_clusters: AtomicU64,
}

impl RebuildJob {
    pub fn new(donor: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            donor: donor.into(),
            target: target.into(),
            started_at: chrono::Utc::now(),
            cluster_size: AtomicU64::new(0),
            total_clusters: AtomicU64::new(0),
            done_clusters: AtomicU64::new(0),
        }
    }

    pub fn progress(&self) -> (u64, u64) {
        (
            self.done_clusters.load(Ordering::SeqCst),
            self.total_clusters.load(Ordering::SeqCst),
        )
    }

    /// Bytes copied so far, for a human-readable `rebuild_status` field.
    pub fn bytes_copied(&self) -> u64 {
        self.done_clusters.load(Ordering::SeqCst) * self.cluster_size.load(Ordering::SeqCst)
    }

    /// Elapsed wall time since the job started, formatted the way an
    /// operator reads it (e.g. "3m 12s").
    pub fn elapsed(&self) -> String {
        let elapsed = chrono::Utc::now().signed_duration_since(self.started_at);
        let std_elapsed = elapsed.to_std().unwrap_or(std::time::Duration::ZERO);
        humantime::format_duration(std_elapsed).to_string()
    }

    fn set_total(&self, total: u64, cluster_size: u64) {
        self.total_clusters.store(total, Ordering::SeqCst);
        self.cluster_size.store(cluster_size, Ordering::SeqCst);
    }

    fn advance(&self) {
        self.done_clusters.fetch_add(1, Ordering::SeqCst);
    }
}

/// Copies every allocated cluster of `job.donor` into `job.target` within
/// the same logical-volume store, used by the online-add path where donor and target are both local.
pub async fn copy_allocated_clusters(job: &RebuildJob, lvs: &dyn LogicalVolumeStore) -> Result<()> {
    let info = lvs.blob_info(&job.donor).await.context(error::Lvs)?;
    lvs.create_blob(&job.target, info.num_clusters, info.cluster_size)
        .await
        .context(error::Lvs)?;
    job.set_total(info.allocation_table.len() as u64, info.cluster_size as u64);
    let mut buf = vec![0u8; info.cluster_size as usize];
    for &cluster in &info.allocation_table {
        lvs.read_cluster(&job.donor, cluster, &mut buf)
            .await
            .context(error::Lvs)?;
        lvs.write_cluster(&job.target, cluster, &buf)
            .await
            .context(error::Lvs)?;
        job.advance();
    }
    Ok(())
}

/// Donor side of a remote rebuild: serves one blob
/// over an already-accepted TCP stream.
pub async fn serve_donor<W: AsyncWrite + Unpin>(
    stream: &mut W,
    blob_name: &str,
    lvs: &dyn LogicalVolumeStore,
) -> Result<()> {
    let info = lvs.blob_info(blob_name).await.context(error::Lvs)?;
    wire::write_name(stream, blob_name).await?;
    wire::write_header(
        stream,
        &RebuildHeader {
            num_clusters: info.num_clusters,
            allocated_clusters: info.allocation_table.len() as u64,
            cluster_size: info.cluster_size,
            io_unit_size: info.io_unit_size,
        },
    )
    .await?;
    wire::write_allocation_table(stream, &info.allocation_table).await?;
    let mut buf = vec![0u8; info.cluster_size as usize];
    for &cluster in &info.allocation_table {
        lvs.read_cluster(blob_name, cluster, &mut buf)
            .await
            .context(error::Lvs)?;
        tokio::io::AsyncWriteExt::write_all(stream, &buf)
            .await
            .context(error::Io)?;
    }
    Ok(())
}

/// Receiver side of a remote rebuild: reads one blob from the stream into
/// a freshly created local blob. Reads and writes are interleaved one
/// cluster at a time -- the next read waits for the previous write to
/// complete, so the stream is never buffered beyond a single cluster.
pub async fn fetch_into<R: AsyncRead + Unpin>(
    stream: &mut R,
    local_name_prefix: &str,
    lvs: &dyn LogicalVolumeStore,
) -> Result<(String, RebuildJob)> {
    let donor_name = wire::read_name(stream).await?;
    let target_name = format!("{local_name_prefix}{donor_name}");
    let header = wire::read_header(stream).await?;
    lvs.create_blob(&target_name, header.num_clusters, header.cluster_size)
        .await
        .context(error::Lvs)?;
    let table = wire::read_allocation_table(stream, header.allocated_clusters).await?;

    let job = RebuildJob::new(donor_name.clone(), target_name.clone());
    job.set_total(table.len() as u64, header.cluster_size as u64);
    let mut buf = vec![0u8; header.cluster_size as usize];
    for &cluster_idx in &table {
        tokio::io::AsyncReadExt::read_exact(stream, &mut buf)
            .await
            .context(error::Io)?;
        lvs.write_cluster(&target_name, cluster_idx, &buf)
            .await
            .context(error::Lvs)?;
        job.advance();
    }
    Ok((target_name, job))
}

/// Links a freshly rebuilt blob under its snapshot parent.
pub async fn link(child: &str, parent: &str, lvs: &dyn LogicalVolumeStore) -> Result<()> {
    lvs.link(child, parent).await.context(error::Link {
        child: child.to_string(),
        parent: parent.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lvs::NullLogicalVolumeStore;

    #[tokio::test]
    async fn copy_allocated_clusters_preserves_cluster_identity() {
        let lvs = NullLogicalVolumeStore::new();
        lvs.seed("donor", 8, 4096, &[0, 2, 5], 0xAB);
        let job = RebuildJob::new("donor", "target");
        copy_allocated_clusters(&job, &lvs).await.unwrap();

        let mut donor_buf = vec![0u8; 4096];
        let mut target_buf = vec![0u8; 4096];
        for &cluster in &[0u32, 2, 5] {
            lvs.read_cluster("donor", cluster, &mut donor_buf).await.unwrap();
            lvs.read_cluster("target", cluster, &mut target_buf).await.unwrap();
            assert_eq!(donor_buf, target_buf);
        }
        let (done, total) = job.progress();
        assert_eq!(done, 3);
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn serve_donor_and_fetch_into_round_trip_over_a_stream() {
        let lvs = NullLogicalVolumeStore::new();
        lvs.seed("lvs1/v1", 8, 4096, &[0, 2, 5], 0xCD);

        let (mut donor_side, mut receiver_side) = tokio::io::duplex(64 * 1024);
        let (serve_result, fetch_result) = tokio::join!(
            serve_donor(&mut donor_side, "lvs1/v1", &lvs),
            fetch_into(&mut receiver_side, "remote-", &lvs),
        );
        serve_result.unwrap();
        let (target_name, job) = fetch_result.unwrap();
        assert_eq!(target_name, "remote-lvs1/v1");

        let mut donor_buf = vec![0u8; 4096];
        let mut target_buf = vec![0u8; 4096];
        for &cluster in &[0u32, 2, 5] {
            lvs.read_cluster("lvs1/v1", cluster, &mut donor_buf).await.unwrap();
            lvs.read_cluster(&target_name, cluster, &mut target_buf).await.unwrap();
            assert_eq!(donor_buf, target_buf);
        }
        assert_eq!(job.progress(), (3, 3));
    }

    #[tokio::test]
    async fn link_sets_the_snapshot_parent() {
        let lvs = NullLogicalVolumeStore::new();
        lvs.seed("child", 1, 4096, &[], 0);
        lvs.seed("parent", 1, 4096, &[], 0);
        link("child", "parent", &lvs).await.unwrap();
    }
}
