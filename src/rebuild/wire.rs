//! Binary framing for the rebuild TCP stream. The name field is always
//! exactly 256 bytes, NUL-padded, so readers can size their buffer up
//! front instead of framing it with a length prefix.

use super::error::{self, Result};
use snafu::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const NAME_FIELD_LEN: usize = 256;

/// The header immediately following the name field: num_clusters,
/// allocated_clusters, cluster_size, io_unit_size, each little-endian.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RebuildHeader {
    pub num_clusters: u64,
    pub allocated_clusters: u64,
    pub cluster_size: u32,
    pub io_unit_size: u32,
}

/// Sent first by the client: the blob id it wants rebuilt, little-endian,
/// 8 bytes.
pub async fn write_blob_request<W: AsyncWrite + Unpin>(w: &mut W, blob_id: u64) -> Result<()> {
    w.write_all(&blob_id.to_le_bytes()).await.context(error::Io)
}

pub async fn read_blob_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).await.context(error::Io)?;
    Ok(u64::from_le_bytes(buf))
}

pub async fn write_name<W: AsyncWrite + Unpin>(w: &mut W, name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_FIELD_LEN {
        return error::NameTooLong {
            name: name.to_string(),
        }
        .fail();
    }
    let mut field = [0u8; NAME_FIELD_LEN];
    field[.. bytes.len()].copy_from_slice(bytes);
    w.write_all(&field).await.context(error::Io)
}

pub async fn read_name<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let mut field = [0u8; NAME_FIELD_LEN];
    r.read_exact(&mut field).await.context(error::Io)?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
    Ok(String::from_utf8_lossy(&field[.. end]).into_owned())
}

pub async fn write_header<W: AsyncWrite + Unpin>(w: &mut W, header: &RebuildHeader) -> Result<()> {
    w.write_all(&header.num_clusters.to_le_bytes()).await.context(error::Io)?;
    w.write_all(&header.allocated_clusters.to_le_bytes()).await.context(error::Io)?;
    w.write_all(&header.cluster_size.to_le_bytes()).await.context(error::Io)?;
    w.write_all(&header.io_unit_size.to_le_bytes()).await.context(error::Io)
}

pub async fn read_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<RebuildHeader> {
    let mut u64buf = [0u8; 8];
    r.read_exact(&mut u64buf).await.context(error::Io)?;
    let num_clusters = u64::from_le_bytes(u64buf);
    r.read_exact(&mut u64buf).await.context(error::Io)?;
    let allocated_clusters = u64::from_le_bytes(u64buf);
    let mut u32buf = [0u8; 4];
    r.read_exact(&mut u32buf).await.context(error::Io)?;
    let cluster_size = u32::from_le_bytes(u32buf);
    r.read_exact(&mut u32buf).await.context(error::Io)?;
    let io_unit_size = u32::from_le_bytes(u32buf);
    Ok(RebuildHeader {
        num_clusters,
        allocated_clusters,
        cluster_size,
        io_unit_size,
    })
}

pub async fn write_allocation_table<W: AsyncWrite + Unpin>(w: &mut W, table: &[u32]) -> Result<()> {
    for &idx in table {
        w.write_all(&idx.to_le_bytes()).await.context(error::Io)?;
    }
    Ok(())
}

pub async fn read_allocation_table<R: AsyncRead + Unpin>(
    r: &mut R,
    allocated_clusters: u64,
) -> Result<Vec<u32>> {
    let mut table = Vec::with_capacity(allocated_clusters as usize);
    let mut buf = [0u8; 4];
    for _ in 0 .. allocated_clusters {
        r.read_exact(&mut buf).await.context(error::Io)?;
        table.push(u32::from_le_bytes(buf));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn name_round_trips_with_nul_padding_stripped() {
        let (mut a, mut b) = tokio::io::duplex(NAME_FIELD_LEN);
        let (_, name) = tokio::join!(
            write_name(&mut a, "lvs1/v1"),
            read_name(&mut b),
        );
        assert_eq!(name.unwrap(), "lvs1/v1");
    }

    #[tokio::test]
    async fn name_longer_than_field_is_rejected() {
        let long = "x".repeat(NAME_FIELD_LEN + 1);
        let (mut a, _b) = tokio::io::duplex(NAME_FIELD_LEN);
        assert!(write_name(&mut a, &long).await.is_err());
    }

    #[tokio::test]
    async fn header_round_trips() {
        let header = RebuildHeader {
            num_clusters: 16,
            allocated_clusters: 3,
            cluster_size: 4096,
            io_unit_size: 512,
        };
        let (mut a, mut b) = tokio::io::duplex(64);
        let (_, decoded) = tokio::join!(write_header(&mut a, &header), read_header(&mut b));
        assert_eq!(decoded.unwrap(), header);
    }

    #[tokio::test]
    async fn allocation_table_round_trips() {
        let table = vec![0u32, 2, 5, 9];
        let (mut a, mut b) = tokio::io::duplex(64);
        let (_, decoded) = tokio::join!(
            write_allocation_table(&mut a, &table),
            read_allocation_table(&mut b, table.len() as u64),
        );
        assert_eq!(decoded.unwrap(), table);
    }

    #[tokio::test]
    async fn blob_request_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(16);
        let (_, decoded) = tokio::join!(write_blob_request(&mut a, 42), read_blob_request(&mut b));
        assert_eq!(decoded.unwrap(), 42);
    }
}
