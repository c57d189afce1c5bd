//! Bulk transfer engine.
//!
//! All transfers go through the session's fixed buffer. Reads larger than the
//! buffer are streamed in buffer-sized pieces; writes and sector reads must
//! fit in it at once.

use std::io::{self, SeekFrom};

use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt},
};

use crate::{error::Error, serialize, utils::Result, wire::*};

fn check_capacity(requested: u64, buffer: &[u8]) -> Result<usize> {
    match usize::try_from(requested) {
        Ok(len) if len <= buffer.len() => Ok(len),
        _ => Err(Error::BufferOverflow {
            requested,
            capacity: buffer.len(),
        }),
    }
}

/// Read until `buf` is full or the file ends, returning the bytes read.
async fn fill(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Stream `count` bytes starting at `offset` to `out`.
///
/// The file must hold the whole range; running into its end is an error.
pub async fn read_file<W>(
    file: &mut File,
    buffer: &mut [u8],
    offset: u64,
    count: u32,
    out: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if buffer.is_empty() {
        return Err(Error::BufferOverflow {
            requested: count as u64,
            capacity: 0,
        });
    }

    file.seek(SeekFrom::Start(offset)).await?;

    let mut remaining = count as usize;
    while remaining > 0 {
        let size = remaining.min(buffer.len());
        file.read_exact(&mut buffer[..size]).await.map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::ShortRead {
                offset,
                requested: count,
            },
            _ => e.into(),
        })?;
        out.write_all(&buffer[..size]).await?;
        remaining -= size;
    }

    Ok(())
}

/// Read up to `count` bytes at `offset`, replying with the number of bytes
/// found followed by the bytes themselves.
pub async fn read_short<W>(
    file: &mut File,
    buffer: &mut [u8],
    offset: u64,
    count: u32,
    out: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = check_capacity(count as u64, buffer)?;

    file.seek(SeekFrom::Start(offset)).await?;
    let got = fill(file, &mut buffer[..len]).await?;

    serialize::send(out, &(got as u32)).await?;
    out.write_all(&buffer[..got]).await?;
    Ok(())
}

/// Extract the user data of `req.chunks` raw sectors starting at sector
/// `req.first` and send it as one contiguous block.
///
/// Sectors beyond the end of the image read as zeros. Nothing is written to
/// `out` when the request does not fit in the buffer.
pub async fn read_sectors<W>(
    file: &mut File,
    buffer: &mut [u8],
    req: SectorRead,
    out: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = check_capacity(req.payload_len(), buffer)?;

    let mut offset = req.byte_offset();
    for chunk in buffer[..len].chunks_mut(SECTOR_PAYLOAD_SIZE) {
        file.seek(SeekFrom::Start(offset + SECTOR_HEADER_SIZE)).await?;
        let got = fill(file, chunk).await?;
        chunk[got..].fill(0);
        offset += SECTOR_SIZE;
    }

    out.write_all(&buffer[..len]).await?;
    Ok(())
}

/// Receive `count` bytes from the peer and append them at the current
/// position of `file`, returning the number of bytes written.
///
/// An oversized request fails before anything is read from the peer.
pub async fn write_file<R>(
    file: &mut File,
    buffer: &mut [u8],
    count: u32,
    input: &mut R,
) -> Result<u32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = check_capacity(count as u64, buffer)?;

    input.read_exact(&mut buffer[..len]).await?;
    file.write_all(&buffer[..len]).await?;
    file.flush().await?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn file_with(contents: &[u8]) -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, contents).unwrap();
        let file = File::open(&path).await.unwrap();
        (dir, file)
    }

    #[tokio::test]
    async fn read_file_spans_several_buffers() {
        let data: Vec<u8> = (0..=255).cycle().take(100).collect();
        let (_dir, mut file) = file_with(&data).await;
        let mut buffer = vec![0; 16];
        let mut out = Vec::new();

        read_file(&mut file, &mut buffer, 3, 90, &mut out).await.unwrap();
        assert_eq!(out, &data[3..93]);
    }

    #[tokio::test]
    async fn read_file_past_end_fails() {
        let (_dir, mut file) = file_with(b"short").await;
        let mut buffer = vec![0; 16];
        let mut out = Vec::new();

        let err = read_file(&mut file, &mut buffer, 2, 6, &mut out).await.unwrap_err();
        assert!(matches!(err, Error::ShortRead { offset: 2, requested: 6 }));
        assert!(!err.is_disconnect());
    }

    #[tokio::test]
    async fn read_short_reports_actual_count() {
        let (_dir, mut file) = file_with(b"0123456789").await;
        let mut buffer = vec![0; 16];
        let mut out = Vec::new();

        read_short(&mut file, &mut buffer, 6, 10, &mut out).await.unwrap();
        assert_eq!(&out[..4], &4u32.to_be_bytes());
        assert_eq!(&out[4..], b"6789");
    }

    #[tokio::test]
    async fn read_short_rejects_oversized_count() {
        let (_dir, mut file) = file_with(b"0123456789").await;
        let mut buffer = vec![0; 4];
        let mut out = Vec::new();

        let err = read_short(&mut file, &mut buffer, 0, 5, &mut out).await.unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { requested: 5, capacity: 4 }));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn read_sectors_skips_headers() {
        let mut image = Vec::new();
        for sector in 0u8..4 {
            image.extend(std::iter::repeat(0xee).take(SECTOR_HEADER_SIZE as usize));
            image.extend(std::iter::repeat(sector).take(SECTOR_PAYLOAD_SIZE));
            image.extend(std::iter::repeat(0xdd).take(
                SECTOR_SIZE as usize - SECTOR_HEADER_SIZE as usize - SECTOR_PAYLOAD_SIZE,
            ));
        }
        let (_dir, mut file) = file_with(&image).await;
        let mut buffer = vec![0; 4 * SECTOR_PAYLOAD_SIZE];
        let mut out = Vec::new();

        read_sectors(&mut file, &mut buffer, SectorRead { first: 1, chunks: 2 }, &mut out)
            .await
            .unwrap();
        assert_eq!(out.len(), 2 * SECTOR_PAYLOAD_SIZE);
        assert!(out[..SECTOR_PAYLOAD_SIZE].iter().all(|&b| b == 1));
        assert!(out[SECTOR_PAYLOAD_SIZE..].iter().all(|&b| b == 2));
    }

    #[tokio::test]
    async fn read_sectors_zero_fills_past_end() {
        let (_dir, mut file) = file_with(&[7u8; 100]).await;
        let mut buffer = vec![0xff; SECTOR_PAYLOAD_SIZE];
        let mut out = Vec::new();

        read_sectors(&mut file, &mut buffer, SectorRead { first: 0, chunks: 1 }, &mut out)
            .await
            .unwrap();
        assert!(out[..76].iter().all(|&b| b == 7));
        assert!(out[76..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn read_sectors_rejects_oversized_request() {
        let (_dir, mut file) = file_with(&[0u8; 16]).await;
        let mut buffer = vec![0; SECTOR_PAYLOAD_SIZE];
        let mut out = Vec::new();

        let err = read_sectors(&mut file, &mut buffer, SectorRead { first: 0, chunks: 2 }, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { requested: 4096, .. }));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn write_file_rejects_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("out")).await.unwrap();
        let mut buffer = vec![0; 4];
        let mut input: &[u8] = b"abcdef";

        let err = write_file(&mut file, &mut buffer, 6, &mut input).await.unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { requested: 6, capacity: 4 }));
        assert_eq!(input.len(), 6);
        assert_eq!(std::fs::metadata(dir.path().join("out")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn write_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut file = File::create(&path).await.unwrap();
        let mut buffer = vec![0; 4];
        let mut input: &[u8] = b"abcdef";

        assert_eq!(write_file(&mut file, &mut buffer, 4, &mut input).await.unwrap(), 4);
        assert_eq!(write_file(&mut file, &mut buffer, 2, &mut input).await.unwrap(), 2);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }
}
