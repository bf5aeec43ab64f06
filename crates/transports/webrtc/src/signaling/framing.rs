//! Length-prefixed signal frames
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. Frames larger than the configured limit are rejected before the
//! body is read.

use super::protocol::SessionDescription;
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], limit: usize) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > limit {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            limit,
        });
    }

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame
///
/// A clean EOF before the header is reported as a signaling error so the
/// caller can tell a hung-up peer from a transport fault.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::SignalingError(
                "carrier closed before a signal frame arrived".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if len > limit {
        return Err(Error::FrameTooLarge { size: len, limit });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::SignalingError(format!("signal frame truncated: expected {} bytes", len))
        } else {
            e.into()
        }
    })?;
    Ok(payload)
}

/// Serialize and send a session description
pub async fn send_description<W>(
    writer: &mut W,
    desc: &SessionDescription,
    limit: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload = desc.to_json()?;
    write_frame(writer, &payload, limit).await
}

/// Receive and parse a session description
pub async fn recv_description<R>(reader: &mut R, limit: usize) -> Result<SessionDescription>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let payload = read_frame(reader, limit).await?;
    SessionDescription::from_json(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_across_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let payload = vec![7u8; 1000];

        let writer = tokio::spawn(async move {
            write_frame(&mut a, &payload, 4096).await.unwrap();
        });

        // The duplex buffer is smaller than the frame, so the reader has to
        // assemble it from several partial reads.
        let received = read_frame(&mut b, 4096).await.unwrap();
        writer.await.unwrap();
        assert_eq!(received.len(), 1000);
        assert!(received.iter().all(|b| *b == 7));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(70_000).await.unwrap();

        let err = read_frame(&mut b, 65_536).await.unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge {
                size: 70_000,
                limit: 65_536
            }
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_not_written() {
        let (mut a, _b) = tokio::io::duplex(64);
        let err = write_frame(&mut a, &[0u8; 10], 4).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size: 10, limit: 4 }));
    }

    #[tokio::test]
    async fn test_eof_before_header() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_frame(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, Error::SignalingError(_)));
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(10).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        let err = read_frame(&mut b, 1024).await.unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[tokio::test]
    async fn test_description_exchange() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        send_description(&mut a, &SessionDescription::offer("O1"), 1024)
            .await
            .unwrap();
        let desc = recv_description(&mut b, 1024).await.unwrap();
        assert_eq!(desc, SessionDescription::offer("O1"));
    }
}
