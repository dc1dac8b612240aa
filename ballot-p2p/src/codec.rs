//! Length-prefixed framing: a big-endian `u32` length followed by a bincode
//! payload.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::P2pError;

pub async fn write_frame<W, T>(io: &mut W, value: &T) -> Result<(), P2pError>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize,
{
    let bytes = bincode::serialize(value)?;
    let len = u32::try_from(bytes.len()).map_err(|_| P2pError::FrameTooLarge(bytes.len()))?;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(&bytes).await?;
    io.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean EOF before the length prefix.
pub async fn read_frame<R, T>(io: &mut R, max_len: usize) -> Result<Option<T>, P2pError>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match io.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(P2pError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    Ok(Some(bincode::deserialize(&buf)?))
}
