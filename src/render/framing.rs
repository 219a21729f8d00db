//! Worker output framing.
//!
//! A worker answers each job with one frame: a 4-byte big-endian length
//! followed by exactly that many bytes of JPEG. A zero length means the
//! worker could not render the job and is ready for the next one.
//!
//! The reader never scans the payload for the JPEG end-of-image marker, so an
//! image that happens to contain `FF D9` before its end is returned whole.
//! The marker is only checked at the very end as a sanity test.

use std::io::{self, Write};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::utils::{Error, Result};

/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

pub fn write_frame<W: Write>(out: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(payload)?;
    out.flush()
}

/// Tell the pool this job produced no image.
pub fn write_rejection<W: Write>(out: &mut W) -> io::Result<()> {
    write_frame(out, &[])
}

/// Read one frame. `Ok(None)` is a rejected job.
pub async fn read_frame<R>(input: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match input.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(Error::WorkerFailed("worker closed its output".into()));
        }
        Err(e) => return Err(e.into()),
    };
    if len == 0 {
        return Ok(None);
    }
    if len > max_len {
        return Err(Error::Frame(format!(
            "{len} byte frame exceeds the {max_len} byte limit"
        )));
    }

    let mut payload = vec![0; len];
    if let Err(e) = input.read_exact(&mut payload).await {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Err(Error::WorkerFailed("worker output ended mid-frame".into()));
        }
        return Err(e.into());
    }
    if !payload.ends_with(&JPEG_EOI) {
        return Err(Error::Frame("image does not end with the JPEG EOI marker".into()));
    }
    Ok(Some(payload))
}
