//! Whole-frame read/write on top of the byte-stream cursor.
//!
//! Two framing modes, selected per connection by the compression flag:
//!
//! - Uncompressed: `varint(total_len) | varint(id) | body`, where
//!   `total_len` covers the id varint plus the body.
//! - Compressed: `varint(outer_len) | varint(uncompressed_len) | payload`.
//!   `uncompressed_len == 0` means the payload is `varint(id) | body`
//!   verbatim; `uncompressed_len > 0` means the payload is a zlib block
//!   whose decompression is exactly `uncompressed_len` bytes of
//!   `varint(id) | body`.

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::core::stream::WireReader;
use crate::core::varint::{read_varint, varint_len, write_varint, MAX_VARINT_LEN};
use crate::error::{ProtocolError, Result};
use crate::utils::compression;

/// One length-delimited unit of the wire protocol: an id plus an opaque
/// body. Transient; lives for a single decode/dispatch or encode/send
/// cycle.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: i32,
    pub body: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(id: i32, body: Bytes) -> Self {
        Self { id, body }
    }

    #[must_use]
    pub fn empty(id: i32) -> Self {
        Self {
            id,
            body: Bytes::new(),
        }
    }
}

fn frame_len(raw: i32, max_frame_len: usize) -> Result<usize> {
    let len = usize::try_from(raw)
        .map_err(|_| ProtocolError::MalformedFrame(format!("negative frame length {raw}")))?;
    if len > max_frame_len {
        return Err(ProtocolError::OversizedFrame(len));
    }
    Ok(len)
}

/// Read one frame off the stream.
///
/// # Errors
///
/// I/O faults and end-of-stream surface as [`ProtocolError::Io`]; corrupt
/// length arithmetic as [`ProtocolError::MalformedFrame`]; frames or
/// claimed decompressed sizes above `max_frame_len` as
/// [`ProtocolError::OversizedFrame`] / [`ProtocolError::DecompressionFailure`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    compression_enabled: bool,
    max_frame_len: usize,
) -> Result<Frame> {
    if !compression_enabled {
        let (raw_len, _) = reader.read_varint().await?;
        let length = frame_len(raw_len, max_frame_len)?;

        let (id, id_len) = reader.read_varint().await?;
        let body_len = length.checked_sub(id_len).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!(
                "frame length {length} shorter than id varint ({id_len} bytes)"
            ))
        })?;

        let body = reader.read_exact(body_len).await?;
        return Ok(Frame::new(id, Bytes::from(body)));
    }

    let (raw_outer, _) = reader.read_varint().await?;
    let outer = frame_len(raw_outer, max_frame_len)?;

    let (data_len, data_len_bytes) = reader.read_varint().await?;

    if data_len == 0 {
        // Payload is id + body verbatim.
        let (id, id_len) = reader.read_varint().await?;
        let body_len = outer.checked_sub(data_len_bytes + id_len).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!(
                "compressed frame length {outer} shorter than header varints"
            ))
        })?;

        let body = reader.read_exact(body_len).await?;
        return Ok(Frame::new(id, Bytes::from(body)));
    }

    let data_len = usize::try_from(data_len).map_err(|_| {
        ProtocolError::MalformedFrame(format!("negative uncompressed length {data_len}"))
    })?;
    // Reject the claimed size before inflating anything.
    if data_len > max_frame_len {
        return Err(ProtocolError::DecompressionFailure);
    }

    let compressed_len = outer.checked_sub(data_len_bytes).ok_or_else(|| {
        ProtocolError::MalformedFrame(format!(
            "compressed frame length {outer} shorter than inner length varint"
        ))
    })?;

    let block = reader.read_exact(compressed_len).await?;
    let plain = compression::decompress(&block, max_frame_len)?;
    if plain.len() != data_len {
        return Err(ProtocolError::MalformedFrame(format!(
            "decompressed to {} bytes, expected {data_len}",
            plain.len()
        )));
    }

    let mut slice = &plain[..];
    let (id, id_len) = read_varint(&mut slice)?;
    let body = Bytes::copy_from_slice(&plain[id_len..]);
    Ok(Frame::new(id, body))
}

/// Encode a complete framed buffer for the write loop: `varint(id) | body`
/// wrapped in the framing mode selected by `compression` (`Some(threshold)`
/// when enabled).
pub fn encode_frame(id: i32, body: &[u8], compression: Option<i32>) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(varint_len(id) + body.len());
    write_varint(&mut payload, id);
    payload.extend_from_slice(body);

    let Some(threshold) = compression else {
        let mut out = Vec::with_capacity(MAX_VARINT_LEN + payload.len());
        write_varint(&mut out, payload.len() as i32);
        out.extend_from_slice(&payload);
        return Ok(out);
    };

    let threshold = usize::try_from(threshold).unwrap_or(0);

    let inner = if payload.len() >= threshold {
        let compressed = compression::compress(&payload)?;
        let mut inner = Vec::with_capacity(MAX_VARINT_LEN + compressed.len());
        write_varint(&mut inner, payload.len() as i32);
        inner.extend_from_slice(&compressed);
        inner
    } else {
        let mut inner = Vec::with_capacity(1 + payload.len());
        write_varint(&mut inner, 0);
        inner.extend_from_slice(&payload);
        inner
    };

    let mut out = Vec::with_capacity(MAX_VARINT_LEN + inner.len());
    write_varint(&mut out, inner.len() as i32);
    out.extend_from_slice(&inner);
    Ok(out)
}
