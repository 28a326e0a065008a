use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{ProtocolError, Result};

/// Compresses data into a zlib block
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|_| ProtocolError::CompressionFailure)?;
    encoder.finish().map_err(|_| ProtocolError::CompressionFailure)
}

/// Decompresses a zlib block
///
/// Enforces a maximum output size to prevent decompression bombs. Output is
/// read in chunks and the limit checked on each chunk, so a hostile block
/// never allocates more than `max_size` plus one chunk.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds `max_size`
pub fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    let mut buffer = [0u8; 8192];

    loop {
        match decoder.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                out.extend_from_slice(&buffer[..n]);
                if out.len() > max_size {
                    return Err(ProtocolError::DecompressionFailure);
                }
            }
            Err(_) => return Err(ProtocolError::DecompressionFailure),
        }
    }

    Ok(out)
}

/// Compress data if it meets the configured threshold, otherwise return it
/// unchanged. Returns the output bytes and a flag indicating whether
/// compression was applied.
pub fn maybe_compress(data: &[u8], threshold_bytes: usize) -> Result<(Vec<u8>, bool)> {
    if data.len() < threshold_bytes {
        Ok((data.to_vec(), false))
    } else {
        Ok((compress(data)?, true))
    }
}

/// Decompress data only if it was previously compressed; otherwise return as-is.
pub fn maybe_decompress(data: &[u8], was_compressed: bool, max_size: usize) -> Result<Vec<u8>> {
    if was_compressed {
        decompress(data, max_size)
    } else {
        Ok(data.to_vec())
    }
}
