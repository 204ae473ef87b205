//! Content-Encoding decoders, looked up by name.
//!
//! Unknown names pass the body through unchanged. A stacked encoding such
//! as `gzip, br` is undone right to left.

use std::io::Read;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Decode `data` encoded with a single named coding.
pub fn decode(name: &str, data: Bytes) -> Result<Bytes> {
    match name.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => decode_gzip(&data),
        "deflate" => decode_deflate(&data),
        "br" => decode_brotli(&data),
        "zstd" => decode_zstd(&data),
        "" | "identity" => Ok(data),
        other => {
            tracing::debug!("unknown content encoding {:?}, passing through", other);
            Ok(data)
        }
    }
}

/// Undo a full `Content-Encoding` header value.
pub fn decode_all(content_encoding: &str, data: Bytes) -> Result<Bytes> {
    content_encoding
        .rsplit(',')
        .try_fold(data, |body, name| decode(name, body))
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    flate2::read::MultiGzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("gzip: {}", e)))?;
    Ok(Bytes::from(decoded))
}

/// Servers send both zlib-wrapped and raw deflate under this name.
fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("deflate: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_brotli(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    brotli::Decompressor::new(data, 4096)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("brotli: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_zstd(data: &[u8]) -> Result<Bytes> {
    zstd::stream::decode_all(data)
        .map(Bytes::from)
        .map_err(|e| Error::Decompression(format!("zstd: {}", e)))
}
