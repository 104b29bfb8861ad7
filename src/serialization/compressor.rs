//! Payload compressors

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::{Read, Write};

use super::SerializationResult;

/// Compresses serialized payloads
pub trait Compressor: Send + Sync {
    /// Code carried in the frame's compressor byte
    fn code(&self) -> u8;

    /// Human-readable name
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> SerializationResult<Vec<u8>>;

    fn uncompress(&self, data: &[u8]) -> SerializationResult<Vec<u8>>;
}

/// Passes payloads through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCompressor;

impl IdentityCompressor {
    pub const CODE: u8 = 0;
}

impl Compressor for IdentityCompressor {
    fn code(&self) -> u8 {
        Self::CODE
    }

    fn name(&self) -> &'static str {
        "identity"
    }

    fn compress(&self, data: &[u8]) -> SerializationResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn uncompress(&self, data: &[u8]) -> SerializationResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCompressor;

impl GzipCompressor {
    pub const CODE: u8 = 1;
}

impl Compressor for GzipCompressor {
    fn code(&self) -> u8 {
        Self::CODE
    }

    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> SerializationResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        // The trailer is only written by finish()
        Ok(encoder.finish()?)
    }

    fn uncompress(&self, data: &[u8]) -> SerializationResult<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub const CODE: u8 = 5;

    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Compressor for ZstdCompressor {
    fn code(&self) -> u8 {
        Self::CODE
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> SerializationResult<Vec<u8>> {
        Ok(zstd::bulk::compress(data, self.level)?)
    }

    fn uncompress(&self, data: &[u8]) -> SerializationResult<Vec<u8>> {
        Ok(zstd::stream::decode_all(data)?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibCompressor;

impl ZlibCompressor {
    pub const CODE: u8 = 4;
}

impl Compressor for ZlibCompressor {
    fn code(&self) -> u8 {
        Self::CODE
    }

    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, data: &[u8]) -> SerializationResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn uncompress(&self, data: &[u8]) -> SerializationResult<Vec<u8>> {
        let mut out = Vec::new();
        ZlibDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}
