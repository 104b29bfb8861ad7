//! Byte-code indexed serializer and compressor tables

use std::fmt;
use std::sync::Arc;

use super::{
    BincodeSerializer, Compressor, GzipCompressor, IdentityCompressor, JsonSerializer, Serializer,
    ZlibCompressor, ZstdCompressor,
};

/// One slot per possible code byte
const TABLE_SIZE: usize = 256;

/// Serializer and compressor tables, indexed by the codes carried in frames.
///
/// Populated at startup and read-only once serving begins.
#[derive(Clone)]
pub struct CodecRegistry {
    serializers: [Option<Arc<dyn Serializer>>; TABLE_SIZE],
    compressors: [Option<Arc<dyn Compressor>>; TABLE_SIZE],
}

impl CodecRegistry {
    /// A registry with no entries at all
    pub fn empty() -> Self {
        Self {
            serializers: std::array::from_fn(|_| None),
            compressors: std::array::from_fn(|_| None),
        }
    }

    /// Register a serializer under its own code, returning the one it replaces
    pub fn register_serializer(
        &mut self,
        serializer: Arc<dyn Serializer>,
    ) -> Option<Arc<dyn Serializer>> {
        let code = serializer.code() as usize;
        self.serializers[code].replace(serializer)
    }

    /// Register a compressor under its own code, returning the one it replaces
    pub fn register_compressor(
        &mut self,
        compressor: Arc<dyn Compressor>,
    ) -> Option<Arc<dyn Compressor>> {
        let code = compressor.code() as usize;
        self.compressors[code].replace(compressor)
    }

    pub fn serializer(&self, code: u8) -> Option<Arc<dyn Serializer>> {
        self.serializers[code as usize].clone()
    }

    pub fn compressor(&self, code: u8) -> Option<Arc<dyn Compressor>> {
        self.compressors[code as usize].clone()
    }

    /// Registered serializers as (code, name) pairs
    pub fn serializer_names(&self) -> Vec<(u8, &'static str)> {
        self.serializers
            .iter()
            .flatten()
            .map(|s| (s.code(), s.name()))
            .collect()
    }

    /// Registered compressors as (code, name) pairs
    pub fn compressor_names(&self) -> Vec<(u8, &'static str)> {
        self.compressors
            .iter()
            .flatten()
            .map(|c| (c.code(), c.name()))
            .collect()
    }
}

impl Default for CodecRegistry {
    /// Every built-in serializer and compressor
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_serializer(Arc::new(JsonSerializer));
        registry.register_serializer(Arc::new(BincodeSerializer));
        registry.register_compressor(Arc::new(IdentityCompressor));
        registry.register_compressor(Arc::new(GzipCompressor));
        registry.register_compressor(Arc::new(ZstdCompressor::default()));
        registry.register_compressor(Arc::new(ZlibCompressor));
        registry
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("serializers", &self.serializer_names())
            .field("compressors", &self.compressor_names())
            .finish()
    }
}
