//! Serialization module - Payload serializers and compressors
//!
//! Both sides of a call pick a serializer and a compressor by the one-byte
//! codes carried in every frame. This module provides:
//! - The object-safe [`Serializer`] and [`Compressor`] traits
//! - Built-in implementations (JSON, bincode; identity, gzip, zstd, zlib)
//! - [`CodecRegistry`], the two 256-entry lookup tables

mod compressor;
mod registry;
mod serializer;

pub use compressor::*;
pub use registry::*;
pub use serializer::*;

use thiserror::Error;

/// Serialization and compression errors
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("{0}")]
    Value(#[from] erased_serde::Error),

    #[error("Compression error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serializer produced no value")]
    NothingDecoded,
}

pub type SerializationResult<T> = Result<T, SerializationError>;
