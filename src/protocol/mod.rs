//! Protocol module - Defines the wire protocol for Wirecall frames
//!
//! Every frame starts with a fixed 15 byte prefix (all integers big-endian):
//! - 4 bytes header length
//! - 4 bytes body length
//! - 4 bytes message id
//! - 1 byte version, 1 byte compressor code, 1 byte serializer code
//!
//! Requests follow the prefix with `service\nmethod\n` and `key\rvalue\n`
//! metadata pairs; responses follow it with the raw error bytes. The body
//! (payload) comes last.

mod codec;
mod message;

pub use codec::*;
pub use message::*;

/// Protocol version stamped into every frame
pub const PROTOCOL_VERSION: u8 = 0;

/// Default port for the demo server and client
pub const DEFAULT_PORT: u16 = 8085;

/// Size of the two length fields that open every frame
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Size of the fixed part of every header
pub const FIXED_HEADER_SIZE: usize = 15;

/// Default upper bound on a single frame (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Metadata key marking a fire-and-forget call
pub const ONEWAY_META_KEY: &str = "one-way";

/// Metadata key carrying the caller's deadline in Unix milliseconds
pub const DEADLINE_META_KEY: &str = "deadline";

/// Separates the service name, method name and each metadata pair
pub const FIELD_SEPARATOR: u8 = b'\n';

/// Separates a metadata key from its value
pub const PAIR_SEPARATOR: u8 = b'\r';
