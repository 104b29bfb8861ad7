//! Wirecall - A minimal RPC engine over raw TCP
//!
//! Clients declare remote services with [`ServiceDescription`], bind them to
//! a [`Client`] and call typed stubs. Servers register [`ServiceTable`]s of
//! async handlers and dispatch incoming frames to them. Every frame carries
//! one-byte serializer and compressor codes resolved through a
//! [`CodecRegistry`] on each side.

pub mod config;
pub mod context;
pub mod network;
pub mod protocol;
pub mod serialization;
pub mod service;

pub use context::{CallContext, CancelHandle, ContextError};
pub use network::{Client, ClientError, Reply, Server, ServerError, ServiceProxy, Stub};
pub use serialization::CodecRegistry;
pub use service::{ServiceDescription, ServiceTable};
