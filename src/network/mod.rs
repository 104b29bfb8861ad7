//! Network module - Moves frames between client and server over TCP
//!
//! Provides:
//! - Framed connections and a bounded connection pool
//! - The transport that performs one request/response exchange
//! - Client proxies and stubs for calling remote services
//! - The server that accepts connections and dispatches requests

mod client;
mod connection;
mod pool;
mod server;
mod transport;

pub use client::*;
pub use connection::*;
pub use pool::*;
pub use server::*;
pub use transport::*;
