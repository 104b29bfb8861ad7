//! Service module - What a remote service looks like on each side
//!
//! - [`ServiceDescription`]: the client's declaration of a remote service
//! - [`ServiceTable`]: the server's handlers for one service
//! - [`Dispatcher`]: routes decoded requests to those handlers

mod description;
mod dispatcher;
mod handler;

pub use description::*;
pub use dispatcher::*;
pub use handler::*;
