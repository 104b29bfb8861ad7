//! Request dispatch
//!
//! Turns a decoded [`Request`] into a [`Response`]: resolves the service,
//! method, serializer and compressor, runs the handler and packs the result.
//! Every failure becomes an error response, nothing here panics the caller.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::description::{DescriptionError, DescriptionResult};
use super::handler::ServiceTable;
use crate::context::CallContext;
use crate::protocol::{Request, Response};
use crate::serialization::{CodecRegistry, Compressor, SerializationError, Serializer};

/// Why a request could not be served. The Display form is what goes on the wire.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid service name")]
    UnknownService,

    #[error("method not found: {0}")]
    UnknownMethod(String),

    #[error("unknown serializer code {0}")]
    UnknownSerializer(u8),

    #[error("unknown compressor code {0}")]
    UnknownCompressor(u8),

    #[error("uncompress request: {0}")]
    Uncompress(#[source] SerializationError),

    #[error("decode request: {0}")]
    Arguments(#[source] SerializationError),

    #[error("encode response: {0}")]
    Result(#[source] SerializationError),

    #[error("compress response: {0}")]
    Compress(#[source] SerializationError),

    /// The handler's own error, carried verbatim
    #[error("{0}")]
    Handler(String),

    #[error("handler panicked")]
    Panicked,
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Registered services plus the codec tables used to read and write payloads
#[derive(Debug, Default)]
pub struct Dispatcher {
    services: HashMap<String, ServiceTable>,
    codecs: CodecRegistry,
}

impl Dispatcher {
    pub fn new(codecs: CodecRegistry) -> Self {
        Self {
            services: HashMap::new(),
            codecs,
        }
    }

    /// Add a service; its table must be valid and its name unused
    pub fn register(&mut self, table: ServiceTable) -> DescriptionResult<()> {
        table.validate()?;
        if self.services.contains_key(table.name()) {
            return Err(DescriptionError::DuplicateService(table.name().to_string()));
        }

        tracing::debug!(
            "Registered service {} ({})",
            table.name(),
            table.method_names().join(", ")
        );
        self.services.insert(table.name().to_string(), table);
        Ok(())
    }

    pub fn register_serializer(&mut self, serializer: Arc<dyn Serializer>) {
        if let Some(previous) = self.codecs.register_serializer(serializer) {
            tracing::debug!("Replaced serializer {} ({})", previous.code(), previous.name());
        }
    }

    pub fn register_compressor(&mut self, compressor: Arc<dyn Compressor>) {
        if let Some(previous) = self.codecs.register_compressor(compressor) {
            tracing::debug!("Replaced compressor {} ({})", previous.code(), previous.name());
        }
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Registered service names, sorted
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Serve one request. The returned response echoes the request's id and
    /// codes and has its lengths refreshed.
    pub async fn dispatch(&self, ctx: CallContext, request: &Request) -> Response {
        let mut response = Response::reply_to(request);

        match self.invoke(ctx, request).await {
            Ok(data) => response.data = Bytes::from(data),
            Err(e) => {
                tracing::debug!(
                    "{}.{} (message {}) failed: {}",
                    request.service_name,
                    request.method_name,
                    request.message_id,
                    e
                );
                response.set_error(e.to_string());
            }
        }

        response.refresh_lengths();
        response
    }

    async fn invoke(&self, ctx: CallContext, request: &Request) -> DispatchResult<Vec<u8>> {
        let service = self
            .services
            .get(&request.service_name)
            .ok_or(DispatchError::UnknownService)?;
        let handler = service
            .handler(&request.method_name)
            .ok_or_else(|| DispatchError::UnknownMethod(request.method_name.clone()))?;

        let serializer = self
            .codecs
            .serializer(request.serializer)
            .ok_or(DispatchError::UnknownSerializer(request.serializer))?;
        let compressor = self
            .codecs
            .compressor(request.compressor)
            .ok_or(DispatchError::UnknownCompressor(request.compressor))?;

        let payload = compressor
            .uncompress(&request.data)
            .map_err(DispatchError::Uncompress)?;

        // A task of its own so a panicking handler only fails this request
        let result = tokio::spawn(async move { handler(ctx, serializer, payload).await })
            .await
            .map_err(|e| {
                if e.is_panic() {
                    DispatchError::Panicked
                } else {
                    DispatchError::Handler(e.to_string())
                }
            })??;

        compressor.compress(&result).map_err(DispatchError::Compress)
    }
}
