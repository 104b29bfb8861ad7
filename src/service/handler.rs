//! Server-side handler tables
//!
//! Handlers are plain async closures over typed arguments. Each one is
//! wrapped into a [`MethodHandler`] that decodes the argument with the
//! request's serializer and encodes the result with the same serializer.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::description::{check_names, DescriptionResult};
use super::dispatcher::{DispatchError, DispatchResult};
use crate::context::CallContext;
use crate::serialization::{decode_value, encode_value, Serializer};

/// Future returned by an erased handler: the serialized result
pub type HandlerFuture = Pin<Box<dyn Future<Output = DispatchResult<Vec<u8>>> + Send>>;

/// A handler with its argument and result types erased.
/// Takes the request context, the request's serializer and the uncompressed payload.
pub type MethodHandler =
    Arc<dyn Fn(CallContext, Arc<dyn Serializer>, Vec<u8>) -> HandlerFuture + Send + Sync>;

/// The methods of one service, by name
#[derive(Clone)]
pub struct ServiceTable {
    name: String,
    methods: HashMap<String, MethodHandler>,
    /// Every registered name in order, duplicates included
    declared: Vec<String>,
}

impl ServiceTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            declared: Vec::new(),
        }
    }

    /// Add a method. `handler` receives the request context and the decoded
    /// argument; an `Err` is sent back as the response's error message.
    pub fn method<Req, Resp, E, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    {
        let name = name.into();
        self.declared.push(name.clone());
        self.methods.insert(name, erase(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method names, sorted
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn handler(&self, method: &str) -> Option<MethodHandler> {
        self.methods.get(method).cloned()
    }

    /// Same rules as a client-side description
    pub fn validate(&self) -> DescriptionResult<()> {
        check_names(&self.name, self.declared.iter().map(String::as_str))
    }
}

fn erase<Req, Resp, E, F, Fut>(handler: F) -> MethodHandler
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(
        move |ctx: CallContext, serializer: Arc<dyn Serializer>, payload: Vec<u8>| -> HandlerFuture {
            let handler = handler.clone();
            Box::pin(async move {
                let arg: Req = decode_value(serializer.as_ref(), &payload)
                    .map_err(DispatchError::Arguments)?;
                let result = handler(ctx, arg)
                    .await
                    .map_err(|e| DispatchError::Handler(e.to_string()))?;
                encode_value(serializer.as_ref(), &result).map_err(DispatchError::Result)
            })
        },
    )
}

impl fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTable")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}
