//! Wirecall Client
//!
//! Binds service descriptions to a transport and hands out typed stubs.
//! Each stub call serializes and compresses its argument, tags the request
//! with the context's oneway marker and deadline, and unpacks the response.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use super::pool::{ConnectionPool, PoolError};
use super::transport::{Delivery, TcpTransport, Transport, TransportError};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::protocol::{next_message_id, Request};
use crate::serialization::{
    decode_value, encode_value, CodecRegistry, Compressor, IdentityCompressor, JsonSerializer,
    SerializationError, Serializer,
};
use crate::service::{DescriptionError, ServiceDescription};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid service description: {0}")]
    InvalidService(#[from] DescriptionError),

    #[error("Service {service} declares no method {method}")]
    UnknownMethod { service: String, method: String },

    #[error("Method {method} is declared as {declared}, not {requested}")]
    TypeMismatch {
        method: String,
        declared: String,
        requested: String,
    },

    #[error("No built-in serializer with code {0}")]
    UnknownSerializer(u8),

    #[error("No built-in compressor with code {0}")]
    UnknownCompressor(u8),

    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Error message sent back by the server, exactly as received
    #[error("{0}")]
    Remote(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Outcome of a successful call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// The server's answer
    Response(T),
    /// The call was oneway; no answer was requested
    Oneway,
}

impl<T> Reply<T> {
    pub fn is_oneway(&self) -> bool {
        matches!(self, Reply::Oneway)
    }

    pub fn into_response(self) -> Option<T> {
        match self {
            Reply::Response(value) => Some(value),
            Reply::Oneway => None,
        }
    }
}

/// A transport plus the codecs used for outgoing calls
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn Serializer>,
    compressor: Arc<dyn Compressor>,
}

impl Client {
    /// Dial a pooled TCP transport to `config.address`, using the built-in
    /// codecs named by `config.serializer` and `config.compressor`
    pub async fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let codecs = CodecRegistry::default();
        let serializer = codecs
            .serializer(config.serializer)
            .ok_or(ClientError::UnknownSerializer(config.serializer))?;
        let compressor = codecs
            .compressor(config.compressor)
            .ok_or(ClientError::UnknownCompressor(config.compressor))?;

        tracing::info!(
            "Connecting to {} ({} / {})",
            config.address,
            serializer.name(),
            compressor.name()
        );

        let pool = ConnectionPool::connect(
            config.address.clone(),
            config.pool.clone(),
            config.connect_timeout(),
            config.max_frame_size,
        )
        .await?;

        Ok(Self {
            transport: Arc::new(TcpTransport::new(Arc::new(pool))),
            serializer,
            compressor,
        })
    }

    /// Use any transport, with JSON and no compression
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            serializer: Arc::new(JsonSerializer),
            compressor: Arc::new(IdentityCompressor),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Validate `description` and bind it to this client
    pub fn bind(&self, description: ServiceDescription) -> ClientResult<ServiceProxy> {
        description.validate()?;
        Ok(ServiceProxy {
            client: self.clone(),
            description: Arc::new(description),
        })
    }

    /// [`Client::connect`] followed by [`Client::bind`]
    pub async fn connect_and_bind(
        config: &ClientConfig,
        description: ServiceDescription,
    ) -> ClientResult<ServiceProxy> {
        Self::connect(config).await?.bind(description)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("serializer", &self.serializer.name())
            .field("compressor", &self.compressor.name())
            .finish_non_exhaustive()
    }
}

/// A service description bound to a client
#[derive(Debug, Clone)]
pub struct ServiceProxy {
    client: Client,
    description: Arc<ServiceDescription>,
}

impl ServiceProxy {
    pub fn name(&self) -> &str {
        self.description.name()
    }

    pub fn description(&self) -> &ServiceDescription {
        &self.description
    }

    /// A callable stub for `method`, which must have been declared with
    /// exactly `Req` and `Resp`
    pub fn stub<Req, Resp>(&self, method: &str) -> ClientResult<Stub<Req, Resp>>
    where
        Req: Serialize + 'static,
        Resp: DeserializeOwned + 'static,
    {
        let declared = self
            .description
            .find(method)
            .ok_or_else(|| ClientError::UnknownMethod {
                service: self.description.name().to_string(),
                method: method.to_string(),
            })?;

        if !declared.accepts::<Req, Resp>() {
            return Err(ClientError::TypeMismatch {
                method: method.to_string(),
                declared: declared.signature(),
                requested: format!(
                    "{} -> {}",
                    std::any::type_name::<Req>(),
                    std::any::type_name::<Resp>()
                ),
            });
        }

        Ok(Stub {
            client: self.client.clone(),
            service: self.description.name().to_string(),
            method: method.to_string(),
            _types: PhantomData,
        })
    }
}

/// One remote method, ready to call
pub struct Stub<Req, Resp> {
    client: Client,
    service: String,
    method: String,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Clone for Stub<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            service: self.service.clone(),
            method: self.method.clone(),
            _types: PhantomData,
        }
    }
}

impl<Req, Resp> fmt::Debug for Stub<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stub({}.{})", self.service, self.method)
    }
}

impl<Req, Resp> Stub<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Call the remote method
    pub async fn call(&self, ctx: &CallContext, req: &Req) -> ClientResult<Reply<Resp>> {
        let request = self.build_request(ctx, req)?;
        let message_id = request.message_id;

        let response = match self.client.transport.invoke(ctx, request).await? {
            Delivery::Oneway => return Ok(Reply::Oneway),
            Delivery::Response(response) => response,
        };

        if let Some(message) = response.error_message() {
            tracing::debug!(
                "{}.{} (message {}) returned an error: {}",
                self.service,
                self.method,
                message_id,
                message
            );
            return Err(ClientError::Remote(message));
        }

        let payload = self.client.compressor.uncompress(&response.data)?;
        let value = decode_value(self.client.serializer.as_ref(), &payload)?;
        Ok(Reply::Response(value))
    }

    fn build_request(&self, ctx: &CallContext, req: &Req) -> ClientResult<Request> {
        let payload = encode_value(self.client.serializer.as_ref(), req)?;
        let payload = self.client.compressor.compress(&payload)?;

        let mut request = Request::new(self.service.as_str(), self.method.as_str());
        request.message_id = next_message_id();
        request.serializer = self.client.serializer.code();
        request.compressor = self.client.compressor.code();
        if ctx.is_oneway() {
            request.set_oneway();
        }
        if let Some(deadline) = ctx.deadline() {
            request.set_deadline(deadline);
        }
        request.data = Bytes::from(payload);
        request.refresh_lengths();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Response, DEADLINE_META_KEY, ONEWAY_META_KEY};
    use crate::serialization::{BincodeSerializer, GzipCompressor};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Mutex;
    use std::time::{Duration, UNIX_EPOCH};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Req {
        id: i64,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Resp {
        msg: String,
    }

    /// Records requests and answers with a canned response
    struct Canned {
        seen: Mutex<Vec<Request>>,
        answer: Box<dyn Fn(&Request) -> Response + Send + Sync>,
    }

    #[async_trait]
    impl Transport for Canned {
        async fn invoke(
            &self,
            ctx: &CallContext,
            request: Request,
        ) -> Result<Delivery, TransportError> {
            if let Some(err) = ctx.error() {
                return Err(err.into());
            }
            let response = (self.answer)(&request);
            let oneway = request.is_oneway();
            self.seen.lock().unwrap().push(request);
            if oneway {
                Ok(Delivery::Oneway)
            } else {
                Ok(Delivery::Response(response))
            }
        }
    }

    fn canned(answer: impl Fn(&Request) -> Response + Send + Sync + 'static) -> Arc<Canned> {
        Arc::new(Canned {
            seen: Mutex::new(Vec::new()),
            answer: Box::new(answer),
        })
    }

    fn description() -> ServiceDescription {
        ServiceDescription::new("user-service").method::<Req, Resp>("GetById")
    }

    fn tom(request: &Request) -> Response {
        let mut response = Response::reply_to(request);
        response.data = Bytes::from(serde_json::to_vec(&Resp { msg: "Tom".into() }).unwrap());
        response.refresh_lengths();
        response
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let transport = canned(tom);
        let proxy = Client::with_transport(transport.clone())
            .bind(description())
            .unwrap();
        let stub = proxy.stub::<Req, Resp>("GetById").unwrap();

        let reply = stub
            .call(&CallContext::background(), &Req { id: 123 })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Response(Resp { msg: "Tom".into() }));

        let seen = transport.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.service_name, "user-service");
        assert_eq!(request.method_name, "GetById");
        assert_eq!(request.serializer, JsonSerializer::CODE);
        assert_eq!(request.compressor, IdentityCompressor::CODE);
        assert_eq!(request.data, Bytes::from_static(br#"{"id":123}"#));
        assert_eq!(request.header_length as usize, request.expected_header_length());
        assert!(request.meta.is_empty());
        assert!(request.message_id > 0);
    }

    #[tokio::test]
    async fn test_message_ids_are_fresh() {
        let transport = canned(tom);
        let stub = Client::with_transport(transport.clone())
            .bind(description())
            .unwrap()
            .stub::<Req, Resp>("GetById")
            .unwrap();

        let ctx = CallContext::background();
        stub.call(&ctx, &Req { id: 1 }).await.unwrap();
        stub.call(&ctx, &Req { id: 2 }).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_ne!(seen[0].message_id, seen[1].message_id);
    }

    #[tokio::test]
    async fn test_meta_from_context() {
        let transport = canned(tom);
        let stub = Client::with_transport(transport.clone())
            .bind(description())
            .unwrap()
            .stub::<Req, Resp>("GetById")
            .unwrap();

        let deadline = UNIX_EPOCH + Duration::from_millis(4_102_444_800_500);
        let ctx = CallContext::background().with_deadline(deadline).oneway();
        let reply = stub.call(&ctx, &Req { id: 1 }).await.unwrap();
        assert!(reply.is_oneway());
        assert_eq!(reply.into_response(), None);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].meta.get(ONEWAY_META_KEY).unwrap(), "true");
        assert_eq!(
            seen[0].meta.get(DEADLINE_META_KEY).unwrap(),
            "4102444800500"
        );
    }

    #[tokio::test]
    async fn test_remote_error_is_plain_message() {
        let transport = canned(|request: &Request| {
            let mut response = Response::reply_to(request);
            response.set_error("boom");
            response.refresh_lengths();
            response
        });
        let stub = Client::with_transport(transport)
            .bind(description())
            .unwrap()
            .stub::<Req, Resp>("GetById")
            .unwrap();

        let err = stub
            .call(&CallContext::background(), &Req { id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Remote(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_empty_payload_still_decoded() {
        // bincode encodes () as zero bytes
        let transport = canned(|request: &Request| {
            let mut response = Response::reply_to(request);
            response.refresh_lengths();
            response
        });
        let stub = Client::with_transport(transport)
            .with_serializer(Arc::new(BincodeSerializer))
            .bind(ServiceDescription::new("svc").method::<Req, ()>("Ping"))
            .unwrap()
            .stub::<Req, ()>("Ping")
            .unwrap();

        let reply = stub
            .call(&CallContext::background(), &Req { id: 1 })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Response(()));
    }

    #[tokio::test]
    async fn test_compressed_payload() {
        let transport = canned(|request: &Request| {
            let mut response = Response::reply_to(request);
            let body = serde_json::to_vec(&Resp { msg: "zipped".into() }).unwrap();
            response.data = Bytes::from(GzipCompressor.compress(&body).unwrap());
            response.refresh_lengths();
            response
        });
        let client = Client::with_transport(transport.clone())
            .with_compressor(Arc::new(GzipCompressor));
        let stub = client
            .bind(description())
            .unwrap()
            .stub::<Req, Resp>("GetById")
            .unwrap();

        let reply = stub
            .call(&CallContext::background(), &Req { id: 9 })
            .await
            .unwrap();
        assert_eq!(reply.into_response().unwrap().msg, "zipped");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].compressor, GzipCompressor::CODE);
        let sent = GzipCompressor.uncompress(&seen[0].data).unwrap();
        assert_eq!(sent, br#"{"id":9}"#);
    }

    #[tokio::test]
    async fn test_transport_error_passes_through() {
        let transport = canned(tom);
        let stub = Client::with_transport(transport.clone())
            .bind(description())
            .unwrap()
            .stub::<Req, Resp>("GetById")
            .unwrap();

        let (ctx, handle) = CallContext::background().with_cancellation();
        handle.cancel();
        let err = stub.call(&ctx, &Req { id: 1 }).await.unwrap_err();
        assert_eq!(err.to_string(), "context canceled");
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bind_validates() {
        let client = Client::with_transport(canned(tom));

        let err = client
            .bind(ServiceDescription::new("").method::<Req, Resp>("M"))
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidService(DescriptionError::EmptyServiceName)
        ));

        let proxy = client.bind(description()).unwrap();
        // Binding is repeatable
        let again = client.bind(description()).unwrap();
        assert_eq!(proxy.name(), again.name());

        assert!(matches!(
            proxy.stub::<Req, Resp>("Missing"),
            Err(ClientError::UnknownMethod { .. })
        ));
        assert!(matches!(
            proxy.stub::<Resp, Req>("GetById"),
            Err(ClientError::TypeMismatch { .. })
        ));
    }
}
