//! Transport - Carries one encoded request to the server and its response back
//!
//! The blocking exchange runs on a helper task that is raced against the
//! call context. When the context wins, the caller gets the context error at
//! once while the helper finishes (or times out) in the background.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

use super::connection::{Connection, ConnectionError};
use super::pool::{ConnectionPool, PoolError};
use crate::context::{CallContext, ContextError};
use crate::protocol::{decode_response, encode_request, CodecError, Request, Response};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{0}")]
    Context(#[from] ContextError),

    #[error("Could not get a connection: {0}")]
    Pool(#[from] PoolError),

    #[error("Failed to send request: {0}")]
    Send(#[source] ConnectionError),

    #[error("Unable to read response: {0}")]
    Receive(#[source] ConnectionError),

    #[error("Connection closed before a response arrived")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Exchange task failed: {0}")]
    Task(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// What came back from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The server's answer
    Response(Response),
    /// The call was oneway; nothing will come back
    Oneway,
}

/// Sends requests and receives responses
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `request`, honouring the context's deadline, cancellation and
    /// oneway marker
    async fn invoke(&self, ctx: &CallContext, request: Request) -> TransportResult<Delivery>;
}

/// Pooled TCP transport
pub struct TcpTransport {
    pool: Arc<ConnectionPool>,
}

impl TcpTransport {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn invoke(&self, ctx: &CallContext, request: Request) -> TransportResult<Delivery> {
        if let Some(err) = ctx.error() {
            return Err(err.into());
        }

        let frame = encode_request(&request)?;
        let deadline = ctx.remaining().map(|remaining| Instant::now() + remaining);
        let pool = self.pool.clone();

        tracing::debug!(
            "Invoking {}.{} (message {}, {} bytes)",
            request.service_name,
            request.method_name,
            request.message_id,
            frame.len()
        );

        let helper = tokio::spawn(exchange(pool, ctx.clone(), frame, deadline));

        tokio::select! {
            joined = helper => {
                joined.map_err(|e| TransportError::Task(e.to_string()))?
            }
            err = ctx.done() => {
                tracing::debug!("Message {} abandoned: {}", request.message_id, err);
                Err(err.into())
            }
        }
    }
}

/// Acquire, exchange, release. Runs on its own task, bounded by the
/// caller's deadline.
async fn exchange(
    pool: Arc<ConnectionPool>,
    ctx: CallContext,
    frame: Bytes,
    deadline: Option<Instant>,
) -> TransportResult<Delivery> {
    let mut conn = pool.acquire().await?;

    // The caller may have given up while the pool was exhausted
    if let Some(err) = ctx.error() {
        pool.release(conn, true).await;
        return Err(err.into());
    }

    let oneway = ctx.is_oneway();
    let result = match deadline {
        Some(deadline) => {
            tokio::time::timeout_at(deadline, round_trip(&mut conn, &frame, oneway))
                .await
                .unwrap_or(Err(ContextError::DeadlineExceeded.into()))
        }
        None => round_trip(&mut conn, &frame, oneway).await,
    };

    pool.release(conn, result.is_ok()).await;
    result
}

async fn round_trip(
    conn: &mut Connection,
    frame: &[u8],
    oneway: bool,
) -> TransportResult<Delivery> {
    conn.send_frame(frame).await.map_err(TransportError::Send)?;

    if oneway {
        return Ok(Delivery::Oneway);
    }

    let frame = conn
        .recv_frame()
        .await
        .map_err(TransportError::Receive)?
        .ok_or(TransportError::ConnectionClosed)?;
    Ok(Delivery::Response(decode_response(frame)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::protocol::{decode_request, encode_response, DEFAULT_MAX_FRAME_SIZE};
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Answers every request with its method name as payload, after `delay`;
    /// reports each request it saw on the channel
    async fn echo_server(delay: Duration) -> (String, mpsc::UnboundedReceiver<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let seen_tx = seen_tx.clone();
                tokio::spawn(async move {
                    let mut conn = Connection::new(stream, peer, DEFAULT_MAX_FRAME_SIZE);
                    while let Ok(Some(frame)) = conn.recv_frame().await {
                        let req = decode_request(frame).unwrap();
                        let _ = seen_tx.send(req.clone());
                        if req.is_oneway() {
                            continue;
                        }
                        tokio::time::sleep(delay).await;
                        let mut resp = Response::reply_to(&req);
                        resp.data = Bytes::from(req.method_name.clone());
                        resp.refresh_lengths();
                        if conn
                            .send_frame(&encode_response(&resp).unwrap())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
        });

        (addr, seen_rx)
    }

    /// Accepts connections and closes them straight away
    async fn closing_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });
        addr
    }

    async fn transport(addr: &str) -> TcpTransport {
        transport_with(addr, 2).await
    }

    async fn transport_with(addr: &str, max_connections: usize) -> TcpTransport {
        let config = PoolConfig {
            initial_connections: 1,
            max_idle: max_connections,
            max_connections,
            idle_timeout_ms: 60_000,
            acquire_timeout_ms: 1000,
        };
        let pool = ConnectionPool::connect(addr, config, Duration::from_secs(1), DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        TcpTransport::new(Arc::new(pool))
    }

    fn request(method: &str) -> Request {
        let mut req = Request::new("svc", method);
        req.message_id = 11;
        req.refresh_lengths();
        req
    }

    #[tokio::test]
    async fn test_invoke_roundtrip() {
        let (addr, _seen) = echo_server(Duration::ZERO).await;
        let transport = transport(&addr).await;

        let delivery = transport
            .invoke(&CallContext::background(), request("Ping"))
            .await
            .unwrap();
        match delivery {
            Delivery::Response(resp) => {
                assert_eq!(resp.message_id, 11);
                assert_eq!(resp.data, Bytes::from_static(b"Ping"));
            }
            Delivery::Oneway => panic!("expected a response"),
        }
        assert_eq!(transport.pool().idle_connections().await, 1);
    }

    #[tokio::test]
    async fn test_oneway_does_not_wait() {
        // A response would take far longer than the assertion allows
        let (addr, mut seen) = echo_server(Duration::from_secs(5)).await;
        let transport = transport(&addr).await;

        let mut req = request("Fire");
        req.set_oneway();
        req.refresh_lengths();

        let started = Instant::now();
        let delivery = transport
            .invoke(&CallContext::background().oneway(), req)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Oneway);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(seen.recv().await.unwrap().method_name, "Fire");
    }

    #[tokio::test]
    async fn test_done_context_fails_fast() {
        let (addr, _seen) = echo_server(Duration::ZERO).await;
        let transport = transport(&addr).await;

        let (ctx, handle) = CallContext::background().with_cancellation();
        handle.cancel();
        let err = transport.invoke(&ctx, request("Ping")).await.unwrap_err();
        assert!(matches!(err, TransportError::Context(ContextError::Cancelled)));
        // The pool was never touched
        assert_eq!(transport.pool().idle_connections().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let (addr, _seen) = echo_server(Duration::from_millis(500)).await;
        let transport = transport(&addr).await;

        let (ctx, handle) = CallContext::background().with_cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let err = transport.invoke(&ctx, request("Slow")).await.unwrap_err();
        assert!(matches!(err, TransportError::Context(ContextError::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(400));

        // The helper still completes the exchange and returns the connection
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(transport.pool().idle_connections().await, 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let (addr, _seen) = echo_server(Duration::from_millis(500)).await;
        let transport = transport(&addr).await;

        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));
        let err = transport.invoke(&ctx, request("Slow")).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Context(ContextError::DeadlineExceeded)
        ));

        // The helper gave up on the same deadline and dropped the connection
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.pool().open_connections().await, 0);
    }

    #[tokio::test]
    async fn test_expired_call_not_sent_after_waiting_for_pool() {
        let (addr, mut seen) = echo_server(Duration::from_millis(300)).await;
        let transport = Arc::new(transport_with(&addr, 1).await);

        let busy = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .invoke(&CallContext::background(), request("Busy"))
                    .await
            })
        };
        assert_eq!(seen.recv().await.unwrap().method_name, "Busy");

        // Only connection is taken, so this call expires while waiting for it
        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));
        let err = transport.invoke(&ctx, request("Expired")).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Context(ContextError::DeadlineExceeded)
        ));

        assert!(busy.await.unwrap().is_ok());
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The helper got the connection back but never wrote the request
        assert!(seen.try_recv().is_err());
        assert_eq!(transport.pool().open_connections().await, 1);
        assert_eq!(transport.pool().idle_connections().await, 1);
    }

    #[tokio::test]
    async fn test_failed_exchange_drops_connection() {
        let addr = closing_server().await;
        let transport = transport(&addr).await;
        assert_eq!(transport.pool().open_connections().await, 1);

        let err = transport
            .invoke(&CallContext::background(), request("Ping"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Send(_)
                | TransportError::Receive(_)
                | TransportError::ConnectionClosed
        ));
        assert_eq!(transport.pool().open_connections().await, 0);
        assert_eq!(transport.pool().idle_connections().await, 0);
    }
}
