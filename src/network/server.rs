//! Wirecall Server
//!
//! Accepts connections and serves requests on each one in order: read a
//! frame, dispatch it, write the response (unless the call was oneway),
//! then read the next frame.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::connection::{Connection, ConnectionResult};
use crate::config::ServerConfig;
use crate::context::{CallContext, CancelHandle};
use crate::protocol::{decode_request, encode_response, FrameHeader, Request, Response};
use crate::serialization::{CodecRegistry, Compressor, Serializer};
use crate::service::{DescriptionError, Dispatcher, ServiceTable};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid service: {0}")]
    Registration(#[from] DescriptionError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Wirecall Server
pub struct Server {
    /// Server configuration
    config: ServerConfig,
    /// Services and codecs; shared with connection tasks once started
    dispatcher: Arc<Dispatcher>,
    /// Set by the first start; registration is closed from then on
    started: bool,
    /// Bound address
    local_addr: Option<SocketAddr>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// The accept loop, awaited by stop
    accept_task: Option<JoinHandle<()>>,
    /// Whether the accept loop is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a server with the built-in codecs and no services
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new(CodecRegistry::default())),
            started: false,
            local_addr: None,
            shutdown_tx: None,
            accept_task: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    fn dispatcher_mut(&mut self) -> ServerResult<&mut Dispatcher> {
        if self.started {
            return Err(ServerError::AlreadyRunning);
        }
        Arc::get_mut(&mut self.dispatcher).ok_or(ServerError::AlreadyRunning)
    }

    /// Add a service. Names must be unique and registration must happen
    /// before [`Server::start`].
    pub fn register_service(&mut self, table: ServiceTable) -> ServerResult<()> {
        self.dispatcher_mut()?.register(table)?;
        Ok(())
    }

    /// Add or replace a serializer under its code
    pub fn register_serializer(&mut self, serializer: Arc<dyn Serializer>) -> ServerResult<()> {
        self.dispatcher_mut()?.register_serializer(serializer);
        Ok(())
    }

    /// Add or replace a compressor under its code
    pub fn register_compressor(&mut self, compressor: Arc<dyn Compressor>) -> ServerResult<()> {
        self.dispatcher_mut()?.register_compressor(compressor);
        Ok(())
    }

    /// Bind `addr` and start accepting connections in the background.
    /// Returns the bound address (useful with port 0).
    pub async fn start(&mut self, addr: &str) -> ServerResult<SocketAddr> {
        if self.started {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener.local_addr()?;
        tracing::info!(
            "Server listening on {} (services: {})",
            local_addr,
            self.dispatcher.service_names().join(", ")
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);
        self.started = true;

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let dispatcher = self.dispatcher.clone();
        let max_frame_size = self.config.max_frame_size;
        let running = self.running.clone();

        // Spawn the accept loop
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::debug!("New connection from {}", addr);

                                let dispatcher = dispatcher.clone();
                                tokio::spawn(async move {
                                    let result =
                                        handle_connection(stream, addr, dispatcher, max_frame_size).await;
                                    match result {
                                        Ok(()) => tracing::debug!("Connection from {} closed", addr),
                                        Err(e) => tracing::error!("Connection from {} failed: {}", addr, e),
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            drop(listener);
            let mut running = running.write().await;
            *running = false;
        });
        self.accept_task = Some(accept_task);

        Ok(local_addr)
    }

    /// Stop accepting connections. Connections already open finish their
    /// current request and are served until the peer closes them.
    pub async fn stop(&mut self) -> ServerResult<()> {
        let tx = self.shutdown_tx.take().ok_or(ServerError::NotRunning)?;
        let _ = tx.send(()).await;

        // The accept loop drops the listener on its way out
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::error!("Accept loop failed: {}", e);
            }
        }
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Context for one request: its wire deadline, its oneway marker and a
/// cancel handle fired once the request is finished
fn request_context(request: &Request) -> (CallContext, CancelHandle) {
    let mut ctx = CallContext::background();
    if let Some(deadline) = request.deadline() {
        ctx = ctx.with_deadline(deadline);
    }
    if request.is_oneway() {
        ctx = ctx.oneway();
    }
    ctx.with_cancellation()
}

async fn write_response(conn: &mut Connection, response: &mut Response) -> ConnectionResult<()> {
    response.refresh_lengths();
    let frame = encode_response(response)?;
    conn.send_frame(&frame).await
}

/// Serve one connection until the peer closes it or an I/O error occurs
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    max_frame_size: usize,
) -> ConnectionResult<()> {
    stream.set_nodelay(true)?;
    let mut conn = Connection::new(stream, addr, max_frame_size);

    while let Some(frame) = conn.recv_frame().await? {
        let request = match decode_request(frame.clone()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Undecodable request from {}: {}", addr, e);
                // Without the fixed header there is nothing to answer to
                let header = match FrameHeader::parse(&frame) {
                    Ok(header) => header,
                    Err(_) => return Err(e.into()),
                };
                let mut response = Response {
                    message_id: header.message_id,
                    version: header.version,
                    compressor: header.compressor,
                    serializer: header.serializer,
                    ..Default::default()
                };
                response.set_error(e.to_string());
                write_response(&mut conn, &mut response).await?;
                continue;
            }
        };

        tracing::debug!(
            "Request {} from {}: {}.{} ({} bytes)",
            request.message_id,
            addr,
            request.service_name,
            request.method_name,
            request.data.len()
        );

        let oneway = request.is_oneway();
        let (ctx, cancel) = request_context(&request);
        let mut response = dispatcher.dispatch(ctx, &request).await;

        let written = if oneway {
            Ok(())
        } else {
            write_response(&mut conn, &mut response).await
        };
        cancel.cancel();
        written?;
    }

    Ok(())
}
