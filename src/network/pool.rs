//! Bounded TCP connection pool
//!
//! Connections are handed out one call at a time and come back through
//! [`ConnectionPool::release`] together with a health flag, so a connection
//! that failed mid-exchange is closed instead of recycled.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};

use super::connection::Connection;
use crate::config::PoolConfig;

/// Pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connecting to {0} timed out")]
    ConnectTimeout(String),

    #[error("Connection pool exhausted ({0} connections in use)")]
    Exhausted(usize),
}

pub type PoolResult<T> = Result<T, PoolError>;

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    /// Idle plus checked-out connections
    open: usize,
}

/// Pool of connections to a single address
pub struct ConnectionPool {
    addr: String,
    config: PoolConfig,
    connect_timeout: Duration,
    max_frame_size: usize,
    state: Mutex<PoolState>,
    available: Notify,
}

impl ConnectionPool {
    /// Create a pool and dial its initial connections
    pub async fn connect(
        addr: impl Into<String>,
        config: PoolConfig,
        connect_timeout: Duration,
        max_frame_size: usize,
    ) -> PoolResult<Self> {
        let pool = Self {
            addr: addr.into(),
            config,
            connect_timeout,
            max_frame_size,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                open: 0,
            }),
            available: Notify::new(),
        };

        let initial = pool
            .config
            .initial_connections
            .min(pool.config.max_idle)
            .min(pool.config.max_connections);
        let mut idle = VecDeque::with_capacity(initial);
        for _ in 0..initial {
            idle.push_back(IdleConnection {
                conn: pool.dial().await?,
                since: Instant::now(),
            });
        }
        {
            let mut state = pool.state.lock().await;
            state.open = idle.len();
            state.idle = idle;
        }

        tracing::debug!(
            "Connection pool for {} ready with {} connections",
            pool.addr,
            initial
        );
        Ok(pool)
    }

    async fn dial(&self) -> PoolResult<Connection> {
        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(&self.addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(PoolError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => return Err(PoolError::ConnectTimeout(self.addr.clone())),
        };

        stream.set_nodelay(true).map_err(|source| PoolError::Connect {
            addr: self.addr.clone(),
            source,
        })?;
        let remote_addr = stream.peer_addr().map_err(|source| PoolError::Connect {
            addr: self.addr.clone(),
            source,
        })?;
        Ok(Connection::new(stream, remote_addr, self.max_frame_size))
    }

    /// Take an idle connection or open a new one, waiting up to the
    /// acquire timeout while the pool is at capacity
    pub async fn acquire(&self) -> PoolResult<Connection> {
        let deadline = tokio::time::Instant::now() + self.config.acquire_timeout();

        loop {
            {
                let mut state = self.state.lock().await;

                // Oldest first, so stale connections are evicted before reuse
                let idle_timeout = self.config.idle_timeout();
                while let Some(entry) = state.idle.pop_front() {
                    if entry.since.elapsed() < idle_timeout {
                        return Ok(entry.conn);
                    }
                    tracing::debug!("Evicting idle connection to {}", self.addr);
                    state.open -= 1;
                }

                if state.open < self.config.max_connections {
                    state.open += 1;
                    drop(state);

                    return match self.dial().await {
                        Ok(conn) => Ok(conn),
                        Err(e) => {
                            self.state.lock().await.open -= 1;
                            self.available.notify_one();
                            Err(e)
                        }
                    };
                }
            }

            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Err(PoolError::Exhausted(self.config.max_connections));
            }
        }
    }

    /// Return a connection. Unhealthy connections and any beyond `max_idle`
    /// are closed.
    pub async fn release(&self, conn: Connection, healthy: bool) {
        {
            let mut state = self.state.lock().await;
            if healthy && state.idle.len() < self.config.max_idle {
                state.idle.push_back(IdleConnection {
                    conn,
                    since: Instant::now(),
                });
            } else {
                if !healthy {
                    tracing::debug!(
                        "Dropping broken connection to {}",
                        conn.remote_addr()
                    );
                }
                state.open -= 1;
            }
        }
        self.available.notify_one();
    }

    /// Address this pool dials
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open connections, idle and checked out
    pub async fn open_connections(&self) -> usize {
        self.state.lock().await.open
    }

    pub async fn idle_connections(&self) -> usize {
        self.state.lock().await.idle.len()
    }
}
