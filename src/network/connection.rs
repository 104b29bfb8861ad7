//! Connection handling for Wirecall
//!
//! Moves whole frames over one stream:
//! - Length-prefixed frame reads via [`FrameDecoder`]
//! - Full-frame writes (a short write is an error)
//! - Per-connection statistics

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::{CodecError, FrameDecoder};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed mid-frame")]
    Closed,

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A framed connection to a remote peer
pub struct Connection<S = TcpStream> {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The underlying stream
    stream: S,
    /// Frame splitter
    decoder: FrameDecoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Last activity timestamp
    last_activity: Instant,
    /// Statistics
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S, remote_addr: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            remote_addr,
            stream,
            decoder: FrameDecoder::new(max_frame_size),
            read_buf: BytesMut::with_capacity(4096),
            last_activity: Instant::now(),
            stats: ConnectionStats::default(),
        }
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Get time since last activity
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Write one encoded frame in full
    pub async fn send_frame(&mut self, frame: &[u8]) -> ConnectionResult<()> {
        let mut written = 0;
        while written < frame.len() {
            let n = self.stream.write(&frame[written..]).await?;
            if n == 0 {
                return Err(ConnectionError::ShortWrite {
                    written,
                    expected: frame.len(),
                });
            }
            written += n;
        }
        self.stream.flush().await?;

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        self.last_activity = Instant::now();

        Ok(())
    }

    /// Receive one frame (returns None if the peer closed cleanly between frames)
    pub async fn recv_frame(&mut self) -> ConnectionResult<Option<Bytes>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.frames_received += 1;
                self.last_activity = Instant::now();
                return Ok(Some(frame));
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None); // Clean close
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.stats.bytes_received += n as u64;
        }
    }

    /// Shut down the write half
    pub async fn close(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
