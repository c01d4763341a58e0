//! Client connection manager.
//!
//! Provides one long-lived connection shared by every caller in the process:
//! - Exclusive, FIFO-ordered access for whole request/response exchanges
//! - Bounded connect retries
//! - Transparent reconnection on the call after a transport failure
//!
//! The protocol carries no correlation id. A reply is attributed to whoever
//! holds the lock, so a request and all of its reply values must be handled
//! under one acquisition (see [`ConnectionManager::send_request_and_read`]).

pub mod chat;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{Result, WireError};
use crate::server::DEFAULT_PORT;
use crate::wire::{Control, DEFAULT_MAX_FRAME_BYTES, Frame, ValueCodec};

pub use chat::ChatClient;

/// Configuration for the connection manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connect attempts before giving up.
    pub max_retries: u32,
    /// Delay between connect attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Optional bound on each response read. `None` waits indefinitely.
    pub response_timeout_ms: Option<u64>,
    /// Largest single value accepted on the wire.
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            max_retries: 3,
            retry_delay_ms: 2000,
            response_timeout_ms: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    /// Create config for a specific server.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set connect attempts and the delay between them.
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Bound each response read.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// `host:port` string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }
}

/// The physical connection: framed read and write halves.
struct Connection {
    reader: FramedRead<OwnedReadHalf, ValueCodec>,
    writer: FramedWrite<OwnedWriteHalf, ValueCodec>,
    // Set while an exchange is in flight. Still set when the lock is next
    // taken means the owning future was dropped and the stream is misaligned.
    busy: bool,
}

impl Connection {
    fn new(stream: TcpStream, max_frame_bytes: usize) -> Self {
        let (read_half, write_half) = stream.into_split();
        let codec = ValueCodec::with_max_length(max_frame_bytes);
        Self {
            reader: FramedRead::new(read_half, codec.clone()),
            writer: FramedWrite::new(write_half, codec),
            busy: false,
        }
    }

    async fn write_request(&mut self, action: &str, params: &[Value]) -> Result<()> {
        self.writer
            .feed(Value::String(action.to_string()))
            .await
            .map_err(WireError::Transport)?;
        for param in params {
            self.writer.feed(param.clone()).await.map_err(WireError::Transport)?;
        }
        self.writer.flush().await.map_err(WireError::Transport)
    }

    async fn read_frame(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        let next = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.reader.next()).await.map_err(|_| {
                WireError::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no response within {}ms", limit.as_millis()),
                ))
            })?,
            None => self.reader.next().await,
        };

        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(WireError::Transport(e)),
            None => Err(WireError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ))),
        }
    }

    /// Read exactly `n` values. A malformed value still occupies its slot so
    /// the stream stays aligned; the first such failure is reported after all
    /// `n` have been consumed.
    async fn read_values(&mut self, n: usize, timeout: Option<Duration>) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(n);
        let mut malformed = None;
        for _ in 0..n {
            match self.read_frame(timeout).await? {
                Frame::Value(value) => values.push(value),
                Frame::Malformed(reason) => {
                    malformed.get_or_insert(reason);
                    values.push(Value::Null);
                }
            }
        }
        match malformed {
            Some(reason) => Err(WireError::Protocol(reason)),
            None => Ok(values),
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.writer.close().await {
            log::debug!("Error closing connection: {}", e);
        }
    }
}

/// Shared connection with exclusive, fairness-ordered access.
///
/// Owned by the application's composition root and handed to callers,
/// typically behind an `Arc`. Connects lazily on first use.
pub struct ConnectionManager {
    config: ClientConfig,
    // tokio's Mutex queues waiters FIFO, which gives arrival-order service.
    conn: Mutex<Option<Connection>>,
    connected: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager; no connection is made until first use.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Establish the connection, retrying with a fixed delay. No-op when connected.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await.map(|_| ())
    }

    /// Write a request without reading its reply.
    ///
    /// The caller must follow with [`read_response`](Self::read_response) for
    /// each reply value; another caller can interleave in between, so prefer
    /// [`send_request_and_read`](Self::send_request_and_read).
    pub async fn send_request(&self, action: &str, params: &[Value]) -> Result<()> {
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        log::debug!("Sending: {} ({} params)", action, params.len());
        conn.busy = true;
        let result = conn.write_request(action, params).await;
        conn.busy = false;
        self.settle(&mut slot, result)
    }

    /// Read exactly one value.
    pub async fn read_response(&self) -> Result<Value> {
        let mut slot = self.conn.lock().await;
        self.discard_abandoned(&mut slot);
        let conn = slot.as_mut().ok_or(WireError::NotConnected)?;
        let result = conn
            .read_frame(self.config.response_timeout())
            .await
            .and_then(Frame::into_value);
        self.settle(&mut slot, result)
    }

    /// Write a request and read exactly `n` reply values under one lock hold.
    pub async fn send_request_and_read(&self, action: &str, params: &[Value], n: usize) -> Result<Vec<Value>> {
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        log::debug!("Sending: {} ({} params, expecting {})", action, params.len(), n);

        let timeout = self.config.response_timeout();
        conn.busy = true;
        let result = match conn.write_request(action, params).await {
            Ok(()) => conn.read_values(n, timeout).await,
            Err(e) => Err(e),
        };
        // All n slots were consumed, even when one of them was malformed
        if result.is_ok() || result.as_ref().is_err_and(WireError::is_recoverable) {
            conn.busy = false;
        }
        if let Ok(values) = &result {
            log::debug!("Received {} values for {}", values.len(), action);
        }
        self.settle(&mut slot, result)
    }

    /// Tell the server we are leaving and close the stream. Safe when disconnected.
    pub async fn disconnect(&self) {
        let mut slot = self.conn.lock().await;
        if let Some(mut conn) = slot.take() {
            if let Err(e) = conn.write_request(Control::DISCONNECT, &[]).await {
                log::debug!("Could not notify server of disconnect: {}", e);
            }
            conn.close().await;
            log::info!("Disconnected from server");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn ensure_connected<'a>(&self, slot: &'a mut Option<Connection>) -> Result<&'a mut Connection> {
        self.discard_abandoned(slot);
        if slot.is_none() {
            *slot = Some(self.open().await?);
            self.connected.store(true, Ordering::SeqCst);
        }
        slot.as_mut().ok_or(WireError::NotConnected)
    }

    async fn open(&self) -> Result<Connection> {
        let addr = self.config.addr();
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            log::info!("Connecting to {} (attempt {}/{})", addr, attempt, attempts);
            match TcpStream::connect(addr.as_str()).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        log::debug!("Could not set TCP_NODELAY: {}", e);
                    }
                    log::info!("Connected to {}", addr);
                    return Ok(Connection::new(stream, self.config.max_frame_bytes));
                }
                Err(e) => {
                    if attempt < attempts {
                        log::warn!(
                            "Connection to {} failed: {}. Retrying in {}ms",
                            addr,
                            e,
                            self.config.retry_delay_ms
                        );
                        tokio::time::sleep(self.config.retry_delay()).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(WireError::Connection {
            addr,
            attempts,
            source: last_error.unwrap_or_else(|| std::io::Error::other("no connection attempt made")),
        })
    }

    /// Drop a connection whose last exchange was cancelled part way through.
    /// Its unread replies would otherwise be handed to the next caller.
    fn discard_abandoned(&self, slot: &mut Option<Connection>) {
        if slot.as_ref().is_some_and(|conn| conn.busy) {
            slot.take();
            self.connected.store(false, Ordering::SeqCst);
            log::warn!("Dropping connection left mid-exchange by a cancelled caller");
        }
    }

    /// Drop the connection after any failure that may have misaligned the stream.
    fn settle<T>(&self, slot: &mut Option<Connection>, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !e.is_recoverable() && slot.take().is_some() {
                self.connected.store(false, Ordering::SeqCst);
                log::warn!("Connection lost: {}", e);
            }
        }
        result
    }
}
