//! Connection worker - the per-connection read/dispatch/write loop.
//!
//! A worker owns its stream exclusively and serves one request at a time in
//! arrival order, so a handler can assume nothing else touches the stream
//! during its turn.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WireError};
use crate::server::ServerConfig;
use crate::server::active::ActiveGuard;
use crate::server::registry::ActionRegistry;
use crate::wire::{Control, Frame, Reply, Request, Status, ValueCodec};

type FrameReader = FramedRead<OwnedReadHalf, ValueCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, ValueCodec>;

/// Outcome of one turn of the loop.
enum Turn {
    Continue,
    Closed,
}

pub(crate) struct Worker {
    conn_id: u64,
    peer: SocketAddr,
    reader: FrameReader,
    writer: FrameWriter,
    registry: Arc<ActionRegistry>,
    read_timeout: Duration,
    close: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        guard: &ActiveGuard,
        registry: Arc<ActionRegistry>,
        config: &ServerConfig,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let codec = ValueCodec::with_max_length(config.max_frame_bytes);
        Self {
            conn_id: guard.id(),
            peer,
            reader: FramedRead::new(read_half, codec.clone()),
            writer: FramedWrite::new(write_half, codec),
            registry,
            read_timeout: config.read_timeout(),
            close: guard.close_token(),
        }
    }

    /// Serve the connection until it ends, then release the stream.
    pub(crate) async fn run(mut self) {
        tracing::info!(conn_id = self.conn_id, peer = %self.peer, "Connection worker started");

        match self.serve().await {
            Ok(()) => {
                tracing::info!(conn_id = self.conn_id, peer = %self.peer, "Client disconnected");
            }
            Err(WireError::Transport(e)) => {
                tracing::info!(conn_id = self.conn_id, peer = %self.peer, error = %e, "Client connection lost");
            }
            Err(e) => {
                tracing::error!(conn_id = self.conn_id, peer = %self.peer, error = %e, "Connection terminated");
            }
        }

        self.cleanup().await;
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let Some(frame) = self.read_frame().await? else {
                return Ok(());
            };

            let action = match frame {
                Frame::Value(Value::String(action)) => action,
                Frame::Value(other) => {
                    tracing::warn!(conn_id = self.conn_id, token = %other, "Ignoring non-string action token");
                    continue;
                }
                Frame::Malformed(reason) => {
                    tracing::warn!(conn_id = self.conn_id, reason = %reason, "Ignoring malformed frame");
                    continue;
                }
            };

            match action.as_str() {
                Control::PING => {
                    self.write(vec![Value::String(Control::PONG.to_string())]).await?;
                    continue;
                }
                Control::DISCONNECT => {
                    tracing::info!(conn_id = self.conn_id, peer = %self.peer, "Client requested disconnect");
                    return Ok(());
                }
                _ => {}
            }

            if let Turn::Closed = self.dispatch(action).await? {
                return Ok(());
            }
        }
    }

    /// Pull the declared params, run the handler, write its reply.
    async fn dispatch(&mut self, action: String) -> Result<Turn> {
        let registry = Arc::clone(&self.registry);
        let Some(entry) = registry.get(&action) else {
            tracing::warn!(conn_id = self.conn_id, action = %action, "Unknown action");
            self.write(vec![Value::String(Control::UNKNOWN_ACTION.to_string())]).await?;
            return Ok(Turn::Continue);
        };
        let spec = entry.spec;

        tracing::info!(conn_id = self.conn_id, peer = %self.peer, action = %action, "Processing action");

        let mut params = Vec::with_capacity(spec.param_count());
        let mut malformed = None;
        for name in spec.params {
            match self.read_frame().await? {
                None => return Ok(Turn::Closed),
                Some(Frame::Value(value)) => params.push(value),
                Some(Frame::Malformed(reason)) => {
                    malformed.get_or_insert(format!("{}: parameter {} malformed: {}", action, name, reason));
                    params.push(Value::Null);
                }
            }
        }

        let reply = match malformed {
            Some(reason) => {
                tracing::warn!(conn_id = self.conn_id, reason = %reason, "Rejecting request");
                Reply::padded(Status::MALFORMED_REQUEST, spec.replies)
            }
            None => match registry.dispatch(entry, Request::new(action, params)).await {
                Ok(reply) => reply,
                Err(WireError::Protocol(reason)) => {
                    tracing::warn!(conn_id = self.conn_id, reason = %reason, "Rejecting request");
                    Reply::padded(Status::MALFORMED_REQUEST, spec.replies)
                }
                Err(e) => return Err(e),
            },
        };

        self.write(reply.into_values()).await?;
        Ok(Turn::Continue)
    }

    /// Next frame, or `None` once the connection is over (EOF, idle timeout, server close).
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        tokio::select! {
            biased;
            _ = self.close.cancelled() => {
                tracing::debug!(conn_id = self.conn_id, "Closed by server");
                Ok(None)
            }
            read = tokio::time::timeout(self.read_timeout, self.reader.next()) => match read {
                Err(_) => {
                    tracing::info!(
                        conn_id = self.conn_id,
                        timeout_ms = self.read_timeout.as_millis() as u64,
                        "Read timeout"
                    );
                    Ok(None)
                }
                Ok(None) => Ok(None),
                Ok(Some(Ok(frame))) => Ok(Some(frame)),
                Ok(Some(Err(e))) => Err(WireError::Transport(e)),
            },
        }
    }

    async fn write(&mut self, values: Vec<Value>) -> Result<()> {
        for value in values {
            self.writer.feed(value).await.map_err(WireError::Transport)?;
        }
        self.writer.flush().await.map_err(WireError::Transport)
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.writer.close().await {
            tracing::debug!(conn_id = self.conn_id, error = %e, "Error closing connection");
        }
    }
}
