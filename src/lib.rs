//! Chatwire - action-oriented request/response messaging protocol
//!
//! Many client call-sites share one long-lived connection to a server that
//! serves many connections. Each exchange is an action token, its positional
//! parameters, and a fixed number of reply values. There is no correlation
//! id, so correctness rests on strict serialization of exchanges: a FIFO lock
//! around whole exchanges on the client, one sequential worker per connection
//! on the server.

pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use client::{ChatClient, ClientConfig, ConnectionManager};
pub use error::{Result, WireError};
pub use server::{ActionHandler, ActionRegistry, Server, ServerConfig, ShutdownHandle};
pub use wire::{ActionSpec, Reply, Request, Response};
