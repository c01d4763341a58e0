//! Wire layer - value framing and the action protocol
//!
//! This module provides:
//! - Length-prefixed JSON value codec
//! - Control/status tokens and request/reply shapes
//! - The per-action arity catalog

pub mod actions;
pub mod codec;
pub mod messages;

pub use actions::ActionSpec;
pub use codec::{DEFAULT_MAX_FRAME_BYTES, Frame, ValueCodec, decode_value, encode_value};
pub use messages::{Control, Reply, Request, Response, Status};
