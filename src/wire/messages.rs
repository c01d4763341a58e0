//! Request and reply shapes for the action protocol.
//!
//! A request is an action token followed by positional parameters; a reply
//! is the fixed number of values the action promises. Nothing on the wire
//! ties a reply to its request, so both sides rely on position alone.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, WireError};

/// Reserved control tokens, handled before dispatch.
pub struct Control;

impl Control {
    /// Keep-alive probe.
    pub const PING: &'static str = "PING";
    /// Keep-alive answer.
    pub const PONG: &'static str = "PONG";
    /// Client is leaving; no reply is sent.
    pub const DISCONNECT: &'static str = "DISCONNECT";
    /// Sole reply to an action the server does not know.
    pub const UNKNOWN_ACTION: &'static str = "UNKNOWN_ACTION";

    /// Whether `action` is reserved and may not be registered.
    pub fn is_reserved(action: &str) -> bool {
        matches!(
            action,
            Self::PING | Self::PONG | Self::DISCONNECT | Self::UNKNOWN_ACTION
        )
    }
}

/// Conventional status tokens carried in the first reply value.
pub struct Status;

impl Status {
    pub const SUCCESS: &'static str = "SUCCESS";
    pub const FAILED: &'static str = "FAILED";
    /// A request parameter could not be decoded.
    pub const MALFORMED_REQUEST: &'static str = "MALFORMED_REQUEST";
}

/// A decoded request as handed to an action handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Action name the request was dispatched under.
    pub action: String,
    /// Positional parameters, in wire order.
    pub params: Vec<Value>,
}

impl Request {
    /// Create a new request.
    pub fn new(action: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }

    /// Decode the parameter at `index` into `T`.
    pub fn param<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.params.get(index).ok_or_else(|| {
            WireError::Protocol(format!("{}: missing parameter {}", self.action, index))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            WireError::Protocol(format!("{}: parameter {} has wrong type: {}", self.action, index, e))
        })
    }
}

/// The ordered reply values of one exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply(Vec<Value>);

impl Reply {
    /// Reply consisting of a single status token.
    pub fn status(status: impl Into<String>) -> Self {
        Self(vec![Value::String(status.into())])
    }

    /// `SUCCESS` followed by a payload.
    pub fn success(payload: Value) -> Self {
        Self::status(Status::SUCCESS).with_payload(payload)
    }

    /// Bare `FAILED`.
    pub fn failed() -> Self {
        Self::status(Status::FAILED)
    }

    /// Reply made of arbitrary values.
    pub fn values(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// A status token padded with `null`s up to `arity` values.
    pub fn padded(status: impl Into<String>, arity: usize) -> Self {
        let mut reply = Self::status(status);
        while reply.0.len() < arity {
            reply.0.push(Value::Null);
        }
        reply
    }

    /// Append a value.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.0.push(payload);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

/// The values a client read back for one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    values: Vec<Value>,
}

impl Response {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// First value as a status token, if it is a string.
    pub fn status(&self) -> Option<&str> {
        self.values.first().and_then(Value::as_str)
    }

    /// Check if this response indicates success.
    pub fn is_success(&self) -> bool {
        self.status() == Some(Status::SUCCESS)
    }

    /// Second value, if the action carries one and it is not null.
    pub fn payload(&self) -> Option<&Value> {
        self.values.get(1).filter(|v| !v.is_null())
    }

    /// Decode the payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.payload()
            .map(|v| serde_json::from_value(v.clone()).map_err(|e| WireError::Protocol(e.to_string())))
            .transpose()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
