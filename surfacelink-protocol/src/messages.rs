//! Request and response message types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named request parameters
pub type Params = Map<String, Value>;

/// Message sent from a client to the bridge
///
/// The `type` discriminant selects the command; `params` defaults to an empty
/// object when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub params: Params,
}

impl Request {
    /// Create a request with no parameters
    pub fn new(command_type: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
            params: Params::new(),
        }
    }

    /// Create a request from a JSON value holding the parameters
    ///
    /// Non-object values are treated as no parameters.
    pub fn with_params(command_type: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        Self {
            command_type: command_type.into(),
            params,
        }
    }
}

/// Message sent from the bridge back to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    /// Command completed; `result` carries the handler output
    Success { result: Value },
    /// Command could not be decoded, dispatched or executed
    Error { message: String },
}

impl Response {
    /// Successful response
    pub fn success(result: Value) -> Self {
        Self::Success { result }
    }

    /// Successful response with an empty result object
    pub fn empty() -> Self {
        Self::Success {
            result: Value::Object(Map::new()),
        }
    }

    /// Error response carrying a display message
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Check whether this is a success response
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Result payload of a success response
    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Success { result } => Some(result),
            Self::Error { .. } => None,
        }
    }
}
