use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Map session failed to initialize. Fatal to the view instance; surfaced as
/// a persistent error state, never retried automatically.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("map session initialization failed: {message}")]
pub struct InitError {
    pub message: String,
}

impl InitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Event stream disconnect. Recovered by reconnect-on-demand; events lost
/// while disconnected are not replayed.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("event stream transport failed: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

