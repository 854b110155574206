use std::fmt;

use thiserror::Error;

/// Failure reported by one of the transport capabilities.
///
/// Wraps whatever the underlying client produced so the binding layer can
/// stay independent of a concrete RPC stack.
#[derive(Debug)]
pub struct TransportError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(format!("{} timed out", operation))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<alloy::transports::TransportError> for TransportError {
    fn from(err: alloy::transports::TransportError) -> Self {
        Self::from_source("rpc request failed", err)
    }
}

/// Everything the binding layer can report to its caller.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("malformed interface description: {0}")]
    MalformedInterface(String),

    #[error("method '{0}' not found in interface")]
    MethodNotFound(String),

    #[error("event '{0}' not found in interface")]
    EventNotFound(String),

    #[error("failed to encode arguments: {0}")]
    Encoding(String),

    #[error("remote call failed: {0}")]
    RemoteCall(#[from] TransportError),

    #[error("failed to decode: {0}")]
    Decoding(String),

    #[error("log subscription dropped: {0}")]
    Subscription(TransportError),
}

impl BindError {
    /// True for errors raised before anything reached the transport.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            BindError::MalformedInterface(_)
                | BindError::MethodNotFound(_)
                | BindError::EventNotFound(_)
                | BindError::Encoding(_)
        )
    }
}

pub type Result<T, E = BindError> = std::result::Result<T, E>;
