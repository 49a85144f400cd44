//! Message-framed connection seen by a session
//!
//! The connection is split in two halves so that the dispatch loop owns the
//! only writer while a separate reader task owns the read side.

use async_trait::async_trait;

/// Errors raised by the underlying connection
#[derive(Debug, thiserror::Error)]
#[error("transport error: {source}")]
pub struct TransportError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// What the reader observed on the inbound side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Any data or control frame; its content is ignored
    Frame,
    /// The client sent a close frame
    Close,
}

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one data payload as a text frame
    async fn send_text(&mut self, payload: String) -> Result<(), TransportError>;

    /// Send an empty liveness ping control frame
    async fn send_ping(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Wait for the next inbound frame
    ///
    /// Returns `None` once the connection is gone.
    async fn recv(&mut self) -> Option<Result<Inbound, TransportError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traits_are_object_safe() {
        fn _assert_sink(_: Box<dyn FrameSink>) {}
        fn _assert_source(_: Box<dyn FrameSource>) {}
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new("connection reset");
        assert_eq!(err.to_string(), "transport error: connection reset");
        assert!(std::error::Error::source(&err).is_some());
    }
}
