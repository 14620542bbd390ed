//! Error types for the GBN transport and streaming pipeline.
//!
//! Corruption, malformed datagrams, stalls, and reassembly starvation are
//! deliberately *not* errors here: the protocol absorbs them silently and
//! surfaces them only through metrics. `TransportError` covers the failures
//! a caller can actually act on.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Main error type for transport and streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("socket error during {context}")]
    Socket {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport channel closed")]
    Closed,

    #[error("send window full ({window_size} packets in flight)")]
    WindowFull { window_size: u16 },

    #[error("frame {frame_id} needs {chunks} chunks, more than the wire format allows")]
    TooManyChunks { frame_id: u32, chunks: usize },

    #[error("bad control request: {reason}")]
    BadRequest { reason: String },

    #[error("media '{name}' not found")]
    NotFound { name: String },

    #[error("server replied with an error status: {status}")]
    ServerStatus { status: u16 },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("invalid configuration: {details}")]
    Config { details: String },
}

impl TransportError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Socket { .. } => true,
            TransportError::WindowFull { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Closed => false,
            TransportError::TooManyChunks { .. } => false,
            TransportError::BadRequest { .. } => false,
            TransportError::NotFound { .. } => false,
            TransportError::ServerStatus { .. } => false,
            TransportError::Config { .. } => false,
        }
    }

    /// Helper constructor for socket errors with operation context.
    pub fn socket(context: impl Into<String>, source: std::io::Error) -> Self {
        TransportError::Socket { context: context.into(), source }
    }

    /// Helper constructor for bad control requests.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        TransportError::BadRequest { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        TransportError::Config { details: details.into() }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Socket { context: "io".to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn messages_contain_their_context(
                context in "\\w+",
                name in "\\w+",
                frame_id in any::<u32>(),
                chunks in 0x1_0000usize..0x10_0000usize,
                duration_ms in 1u64..60_000u64,
            ) {
                let io_err = std::io::Error::other("boom");
                let socket = TransportError::socket(context.clone(), io_err);
                prop_assert!(socket.to_string().contains(&context));

                let not_found = TransportError::NotFound { name: name.clone() };
                prop_assert!(not_found.to_string().contains(&name));

                let too_many = TransportError::TooManyChunks { frame_id, chunks };
                prop_assert!(too_many.to_string().contains(&frame_id.to_string()));
                prop_assert!(too_many.to_string().contains(&chunks.to_string()));

                let timeout =
                    TransportError::Timeout { duration: Duration::from_millis(duration_ms) };
                prop_assert!(!timeout.to_string().is_empty());
            }

            #[test]
            fn io_conversion_preserves_source(details in "[a-z ]{1,40}") {
                let io_err = std::io::Error::other(details.clone());
                let converted: TransportError = io_err.into();
                match converted {
                    TransportError::Socket { source, .. } => {
                        prop_assert_eq!(source.to_string(), details);
                    }
                    _ => prop_assert!(false, "expected Socket variant"),
                }
            }
        }
    }

    #[test]
    fn retryability_classification() {
        let socket = TransportError::socket("send", std::io::Error::other("down"));
        let window = TransportError::WindowFull { window_size: 5 };
        let closed = TransportError::Closed;
        let not_found = TransportError::NotFound { name: "clip".into() };

        assert!(socket.is_retryable());
        assert!(window.is_retryable());
        assert!(!closed.is_retryable());
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn error_is_send_sync_static() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<TransportError>();

        let error = TransportError::bad_request("nope");
        let _: &dyn std::error::Error = &error;
    }
}
