//! Crate-wide error taxonomy (spec §7) and its mapping onto gRPC status
//! codes.
//!
//! Every fallible engine method returns `Result<T, ProxyError>`. The
//! per-version RPC activities are the only place that converts a
//! `ProxyError` into a `tonic::Status` — the engine itself never touches
//! `tonic` types.

use thiserror::Error;

/// The error taxonomy from spec §7.
#[derive(Debug, Clone, Error)]
pub enum ProxyErrorKind {
    /// Malformed endpoint, bad filter expression, or similar caller mistake.
    #[error("invalid argument: {0}")]
    ClientInput(String),

    /// The name-service confirmed the topic does not exist.
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    /// No queue with write permission is available for this topic.
    #[error("no writeable queue for topic {0}")]
    NoWriteableQueue(String),

    /// No queue with read permission is available for this topic.
    #[error("no readable queue for topic {0}")]
    NoReadableQueue(String),

    /// A broker-reported, retriable condition (flush timeout, slave
    /// unavailable, ...). The caller — not the proxy — owns retry policy.
    #[error("broker transient error ({code}): {message}")]
    BrokerTransient {
        /// The broker's own response code, surfaced verbatim.
        code: i32,
        /// The broker's remark/message.
        message: String,
    },

    /// The broker connection could not be established, or timed out.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// An unexpected internal condition: decode failure, null response
    /// where one is required, invariant violation.
    #[error("internal error: {0}")]
    Internal(String),

    /// The broker's pop admission queue is full (`POLLING_FULL`).
    #[error("throttled: {0}")]
    Throttled(String),
}

/// The error type returned by every `proxy-core` engine operation.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct ProxyError {
    /// The classified error kind driving the gRPC status mapping.
    pub kind: ProxyErrorKind,
}

impl ProxyError {
    /// Build a `ClientInput` error.
    pub fn client_input(msg: impl Into<String>) -> Self {
        Self {
            kind: ProxyErrorKind::ClientInput(msg.into()),
        }
    }

    /// Build a `TopicNotFound` error.
    pub fn topic_not_found(topic: impl Into<String>) -> Self {
        Self {
            kind: ProxyErrorKind::TopicNotFound(topic.into()),
        }
    }

    /// Build a `NoWriteableQueue` error.
    pub fn no_writeable_queue(topic: impl Into<String>) -> Self {
        Self {
            kind: ProxyErrorKind::NoWriteableQueue(topic.into()),
        }
    }

    /// Build a `NoReadableQueue` error.
    pub fn no_readable_queue(topic: impl Into<String>) -> Self {
        Self {
            kind: ProxyErrorKind::NoReadableQueue(topic.into()),
        }
    }

    /// Build a `BrokerTransient` error.
    pub fn broker_transient(code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: ProxyErrorKind::BrokerTransient {
                code,
                message: message.into(),
            },
        }
    }

    /// Build a `BrokerUnavailable` error.
    pub fn broker_unavailable(msg: impl Into<String>) -> Self {
        Self {
            kind: ProxyErrorKind::BrokerUnavailable(msg.into()),
        }
    }

    /// Build an `Internal` error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            kind: ProxyErrorKind::Internal(msg.into()),
        }
    }

    /// Build a `Throttled` error.
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self {
            kind: ProxyErrorKind::Throttled(msg.into()),
        }
    }

    /// True if this error represents a condition the caller may retry
    /// without changing the request (§7: `BrokerTransient`).
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind, ProxyErrorKind::BrokerTransient { .. })
    }
}

impl From<ProxyErrorKind> for ProxyError {
    fn from(kind: ProxyErrorKind) -> Self {
        Self { kind }
    }
}

impl From<ProxyError> for tonic::Status {
    fn from(err: ProxyError) -> Self {
        use tonic::Code;
        match err.kind {
            ProxyErrorKind::ClientInput(msg) => tonic::Status::new(Code::InvalidArgument, msg),
            ProxyErrorKind::TopicNotFound(topic) => {
                tonic::Status::new(Code::NotFound, format!("topic not found: {topic}"))
            }
            ProxyErrorKind::NoWriteableQueue(topic) => {
                // spec §7: FORBIDDEN is not a standard tonic::Code — encode it
                // as PermissionDenied, which is what the activities map the
                // RPC-surface-specific FORBIDDEN status code onto.
                tonic::Status::new(
                    Code::PermissionDenied,
                    format!("no writeable queue for topic {topic}"),
                )
            }
            ProxyErrorKind::NoReadableQueue(topic) => tonic::Status::new(
                Code::PermissionDenied,
                format!("no readable queue for topic {topic}"),
            ),
            ProxyErrorKind::BrokerTransient { code, message } => tonic::Status::new(
                Code::Unavailable,
                format!("broker transient error ({code}): {message}"),
            ),
            ProxyErrorKind::BrokerUnavailable(msg) => tonic::Status::new(Code::Unavailable, msg),
            ProxyErrorKind::Internal(msg) => tonic::Status::new(Code::Internal, msg),
            ProxyErrorKind::Throttled(msg) => {
                // tonic has no dedicated TOO_MANY_REQUESTS code; ResourceExhausted
                // is the closest standard mapping and is what grpc-gateway-style
                // translators turn back into HTTP 429.
                tonic::Status::new(Code::ResourceExhausted, msg)
            }
        }
    }
}
