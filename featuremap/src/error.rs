//! Failure modes of the bus, the codec and the engine.
//!
//! None of these escape the consume loop: it logs them and carries on (or
//! stops, for a broken stream). They are returned from the engine's public
//! operations so the caller can decide whether to retry.

use std::convert::Infallible;

use thiserror::Error;
use tonic::Status;

/// The bus is unreachable or the handshake failed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("bus unreachable at {0}")]
    Unreachable(String),
    #[error("handshake with {url} failed: {reason}")]
    Handshake { url: String, reason: String },
}

/// The bus refused to open an ordered subscription.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("subscription to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("connection closed")]
    Closed,
    #[error("publish to {topic} failed: {reason}")]
    Failed { topic: String, reason: String },
}

/// A subscription's message stream broke.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("subscriber lagged behind by {0} messages")]
    Lagged(u64),
    #[error("retention log error: {0}")]
    Retention(String),
    #[error("transport error: {0}")]
    Transport(#[from] Status),
}

/// A message payload couldn't be turned in to an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("{0} event without feature data")]
    MissingFeature(String),
    #[error("{0} event for a feature without an id")]
    MissingId(String),
}

/// Convenience result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
}

impl From<Infallible> for BusError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

impl From<BusError> for Status {
    fn from(error: BusError) -> Self {
        match error {
            BusError::Transport(status) => status,
            BusError::Lagged(_) => Status::data_loss(error.to_string()),
            BusError::Retention(_) => Status::internal(error.to_string()),
        }
    }
}

impl From<SubscribeError> for Status {
    fn from(error: SubscribeError) -> Self {
        match error {
            SubscribeError::Rejected { .. } => Status::permission_denied(error.to_string()),
            SubscribeError::Closed => Status::unavailable(error.to_string()),
            SubscribeError::Bus(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;

    #[test]
    fn subscribe_errors_map_to_status() {
        let status: Status = SubscribeError::Rejected {
            topic: "featuremap.a".into(),
            reason: "nope".into(),
        }
        .into();
        assert_eq!(status.code(), Code::PermissionDenied);
        assert!(status.message().contains("featuremap.a"));

        let status: Status = SubscribeError::Bus(BusError::Lagged(3)).into();
        assert_eq!(status.code(), Code::DataLoss);
    }

    #[test]
    fn transport_status_passes_through() {
        let status: Status = BusError::Transport(Status::unavailable("down")).into();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "down");
    }
}
