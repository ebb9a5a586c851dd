//! The small set of errors that propagate to a [`crate::Service`] caller.

use thiserror::Error;

/// Fatal, constructor-time failure. Every other error this crate
/// encounters (malformed datagrams, send failures, unknown handles) is
/// logged and swallowed rather than surfaced, per the protocol's error
/// policy.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The local UDP socket could not be bound.
    #[error("failed to bind local UDP socket: {0}")]
    Bind(#[source] std::io::Error),
}
