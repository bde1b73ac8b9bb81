//! Connector-level error types.

use serde::Serialize;
use thiserror::Error;

/// Errors returned by a connector's `submit_order` method.
///
/// A failure only ever fails the branch that issued the order; the engine
/// records the variant in the per-node report and moves on.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ConnectorError {
    /// The exchange refused the supplied credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The exchange accepted the request but rejected the order.
    #[error("order rejected by exchange: {0}")]
    RejectedByExchange(String),

    /// The exchange throttled the request.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The request never got a definitive answer.
    #[error("network error: {0}")]
    Network(String),

    /// No connector is registered for the node type.
    #[error("no connector registered for node type '{0}'")]
    Unsupported(String),
}

/// Errors returned by a [`PriceOracle`](crate::PriceOracle).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    /// No quote can be produced for the asset right now.
    #[error("price oracle unavailable for '{asset}': {reason}")]
    Unavailable { asset: String, reason: String },
}
