//! The `Connector` trait — the contract every exchange integration must fulfil.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ConnectorError;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[serde(alias = "long")]
    Long,
    #[serde(alias = "short")]
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// The order an action node asks a connector to place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub symbol: String,
    pub quantity: f64,
}

/// Acknowledgement returned by the exchange for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Exchange-assigned (or synthetic) order identifier.
    pub order_id: String,
    /// Node type of the connector that placed the order.
    pub venue: String,
    pub side: Side,
    pub symbol: String,
    pub quantity: f64,
    pub submitted_at: DateTime<Utc>,
}

impl OrderResult {
    /// Build an acknowledgement for `request` with a freshly generated order ID.
    pub fn acknowledge(venue: impl Into<String>, request: &OrderRequest) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            venue: venue.into(),
            side: request.side,
            symbol: request.symbol.clone(),
            quantity: request.quantity,
            submitted_at: Utc::now(),
        }
    }
}

/// Opaque reference to secret material attached to a node.
///
/// The engine never looks inside; only connectors interpret it. `Debug`
/// is redacted so credentials never end up in logs.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(Value);

impl Credentials {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Raw secret payload, for connector implementations.
    pub fn expose(&self) -> &Value {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Credentials(<empty>)")
        } else {
            f.write_str("Credentials(<redacted>)")
        }
    }
}

/// Capability over one exchange's order-submission API.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Place `order` using `credentials`.
    async fn submit_order(
        &self,
        order: &OrderRequest,
        credentials: &Credentials,
    ) -> Result<OrderResult, ConnectorError>;
}
