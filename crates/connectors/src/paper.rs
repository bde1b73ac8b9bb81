//! `PaperConnector` — logs orders instead of sending them to an exchange.

use async_trait::async_trait;
use tracing::info;

use crate::{Connector, ConnectorError, Credentials, OrderRequest, OrderResult};

/// Accepts every well-formed order and acknowledges it with a synthetic ID.
#[derive(Debug, Clone)]
pub struct PaperConnector {
    venue: String,
}

impl PaperConnector {
    pub fn new(venue: impl Into<String>) -> Self {
        Self { venue: venue.into() }
    }
}

#[async_trait]
impl Connector for PaperConnector {
    async fn submit_order(
        &self,
        order: &OrderRequest,
        credentials: &Credentials,
    ) -> Result<OrderResult, ConnectorError> {
        if !(order.quantity.is_finite() && order.quantity > 0.0) {
            return Err(ConnectorError::RejectedByExchange(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }

        let result = OrderResult::acknowledge(&self.venue, order);
        info!(
            venue = %self.venue,
            order_id = %result.order_id,
            side = %order.side,
            symbol = %order.symbol,
            quantity = order.quantity,
            has_credentials = !credentials.is_empty(),
            "paper order placed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Side;

    #[tokio::test]
    async fn acknowledges_valid_order() {
        let connector = PaperConnector::new("lighter");
        let order = OrderRequest { side: Side::Long, symbol: "BTC".into(), quantity: 1.0 };
        let result = connector
            .submit_order(&order, &Credentials::default())
            .await
            .expect("paper order should succeed");
        assert_eq!(result.venue, "lighter");
        assert_eq!(result.symbol, "BTC");
        assert!(!result.order_id.is_empty());
    }

    #[tokio::test]
    async fn rejects_non_positive_quantity() {
        let connector = PaperConnector::new("backpack");
        let order = OrderRequest { side: Side::Short, symbol: "ETH".into(), quantity: 0.0 };
        let result = connector.submit_order(&order, &Credentials::default()).await;
        assert!(matches!(result, Err(ConnectorError::RejectedByExchange(_))));
    }
}
