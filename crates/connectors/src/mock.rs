//! `MockConnector` — a test double for `Connector`.
//!
//! Useful in unit and integration tests where a real exchange integration is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{Connector, ConnectorError, Credentials, OrderRequest, OrderResult};

/// Behaviour injected into `MockConnector` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Acknowledge every order.
    Acknowledge,
    /// Fail every order with the given error.
    Fail(ConnectorError),
}

/// A mock connector that records every order it receives and answers with a
/// programmer-specified result.
#[derive(Debug, Clone)]
pub struct MockConnector {
    /// Venue name reported in acknowledgements.
    pub venue: String,
    /// What the connector will do when `submit_order` is called.
    pub behaviour: MockBehaviour,
    /// Optional latency applied before answering.
    pub delay: Option<Duration>,
    /// All orders seen by this connector (in call order).
    pub calls: Arc<Mutex<Vec<OrderRequest>>>,
}

impl MockConnector {
    /// Create a mock that always acknowledges.
    pub fn succeeding(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            behaviour: MockBehaviour::Acknowledge,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with `error`.
    pub fn failing(venue: impl Into<String>, error: ConnectorError) -> Self {
        Self {
            behaviour: MockBehaviour::Fail(error),
            ..Self::succeeding(venue)
        }
    }

    /// Sleep for `delay` before answering each order.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of orders this connector has received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Symbols of every received order, in call order.
    pub fn symbols(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|order| order.symbol.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn submit_order(
        &self,
        order: &OrderRequest,
        _credentials: &Credentials,
    ) -> Result<OrderResult, ConnectorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(order.clone());

        match &self.behaviour {
            MockBehaviour::Acknowledge => Ok(OrderResult::acknowledge(&self.venue, order)),
            MockBehaviour::Fail(err) => Err(err.clone()),
        }
    }
}
