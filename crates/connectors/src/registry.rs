//! Maps node `type` strings to connector implementations.
//!
//! The registry is assembled once at process start and handed to the engine
//! behind an `Arc`; it exposes no mutation afterwards, so lookups need no
//! locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::paper::PaperConnector;
use crate::{Connector, ConnectorError};

/// Node types served by the bundled paper-trading connectors.
pub const PAPER_VENUES: [&str; 3] = ["lighter", "hyperliquid", "backpack"];

/// Read-only lookup table from action node type to [`Connector`].
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry where every known exchange is backed by a [`PaperConnector`].
    pub fn paper_trading() -> Self {
        PAPER_VENUES.iter().fold(Self::new(), |registry, venue| {
            registry.with(*venue, Arc::new(PaperConnector::new(*venue)))
        })
    }

    /// Register `connector` for `node_type`, replacing any previous entry.
    pub fn with(mut self, node_type: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(node_type.into(), connector);
        self
    }

    /// Resolve the connector for `node_type`.
    ///
    /// # Errors
    /// [`ConnectorError::Unsupported`] when nothing is registered for it.
    pub fn get(&self, node_type: &str) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.connectors
            .get(node_type)
            .cloned()
            .ok_or_else(|| ConnectorError::Unsupported(node_type.to_owned()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.connectors.contains_key(node_type)
    }

    /// Registered node types, sorted.
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}
