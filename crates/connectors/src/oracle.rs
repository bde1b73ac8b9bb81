//! Market-data seam used by price triggers.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::OracleError;

/// Source of current asset prices.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current quote for `asset`.
    async fn get_quote(&self, asset: &str) -> Result<f64, OracleError>;
}

/// In-memory quote table. Assets without a quote are reported unavailable.
#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    quotes: RwLock<HashMap<String, f64>>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, asset: impl Into<String>, price: f64) {
        self.quotes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(asset.into(), price);
    }

    pub fn clear_quote(&self, asset: &str) {
        self.quotes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(asset);
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn get_quote(&self, asset: &str) -> Result<f64, OracleError> {
        self.quotes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(asset)
            .copied()
            .ok_or_else(|| OracleError::Unavailable {
                asset: asset.to_owned(),
                reason: "no quote".into(),
            })
    }
}
