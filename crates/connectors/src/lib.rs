//! `connectors` crate — the `Connector` trait, the connector registry, and the
//! price oracle seam.
//!
//! Every exchange integration must implement [`Connector`]. The engine crate
//! dispatches action nodes through a [`ConnectorRegistry`] keyed by node type.

pub mod error;
pub mod traits;
pub mod registry;
pub mod oracle;
pub mod paper;
pub mod mock;

pub use error::{ConnectorError, OracleError};
pub use traits::{Connector, Credentials, OrderRequest, OrderResult, Side};
pub use registry::ConnectorRegistry;
pub use oracle::{PriceOracle, StaticPriceOracle};
