//! Shared configuration, error types, IDs, and observability primitives for fedq crates.
//!
//! Architecture role:
//! - defines engine configuration and the normalized backend configuration
//! - provides common [`FedqError`] / [`Result`] contracts
//! - hosts the Prometheus-backed metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{EngineConfig, SourceConfig};
pub use error::{FedqError, Result};
pub use ids::*;
pub use metrics::MetricsRegistry;
