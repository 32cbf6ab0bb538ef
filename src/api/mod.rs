//! API layer
//!
//! HTTP handlers for:
//! - Access codes (apply, analyze, verify, check)
//! - Admin API
//! - Metrics (Prometheus)

mod access;
mod admin;
mod dto;
pub mod metrics;

pub use dto::*;

pub use access::access_router;
pub use admin::admin_router;
pub use metrics::metrics_router;
