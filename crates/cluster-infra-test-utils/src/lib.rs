//! Shared test utilities for cluster-infra
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and unique test resource names
//! - [`env`]: Scoped environment variable overrides

pub mod aws;
pub mod env;

// Re-export commonly used items
pub use aws::{get_test_region, test_cluster_name};
pub use env::EnvGuard;
