//! cluster-infra-common - Shared types and utilities
//!
//! This crate provides the pieces shared by the AWS and Exoscale tooling,
//! without any cloud SDK dependencies to keep it lightweight.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`env`]: Environment variable parsing (ports, project names, counts)
//! - [`error`]: Configuration errors
//! - [`stage`]: Network teardown stages and their ordering
//! - [`tags`]: Resource tag keys used for discovery and teardown
//! - [`volume_record`]: JSON records of provisioned volumes

pub mod defaults;
pub mod env;
pub mod error;
pub mod stage;
pub mod tags;
pub mod volume_record;

// Re-export commonly used types
pub use error::ConfigError;
pub use stage::TeardownStage;
pub use volume_record::{Provider, VolumeRecord};
