//! Exoscale modules
//!
//! - [`client`]: Signed v2 API client and operation polling
//! - [`sks`]: Network load balancers of SKS clusters
//! - [`volume`]: Block storage volumes and snapshots

pub mod client;
pub mod error;
pub mod sks;
pub mod volume;

pub use client::{ExoscaleClient, ExoscaleCredentials};
pub use error::ExoscaleError;
pub use sks::{LoadBalancerTeardownConfig, teardown_load_balancers};
pub use volume::ExoscaleVolumes;
