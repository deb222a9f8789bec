//! cluster-infra - EKS/SKS infrastructure provisioning and teardown
//!
//! This crate provides the `cluster-infra` binary that tears down cluster
//! networks, manages block-storage volumes and IAM roles, and reports the
//! state of a region.

pub mod aws;
pub mod config;
pub mod exoscale;
pub mod teardown;
pub mod volume;
pub mod wait;
