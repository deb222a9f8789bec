//! AWS modules
//!
//! This module provides wrappers around AWS SDK clients for:
//! - EC2/ELB/ELBv2: Network teardown ([`network`])
//! - EC2: EBS volumes, subnet tags and the status report
//! - EKS: Cluster and node group teardown
//! - IAM: Cluster roles and OIDC admin roles
//! - STS: Account ID lookup

pub mod account;
pub mod admin_role;
pub mod context;
pub mod eks;
pub mod error;
pub mod iam;
pub mod network;
pub mod status;
pub mod subnets;
pub mod tags;
pub mod volume;

// Core clients
pub use account::{AccountId, get_current_account_id, resolve_account_id};
pub use context::{AwsContext, FromAwsContext};
pub use eks::{EksClusters, teardown_cluster};
pub use iam::IamRoles;
pub use network::AwsNetwork;
pub use volume::AwsVolumes;

// Error handling
pub use error::{AwsError, classify_aws_error, ignore_already_exists, ignore_not_found};
