//! Default configuration values shared by every command
//!
//! These constants keep the AWS and Exoscale tooling consistent with the
//! Pulumi programs that create the resources.

/// Default AWS region when neither `--region`, `REGION` nor `AWS_REGION` is set
pub const DEFAULT_AWS_REGION: &str = "ca-central-1";

/// Default Exoscale zone when `EXOSCALE_ZONE` is not set
pub const DEFAULT_EXOSCALE_ZONE: &str = "ch-gva-2";

/// Tag key used to discover a cluster's VPCs
pub const DEFAULT_VPC_TAG_KEY: &str = "cluster_name";

/// Seconds to wait after releasing elastic IPs before touching security groups
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 10;

/// EBS volume type for provisioned volumes
pub const DEFAULT_EBS_VOLUME_TYPE: &str = "gp3";

/// Suffix the Pulumi program appends to SKS cluster names
pub const SKS_CLUSTER_SUFFIX: &str = "-cluster";

/// Name prefix of network load balancers created by the Kubernetes cloud controller
pub const K8S_LOAD_BALANCER_PREFIX: &str = "k8s-";

/// Logical volume names reported by the status command
pub const EXPECTED_VOLUME_NAMES: &[&str] = &["llm", "eberron-llm", "notebooks"];

/// Default output path of the status report
pub const DEFAULT_STATUS_FILE: &str = "STATUS.md";

/// Node count used when `DEFAULT_NODE_COUNT` is unset or zero
pub const DEFAULT_NODE_COUNT: u32 = 1;

/// Trust policy template of the EKS admin roles
pub const DEFAULT_TRUST_POLICY_TEMPLATE: &str = "policies/trust_policy.json";

/// Inline policy template of the EKS admin roles
pub const DEFAULT_INLINE_POLICY_TEMPLATE: &str = "policies/custom_policy.json";

/// Seconds each network teardown stage waits for its deletions to show up
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 5 * 60;

/// Seconds to wait for NAT gateways to reach `deleted`
pub const DEFAULT_NAT_TIMEOUT_SECS: u64 = 10 * 60;

/// Seconds to wait for each EKS node group and for the cluster to be deleted
pub const DEFAULT_CLUSTER_TIMEOUT_SECS: u64 = 30 * 60;
