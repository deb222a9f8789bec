//! Network operations trait for the teardown sequencer
//!
//! Every call returns provider-independent summaries so the sequencer can be
//! driven by AWS in production and by mocks or in-memory fakes in tests.
//! Mutating calls treat a missing resource as success.

use anyhow::Result;
use std::collections::BTreeSet;

/// A network (VPC) matched by the discovery tag filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LoadBalancerKind {
    #[display("classic")]
    Classic,
    #[display("v2")]
    V2,
}

/// A classic or v2 load balancer in a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerSummary {
    pub kind: LoadBalancerKind,
    pub name: String,
    /// ARN, only for v2 load balancers
    pub arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatGatewaySummary {
    pub id: String,
    pub state: String,
    /// Elastic IP allocations held by the gateway
    pub allocation_ids: Vec<String>,
}

impl NatGatewaySummary {
    pub fn is_deleted(&self) -> bool {
        self.state == "deleted"
    }
}

/// Elastic IP associated with a network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticIpAssociation {
    pub allocation_id: String,
    pub association_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterfaceSummary {
    pub id: String,
    pub subnet_id: Option<String>,
    pub status: String,
    pub description: String,
    pub group_ids: Vec<String>,
    pub elastic_ip: Option<ElasticIpAssociation>,
}

impl NetworkInterfaceSummary {
    /// Detached interfaces can be deleted directly
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }

    pub fn carries_any(&self, groups: &BTreeSet<String>) -> bool {
        self.group_ids.iter().any(|g| groups.contains(g))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupSummary {
    pub id: String,
    pub name: String,
    /// Groups referenced by this group's ingress or egress rules
    pub referenced_groups: BTreeSet<String>,
    /// Whether the group has any ingress or egress rule at all
    pub has_rules: bool,
}

impl SecurityGroupSummary {
    /// The VPC default group is deleted together with the VPC
    pub fn is_default(&self) -> bool {
        self.name == "default"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTableSummary {
    pub id: String,
    pub main: bool,
    /// Explicit subnet associations
    pub association_ids: Vec<String>,
    /// Destination CIDRs of routes targeting an internet gateway
    pub gateway_routes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternetGatewaySummary {
    pub id: String,
    pub attached_vpcs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetSummary {
    pub id: String,
}

/// Trait for network operations that can be mocked in tests.
///
/// Note: slice parameters use `&[String]` instead of `&[&str]` to work
/// around mockall lifetime limitations.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait NetworkOperations: Send + Sync {
    /// Networks whose tag `tag_key` equals `tag_value`
    async fn find_networks(&self, tag_key: &str, tag_value: &str) -> Result<Vec<NetworkSummary>>;

    /// Delete the network itself
    async fn delete_network(&self, vpc_id: &str) -> Result<()>;

    async fn list_load_balancers(&self, vpc_id: &str) -> Result<Vec<LoadBalancerSummary>>;

    async fn delete_load_balancer(&self, load_balancer: &LoadBalancerSummary) -> Result<()>;

    async fn list_nat_gateways(&self, vpc_id: &str) -> Result<Vec<NatGatewaySummary>>;

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()>;

    async fn disassociate_address(&self, association_id: &str) -> Result<()>;

    async fn release_address(&self, allocation_id: &str) -> Result<()>;

    async fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<SecurityGroupSummary>>;

    /// Revoke the rules of `group_id` that reference any of `referenced`
    async fn revoke_group_references(&self, group_id: &str, referenced: &[String]) -> Result<()>;

    /// Revoke every ingress and egress rule of `group_id`
    async fn revoke_all_rules(&self, group_id: &str) -> Result<()>;

    async fn delete_security_group(&self, group_id: &str) -> Result<()>;

    async fn list_network_interfaces(&self, vpc_id: &str) -> Result<Vec<NetworkInterfaceSummary>>;

    /// Replace the security groups of an interface
    async fn set_network_interface_groups(&self, eni_id: &str, group_ids: &[String]) -> Result<()>;

    async fn delete_network_interface(&self, eni_id: &str) -> Result<()>;

    async fn list_route_tables(&self, vpc_id: &str) -> Result<Vec<RouteTableSummary>>;

    async fn delete_route(&self, route_table_id: &str, destination_cidr: &str) -> Result<()>;

    async fn disassociate_route_table(&self, association_id: &str) -> Result<()>;

    async fn delete_route_table(&self, route_table_id: &str) -> Result<()>;

    /// Internet gateways attached to the network
    async fn list_internet_gateways(&self, vpc_id: &str) -> Result<Vec<InternetGatewaySummary>>;

    /// Look up a gateway by ID regardless of attachment, `None` once deleted
    async fn get_internet_gateway(&self, igw_id: &str) -> Result<Option<InternetGatewaySummary>>;

    async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> Result<()>;

    async fn delete_internet_gateway(&self, igw_id: &str) -> Result<()>;

    async fn list_subnets(&self, vpc_id: &str) -> Result<Vec<SubnetSummary>>;

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;
}
