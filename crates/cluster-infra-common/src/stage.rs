//! Network teardown stages and ordering
//!
//! The provider rejects deleting a resource that still has live dependents,
//! so stages run strictly in this order and each one waits for its
//! deletions to be confirmed before the next starts.

use std::fmt;

/// Stages of a network teardown, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TeardownStage {
    /// Find networks tagged with the cluster name
    Discover,
    /// Classic and v2 load balancers (hold ENIs and security groups)
    LoadBalancers,
    /// NAT gateways (hold elastic IPs)
    NatGateways,
    /// Elastic IPs left behind by NAT gateways and interfaces
    ElasticIps,
    /// Non-default security groups, after breaking cross-group references
    SecurityGroups,
    /// Internet gateway routes, attachment and gateway
    InternetGateways,
    /// Subnets, once no interfaces remain in them
    Subnets,
    /// Route tables and the network itself
    Network,
}

impl TeardownStage {
    /// All stages in execution order
    pub const ALL: [TeardownStage; 8] = [
        TeardownStage::Discover,
        TeardownStage::LoadBalancers,
        TeardownStage::NatGateways,
        TeardownStage::ElasticIps,
        TeardownStage::SecurityGroups,
        TeardownStage::InternetGateways,
        TeardownStage::Subnets,
        TeardownStage::Network,
    ];

    /// 1-based position used in progress logs
    pub fn number(self) -> usize {
        self as usize + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TeardownStage::Discover => "discover",
            TeardownStage::LoadBalancers => "load-balancers",
            TeardownStage::NatGateways => "nat-gateways",
            TeardownStage::ElasticIps => "elastic-ips",
            TeardownStage::SecurityGroups => "security-groups",
            TeardownStage::InternetGateways => "internet-gateways",
            TeardownStage::Subnets => "subnets",
            TeardownStage::Network => "network",
        }
    }
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.number(), Self::ALL.len(), self.as_str())
    }
}
