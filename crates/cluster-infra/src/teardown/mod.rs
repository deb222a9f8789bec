//! Network teardown sequencer
//!
//! Deletes a cluster's networks and everything that depends on them, one
//! [`TeardownStage`] at a time. Each stage waits until the provider confirms
//! its deletions before the next stage starts. A wait that times out is
//! logged and the run moves on, but the network itself is only deleted once
//! every dependent kind reports zero remaining resources.
//!
//! Networks are torn down sequentially and independently. There is no
//! rollback: a failed stage leaves the network partially deleted, and a
//! re-run picks up where the previous one stopped because missing resources
//! count as already deleted.

mod operations;

pub use operations::{
    ElasticIpAssociation, InternetGatewaySummary, LoadBalancerKind, LoadBalancerSummary,
    NatGatewaySummary, NetworkInterfaceSummary, NetworkOperations, NetworkSummary,
    RouteTableSummary, SecurityGroupSummary, SubnetSummary,
};

#[cfg(test)]
pub use operations::MockNetworkOperations;

use crate::wait::{PollConfig, wait_until};
use anyhow::{Context, Result, bail};
use cluster_infra_common::TeardownStage;
use cluster_infra_common::defaults::{DEFAULT_SETTLE_DELAY_SECS, DEFAULT_VPC_TAG_KEY};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Settings for a teardown run
#[derive(Debug, Clone)]
pub struct TeardownConfig {
    /// Value of the discovery tag
    pub cluster_name: String,
    /// Tag key matched against the cluster name
    pub tag_key: String,
    /// Sleep after releasing elastic IPs
    pub settle_delay: Duration,
    /// List what would be deleted without mutating anything
    pub dry_run: bool,
    /// Poll settings for most waits
    pub poll: PollConfig,
    /// Poll settings for NAT gateway deletion
    pub nat_poll: PollConfig,
}

impl TeardownConfig {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            tag_key: DEFAULT_VPC_TAG_KEY.to_string(),
            settle_delay: Duration::from_secs(DEFAULT_SETTLE_DELAY_SECS),
            dry_run: false,
            poll: PollConfig::NETWORK,
            nat_poll: PollConfig::NAT_GATEWAY,
        }
    }
}

/// Per-kind counts of a teardown run.
///
/// In dry-run mode the counts are what would have been deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub networks_found: usize,
    pub networks: usize,
    pub load_balancers: usize,
    pub nat_gateways: usize,
    pub elastic_ips: usize,
    pub security_groups: usize,
    /// Interfaces moved off the deleted security groups
    pub interfaces_detached: usize,
    pub network_interfaces: usize,
    pub internet_gateways: usize,
    pub route_tables: usize,
    pub subnets: usize,
}

impl TeardownReport {
    /// Number of resources deleted or released
    pub fn total_deleted(&self) -> usize {
        self.networks
            + self.load_balancers
            + self.nat_gateways
            + self.elastic_ips
            + self.security_groups
            + self.network_interfaces
            + self.internet_gateways
            + self.route_tables
            + self.subnets
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} networks, {} load balancers, {} NAT gateways, {} elastic IPs, \
             {} security groups, {} interfaces, {} internet gateways, {} route tables, {} subnets",
            self.networks,
            self.networks_found,
            self.load_balancers,
            self.nat_gateways,
            self.elastic_ips,
            self.security_groups,
            self.network_interfaces,
            self.internet_gateways,
            self.route_tables,
            self.subnets
        )
    }
}

/// Wait for a stage's deletions to show up.
///
/// A timeout is logged and the stage carries on. The network delete is
/// still guarded by [`NetworkTeardown::remaining_dependents`].
async fn confirm<T, F, Fut, P>(
    poll: PollConfig,
    vpc_id: &str,
    what: &str,
    check: F,
    cond: P,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&T) -> bool,
{
    if !wait_until(poll, what, check, cond).await? {
        warn!(
            vpc_id = %vpc_id,
            resource = %what,
            timeout = ?poll.timeout,
            "Wait timed out, continuing"
        );
    }
    Ok(())
}

/// Groups an interface keeps after the target groups are removed.
///
/// An interface must carry at least one group, so an interface left with
/// none falls back to the VPC default group.
fn replacement_groups(
    current: &[String],
    targets: &BTreeSet<String>,
    default_group: Option<&str>,
) -> Result<Vec<String>> {
    let remaining: Vec<String> = current
        .iter()
        .filter(|g| !targets.contains(*g))
        .cloned()
        .collect();
    if !remaining.is_empty() {
        return Ok(remaining);
    }
    match default_group {
        Some(default) => Ok(vec![default.to_string()]),
        None => bail!("No default security group to move the interface to"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Full,
    LoadBalancers,
}

/// Ordered teardown of every network tagged with a cluster name
pub struct NetworkTeardown<'a, N: NetworkOperations> {
    ops: &'a N,
    config: TeardownConfig,
}

impl<'a, N: NetworkOperations> NetworkTeardown<'a, N> {
    pub fn new(ops: &'a N, config: TeardownConfig) -> Self {
        Self { ops, config }
    }

    /// Discover and tear down every matching network.
    pub async fn run(&self) -> Result<TeardownReport> {
        self.run_scoped(Scope::Full).await
    }

    /// Delete only the load balancers of every matching network.
    ///
    /// Frees the ENIs the load balancer controller left behind so that a
    /// later infrastructure destroy does not stall on them.
    pub async fn run_load_balancers(&self) -> Result<TeardownReport> {
        self.run_scoped(Scope::LoadBalancers).await
    }

    async fn run_scoped(&self, scope: Scope) -> Result<TeardownReport> {
        let mut report = TeardownReport::default();

        info!(
            stage = %TeardownStage::Discover,
            tag_key = %self.config.tag_key,
            cluster = %self.config.cluster_name,
            dry_run = self.config.dry_run,
            "Discovering networks"
        );
        let networks = self
            .ops
            .find_networks(&self.config.tag_key, &self.config.cluster_name)
            .await
            .context("Failed to discover networks")?;
        report.networks_found = networks.len();

        if networks.is_empty() {
            info!(cluster = %self.config.cluster_name, "No networks found, nothing to tear down");
            return Ok(report);
        }

        let mut failures = Vec::new();
        for network in &networks {
            let result = match (scope, self.config.dry_run) {
                (Scope::Full, true) => self.plan_network(network, &mut report).await,
                (Scope::Full, false) => self.teardown_network(network, &mut report).await,
                (Scope::LoadBalancers, true) => {
                    let count = self.ops.list_load_balancers(&network.id).await.map(|lbs| lbs.len());
                    count.map(|n| {
                        info!(vpc_id = %network.id, count = n, "Dry run: would delete load balancers");
                        report.load_balancers += n;
                    })
                }
                (Scope::LoadBalancers, false) => self
                    .delete_load_balancers(&network.id, &mut report)
                    .await
                    .with_context(|| format!("Stage {} failed", TeardownStage::LoadBalancers)),
            };
            if let Err(e) = result {
                error!(vpc_id = %network.id, error = ?e, "Network teardown failed");
                failures.push((network.id.clone(), e));
            }
        }

        info!(%report, "Teardown finished");

        match failures.len() {
            0 => Ok(report),
            1 => {
                let (vpc_id, e) = failures.remove(0);
                Err(e.context(format!("Failed to tear down network {vpc_id}")))
            }
            n => {
                let ids: Vec<_> = failures.iter().map(|(id, _)| id.as_str()).collect();
                bail!("Failed to tear down {n} networks: {}", ids.join(", "))
            }
        }
    }

    async fn teardown_network(
        &self,
        network: &NetworkSummary,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let vpc_id = network.id.as_str();
        info!(vpc_id = %vpc_id, name = ?network.name, "Tearing down network");

        self.delete_load_balancers(vpc_id, report)
            .await
            .with_context(|| format!("Stage {} failed", TeardownStage::LoadBalancers))?;
        let allocation_ids = self
            .delete_nat_gateways(vpc_id, report)
            .await
            .with_context(|| format!("Stage {} failed", TeardownStage::NatGateways))?;
        self.release_elastic_ips(vpc_id, allocation_ids, report)
            .await
            .with_context(|| format!("Stage {} failed", TeardownStage::ElasticIps))?;
        self.delete_security_groups(vpc_id, report)
            .await
            .with_context(|| format!("Stage {} failed", TeardownStage::SecurityGroups))?;
        self.delete_internet_gateways(vpc_id, report)
            .await
            .with_context(|| format!("Stage {} failed", TeardownStage::InternetGateways))?;
        self.delete_subnets(vpc_id, report)
            .await
            .with_context(|| format!("Stage {} failed", TeardownStage::Subnets))?;
        self.delete_network(vpc_id, report)
            .await
            .with_context(|| format!("Stage {} failed", TeardownStage::Network))?;

        info!(vpc_id = %vpc_id, "Network deleted");
        Ok(())
    }

    async fn delete_load_balancers(&self, vpc_id: &str, report: &mut TeardownReport) -> Result<()> {
        let ops = self.ops;
        let load_balancers = ops.list_load_balancers(vpc_id).await?;
        if load_balancers.is_empty() {
            debug!(vpc_id = %vpc_id, "No load balancers");
            return Ok(());
        }

        info!(
            stage = %TeardownStage::LoadBalancers,
            vpc_id = %vpc_id,
            count = load_balancers.len(),
            "Deleting load balancers"
        );
        for lb in &load_balancers {
            debug!(kind = %lb.kind, name = %lb.name, "Deleting load balancer");
            ops.delete_load_balancer(lb).await?;
            report.load_balancers += 1;
        }

        confirm(
            self.config.poll,
            vpc_id,
            "load balancers",
            move || ops.list_load_balancers(vpc_id),
            |lbs: &Vec<LoadBalancerSummary>| lbs.is_empty(),
        )
        .await
    }

    /// Returns the elastic IP allocations the gateways held, since a deleted
    /// gateway no longer links them to the network.
    async fn delete_nat_gateways(
        &self,
        vpc_id: &str,
        report: &mut TeardownReport,
    ) -> Result<BTreeSet<String>> {
        let ops = self.ops;
        let gateways = ops.list_nat_gateways(vpc_id).await?;
        let allocation_ids: BTreeSet<String> = gateways
            .iter()
            .flat_map(|gw| gw.allocation_ids.iter().cloned())
            .collect();

        let live: Vec<_> = gateways.iter().filter(|gw| !gw.is_deleted()).collect();
        if live.is_empty() {
            debug!(vpc_id = %vpc_id, "No NAT gateways");
            return Ok(allocation_ids);
        }

        info!(
            stage = %TeardownStage::NatGateways,
            vpc_id = %vpc_id,
            count = live.len(),
            "Deleting NAT gateways"
        );
        for gw in live {
            debug!(nat_gateway_id = %gw.id, state = %gw.state, "Deleting NAT gateway");
            ops.delete_nat_gateway(&gw.id).await?;
            report.nat_gateways += 1;
        }

        confirm(
            self.config.nat_poll,
            vpc_id,
            "NAT gateways",
            move || ops.list_nat_gateways(vpc_id),
            |gws: &Vec<NatGatewaySummary>| gws.iter().all(NatGatewaySummary::is_deleted),
        )
        .await?;

        Ok(allocation_ids)
    }

    async fn release_elastic_ips(
        &self,
        vpc_id: &str,
        mut allocation_ids: BTreeSet<String>,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let interfaces = self.ops.list_network_interfaces(vpc_id).await?;
        for eip in interfaces.iter().filter_map(|eni| eni.elastic_ip.as_ref()) {
            if let Some(association_id) = &eip.association_id {
                debug!(association_id = %association_id, "Disassociating elastic IP");
                self.ops.disassociate_address(association_id).await?;
            }
            allocation_ids.insert(eip.allocation_id.clone());
        }

        if allocation_ids.is_empty() {
            debug!(vpc_id = %vpc_id, "No elastic IPs");
            return Ok(());
        }

        info!(
            stage = %TeardownStage::ElasticIps,
            vpc_id = %vpc_id,
            count = allocation_ids.len(),
            "Releasing elastic IPs"
        );
        for allocation_id in &allocation_ids {
            self.ops.release_address(allocation_id).await?;
            report.elastic_ips += 1;
        }

        if !self.config.settle_delay.is_zero() {
            debug!(delay = ?self.config.settle_delay, "Waiting for elastic IP release to settle");
            tokio::time::sleep(self.config.settle_delay).await;
        }
        Ok(())
    }

    async fn delete_security_groups(
        &self,
        vpc_id: &str,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let ops = self.ops;
        let groups = ops.list_security_groups(vpc_id).await?;
        let targets: BTreeSet<String> = groups
            .iter()
            .filter(|g| !g.is_default())
            .map(|g| g.id.clone())
            .collect();
        if targets.is_empty() {
            debug!(vpc_id = %vpc_id, "No non-default security groups");
            return Ok(());
        }
        let default_group = groups.iter().find(|g| g.is_default()).map(|g| g.id.as_str());

        info!(
            stage = %TeardownStage::SecurityGroups,
            vpc_id = %vpc_id,
            count = targets.len(),
            "Deleting security groups"
        );

        // Any group, default included, may reference a target. Strip those
        // rules first so reference cycles cannot block the deletes.
        for group in &groups {
            let referenced: Vec<String> = group
                .referenced_groups
                .intersection(&targets)
                .cloned()
                .collect();
            if !referenced.is_empty() {
                debug!(sg_id = %group.id, referenced = ?referenced, "Revoking cross-group rules");
                ops.revoke_group_references(&group.id, &referenced).await?;
            }
        }

        for group in groups
            .iter()
            .filter(|g| targets.contains(&g.id) && g.has_rules)
        {
            debug!(sg_id = %group.id, "Revoking all rules");
            ops.revoke_all_rules(&group.id).await?;
        }

        let interfaces = ops.list_network_interfaces(vpc_id).await?;
        for eni in interfaces.iter().filter(|eni| eni.carries_any(&targets)) {
            let groups = replacement_groups(&eni.group_ids, &targets, default_group)
                .with_context(|| format!("Cannot detach security groups from {}", eni.id))?;
            debug!(eni_id = %eni.id, groups = ?groups, "Replacing interface security groups");
            ops.set_network_interface_groups(&eni.id, &groups).await?;
            report.interfaces_detached += 1;
        }

        confirm(
            self.config.poll,
            vpc_id,
            "security group detachment",
            move || ops.list_network_interfaces(vpc_id),
            |enis: &Vec<NetworkInterfaceSummary>| !enis.iter().any(|e| e.carries_any(&targets)),
        )
        .await?;

        for group_id in &targets {
            debug!(sg_id = %group_id, "Deleting security group");
            ops.delete_security_group(group_id).await?;
            report.security_groups += 1;
        }

        confirm(
            self.config.poll,
            vpc_id,
            "security groups",
            move || ops.list_security_groups(vpc_id),
            |groups: &Vec<SecurityGroupSummary>| groups.iter().all(SecurityGroupSummary::is_default),
        )
        .await
    }

    async fn delete_internet_gateways(
        &self,
        vpc_id: &str,
        report: &mut TeardownReport,
    ) -> Result<()> {
        let ops = self.ops;

        for table in ops.list_route_tables(vpc_id).await? {
            for destination in &table.gateway_routes {
                debug!(route_table_id = %table.id, destination = %destination, "Deleting gateway route");
                ops.delete_route(&table.id, destination).await?;
            }
        }

        let gateways = ops.list_internet_gateways(vpc_id).await?;
        if gateways.is_empty() {
            debug!(vpc_id = %vpc_id, "No internet gateways");
            return Ok(());
        }

        info!(
            stage = %TeardownStage::InternetGateways,
            vpc_id = %vpc_id,
            count = gateways.len(),
            "Detaching and deleting internet gateways"
        );
        for gw in &gateways {
            ops.detach_internet_gateway(&gw.id, vpc_id).await?;
        }

        confirm(
            self.config.poll,
            vpc_id,
            "internet gateway detachment",
            move || ops.list_internet_gateways(vpc_id),
            |gws: &Vec<InternetGatewaySummary>| gws.is_empty(),
        )
        .await?;

        for gw in &gateways {
            ops.delete_internet_gateway(&gw.id).await?;
            report.internet_gateways += 1;
        }

        let ids: Vec<String> = gateways.into_iter().map(|gw| gw.id).collect();
        let ids = &ids;
        confirm(
            self.config.poll,
            vpc_id,
            "internet gateway deletion",
            move || async move {
                let mut remaining = 0usize;
                for id in ids {
                    if ops.get_internet_gateway(id).await?.is_some() {
                        remaining += 1;
                    }
                }
                Ok::<_, anyhow::Error>(remaining)
            },
            |remaining: &usize| *remaining == 0,
        )
        .await
    }

    async fn delete_subnets(&self, vpc_id: &str, report: &mut TeardownReport) -> Result<()> {
        let ops = self.ops;

        for eni in ops.list_network_interfaces(vpc_id).await? {
            if eni.is_available() {
                debug!(eni_id = %eni.id, description = %eni.description, "Deleting detached interface");
                ops.delete_network_interface(&eni.id).await?;
                report.network_interfaces += 1;
            }
        }

        let subnets = ops.list_subnets(vpc_id).await?;
        if subnets.is_empty() {
            debug!(vpc_id = %vpc_id, "No subnets");
            return Ok(());
        }
        let subnet_ids: BTreeSet<String> = subnets.iter().map(|s| s.id.clone()).collect();

        info!(
            stage = %TeardownStage::Subnets,
            vpc_id = %vpc_id,
            count = subnets.len(),
            "Deleting subnets"
        );

        confirm(
            self.config.poll,
            vpc_id,
            "subnet network interfaces",
            move || ops.list_network_interfaces(vpc_id),
            |enis: &Vec<NetworkInterfaceSummary>| {
                !enis
                    .iter()
                    .any(|e| e.subnet_id.as_ref().is_some_and(|s| subnet_ids.contains(s)))
            },
        )
        .await?;

        for subnet in &subnets {
            ops.delete_subnet(&subnet.id).await?;
            report.subnets += 1;
        }

        confirm(
            self.config.poll,
            vpc_id,
            "subnets",
            move || ops.list_subnets(vpc_id),
            |subnets: &Vec<SubnetSummary>| subnets.is_empty(),
        )
        .await
    }

    /// Dependent resources still present in the network, by kind.
    async fn remaining_dependents(&self, vpc_id: &str) -> Result<Vec<String>> {
        let ops = self.ops;
        let counts = [
            ("load balancers", ops.list_load_balancers(vpc_id).await?.len()),
            (
                "NAT gateways",
                ops.list_nat_gateways(vpc_id)
                    .await?
                    .iter()
                    .filter(|gw| !gw.is_deleted())
                    .count(),
            ),
            (
                "security groups",
                ops.list_security_groups(vpc_id)
                    .await?
                    .iter()
                    .filter(|g| !g.is_default())
                    .count(),
            ),
            ("internet gateways", ops.list_internet_gateways(vpc_id).await?.len()),
            ("subnets", ops.list_subnets(vpc_id).await?.len()),
        ];
        Ok(counts
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(kind, n)| format!("{n} {kind}"))
            .collect())
    }

    async fn delete_network(&self, vpc_id: &str, report: &mut TeardownReport) -> Result<()> {
        let ops = self.ops;

        let remaining = self.remaining_dependents(vpc_id).await?;
        if !remaining.is_empty() {
            bail!(
                "Network {vpc_id} still has dependent resources: {}",
                remaining.join(", ")
            );
        }

        for table in ops.list_route_tables(vpc_id).await? {
            if table.main {
                continue;
            }
            for association_id in &table.association_ids {
                ops.disassociate_route_table(association_id).await?;
            }
            debug!(route_table_id = %table.id, "Deleting route table");
            ops.delete_route_table(&table.id).await?;
            report.route_tables += 1;
        }

        info!(stage = %TeardownStage::Network, vpc_id = %vpc_id, "Deleting network");
        ops.delete_network(vpc_id).await?;
        report.networks += 1;

        let tag_key = self.config.tag_key.as_str();
        let cluster_name = self.config.cluster_name.as_str();
        confirm(
            self.config.poll,
            vpc_id,
            "network deletion",
            move || ops.find_networks(tag_key, cluster_name),
            |networks: &Vec<NetworkSummary>| !networks.iter().any(|n| n.id == vpc_id),
        )
        .await
    }

    /// Dry run: list everything the stages would delete.
    async fn plan_network(&self, network: &NetworkSummary, report: &mut TeardownReport) -> Result<()> {
        let ops = self.ops;
        let vpc_id = network.id.as_str();

        let load_balancers: Vec<String> = ops
            .list_load_balancers(vpc_id)
            .await?
            .into_iter()
            .map(|lb| format!("{} ({})", lb.name, lb.kind))
            .collect();
        let nat_gateways: Vec<NatGatewaySummary> = ops
            .list_nat_gateways(vpc_id)
            .await?
            .into_iter()
            .filter(|gw| !gw.is_deleted())
            .collect();
        let interfaces = ops.list_network_interfaces(vpc_id).await?;
        let mut elastic_ips: BTreeSet<String> = nat_gateways
            .iter()
            .flat_map(|gw| gw.allocation_ids.iter().cloned())
            .collect();
        elastic_ips.extend(
            interfaces
                .iter()
                .filter_map(|eni| eni.elastic_ip.as_ref())
                .map(|eip| eip.allocation_id.clone()),
        );
        let security_groups: Vec<String> = ops
            .list_security_groups(vpc_id)
            .await?
            .into_iter()
            .filter(|g| !g.is_default())
            .map(|g| g.id)
            .collect();
        let detached: Vec<&str> = interfaces
            .iter()
            .filter(|eni| eni.is_available())
            .map(|eni| eni.id.as_str())
            .collect();
        let internet_gateways: Vec<String> = ops
            .list_internet_gateways(vpc_id)
            .await?
            .into_iter()
            .map(|gw| gw.id)
            .collect();
        let subnets: Vec<String> = ops
            .list_subnets(vpc_id)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        let route_tables: Vec<String> = ops
            .list_route_tables(vpc_id)
            .await?
            .into_iter()
            .filter(|t| !t.main)
            .map(|t| t.id)
            .collect();
        let nat_gateway_ids: Vec<&str> = nat_gateways.iter().map(|gw| gw.id.as_str()).collect();

        info!(
            vpc_id = %vpc_id,
            name = ?network.name,
            load_balancers = ?load_balancers,
            nat_gateways = ?nat_gateway_ids,
            elastic_ips = ?elastic_ips,
            security_groups = ?security_groups,
            network_interfaces = ?detached,
            internet_gateways = ?internet_gateways,
            subnets = ?subnets,
            route_tables = ?route_tables,
            "Dry run: would delete"
        );

        report.load_balancers += load_balancers.len();
        report.nat_gateways += nat_gateways.len();
        report.elastic_ips += elastic_ips.len();
        report.security_groups += security_groups.len();
        report.network_interfaces += detached.len();
        report.internet_gateways += internet_gateways.len();
        report.subnets += subnets.len();
        report.route_tables += route_tables.len();
        report.networks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> TeardownConfig {
        TeardownConfig {
            settle_delay: Duration::from_secs(10),
            ..TeardownConfig::new("demo")
        }
    }

    fn network(id: &str) -> NetworkSummary {
        NetworkSummary {
            id: id.to_string(),
            name: Some("demo-vpc".to_string()),
        }
    }

    fn default_group() -> SecurityGroupSummary {
        SecurityGroupSummary {
            id: "sg-default".into(),
            name: "default".into(),
            referenced_groups: BTreeSet::new(),
            has_rules: true,
        }
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_replacement_groups_keeps_other_groups() {
        let targets: BTreeSet<String> = ids(&["sg-a"]).into_iter().collect();
        let groups = replacement_groups(&ids(&["sg-a", "sg-keep"]), &targets, Some("sg-default"));
        assert_eq!(groups.unwrap(), ids(&["sg-keep"]));
    }

    #[test]
    fn test_replacement_groups_falls_back_to_default() {
        let targets: BTreeSet<String> = ids(&["sg-a", "sg-b"]).into_iter().collect();
        let groups = replacement_groups(&ids(&["sg-a", "sg-b"]), &targets, Some("sg-default"));
        assert_eq!(groups.unwrap(), ids(&["sg-default"]));

        assert!(replacement_groups(&ids(&["sg-a"]), &targets, None).is_err());
    }

    #[test]
    fn test_report_totals() {
        let report = TeardownReport {
            networks_found: 1,
            networks: 1,
            subnets: 2,
            interfaces_detached: 5,
            ..Default::default()
        };
        assert_eq!(report.total_deleted(), 3);
        assert!(report.to_string().starts_with("1/1 networks"));
    }

    #[tokio::test]
    async fn test_no_networks_issues_no_calls() {
        let mut mock = MockNetworkOperations::new();
        mock.expect_find_networks()
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let report = NetworkTeardown::new(&mock, fast_config())
            .run()
            .await
            .unwrap();

        assert_eq!(report, TeardownReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_network_only_deletes_network() {
        let mut mock = MockNetworkOperations::new();
        let discoveries = AtomicU32::new(0);
        mock.expect_find_networks().returning(move |key, value| {
            assert_eq!(key, DEFAULT_VPC_TAG_KEY);
            assert_eq!(value, "demo");
            if discoveries.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![network("vpc-1")])
            } else {
                Ok(vec![])
            }
        });
        mock.expect_list_load_balancers().returning(|_| Ok(vec![]));
        mock.expect_list_nat_gateways().returning(|_| Ok(vec![]));
        mock.expect_list_network_interfaces().returning(|_| Ok(vec![]));
        mock.expect_list_security_groups()
            .returning(|_| Ok(vec![default_group()]));
        mock.expect_list_internet_gateways().returning(|_| Ok(vec![]));
        mock.expect_list_subnets().returning(|_| Ok(vec![]));
        mock.expect_list_route_tables().returning(|_| {
            Ok(vec![RouteTableSummary {
                id: "rtb-main".into(),
                main: true,
                association_ids: vec![],
                gateway_routes: vec![],
            }])
        });
        mock.expect_delete_security_group().never();
        mock.expect_release_address().never();
        mock.expect_delete_route_table().never();
        mock.expect_delete_network()
            .times(1)
            .withf(|vpc_id| vpc_id == "vpc-1")
            .returning(|_| Ok(()));

        let report = NetworkTeardown::new(&mock, fast_config())
            .run()
            .await
            .unwrap();

        assert_eq!(report.networks_found, 1);
        assert_eq!(report.total_deleted(), 1);
    }

    #[tokio::test]
    async fn test_load_balancer_scope_leaves_network() {
        let mut mock = MockNetworkOperations::new();
        let deleted = std::sync::Arc::new(AtomicU32::new(0));
        mock.expect_find_networks()
            .returning(|_, _| Ok(vec![network("vpc-1")]));
        let listed = deleted.clone();
        mock.expect_list_load_balancers().returning(move |_| {
            if listed.load(Ordering::SeqCst) == 0 {
                Ok(vec![LoadBalancerSummary {
                    kind: LoadBalancerKind::Classic,
                    name: "k8s-elb".into(),
                    arn: None,
                }])
            } else {
                Ok(vec![])
            }
        });
        let counter = deleted.clone();
        mock.expect_delete_load_balancer().times(1).returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        mock.expect_list_nat_gateways().never();
        mock.expect_delete_network().never();

        let report = NetworkTeardown::new(&mock, fast_config())
            .run_load_balancers()
            .await
            .unwrap();

        assert_eq!(report.load_balancers, 1);
        assert_eq!(report.networks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_never_reaches_network_delete() {
        let mut mock = MockNetworkOperations::new();
        mock.expect_find_networks()
            .returning(|_, _| Ok(vec![network("vpc-1")]));
        mock.expect_list_load_balancers().returning(|_| {
            Ok(vec![LoadBalancerSummary {
                kind: LoadBalancerKind::Classic,
                name: "stuck".into(),
                arn: None,
            }])
        });
        mock.expect_delete_load_balancer().returning(|_| Ok(()));
        mock.expect_list_nat_gateways().returning(|_| Ok(vec![]));
        mock.expect_list_network_interfaces().returning(|_| Ok(vec![]));
        mock.expect_list_security_groups()
            .returning(|_| Ok(vec![default_group()]));
        mock.expect_list_route_tables().returning(|_| Ok(vec![]));
        mock.expect_list_internet_gateways().returning(|_| Ok(vec![]));
        mock.expect_list_subnets().returning(|_| Ok(vec![]));
        mock.expect_delete_route_table().never();
        mock.expect_delete_network().never();

        let err = NetworkTeardown::new(&mock, fast_config())
            .run()
            .await
            .unwrap_err();

        let chain = format!("{err:#}");
        assert!(chain.contains("1 load balancers"), "{chain}");
        assert!(chain.contains("vpc-1"), "{chain}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stage_wait_times_out_and_continues() {
        let mut mock = MockNetworkOperations::new();
        let discoveries = AtomicU32::new(0);
        mock.expect_find_networks().returning(move |_, _| {
            if discoveries.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![network("vpc-1")])
            } else {
                Ok(vec![])
            }
        });
        // Initial listing plus four polls, then gone once the wait gave up
        let listings = AtomicU32::new(0);
        mock.expect_list_load_balancers().returning(move |_| {
            if listings.fetch_add(1, Ordering::SeqCst) < 5 {
                Ok(vec![LoadBalancerSummary {
                    kind: LoadBalancerKind::Classic,
                    name: "slow".into(),
                    arn: None,
                }])
            } else {
                Ok(vec![])
            }
        });
        mock.expect_delete_load_balancer().times(1).returning(|_| Ok(()));
        mock.expect_list_nat_gateways().returning(|_| Ok(vec![]));
        mock.expect_list_network_interfaces().returning(|_| Ok(vec![]));
        mock.expect_list_security_groups()
            .returning(|_| Ok(vec![default_group()]));
        mock.expect_list_route_tables().returning(|_| Ok(vec![]));
        mock.expect_list_internet_gateways().returning(|_| Ok(vec![]));
        mock.expect_list_subnets().returning(|_| Ok(vec![]));
        mock.expect_delete_network()
            .times(1)
            .withf(|vpc_id| vpc_id == "vpc-1")
            .returning(|_| Ok(()));

        let config = TeardownConfig {
            poll: PollConfig::new(Duration::from_secs(30), Duration::from_secs(10)),
            ..fast_config()
        };
        let report = NetworkTeardown::new(&mock, config).run().await.unwrap();

        assert_eq!(report.load_balancers, 1);
        assert_eq!(report.networks, 1);
    }

    /// In-memory VPC enforcing the provider's dependency rules.
    #[derive(Default)]
    struct FakeState {
        networks: Vec<NetworkSummary>,
        load_balancers: Vec<LoadBalancerSummary>,
        nat_gateways: Vec<NatGatewaySummary>,
        addresses: BTreeSet<String>,
        security_groups: Vec<SecurityGroupSummary>,
        interfaces: Vec<NetworkInterfaceSummary>,
        route_tables: Vec<RouteTableSummary>,
        internet_gateways: Vec<InternetGatewaySummary>,
        subnets: Vec<SubnetSummary>,
        /// Network whose listings fail
        broken_network: Option<String>,
        mutations: Vec<String>,
    }

    struct FakeNetwork {
        state: Mutex<FakeState>,
    }

    impl FakeNetwork {
        fn with(state: FakeState) -> Self {
            Self {
                state: Mutex::new(state),
            }
        }

        fn mutations(&self) -> Vec<String> {
            self.state.lock().unwrap().mutations.clone()
        }

        fn position(&self, mutation: &str) -> usize {
            self.mutations()
                .iter()
                .position(|m| m == mutation)
                .unwrap_or_else(|| panic!("{mutation} never happened"))
        }
    }

    fn eni(id: &str, subnet: &str, status: &str, description: &str, groups: &[&str]) -> NetworkInterfaceSummary {
        NetworkInterfaceSummary {
            id: id.into(),
            subnet_id: Some(subnet.into()),
            status: status.into(),
            description: description.into(),
            group_ids: ids(groups),
            elastic_ip: None,
        }
    }

    fn group(id: &str, references: &[&str]) -> SecurityGroupSummary {
        SecurityGroupSummary {
            id: id.into(),
            name: format!("{id}-name"),
            referenced_groups: ids(references).into_iter().collect(),
            has_rules: true,
        }
    }

    /// A VPC with every resource kind, two security groups referencing each
    /// other, and a default group referencing one of them.
    fn populated_vpc() -> FakeState {
        let mut nat_eni = eni("eni-nat", "subnet-a", "in-use", "Interface for NAT Gateway nat-1", &[]);
        nat_eni.elastic_ip = Some(ElasticIpAssociation {
            allocation_id: "eipalloc-nat".into(),
            association_id: Some("eipassoc-nat".into()),
        });
        let mut node_eni = eni("eni-node", "subnet-b", "available", "node", &["sg-a", "sg-b"]);
        node_eni.elastic_ip = Some(ElasticIpAssociation {
            allocation_id: "eipalloc-node".into(),
            association_id: Some("eipassoc-node".into()),
        });

        let mut default = default_group();
        default.referenced_groups.insert("sg-a".into());

        FakeState {
            networks: vec![network("vpc-1")],
            load_balancers: vec![
                LoadBalancerSummary {
                    kind: LoadBalancerKind::Classic,
                    name: "k8s-elb".into(),
                    arn: None,
                },
                LoadBalancerSummary {
                    kind: LoadBalancerKind::V2,
                    name: "app".into(),
                    arn: Some("arn:aws:elasticloadbalancing:app".into()),
                },
            ],
            nat_gateways: vec![NatGatewaySummary {
                id: "nat-1".into(),
                state: "available".into(),
                allocation_ids: ids(&["eipalloc-nat"]),
            }],
            addresses: ids(&["eipalloc-nat", "eipalloc-node"]).into_iter().collect(),
            security_groups: vec![default, group("sg-a", &["sg-b"]), group("sg-b", &["sg-a"])],
            interfaces: vec![
                eni("eni-elb", "subnet-a", "in-use", "ELB k8s-elb", &["sg-a"]),
                nat_eni,
                node_eni,
                eni("eni-orphan", "subnet-a", "available", "orphan", &["sg-default"]),
            ],
            route_tables: vec![
                RouteTableSummary {
                    id: "rtb-main".into(),
                    main: true,
                    association_ids: vec![],
                    gateway_routes: ids(&["0.0.0.0/0"]),
                },
                RouteTableSummary {
                    id: "rtb-public".into(),
                    main: false,
                    association_ids: ids(&["rtbassoc-1"]),
                    gateway_routes: ids(&["0.0.0.0/0"]),
                },
            ],
            internet_gateways: vec![InternetGatewaySummary {
                id: "igw-1".into(),
                attached_vpcs: ids(&["vpc-1"]),
            }],
            subnets: vec![
                SubnetSummary {
                    id: "subnet-a".into(),
                },
                SubnetSummary {
                    id: "subnet-b".into(),
                },
            ],
            broken_network: None,
            mutations: vec![],
        }
    }

    impl NetworkOperations for FakeNetwork {
        async fn find_networks(&self, tag_key: &str, tag_value: &str) -> Result<Vec<NetworkSummary>> {
            if tag_key != DEFAULT_VPC_TAG_KEY || tag_value != "demo" {
                return Ok(vec![]);
            }
            Ok(self.state.lock().unwrap().networks.clone())
        }

        async fn delete_network(&self, vpc_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            if !s.subnets.is_empty()
                || s.security_groups.iter().any(|g| !g.is_default())
                || !s.internet_gateways.is_empty()
                || s.route_tables.iter().any(|t| !t.main)
                || s.nat_gateways.iter().any(|gw| !gw.is_deleted())
            {
                bail!("DependencyViolation: {vpc_id} has dependencies");
            }
            s.networks.retain(|n| n.id != vpc_id);
            s.mutations.push(format!("delete_network {vpc_id}"));
            Ok(())
        }

        async fn list_load_balancers(&self, vpc_id: &str) -> Result<Vec<LoadBalancerSummary>> {
            let s = self.state.lock().unwrap();
            if s.broken_network.as_deref() == Some(vpc_id) {
                bail!("RequestLimitExceeded: describe load balancers in {vpc_id}");
            }
            Ok(s.load_balancers.clone())
        }

        async fn delete_load_balancer(&self, load_balancer: &LoadBalancerSummary) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            s.load_balancers.retain(|lb| lb.name != load_balancer.name);
            let description = format!("ELB {}", load_balancer.name);
            s.interfaces.retain(|eni| eni.description != description);
            s.mutations
                .push(format!("delete_load_balancer {}", load_balancer.name));
            Ok(())
        }

        async fn list_nat_gateways(&self, _vpc_id: &str) -> Result<Vec<NatGatewaySummary>> {
            Ok(self.state.lock().unwrap().nat_gateways.clone())
        }

        async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            for gw in s.nat_gateways.iter_mut().filter(|gw| gw.id == nat_gateway_id) {
                gw.state = "deleted".into();
            }
            let description = format!("Interface for NAT Gateway {nat_gateway_id}");
            s.interfaces.retain(|eni| eni.description != description);
            s.mutations.push(format!("delete_nat_gateway {nat_gateway_id}"));
            Ok(())
        }

        async fn disassociate_address(&self, association_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            for eip in s.interfaces.iter_mut().filter_map(|e| e.elastic_ip.as_mut()) {
                if eip.association_id.as_deref() == Some(association_id) {
                    eip.association_id = None;
                }
            }
            s.mutations.push(format!("disassociate_address {association_id}"));
            Ok(())
        }

        async fn release_address(&self, allocation_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            let in_use = s.interfaces.iter().any(|e| {
                e.elastic_ip
                    .as_ref()
                    .is_some_and(|eip| eip.allocation_id == allocation_id && eip.association_id.is_some())
            });
            if in_use {
                bail!("InvalidIPAddress.InUse: {allocation_id}");
            }
            for eni in &mut s.interfaces {
                if eni.elastic_ip.as_ref().is_some_and(|eip| eip.allocation_id == allocation_id) {
                    eni.elastic_ip = None;
                }
            }
            if s.addresses.remove(allocation_id) {
                s.mutations.push(format!("release_address {allocation_id}"));
            }
            Ok(())
        }

        async fn list_security_groups(&self, _vpc_id: &str) -> Result<Vec<SecurityGroupSummary>> {
            Ok(self.state.lock().unwrap().security_groups.clone())
        }

        async fn revoke_group_references(&self, group_id: &str, referenced: &[String]) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            for g in s.security_groups.iter_mut().filter(|g| g.id == group_id) {
                g.referenced_groups.retain(|r| !referenced.contains(r));
            }
            s.mutations.push(format!("revoke_group_references {group_id}"));
            Ok(())
        }

        async fn revoke_all_rules(&self, group_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            for g in s.security_groups.iter_mut().filter(|g| g.id == group_id) {
                g.referenced_groups.clear();
                g.has_rules = false;
            }
            s.mutations.push(format!("revoke_all_rules {group_id}"));
            Ok(())
        }

        async fn delete_security_group(&self, group_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            if s.security_groups
                .iter()
                .any(|g| g.referenced_groups.contains(group_id))
            {
                bail!("DependencyViolation: {group_id} is referenced by another group");
            }
            if s.interfaces
                .iter()
                .any(|e| e.group_ids.iter().any(|g| g == group_id))
            {
                bail!("DependencyViolation: {group_id} is attached to an interface");
            }
            s.security_groups.retain(|g| g.id != group_id);
            s.mutations.push(format!("delete_security_group {group_id}"));
            Ok(())
        }

        async fn list_network_interfaces(&self, _vpc_id: &str) -> Result<Vec<NetworkInterfaceSummary>> {
            Ok(self.state.lock().unwrap().interfaces.clone())
        }

        async fn set_network_interface_groups(&self, eni_id: &str, group_ids: &[String]) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            for eni in s.interfaces.iter_mut().filter(|e| e.id == eni_id) {
                eni.group_ids = group_ids.to_vec();
            }
            s.mutations.push(format!("set_network_interface_groups {eni_id}"));
            Ok(())
        }

        async fn delete_network_interface(&self, eni_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            if s.interfaces.iter().any(|e| e.id == eni_id && !e.is_available()) {
                bail!("InvalidNetworkInterface.InUse: {eni_id}");
            }
            s.interfaces.retain(|e| e.id != eni_id);
            s.mutations.push(format!("delete_network_interface {eni_id}"));
            Ok(())
        }

        async fn list_route_tables(&self, _vpc_id: &str) -> Result<Vec<RouteTableSummary>> {
            Ok(self.state.lock().unwrap().route_tables.clone())
        }

        async fn delete_route(&self, route_table_id: &str, destination_cidr: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            for t in s.route_tables.iter_mut().filter(|t| t.id == route_table_id) {
                t.gateway_routes.retain(|d| d != destination_cidr);
            }
            s.mutations.push(format!("delete_route {route_table_id}"));
            Ok(())
        }

        async fn disassociate_route_table(&self, association_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            for t in &mut s.route_tables {
                t.association_ids.retain(|a| a != association_id);
            }
            s.mutations.push(format!("disassociate_route_table {association_id}"));
            Ok(())
        }

        async fn delete_route_table(&self, route_table_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            if s.route_tables
                .iter()
                .any(|t| t.id == route_table_id && (t.main || !t.association_ids.is_empty()))
            {
                bail!("DependencyViolation: {route_table_id} is main or associated");
            }
            s.route_tables.retain(|t| t.id != route_table_id);
            s.mutations.push(format!("delete_route_table {route_table_id}"));
            Ok(())
        }

        async fn list_internet_gateways(&self, vpc_id: &str) -> Result<Vec<InternetGatewaySummary>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .internet_gateways
                .iter()
                .filter(|gw| gw.attached_vpcs.iter().any(|v| v == vpc_id))
                .cloned()
                .collect())
        }

        async fn get_internet_gateway(&self, igw_id: &str) -> Result<Option<InternetGatewaySummary>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .internet_gateways
                .iter()
                .find(|gw| gw.id == igw_id)
                .cloned())
        }

        async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            if s.interfaces.iter().any(|e| e.elastic_ip.is_some()) {
                bail!("DependencyViolation: network has mapped public addresses");
            }
            for gw in s.internet_gateways.iter_mut().filter(|gw| gw.id == igw_id) {
                gw.attached_vpcs.retain(|v| v != vpc_id);
            }
            s.mutations.push(format!("detach_internet_gateway {igw_id}"));
            Ok(())
        }

        async fn delete_internet_gateway(&self, igw_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            if s.internet_gateways
                .iter()
                .any(|gw| gw.id == igw_id && !gw.attached_vpcs.is_empty())
            {
                bail!("DependencyViolation: {igw_id} is still attached");
            }
            s.internet_gateways.retain(|gw| gw.id != igw_id);
            s.mutations.push(format!("delete_internet_gateway {igw_id}"));
            Ok(())
        }

        async fn list_subnets(&self, _vpc_id: &str) -> Result<Vec<SubnetSummary>> {
            Ok(self.state.lock().unwrap().subnets.clone())
        }

        async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            if s.interfaces
                .iter()
                .any(|e| e.subnet_id.as_deref() == Some(subnet_id))
            {
                bail!("DependencyViolation: {subnet_id} has network interfaces");
            }
            s.subnets.retain(|sub| sub.id != subnet_id);
            s.mutations.push(format!("delete_subnet {subnet_id}"));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_teardown_of_populated_network() {
        let fake = FakeNetwork::with(populated_vpc());

        let report = NetworkTeardown::new(&fake, fast_config())
            .run()
            .await
            .unwrap();

        assert_eq!(
            report,
            TeardownReport {
                networks_found: 1,
                networks: 1,
                load_balancers: 2,
                nat_gateways: 1,
                elastic_ips: 2,
                security_groups: 2,
                interfaces_detached: 1,
                network_interfaces: 2,
                internet_gateways: 1,
                route_tables: 1,
                subnets: 2,
            }
        );

        let s = fake.state.lock().unwrap();
        assert!(s.networks.is_empty());
        assert!(s.addresses.is_empty());
        assert!(s.interfaces.is_empty());
        assert_eq!(s.security_groups.len(), 1);
        assert!(s.security_groups[0].is_default());
        assert_eq!(s.route_tables.len(), 1);
        assert!(s.route_tables[0].main);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_network_does_not_stop_the_next() {
        let mut state = populated_vpc();
        state.networks = vec![network("vpc-bad"), network("vpc-1")];
        state.broken_network = Some("vpc-bad".into());
        let fake = FakeNetwork::with(state);

        let err = NetworkTeardown::new(&fake, fast_config())
            .run()
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("vpc-bad"), "{message}");
        assert!(!message.contains("vpc-1"), "{message}");
        assert!(fake.mutations().contains(&"delete_network vpc-1".to_string()));
        assert!(!fake.mutations().iter().any(|m| m.ends_with("vpc-bad")));
        let s = fake.state.lock().unwrap();
        assert_eq!(s.networks, vec![network("vpc-bad")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_security_group_cycle_broken_before_delete() {
        let fake = FakeNetwork::with(populated_vpc());

        NetworkTeardown::new(&fake, fast_config())
            .run()
            .await
            .unwrap();

        let first_delete = fake.position("delete_security_group sg-a")
            .min(fake.position("delete_security_group sg-b"));
        assert!(fake.position("revoke_group_references sg-a") < first_delete);
        assert!(fake.position("revoke_group_references sg-b") < first_delete);
        assert!(fake.position("revoke_group_references sg-default") < first_delete);
        assert!(fake.position("set_network_interface_groups eni-node") < first_delete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_run_in_dependency_order() {
        let fake = FakeNetwork::with(populated_vpc());

        NetworkTeardown::new(&fake, fast_config())
            .run()
            .await
            .unwrap();

        let order = [
            "delete_load_balancer k8s-elb",
            "delete_nat_gateway nat-1",
            "release_address eipalloc-nat",
            "delete_security_group sg-a",
            "detach_internet_gateway igw-1",
            "delete_internet_gateway igw-1",
            "delete_subnet subnet-a",
            "delete_route_table rtb-public",
            "delete_network vpc-1",
        ];
        let positions: Vec<usize> = order.iter().map(|m| fake.position(m)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_issues_no_deletions() {
        let fake = FakeNetwork::with(populated_vpc());
        let teardown = NetworkTeardown::new(&fake, fast_config());

        teardown.run().await.unwrap();
        let after_first = fake.mutations().len();

        let report = teardown.run().await.unwrap();

        assert_eq!(report.total_deleted(), 0);
        assert_eq!(fake.mutations().len(), after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_lists_without_mutating() {
        let fake = FakeNetwork::with(populated_vpc());
        let config = TeardownConfig {
            dry_run: true,
            ..fast_config()
        };

        let report = NetworkTeardown::new(&fake, config).run().await.unwrap();

        assert!(fake.mutations().is_empty());
        assert_eq!(report.networks, 1);
        assert_eq!(report.load_balancers, 2);
        assert_eq!(report.nat_gateways, 1);
        assert_eq!(report.elastic_ips, 2);
        assert_eq!(report.security_groups, 2);
        assert_eq!(report.network_interfaces, 2);
        assert_eq!(report.subnets, 2);
        assert_eq!(report.route_tables, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_after_release() {
        let fake = FakeNetwork::with(populated_vpc());
        let start = tokio::time::Instant::now();

        NetworkTeardown::new(&fake, fast_config())
            .run()
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
