//! SKS network load balancer teardown
//!
//! The Kubernetes cloud controller creates NLBs for `LoadBalancer` services.
//! They are not part of the Pulumi stack and block deleting the cluster's
//! instance pools, so they are removed before the stack is destroyed.

use super::client::{ExoscaleClient, IdRef};
use super::error::ignore_not_found;
use crate::wait::{PollConfig, wait_until};
use anyhow::{Context, Result};
use cluster_infra_common::defaults::{K8S_LOAD_BALANCER_PREFIX, SKS_CLUSTER_SUFFIX};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Nodepool {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "instance-pool")]
    pub instance_pool: Option<IdRef>,
    /// Flat form some API versions report instead of `instance-pool`
    #[serde(default, rename = "instance-pool-id")]
    pub instance_pool_id: Option<String>,
}

impl Nodepool {
    /// ID of the nodepool's instance pool, in either reported form
    pub fn pool_id(&self) -> Option<&str> {
        self.instance_pool_id
            .as_deref()
            .or_else(|| self.instance_pool.as_ref().map(|p| p.id.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SksCluster {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub nodepools: Vec<Nodepool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstancePool {
    pub id: String,
    #[serde(default)]
    pub instances: Vec<IdRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceTarget {
    #[serde(default)]
    pub instance: Option<IdRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadBalancerService {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "instance-pool", alias = "target-pool")]
    pub instance_pool: Option<IdRef>,
    #[serde(default, rename = "target")]
    pub targets: Vec<ServiceTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub services: Vec<LoadBalancerService>,
}

impl LoadBalancer {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Deserialize)]
struct SksClusterList {
    #[serde(default, rename = "sks-clusters")]
    sks_clusters: Vec<SksCluster>,
}

#[derive(Debug, Deserialize)]
struct LoadBalancerList {
    #[serde(default, rename = "load-balancers")]
    load_balancers: Vec<LoadBalancer>,
}

/// Why a load balancer belongs to the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadBalancerMatch {
    InstancePool(String),
    Instance(String),
    KubernetesPrefix,
}

/// Instance pools and instances backing a cluster's nodepools
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTargets {
    pub instance_pool_ids: BTreeSet<String>,
    pub instance_ids: BTreeSet<String>,
}

/// Decide whether a load balancer targets the cluster.
///
/// Service targets are checked first; the name prefix only applies when
/// `match_prefix` is set.
pub fn match_load_balancer(
    lb: &LoadBalancer,
    targets: &ClusterTargets,
    match_prefix: bool,
) -> Option<LoadBalancerMatch> {
    for service in &lb.services {
        if let Some(pool) = &service.instance_pool {
            if targets.instance_pool_ids.contains(&pool.id) {
                return Some(LoadBalancerMatch::InstancePool(pool.id.clone()));
            }
        }
        if let Some(instance) = service
            .targets
            .iter()
            .filter_map(|t| t.instance.as_ref())
            .find(|i| targets.instance_ids.contains(&i.id))
        {
            return Some(LoadBalancerMatch::Instance(instance.id.clone()));
        }
    }

    let has_prefix = lb
        .name
        .as_deref()
        .is_some_and(|n| n.starts_with(K8S_LOAD_BALANCER_PREFIX));
    (match_prefix && has_prefix).then_some(LoadBalancerMatch::KubernetesPrefix)
}

/// Trait for SKS and NLB operations that can be mocked in tests.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait LoadBalancerApi: Send + Sync {
    /// Cluster with the given name, including its nodepools
    async fn find_cluster(&self, name: &str) -> Result<Option<SksCluster>>;

    async fn get_instance_pool(&self, id: &str) -> Result<Option<InstancePool>>;

    /// Load balancers in the zone, without service details
    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>>;

    /// A load balancer with its services
    async fn get_load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>>;

    async fn delete_load_balancer(&self, id: &str) -> Result<()>;
}

impl LoadBalancerApi for ExoscaleClient {
    async fn find_cluster(&self, name: &str) -> Result<Option<SksCluster>> {
        let list: SksClusterList = self
            .get("/sks-cluster")
            .await
            .context("Failed to list SKS clusters")?;
        let Some(cluster) = list.sks_clusters.into_iter().find(|c| c.name == name) else {
            return Ok(None);
        };
        ignore_not_found(self.get(&format!("/sks-cluster/{}", cluster.id)).await)
            .context("Failed to get SKS cluster")
    }

    async fn get_instance_pool(&self, id: &str) -> Result<Option<InstancePool>> {
        ignore_not_found(self.get(&format!("/instance-pool/{id}")).await)
            .context("Failed to get instance pool")
    }

    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let list: LoadBalancerList = self
            .get("/load-balancer")
            .await
            .context("Failed to list load balancers")?;
        Ok(list.load_balancers)
    }

    async fn get_load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>> {
        ignore_not_found(self.get(&format!("/load-balancer/{id}")).await)
            .context("Failed to get load balancer")
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<()> {
        let result = self.delete(&format!("/load-balancer/{id}")).await;
        match ignore_not_found(result).context("Failed to delete load balancer")? {
            Some(_) => info!(nlb_id = %id, "Load balancer deletion started"),
            None => debug!(nlb_id = %id, "Load balancer already deleted"),
        }
        Ok(())
    }
}

/// Options for [`teardown_load_balancers`]
#[derive(Debug, Clone, Copy)]
pub struct LoadBalancerTeardownConfig {
    /// Also delete NLBs named `k8s-*` that target nothing of this cluster
    pub match_prefix: bool,
    pub poll: PollConfig,
}

impl Default for LoadBalancerTeardownConfig {
    fn default() -> Self {
        Self {
            match_prefix: true,
            poll: PollConfig::NETWORK_LOAD_BALANCER,
        }
    }
}

/// SKS cluster name for a logical cluster name
pub fn sks_cluster_name(cluster_name: &str) -> String {
    format!("{cluster_name}{SKS_CLUSTER_SUFFIX}")
}

async fn cluster_targets<A: LoadBalancerApi>(api: &A, cluster: &SksCluster) -> ClusterTargets {
    let mut targets = ClusterTargets::default();
    for nodepool in &cluster.nodepools {
        let Some(pool_id) = nodepool.pool_id() else {
            continue;
        };
        debug!(nodepool = ?nodepool.name, instance_pool = %pool_id, "Found nodepool");
        targets.instance_pool_ids.insert(pool_id.to_string());

        match api.get_instance_pool(pool_id).await {
            Ok(Some(details)) => {
                targets
                    .instance_ids
                    .extend(details.instances.into_iter().map(|i| i.id));
            }
            Ok(None) => debug!(instance_pool = %pool_id, "Instance pool already deleted"),
            Err(e) => warn!(instance_pool = %pool_id, error = ?e, "Failed to get instance pool"),
        }
    }
    targets
}

/// Delete the NLBs that target an SKS cluster, returning their IDs.
///
/// A missing cluster is not an error and deletes nothing.
pub async fn teardown_load_balancers<A: LoadBalancerApi>(
    api: &A,
    cluster_name: &str,
    config: LoadBalancerTeardownConfig,
) -> Result<Vec<String>> {
    let sks_name = sks_cluster_name(cluster_name);
    let Some(cluster) = api.find_cluster(&sks_name).await? else {
        info!(cluster = %sks_name, "No SKS cluster found, nothing to tear down");
        return Ok(Vec::new());
    };
    info!(cluster = %cluster.name, cluster_id = %cluster.id, "Found SKS cluster");

    let targets = cluster_targets(api, &cluster).await;
    info!(
        instance_pools = targets.instance_pool_ids.len(),
        instances = targets.instance_ids.len(),
        "Collected cluster targets"
    );

    let mut deleted = Vec::new();
    for summary in api.list_load_balancers().await? {
        let Some(lb) = api.get_load_balancer(&summary.id).await? else {
            continue;
        };
        let Some(reason) = match_load_balancer(&lb, &targets, config.match_prefix) else {
            debug!(nlb = %lb.display_name(), "Load balancer does not target the cluster");
            continue;
        };

        info!(nlb = %lb.display_name(), nlb_id = %lb.id, reason = ?reason, "Deleting load balancer");
        api.delete_load_balancer(&lb.id)
            .await
            .with_context(|| format!("Failed to delete load balancer {}", lb.display_name()))?;
        deleted.push(lb.id);
    }

    if deleted.is_empty() {
        info!("No network load balancers to delete");
        return Ok(deleted);
    }

    let gone = wait_until(
        config.poll,
        "network load balancers",
        || api.list_load_balancers(),
        |remaining: &Vec<LoadBalancer>| !remaining.iter().any(|lb| deleted.contains(&lb.id)),
    )
    .await?;
    if gone {
        info!(count = deleted.len(), "All network load balancers deleted");
    } else {
        warn!(count = deleted.len(), "Network load balancers still listed, continuing");
    }
    Ok(deleted)
}
