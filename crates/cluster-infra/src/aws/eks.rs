//! EKS cluster teardown
//!
//! Node groups must be gone before `DeleteCluster` is accepted, and the
//! cluster must be gone before its VPC can be torn down.

use crate::aws::context::{AwsContext, FromAwsContext};
use crate::aws::error::{classify, ignore_not_found};
use crate::wait::{PollConfig, wait_until};
use anyhow::{Context, Result, bail};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before retrying a `DeleteCluster` rejected as still in use
pub const DELETE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Outcome of a single `DeleteCluster` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteClusterOutcome {
    Started,
    NotFound,
    /// Rejected because dependent resources still exist
    InUse,
}

/// Trait for EKS operations that can be mocked in tests.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait ClusterOperations: Send + Sync {
    /// Node groups of a cluster, `None` if the cluster does not exist
    async fn list_node_groups(&self, cluster_name: &str) -> Result<Option<Vec<String>>>;

    async fn node_group_exists(&self, cluster_name: &str, node_group: &str) -> Result<bool>;

    async fn delete_node_group(&self, cluster_name: &str, node_group: &str) -> Result<()>;

    async fn delete_cluster(&self, cluster_name: &str) -> Result<DeleteClusterOutcome>;

    async fn list_clusters(&self) -> Result<Vec<String>>;
}

/// What a cluster teardown did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTeardown {
    pub node_groups_deleted: Vec<String>,
    /// False when the cluster did not exist or was still listed at the timeout
    pub cluster_deleted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterTeardownConfig {
    pub node_group_poll: PollConfig,
    pub cluster_poll: PollConfig,
    pub retry_delay: Duration,
}

impl Default for ClusterTeardownConfig {
    fn default() -> Self {
        Self {
            node_group_poll: PollConfig::NODE_GROUP,
            cluster_poll: PollConfig::EKS_CLUSTER,
            retry_delay: DELETE_RETRY_DELAY,
        }
    }
}

/// Delete an EKS cluster and its node groups, waiting for each step.
///
/// A wait that times out is logged and the teardown moves on. A cluster
/// that still has node groups is then rejected by `DeleteCluster` as in use.
pub async fn teardown_cluster<C: ClusterOperations>(
    ops: &C,
    cluster_name: &str,
    config: ClusterTeardownConfig,
) -> Result<ClusterTeardown> {
    let mut result = ClusterTeardown::default();

    let Some(node_groups) = ops.list_node_groups(cluster_name).await? else {
        info!(cluster = %cluster_name, "Cluster does not exist, nothing to tear down");
        return Ok(result);
    };

    for node_group in &node_groups {
        info!(cluster = %cluster_name, node_group = %node_group, "Deleting node group");
        ops.delete_node_group(cluster_name, node_group)
            .await
            .with_context(|| format!("Failed to delete node group {node_group}"))?;

        let deleted = wait_until(
            config.node_group_poll,
            node_group,
            || ops.node_group_exists(cluster_name, node_group),
            |exists: &bool| !*exists,
        )
        .await?;
        if deleted {
            info!(node_group = %node_group, "Node group deleted");
            result.node_groups_deleted.push(node_group.clone());
        } else {
            warn!(node_group = %node_group, "Node group still deleting, continuing");
        }
    }

    let drained = wait_until(
        config.node_group_poll,
        "node groups",
        || ops.list_node_groups(cluster_name),
        |groups: &Option<Vec<String>>| groups.as_ref().is_none_or(|g| g.is_empty()),
    )
    .await?;
    if !drained {
        warn!(cluster = %cluster_name, "Node groups still listed, deleting cluster anyway");
    }

    match ops.delete_cluster(cluster_name).await? {
        DeleteClusterOutcome::Started => {
            info!(cluster = %cluster_name, "Cluster deletion initiated");
        }
        DeleteClusterOutcome::NotFound => {
            info!(cluster = %cluster_name, "Cluster already deleted");
            return Ok(result);
        }
        DeleteClusterOutcome::InUse => {
            warn!(
                cluster = %cluster_name,
                delay_secs = config.retry_delay.as_secs(),
                "Cluster still has resources attached, retrying after delay"
            );
            tokio::time::sleep(config.retry_delay).await;
            match ops.delete_cluster(cluster_name).await? {
                DeleteClusterOutcome::Started => {
                    info!(cluster = %cluster_name, "Cluster deletion initiated after retry");
                }
                DeleteClusterOutcome::NotFound => return Ok(result),
                DeleteClusterOutcome::InUse => {
                    bail!("Cluster {cluster_name} is still in use after retrying deletion")
                }
            }
        }
    }

    let gone = wait_until(
        config.cluster_poll,
        cluster_name,
        || ops.list_clusters(),
        |clusters: &Vec<String>| !clusters.iter().any(|c| c == cluster_name),
    )
    .await?;
    if gone {
        info!(cluster = %cluster_name, "Cluster deleted");
    } else {
        warn!(cluster = %cluster_name, "Cluster still listed, continuing");
    }
    result.cluster_deleted = gone;
    Ok(result)
}

/// EKS operations backed by the AWS SDK
#[derive(Clone)]
pub struct EksClusters {
    client: aws_sdk_eks::Client,
}

impl FromAwsContext for EksClusters {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.eks_client(),
        }
    }
}

/// Cluster name, region and Kubernetes version for the status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    pub version: Option<String>,
}

impl EksClusters {
    /// Describe every cluster in the region
    pub async fn describe_clusters(&self) -> Result<Vec<ClusterInfo>> {
        let mut clusters = Vec::new();
        for name in self.list_clusters().await? {
            let response = self
                .client
                .describe_cluster()
                .name(&name)
                .send()
                .await;
            let Some(response) = ignore_not_found(response).context("Failed to describe cluster")?
            else {
                continue;
            };
            clusters.push(ClusterInfo {
                version: response
                    .cluster()
                    .and_then(|c| c.version())
                    .map(str::to_string),
                name,
            });
        }
        Ok(clusters)
    }
}

impl ClusterOperations for EksClusters {
    async fn list_node_groups(&self, cluster_name: &str) -> Result<Option<Vec<String>>> {
        let mut node_groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let result = self
                .client
                .list_nodegroups()
                .cluster_name(cluster_name)
                .set_next_token(next_token)
                .send()
                .await;
            let Some(response) = ignore_not_found(result).context("Failed to list node groups")?
            else {
                return Ok(None);
            };

            node_groups.extend(response.nodegroups().iter().cloned());
            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        debug!(cluster = %cluster_name, count = node_groups.len(), "Listed node groups");
        Ok(Some(node_groups))
    }

    async fn node_group_exists(&self, cluster_name: &str, node_group: &str) -> Result<bool> {
        let result = self
            .client
            .describe_nodegroup()
            .cluster_name(cluster_name)
            .nodegroup_name(node_group)
            .send()
            .await;
        Ok(ignore_not_found(result)
            .context("Failed to describe node group")?
            .is_some())
    }

    async fn delete_node_group(&self, cluster_name: &str, node_group: &str) -> Result<()> {
        let result = self
            .client
            .delete_nodegroup()
            .cluster_name(cluster_name)
            .nodegroup_name(node_group)
            .send()
            .await;
        match ignore_not_found(result)? {
            Some(_) => info!(node_group = %node_group, "Node group deletion initiated"),
            None => debug!(node_group = %node_group, "Node group already deleted"),
        }
        Ok(())
    }

    async fn delete_cluster(&self, cluster_name: &str) -> Result<DeleteClusterOutcome> {
        match self.client.delete_cluster().name(cluster_name).send().await {
            Ok(_) => Ok(DeleteClusterOutcome::Started),
            Err(e) => {
                let classified = classify(&e);
                if classified.is_not_found() {
                    Ok(DeleteClusterOutcome::NotFound)
                } else if classified.is_dependency_violation() {
                    Ok(DeleteClusterOutcome::InUse)
                } else {
                    Err(anyhow::Error::new(e).context("Failed to delete cluster"))
                }
            }
        }
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let mut clusters = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_clusters()
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to list EKS clusters")?;

            clusters.extend(response.clusters().iter().cloned());
            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(clusters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_missing_cluster_is_already_torn_down() {
        let mut ops = MockClusterOperations::new();
        ops.expect_list_node_groups()
            .with(eq("gone"))
            .returning(|_| Ok(None));
        ops.expect_delete_node_group().never();
        ops.expect_delete_cluster().never();

        let result = teardown_cluster(&ops, "gone", ClusterTeardownConfig::default())
            .await
            .unwrap();

        assert_eq!(result, ClusterTeardown::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletes_node_groups_then_cluster() {
        let mut ops = MockClusterOperations::new();
        let list_calls = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&list_calls);
        ops.expect_list_node_groups().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(vec!["cpu".to_string(), "gpu".to_string()]))
            } else {
                Ok(Some(vec![]))
            }
        });
        ops.expect_delete_node_group()
            .times(2)
            .returning(|_, _| Ok(()));
        ops.expect_node_group_exists().returning(|_, _| Ok(false));
        ops.expect_delete_cluster()
            .times(1)
            .returning(|_| Ok(DeleteClusterOutcome::Started));
        ops.expect_list_clusters()
            .returning(|| Ok(vec!["other".to_string()]));

        let result = teardown_cluster(&ops, "prod", ClusterTeardownConfig::default())
            .await
            .unwrap();

        assert_eq!(result.node_groups_deleted, vec!["cpu", "gpu"]);
        assert!(result.cluster_deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_use_cluster_is_retried_once_after_delay() {
        let mut ops = MockClusterOperations::new();
        ops.expect_list_node_groups().returning(|_| Ok(Some(vec![])));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        ops.expect_delete_cluster().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(DeleteClusterOutcome::InUse)
            } else {
                Ok(DeleteClusterOutcome::Started)
            }
        });
        ops.expect_list_clusters().returning(|| Ok(vec![]));

        let start = tokio::time::Instant::now();
        let result = teardown_cluster(&ops, "prod", ClusterTeardownConfig::default())
            .await
            .unwrap();

        assert!(result.cluster_deleted);
        assert!(start.elapsed() >= DELETE_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_in_use_after_retry_fails() {
        let mut ops = MockClusterOperations::new();
        ops.expect_list_node_groups().returning(|_| Ok(Some(vec![])));
        ops.expect_delete_cluster()
            .times(2)
            .returning(|_| Ok(DeleteClusterOutcome::InUse));
        ops.expect_list_clusters().never();

        let err = teardown_cluster(&ops, "prod", ClusterTeardownConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("still in use"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_node_group_surfaces_as_cluster_in_use() {
        let mut ops = MockClusterOperations::new();
        ops.expect_list_node_groups()
            .returning(|_| Ok(Some(vec!["cpu".to_string()])));
        ops.expect_delete_node_group().returning(|_, _| Ok(()));
        ops.expect_node_group_exists().returning(|_, _| Ok(true));
        ops.expect_delete_cluster()
            .times(2)
            .returning(|_| Ok(DeleteClusterOutcome::InUse));
        ops.expect_list_clusters().never();

        let err = teardown_cluster(&ops, "prod", ClusterTeardownConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("still in use"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_node_group_deletion_within_default_timeout() {
        let mut ops = MockClusterOperations::new();
        let start = tokio::time::Instant::now();
        ops.expect_list_node_groups().returning(move |_| {
            if start.elapsed() < Duration::from_secs(90) {
                Ok(Some(vec!["cpu".to_string()]))
            } else {
                Ok(Some(vec![]))
            }
        });
        ops.expect_delete_node_group().times(1).returning(|_, _| Ok(()));
        ops.expect_node_group_exists()
            .returning(move |_, _| Ok(start.elapsed() < Duration::from_secs(90)));
        ops.expect_delete_cluster()
            .times(1)
            .returning(|_| Ok(DeleteClusterOutcome::Started));
        let cluster_checks = Arc::new(AtomicU32::new(0));
        let checks = Arc::clone(&cluster_checks);
        ops.expect_list_clusters().returning(move || {
            // Cluster deletion takes a few polls as well
            if checks.fetch_add(1, Ordering::SeqCst) < 5 {
                Ok(vec!["demo".to_string()])
            } else {
                Ok(vec![])
            }
        });

        let result = teardown_cluster(&ops, "demo", ClusterTeardownConfig::default())
            .await
            .unwrap();

        assert_eq!(result.node_groups_deleted, vec!["cpu"]);
        assert!(result.cluster_deleted);
        assert!(start.elapsed() >= Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cluster_wait_timeout_is_not_an_error() {
        let mut ops = MockClusterOperations::new();
        ops.expect_list_node_groups().returning(|_| Ok(Some(vec![])));
        ops.expect_delete_cluster()
            .times(1)
            .returning(|_| Ok(DeleteClusterOutcome::Started));
        ops.expect_list_clusters()
            .returning(|| Ok(vec!["demo".to_string()]));

        let config = ClusterTeardownConfig {
            cluster_poll: PollConfig::new(Duration::from_secs(30), Duration::from_secs(10)),
            ..ClusterTeardownConfig::default()
        };
        let result = teardown_cluster(&ops, "demo", config).await.unwrap();

        assert!(!result.cluster_deleted);
    }
}
