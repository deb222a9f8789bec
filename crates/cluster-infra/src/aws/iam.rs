//! IAM roles for EKS clusters and node groups

use crate::aws::context::{AwsContext, FromAwsContext};
use crate::aws::error::{ignore_already_exists, ignore_not_found};
use anyhow::{Context, Result};
use aws_sdk_iam::Client;
use serde_json::{Value, json};
use tracing::{info, warn};

/// AWS managed policies attached to the cluster role
pub const CLUSTER_ROLE_POLICIES: &[&str] = &["AmazonEKSClusterPolicy"];

/// AWS managed policies attached to the node group role
pub const NODE_ROLE_POLICIES: &[&str] = &[
    "AmazonEKSWorkerNodePolicy",
    "AmazonEC2ContainerRegistryReadOnly",
    "AmazonEKS_CNI_Policy",
];

pub fn cluster_role_name(cluster_name: &str) -> String {
    format!("{cluster_name}-eks-role")
}

pub fn node_role_name(cluster_name: &str) -> String {
    format!("{cluster_name}-node-role")
}

/// ARN of an AWS managed policy
pub fn managed_policy_arn(policy: &str) -> String {
    format!("arn:aws:iam::aws:policy/{policy}")
}

/// Trust policy letting the given services assume a role
pub fn service_trust_policy(services: &[&str]) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": { "Service": services },
                "Action": "sts:AssumeRole"
            }
        ]
    })
}

/// ARNs of the roles an EKS cluster needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRoles {
    pub cluster_role_arn: String,
    pub node_role_arn: String,
}

/// IAM client for cluster and admin roles
#[derive(Clone)]
pub struct IamRoles {
    client: Client,
}

impl FromAwsContext for IamRoles {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.iam_client(),
        }
    }
}

impl IamRoles {
    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Create a role, or read back the ARN of an existing one.
    pub async fn ensure_role(
        &self,
        role_name: &str,
        trust_policy: &Value,
        description: &str,
    ) -> Result<String> {
        let result = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy.to_string())
            .description(description)
            .send()
            .await;

        let created = ignore_already_exists(result)
            .with_context(|| format!("Failed to create IAM role {role_name}"))?;

        if let Some(arn) = created.as_ref().and_then(|r| r.role()).map(|r| r.arn()) {
            info!(role_name = %role_name, arn = %arn, "Created IAM role");
            return Ok(arn.to_string());
        }

        let arn = self
            .role_arn(role_name)
            .await?
            .with_context(|| format!("IAM role {role_name} exists but could not be read"))?;

        info!(role_name = %role_name, arn = %arn, "IAM role already exists");
        Ok(arn)
    }

    /// ARN of a role, `None` if it does not exist.
    pub async fn role_arn(&self, role_name: &str) -> Result<Option<String>> {
        let result = self.client.get_role().role_name(role_name).send().await;
        let role = ignore_not_found(result)
            .with_context(|| format!("Failed to read IAM role {role_name}"))?;
        Ok(role.and_then(|r| r.role().map(|r| r.arn().to_string())))
    }

    /// Attach AWS managed policies, logging failures without aborting.
    pub async fn attach_managed_policies(&self, role_name: &str, policies: &[&str]) {
        for policy in policies {
            let result = self
                .client
                .attach_role_policy()
                .role_name(role_name)
                .policy_arn(managed_policy_arn(policy))
                .send()
                .await;
            match result {
                Ok(_) => info!(role_name = %role_name, policy = %policy, "Attached policy"),
                Err(e) => {
                    warn!(role_name = %role_name, policy = %policy, error = ?e, "Failed to attach policy")
                }
            }
        }
    }

    /// Create the cluster and node group roles of an EKS cluster.
    pub async fn provision_cluster_roles(&self, cluster_name: &str) -> Result<ClusterRoles> {
        let cluster_role = cluster_role_name(cluster_name);
        let cluster_role_arn = self
            .ensure_role(
                &cluster_role,
                &service_trust_policy(&["eks.amazonaws.com", "ec2.amazonaws.com"]),
                "Role for EKS cluster",
            )
            .await?;
        self.attach_managed_policies(&cluster_role, CLUSTER_ROLE_POLICIES)
            .await;

        let node_role = node_role_name(cluster_name);
        let node_role_arn = self
            .ensure_role(
                &node_role,
                &service_trust_policy(&["ec2.amazonaws.com"]),
                "Role for EKS node group",
            )
            .await?;
        self.attach_managed_policies(&node_role, NODE_ROLE_POLICIES)
            .await;

        Ok(ClusterRoles {
            cluster_role_arn,
            node_role_arn,
        })
    }
}
