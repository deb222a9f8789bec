//! Subnet ownership tags for the AWS load balancer controller

use anyhow::{Context, Result, bail};
use aws_sdk_ec2::types::Tag;
use cluster_infra_common::tags::{KUBERNETES_OWNED, kubernetes_cluster_tag};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// The subset of the Pulumi stack outputs needed to tag subnets
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StackOutputs {
    pub region: String,
    pub cluster_name: String,
    pub public_subnet_ids: Vec<String>,
}

impl StackOutputs {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stack outputs {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Invalid stack outputs in {}", path.display()))
    }
}

/// Tag every public subnet with `kubernetes.io/cluster/<name>=owned`.
///
/// Returns the number of subnets tagged.
pub async fn tag_subnets(ec2: &aws_sdk_ec2::Client, outputs: &StackOutputs) -> Result<usize> {
    if outputs.public_subnet_ids.is_empty() {
        bail!("No public subnets in stack outputs for {}", outputs.cluster_name);
    }

    let tag_key = kubernetes_cluster_tag(&outputs.cluster_name);
    ec2.create_tags()
        .set_resources(Some(outputs.public_subnet_ids.clone()))
        .tags(Tag::builder().key(&tag_key).value(KUBERNETES_OWNED).build())
        .send()
        .await
        .context("Failed to tag subnets")?;

    let count = outputs.public_subnet_ids.len();
    info!(count, tag = %tag_key, value = KUBERNETES_OWNED, "Tagged subnets");
    Ok(count)
}
