//! STATUS.md report of volumes, VPCs and EKS clusters in a region

use crate::aws::context::{AwsContext, FromAwsContext};
use crate::aws::eks::{ClusterInfo, EksClusters};
use crate::aws::tags::{tag_value, to_chrono};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::Filter;
use chrono::{DateTime, Utc};
use cluster_infra_common::tags::{TAG_VOLUME_NAME, display_name};
use comfy_table::{Cell, Table, presets::ASCII_MARKDOWN};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

const MISSING: &str = "—";
const OK: &str = "✅";
const NOT_OK: &str = "❌";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeStatus {
    pub volume_id: String,
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    pub attached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStatus {
    pub snapshot_id: String,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcStatus {
    pub name: Option<String>,
    pub vpc_id: String,
    pub state: String,
}

/// Everything the report shows, collected up front
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub region: String,
    /// Logical volume names, one row each
    pub volume_names: Vec<String>,
    pub volumes: BTreeMap<String, VolumeStatus>,
    /// Latest snapshot per logical name
    pub snapshots: BTreeMap<String, SnapshotStatus>,
    pub vpcs: Vec<VpcStatus>,
    pub clusters: Vec<ClusterInfo>,
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(
        || MISSING.to_string(),
        |t| t.format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

fn icon(ok: bool) -> &'static str {
    if ok { OK } else { NOT_OK }
}

fn markdown_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(ASCII_MARKDOWN)
        .set_header(header.iter().map(Cell::new).collect::<Vec<_>>());
    table
}

fn volumes_table(snapshot: &StatusSnapshot) -> Table {
    let mut table = markdown_table(&[
        "Name",
        "Provisioner",
        "State",
        "Volume ID",
        "Created",
        "Mounted",
        "Snapshot ID",
        "Snapshot Time",
    ]);

    for name in &snapshot.volume_names {
        let (snapshot_id, snapshot_time) = match snapshot.snapshots.get(name) {
            Some(s) => (s.snapshot_id.clone(), format_time(s.started_at)),
            None => (MISSING.to_string(), MISSING.to_string()),
        };

        let (state, volume_id, created, mounted) = match snapshot.volumes.get(name) {
            Some(v) => (
                format!("{} {}", icon(v.state == "available"), v.state),
                v.volume_id.clone(),
                format_time(v.created_at),
                icon(v.attached).to_string(),
            ),
            None => (
                format!("{NOT_OK} {MISSING}"),
                MISSING.to_string(),
                MISSING.to_string(),
                MISSING.to_string(),
            ),
        };

        table.add_row(vec![
            name.clone(),
            "AWS".to_string(),
            state,
            volume_id,
            created,
            mounted,
            snapshot_id,
            snapshot_time,
        ]);
    }
    table
}

fn vpcs_table(snapshot: &StatusSnapshot) -> Table {
    let mut table = markdown_table(&["VPC Name", "VPC ID", "Region", "VPC State"]);
    for vpc in &snapshot.vpcs {
        table.add_row(vec![
            vpc.name.clone().unwrap_or_else(|| MISSING.to_string()),
            vpc.vpc_id.clone(),
            snapshot.region.clone(),
            format!("{} {}", icon(vpc.state == "available"), vpc.state),
        ]);
    }
    table
}

fn clusters_table(snapshot: &StatusSnapshot) -> Table {
    let mut table = markdown_table(&["Cluster ID", "Name", "Region", "Kubernetes Version"]);
    for cluster in &snapshot.clusters {
        table.add_row(vec![
            cluster.name.clone(),
            cluster.name.clone(),
            snapshot.region.clone(),
            cluster
                .version
                .clone()
                .unwrap_or_else(|| MISSING.to_string()),
        ]);
    }
    table
}

/// Render the report as markdown.
pub fn render_status(snapshot: &StatusSnapshot) -> String {
    format!(
        "# Volumes\n\n{}\n\n\n# VPCs\n\n{}\n\n\n# Clusters\n\n{}\n",
        volumes_table(snapshot),
        vpcs_table(snapshot),
        clusters_table(snapshot),
    )
}

/// Query EC2 and EKS for everything the report shows.
pub async fn collect_status(ctx: &AwsContext, volume_names: &[String]) -> Result<StatusSnapshot> {
    let ec2 = ctx.ec2_client();
    let name_filter = Filter::builder()
        .name(format!("tag:{TAG_VOLUME_NAME}"))
        .set_values(Some(volume_names.to_vec()))
        .build();

    let volumes_response = ec2
        .describe_volumes()
        .filters(name_filter.clone())
        .send()
        .await
        .context("Failed to describe volumes")?;
    let mut volumes = BTreeMap::new();
    for v in volumes_response.volumes() {
        let (Some(name), Some(id)) = (tag_value(v.tags(), TAG_VOLUME_NAME), v.volume_id()) else {
            continue;
        };
        volumes.insert(
            name.to_string(),
            VolumeStatus {
                volume_id: id.to_string(),
                state: v.state().map(|s| s.as_str().to_string()).unwrap_or_default(),
                created_at: v.create_time().and_then(to_chrono),
                attached: !v.attachments().is_empty(),
            },
        );
    }

    let snapshots_response = ec2
        .describe_snapshots()
        .owner_ids("self")
        .filters(name_filter)
        .send()
        .await
        .context("Failed to describe snapshots")?;
    let mut snapshots: BTreeMap<String, SnapshotStatus> = BTreeMap::new();
    for s in snapshots_response.snapshots() {
        let (Some(name), Some(id)) = (tag_value(s.tags(), TAG_VOLUME_NAME), s.snapshot_id()) else {
            continue;
        };
        let candidate = SnapshotStatus {
            snapshot_id: id.to_string(),
            started_at: s.start_time().and_then(to_chrono),
        };
        let newer = snapshots
            .get(name)
            .is_none_or(|existing| candidate.started_at > existing.started_at);
        if newer {
            snapshots.insert(name.to_string(), candidate);
        }
    }

    let vpcs_response = ec2
        .describe_vpcs()
        .send()
        .await
        .context("Failed to describe VPCs")?;
    let vpcs = vpcs_response
        .vpcs()
        .iter()
        .filter_map(|vpc| {
            let tags: Vec<(&str, &str)> = vpc
                .tags()
                .iter()
                .filter_map(|t| Some((t.key()?, t.value()?)))
                .collect();
            Some(VpcStatus {
                name: display_name(tags.iter().copied()).map(str::to_string),
                vpc_id: vpc.vpc_id()?.to_string(),
                state: vpc.state().map(|s| s.as_str().to_string()).unwrap_or_default(),
            })
        })
        .collect();

    let clusters = EksClusters::from_context(ctx).describe_clusters().await?;

    Ok(StatusSnapshot {
        region: ctx.region().to_string(),
        volume_names: volume_names.to_vec(),
        volumes,
        snapshots,
        vpcs,
        clusters,
    })
}

/// Collect, render and write the report.
pub async fn write_status(ctx: &AwsContext, volume_names: &[String], path: &Path) -> Result<()> {
    let snapshot = collect_status(ctx, volume_names).await?;
    std::fs::write(path, render_status(&snapshot))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Status report written");
    Ok(())
}
