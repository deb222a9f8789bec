//! Exoscale block storage implementation of [`BlockStorage`]
//!
//! Volumes and snapshots are matched by their labels, which must be exactly
//! `{"name": <logical name>}`.

use super::client::ExoscaleClient;
use super::error::ignore_not_found;
use crate::volume::{BlockStorage, CreateVolumeRequest, SnapshotInfo, VolumeInfo};
use crate::wait::{PollConfig, wait_until};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cluster_infra_common::Provider;
use cluster_infra_common::tags::TAG_VOLUME_NAME;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// States in which a volume can be attached to an instance
const READY_STATES: &[&str] = &["attached", "detached"];

#[derive(Debug, Clone, Deserialize)]
struct BlockStorageVolume {
    id: String,
    #[serde(default)]
    state: String,
    /// GB
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "created-at")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BlockStorageSnapshot {
    id: String,
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "created-at")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct VolumeList {
    #[serde(default, rename = "block-storage-volumes")]
    volumes: Vec<BlockStorageVolume>,
}

#[derive(Debug, Deserialize)]
struct SnapshotList {
    #[serde(default, rename = "block-storage-snapshots")]
    snapshots: Vec<BlockStorageSnapshot>,
}

/// Labels identifying a logical volume
pub fn volume_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(TAG_VOLUME_NAME.to_string(), name.to_string())])
}

/// Name of the snapshot taken of `volume_id` on teardown
pub fn snapshot_name(name: &str, volume_id: &str) -> String {
    let short: String = volume_id.chars().take(8).collect();
    format!("{name}-snapshot-{short}")
}

impl From<BlockStorageVolume> for VolumeInfo {
    fn from(v: BlockStorageVolume) -> Self {
        VolumeInfo {
            id: v.id,
            state: v.state.to_lowercase(),
            created_at: v.created_at,
            size: v.size,
        }
    }
}

/// Block storage in one Exoscale zone
#[derive(Debug, Clone)]
pub struct ExoscaleVolumes {
    client: ExoscaleClient,
    poll: PollConfig,
}

impl ExoscaleVolumes {
    pub fn new(client: ExoscaleClient) -> Self {
        Self {
            client,
            poll: PollConfig::VOLUME,
        }
    }

    async fn volume_state(&self, volume_id: &str) -> Result<Option<String>> {
        let volume: Option<BlockStorageVolume> =
            ignore_not_found(self.client.get(&format!("/block-storage/{volume_id}")).await)
                .context("Failed to get block storage volume")?;
        Ok(volume.map(|v| v.state.to_lowercase()))
    }
}

impl BlockStorage for ExoscaleVolumes {
    fn provider(&self) -> Provider {
        Provider::Exoscale
    }

    fn record_zone(&self) -> Option<String> {
        Some(self.client.zone().to_string())
    }

    async fn list_volumes(&self, name: &str) -> Result<Vec<VolumeInfo>> {
        let labels = volume_labels(name);
        let list: VolumeList = self
            .client
            .get("/block-storage")
            .await
            .context("Failed to list block storage volumes")?;

        let volumes: Vec<VolumeInfo> = list
            .volumes
            .into_iter()
            .filter(|v| v.labels == labels)
            .map(VolumeInfo::from)
            .collect();
        debug!(name, count = volumes.len(), "Listed block storage volumes");
        Ok(volumes)
    }

    async fn list_snapshots(&self, name: &str) -> Result<Vec<SnapshotInfo>> {
        let labels = volume_labels(name);
        let list: SnapshotList = self
            .client
            .get("/block-storage-snapshot")
            .await
            .context("Failed to list block storage snapshots")?;

        Ok(list
            .snapshots
            .into_iter()
            .filter(|s| s.labels == labels)
            .map(|s| SnapshotInfo {
                id: s.id,
                created_at: s.created_at,
                size: s.size,
            })
            .collect())
    }

    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<String> {
        let mut body = json!({
            "name": request.name,
            "size": request.size,
            "labels": volume_labels(&request.name),
        });
        if let Some(snapshot_id) = &request.snapshot_id {
            body["block-storage-snapshot"] = json!({ "id": snapshot_id });
        }

        let operation = self
            .client
            .post("/block-storage", &body)
            .await
            .context("Failed to create block storage volume")?;
        let volume_id = operation.reference_id()?.to_string();

        info!(volume_id = %volume_id, zone = %self.client.zone(), size = request.size, "Created block storage volume");
        Ok(volume_id)
    }

    async fn wait_until_ready(&self, volume_id: &str) -> Result<bool> {
        wait_until(
            self.poll,
            volume_id,
            || self.volume_state(volume_id),
            |state: &Option<String>| state.as_deref().is_some_and(|s| READY_STATES.contains(&s)),
        )
        .await
    }

    async fn snapshot_volume(&self, volume: &VolumeInfo, name: &str) -> Result<String> {
        let body = json!({
            "name": snapshot_name(name, &volume.id),
            "labels": volume_labels(name),
        });
        let operation = self
            .client
            .post(&format!("/block-storage/{}:create-snapshot", volume.id), &body)
            .await
            .context("Failed to create block storage snapshot")?;

        let finished = self.client.wait_for_operation(&operation).await?;
        Ok(match finished.reference {
            Some(snapshot) => snapshot.id,
            None => finished.id,
        })
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let result = self
            .client
            .delete(&format!("/block-storage/{volume_id}"))
            .await;
        match ignore_not_found(result).context("Failed to delete block storage volume")? {
            Some(_) => info!(volume_id = %volume_id, "Block storage volume deletion started"),
            None => debug!(volume_id = %volume_id, "Block storage volume already deleted"),
        }
        Ok(())
    }

    async fn wait_until_gone(&self, name: &str) -> Result<bool> {
        wait_until(
            self.poll,
            name,
            || self.list_volumes(name),
            |volumes: &Vec<VolumeInfo>| volumes.is_empty(),
        )
        .await
    }
}
