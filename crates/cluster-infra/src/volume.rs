//! Block-storage volume lifecycle
//!
//! Provisioning reuses the most recent volume carrying the logical name,
//! otherwise restores the most recent snapshot, otherwise creates an empty
//! volume. Teardown snapshots every matching volume and then deletes it, so
//! the next provisioning run restores the data.
//!
//! AWS EBS and Exoscale block storage implement [`BlockStorage`]; the
//! lifecycle itself is written once here.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use cluster_infra_common::{Provider, VolumeRecord};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Volume validation failures, raised before any mutating call
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VolumeError {
    #[error("Volume {volume_id} is being deleted. Please wait and try again")]
    Deleting { volume_id: String },

    #[error(
        "Requested size ({requested}) is smaller than the size ({snapshot_size}) of snapshot {snapshot_id}"
    )]
    SmallerThanSnapshot {
        requested: u64,
        snapshot_size: u64,
        snapshot_id: String,
    },

    #[error("No volumes found with name '{name}'")]
    NotFound { name: String },
}

/// A volume carrying the logical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub id: String,
    /// Provider state, lowercased
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Size in the provider's unit (GiB on AWS, GB on Exoscale)
    pub size: u64,
}

impl VolumeInfo {
    pub fn is_deleting(&self) -> bool {
        self.state == "deleting"
    }
}

/// A snapshot carrying the logical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub size: u64,
    /// Restore from this snapshot instead of creating an empty volume
    pub snapshot_id: Option<String>,
}

/// Where a provisioned volume came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    Existing,
    Snapshot(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedVolume {
    pub volume_id: String,
    pub source: VolumeSource,
    pub record_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeTeardown {
    pub snapshot_ids: Vec<String>,
    pub deleted_volume_ids: Vec<String>,
}

/// Trait for block-storage operations that can be mocked in tests.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait BlockStorage: Send + Sync {
    fn provider(&self) -> Provider;

    /// Zone recorded next to the volume ID, if the provider needs one
    fn record_zone(&self) -> Option<String>;

    async fn list_volumes(&self, name: &str) -> Result<Vec<VolumeInfo>>;

    async fn list_snapshots(&self, name: &str) -> Result<Vec<SnapshotInfo>>;

    /// Create a volume labelled with `request.name`, returning its ID
    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<String>;

    /// Poll until the volume can be attached. `false` on timeout.
    async fn wait_until_ready(&self, volume_id: &str) -> Result<bool>;

    /// Snapshot a volume, labelling the snapshot with `name`
    async fn snapshot_volume(&self, volume: &VolumeInfo, name: &str) -> Result<String>;

    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    /// Poll until no volume carries `name`. `false` on timeout.
    async fn wait_until_gone(&self, name: &str) -> Result<bool>;
}

/// Most recent item by creation time; items without a timestamp sort first.
pub fn most_recent<T, F>(items: Vec<T>, created_at: F) -> Option<T>
where
    F: Fn(&T) -> Option<DateTime<Utc>>,
{
    items.into_iter().max_by_key(|item| created_at(item))
}

/// Find, restore or create the volume named `name` and write its record into `out_dir`.
pub async fn provision_volume<S: BlockStorage>(
    storage: &S,
    name: &str,
    size: u64,
    out_dir: &Path,
) -> Result<ProvisionedVolume> {
    let provider = storage.provider();
    let volumes = storage.list_volumes(name).await?;

    let (volume_id, source) = match most_recent(volumes, |v| v.created_at) {
        Some(volume) => {
            if volume.is_deleting() {
                return Err(VolumeError::Deleting {
                    volume_id: volume.id,
                }
                .into());
            }
            info!(%provider, volume_id = %volume.id, state = %volume.state, "Found existing volume");
            (volume.id, VolumeSource::Existing)
        }
        None => {
            let snapshots = storage.list_snapshots(name).await?;
            let request = match most_recent(snapshots, |s| s.created_at) {
                Some(snapshot) => {
                    if size < snapshot.size {
                        return Err(VolumeError::SmallerThanSnapshot {
                            requested: size,
                            snapshot_size: snapshot.size,
                            snapshot_id: snapshot.id,
                        }
                        .into());
                    }
                    info!(%provider, snapshot_id = %snapshot.id, size, "Creating volume from snapshot");
                    CreateVolumeRequest {
                        name: name.to_string(),
                        size,
                        snapshot_id: Some(snapshot.id),
                    }
                }
                None => {
                    info!(%provider, size, "Creating new empty volume");
                    CreateVolumeRequest {
                        name: name.to_string(),
                        size,
                        snapshot_id: None,
                    }
                }
            };

            let volume_id = storage
                .create_volume(&request)
                .await
                .context("Failed to create volume")?;
            if !storage.wait_until_ready(&volume_id).await? {
                bail!("Volume {volume_id} did not become ready in time");
            }

            let source = match request.snapshot_id {
                Some(id) => VolumeSource::Snapshot(id),
                None => VolumeSource::Empty,
            };
            (volume_id, source)
        }
    };

    let record = VolumeRecord {
        volume_id: volume_id.clone(),
        zone: storage.record_zone(),
    };
    let record_path = record
        .write(out_dir, provider, name)
        .context("Failed to write volume record")?;

    info!(%provider, volume_id = %volume_id, path = %record_path.display(), "Provisioned volume");

    Ok(ProvisionedVolume {
        volume_id,
        source,
        record_path,
    })
}

/// Snapshot and delete every volume named `name`.
pub async fn teardown_volume<S: BlockStorage>(storage: &S, name: &str) -> Result<VolumeTeardown> {
    let provider = storage.provider();
    let volumes = storage.list_volumes(name).await?;
    if volumes.is_empty() {
        return Err(VolumeError::NotFound {
            name: name.to_string(),
        }
        .into());
    }

    let mut result = VolumeTeardown::default();

    for volume in &volumes {
        let snapshot_id = storage
            .snapshot_volume(volume, name)
            .await
            .with_context(|| format!("Failed to snapshot volume {}", volume.id))?;
        info!(%provider, volume_id = %volume.id, snapshot_id = %snapshot_id, "Snapshot started");
        result.snapshot_ids.push(snapshot_id);
    }

    for volume in &volumes {
        storage
            .delete_volume(&volume.id)
            .await
            .with_context(|| format!("Failed to delete volume {}", volume.id))?;
        info!(%provider, volume_id = %volume.id, "Volume deletion started");
        result.deleted_volume_ids.push(volume.id.clone());
    }

    if !storage.wait_until_gone(name).await? {
        bail!("Volumes named '{name}' still present after deletion");
    }

    info!(%provider, name, count = volumes.len(), "All volumes deleted");
    Ok(result)
}
