//! EBS implementation of [`BlockStorage`]

use crate::aws::context::{AwsContext, FromAwsContext};
use crate::aws::error::ignore_not_found;
use crate::aws::tags::{ec2_tag_spec, tag_filter, to_chrono};
use crate::volume::{BlockStorage, CreateVolumeRequest, SnapshotInfo, VolumeInfo};
use crate::wait::{PollConfig, wait_until};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{ResourceType, VolumeType};
use cluster_infra_common::Provider;
use cluster_infra_common::defaults::DEFAULT_EBS_VOLUME_TYPE;
use cluster_infra_common::tags::{TAG_DISPLAY_NAME, TAG_VOLUME_NAME};
use tracing::{debug, info};

/// EBS volumes and snapshots tagged `name=<logical name>`
#[derive(Clone)]
pub struct AwsVolumes {
    ec2: aws_sdk_ec2::Client,
    poll: PollConfig,
}

impl FromAwsContext for AwsVolumes {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            ec2: ctx.ec2_client(),
            poll: PollConfig::VOLUME,
        }
    }
}

impl AwsVolumes {
    /// First availability zone of the region
    async fn first_availability_zone(&self) -> Result<String> {
        let response = self
            .ec2
            .describe_availability_zones()
            .send()
            .await
            .context("Failed to describe availability zones")?;

        response
            .availability_zones()
            .iter()
            .find_map(|az| az.zone_name())
            .map(str::to_string)
            .context("No availability zones returned")
    }

    async fn volume_state(&self, volume_id: &str) -> Result<Option<String>> {
        let result = self
            .ec2
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await;
        Ok(ignore_not_found(result)
            .context("Failed to describe volume")?
            .and_then(|out| {
                out.volumes()
                    .first()
                    .and_then(|v| v.state())
                    .map(|s| s.as_str().to_string())
            }))
    }
}

impl BlockStorage for AwsVolumes {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn record_zone(&self) -> Option<String> {
        None
    }

    async fn list_volumes(&self, name: &str) -> Result<Vec<VolumeInfo>> {
        let mut volumes = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .ec2
                .describe_volumes()
                .filters(tag_filter(TAG_VOLUME_NAME, name))
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe volumes")?;

            volumes.extend(response.volumes().iter().filter_map(|v| {
                Some(VolumeInfo {
                    id: v.volume_id()?.to_string(),
                    state: v.state().map(|s| s.as_str().to_string()).unwrap_or_default(),
                    created_at: v.create_time().and_then(to_chrono),
                    size: v.size().map_or(0, |s| s.max(0) as u64),
                })
            }));

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        debug!(name, count = volumes.len(), "Listed EBS volumes");
        Ok(volumes)
    }

    async fn list_snapshots(&self, name: &str) -> Result<Vec<SnapshotInfo>> {
        let mut snapshots = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .ec2
                .describe_snapshots()
                .owner_ids("self")
                .filters(tag_filter(TAG_VOLUME_NAME, name))
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe snapshots")?;

            snapshots.extend(response.snapshots().iter().filter_map(|s| {
                Some(SnapshotInfo {
                    id: s.snapshot_id()?.to_string(),
                    created_at: s.start_time().and_then(to_chrono),
                    size: s.volume_size().map_or(0, |size| size.max(0) as u64),
                })
            }));

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        debug!(name, count = snapshots.len(), "Listed EBS snapshots");
        Ok(snapshots)
    }

    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<String> {
        let az = self.first_availability_zone().await?;
        let size = i32::try_from(request.size)
            .with_context(|| format!("Volume size {} is out of range", request.size))?;

        let response = self
            .ec2
            .create_volume()
            .availability_zone(&az)
            .size(size)
            .volume_type(VolumeType::from(DEFAULT_EBS_VOLUME_TYPE))
            .set_snapshot_id(request.snapshot_id.clone())
            .tag_specifications(ec2_tag_spec(
                ResourceType::Volume,
                &[
                    (TAG_VOLUME_NAME, request.name.as_str()),
                    (TAG_DISPLAY_NAME, request.name.as_str()),
                ],
            ))
            .send()
            .await
            .context("Failed to create EBS volume")?;

        let volume_id = response
            .volume_id()
            .context("No volume ID in CreateVolume response")?
            .to_string();

        info!(volume_id = %volume_id, availability_zone = %az, size, "Created EBS volume");
        Ok(volume_id)
    }

    async fn wait_until_ready(&self, volume_id: &str) -> Result<bool> {
        wait_until(
            self.poll,
            volume_id,
            || self.volume_state(volume_id),
            |state: &Option<String>| state.as_deref() == Some("available"),
        )
        .await
    }

    async fn snapshot_volume(&self, volume: &VolumeInfo, name: &str) -> Result<String> {
        let response = self
            .ec2
            .create_snapshot()
            .volume_id(&volume.id)
            .description(format!("Snapshot For: {}", volume.id))
            .tag_specifications(ec2_tag_spec(
                ResourceType::Snapshot,
                &[(TAG_VOLUME_NAME, name), (TAG_DISPLAY_NAME, name)],
            ))
            .send()
            .await
            .context("Failed to create EBS snapshot")?;

        response
            .snapshot_id()
            .map(str::to_string)
            .context("No snapshot ID in CreateSnapshot response")
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let result = self.ec2.delete_volume().volume_id(volume_id).send().await;
        match ignore_not_found(result).context("Failed to delete EBS volume")? {
            Some(_) => info!(volume_id = %volume_id, "Deleted EBS volume"),
            None => debug!(volume_id = %volume_id, "EBS volume already deleted"),
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
