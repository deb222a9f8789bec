//! Provisioned volume records
//!
//! After provisioning, the volume ID is written to `volume-<provider>-<name>.json`
//! so later pipeline steps (mounting, Kubernetes manifests) can pick it up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Cloud provider owning a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Exoscale,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Exoscale => "exoscale",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of a `volume-<provider>-<name>.json` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

impl VolumeRecord {
    /// File name of the record for a logical volume name
    pub fn file_name(provider: Provider, name: &str) -> String {
        format!("volume-{provider}-{name}.json")
    }

    /// Write the record into `dir`, returning the path written.
    pub fn write(&self, dir: &Path, provider: Provider, name: &str) -> io::Result<PathBuf> {
        let path = dir.join(Self::file_name(provider, name));
        let json = serde_json::to_string(self).map_err(io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Read a record previously written by [`VolumeRecord::write`].
    pub fn read(path: &Path) -> io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(io::Error::other)
    }
}
