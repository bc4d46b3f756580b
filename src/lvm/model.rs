//! Storage topology: the watched volume, its group, donors, and the fallback device.

#![allow(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::config::Config;

/// A logical volume addressed by `group/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LogicalVolumeRef {
    pub group: String,
    pub name: String,
}

impl LogicalVolumeRef {
    #[must_use]
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Device-mapper path LVM tools accept, e.g. `/dev/vgdata/lv_home`.
    #[must_use]
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from("/dev").join(&self.group).join(&self.name)
    }
}

impl fmt::Display for LogicalVolumeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// The volume kept from filling up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoredVolume {
    pub mount_path: PathBuf,
    pub volume: LogicalVolumeRef,
    /// Capacity added by one successful extension.
    pub growth_increment_gib: u64,
}

/// The pool the monitored volume draws from. Free space is always queried live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeGroup {
    pub name: String,
}

/// A volume that may give up capacity when its own usage is low.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonorCandidate {
    pub mount_path: PathBuf,
    pub volume: LogicalVolumeRef,
}

impl DonorCandidate {
    /// Identifier used in outcomes and logs: the LV name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.volume.name
    }
}

/// Raw device held in reserve for the last cascade step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackDevice {
    pub path: PathBuf,
}

/// Everything one cascade invocation operates on, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub volume: MonitoredVolume,
    pub group: VolumeGroup,
    /// Tried in this order; never re-sorted.
    pub donors: Vec<DonorCandidate>,
    pub fallback: FallbackDevice,
}

impl Topology {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let group = config.monitor.volume_group.clone();
        Self {
            volume: MonitoredVolume {
                mount_path: config.monitor.mount_path.clone(),
                volume: LogicalVolumeRef::new(&group, &config.monitor.logical_volume),
                growth_increment_gib: config.cascade.growth_increment_gib,
            },
            donors: config
                .cascade
                .donors
                .iter()
                .map(|donor| DonorCandidate {
                    mount_path: donor.mount_path.clone(),
                    volume: LogicalVolumeRef::new(&group, &donor.logical_volume),
                })
                .collect(),
            fallback: FallbackDevice {
                path: config.cascade.fallback_device.clone(),
            },
            group: VolumeGroup { name: group },
        }
    }
}
