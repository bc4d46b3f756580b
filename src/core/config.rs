//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{AehError, Result};

/// Full autoextend configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// Simulate every storage operation instead of running it.
    pub dry_run: bool,
    pub monitor: MonitorConfig,
    pub cascade: CascadeConfig,
    pub load: LoadConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// The volume under watch and the supervisor's trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub mount_path: PathBuf,
    pub volume_group: String,
    pub logical_volume: String,
    /// Usage percentage at or above which the cascade runs.
    pub threshold_pct: u8,
    pub poll_interval_ms: u64,
}

/// Extension cascade sources and limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CascadeConfig {
    /// Donors must sit strictly below this usage percentage.
    pub donor_max_usage_pct: u8,
    pub growth_increment_gib: u64,
    pub fallback_device: PathBuf,
    /// Upper bound on a single privileged command.
    pub command_timeout_secs: u64,
    /// Donor volumes, tried in declaration order.
    pub donors: Vec<DonorConfig>,
}

/// One donor volume: where it is mounted and which LV backs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DonorConfig {
    pub mount_path: PathBuf,
    pub logical_volume: String,
}

/// Synthetic load generator knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadConfig {
    pub enabled: bool,
    /// Directory under the monitored mount that receives payload files.
    pub subdir: String,
    /// Stop writing once usage reaches this percentage.
    pub stop_pct: u8,
    pub payload_size_mib: u64,
    pub interval_ms: u64,
}

/// Activity log rendering and rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Mirror each activity event as a human-readable stderr line.
    pub echo_stderr: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub channel_capacity: usize,
}

/// Filesystem paths used by aeh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mount_path: PathBuf::from("/mnt/lv_home"),
            volume_group: "vgdata".to_string(),
            logical_volume: "lv_home".to_string(),
            threshold_pct: 80,
            poll_interval_ms: 5_000,
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            donor_max_usage_pct: 40,
            growth_increment_gib: 1,
            fallback_device: PathBuf::from("/dev/sdc"),
            command_timeout_secs: 300,
            donors: vec![
                DonorConfig {
                    mount_path: PathBuf::from("/mnt/lv_data1"),
                    logical_volume: "lv_data1".to_string(),
                },
                DonorConfig {
                    mount_path: PathBuf::from("/mnt/lv_data2"),
                    logical_volume: "lv_data2".to_string(),
                },
            ],
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subdir: "writer".to_string(),
            stop_pct: 95,
            payload_size_mib: 500,
            interval_ms: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            echo_stderr: true,
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            channel_capacity: 1024,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[AEH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("aeh").join("config.toml"),
            jsonl_log: home_dir
                .join(".local")
                .join("share")
                .join("aeh")
                .join("activity.jsonl"),
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CascadeConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl LoadConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn payload_size_bytes(&self) -> u64 {
        self.payload_size_mib.saturating_mul(1024 * 1024)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| AehError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(AehError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, so the value is stable across
    /// processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        set_env(&mut lookup, "AEH_DRY_RUN", &mut self.dry_run)?;

        // monitor
        set_env(
            &mut lookup,
            "AEH_MONITOR_MOUNT_PATH",
            &mut self.monitor.mount_path,
        )?;
        set_env(
            &mut lookup,
            "AEH_MONITOR_VOLUME_GROUP",
            &mut self.monitor.volume_group,
        )?;
        set_env(
            &mut lookup,
            "AEH_MONITOR_LOGICAL_VOLUME",
            &mut self.monitor.logical_volume,
        )?;
        set_env(
            &mut lookup,
            "AEH_MONITOR_THRESHOLD_PCT",
            &mut self.monitor.threshold_pct,
        )?;
        set_env(
            &mut lookup,
            "AEH_MONITOR_POLL_INTERVAL_MS",
            &mut self.monitor.poll_interval_ms,
        )?;

        // cascade
        set_env(
            &mut lookup,
            "AEH_CASCADE_DONOR_MAX_USAGE_PCT",
            &mut self.cascade.donor_max_usage_pct,
        )?;
        set_env(
            &mut lookup,
            "AEH_CASCADE_GROWTH_INCREMENT_GIB",
            &mut self.cascade.growth_increment_gib,
        )?;
        set_env(
            &mut lookup,
            "AEH_CASCADE_FALLBACK_DEVICE",
            &mut self.cascade.fallback_device,
        )?;
        set_env(
            &mut lookup,
            "AEH_CASCADE_COMMAND_TIMEOUT_SECS",
            &mut self.cascade.command_timeout_secs,
        )?;

        // load
        set_env(&mut lookup, "AEH_LOAD_ENABLED", &mut self.load.enabled)?;
        set_env(&mut lookup, "AEH_LOAD_STOP_PCT", &mut self.load.stop_pct)?;
        set_env(
            &mut lookup,
            "AEH_LOAD_PAYLOAD_SIZE_MIB",
            &mut self.load.payload_size_mib,
        )?;
        set_env(&mut lookup, "AEH_LOAD_INTERVAL_MS", &mut self.load.interval_ms)?;

        // logging + paths
        set_env(
            &mut lookup,
            "AEH_LOGGING_ECHO_STDERR",
            &mut self.logging.echo_stderr,
        )?;
        set_env(&mut lookup, "AEH_PATHS_JSONL_LOG", &mut self.paths.jsonl_log)?;

        Ok(())
    }

    /// Strip trailing slashes so mount comparisons are exact.
    fn normalize_paths(&mut self) {
        strip_trailing_slash(&mut self.monitor.mount_path);
        for donor in &mut self.cascade.donors {
            strip_trailing_slash(&mut donor.mount_path);
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, val) in [
            ("monitor.threshold_pct", self.monitor.threshold_pct),
            (
                "cascade.donor_max_usage_pct",
                self.cascade.donor_max_usage_pct,
            ),
            ("load.stop_pct", self.load.stop_pct),
        ] {
            if !(1..=100).contains(&val) {
                return Err(AehError::InvalidConfig {
                    details: format!("{name} must be in [1, 100], got {val}"),
                });
            }
        }

        for (name, val) in [
            ("monitor.poll_interval_ms", self.monitor.poll_interval_ms),
            (
                "cascade.growth_increment_gib",
                self.cascade.growth_increment_gib,
            ),
            (
                "cascade.command_timeout_secs",
                self.cascade.command_timeout_secs,
            ),
            ("load.payload_size_mib", self.load.payload_size_mib),
            ("load.interval_ms", self.load.interval_ms),
        ] {
            if val == 0 {
                return Err(AehError::InvalidConfig {
                    details: format!("{name} must be > 0"),
                });
            }
        }

        validate_lvm_name("monitor.volume_group", &self.monitor.volume_group)?;
        validate_lvm_name("monitor.logical_volume", &self.monitor.logical_volume)?;

        if !self.monitor.mount_path.is_absolute() {
            return Err(AehError::InvalidConfig {
                details: format!(
                    "monitor.mount_path must be absolute, got {}",
                    self.monitor.mount_path.display()
                ),
            });
        }
        if !self.cascade.fallback_device.is_absolute() {
            return Err(AehError::InvalidConfig {
                details: format!(
                    "cascade.fallback_device must be absolute, got {}",
                    self.cascade.fallback_device.display()
                ),
            });
        }

        let mut seen = HashSet::new();
        for donor in &self.cascade.donors {
            validate_lvm_name("cascade.donors.logical_volume", &donor.logical_volume)?;
            if donor.logical_volume == self.monitor.logical_volume {
                return Err(AehError::InvalidConfig {
                    details: format!(
                        "donor {} is the monitored volume itself",
                        donor.logical_volume
                    ),
                });
            }
            if !seen.insert(donor.logical_volume.as_str()) {
                return Err(AehError::InvalidConfig {
                    details: format!("donor {} listed more than once", donor.logical_volume),
                });
            }
        }

        if !is_plain_relative_dir(&self.load.subdir) {
            return Err(AehError::InvalidConfig {
                details: format!(
                    "load.subdir must be a plain relative directory, got {:?}",
                    self.load.subdir
                ),
            });
        }

        if self.logging.channel_capacity == 0 {
            return Err(AehError::InvalidConfig {
                details: "logging.channel_capacity must be >= 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Non-empty, relative, and made only of normal components, so joining it onto
/// the monitored mount stays inside that mount.
fn is_plain_relative_dir(subdir: &str) -> bool {
    let path = Path::new(subdir);
    !subdir.is_empty()
        && !path.is_absolute()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn validate_lvm_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(AehError::InvalidConfig {
            details: format!("{field} must be a bare LVM name, got {name:?}"),
        });
    }
    Ok(())
}

fn strip_trailing_slash(path: &mut PathBuf) {
    let trimmed = {
        let s = path.to_string_lossy();
        if s.len() > 1 {
            s.strip_suffix('/').map(PathBuf::from)
        } else {
            None
        }
    };
    if let Some(trimmed) = trimmed {
        *path = trimmed;
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| AehError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{AehError, Config, DonorConfig};
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.monitor.threshold_pct, 80);
        assert_eq!(cfg.cascade.donor_max_usage_pct, 40);
        assert_eq!(cfg.cascade.donors.len(), 2);
        assert!(!cfg.dry_run);
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.monitor.threshold_pct = 0;
        let err = cfg.validate().expect_err("zero threshold should fail");
        assert!(err.to_string().contains("threshold_pct"));

        cfg.monitor.threshold_pct = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_growth_increment_rejected() {
        let mut cfg = Config::default();
        cfg.cascade.growth_increment_gib = 0;
        let err = cfg.validate().expect_err("zero increment should fail");
        assert!(err.to_string().contains("growth_increment_gib"));
    }

    #[test]
    fn donor_cannot_be_monitored_volume() {
        let mut cfg = Config::default();
        cfg.cascade.donors.push(DonorConfig {
            mount_path: PathBuf::from("/mnt/lv_home"),
            logical_volume: "lv_home".to_string(),
        });
        let err = cfg.validate().expect_err("self-donation should fail");
        assert!(err.to_string().contains("monitored volume itself"));
    }

    #[test]
    fn duplicate_donors_rejected() {
        let mut cfg = Config::default();
        cfg.cascade.donors.push(cfg.cascade.donors[0].clone());
        let err = cfg.validate().expect_err("duplicate donor should fail");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn lvm_names_must_be_bare() {
        let mut cfg = Config::default();
        cfg.monitor.volume_group = "/dev/vgdata".to_string();
        let err = cfg.validate().expect_err("path-like group should fail");
        assert!(err.to_string().contains("bare LVM name"));
    }

    #[test]
    fn relative_mount_path_rejected() {
        let mut cfg = Config::default();
        cfg.monitor.mount_path = PathBuf::from("mnt/lv_home");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_subdir_must_stay_under_the_mount() {
        for subdir in ["/tmp/elsewhere", "", "..", "a/../../b", "./writer"] {
            let mut cfg = Config::default();
            cfg.load.subdir = subdir.to_string();
            let err = cfg
                .validate()
                .expect_err(&format!("subdir {subdir:?} should be rejected"));
            assert!(err.to_string().contains("load.subdir"), "{err}");
        }

        let mut cfg = Config::default();
        cfg.load.subdir = "aeh/writer".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn absolute_load_subdir_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[load]\nsubdir = \"/tmp/elsewhere\"\n").unwrap();
        let err = Config::load(Some(&path)).expect_err("absolute subdir must not load");
        assert!(matches!(err, AehError::InvalidConfig { .. }));
    }

    #[test]
    fn empty_donor_list_is_valid() {
        let mut cfg = Config::default();
        cfg.cascade.donors.clear();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("AEH_DRY_RUN", "true"),
            ("AEH_MONITOR_THRESHOLD_PCT", "90"),
            ("AEH_CASCADE_FALLBACK_DEVICE", "/dev/sdz"),
            ("AEH_LOAD_ENABLED", "false"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");

        assert!(cfg.dry_run);
        assert_eq!(cfg.monitor.threshold_pct, 90);
        assert_eq!(cfg.cascade.fallback_device, PathBuf::from("/dev/sdz"));
        assert!(!cfg.load.enabled);
    }

    #[test]
    fn env_override_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("AEH_MONITOR_THRESHOLD_PCT", "eighty")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("non-numeric threshold should fail");
        match err {
            AehError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("AEH_MONITOR_THRESHOLD_PCT"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn normalize_paths_trims_trailing_slashes() {
        let mut cfg = Config::default();
        cfg.monitor.mount_path = PathBuf::from("/mnt/lv_home/");
        cfg.cascade.donors[0].mount_path = PathBuf::from("/mnt/lv_data1/");
        cfg.normalize_paths();
        assert_eq!(cfg.monitor.mount_path, PathBuf::from("/mnt/lv_home"));
        assert_eq!(
            cfg.cascade.donors[0].mount_path,
            PathBuf::from("/mnt/lv_data1")
        );
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/aeh/config.toml")))
            .expect_err("missing explicit path should fail");
        assert!(matches!(err, AehError::MissingConfig { .. }));
    }

    #[test]
    fn load_parses_toml_with_donor_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
dry_run = true

[monitor]
mount_path = "/srv/home"
threshold_pct = 85

[cascade]
growth_increment_gib = 2

[[cascade.donors]]
mount_path = "/srv/b"
logical_volume = "lv_b"

[[cascade.donors]]
mount_path = "/srv/a"
logical_volume = "lv_a"
"#
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).expect("config should load");
        assert!(cfg.dry_run);
        assert_eq!(cfg.monitor.mount_path, PathBuf::from("/srv/home"));
        assert_eq!(cfg.monitor.threshold_pct, 85);
        assert_eq!(cfg.monitor.volume_group, "vgdata");
        assert_eq!(cfg.cascade.growth_increment_gib, 2);
        let names: Vec<&str> = cfg
            .cascade
            .donors
            .iter()
            .map(|d| d.logical_volume.as_str())
            .collect();
        assert_eq!(names, vec!["lv_b", "lv_a"]);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn toml_round_trip_preserves_config() {
        let cfg = Config::default();
        let rendered = cfg.to_toml().expect("render");
        let parsed: Config = toml::from_str(&rendered).expect("parse");
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let cfg = Config::default();
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
        let mut modified = Config::default();
        modified.monitor.threshold_pct = 81;
        assert_ne!(cfg.stable_hash().unwrap(), modified.stable_hash().unwrap());
    }
}
