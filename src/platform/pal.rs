//! PAL trait, the Linux `statvfs` implementation, and an in-memory mock.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::{AehError, Result};

/// Filesystem statistics for a path/mount.
///
/// `free_bytes` counts every free block (including root-reserved ones);
/// `available_bytes` is what an unprivileged writer could still use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub fs_type: String,
    pub mount_point: PathBuf,
    pub is_readonly: bool,
}

impl FsStats {
    /// Used space as a whole percentage, rounded half-up.
    ///
    /// `None` for a filesystem that reports zero total blocks.
    #[must_use]
    pub fn used_pct(&self) -> Option<u8> {
        if self.total_bytes == 0 {
            return None;
        }
        let total = u128::from(self.total_bytes);
        let used = u128::from(self.total_bytes.saturating_sub(self.free_bytes));
        u8::try_from((200 * used + total) / (2 * total)).ok()
    }
}

/// Mount-point metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
}

/// OS abstraction used by the usage probe and the CLI.
pub trait Platform: Send + Sync {
    fn fs_stats(&self, path: &Path) -> Result<FsStats>;
    fn mount_points(&self) -> Result<Vec<MountPoint>>;
}

/// Linux platform implementation using `/proc/self/mounts` + `statvfs`.
#[derive(Debug)]
pub struct LinuxPlatform {
    mounts_cache: RwLock<Option<(Vec<MountPoint>, Instant)>>,
    cache_ttl: Duration,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounts_cache: RwLock::new(None),
            cache_ttl: Duration::from_secs(5),
        }
    }

    fn get_cached_mounts(&self) -> Result<Vec<MountPoint>> {
        {
            let cache = self.mounts_cache.read();
            if let Some((mounts, collected_at)) = &*cache
                && collected_at.elapsed() < self.cache_ttl
            {
                return Ok(mounts.clone());
            }
        }

        let raw = fs::read_to_string("/proc/self/mounts")
            .map_err(|source| AehError::io("/proc/self/mounts", source))?;
        let mounts = parse_proc_mounts(&raw);

        *self.mounts_cache.write() = Some((mounts.clone(), Instant::now()));
        Ok(mounts)
    }
}

#[cfg(unix)]
impl Platform for LinuxPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| AehError::FsStats {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        // The mount table only labels the reading; the block counts above are
        // authoritative even if /proc is unavailable.
        let mount = self
            .mount_points()
            .ok()
            .and_then(|mounts| find_mount(path, &mounts).cloned());
        let fragment = stat.fragment_size();
        Ok(FsStats {
            total_bytes: stat.blocks().saturating_mul(fragment),
            free_bytes: stat.blocks_free().saturating_mul(fragment),
            available_bytes: stat.blocks_available().saturating_mul(fragment),
            fs_type: mount
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |m| m.fs_type.clone()),
            mount_point: mount.map_or_else(|| path.to_path_buf(), |m| m.path),
            is_readonly: stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY),
        })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        self.get_cached_mounts()
    }
}

/// In-memory platform for deterministic tests and dry simulations.
///
/// Stats are keyed by exact path; any path without an entry fails like an
/// unreadable mount would.
#[derive(Debug, Default)]
pub struct MockPlatform {
    stats: RwLock<HashMap<PathBuf, FsStats>>,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install stats for `path` that read as `used_pct` percent used with
    /// `free_gib` GiB free.
    pub fn set_usage(&self, path: impl Into<PathBuf>, used_pct: u8, free_gib: u64) {
        let path = path.into();
        let used_pct = u64::from(used_pct.min(100));
        // Choose a total so that free/total lands on the requested split; a
        // sub-GiB filesystem stands in for "no whole GiB free".
        let (total_bytes, free_bytes) = if free_gib == 0 || used_pct == 100 {
            (100 * MIB, (100 - used_pct) * MIB)
        } else {
            let free = free_gib.saturating_mul(GIB);
            (free.saturating_mul(100) / (100 - used_pct), free)
        };
        self.set_stats(
            path.clone(),
            FsStats {
                total_bytes,
                free_bytes,
                available_bytes: free_bytes,
                fs_type: "ext4".to_string(),
                mount_point: path,
                is_readonly: false,
            },
        );
    }

    pub fn set_stats(&self, path: impl Into<PathBuf>, stats: FsStats) {
        self.stats.write().insert(path.into(), stats);
    }

    /// Make subsequent reads of `path` fail.
    pub fn remove(&self, path: &Path) {
        self.stats.write().remove(path);
    }
}

impl Platform for MockPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        self.stats
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| AehError::FsStats {
                path: path.to_path_buf(),
                details: "mock stats not found".to_string(),
            })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        Ok(self
            .stats
            .read()
            .values()
            .map(|stats| MountPoint {
                path: stats.mount_point.clone(),
                device: "mock".to_string(),
                fs_type: stats.fs_type.clone(),
            })
            .collect())
    }
}

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(AehError::UnsupportedPlatform {
            details: "LVM volume management is only available on Linux".to_string(),
        })
    }
}

/// Whether `path` is itself listed in the mount table.
pub fn is_mount_point(platform: &dyn Platform, path: &Path) -> Result<bool> {
    Ok(platform
        .mount_points()?
        .iter()
        .any(|mount| mount.path == path))
}

fn parse_proc_mounts(raw: &str) -> Vec<MountPoint> {
    let mut mounts: Vec<MountPoint> = raw
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let path = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountPoint {
                path: unescape_mount_path(path),
                device: device.to_string(),
                fs_type: fs_type.to_string(),
            })
        })
        .collect();
    mounts.sort_by(|left, right| {
        right
            .path
            .as_os_str()
            .len()
            .cmp(&left.path.as_os_str().len())
    });
    mounts
}

fn find_mount<'a>(path: &Path, mounts: &'a [MountPoint]) -> Option<&'a MountPoint> {
    mounts
        .iter()
        .filter(|mount| path.starts_with(&mount.path))
        .max_by_key(|mount| mount.path.as_os_str().len())
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel.
fn unescape_mount_path(raw: &str) -> PathBuf {
    let raw_bytes = raw.as_bytes();
    let mut bytes = Vec::with_capacity(raw_bytes.len());
    let mut i = 0;
    while i < raw_bytes.len() {
        if raw_bytes[i] == b'\\'
            && let Some(digits) = raw_bytes.get(i + 1..i + 4)
            && digits.iter().all(|d| (b'0'..=b'7').contains(d))
        {
            bytes.push((digits[0] - b'0') * 64 + (digits[1] - b'0') * 8 + (digits[2] - b'0'));
            i += 4;
            continue;
        }
        bytes.push(raw_bytes[i]);
        i += 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FsStats, MockPlatform, MountPoint, Platform, find_mount, is_mount_point,
        parse_proc_mounts, unescape_mount_path,
    };
    use std::path::{Path, PathBuf};

    fn stats(total: u64, free: u64) -> FsStats {
        FsStats {
            total_bytes: total,
            free_bytes: free,
            available_bytes: free,
            fs_type: "ext4".to_string(),
            mount_point: PathBuf::from("/mnt"),
            is_readonly: false,
        }
    }

    #[test]
    fn used_pct_rounds_half_up() {
        assert_eq!(stats(1000, 1000).used_pct(), Some(0));
        assert_eq!(stats(1000, 0).used_pct(), Some(100));
        assert_eq!(stats(1000, 205).used_pct(), Some(80)); // 79.5 -> 80
        assert_eq!(stats(1000, 206).used_pct(), Some(79)); // 79.4 -> 79
        assert_eq!(stats(3, 2).used_pct(), Some(33));
    }

    #[test]
    fn used_pct_undetermined_for_empty_filesystem() {
        assert_eq!(stats(0, 0).used_pct(), None);
    }

    #[test]
    fn parses_mount_table() {
        let sample = "/dev/mapper/vgdata-lv_home /mnt/lv_home ext4 rw,relatime 0 0\n\
                      tmpfs /tmp tmpfs rw,nosuid,nodev 0 0\n\
                      garbage\n";
        let mounts = parse_proc_mounts(sample);
        assert_eq!(mounts.len(), 2);
        assert!(mounts.iter().any(|m| m.path == Path::new("/mnt/lv_home")));
        assert!(mounts.iter().any(|m| m.device == "/dev/mapper/vgdata-lv_home"));
    }

    #[test]
    fn find_mount_prefers_longest_prefix() {
        let mounts = vec![
            MountPoint {
                path: "/".into(),
                device: "root".to_string(),
                fs_type: "ext4".to_string(),
            },
            MountPoint {
                path: "/mnt/lv_home".into(),
                device: "/dev/mapper/vgdata-lv_home".to_string(),
                fs_type: "ext4".to_string(),
            },
        ];
        let mount = find_mount(Path::new("/mnt/lv_home/writer"), &mounts).expect("mount");
        assert_eq!(mount.path, Path::new("/mnt/lv_home"));
    }

    #[test]
    fn unescapes_octal_sequences() {
        assert_eq!(
            unescape_mount_path("/mnt/my\\040dir"),
            PathBuf::from("/mnt/my dir")
        );
        assert_eq!(
            unescape_mount_path("/mnt/a\\04"),
            PathBuf::from("/mnt/a\\04")
        );
    }

    #[test]
    fn mock_platform_set_usage_matches_request() {
        let platform = MockPlatform::new();
        platform.set_usage("/mnt/lv_data1", 30, 5);
        let s = platform.fs_stats(Path::new("/mnt/lv_data1")).unwrap();
        assert_eq!(s.used_pct(), Some(30));
        assert_eq!(s.free_bytes / (1024 * 1024 * 1024), 5);

        platform.set_usage("/mnt/full", 100, 0);
        let full = platform.fs_stats(Path::new("/mnt/full")).unwrap();
        assert_eq!(full.used_pct(), Some(100));
    }

    #[test]
    fn mock_platform_missing_path_fails() {
        let platform = MockPlatform::new();
        assert!(platform.fs_stats(Path::new("/nowhere")).is_err());
        platform.set_usage("/mnt/x", 10, 1);
        platform.remove(Path::new("/mnt/x"));
        assert!(platform.fs_stats(Path::new("/mnt/x")).is_err());
    }

    #[test]
    fn is_mount_point_checks_exact_path() {
        let platform = MockPlatform::new();
        platform.set_usage("/mnt/lv_home", 50, 10);
        assert!(is_mount_point(&platform, Path::new("/mnt/lv_home")).unwrap());
        assert!(!is_mount_point(&platform, Path::new("/mnt/lv_home/writer")).unwrap());
    }
}
