//! Usage probe: live utilization and free-space readings for a mount.
//!
//! Every call goes to the platform; nothing is cached, so two readings taken
//! in the same cascade invocation may legitimately differ. A failed read is
//! reported as `None` ("could not determine"), never as 0% or 100%.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::platform::pal::Platform;

const GIB: u64 = 1024 * 1024 * 1024;

/// One statvfs reading reduced to the two numbers the cascade compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MountSnapshot {
    pub usage_pct: u8,
    /// Free space (all free blocks) in whole GiB, truncated toward zero.
    pub free_gib: u64,
}

/// Live filesystem usage reader.
#[derive(Clone)]
pub struct UsageProbe {
    platform: Arc<dyn Platform>,
}

impl UsageProbe {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Current utilization of `mount` as a whole percentage.
    pub fn usage_of(&self, mount: &Path) -> Option<u8> {
        self.snapshot_of(mount).map(|snapshot| snapshot.usage_pct)
    }

    /// Free capacity of `mount` in whole GiB.
    pub fn free_capacity_gib_of(&self, mount: &Path) -> Option<u64> {
        self.snapshot_of(mount).map(|snapshot| snapshot.free_gib)
    }

    /// Usage and free capacity from a single read.
    pub fn snapshot_of(&self, mount: &Path) -> Option<MountSnapshot> {
        let stats = self.platform.fs_stats(mount).ok()?;
        Some(MountSnapshot {
            usage_pct: stats.used_pct()?,
            free_gib: stats.free_bytes / GIB,
        })
    }
}

/// A mount path paired with its latest snapshot, as reported by `aeh check`.
#[derive(Debug, Clone, Serialize)]
pub struct MountReading {
    pub mount_path: PathBuf,
    pub snapshot: Option<MountSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{AehError, Result};
    use crate::platform::pal::{FsStats, MockPlatform, MountPoint};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPlatform {
        inner: MockPlatform,
        calls: AtomicUsize,
    }

    impl Platform for CountingPlatform {
        fn fs_stats(&self, path: &Path) -> Result<FsStats> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fs_stats(path)
        }

        fn mount_points(&self) -> Result<Vec<MountPoint>> {
            Err(AehError::Runtime {
                details: "not used".to_string(),
            })
        }
    }

    #[test]
    fn usage_and_free_capacity_follow_platform() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_usage("/mnt/lv_data1", 30, 5);
        let probe = UsageProbe::new(platform);

        assert_eq!(probe.usage_of(Path::new("/mnt/lv_data1")), Some(30));
        assert_eq!(probe.free_capacity_gib_of(Path::new("/mnt/lv_data1")), Some(5));
    }

    #[test]
    fn failed_stats_read_is_undetermined() {
        let probe = UsageProbe::new(Arc::new(MockPlatform::new()));
        assert_eq!(probe.usage_of(Path::new("/mnt/missing")), None);
        assert_eq!(probe.free_capacity_gib_of(Path::new("/mnt/missing")), None);
    }

    #[test]
    fn zero_sized_filesystem_is_undetermined() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_stats(
            "/mnt/empty",
            FsStats {
                total_bytes: 0,
                free_bytes: 0,
                available_bytes: 0,
                fs_type: "ext4".to_string(),
                mount_point: PathBuf::from("/mnt/empty"),
                is_readonly: false,
            },
        );
        let probe = UsageProbe::new(platform);
        assert_eq!(probe.usage_of(Path::new("/mnt/empty")), None);
    }

    #[test]
    fn free_capacity_truncates_partial_gib() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_stats(
            "/mnt/partial",
            FsStats {
                total_bytes: 10 * GIB,
                free_bytes: GIB + GIB / 2,
                available_bytes: GIB,
                fs_type: "xfs".to_string(),
                mount_point: PathBuf::from("/mnt/partial"),
                is_readonly: false,
            },
        );
        let probe = UsageProbe::new(platform);
        assert_eq!(probe.free_capacity_gib_of(Path::new("/mnt/partial")), Some(1));
        // 8.5 GiB of 10 used -> 85%.
        assert_eq!(probe.usage_of(Path::new("/mnt/partial")), Some(85));
    }

    #[test]
    fn every_call_reads_fresh_stats() {
        let inner = MockPlatform::new();
        inner.set_usage("/mnt/lv_home", 50, 10);
        let platform = Arc::new(CountingPlatform {
            inner,
            calls: AtomicUsize::new(0),
        });
        let probe = UsageProbe::new(platform.clone());

        assert_eq!(probe.usage_of(Path::new("/mnt/lv_home")), Some(50));
        platform.inner.set_usage("/mnt/lv_home", 90, 1);
        assert_eq!(probe.usage_of(Path::new("/mnt/lv_home")), Some(90));
        assert_eq!(platform.calls.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #[test]
        fn usage_is_bounded_and_monotone_in_used_space(
            total in 1u64..=u64::MAX / 4,
            free_a in 0u64..=u64::MAX / 4,
            free_b in 0u64..=u64::MAX / 4,
        ) {
            let free_a = free_a.min(total);
            let free_b = free_b.min(total);
            let mk = |free: u64| FsStats {
                total_bytes: total,
                free_bytes: free,
                available_bytes: free,
                fs_type: "ext4".to_string(),
                mount_point: PathBuf::from("/p"),
                is_readonly: false,
            };
            let a = mk(free_a).used_pct().expect("non-empty fs");
            let b = mk(free_b).used_pct().expect("non-empty fs");
            prop_assert!(a <= 100 && b <= 100);
            if free_a >= free_b {
                prop_assert!(a <= b);
            }
        }
    }
}
