//! Synthetic load: fill the monitored volume with fixed-size payload files so
//! the supervisor has something to react to.
//!
//! Payloads are `file_NNN.bin` under `{mount}/{subdir}`, written in 4 MiB
//! random chunks (incompressible, not deduplicated) and fsynced. Numbering
//! continues after the highest existing payload so restarts never overwrite.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngCore;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{AehError, Result};
use crate::daemon::signals::ShutdownSignal;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::usage_probe::UsageProbe;

const CHUNK_SIZE: usize = 4 * 1024 * 1024;
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Why the generator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LoadStopReason {
    Shutdown,
    TargetReached { usage_pct: u8 },
    UsageUndetermined,
    RepeatedFailures { failures: u32 },
}

impl LoadStopReason {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::TargetReached { .. } => "target_reached",
            Self::UsageUndetermined => "usage_undetermined",
            Self::RepeatedFailures { .. } => "repeated_failures",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub files_written: u64,
    pub bytes_written: u64,
    pub stop_reason: LoadStopReason,
    pub final_usage: Option<u8>,
}

/// Resolved generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSettings {
    pub mount_path: PathBuf,
    pub directory: PathBuf,
    pub stop_pct: u8,
    pub payload_size_bytes: u64,
    pub interval: Duration,
}

impl LoadSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            mount_path: config.monitor.mount_path.clone(),
            directory: config.monitor.mount_path.join(&config.load.subdir),
            stop_pct: config.load.stop_pct,
            payload_size_bytes: config.load.payload_size_bytes(),
            interval: config.load.interval(),
        }
    }
}

pub struct LoadGenerator {
    probe: UsageProbe,
    settings: LoadSettings,
    events: ActivityLoggerHandle,
    shutdown: ShutdownSignal,
}

impl LoadGenerator {
    #[must_use]
    pub fn new(
        probe: UsageProbe,
        settings: LoadSettings,
        events: ActivityLoggerHandle,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            probe,
            settings,
            events,
            shutdown,
        }
    }

    /// Write payloads until usage reaches `stop_pct`, usage becomes
    /// unreadable, writes keep failing, or shutdown is requested.
    ///
    /// Only setup failures (payload directory) are returned as errors.
    pub fn run(&self) -> Result<LoadReport> {
        let dir = &self.settings.directory;
        fs::create_dir_all(dir).map_err(|source| AehError::io(dir, source))?;
        let mut index = next_payload_index(dir)?;

        let mut files_written = 0_u64;
        let mut bytes_written = 0_u64;
        let mut consecutive_failures = 0_u32;

        let stop_reason = loop {
            if self.shutdown.is_requested() {
                break LoadStopReason::Shutdown;
            }
            match self.probe.usage_of(&self.settings.mount_path) {
                None => break LoadStopReason::UsageUndetermined,
                Some(usage_pct) if usage_pct >= self.settings.stop_pct => {
                    break LoadStopReason::TargetReached { usage_pct };
                }
                Some(_) => {}
            }

            let path = dir.join(payload_file_name(index));
            match self.write_payload(&path) {
                Ok(true) => {
                    files_written += 1;
                    bytes_written += self.settings.payload_size_bytes;
                    consecutive_failures = 0;
                    index += 1;
                    self.events.send(ActivityEvent::PayloadWritten {
                        path: path.display().to_string(),
                        size_bytes: self.settings.payload_size_bytes,
                        usage_pct: self.probe.usage_of(&self.settings.mount_path),
                    });
                }
                Ok(false) => {
                    let _ = fs::remove_file(&path);
                    break LoadStopReason::Shutdown;
                }
                Err(err) => {
                    let _ = fs::remove_file(&path);
                    consecutive_failures += 1;
                    self.events.send(ActivityEvent::PayloadFailed {
                        path: path.display().to_string(),
                        error_code: err.code().to_string(),
                        error_message: err.to_string(),
                    });
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        break LoadStopReason::RepeatedFailures {
                            failures: consecutive_failures,
                        };
                    }
                }
            }

            if self.shutdown.sleep(self.settings.interval) {
                break LoadStopReason::Shutdown;
            }
        };

        self.events.send(ActivityEvent::LoadStopped {
            reason: stop_reason.label().to_string(),
            files_written,
        });
        Ok(LoadReport {
            files_written,
            bytes_written,
            stop_reason,
            final_usage: self.probe.usage_of(&self.settings.mount_path),
        })
    }

    /// Returns `Ok(false)` when shutdown interrupted the write.
    fn write_payload(&self, path: &Path) -> Result<bool> {
        let mut file = open_payload(path)?;
        let mut rng = rand::rng();
        let mut chunk = vec![0_u8; CHUNK_SIZE];
        let mut remaining = self.settings.payload_size_bytes;

        while remaining > 0 {
            if self.shutdown.is_requested() {
                return Ok(false);
            }
            let len = usize::try_from(remaining).map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE));
            rng.fill_bytes(&mut chunk[..len]);
            file.write_all(&chunk[..len])
                .map_err(|source| AehError::io(path, source))?;
            remaining -= len as u64;
        }
        file.sync_all().map_err(|source| AehError::io(path, source))?;
        Ok(true)
    }
}

fn open_payload(path: &Path) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        opts.mode(0o600);
    }
    opts.open(path).map_err(|source| AehError::io(path, source))
}

#[must_use]
pub fn payload_file_name(index: u32) -> String {
    format!("file_{index:03}.bin")
}

fn parse_payload_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("file_")?.strip_suffix(".bin")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One past the highest existing payload index among regular files in `dir`;
/// an empty directory starts at 1.
fn next_payload_index(dir: &Path) -> Result<u32> {
    let entries = fs::read_dir(dir).map_err(|source| AehError::io(dir, source))?;
    let highest = entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| parse_payload_index(&entry.file_name().to_string_lossy()))
        .max();
    Ok(highest.map_or(1, |h| h.saturating_add(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::{FsStats, MountPoint, Platform};
    use std::sync::Arc;

    /// Usage climbs 10 points per payload file present, starting at `base`.
    struct FillingPlatform {
        dir: PathBuf,
        base: u64,
    }

    impl Platform for FillingPlatform {
        fn fs_stats(&self, path: &Path) -> Result<FsStats> {
            let files = fs::read_dir(&self.dir)
                .map(|entries| entries.filter_map(std::result::Result::ok).count() as u64)
                .unwrap_or(0);
            let used = (self.base + files * 10).min(100);
            Ok(FsStats {
                total_bytes: 100,
                free_bytes: 100 - used,
                available_bytes: 100 - used,
                fs_type: "ext4".to_string(),
                mount_point: path.to_path_buf(),
                is_readonly: false,
            })
        }

        fn mount_points(&self) -> Result<Vec<MountPoint>> {
            Ok(Vec::new())
        }
    }

    fn generator(mount: &Path, base: u64, stop_pct: u8) -> (LoadGenerator, PathBuf) {
        let directory = mount.join("writer");
        let platform = Arc::new(FillingPlatform {
            dir: directory.clone(),
            base,
        });
        let (events, _rx) = ActivityLoggerHandle::channel(64);
        let settings = LoadSettings {
            mount_path: mount.to_path_buf(),
            directory: directory.clone(),
            stop_pct,
            payload_size_bytes: 4096,
            interval: Duration::from_millis(1),
        };
        (
            LoadGenerator::new(UsageProbe::new(platform), settings, events, ShutdownSignal::new()),
            directory,
        )
    }

    #[test]
    fn writes_until_stop_threshold() {
        let mount = tempfile::tempdir().unwrap();
        let (generator, dir) = generator(mount.path(), 50, 80);
        let report = generator.run().unwrap();

        assert_eq!(report.files_written, 3);
        assert_eq!(report.bytes_written, 3 * 4096);
        assert_eq!(
            report.stop_reason,
            LoadStopReason::TargetReached { usage_pct: 80 }
        );
        assert_eq!(report.final_usage, Some(80));
        assert!(!dir.join("file_000.bin").exists());
        for i in 1..=3 {
            let meta = fs::metadata(dir.join(payload_file_name(i))).unwrap();
            assert_eq!(meta.len(), 4096);
        }
    }

    #[test]
    fn numbering_resumes_after_existing_payloads() {
        let mount = tempfile::tempdir().unwrap();
        let (generator, dir) = generator(mount.path(), 0, 30);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("file_007.bin"), b"old").unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let report = generator.run().unwrap();
        // 2 pre-existing entries count as 20%, one more payload reaches 30%.
        assert_eq!(report.files_written, 1);
        assert!(dir.join("file_008.bin").exists());
        assert_eq!(fs::read(dir.join("file_007.bin")).unwrap(), b"old");
    }

    #[test]
    fn repeated_write_failures_stop_the_generator() {
        let mount = tempfile::tempdir().unwrap();
        let (generator, dir) = generator(mount.path(), 0, 100);
        // A directory squatting on the first payload name makes every open fail.
        fs::create_dir_all(dir.join("file_001.bin")).unwrap();

        let report = generator.run().unwrap();
        assert_eq!(report.files_written, 0);
        assert_eq!(
            report.stop_reason,
            LoadStopReason::RepeatedFailures { failures: 3 }
        );
    }

    #[test]
    fn shutdown_before_start_writes_nothing() {
        let mount = tempfile::tempdir().unwrap();
        let (generator, dir) = generator(mount.path(), 0, 100);
        generator.shutdown.request();
        let report = generator.run().unwrap();
        assert_eq!(report.stop_reason, LoadStopReason::Shutdown);
        assert_eq!(fs::read_dir(dir).unwrap().count(), 0);
    }

    #[test]
    fn payload_names_parse_back() {
        assert_eq!(payload_file_name(3), "file_003.bin");
        assert_eq!(payload_file_name(1234), "file_1234.bin");
        assert_eq!(parse_payload_index("file_042.bin"), Some(42));
        assert_eq!(parse_payload_index("file_1234.bin"), Some(1234));
        assert_eq!(parse_payload_index("file_.bin"), None);
        assert_eq!(parse_payload_index("file_-1.bin"), None);
        assert_eq!(parse_payload_index("other_001.bin"), None);
    }
}
