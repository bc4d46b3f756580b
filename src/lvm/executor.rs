//! Privileged storage operations and the executors that carry them out.
//!
//! The cascade never shells out itself: it hands a [`StorageOperation`] to a
//! [`CommandExecutor`]. Three executors ship with the crate:
//! - [`LvmExecutor`] runs the real LVM tools with a per-command timeout.
//! - [`DryRunExecutor`] reports every mutation as successful without running
//!   it, while still answering read-only group queries from its inner executor.
//! - [`RecordingExecutor`] keeps everything in memory for tests.

#![allow(missing_docs)]

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::errors::{AehError, Result};
use crate::lvm::model::{LogicalVolumeRef, VolumeGroup};

const WAIT_POLL: Duration = Duration::from_millis(50);

// ──────────────────── operations ────────────────────

/// The four mutations the cascade can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StorageOperation {
    /// Grow a logical volume and its filesystem together.
    ExtendVolume {
        target: LogicalVolumeRef,
        amount_gib: u64,
    },
    /// Shrink a logical volume and its filesystem together, without prompting.
    ShrinkVolume {
        target: LogicalVolumeRef,
        amount_gib: u64,
    },
    /// Initialize a raw device as an LVM physical volume.
    InitPhysicalUnit { device: PathBuf },
    /// Add a physical volume to a volume group.
    AttachToGroup { device: PathBuf, group: String },
}

/// Operation shape without parameters, for matching and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Extend,
    Shrink,
    InitPhysicalUnit,
    AttachToGroup,
}

impl StorageOperation {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::ExtendVolume { .. } => OperationKind::Extend,
            Self::ShrinkVolume { .. } => OperationKind::Shrink,
            Self::InitPhysicalUnit { .. } => OperationKind::InitPhysicalUnit,
            Self::AttachToGroup { .. } => OperationKind::AttachToGroup,
        }
    }

    /// Logical volume the operation resizes, if any.
    #[must_use]
    pub const fn target(&self) -> Option<&LogicalVolumeRef> {
        match self {
            Self::ExtendVolume { target, .. } | Self::ShrinkVolume { target, .. } => Some(target),
            Self::InitPhysicalUnit { .. } | Self::AttachToGroup { .. } => None,
        }
    }

    /// Program and arguments for the LVM tool implementing this operation.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::ExtendVolume { target, amount_gib } => vec![
                "lvextend".to_string(),
                "-r".to_string(),
                "-L".to_string(),
                format!("+{amount_gib}G"),
                target.device_path().display().to_string(),
            ],
            Self::ShrinkVolume { target, amount_gib } => vec![
                "lvreduce".to_string(),
                "-r".to_string(),
                "-L".to_string(),
                format!("-{amount_gib}G"),
                target.device_path().display().to_string(),
                "-y".to_string(),
            ],
            Self::InitPhysicalUnit { device } => vec![
                "pvcreate".to_string(),
                "-y".to_string(),
                device.display().to_string(),
            ],
            Self::AttachToGroup { device, group } => vec![
                "vgextend".to_string(),
                group.clone(),
                device.display().to_string(),
            ],
        }
    }
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

fn group_free_argv(group: &VolumeGroup) -> Vec<String> {
    [
        "vgs",
        "--noheadings",
        "-o",
        "vg_free",
        "--units",
        "g",
        "--nosuffix",
        group.name.as_str(),
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Parse `vgs -o vg_free --units g --nosuffix` output into whole GiB.
///
/// Accepts a comma decimal separator; rejects negative, non-finite, or empty output.
pub fn parse_vg_free_gib(raw: &str) -> Option<u64> {
    let value = raw
        .split_whitespace()
        .next()?
        .replace(',', ".")
        .parse::<f64>()
        .ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(value.trunc() as u64)
}

// ──────────────────── executor trait ────────────────────

/// Carries out storage operations on behalf of the cascade.
pub trait CommandExecutor: Send + Sync {
    /// Perform one operation. Any non-success completion is an error.
    fn execute(&self, operation: &StorageOperation) -> Result<()>;

    /// Unallocated capacity of `group` in whole GiB.
    fn group_free_gib(&self, group: &VolumeGroup) -> Result<u64>;

    /// Whether mutations are simulated.
    fn is_dry_run(&self) -> bool {
        false
    }
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for Arc<T> {
    fn execute(&self, operation: &StorageOperation) -> Result<()> {
        (**self).execute(operation)
    }

    fn group_free_gib(&self, group: &VolumeGroup) -> Result<u64> {
        (**self).group_free_gib(group)
    }

    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }
}

// ──────────────────── live executor ────────────────────

/// Runs the LVM command-line tools.
#[derive(Debug, Clone)]
pub struct LvmExecutor {
    timeout: Duration,
}

struct CommandOutput {
    stdout: String,
    code: i32,
}

impl LvmExecutor {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Spawn `argv`, wait up to the timeout, and collect its output.
    ///
    /// Both pipes are drained on helper threads while the child runs, so a
    /// chatty tool never stalls on a full pipe. On expiry the child is killed
    /// and reaped; the drain threads are left to finish on their own.
    fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let label = argv.join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| AehError::Runtime {
            details: "empty command line".to_string(),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AehError::io(program, source))?;
        let stdout = child.stdout.take().map(drain_pipe);
        let stderr = child.stderr.take().map(drain_pipe);

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AehError::ExecutorTimeout {
                        operation: label,
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(WAIT_POLL),
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AehError::io(program, source));
                }
            }
        };

        let stdout = collect_pipe(stdout);
        let stderr = collect_pipe(stderr);
        let code = status.code().unwrap_or(-1);
        if code != 0 && !stderr.trim().is_empty() {
            eprintln!("[AEH-EXEC] {label}: {}", stderr.trim());
        }
        Ok(CommandOutput { stdout, code })
    }
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect_pipe(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl CommandExecutor for LvmExecutor {
    fn execute(&self, operation: &StorageOperation) -> Result<()> {
        let output = self.run(&operation.argv())?;
        if output.code == 0 {
            Ok(())
        } else {
            Err(AehError::Executor {
                operation: operation.to_string(),
                code: output.code,
            })
        }
    }

    fn group_free_gib(&self, group: &VolumeGroup) -> Result<u64> {
        let output = self.run(&group_free_argv(group))?;
        if output.code != 0 {
            return Err(AehError::GroupQuery {
                group: group.name.clone(),
                details: format!("vgs exited with {}", output.code),
            });
        }
        parse_vg_free_gib(&output.stdout).ok_or_else(|| AehError::GroupQuery {
            group: group.name.clone(),
            details: format!("unparseable vg_free output {:?}", output.stdout.trim()),
        })
    }
}

// ──────────────────── dry run ────────────────────

/// Simulates every mutation as successful; group queries stay live.
#[derive(Debug, Clone)]
pub struct DryRunExecutor<E> {
    inner: E,
}

impl<E: CommandExecutor> DryRunExecutor<E> {
    #[must_use]
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

impl<E: CommandExecutor> CommandExecutor for DryRunExecutor<E> {
    fn execute(&self, _operation: &StorageOperation) -> Result<()> {
        Ok(())
    }

    fn group_free_gib(&self, group: &VolumeGroup) -> Result<u64> {
        self.inner.group_free_gib(group)
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

// ──────────────────── recording fake ────────────────────

type FailurePredicate = Box<dyn Fn(&StorageOperation) -> bool + Send + Sync>;

struct FailureRule {
    matches: FailurePredicate,
    code: i32,
}

/// In-memory executor: records every requested operation and fails the ones
/// matching scripted rules.
pub struct RecordingExecutor {
    group_free_gib: Mutex<Option<u64>>,
    rules: Mutex<Vec<FailureRule>>,
    operations: Mutex<Vec<StorageOperation>>,
    group_queries: AtomicUsize,
}

impl RecordingExecutor {
    /// Executor whose group reports `group_free_gib` free and whose
    /// operations all succeed.
    #[must_use]
    pub fn new(group_free_gib: u64) -> Self {
        Self {
            group_free_gib: Mutex::new(Some(group_free_gib)),
            rules: Mutex::new(Vec::new()),
            operations: Mutex::new(Vec::new()),
            group_queries: AtomicUsize::new(0),
        }
    }

    /// `None` makes the group query fail.
    pub fn set_group_free_gib(&self, value: Option<u64>) {
        *self.group_free_gib.lock() = value;
    }

    /// Fail every operation for which `matches` returns true with exit `code`.
    pub fn fail_when<F>(&self, matches: F, code: i32)
    where
        F: Fn(&StorageOperation) -> bool + Send + Sync + 'static,
    {
        self.rules.lock().push(FailureRule {
            matches: Box::new(matches),
            code,
        });
    }

    /// Fail every operation of `kind`.
    pub fn fail_kind(&self, kind: OperationKind, code: i32) {
        self.fail_when(move |op| op.kind() == kind, code);
    }

    /// Fail operations of `kind` that target the LV called `lv_name`.
    pub fn fail_on_volume(&self, kind: OperationKind, lv_name: &str, code: i32) {
        let lv_name = lv_name.to_string();
        self.fail_when(
            move |op| op.kind() == kind && op.target().is_some_and(|t| t.name == lv_name),
            code,
        );
    }

    /// Every operation requested so far, failed ones included, in order.
    pub fn operations(&self) -> Vec<StorageOperation> {
        self.operations.lock().clone()
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        self.operations
            .lock()
            .iter()
            .map(StorageOperation::kind)
            .collect()
    }

    pub fn group_queries(&self) -> usize {
        self.group_queries.load(Ordering::SeqCst)
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, operation: &StorageOperation) -> Result<()> {
        self.operations.lock().push(operation.clone());
        let failure = self
            .rules
            .lock()
            .iter()
            .find(|rule| (rule.matches)(operation))
            .map(|rule| rule.code);
        match failure {
            Some(code) => Err(AehError::Executor {
                operation: operation.to_string(),
                code,
            }),
            None => Ok(()),
        }
    }

    fn group_free_gib(&self, group: &VolumeGroup) -> Result<u64> {
        self.group_queries.fetch_add(1, Ordering::SeqCst);
        (*self.group_free_gib.lock()).ok_or_else(|| AehError::GroupQuery {
            group: group.name.clone(),
            details: "scripted query failure".to_string(),
        })
    }
}
