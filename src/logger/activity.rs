//! Activity logger: a dedicated thread owns the JSONL writer and echoes a
//! human-readable line per event to stderr.
//!
//! Every other thread sends `ActivityEvent`s through a bounded crossbeam
//! channel using `try_send()`, so a slow log device never stalls the
//! supervisor or the cascade.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::Config;
use crate::core::errors::{AehError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Everything the daemon reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        dry_run: bool,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    ProbeUndetermined {
        mount_point: String,
    },
    TickEvaluated {
        mount_point: String,
        usage_pct: u8,
        threshold_pct: u8,
        breached: bool,
    },
    CascadeStarted {
        volume: String,
    },
    StepAttempted {
        step: &'static str,
        donor: Option<String>,
    },
    StepSucceeded {
        step: &'static str,
        donor: Option<String>,
    },
    StepFailed {
        step: &'static str,
        donor: Option<String>,
        error_code: String,
        error_message: String,
    },
    StepSkipped {
        step: &'static str,
        reason: String,
    },
    DonorSkipped {
        donor: String,
        reason: String,
    },
    CommandIssued {
        command: String,
        dry_run: bool,
    },
    CascadeFinished {
        outcome: String,
        ok: bool,
        duration_ms: u64,
        details: Option<String>,
    },
    PayloadWritten {
        path: String,
        size_bytes: u64,
        usage_pct: Option<u8>,
    },
    PayloadFailed {
        path: String,
        error_code: String,
        error_message: String,
    },
    LoadStopped {
        reason: String,
        files_written: u64,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

impl ActivityEvent {
    /// Error event carrying the error's stable code.
    #[must_use]
    pub fn from_error(err: &AehError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Cheaply cloneable sender side of the activity log.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Handle plus the raw receiving end, without a logger thread.
    ///
    /// Library users and tests drain the receiver themselves.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Send an event without blocking. A full channel drops the event and
    /// bumps the drop counter; a disconnected one is ignored.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only until the
    /// sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub echo_stderr: bool,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            jsonl: JsonlConfig::new(
                config.paths.jsonl_log.clone(),
                config.logging.max_size_bytes,
                config.logging.max_rotated_files,
            ),
            echo_stderr: config.logging.echo_stderr,
            channel_capacity: config.logging.channel_capacity,
        }
    }
}

/// Spawn the `aeh-logger` thread.
///
/// It runs until `handle.shutdown()` is called or every handle is dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (handle, rx) = ActivityLoggerHandle::channel(config.channel_capacity);
    let dropped = Arc::clone(&handle.dropped_events);

    let join = thread::Builder::new()
        .name("aeh-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped))
        .map_err(|e| AehError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    config: ActivityLoggerConfig,
    dropped: &AtomicU64,
) {
    let mut jsonl = JsonlWriter::open(config.jsonl);
    let mut emit = |entry: &LogEntry| {
        if config.echo_stderr {
            let _ = writeln!(io::stderr(), "{}", human_line(entry));
        }
        jsonl.write_entry(entry);
    };

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            emit(&warn);
        }
        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        emit(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

/// Convert an event into its JSONL record.
#[allow(clippy::too_many_lines)]
#[must_use]
pub fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            dry_run,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.dry_run = Some(*dry_run);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e
        }
        ActivityEvent::ProbeUndetermined { mount_point } => {
            let mut e = LogEntry::new(EventType::ProbeUndetermined, Severity::Warning);
            e.mount_point = Some(mount_point.clone());
            e.details = Some("usage could not be determined; tick skipped".to_string());
            e
        }
        ActivityEvent::TickEvaluated {
            mount_point,
            usage_pct,
            threshold_pct,
            breached,
        } => {
            let severity = if *breached {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::Tick, severity);
            e.mount_point = Some(mount_point.clone());
            e.usage_pct = Some(*usage_pct);
            e.threshold_pct = Some(*threshold_pct);
            e.details = Some(if *breached { "breach" } else { "ok" }.to_string());
            e
        }
        ActivityEvent::CascadeStarted { volume } => {
            let mut e = LogEntry::new(EventType::CascadeStart, Severity::Info);
            e.details = Some(volume.clone());
            e
        }
        ActivityEvent::StepAttempted { step, donor } => {
            let mut e = LogEntry::new(EventType::StepAttempt, Severity::Info);
            e.step = Some((*step).to_string());
            e.donor.clone_from(donor);
            e
        }
        ActivityEvent::StepSucceeded { step, donor } => {
            let mut e = LogEntry::new(EventType::StepSuccess, Severity::Info);
            e.step = Some((*step).to_string());
            e.donor.clone_from(donor);
            e.ok = Some(true);
            e
        }
        ActivityEvent::StepFailed {
            step,
            donor,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::StepFailure, Severity::Warning);
            e.step = Some((*step).to_string());
            e.donor.clone_from(donor);
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::StepSkipped { step, reason } => {
            let mut e = LogEntry::new(EventType::StepSkip, Severity::Info);
            e.step = Some((*step).to_string());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::DonorSkipped { donor, reason } => {
            let mut e = LogEntry::new(EventType::StepSkip, Severity::Info);
            e.step = Some("donor".to_string());
            e.donor = Some(donor.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::CommandIssued { command, dry_run } => {
            let mut e = LogEntry::new(EventType::Command, Severity::Info);
            e.command = Some(command.clone());
            e.dry_run = Some(*dry_run);
            e
        }
        ActivityEvent::CascadeFinished {
            outcome,
            ok,
            duration_ms,
            details,
        } => {
            let severity = if *ok {
                Severity::Info
            } else {
                Severity::Warning
            };
            let mut e = LogEntry::new(EventType::CascadeFinish, severity);
            e.outcome = Some(outcome.clone());
            e.ok = Some(*ok);
            e.duration_ms = Some(*duration_ms);
            e.details.clone_from(details);
            e
        }
        ActivityEvent::PayloadWritten {
            path,
            size_bytes,
            usage_pct,
        } => {
            let mut e = LogEntry::new(EventType::PayloadWrite, Severity::Info);
            e.path = Some(path.clone());
            e.size = Some(*size_bytes);
            e.usage_pct = *usage_pct;
            e.ok = Some(true);
            e
        }
        ActivityEvent::PayloadFailed {
            path,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::PayloadFailure, Severity::Warning);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::LoadStopped {
            reason,
            files_written,
        } => {
            let mut e = LogEntry::new(EventType::LoadStop, Severity::Info);
            e.details = Some(format!("reason={reason} files_written={files_written}"));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

/// One-line stderr rendering: `[AEH] <ts> <LEVEL> <event> key=value ...`.
#[must_use]
pub fn human_line(entry: &LogEntry) -> String {
    let mut line = format!(
        "[AEH] {} {} {}",
        entry.ts,
        entry.severity.label(),
        entry.event.as_str()
    );
    let mut field = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            let _ = write!(line, " {key}={value}");
        }
    };
    field("mount", entry.mount_point.clone());
    field("usage", entry.usage_pct.map(|p| format!("{p}%")));
    field("threshold", entry.threshold_pct.map(|p| format!("{p}%")));
    field("step", entry.step.clone());
    field("donor", entry.donor.clone());
    field("outcome", entry.outcome.clone());
    field("path", entry.path.clone());
    field("size", entry.size.map(|s| s.to_string()));
    field("duration_ms", entry.duration_ms.map(|d| d.to_string()));
    field("code", entry.error_code.clone());
    field(
        "dry_run",
        entry.dry_run.filter(|dry| *dry).map(|_| "true".to_string()),
    );
    if let Some(command) = &entry.command {
        let _ = write!(line, " cmd=\"{command}\"");
    }
    if let Some(message) = &entry.error_message {
        let _ = write!(line, " error=\"{message}\"");
    }
    if let Some(details) = &entry.details {
        let _ = write!(line, " ({details})");
    }
    line
}
