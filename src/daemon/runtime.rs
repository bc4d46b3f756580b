//! Daemon bootstrap and thread orchestration.
//!
//! Threads:
//! - **aeh-supervisor** (main thread): polls usage, runs the cascade on breach.
//! - **aeh-loadgen** (optional): writes synthetic payloads into the monitored volume.
//! - **aeh-logger**: owns the JSONL writer (see `logger::activity`).
//!
//! Supervisor and load generator share nothing but the filesystem and the
//! shutdown flag. Shutdown order: loops stop, load generator joined,
//! `DaemonStopped` logged, logger flushed and joined.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::Serialize;

use crate::cascade::ExtensionCascade;
use crate::core::config::Config;
use crate::core::errors::{AehError, Result};
use crate::daemon::load_generator::{LoadGenerator, LoadReport, LoadSettings};
use crate::daemon::signals::ShutdownSignal;
use crate::daemon::supervisor::{CapacitySupervisor, SupervisorStats};
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::lvm::executor::{CommandExecutor, DryRunExecutor, LvmExecutor};
use crate::lvm::model::Topology;
use crate::monitor::usage_probe::UsageProbe;
use crate::platform::pal::{Platform, detect_platform, is_mount_point};

/// Summary returned after a clean shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonReport {
    pub supervisor: SupervisorStats,
    pub load: Option<LoadReport>,
    pub uptime_secs: u64,
}

/// Live LVM executor, wrapped in the dry-run executor when configured.
#[must_use]
pub fn build_executor(config: &Config) -> Arc<dyn CommandExecutor> {
    let live = LvmExecutor::new(config.cascade.command_timeout());
    if config.dry_run {
        Arc::new(DryRunExecutor::new(live))
    } else {
        Arc::new(live)
    }
}

/// Build the cascade every entry point shares.
#[must_use]
pub fn build_cascade(
    config: &Config,
    platform: Arc<dyn Platform>,
    executor: Arc<dyn CommandExecutor>,
    events: ActivityLoggerHandle,
) -> ExtensionCascade {
    ExtensionCascade::new(
        UsageProbe::new(platform),
        executor,
        events,
        config.cascade.donor_max_usage_pct,
    )
}

pub struct CapacityDaemon {
    config: Config,
    platform: Arc<dyn Platform>,
    executor: Arc<dyn CommandExecutor>,
    shutdown: ShutdownSignal,
    load_enabled: bool,
}

impl CapacityDaemon {
    /// Assemble a daemon from explicit parts.
    #[must_use]
    pub fn new(
        config: Config,
        platform: Arc<dyn Platform>,
        executor: Arc<dyn CommandExecutor>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let load_enabled = config.load.enabled;
        Self {
            config,
            platform,
            executor,
            shutdown,
            load_enabled,
        }
    }

    /// Production wiring: host platform, LVM executor, SIGINT/SIGTERM hooks.
    pub fn bootstrap(config: Config) -> Result<Self> {
        let platform = detect_platform()?;
        let executor = build_executor(&config);
        Ok(Self::new(
            config,
            platform,
            executor,
            ShutdownSignal::with_os_hooks(),
        ))
    }

    /// Disable the load generator regardless of configuration.
    #[must_use]
    pub fn without_load(mut self) -> Self {
        self.load_enabled = false;
        self
    }

    #[must_use]
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Run until shutdown is requested.
    pub fn run(self) -> Result<DaemonReport> {
        let started = Instant::now();
        let (events, logger_join) = spawn_logger(ActivityLoggerConfig::from_config(&self.config))?;

        events.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
            dry_run: self.executor.is_dry_run(),
        });
        self.warn_if_not_mounted(&events);

        let load_join = if self.load_enabled {
            Some(self.spawn_load_generator(events.clone())?)
        } else {
            None
        };

        let supervisor = CapacitySupervisor::new(
            build_cascade(
                &self.config,
                Arc::clone(&self.platform),
                Arc::clone(&self.executor),
                events.clone(),
            ),
            Topology::from_config(&self.config),
            self.config.monitor.threshold_pct,
            self.config.monitor.poll_interval(),
            events.clone(),
            self.shutdown.clone(),
        );
        eprintln!(
            "[AEH-DAEMON] monitoring {} (threshold {}%, every {}ms{})",
            self.config.monitor.mount_path.display(),
            self.config.monitor.threshold_pct,
            self.config.monitor.poll_interval_ms,
            if self.executor.is_dry_run() {
                ", dry run"
            } else {
                ""
            }
        );
        let supervisor_stats = supervisor.run();
        eprintln!("[AEH-DAEMON] shutdown requested");

        // The supervisor only returns on shutdown; make sure the generator sees it too.
        self.shutdown.request();
        let load = load_join.and_then(|join| match join.join() {
            Ok(report) => report,
            Err(_) => {
                events.send(ActivityEvent::Error {
                    code: "AEH-3900".to_string(),
                    message: "load generator thread panicked".to_string(),
                });
                None
            }
        });

        let uptime_secs = started.elapsed().as_secs();
        events.send(ActivityEvent::DaemonStopped {
            reason: "shutdown signal".to_string(),
            uptime_secs,
        });
        events.shutdown();
        let _ = logger_join.join();
        eprintln!("[AEH-DAEMON] shutdown complete (uptime={uptime_secs}s)");

        Ok(DaemonReport {
            supervisor: supervisor_stats,
            load,
            uptime_secs,
        })
    }

    fn warn_if_not_mounted(&self, events: &ActivityLoggerHandle) {
        let mount = &self.config.monitor.mount_path;
        match is_mount_point(self.platform.as_ref(), mount) {
            Ok(true) => {}
            Ok(false) => eprintln!(
                "[AEH-DAEMON] warning: {} is not a mount point; usage reflects its parent filesystem",
                mount.display()
            ),
            Err(err) => events.send(ActivityEvent::from_error(&err)),
        }
    }

    fn spawn_load_generator(
        &self,
        events: ActivityLoggerHandle,
    ) -> Result<thread::JoinHandle<Option<LoadReport>>> {
        let generator = LoadGenerator::new(
            UsageProbe::new(Arc::clone(&self.platform)),
            LoadSettings::from_config(&self.config),
            events.clone(),
            self.shutdown.clone(),
        );
        thread::Builder::new()
            .name("aeh-loadgen".to_string())
            .spawn(move || match generator.run() {
                Ok(report) => Some(report),
                Err(err) => {
                    events.send(ActivityEvent::from_error(&err));
                    None
                }
            })
            .map_err(|source| AehError::Runtime {
                details: format!("failed to spawn load generator thread: {source}"),
            })
    }
}
