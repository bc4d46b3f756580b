//! Capacity supervisor: poll the monitored volume and run the cascade when it
//! crosses the threshold.
//!
//! There is no backoff and no breach suppression. Every breaching tick runs a
//! full cascade, so a volume that stays full keeps being grown (or keeps
//! reporting `Failed`) on each poll.

#![allow(missing_docs)]

use std::time::Duration;

use serde::Serialize;

use crate::cascade::{CascadeOutcome, ExtensionCascade};
use crate::daemon::signals::ShutdownSignal;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::lvm::model::Topology;

/// What a single poll observed and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tick", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Usage could not be read; nothing was attempted.
    Undetermined,
    BelowThreshold { usage_pct: u8 },
    Breached { usage_pct: u8, outcome: CascadeOutcome },
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorStats {
    pub ticks: u64,
    pub undetermined: u64,
    pub breaches: u64,
    pub extensions: u64,
    pub failures: u64,
    pub cancelled: u64,
}

impl SupervisorStats {
    fn record(&mut self, tick: &TickOutcome) {
        self.ticks += 1;
        match tick {
            TickOutcome::Undetermined => self.undetermined += 1,
            TickOutcome::BelowThreshold { .. } => {}
            TickOutcome::Breached { outcome, .. } => {
                self.breaches += 1;
                if outcome.is_extended() {
                    self.extensions += 1;
                } else if outcome.is_failed() {
                    self.failures += 1;
                } else {
                    self.cancelled += 1;
                }
            }
        }
    }
}

pub struct CapacitySupervisor {
    cascade: ExtensionCascade,
    topology: Topology,
    threshold_pct: u8,
    poll_interval: Duration,
    events: ActivityLoggerHandle,
    shutdown: ShutdownSignal,
}

impl CapacitySupervisor {
    #[must_use]
    pub fn new(
        cascade: ExtensionCascade,
        topology: Topology,
        threshold_pct: u8,
        poll_interval: Duration,
        events: ActivityLoggerHandle,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            cascade,
            topology,
            threshold_pct,
            poll_interval,
            events,
            shutdown,
        }
    }

    /// One poll: read usage, compare, and run the cascade on breach.
    pub fn tick(&self) -> TickOutcome {
        let mount = &self.topology.volume.mount_path;
        let Some(usage_pct) = self.cascade.probe().usage_of(mount) else {
            self.events.send(ActivityEvent::ProbeUndetermined {
                mount_point: mount.display().to_string(),
            });
            return TickOutcome::Undetermined;
        };

        let breached = usage_pct >= self.threshold_pct;
        self.events.send(ActivityEvent::TickEvaluated {
            mount_point: mount.display().to_string(),
            usage_pct,
            threshold_pct: self.threshold_pct,
            breached,
        });
        if !breached {
            return TickOutcome::BelowThreshold { usage_pct };
        }

        let outcome = self.cascade.extend(&self.topology, &self.shutdown);
        TickOutcome::Breached { usage_pct, outcome }
    }

    /// Poll until shutdown is requested.
    pub fn run(&self) -> SupervisorStats {
        let mut stats = SupervisorStats::default();
        loop {
            if self.shutdown.is_requested() {
                break;
            }
            let tick = self.tick();
            stats.record(&tick);
            if self.shutdown.sleep(self.poll_interval) {
                break;
            }
        }
        stats
    }
}
