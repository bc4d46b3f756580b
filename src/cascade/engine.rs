//! Extension cascade: grow the monitored volume from the cheapest source
//! available, in strict priority order.
//!
//! 1. Pool: unallocated space already in the volume group.
//! 2. Donor: shrink the first eligible donor, then extend.
//! 3. Fallback: initialize the reserve device, attach it, then extend.
//!
//! Each invocation re-reads everything it needs; nothing carries over between
//! runs. Shutdown is honored between steps and between donor candidates, never
//! in the middle of a step.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use crate::cascade::outcome::{CascadeFailure, CascadeOutcome, DonorVerdict};
use crate::core::errors::{AehError, Result};
use crate::daemon::signals::ShutdownSignal;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::lvm::executor::{CommandExecutor, StorageOperation};
use crate::lvm::model::{DonorCandidate, Topology};
use crate::monitor::usage_probe::UsageProbe;

const STEP_POOL: &str = "pool";
const STEP_DONOR: &str = "donor";
const STEP_FALLBACK: &str = "fallback";

/// Result of the pool and per-donor steps: either the cascade is over or the
/// next source should be tried.
enum StepResult {
    Done(CascadeOutcome),
    Continue,
}

/// Stateless cascade runner shared by the supervisor and `aeh extend`.
pub struct ExtensionCascade {
    probe: UsageProbe,
    executor: Arc<dyn CommandExecutor>,
    events: ActivityLoggerHandle,
    donor_max_usage_pct: u8,
}

impl ExtensionCascade {
    #[must_use]
    pub fn new(
        probe: UsageProbe,
        executor: Arc<dyn CommandExecutor>,
        events: ActivityLoggerHandle,
        donor_max_usage_pct: u8,
    ) -> Self {
        Self {
            probe,
            executor,
            events,
            donor_max_usage_pct,
        }
    }

    #[must_use]
    pub fn probe(&self) -> &UsageProbe {
        &self.probe
    }

    /// Run one cascade invocation against `topology`.
    pub fn extend(&self, topology: &Topology, shutdown: &ShutdownSignal) -> CascadeOutcome {
        let started = Instant::now();
        self.events.send(ActivityEvent::CascadeStarted {
            volume: topology.volume.volume.to_string(),
        });

        let outcome = self.run_steps(topology, shutdown);

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;
        self.events.send(ActivityEvent::CascadeFinished {
            outcome: outcome.label().to_string(),
            ok: outcome.is_extended(),
            duration_ms,
            details: outcome.details(),
        });
        outcome
    }

    /// Eligibility of `donor` from a fresh reading.
    pub fn judge_donor(&self, donor: &DonorCandidate, needed_gib: u64) -> DonorVerdict {
        DonorVerdict::judge(
            self.probe.snapshot_of(&donor.mount_path),
            self.donor_max_usage_pct,
            needed_gib,
        )
    }

    fn run_steps(&self, topology: &Topology, shutdown: &ShutdownSignal) -> CascadeOutcome {
        if shutdown.is_requested() {
            return CascadeOutcome::Cancelled;
        }
        if let StepResult::Done(outcome) = self.try_pool(topology) {
            return outcome;
        }

        for donor in &topology.donors {
            if shutdown.is_requested() {
                return CascadeOutcome::Cancelled;
            }
            if let StepResult::Done(outcome) = self.try_donor(topology, donor) {
                return outcome;
            }
        }

        if shutdown.is_requested() {
            return CascadeOutcome::Cancelled;
        }
        self.try_fallback(topology)
    }

    fn try_pool(&self, topology: &Topology) -> StepResult {
        let needed = topology.volume.growth_increment_gib;
        let free = match self.executor.group_free_gib(&topology.group) {
            Ok(free) => free,
            Err(err) => {
                self.events.send(ActivityEvent::from_error(&err));
                0
            }
        };
        if free < needed {
            self.events.send(ActivityEvent::StepSkipped {
                step: STEP_POOL,
                reason: format!(
                    "group {} has {free} GiB free, {needed} GiB needed",
                    topology.group.name
                ),
            });
            return StepResult::Continue;
        }

        self.events.send(ActivityEvent::StepAttempted {
            step: STEP_POOL,
            donor: None,
        });
        match self.run(&extend_monitored(topology)) {
            Ok(()) => {
                self.step_succeeded(STEP_POOL, None);
                StepResult::Done(CascadeOutcome::ExtendedFromPool)
            }
            Err(err) => {
                self.step_failed(STEP_POOL, None, &err);
                StepResult::Done(CascadeOutcome::Failed {
                    reason: CascadeFailure::PoolExtend,
                })
            }
        }
    }

    fn try_donor(&self, topology: &Topology, donor: &DonorCandidate) -> StepResult {
        let amount = topology.volume.growth_increment_gib;
        let verdict = self.judge_donor(donor, amount);
        if !verdict.is_eligible() {
            self.events.send(ActivityEvent::DonorSkipped {
                donor: donor.id().to_string(),
                reason: verdict.to_string(),
            });
            return StepResult::Continue;
        }

        let donor_id = Some(donor.id().to_string());
        self.events.send(ActivityEvent::StepAttempted {
            step: STEP_DONOR,
            donor: donor_id.clone(),
        });

        let shrink = StorageOperation::ShrinkVolume {
            target: donor.volume.clone(),
            amount_gib: amount,
        };
        if let Err(err) = self.run(&shrink) {
            self.step_failed(STEP_DONOR, donor_id, &err);
            return StepResult::Continue;
        }

        match self.run(&extend_monitored(topology)) {
            Ok(()) => {
                self.step_succeeded(STEP_DONOR, donor_id);
                StepResult::Done(CascadeOutcome::ExtendedFromDonor {
                    donor: donor.id().to_string(),
                })
            }
            Err(err) => {
                self.step_failed(STEP_DONOR, donor_id, &err);
                StepResult::Done(CascadeOutcome::Failed {
                    reason: CascadeFailure::DonorExtendAfterShrink {
                        donor: donor.id().to_string(),
                    },
                })
            }
        }
    }

    fn try_fallback(&self, topology: &Topology) -> CascadeOutcome {
        self.events.send(ActivityEvent::StepAttempted {
            step: STEP_FALLBACK,
            donor: None,
        });
        let device = topology.fallback.path.clone();
        let sequence = [
            (
                StorageOperation::InitPhysicalUnit {
                    device: device.clone(),
                },
                CascadeFailure::FallbackInit,
            ),
            (
                StorageOperation::AttachToGroup {
                    device,
                    group: topology.group.name.clone(),
                },
                CascadeFailure::FallbackAttach,
            ),
            (extend_monitored(topology), CascadeFailure::FallbackExtend),
        ];

        for (operation, failure) in sequence {
            if let Err(err) = self.run(&operation) {
                self.step_failed(STEP_FALLBACK, None, &err);
                return CascadeOutcome::Failed { reason: failure };
            }
        }
        self.step_succeeded(STEP_FALLBACK, None);
        CascadeOutcome::ExtendedFromFallback
    }

    fn run(&self, operation: &StorageOperation) -> Result<()> {
        self.events.send(ActivityEvent::CommandIssued {
            command: operation.to_string(),
            dry_run: self.executor.is_dry_run(),
        });
        self.executor.execute(operation)
    }

    fn step_succeeded(&self, step: &'static str, donor: Option<String>) {
        self.events.send(ActivityEvent::StepSucceeded { step, donor });
    }

    fn step_failed(&self, step: &'static str, donor: Option<String>, err: &AehError) {
        self.events.send(ActivityEvent::StepFailed {
            step,
            donor,
            error_code: err.code().to_string(),
            error_message: err.to_string(),
        });
    }
}

fn extend_monitored(topology: &Topology) -> StorageOperation {
    StorageOperation::ExtendVolume {
        target: topology.volume.volume.clone(),
        amount_gib: topology.volume.growth_increment_gib,
    }
}
