//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use autoextend_helper::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{AehError, Result};

// Platform
pub use crate::platform::pal::{FsStats, MockPlatform, MountPoint, Platform, detect_platform};

// Monitor
pub use crate::monitor::usage_probe::{MountSnapshot, UsageProbe};

// LVM
pub use crate::lvm::executor::{
    CommandExecutor, DryRunExecutor, LvmExecutor, OperationKind, RecordingExecutor,
    StorageOperation,
};
pub use crate::lvm::model::{LogicalVolumeRef, Topology};

// Cascade
pub use crate::cascade::{CascadeFailure, CascadeOutcome, DonorVerdict, ExtensionCascade};

// Daemon
pub use crate::daemon::load_generator::{LoadGenerator, LoadReport, LoadSettings};
#[cfg(feature = "daemon")]
pub use crate::daemon::runtime::CapacityDaemon;
pub use crate::daemon::signals::ShutdownSignal;
pub use crate::daemon::supervisor::{CapacitySupervisor, SupervisorStats, TickOutcome};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
