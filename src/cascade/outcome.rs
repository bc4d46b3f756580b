//! Cascade results and donor eligibility verdicts.

#![allow(missing_docs)]

use std::fmt;

use serde::Serialize;

use crate::monitor::usage_probe::MountSnapshot;

/// Where a cascade run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CascadeFailure {
    /// Pool had room but the extend command failed.
    PoolExtend,
    /// The donor was shrunk; the follow-up extend failed. Capacity stays
    /// unallocated in the group.
    DonorExtendAfterShrink { donor: String },
    FallbackInit,
    FallbackAttach,
    FallbackExtend,
}

impl CascadeFailure {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::PoolExtend => "pool_extend",
            Self::DonorExtendAfterShrink { .. } => "donor_extend_after_shrink",
            Self::FallbackInit => "fallback_init",
            Self::FallbackAttach => "fallback_attach",
            Self::FallbackExtend => "fallback_extend",
        }
    }
}

impl fmt::Display for CascadeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DonorExtendAfterShrink { donor } => {
                write!(f, "{} (donor {donor} already shrunk)", self.label())
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// Result of one cascade invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CascadeOutcome {
    ExtendedFromPool,
    ExtendedFromDonor { donor: String },
    ExtendedFromFallback,
    Failed { reason: CascadeFailure },
    /// Shutdown was observed between steps; nothing further was issued.
    Cancelled,
}

impl CascadeOutcome {
    #[must_use]
    pub const fn is_extended(&self) -> bool {
        matches!(
            self,
            Self::ExtendedFromPool | Self::ExtendedFromDonor { .. } | Self::ExtendedFromFallback
        )
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ExtendedFromPool => "extended_from_pool",
            Self::ExtendedFromDonor { .. } => "extended_from_donor",
            Self::ExtendedFromFallback => "extended_from_fallback",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Extra context for logs: the donor name or the failure reason.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::ExtendedFromDonor { donor } => Some(format!("donor={donor}")),
            Self::Failed { reason } => Some(reason.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for CascadeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtendedFromPool => f.write_str("extended from volume group free space"),
            Self::ExtendedFromDonor { donor } => write!(f, "extended from donor {donor}"),
            Self::ExtendedFromFallback => f.write_str("extended after attaching fallback device"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled by shutdown"),
        }
    }
}

/// Why a donor can or cannot give up capacity right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum DonorVerdict {
    Eligible,
    UsageUndetermined,
    UsageTooHigh { usage_pct: u8, limit_pct: u8 },
    InsufficientFree { free_gib: u64, needed_gib: u64 },
}

impl DonorVerdict {
    /// Judge a donor from a fresh snapshot.
    #[must_use]
    pub fn judge(snapshot: Option<MountSnapshot>, limit_pct: u8, needed_gib: u64) -> Self {
        let Some(snapshot) = snapshot else {
            return Self::UsageUndetermined;
        };
        if snapshot.usage_pct >= limit_pct {
            Self::UsageTooHigh {
                usage_pct: snapshot.usage_pct,
                limit_pct,
            }
        } else if snapshot.free_gib < needed_gib {
            Self::InsufficientFree {
                free_gib: snapshot.free_gib,
                needed_gib,
            }
        } else {
            Self::Eligible
        }
    }

    #[must_use]
    pub const fn is_eligible(self) -> bool {
        matches!(self, Self::Eligible)
    }
}

impl fmt::Display for DonorVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eligible => f.write_str("eligible"),
            Self::UsageUndetermined => f.write_str("usage could not be determined"),
            Self::UsageTooHigh {
                usage_pct,
                limit_pct,
            } => write!(f, "usage {usage_pct}% >= {limit_pct}%"),
            Self::InsufficientFree {
                free_gib,
                needed_gib,
            } => write!(f, "free {free_gib} GiB < {needed_gib} GiB"),
        }
    }
}
