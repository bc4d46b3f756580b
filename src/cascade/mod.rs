//! Extension cascade: pool, then donor volumes, then the fallback device.

pub mod engine;
pub mod outcome;

pub use engine::ExtensionCascade;
pub use outcome::{CascadeFailure, CascadeOutcome, DonorVerdict};
