//! Daemon subsystem: capacity supervisor, synthetic load generator, shutdown
//! signalling, and thread orchestration.

pub mod load_generator;
#[cfg(feature = "daemon")]
pub mod runtime;
pub mod signals;
pub mod supervisor;
