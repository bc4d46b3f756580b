#![forbid(unsafe_code)]

//! autoextend helper (aeh): keeps an LVM logical volume from filling up.
//!
//! When the monitored filesystem crosses its usage threshold, the extension
//! cascade grows the volume from the first source that can supply capacity:
//! 1. **Pool**: unallocated space in the volume group
//! 2. **Donor**: a lightly used sibling volume, shrunk to free space
//! 3. **Fallback**: a reserve raw device, attached to the group
//!
//! # Library usage
//!
//! ```rust,no_run
//! use autoextend_helper::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use autoextend_helper::core::config::Config;
//! use autoextend_helper::lvm::executor::{DryRunExecutor, LvmExecutor};
//! ```

pub mod prelude;

pub mod cascade;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod lvm;
pub mod monitor;
pub mod platform;
