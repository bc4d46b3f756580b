//! Filesystem monitoring: live usage probing for the watched and donor mounts.

pub mod usage_probe;
