//! LVM topology and the executors that mutate it.

pub mod executor;
pub mod model;
