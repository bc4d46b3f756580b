//! Platform abstraction layer: filesystem statistics and mount table access.

pub mod pal;
