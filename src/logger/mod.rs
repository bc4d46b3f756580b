//! Activity logging: JSONL append-only log plus human-readable stderr echo.

pub mod activity;
pub mod jsonl;
