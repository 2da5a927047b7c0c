//! Runtime glue: configuration, the store seam, health, per-run failure
//! capture, progress tracking, telemetry and the Ctrl-C runner.

pub mod config;
pub mod failure;
pub mod health;
pub mod progress;
pub mod runner;
pub mod storage;
pub mod telemetry;
