//! ocrbatch - batch PDF OCR with isolated worker processes.
//!
//! PDFs are queued, then processed one `ocrmypdf` run per task under a
//! configurable concurrency limit. Each task runs in its own spawned worker
//! process; a single controller loop owns all task state and consumes the
//! workers' NDJSON event streams.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod ipc;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod scheduler;
pub mod state;
pub mod worker;
