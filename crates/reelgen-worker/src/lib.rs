//! Render worker.
//!
//! A long-running process that claims video-render jobs from the shared
//! queue, runs the scene pipeline (capture, normalize, concat, overlay,
//! thumbnail), uploads the artifacts, and reports progress. One job at a
//! time per process; the fleet-wide concurrency cap is enforced by the
//! queue's claim RPC.

pub mod capture_cache;
pub mod config;
pub mod context;
pub mod disk;
pub mod download;
pub mod error;
pub mod health;
pub mod leads;
pub mod pipeline;
pub mod retry;
pub mod state;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use worker::Worker;
