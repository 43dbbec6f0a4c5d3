//! Render job queue adapter.
//!
//! Speaks the queue's REST/RPC contract: atomic claim with a fleet-wide
//! concurrency cap (the claim transaction itself lives in the database
//! function behind the RPC), status/progress updates, terminal transitions,
//! and the cancellation flag.

pub mod client;
pub mod error;
pub mod types;

pub use client::{QueueConfig, RenderQueue};
pub use error::{QueueError, QueueResult};
pub use types::ClaimedRow;
