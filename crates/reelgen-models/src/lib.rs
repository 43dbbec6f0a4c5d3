//! Shared data models for the ReelGen render worker.
//!
//! This crate provides Serde-serializable types for:
//! - Render jobs claimed from the queue
//! - Scenes and their entry metadata
//! - Output settings and facecam layout
//! - Render status lifecycle

pub mod job;
pub mod output;
pub mod scene;
pub mod status;

pub use job::{CampaignId, JobId, RenderId, RenderJob};
pub use output::{Corner, EndPadMode, FacecamLayout, OutputSettings};
pub use scene::{Scene, SceneEntry};
pub use status::RenderStatus;
