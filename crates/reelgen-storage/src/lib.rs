//! Object-store upload and CDN purge for final render artifacts.

pub mod client;
pub mod error;

pub use client::{StorageClient, StorageConfig, UploadedArtifacts};
pub use error::{StorageError, StorageResult};
