//! Atomic file placement.
//!
//! Pipeline outputs and cache entries must never appear half-written under
//! their final name, so everything lands via a rename. A rename across
//! filesystems fails with EXDEV; that path goes through the same staged
//! copy the cache writer uses.

use std::path::Path;
use tokio::fs;

use crate::error::MediaResult;

/// errno for a rename that crosses filesystems.
const EXDEV: i32 = 18;

/// Place a copy of `src` at `dst` atomically.
///
/// The copy is staged beside `dst` (guaranteeing the same filesystem) and
/// renamed into place, so a concurrent reader sees either nothing or the
/// complete file. `src` is left untouched.
pub async fn copy_atomic(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    ensure_parent(dst).await?;

    let staged = dst.with_extension("stage");
    fs::copy(src, &staged).await?;
    if let Err(e) = fs::rename(&staged, dst).await {
        let _ = fs::remove_file(&staged).await;
        return Err(e.into());
    }
    Ok(())
}

/// Move `src` to `dst`, surviving a filesystem boundary.
///
/// A plain rename is tried first. When it fails with EXDEV the file is
/// staged onto the destination filesystem via [`copy_atomic`] and the
/// source is then dropped; any other rename error propagates as-is.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    ensure_parent(dst).await?;

    let rename_err = match fs::rename(src, dst).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if rename_err.raw_os_error() != Some(EXDEV) {
        return Err(rename_err.into());
    }

    tracing::debug!(
        src = %src.display(),
        dst = %dst.display(),
        "Rename crossed filesystems, staging a copy"
    );
    copy_atomic(src, dst).await?;

    // The destination is in place; a lingering source only wastes disk.
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            src = %src.display(),
            error = %e,
            "Source left behind after cross-filesystem move"
        );
    }
    Ok(())
}

async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_replaces_existing_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("fresh.mp4");
        let dst = dir.path().join("final.mp4");
        fs::write(&src, b"new render").await.unwrap();
        fs::write(&dst, b"stale render").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"new render");
    }

    #[tokio::test]
    async fn test_move_creates_missing_parents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("seg.mp4");
        let dst = dir.path().join("a").join("b").join("seg.mp4");
        fs::write(&src, b"segment").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(dst.exists());
        assert!(!src.exists());
    }

    #[tokio::test]
    async fn test_move_missing_source_propagates() {
        let dir = TempDir::new().unwrap();
        let err = move_file(dir.path().join("absent.mp4"), dir.path().join("out.mp4")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_copy_atomic_keeps_source_and_cleans_staging() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("raw.mp4");
        let dst = dir.path().join("cache").join("entry.mp4");
        fs::write(&src, b"payload").await.unwrap();

        copy_atomic(&src, &dst).await.unwrap();

        assert!(src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"payload");
        assert!(!dst.with_extension("stage").exists());
    }
}
