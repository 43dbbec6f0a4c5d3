//! Content-addressed cache of raw scene captures.
//!
//! Entries are shared by every worker on the host filesystem. Writers land
//! files with atomic renames so readers racing a writer fall through to a
//! miss via the integrity probe instead of seeing a partial file. The disk
//! reaper is the only TTL-based deleter; `get` deletes only corrupt entries.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use reelgen_media::fs_utils::copy_atomic;
use reelgen_media::probe_video;

use crate::error::WorkerResult;

/// Domain separator for the fingerprint hash.
const FINGERPRINT_DOMAIN: &str = "reelgen-capture-v1";

/// Minimum playable duration for a cached capture, in seconds.
const MIN_VALID_DURATION_SECS: f64 = 2.0;

/// A 128-bit capture fingerprint, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the capture fingerprint over (namespace?, URL, entry-type,
/// salt?). Field order and separators are fixed; absent optionals hash as
/// empty fields so adding a namespace later cannot collide with today's
/// keys.
pub fn fingerprint(
    namespace: Option<&str>,
    url: &str,
    entry_type: &str,
    salt: Option<&str>,
) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN.as_bytes());
    for field in [namespace.unwrap_or(""), url, entry_type, salt.unwrap_or("")] {
        hasher.update([0x1f]);
        hasher.update(field.as_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    Fingerprint(hex)
}

/// Sidecar metadata stored next to each capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    /// Content-start trim hint in milliseconds
    pub trim_hint_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A validated cache hit.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub path: PathBuf,
    pub trim_hint_ms: u64,
}

/// Capture cache rooted on the shared host filesystem.
#[derive(Clone)]
pub struct CaptureCache {
    root: PathBuf,
}

impl CaptureCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn capture_path(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(format!("{fp}.mp4"))
    }

    fn sidecar_path(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(format!("{fp}.json"))
    }

    /// Look up a capture, validating integrity: the file must probe with at
    /// least one stream and a duration of at least min(2s, 20% of the scene
    /// duration). Corrupt or truncated entries are deleted and reported as a
    /// miss.
    pub async fn get(&self, fp: &Fingerprint, scene_duration_secs: u32) -> Option<CacheHit> {
        let capture = self.capture_path(fp);
        let sidecar_path = self.sidecar_path(fp);

        if !capture.exists() {
            return None;
        }

        let min_duration = MIN_VALID_DURATION_SECS.min(scene_duration_secs as f64 * 0.2);

        let info = match probe_video(&capture).await {
            Ok(info) => info,
            Err(e) => {
                warn!(%fp, error = %e, "Cached capture unreadable, evicting");
                self.evict(fp).await;
                return None;
            }
        };

        if info.duration < min_duration || info.stream_count == 0 {
            warn!(
                %fp,
                duration = info.duration,
                streams = info.stream_count,
                "Cached capture failed validation, evicting"
            );
            self.evict(fp).await;
            return None;
        }

        let sidecar: Sidecar = match tokio::fs::read(&sidecar_path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(sidecar) => sidecar,
                Err(e) => {
                    warn!(%fp, error = %e, "Cache sidecar unreadable, evicting");
                    self.evict(fp).await;
                    return None;
                }
            },
            Err(_) => {
                // A capture without its sidecar is half a write.
                self.evict(fp).await;
                return None;
            }
        };

        debug!(%fp, trim_hint_ms = sidecar.trim_hint_ms, "Capture cache hit");
        Some(CacheHit {
            path: capture,
            trim_hint_ms: sidecar.trim_hint_ms,
        })
    }

    /// Store a capture and its trim hint. The capture lands first, then the
    /// sidecar, both via atomic rename; `get` treats a missing sidecar as a
    /// miss, so the ordering is safe against readers.
    pub async fn put(
        &self,
        fp: &Fingerprint,
        capture: &Path,
        trim_hint_ms: u64,
    ) -> WorkerResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        copy_atomic(capture, self.capture_path(fp)).await?;

        let sidecar = Sidecar {
            trim_hint_ms,
            created_at: Utc::now(),
        };
        let sidecar_path = self.sidecar_path(fp);
        let tmp = sidecar_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&sidecar).expect("sidecar serializes")).await?;
        tokio::fs::rename(&tmp, &sidecar_path).await?;

        info!(%fp, trim_hint_ms, "Cached scene capture");
        Ok(())
    }

    async fn evict(&self, fp: &Fingerprint) {
        for path in [self.capture_path(fp), self.sidecar_path(fp)] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(%fp, error = %e, "Failed to evict cache entry");
                }
            }
        }
    }
}
