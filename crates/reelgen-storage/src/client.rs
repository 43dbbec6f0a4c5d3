//! Object-store client.

use std::path::Path;
use std::time::Duration;

use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Per-file upload deadline.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration for the storage client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Object-store endpoint, e.g. `https://storage.example.net`
    pub endpoint: String,
    /// Storage zone name
    pub zone: String,
    /// Access key sent with every PUT
    pub access_key: String,
    /// Public CDN base for returned URLs, e.g. `https://cdn.example.net`
    pub cdn_base_url: String,
    /// Pull-zone purge endpoint (optional)
    pub purge_url: Option<String>,
    /// Pull-zone API key (optional; purge is a no-op without it)
    pub purge_api_key: Option<String>,
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint: std::env::var("STORAGE_ENDPOINT")
                .map_err(|_| StorageError::config_error("STORAGE_ENDPOINT not set"))?,
            zone: std::env::var("STORAGE_ZONE")
                .map_err(|_| StorageError::config_error("STORAGE_ZONE not set"))?,
            access_key: std::env::var("STORAGE_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("STORAGE_ACCESS_KEY not set"))?,
            cdn_base_url: std::env::var("CDN_BASE_URL")
                .map_err(|_| StorageError::config_error("CDN_BASE_URL not set"))?,
            purge_url: std::env::var("CDN_PURGE_URL").ok(),
            purge_api_key: std::env::var("CDN_PURGE_API_KEY").ok(),
        })
    }
}

/// CDN URLs of the uploaded artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifacts {
    pub final_url: String,
    pub thumb_url: String,
}

/// Streaming uploader for final artifacts.
#[derive(Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    config: StorageConfig,
}

impl StorageClient {
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| StorageError::config_error(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(StorageConfig::from_env()?)
    }

    fn object_key(kind: &str, public_id: &str, ext: &str) -> String {
        format!("renders/{}/{}.{}", kind, public_id, ext)
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.zone,
            key
        )
    }

    fn cdn_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.cdn_base_url.trim_end_matches('/'), key)
    }

    /// Upload the final video and thumbnail under `public_id`.
    ///
    /// Keys are stable per public id, so a re-upload after a crashed
    /// completion overwrites rather than duplicates.
    pub async fn upload(
        &self,
        final_path: &Path,
        thumb_path: &Path,
        public_id: &str,
    ) -> StorageResult<UploadedArtifacts> {
        let video_key = Self::object_key("videos", public_id, "mp4");
        let thumb_key = Self::object_key("thumbs", public_id, "jpg");

        self.put_file(final_path, &video_key, "video/mp4").await?;
        self.put_file(thumb_path, &thumb_key, "image/jpeg").await?;

        Ok(UploadedArtifacts {
            final_url: self.cdn_url(&video_key),
            thumb_url: self.cdn_url(&thumb_key),
        })
    }

    /// Stream one file to the object store.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        debug!(key, bytes = len, "Uploading artifact");

        let response = self
            .http
            .put(self.object_url(key))
            .header("AccessKey", &self.config.access_key)
            .header("Content-Type", content_type)
            .header("Content-Length", len)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StorageError::Timeout(UPLOAD_TIMEOUT.as_secs())
                } else {
                    StorageError::upload_failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(StorageError::upload_failed(format!(
                "{} returned {}",
                key,
                response.status()
            )));
        }

        info!(key, bytes = len, "Uploaded artifact");
        Ok(())
    }

    /// Invalidate CDN paths. A no-op unless pull-zone credentials are
    /// configured.
    pub async fn purge(&self, urls: &[String]) -> StorageResult<()> {
        let (Some(purge_url), Some(api_key)) =
            (&self.config.purge_url, &self.config.purge_api_key)
        else {
            debug!("CDN purge skipped: no pull-zone credentials");
            return Ok(());
        };

        for url in urls {
            let response = self
                .http
                .post(purge_url)
                .header("AccessKey", api_key)
                .query(&[("url", url.as_str())])
                .send()
                .await
                .map_err(|e| StorageError::PurgeFailed(e.to_string()))?;

            if !response.status().is_success() {
                warn!(url, status = %response.status(), "CDN purge rejected");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> StorageConfig {
        StorageConfig {
            endpoint: server.uri(),
            zone: "reelgen-zone".into(),
            access_key: "store-key".into(),
            cdn_base_url: "https://cdn.example.net".into(),
            purge_url: None,
            purge_api_key: None,
        }
    }

    #[tokio::test]
    async fn test_upload_puts_both_artifacts() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/reelgen-zone/renders/videos/r1.mp4"))
            .and(header("AccessKey", "store-key"))
            .and(header("Content-Type", "video/mp4"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/reelgen-zone/renders/thumbs/r1.jpg"))
            .and(header("Content-Type", "image/jpeg"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("final.mp4");
        let thumb_path = dir.path().join("thumb.jpg");
        std::fs::write(&final_path, b"video-bytes").unwrap();
        std::fs::write(&thumb_path, b"jpeg-bytes").unwrap();

        let client = StorageClient::new(config(&server)).unwrap();
        let artifacts = client.upload(&final_path, &thumb_path, "r1").await.unwrap();

        assert_eq!(
            artifacts.final_url,
            "https://cdn.example.net/renders/videos/r1.mp4"
        );
        assert_eq!(
            artifacts.thumb_url,
            "https://cdn.example.net/renders/thumbs/r1.jpg"
        );
    }

    #[tokio::test]
    async fn test_upload_failure_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("final.mp4");
        let thumb_path = dir.path().join("thumb.jpg");
        std::fs::write(&final_path, b"x").unwrap();
        std::fs::write(&thumb_path, b"y").unwrap();

        let client = StorageClient::new(config(&server)).unwrap();
        let err = client
            .upload(&final_path, &thumb_path, "r1")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_purge_noop_without_credentials() {
        let server = MockServer::start().await;
        let client = StorageClient::new(config(&server)).unwrap();
        client
            .purge(&["https://cdn.example.net/renders/videos/r1.mp4".into()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_purge_posts_each_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/purge"))
            .and(header("AccessKey", "pull-key"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let mut cfg = config(&server);
        cfg.purge_url = Some(format!("{}/purge", server.uri()));
        cfg.purge_api_key = Some("pull-key".into());

        let client = StorageClient::new(cfg).unwrap();
        client
            .purge(&["https://cdn/a.mp4".into(), "https://cdn/a.jpg".into()])
            .await
            .unwrap();
    }
}
