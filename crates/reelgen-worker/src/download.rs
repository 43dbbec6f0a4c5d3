//! Input-asset downloads (facecam, lead CSV) into the working directory.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};

/// Per-file download deadline.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Build the HTTP client used for asset downloads.
pub fn download_client() -> WorkerResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| WorkerError::config(format!("download client build failed: {e}")))
}

/// Stream `url` into `dest`. An existing non-empty file is reused — claims
/// retried after a crash land in the same working directory.
pub async fn fetch_asset(client: &reqwest::Client, url: &str, dest: &Path) -> WorkerResult<()> {
    if dest.exists() {
        if let Ok(metadata) = dest.metadata() {
            if metadata.len() > 0 {
                debug!(dest = %dest.display(), "Using existing downloaded asset");
                return Ok(());
            }
        }
    }

    debug!(url, dest = %dest.display(), "Downloading asset");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| WorkerError::transient(format!("download of {url} failed: {e}")))?;

    if !response.status().is_success() {
        return Err(WorkerError::transient(format!(
            "download of {url} returned {}",
            response.status()
        )));
    }

    let tmp = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&tmp).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| WorkerError::transient(format!("download of {url} broke: {e}")))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if written == 0 {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(WorkerError::transient(format!(
            "download of {url} produced an empty file"
        )));
    }

    tokio::fs::rename(&tmp, dest).await?;
    info!(url, bytes = written, "Downloaded asset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_asset_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/facecam.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"cam-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("facecam.mp4");
        let client = download_client().unwrap();

        fetch_asset(&client, &format!("{}/facecam.mp4", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"cam-bytes");
        assert!(!dest.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_fetch_asset_reuses_existing() {
        let server = MockServer::start().await;
        // No mock mounted: any request would 404 and fail the test.
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("leads.csv");
        std::fs::write(&dest, b"already-here").unwrap();

        let client = download_client().unwrap();
        fetch_asset(&client, &format!("{}/leads.csv", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"already-here");
    }

    #[tokio::test]
    async fn test_fetch_asset_http_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = download_client().unwrap();
        let err = fetch_asset(
            &client,
            &format!("{}/x.mp4", server.uri()),
            &dir.path().join("x.mp4"),
        )
        .await
        .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_asset_empty_body_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::new()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.mp4");
        let client = download_client().unwrap();
        let err = fetch_asset(&client, &format!("{}/x.mp4", server.uri()), &dest)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!dest.exists());
    }
}
