use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::errors::AppError;

pub const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_RETRY_ATTEMPTS: u32 = 3;
const STATUS_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// Encoder codes reported by the stream CDN.
const CODE_FINISHED: i64 = 4;
const CODE_FAILED: i64 = 5;
const CODE_UPLOAD_FAILED: i64 = 6;

/// Stored lifecycle state of a video record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uploading,
    Processing,
    Ready,
    Error,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Uploading => "uploading",
            Lifecycle::Processing => "processing",
            Lifecycle::Ready => "ready",
            Lifecycle::Error => "error",
        }
    }
}

/// Maps a CDN encoder code onto the local lifecycle. Code 4 is the CDN's
/// "finished" state; 5 and 6 are its failure states; everything else is some
/// intermediate encoding stage.
pub fn lifecycle_for_code(code: i64) -> Lifecycle {
    match code {
        CODE_FINISHED => Lifecycle::Ready,
        CODE_FAILED | CODE_UPLOAD_FAILED => Lifecycle::Error,
        _ => Lifecycle::Processing,
    }
}

#[derive(Debug, Deserialize)]
pub struct EncodingStatus {
    pub status: i64,
    #[serde(default)]
    pub duration: f64,
}

#[derive(Clone, Debug)]
pub struct StreamClient {
    http_client: Client,
    base_url: Url,
    library_id: String,
    access_key: Secret<String>,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Result<Self, anyhow::Error> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow::Error::new(e).context("Could not build CDN HTTP client"))?;

        Ok(Self {
            http_client,
            base_url: config.base_url,
            library_id: config.library_id,
            access_key: config.access_key,
        })
    }

    fn video_url(&self, video_id: Uuid) -> String {
        format!(
            "{}/library/{}/videos/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.library_id,
            video_id
        )
    }

    /// Target the client uploads raw video bytes to, as a pure string
    /// composition. The bytes never pass through this service.
    pub fn upload_target(&self, video_id: Uuid) -> String {
        self.video_url(video_id)
    }

    /// Headers the client must send with the direct upload.
    pub fn upload_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                "AccessKey".to_string(),
                self.access_key.expose_secret().clone(),
            ),
            ("Content-Type".to_string(), UPLOAD_CONTENT_TYPE.to_string()),
        ])
    }

    /// Target the owner uploads a thumbnail image to.
    pub fn thumbnail_target(&self, video_id: Uuid) -> String {
        format!("{}/thumbnail", self.video_url(video_id))
    }

    /// Public URL the CDN serves the thumbnail from once uploaded.
    pub fn thumbnail_url(&self, video_id: Uuid) -> String {
        format!("{}/thumbnail.jpg", self.video_url(video_id))
    }

    /// Fetches the CDN encoding status, retrying transient failures with a
    /// bounded exponential backoff. Callers poll this on their own timer, so
    /// a terminal failure here is reported, not retried forever.
    #[tracing::instrument(name = "Fetch CDN encoding status", skip(self))]
    pub async fn fetch_status(&self, video_id: Uuid) -> Result<EncodingStatus, AppError> {
        let mut attempt = 0;
        loop {
            match self.try_fetch_status(video_id).await {
                Ok(status) => return Ok(status),
                Err(e) => {
                    attempt += 1;
                    if attempt >= STATUS_RETRY_ATTEMPTS {
                        return Err(e);
                    }
                    let delay = backoff_delay(attempt - 1);
                    tracing::warn!(
                        %video_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "CDN status fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_fetch_status(&self, video_id: Uuid) -> Result<EncodingStatus, AppError> {
        let status = self
            .http_client
            .get(self.video_url(video_id))
            .header("AccessKey", self.access_key.expose_secret())
            .send()
            .await?
            .error_for_status()?
            .json::<EncodingStatus>()
            .await?;

        Ok(status)
    }

    /// Purges the CDN asset for a video. A 404 means the asset is already
    /// gone and counts as success.
    #[tracing::instrument(name = "Delete CDN asset", skip(self))]
    pub async fn delete_video(&self, video_id: Uuid) -> Result<(), AppError> {
        let response = self
            .http_client
            .delete(self.video_url(video_id))
            .header("AccessKey", self.access_key.expose_secret())
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::warn!(%video_id, "CDN asset already absent during delete");
            return Ok(());
        }

        response.error_for_status()?;
        Ok(())
    }
}

fn backoff_delay(retry: u32) -> Duration {
    STATUS_RETRY_BASE_DELAY * 2u32.pow(retry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> StreamClient {
        StreamClient::new(StreamConfig {
            base_url: Url::parse("https://video.example.com").unwrap(),
            library_id: "lib-123".to_string(),
            access_key: Secret::new("key-abc".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn upload_target_composes_base_library_and_video_id() {
        let client = test_client();
        let id = Uuid::parse_str("6e5dbcd8-6f50-4b4a-bd18-0d36767a1a9b").unwrap();
        assert_eq!(
            client.upload_target(id),
            "https://video.example.com/library/lib-123/videos/6e5dbcd8-6f50-4b4a-bd18-0d36767a1a9b"
        );
    }

    #[test]
    fn upload_headers_carry_access_key_and_octet_stream() {
        let client = test_client();
        let headers = client.upload_headers();
        assert_eq!(headers.get("AccessKey").map(String::as_str), Some("key-abc"));
        assert_eq!(
            headers.get("Content-Type").map(String::as_str),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn finished_code_maps_to_ready() {
        assert_eq!(lifecycle_for_code(4), Lifecycle::Ready);
    }

    #[test]
    fn failure_codes_map_to_error() {
        assert_eq!(lifecycle_for_code(5), Lifecycle::Error);
        assert_eq!(lifecycle_for_code(6), Lifecycle::Error);
    }

    #[test]
    fn intermediate_codes_map_to_processing() {
        for code in [0, 1, 2, 3, 7, 42] {
            assert_eq!(lifecycle_for_code(code), Lifecycle::Processing);
        }
    }

    #[test]
    fn mapping_is_stable_under_repetition() {
        // Reconciliation repeats the same mapping every poll once the CDN
        // reports finished.
        for _ in 0..3 {
            assert_eq!(lifecycle_for_code(4), Lifecycle::Ready);
        }
    }

    #[test]
    fn backoff_doubles_from_base_delay() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
    }
}
