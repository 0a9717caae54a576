use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bridge::MediaClient;
use reqwest::{Client, StatusCode};
use shared::{domain::MxcUri, events::EncryptedFile};
use tracing::debug;

pub mod attachment;

pub use attachment::{decrypt_attachment, AttachmentError};

const AUTHENTICATED_MEDIA_PATH: &str = "/_matrix/client/v1/media/download";
const LEGACY_MEDIA_PATH: &str = "/_matrix/media/v3/download";

#[derive(Debug, Clone)]
pub struct MatrixClientConfig {
    pub homeserver_url: String,
    pub access_token: String,
    pub timeout: Duration,
}

/// Homeserver client used by the application service to pull media.
#[derive(Clone)]
pub struct MatrixMediaClient {
    http: Client,
    config: MatrixClientConfig,
}

impl MatrixMediaClient {
    pub fn new(config: MatrixClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build homeserver http client")?;
        Ok(Self { http, config })
    }

    fn media_url(&self, prefix: &str, uri: &MxcUri) -> String {
        format!(
            "{}{prefix}/{}/{}",
            self.config.homeserver_url.trim_end_matches('/'),
            uri.server_name,
            uri.media_id
        )
    }

    /// Downloads the raw bytes behind `uri`, preferring the authenticated media
    /// endpoint and falling back to the legacy one on homeservers that lack it.
    pub async fn download(&self, uri: &MxcUri) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.media_url(AUTHENTICATED_MEDIA_PATH, uri))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .with_context(|| format!("media request failed for {uri}"))?;

        let response = if response.status() == StatusCode::NOT_FOUND {
            debug!(%uri, "authenticated media not found, trying legacy endpoint");
            self.http
                .get(self.media_url(LEGACY_MEDIA_PATH, uri))
                .bearer_auth(&self.config.access_token)
                .send()
                .await
                .with_context(|| format!("legacy media request failed for {uri}"))?
        } else {
            response
        };

        let bytes = response
            .error_for_status()
            .with_context(|| format!("media download failed for {uri}"))?
            .bytes()
            .await?;
        debug!(%uri, size = bytes.len(), "downloaded media");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl MediaClient for MatrixMediaClient {
    async fn fetch_media(&self, uri: &MxcUri) -> Result<Vec<u8>> {
        self.download(uri).await
    }

    fn decrypt(&self, ciphertext: &[u8], file: &EncryptedFile) -> Result<Vec<u8>> {
        Ok(decrypt_attachment(ciphertext, file)?)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
