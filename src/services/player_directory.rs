use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::error::{RecognitionError, UpstreamError};
use crate::models::config::DirectoryConfig;
use crate::services::request_cache::RequestCache;

/// Source of player display names, keyed by owner uid
pub trait PlayerDirectory: Send + Sync {
    fn display_name(&self, owner_uid: &str) -> impl Future<Output = Result<String, UpstreamError>> + Send;
}

/// Player directory served over HTTP: `GET {base}/players/{uid}` -> `{name}`
pub struct HttpPlayerDirectory {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct PlayerResponse {
    name: String,
}

impl HttpPlayerDirectory {
    pub fn new(base_url: &str, config: &DirectoryConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn player_url(&self, owner_uid: &str) -> String {
        format!("{}/players/{}", self.base_url, owner_uid)
    }
}

impl PlayerDirectory for HttpPlayerDirectory {
    async fn display_name(&self, owner_uid: &str) -> Result<String, UpstreamError> {
        let response = self.client.get(self.player_url(owner_uid)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), body));
        }

        let player: PlayerResponse = response.json().await?;
        Ok(player.name)
    }
}

/// In-memory directory
#[derive(Debug, Clone, Default)]
pub struct StaticPlayerDirectory {
    names: HashMap<String, String>,
}

impl StaticPlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_player(mut self, owner_uid: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(owner_uid.into(), name.into());
        self
    }
}

impl PlayerDirectory for StaticPlayerDirectory {
    async fn display_name(&self, owner_uid: &str) -> Result<String, UpstreamError> {
        self.names
            .get(owner_uid)
            .cloned()
            .ok_or_else(|| UpstreamError::Other(format!("unknown player {}", owner_uid)))
    }
}

/// Look up the owner's display name through the request cache.
///
/// Failures other than cancellation fall back to the uid itself.
pub async fn resolve_display_name<D: PlayerDirectory>(
    directory: &D,
    cache: &RequestCache<String, String>,
    owner_uid: &str,
    ttl: Duration,
    cancel: &CancelToken,
) -> Result<String, RecognitionError> {
    let lookup = cache.request(owner_uid.to_string(), ttl, || directory.display_name(owner_uid));

    match cancel.run(lookup).await? {
        Ok(name) => Ok(name),
        Err(UpstreamError::Aborted) => Err(RecognitionError::Aborted),
        Err(e) => {
            warn!(owner_uid, error = %e, "Player lookup failed, using uid as name");
            Ok(owner_uid.to_string())
        }
    }
}
