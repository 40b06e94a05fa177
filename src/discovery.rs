//
// IdP metadata discovery with caching and single-flight fetches
//
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::{
    cache::Cache,
    config::ClientConfig,
    error::{Error, ErrorKind, Result},
    http_client::{HttpTransport, Method},
    lock::Mutex,
};

const METADATA_CACHE_KEY: &str = "client-metadata";
const METADATA_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Provider metadata as published on the discovery document. Immutable once
/// validated; consumers share it behind an `Arc`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMetadata {
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub jwks_uri: String,
    pub userinfo_endpoint: Option<String>,
    pub introspection_endpoint: Option<String>,
    pub revocation_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
    pub device_authorization_endpoint: Option<String>,
}

impl ClientMetadata {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("issuer", &self.issuer),
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("jwks_uri", &self.jwks_uri),
        ] {
            if value.trim().is_empty() {
                err!(InvalidConfig, format!("Discovery document is missing required field {field}"));
            }
        }
        Ok(())
    }
}

pub struct Discovery {
    config: Arc<ClientConfig>,
    transport: Arc<dyn HttpTransport>,
    cache: Cache<&'static str, Arc<ClientMetadata>>,
    fetch_lock: Mutex,
}

impl Discovery {
    pub fn new(config: Arc<ClientConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            cache: Cache::new(),
            fetch_lock: Mutex::new(),
        }
    }

    /// Resolve provider metadata. Cached for an hour; concurrent cold calls
    /// collapse into a single outbound fetch.
    pub async fn discover(&self, force_refresh: bool) -> Result<Arc<ClientMetadata>> {
        if !force_refresh {
            if let Some(metadata) = self.cache.get(&METADATA_CACHE_KEY) {
                return Ok(metadata);
            }
        }

        let guard = self.fetch_lock.acquire().await?;
        // Whoever held the lock before us may have populated the cache
        if !force_refresh {
            if let Some(metadata) = self.cache.get(&METADATA_CACHE_KEY) {
                guard.release();
                return Ok(metadata);
            }
        }

        let result = self.fetch().await;
        guard.release();
        result
    }

    async fn fetch(&self) -> Result<Arc<ClientMetadata>> {
        if self.config.discovery_url.trim().is_empty() {
            err!(InvalidDiscoveryUrl, "Discovery URL is empty");
        }

        debug!("Fetching discovery document from {}", self.config.discovery_url);
        let response = self
            .transport
            .request(Method::Get, &self.config.discovery_url, &[], None)
            .await
            .map_err(|e| Error::with_source(ErrorKind::DiscoveryError, "Failed to fetch discovery document", e))?;

        if !response.is_success() {
            return Err(Error::new(
                ErrorKind::DiscoveryError,
                format!("Discovery endpoint returned HTTP {}", response.status),
            )
            .set_status(response.status));
        }

        let metadata: ClientMetadata = serde_json::from_str(&response.body)
            .map_err(|e| Error::with_source(ErrorKind::DiscoveryError, "Failed to parse discovery document", e))?;

        // Not wrapped: the validation error kind is the caller-visible one
        metadata.validate()?;

        let metadata = Arc::new(metadata);
        self.cache.set_with_ttl(METADATA_CACHE_KEY, Arc::clone(&metadata), Some(METADATA_CACHE_TTL));
        Ok(metadata)
    }
}
