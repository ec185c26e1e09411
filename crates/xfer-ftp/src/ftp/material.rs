//! Cache-first provisioning of TLS trust / key material.
//!
//! Keystores are looked up in the shared [`KeyStoreCache`] by location and
//! only loaded (from disk, or from the remote configuration service) on a
//! miss. Managers are derived from the cached store on every call.

use crate::ftp::cache::{CacheTtl, ExpiringCache};
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::keystore::{KeyManager, KeyStore, KeyStoreFormat, TrustManager};
use crate::ftp::tls::TrustMaterial;
use crate::ftp::types::{has_text, ConnectionConfig};
use async_trait::async_trait;
use reqwest::header;
use std::sync::Arc;

/// Loaded keystores keyed by location.
pub type KeyStoreCache = ExpiringCache<KeyStore>;

/// Credentials for the remote configuration service.
#[derive(Debug, Clone, Default)]
pub struct RemoteCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Where a keystore lives and how to open it.
#[derive(Debug, Clone)]
pub struct KeyStoreSource {
    pub location: String,
    pub password: Option<String>,
    pub format: KeyStoreFormat,
    /// `Some` when the location is a URL on the remote service.
    pub remote: Option<RemoteCredentials>,
}

impl KeyStoreSource {
    /// The server trust store described by `config`.
    pub fn trust_store(config: &ConnectionConfig) -> Option<Self> {
        let location = config.key_store_location.as_deref()?.trim();
        if location.is_empty() {
            return None;
        }
        let remote = config.key_store_remote.then(|| remote_credentials(config));
        Some(Self {
            location: location.to_string(),
            password: config.key_store_password.clone(),
            format: if remote.is_some() {
                config.remote_key_store_format
            } else {
                config.key_store_format
            },
            remote,
        })
    }

    /// The client key store, only when a location and a key password are
    /// both configured.
    pub fn client_key_store(config: &ConnectionConfig) -> Option<Self> {
        if !config.has_client_key_config() {
            return None;
        }
        let location = config.key_manager_location.as_deref()?.trim();
        Some(Self {
            location: location.to_string(),
            password: config.key_manager_password.clone(),
            // Always read as `key_manager_format`, remote or not.
            format: config.key_manager_format,
            remote: config.key_manager_remote.then(|| remote_credentials(config)),
        })
    }
}

fn remote_credentials(config: &ConnectionConfig) -> RemoteCredentials {
    RemoteCredentials {
        username: config.remote_username.clone(),
        password: config.remote_password.clone(),
    }
}

// ─── Loader ──────────────────────────────────────────────────────────

#[async_trait]
pub trait KeyStoreLoader: Send + Sync {
    async fn load(&self, source: &KeyStoreSource) -> FtpResult<KeyStore>;
}

/// Reads local keystores with `tokio::fs` and remote ones over HTTP.
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyStoreLoader {
    http: reqwest::Client,
}

impl DefaultKeyStoreLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn load_local(&self, source: &KeyStoreSource) -> FtpResult<KeyStore> {
        let bytes = tokio::fs::read(&source.location).await.map_err(|e| {
            FtpError::tls_material(format!("Cannot read keystore '{}': {}", source.location, e))
        })?;
        KeyStore::load(&bytes, source.format, source.password.as_deref())
    }

    pub async fn load_remote(
        &self,
        source: &KeyStoreSource,
        credentials: &RemoteCredentials,
    ) -> FtpResult<KeyStore> {
        let url = url::Url::parse(&source.location).map_err(|e| {
            FtpError::tls_material(format!(
                "Remote keystore location '{}' is not a URL: {}",
                source.location, e
            ))
        })?;

        let mut req = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/octet-stream");
        if let Some(ref username) = credentials.username {
            req = req.basic_auth(username, credentials.password.as_ref());
        }

        let bytes = req.send().await?.error_for_status()?.bytes().await?;
        KeyStore::load(&bytes, source.format, source.password.as_deref())
    }
}

#[async_trait]
impl KeyStoreLoader for DefaultKeyStoreLoader {
    async fn load(&self, source: &KeyStoreSource) -> FtpResult<KeyStore> {
        match source.remote {
            Some(ref credentials) => self.load_remote(source, credentials).await,
            None => self.load_local(source).await,
        }
    }
}

// ─── Provider ────────────────────────────────────────────────────────

/// Supplies trust and key managers for TLS connects.
#[derive(Clone)]
pub struct TlsMaterialProvider {
    cache: Arc<KeyStoreCache>,
    loader: Arc<dyn KeyStoreLoader>,
}

impl TlsMaterialProvider {
    pub fn new(cache: Arc<KeyStoreCache>, loader: Arc<dyn KeyStoreLoader>) -> Self {
        Self { cache, loader }
    }

    pub fn with_cache(cache: Arc<KeyStoreCache>) -> Self {
        Self::new(cache, Arc::new(DefaultKeyStoreLoader::new()))
    }

    pub fn cache(&self) -> &Arc<KeyStoreCache> {
        &self.cache
    }

    /// Trust manager for the configured trust store. Always required.
    pub async fn trust_manager(
        &self,
        config: &ConnectionConfig,
        correlation_id: &str,
    ) -> FtpResult<TrustManager> {
        tracing::info!("CorrelationId: {} Initializing trust manager", correlation_id);
        let source = KeyStoreSource::trust_store(config).ok_or_else(|| {
            FtpError::tls_material("No trust store location configured")
                .with_correlation(correlation_id)
        })?;
        let store = self
            .keystore(&source, config.key_store_ttl(), correlation_id)
            .await?;
        store
            .trust_manager()
            .map_err(|e| e.with_correlation(correlation_id))
    }

    /// Client key manager, or `None` when client authentication is not
    /// configured.
    pub async fn key_manager(
        &self,
        config: &ConnectionConfig,
        correlation_id: &str,
    ) -> FtpResult<Option<KeyManager>> {
        tracing::info!("CorrelationId: {} Initializing key manager", correlation_id);
        let Some(source) = KeyStoreSource::client_key_store(config) else {
            return Ok(None);
        };
        let store = self
            .keystore(&source, config.key_store_ttl(), correlation_id)
            .await?;
        let key_password = config.key_manager_key_password.as_deref().unwrap_or_default();
        let alias = config
            .key_manager_alias
            .as_deref()
            .filter(|_| has_text(&config.key_manager_alias));
        store
            .key_manager(alias, key_password)
            .map(Some)
            .map_err(|e| e.with_correlation(correlation_id))
    }

    /// Trust manager plus the optional key manager.
    pub async fn material(
        &self,
        config: &ConnectionConfig,
        correlation_id: &str,
    ) -> FtpResult<TrustMaterial> {
        let trust = self.trust_manager(config, correlation_id).await?;
        let key = self.key_manager(config, correlation_id).await?;
        if key.is_none() {
            tracing::warn!(
                "CorrelationId: {} Key manager not present, client certificate authentication is disabled",
                correlation_id
            );
        }
        Ok(TrustMaterial::new(trust, key))
    }

    async fn keystore(
        &self,
        source: &KeyStoreSource,
        ttl: CacheTtl,
        correlation_id: &str,
    ) -> FtpResult<Arc<KeyStore>> {
        if let Some(store) = self.cache.get(&source.location) {
            tracing::debug!(
                "CorrelationId: {} Keystore '{}' served from cache",
                correlation_id,
                source.location
            );
            return Ok(store);
        }

        tracing::info!(
            "CorrelationId: {} Loading keystore from: {}",
            correlation_id,
            source.location
        );
        let store = self.loader.load(source).await.map_err(|e| {
            let e = if e.kind == FtpErrorKind::TlsMaterial {
                e
            } else {
                FtpError::tls_material(format!(
                    "Cannot load keystore '{}': {}",
                    source.location, e.message
                ))
            };
            e.with_correlation(correlation_id)
        })?;
        tracing::info!("CorrelationId: {} Loaded keystore", correlation_id);
        Ok(self.cache.insert(source.location.clone(), store, ttl))
    }
}
