//! Connection factory: picks the plain or TLS variant, then walks the
//! server list with bounded retries until one server accepts the login.
//!
//! There is no cancellation token. The retry delay is a
//! `tokio::time::sleep`; to abort a connect mid-retry, drop its future
//! (for example under `tokio::time::timeout`), which also drops the
//! half-open transport.

use crate::ftp::cache::ExpiringCache;
use crate::ftp::client::FtpClientBuilder;
use crate::ftp::error::{ConnectStage, FtpError, FtpErrorKind, FtpResult};
use crate::ftp::material::{KeyStoreCache, TlsMaterialProvider};
use crate::ftp::transport::{
    ClientVariant, FtpTransport, PreConnectionSettings, TlsSettings, TransportBuilder,
};
use crate::ftp::types::{
    has_text, ConnectionConfig, ProtectionLevel, TlsProtocol, TransferType,
    PROTECTION_BUFFER_SIZE,
};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A connected, logged-in transport bound to the server that accepted it.
///
/// Owned by the caller, who must finish with [`ConnectedClient::disconnect`].
pub struct ConnectedClient<T> {
    transport: T,
    server: String,
    correlation_id: String,
    attempts: u32,
}

impl<T> fmt::Debug for ConnectedClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedClient")
            .field("server", &self.server)
            .field("correlation_id", &self.correlation_id)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl<T: FtpTransport> ConnectedClient<T> {
    /// The server (as written in the server list) that accepted the login.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Attempts spent across all servers, including the successful one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Best-effort logout then close. Never fails.
    pub async fn disconnect(mut self) {
        release(&mut self.transport, &self.correlation_id).await;
        tracing::info!(
            "CorrelationId: {} Disconnected from FTP server {}",
            self.correlation_id,
            self.server
        );
    }
}

impl<T> Deref for ConnectedClient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.transport
    }
}

impl<T> DerefMut for ConnectedClient<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Produces connected clients, or fails with one terminal error.
pub struct ConnectionFactory<B: TransportBuilder = FtpClientBuilder> {
    builder: B,
    materials: TlsMaterialProvider,
}

impl ConnectionFactory<FtpClientBuilder> {
    /// Real FTP clients, keystores loaded from disk or over HTTP.
    pub fn new(cache: Arc<KeyStoreCache>) -> Self {
        Self::with_parts(FtpClientBuilder::new(), TlsMaterialProvider::with_cache(cache))
    }
}

impl Default for ConnectionFactory<FtpClientBuilder> {
    fn default() -> Self {
        Self::new(Arc::new(ExpiringCache::new()))
    }
}

impl<B: TransportBuilder> ConnectionFactory<B> {
    pub fn with_parts(builder: B, materials: TlsMaterialProvider) -> Self {
        Self { builder, materials }
    }

    pub fn materials(&self) -> &TlsMaterialProvider {
        &self.materials
    }

    /// Connect and log in to the first server in `config.server_list` that
    /// accepts the credentials.
    #[tracing::instrument(skip(self, config), fields(servers = %config.servers_display()))]
    pub async fn connect(
        &self,
        config: &ConnectionConfig,
        correlation_id: &str,
    ) -> FtpResult<ConnectedClient<B::Transport>> {
        let servers = config.servers_display();
        config
            .validate()
            .map_err(|e| e.with_correlation(correlation_id).with_server(servers.clone()))?;

        let variant = self.select_variant(config, correlation_id).await?;
        let mut transport = variant.build(&self.builder).map_err(|e| {
            e.with_correlation(correlation_id)
                .with_server(servers.clone())
                .with_stage(ConnectStage::TlsMaterial)
        })?;

        tracing::info!(
            "CorrelationId: {} Applying common pre-connection settings to {} client",
            correlation_id,
            variant.name()
        );
        transport.apply_pre_connection(&PreConnectionSettings::for_config(config));

        tracing::info!("CorrelationId: {} Connecting FTP client", correlation_id);
        let (server, attempts) = self
            .login_to_any(&mut transport, &variant, config, correlation_id)
            .await?;

        if let Err(e) = change_dir(&mut transport, config, correlation_id).await {
            release(&mut transport, correlation_id).await;
            let mut err = FtpError::negotiation(format!(
                "Connected to {} but changing directory failed: {}",
                server, e.message
            ))
            .with_correlation(correlation_id)
            .with_server(server)
            .with_stage(ConnectStage::ChangeDirectory);
            err.code = e.code;
            return Err(err);
        }

        tracing::info!(
            "CorrelationId: {} Successfully connected to FTP Server {}",
            correlation_id,
            server
        );
        Ok(ConnectedClient {
            transport,
            server,
            correlation_id: correlation_id.to_string(),
            attempts,
        })
    }

    /// Release a handle obtained from [`connect`](Self::connect).
    pub async fn disconnect(&self, client: ConnectedClient<B::Transport>) {
        client.disconnect().await
    }

    async fn select_variant(
        &self,
        config: &ConnectionConfig,
        correlation_id: &str,
    ) -> FtpResult<ClientVariant> {
        if config.insecure_mode {
            tracing::info!("CorrelationId: {} Creating new FTP client", correlation_id);
            return Ok(ClientVariant::Plain);
        }

        tracing::info!("CorrelationId: {} Creating new FTPS client", correlation_id);
        let protocol = TlsProtocol::parse(&config.tls_protocol)
            .map_err(|e| e.with_correlation(correlation_id).with_stage(ConnectStage::Validate))?;
        let material = self
            .materials
            .material(config, correlation_id)
            .await
            .map_err(|e| e.with_server(config.servers_display()))?;
        Ok(ClientVariant::Tls(TlsSettings {
            material,
            protocol,
            data_timeout: config.data_timeout(),
        }))
    }

    /// The server/attempt loop. Errors and rejected logins both use up an
    /// attempt; the delay is slept between attempts on one server only.
    async fn login_to_any(
        &self,
        transport: &mut B::Transport,
        variant: &ClientVariant,
        config: &ConnectionConfig,
        correlation_id: &str,
    ) -> FtpResult<(String, u32)> {
        let port = config.effective_port();
        let mut attempts = 0u32;
        let mut rejected = false;
        let mut last_error: Option<FtpError> = None;

        for server in &config.server_list {
            for attempt in 1..=config.retry_count {
                attempts += 1;
                match port {
                    Some(p) => tracing::info!(
                        "CorrelationId: {} Connecting to FTP server {} on port {}",
                        correlation_id,
                        server,
                        p
                    ),
                    None => tracing::info!(
                        "CorrelationId: {} Connecting to FTP server {} on default port",
                        correlation_id,
                        server
                    ),
                }

                match attempt_login(transport, variant, server, port, config).await {
                    Ok(true) => return Ok((server.clone(), attempts)),
                    Ok(false) => {
                        rejected = true;
                        tracing::warn!(
                            "CorrelationId: {} Login rejected by {} (attempt {}/{})",
                            correlation_id,
                            server,
                            attempt,
                            config.retry_count
                        );
                    }
                    Err(e) => {
                        tracing::info!(
                            "CorrelationId: {} FTP connection error on {} (attempt {}/{}): {}",
                            correlation_id,
                            server,
                            attempt,
                            config.retry_count,
                            e
                        );
                        last_error = Some(e.with_server(server.clone()));
                    }
                }

                if let Err(e) = transport.disconnect().await {
                    tracing::debug!("CorrelationId: {} Reset after failed attempt: {}", correlation_id, e);
                }
                if attempt < config.retry_count {
                    tracing::info!(
                        "CorrelationId: {} Retrying {} after {} milliseconds",
                        correlation_id,
                        server,
                        config.retry_delay_ms
                    );
                    tokio::time::sleep(config.retry_delay()).await;
                }
            }
            tracing::info!(
                "CorrelationId: {} Giving up on FTP server {} after {} attempts",
                correlation_id,
                server,
                config.retry_count
            );
        }

        Err(exhausted(rejected, last_error)
            .with_correlation(correlation_id)
            .with_server(config.servers_display()))
    }
}

/// One connect → negotiate → login try. `Ok(false)` is a rejected login.
async fn attempt_login<T: FtpTransport>(
    transport: &mut T,
    variant: &ClientVariant,
    server: &str,
    port: Option<u16>,
    config: &ConnectionConfig,
) -> FtpResult<bool> {
    transport
        .connect(server, port)
        .await
        .map_err(|e| e.with_stage(ConnectStage::Connect))?;

    tracing::debug!("FTP client configured to passive mode, hidden files excluded");
    transport.enter_local_passive_mode();
    transport.set_list_hidden_files(false);

    if variant.is_tls() {
        tracing::debug!("FTPS client executing PBSZ {} and PROT P", PROTECTION_BUFFER_SIZE);
        transport
            .exec_pbsz(PROTECTION_BUFFER_SIZE)
            .await
            .map_err(negotiation_error)?;
        transport
            .exec_prot(ProtectionLevel::Private)
            .await
            .map_err(negotiation_error)?;
    }

    let logged_in = transport
        .login(&config.username, &config.password)
        .await
        .map_err(|e| e.with_stage(ConnectStage::Login))?;
    if !logged_in {
        return Ok(false);
    }

    tracing::debug!("FTP client file type being set to binary file type");
    transport
        .set_file_type(TransferType::Binary)
        .await
        .map_err(|e| e.with_stage(ConnectStage::PostLogin))?;
    Ok(true)
}

fn negotiation_error(e: FtpError) -> FtpError {
    if e.is_transport() {
        return e.with_stage(ConnectStage::Negotiate);
    }
    let mut err = FtpError::negotiation(format!("Data-channel protection failed: {}", e.message))
        .with_stage(ConnectStage::Negotiate);
    err.code = e.code;
    err
}

/// Terminal error once every server has used up its attempts.
fn exhausted(rejected: bool, last_error: Option<FtpError>) -> FtpError {
    const GIVE_UP: &str = "Unable to connect to any server in the list";
    if rejected {
        return FtpError::auth_failed(format!("FTP Authentication failed. {}", GIVE_UP))
            .with_stage(ConnectStage::Login);
    }
    match last_error {
        Some(e) => {
            let mut err = if e.kind == FtpErrorKind::ProtocolNegotiation {
                FtpError::negotiation(format!("{}: {}", GIVE_UP, e.message))
            } else {
                FtpError::connection_failed(format!("{}: {}", GIVE_UP, e.message))
            };
            err.code = e.code;
            err.with_stage(e.stage.unwrap_or(ConnectStage::Connect))
        }
        None => FtpError::connection_failed(GIVE_UP).with_stage(ConnectStage::Connect),
    }
}

async fn change_dir<T: FtpTransport>(
    transport: &mut T,
    config: &ConnectionConfig,
    correlation_id: &str,
) -> FtpResult<()> {
    if !has_text(&config.remote_working_dir) {
        tracing::info!(
            "CorrelationId: {} FTP client remote directory is the root directory",
            correlation_id
        );
        return Ok(());
    }
    let dir = config.remote_working_dir.as_deref().unwrap_or_default().trim();
    tracing::info!(
        "CorrelationId: {} Changing FTP client directory to: {}",
        correlation_id,
        dir
    );
    transport.change_working_directory(dir).await?;
    tracing::info!("CorrelationId: {} Directory changed successfully", correlation_id);
    Ok(())
}

/// Logout then close; failures are logged and swallowed.
async fn release<T: FtpTransport>(transport: &mut T, correlation_id: &str) {
    if transport.is_connected() {
        if let Err(e) = transport.logout().await {
            tracing::warn!("CorrelationId: {} FTP logout failed: {}", correlation_id, e);
        }
    }
    if let Err(e) = transport.disconnect().await {
        tracing::warn!("CorrelationId: {} FTP disconnect failed: {}", correlation_id, e);
    }
}
