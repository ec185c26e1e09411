//! Stateful FTP client: owns the control connection and implements
//! [`FtpTransport`] over tokio (plain) or tokio-rustls (explicit FTPS).
//!
//! Lifecycle: `connect()` (banner, then `AUTH TLS` for FTPS) → `PBSZ` /
//! `PROT` → login → `TYPE` → optional `CWD`. File operations live in
//! `file_ops.rs`.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::transfer::{self, PassiveTarget, PendingData};
use crate::ftp::transport::{FtpTransport, PreConnectionSettings, TlsSettings, TransportBuilder};
use crate::ftp::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::ClientConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use uuid::Uuid;

/// One FTP control session.
pub struct FtpClient {
    id: String,
    codec: Option<FtpCodec>,
    host: Option<String>,
    banner: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    settings: PreConnectionSettings,
    tls: Option<Arc<ClientConfig>>,
    data_timeout: Duration,
    protection: ProtectionLevel,
    passive: bool,
    list_hidden: bool,
    transfer_type: TransferType,
}

impl fmt::Debug for FtpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpClient")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("connected", &self.codec.is_some())
            .field("tls", &self.tls.is_some())
            .field("protection", &self.protection)
            .field("transfer_type", &self.transfer_type)
            .finish()
    }
}

impl Default for FtpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FtpClient {
    /// A plain-FTP client.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            codec: None,
            host: None,
            banner: None,
            connected_at: None,
            settings: PreConnectionSettings::default(),
            tls: None,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            protection: ProtectionLevel::Clear,
            passive: false,
            list_hidden: true,
            transfer_type: TransferType::Ascii,
        }
    }

    /// An explicit-FTPS client; the rustls config is built here, before
    /// any network I/O.
    pub fn with_tls(settings: TlsSettings) -> FtpResult<Self> {
        let config = settings.material.client_config(settings.protocol)?;
        Ok(Self {
            tls: Some(config),
            data_timeout: settings.data_timeout,
            ..Self::new()
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn protection(&self) -> ProtectionLevel {
        self.protection
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn lists_hidden_files(&self) -> bool {
        self.list_hidden
    }

    pub fn settings(&self) -> &PreConnectionSettings {
        &self.settings
    }

    pub(crate) fn codec_mut(&mut self) -> FtpResult<&mut FtpCodec> {
        self.codec
            .as_mut()
            .ok_or_else(|| FtpError::disconnected("Not connected"))
    }

    /// Open a passive data connection; it is protected on
    /// [`PendingData::establish`] when `PROT P` is active.
    pub(crate) async fn open_data_channel(&mut self) -> FtpResult<PendingData> {
        if !self.passive {
            return Err(FtpError::data_channel(
                "Only passive data connections are supported; enter passive mode first",
            ));
        }
        let host = self
            .host
            .clone()
            .ok_or_else(|| FtpError::disconnected("Not connected"))?;
        let target = PassiveTarget {
            host: &host,
            skip_reply_address: self.settings.skip_pasv_reply_address,
            nat_workaround: self.settings.passive_nat_workaround,
            data_timeout: self.data_timeout,
            tls: match self.protection {
                ProtectionLevel::Private => self.tls.clone(),
                ProtectionLevel::Clear => None,
            },
        };
        let codec = self.codec_mut()?;
        transfer::open_passive(codec, target).await
    }

    pub(crate) fn data_timeout(&self) -> Duration {
        self.data_timeout
    }

    async fn open_control(&self, host: &str, port: u16) -> FtpResult<(FtpCodec, FtpResponse)> {
        let limit = self.settings.connect_timeout;
        let tcp = timeout(limit, TcpStream::connect((host, port)))
            .await
            .map_err(|_| FtpError::timeout(format!("TCP connect to {}:{} timed out", host, port)))?
            .map_err(|e| {
                FtpError::connection_failed(format!("TCP connect to {}:{}: {}", host, port, e))
            })?;
        tcp.set_nodelay(true).ok();

        let mut codec = FtpCodec::from_tcp(tcp);
        let mut banner = codec.read_response_within(limit).await?;
        if banner.is_preliminary() {
            // 120: service ready in nnn minutes.
            banner = codec.read_response_within(limit).await?;
        }
        if !banner.is_completion() {
            return Err(FtpError::connection_failed(format!(
                "Server {} refused the session: {}",
                host,
                banner.text()
            ))
            .with_code(banner.code));
        }

        if let Some(ref config) = self.tls {
            let resp = codec.execute("AUTH TLS").await?;
            if resp.code != 234 {
                return Err(FtpError::tls_failed(format!("AUTH TLS rejected: {}", resp.text()))
                    .with_code(resp.code));
            }
            codec = timeout(limit, tls::upgrade_to_tls(codec, host, Arc::clone(config)))
                .await
                .map_err(|_| FtpError::timeout("TLS handshake timed out"))??;
        }
        Ok((codec, banner))
    }

    fn reset_session(&mut self) {
        self.codec = None;
        self.host = None;
        self.banner = None;
        self.connected_at = None;
        self.protection = ProtectionLevel::Clear;
    }
}

#[async_trait]
impl FtpTransport for FtpClient {
    fn apply_pre_connection(&mut self, settings: &PreConnectionSettings) {
        self.settings = settings.clone();
        self.data_timeout = settings.data_timeout;
    }

    async fn connect(&mut self, host: &str, port: Option<u16>) -> FtpResult<()> {
        if self.codec.is_some() {
            self.disconnect().await?;
        }
        let port = port.unwrap_or(DEFAULT_FTP_PORT);
        let (codec, banner) = self.open_control(host, port).await?;
        tracing::debug!("Session {} connected to {}:{}", self.id, host, port);
        self.codec = Some(codec);
        self.host = Some(host.to_string());
        self.banner = Some(banner.text());
        self.connected_at = Some(Utc::now());
        Ok(())
    }

    fn enter_local_passive_mode(&mut self) {
        self.passive = true;
    }

    fn set_list_hidden_files(&mut self, list_hidden: bool) {
        self.list_hidden = list_hidden;
    }

    async fn exec_pbsz(&mut self, size: u32) -> FtpResult<()> {
        self.codec_mut()?
            .expect_ok(&format!("PBSZ {}", size))
            .await?;
        Ok(())
    }

    async fn exec_prot(&mut self, level: ProtectionLevel) -> FtpResult<()> {
        if level == ProtectionLevel::Private && self.tls.is_none() {
            return Err(FtpError::negotiation(
                "PROT P requires a TLS-protected control connection",
            ));
        }
        self.codec_mut()?
            .expect_ok(&format!("PROT {}", level.code()))
            .await?;
        self.protection = level;
        Ok(())
    }

    async fn login(&mut self, username: &str, password: &str) -> FtpResult<bool> {
        let codec = self.codec_mut()?;
        let mut resp = codec.execute(&format!("USER {}", username)).await?;
        if resp.code == 331 {
            resp = codec.execute(&format!("PASS {}", password)).await?;
        }
        match resp.code {
            230 | 202 => Ok(true),
            421 => Err(FtpError::from_reply(resp.code, &resp.text())),
            _ => {
                tracing::debug!("Session {} login rejected: {}", self.id, resp.text());
                Ok(false)
            }
        }
    }

    async fn set_file_type(&mut self, file_type: TransferType) -> FtpResult<()> {
        self.codec_mut()?.expect_ok(file_type.command()).await?;
        self.transfer_type = file_type;
        Ok(())
    }

    async fn change_working_directory(&mut self, path: &str) -> FtpResult<()> {
        self.codec_mut()?
            .expect_ok(&format!("CWD {}", path))
            .await?;
        Ok(())
    }

    async fn logout(&mut self) -> FtpResult<()> {
        self.codec_mut()?.expect_ok("QUIT").await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> FtpResult<()> {
        if let Some(mut codec) = self.codec.take() {
            if let Err(e) = codec.shutdown().await {
                tracing::debug!("Session {} shutdown: {}", self.id, e);
            }
        }
        self.reset_session();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.codec.is_some()
    }
}

/// Builds [`FtpClient`]s for the connection factory.
#[derive(Debug, Clone, Default)]
pub struct FtpClientBuilder;

impl FtpClientBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl TransportBuilder for FtpClientBuilder {
    type Transport = FtpClient;

    fn plain(&self) -> FtpClient {
        FtpClient::new()
    }

    fn secure(&self, settings: TlsSettings) -> FtpResult<FtpClient> {
        FtpClient::with_tls(settings)
    }
}
