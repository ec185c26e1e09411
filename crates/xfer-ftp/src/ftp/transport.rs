//! The transfer-client capability interface the connection factory drives,
//! and the plain / TLS construction choice.

use crate::ftp::error::FtpResult;
use crate::ftp::tls::TrustMaterial;
use crate::ftp::types::{
    ConnectionConfig, ProtectionLevel, TlsProtocol, TransferType, DEFAULT_DATA_TIMEOUT,
    DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_KEEP_ALIVE_REPLY_TIMEOUT,
};
use async_trait::async_trait;
use std::time::Duration;

/// Settings applied to every client before it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreConnectionSettings {
    /// Ignore the address in `227` replies and reuse the control host.
    pub skip_pasv_reply_address: bool,
    /// Without `skip_pasv_reply_address`: swap a private 227 address for
    /// the control host.
    pub passive_nat_workaround: bool,
    /// NOOP interval on the control channel during long transfers.
    pub keep_alive_interval: Duration,
    pub keep_alive_reply_timeout: Duration,
    pub connect_timeout: Duration,
    /// Data-channel connect and read timeout, plain or TLS.
    pub data_timeout: Duration,
}

impl Default for PreConnectionSettings {
    fn default() -> Self {
        Self {
            skip_pasv_reply_address: true,
            passive_nat_workaround: false,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            keep_alive_reply_timeout: DEFAULT_KEEP_ALIVE_REPLY_TIMEOUT,
            connect_timeout: Duration::from_secs(15),
            data_timeout: DEFAULT_DATA_TIMEOUT,
        }
    }
}

impl PreConnectionSettings {
    pub fn for_config(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            data_timeout: config.data_timeout(),
            ..Self::default()
        }
    }
}

/// What a TLS-capable client is built with.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub material: TrustMaterial,
    pub protocol: TlsProtocol,
    pub data_timeout: Duration,
}

/// Plain FTP or explicit FTPS, decided once per connect.
#[derive(Debug, Clone)]
pub enum ClientVariant {
    Plain,
    Tls(TlsSettings),
}

impl ClientVariant {
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientVariant::Tls(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientVariant::Plain => "FTP",
            ClientVariant::Tls(_) => "FTPS",
        }
    }

    /// Construct a fresh client of this variant.
    pub fn build<B: TransportBuilder>(&self, builder: &B) -> FtpResult<B::Transport> {
        match self {
            ClientVariant::Plain => Ok(builder.plain()),
            ClientVariant::Tls(settings) => builder.secure(settings.clone()),
        }
    }
}

/// Control-session operations used on the connect path.
///
/// A rejected login is `Ok(false)`; `Err` is reserved for transport and
/// protocol failures.
#[async_trait]
pub trait FtpTransport: Send {
    fn apply_pre_connection(&mut self, settings: &PreConnectionSettings);

    /// `port = None` means the protocol default.
    async fn connect(&mut self, host: &str, port: Option<u16>) -> FtpResult<()>;

    fn enter_local_passive_mode(&mut self);

    fn set_list_hidden_files(&mut self, list_hidden: bool);

    async fn exec_pbsz(&mut self, size: u32) -> FtpResult<()>;

    async fn exec_prot(&mut self, level: ProtectionLevel) -> FtpResult<()>;

    async fn login(&mut self, username: &str, password: &str) -> FtpResult<bool>;

    async fn set_file_type(&mut self, file_type: TransferType) -> FtpResult<()>;

    async fn change_working_directory(&mut self, path: &str) -> FtpResult<()>;

    async fn logout(&mut self) -> FtpResult<()>;

    /// Close the connection. Safe to call when already closed.
    async fn disconnect(&mut self) -> FtpResult<()>;

    fn is_connected(&self) -> bool;
}

/// Creates plain or TLS-capable transports.
pub trait TransportBuilder: Send + Sync {
    type Transport: FtpTransport;

    fn plain(&self) -> Self::Transport;

    /// Fails when the TLS material cannot be turned into a client config.
    fn secure(&self, settings: TlsSettings) -> FtpResult<Self::Transport>;
}
