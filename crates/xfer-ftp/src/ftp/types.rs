//! Shared types for the FTP crate.

use crate::ftp::cache::CacheTtl;
use crate::ftp::error::{ConnectStage, FtpError, FtpResult};
use crate::ftp::keystore::KeyStoreFormat;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

// ─── Operational defaults ────────────────────────────────────────────

/// Port used when `ConnectionConfig::port` is 0.
pub const DEFAULT_FTP_PORT: u16 = 21;
/// Seconds between NOOPs on the control channel during a transfer.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);
/// How long to wait for each outstanding keep-alive reply.
pub const DEFAULT_KEEP_ALIVE_REPLY_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Data-channel connect and read timeout when none is configured.
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(10);
/// RFC 4217 requires `PBSZ 0` for TLS.
pub const PROTECTION_BUFFER_SIZE: u32 = 0;

// ─── Connection ──────────────────────────────────────────────────────

/// Configuration for one connection request.
///
/// Deserialises from camelCase JSON. `serverList` may be either an array or
/// a comma-separated string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Candidate servers, tried in order.
    #[serde(deserialize_with = "deserialize_server_list")]
    pub server_list: Vec<String>,
    /// Control port (0 = protocol default).
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// Attempts per server before moving on.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Sleep between attempts against the same server.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub local_working_dir: Option<String>,
    #[serde(default)]
    pub remote_working_dir: Option<String>,
    /// Plain FTP when true, explicit FTPS otherwise.
    #[serde(default)]
    pub insecure_mode: bool,
    /// "TLS", "TLSv1.2" or "TLSv1.3".
    #[serde(default = "default_tls_protocol")]
    pub tls_protocol: String,

    // ── Trust store ──
    #[serde(default)]
    pub key_store_location: Option<String>,
    #[serde(default)]
    pub key_store_password: Option<String>,
    /// Trust store is served by the remote configuration service.
    #[serde(default)]
    pub key_store_remote: bool,
    #[serde(default)]
    pub key_store_format: KeyStoreFormat,

    // ── Client key store ──
    #[serde(default)]
    pub key_manager_location: Option<String>,
    #[serde(default)]
    pub key_manager_password: Option<String>,
    #[serde(default)]
    pub key_manager_alias: Option<String>,
    #[serde(default)]
    pub key_manager_key_password: Option<String>,
    #[serde(default)]
    pub key_manager_remote: bool,
    #[serde(default)]
    pub key_manager_format: KeyStoreFormat,

    // ── Remote configuration service ──
    #[serde(default)]
    pub remote_username: Option<String>,
    #[serde(default)]
    pub remote_password: Option<String>,
    #[serde(default = "default_remote_format")]
    pub remote_key_store_format: KeyStoreFormat,

    /// Keystore cache TTL in milliseconds; negative = never expires.
    #[serde(default = "default_cache_ttl")]
    pub key_store_cache_ttl_ms: i64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_data_timeout")]
    pub data_timeout_sec: u64,
}

fn default_username() -> String {
    "anonymous".into()
}
fn default_password() -> String {
    "anonymous@".into()
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5_000
}
fn default_tls_protocol() -> String {
    "TLS".into()
}
fn default_remote_format() -> KeyStoreFormat {
    KeyStoreFormat::Der
}
fn default_cache_ttl() -> i64 {
    3_600_000
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_data_timeout() -> u64 {
    DEFAULT_DATA_TIMEOUT.as_secs()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_list: Vec::new(),
            port: 0,
            username: default_username(),
            password: default_password(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay(),
            local_working_dir: None,
            remote_working_dir: None,
            insecure_mode: false,
            tls_protocol: default_tls_protocol(),
            key_store_location: None,
            key_store_password: None,
            key_store_remote: false,
            key_store_format: KeyStoreFormat::default(),
            key_manager_location: None,
            key_manager_password: None,
            key_manager_alias: None,
            key_manager_key_password: None,
            key_manager_remote: false,
            key_manager_format: KeyStoreFormat::default(),
            remote_username: None,
            remote_password: None,
            remote_key_store_format: default_remote_format(),
            key_store_cache_ttl_ms: default_cache_ttl(),
            connect_timeout_sec: default_connect_timeout(),
            data_timeout_sec: default_data_timeout(),
        }
    }
}

impl ConnectionConfig {
    /// `None` means "use the protocol default port".
    pub fn effective_port(&self) -> Option<u16> {
        if self.port > 0 {
            Some(self.port)
        } else {
            None
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_sec)
    }

    pub fn key_store_ttl(&self) -> CacheTtl {
        CacheTtl::from_millis(self.key_store_cache_ttl_ms)
    }

    /// Client-certificate auth needs both a location and a key password.
    pub fn has_client_key_config(&self) -> bool {
        has_text(&self.key_manager_location) && has_text(&self.key_manager_key_password)
    }

    /// Comma-joined server list, for log and error context.
    pub fn servers_display(&self) -> String {
        self.server_list.join(",")
    }

    /// Reject configurations that cannot possibly connect.
    pub fn validate(&self) -> FtpResult<()> {
        if self.server_list.is_empty() {
            return Err(FtpError::invalid_config("Server list must not be empty")
                .with_stage(ConnectStage::Validate));
        }
        if self.retry_count == 0 {
            return Err(FtpError::invalid_config("Retry count must be at least 1")
                .with_stage(ConnectStage::Validate));
        }
        if !self.insecure_mode {
            TlsProtocol::parse(&self.tls_protocol)
                .map_err(|e| e.with_stage(ConnectStage::Validate))?;
            if !has_text(&self.key_store_location) {
                return Err(FtpError::invalid_config(
                    "A trust store location is required unless insecure mode is set",
                )
                .with_stage(ConnectStage::Validate));
            }
        }
        Ok(())
    }
}

pub(crate) fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServerListRepr {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_server_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match ServerListRepr::deserialize(deserializer)? {
        ServerListRepr::Joined(s) => s.split(',').map(str::to_string).collect(),
        ServerListRepr::List(v) => v,
    };
    Ok(normalize_server_list(raw))
}

/// Trim entries and drop empties, preserving order.
pub fn normalize_server_list<I, S>(servers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    servers
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ─── Protocol enums ──────────────────────────────────────────────────

/// TLS protocol selection by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProtocol {
    /// TLS 1.2 and 1.3.
    Tls,
    Tls12,
    Tls13,
}

impl TlsProtocol {
    pub fn parse(name: &str) -> FtpResult<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TLS" | "" => Ok(Self::Tls),
            "TLSV1.2" => Ok(Self::Tls12),
            "TLSV1.3" => Ok(Self::Tls13),
            other => Err(FtpError::invalid_config(format!(
                "Unsupported TLS protocol '{}' (expected TLS, TLSv1.2 or TLSv1.3)",
                other
            ))),
        }
    }
}

/// Transfer type (RFC 959 TYPE command).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    Binary,
}

impl Default for TransferType {
    fn default() -> Self {
        Self::Binary
    }
}

impl TransferType {
    pub fn command(self) -> &'static str {
        match self {
            TransferType::Ascii => "TYPE A",
            TransferType::Binary => "TYPE I",
        }
    }
}

/// Data-channel protection level (RFC 2228 PROT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionLevel {
    Clear,
    Private,
}

impl ProtectionLevel {
    pub fn code(self) -> &'static str {
        match self {
            ProtectionLevel::Clear => "C",
            ProtectionLevel::Private => "P",
        }
    }
}

// ─── FTP Response ────────────────────────────────────────────────────

/// A single FTP response (may be multi-line).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Full response text (all lines joined).
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Whether this is a positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Whether this is a positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

// ─── Directory Listing ───────────────────────────────────────────────

/// Type of a remote filesystem entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum FtpEntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One entry from a LIST reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEntry {
    pub name: String,
    pub kind: FtpEntryKind,
    pub size: u64,
    pub raw: String,
}

impl FtpEntry {
    pub fn is_file(&self) -> bool {
        self.kind == FtpEntryKind::File
    }
}
