//! FTP-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised FTP error, with the connect-path context needed to diagnose
/// it from a single log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP response code that triggered the error, if any.
    pub code: Option<u16>,
    pub correlation_id: Option<String>,
    /// Server (or comma-joined server list) the error relates to.
    pub server: Option<String>,
    pub stage: Option<ConnectStage>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP / DNS failure that survived every retry on every server.
    ConnectionFailed,
    /// No server in the list accepted the credentials.
    AuthFailed,
    /// Trust or key material could not be loaded or parsed.
    TlsMaterial,
    /// PBSZ / PROT / CWD failed after the control channel was up.
    ProtocolNegotiation,
    /// Config / parameter validation error.
    InvalidConfig,
    /// AUTH TLS / TLS handshake failure.
    TlsFailed,
    /// Server returned a 4xx/5xx for a command.
    CommandRejected,
    /// Data channel could not be established.
    DataChannelFailed,
    /// Transfer aborted or incomplete.
    TransferFailed,
    /// Server sent an un-parseable response.
    ProtocolError,
    /// Local I/O error (file read/write).
    IoError,
    Timeout,
    /// Control connection dropped or never opened.
    Disconnected,
    /// File/directory not found on the server.
    NotFound,
    PermissionDenied,
}

/// Where on the connect path a failure happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectStage {
    Validate,
    TlsMaterial,
    Connect,
    Negotiate,
    Login,
    PostLogin,
    ChangeDirectory,
    Disconnect,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            correlation_id: None,
            server: None,
            stage: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Tag the stage unless a more specific one is already set.
    pub fn with_stage(mut self, stage: ConnectStage) -> Self {
        if self.stage.is_none() {
            self.stage = Some(stage);
        }
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn tls_material(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsMaterial, msg).with_stage(ConnectStage::TlsMaterial)
    }

    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolNegotiation, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TransferFailed, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::IoError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NotFound, msg)
    }

    /// Whether this error means the session cannot be used any more.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::ConnectionFailed
                | FtpErrorKind::Disconnected
                | FtpErrorKind::Timeout
                | FtpErrorKind::TlsFailed
                | FtpErrorKind::IoError
        )
    }

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::Disconnected,
            425 | 426 => FtpErrorKind::DataChannelFailed,
            430 | 530 => FtpErrorKind::AuthFailed,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    FtpErrorKind::PermissionDenied
                } else if lower.contains("not found") || lower.contains("no such") {
                    FtpErrorKind::NotFound
                } else {
                    FtpErrorKind::CommandRejected
                }
            }
            451 | 452 | 552 => FtpErrorKind::TransferFailed,
            _ => FtpErrorKind::CommandRejected,
        };
        Self::new(kind, text).with_code(code)
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[FTP {:?} {}]", self.kind, code)?,
            None => write!(f, "[FTP {:?}]", self.kind)?,
        }
        if let Some(ref id) = self.correlation_id {
            write!(f, " correlationId={}", id)?;
        }
        if let Some(ref server) = self.server {
            write!(f, " server={}", server)?;
        }
        if let Some(stage) = self.stage {
            write!(f, " stage={:?}", stage)?;
        }
        write!(f, " {}", self.message)
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::disconnected(e.to_string()),
            std::io::ErrorKind::NotFound => Self::not_found(e.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Self::new(FtpErrorKind::PermissionDenied, e.to_string())
            }
            _ => Self::io_error(e.to_string()),
        }
    }
}

impl From<rustls::Error> for FtpError {
    fn from(e: rustls::Error) -> Self {
        Self::tls_failed(e.to_string())
    }
}

impl From<reqwest::Error> for FtpError {
    fn from(e: reqwest::Error) -> Self {
        Self::tls_material(format!("Remote keystore request failed: {}", e))
    }
}

impl From<serde_json::Error> for FtpError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_config(format!("Invalid transfer properties: {}", e))
    }
}
