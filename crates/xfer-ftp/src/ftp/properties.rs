//! Named transfer profiles.
//!
//! A JSON object mapping a profile name to a [`ConnectionConfig`]:
//!
//! ```json
//! {
//!   "invoices": { "serverList": "ftp1.example.com,ftp2.example.com", "insecureMode": true },
//!   "payroll":  { "serverList": ["sftp.example.com"], "keyStoreLocation": "/etc/ftp/trust.pem" }
//! }
//! ```

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FtpTransferProperties {
    transfers: HashMap<String, ConnectionConfig>,
}

impl FtpTransferProperties {
    pub fn new(transfers: HashMap<String, ConnectionConfig>) -> Self {
        Self { transfers }
    }

    pub fn from_json_str(json: &str) -> FtpResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a profile file.
    pub async fn load(path: impl AsRef<Path>) -> FtpResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            FtpError::invalid_config(format!(
                "Cannot read transfer properties {}: {}",
                path.display(),
                e
            ))
        })?;
        let props = Self::from_json_str(&json)?;
        tracing::info!(
            "Loaded {} FTP transfer profile(s) from {}",
            props.transfers.len(),
            path.display()
        );
        Ok(props)
    }

    /// The named profile.
    pub fn get(&self, name: &str) -> FtpResult<ConnectionConfig> {
        self.transfers
            .get(name)
            .cloned()
            .ok_or_else(|| FtpError::invalid_config(format!("No FTP transfer profile named '{}'", name)))
    }

    pub fn insert(&mut self, name: impl Into<String>, config: ConnectionConfig) {
        self.transfers.insert(name.into(), config);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.transfers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
