//! Architecture:
//! - `types`: connection config, constants, FTP reply type
//! - `error`: FTP-specific error type with kind + connect context
//! - `cache`: TTL cache shared by concurrent connects
//! - `keystore`: keystore parsing, trust manager, key manager
//! - `material`: cache-first loading of TLS material (local or remote)
//! - `protocol`: control-channel command/response codec
//! - `tls`: rustls client config, AUTH TLS upgrade, data-channel wrapping
//! - `transfer`: PASV data channel
//! - `transport`: the transfer-client capability trait
//! - `client`: `FtpClient`, the tokio implementation of that trait
//! - `listing`: LIST reply parser
//! - `file_ops`: list / size / retrieve / store / delete / rename
//! - `factory`: server/attempt failover loop
//! - `properties`: named transfer profiles loaded from JSON
//! - `service`: file-transfer facade used by batch jobs

pub mod types;
pub mod error;
pub mod cache;
pub mod keystore;
pub mod material;
pub mod protocol;
pub mod tls;
pub mod transfer;
pub mod transport;
pub mod client;
pub mod listing;
pub mod file_ops;
pub mod factory;
pub mod properties;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use types::*;
pub use error::{ConnectStage, FtpError, FtpErrorKind, FtpResult};
pub use cache::{CacheEntry, CacheTtl, ExpiringCache};
pub use keystore::{KeyManager, KeyStore, KeyStoreEntry, KeyStoreFormat, TrustManager};
pub use material::{DefaultKeyStoreLoader, KeyStoreCache, KeyStoreLoader, TlsMaterialProvider};
pub use tls::TrustMaterial;
pub use transport::{ClientVariant, FtpTransport, PreConnectionSettings, TlsSettings, TransportBuilder};
pub use client::{FtpClient, FtpClientBuilder};
pub use factory::{ConnectedClient, ConnectionFactory};
pub use properties::FtpTransferProperties;
pub use service::FileTransferService;
