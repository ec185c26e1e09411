//! TLS for explicit FTPS (RFC 4217).
//!
//! - [`TrustMaterial`] turns trust / key managers into a rustls
//!   `ClientConfig` for the requested protocol versions.
//! - `upgrade_to_tls` wraps a plain control codec after `AUTH TLS`.
//! - `wrap_data_stream` protects a data connection under `PROT P`.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::keystore::{KeyManager, TrustManager};
use crate::ftp::protocol::{FtpCodec, NetStream};
use crate::ftp::types::TlsProtocol;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, SupportedProtocolVersion};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Trust manager plus optional client identity. Immutable; clones share
/// the underlying stores.
#[derive(Debug, Clone)]
pub struct TrustMaterial {
    trust: TrustManager,
    key: Option<Arc<KeyManager>>,
}

impl TrustMaterial {
    pub fn new(trust: TrustManager, key: Option<KeyManager>) -> Self {
        Self {
            trust,
            key: key.map(Arc::new),
        }
    }

    pub fn trust(&self) -> &TrustManager {
        &self.trust
    }

    pub fn key(&self) -> Option<&KeyManager> {
        self.key.as_deref()
    }

    /// rustls client configuration restricted to `protocol`.
    pub fn client_config(&self, protocol: TlsProtocol) -> FtpResult<Arc<ClientConfig>> {
        let versions: Vec<&'static SupportedProtocolVersion> = match protocol {
            TlsProtocol::Tls => vec![&rustls::version::TLS13, &rustls::version::TLS12],
            TlsProtocol::Tls12 => vec![&rustls::version::TLS12],
            TlsProtocol::Tls13 => vec![&rustls::version::TLS13],
        };

        let builder =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_protocol_versions(&versions)
                .map_err(|e| FtpError::tls_material(format!("TLS protocol setup: {}", e)))?
                .with_root_certificates(self.trust.root_store());

        let config = match self.key {
            Some(ref km) => builder
                .with_client_auth_cert(km.cert_chain().to_vec(), km.private_key())
                .map_err(|e| FtpError::tls_material(format!("Client certificate rejected: {}", e)))?,
            None => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }
}

fn server_name(host: &str) -> FtpResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| FtpError::tls_failed(format!("Invalid TLS server name '{}': {}", host, e)))
}

/// Upgrade a plain control connection to TLS. Call after `AUTH TLS` has
/// been answered with 234.
pub async fn upgrade_to_tls(
    codec: FtpCodec,
    host: &str,
    config: Arc<ClientConfig>,
) -> FtpResult<FtpCodec> {
    let tcp = match codec.into_stream()? {
        NetStream::Plain(tcp) => tcp,
        NetStream::Tls(_) => {
            return Err(FtpError::protocol_error(
                "Cannot upgrade: connection is already TLS",
            ))
        }
    };

    let tls = TlsConnector::from(config)
        .connect(server_name(host)?, tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("Explicit TLS handshake: {}", e)))?;
    Ok(FtpCodec::new(NetStream::Tls(Box::new(tls))))
}

/// TLS-wrap a freshly opened data connection.
pub async fn wrap_data_stream(
    tcp: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
) -> FtpResult<TlsStream<TcpStream>> {
    TlsConnector::from(config)
        .connect(server_name(host)?, tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("Data channel TLS: {}", e)))
}
