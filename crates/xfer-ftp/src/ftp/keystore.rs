//! Keystore parsing and the trust / key managers derived from it.
//!
//! A keystore is either a PEM bundle (certificates plus optional private
//! keys, each block optionally labelled with an `Alias:` header) or a single
//! DER certificate, which is what the remote configuration service serves.

use crate::ftp::error::{FtpError, FtpResult};
use pkcs8::EncryptedPrivateKeyInfo;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
    ServerName, UnixTime,
};
use rustls::RootCertStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// On-disk / on-wire keystore encoding.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreFormat {
    #[default]
    Pem,
    Der,
}

const ALIAS_HEADER: &str = "Alias";

/// Private key as stored; encrypted keys stay encrypted until a key
/// manager asks for them.
pub enum StoredKey {
    Plain(PrivateKeyDer<'static>),
    Encrypted(Vec<u8>),
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredKey::Plain(_) => f.write_str("StoredKey::Plain(..)"),
            StoredKey::Encrypted(_) => f.write_str("StoredKey::Encrypted(..)"),
        }
    }
}

#[derive(Debug)]
pub enum KeyStoreEntry {
    Certificate {
        alias: Option<String>,
        der: CertificateDer<'static>,
    },
    PrivateKey {
        alias: Option<String>,
        key: StoredKey,
    },
}

impl KeyStoreEntry {
    pub fn alias(&self) -> Option<&str> {
        match self {
            KeyStoreEntry::Certificate { alias, .. } | KeyStoreEntry::PrivateKey { alias, .. } => {
                alias.as_deref()
            }
        }
    }
}

/// A loaded, immutable keystore.
#[derive(Debug)]
pub struct KeyStore {
    entries: Vec<KeyStoreEntry>,
    store_password: Option<String>,
}

impl KeyStore {
    /// Parse `bytes` in the given format.
    ///
    /// The store password is kept as the fallback for encrypted key entries
    /// whose own key password does not open them.
    pub fn load(bytes: &[u8], format: KeyStoreFormat, password: Option<&str>) -> FtpResult<Self> {
        let entries = match format {
            KeyStoreFormat::Pem => parse_pem(bytes)?,
            KeyStoreFormat::Der => parse_der(bytes)?,
        };
        if entries.is_empty() {
            return Err(FtpError::tls_material("Keystore contains no entries"));
        }
        Ok(Self {
            entries,
            store_password: password.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }

    pub fn entries(&self) -> &[KeyStoreEntry] {
        &self.entries
    }

    pub fn certificates(&self) -> impl Iterator<Item = &CertificateDer<'static>> {
        self.entries.iter().filter_map(|e| match e {
            KeyStoreEntry::Certificate { der, .. } => Some(der),
            _ => None,
        })
    }

    /// Every certificate in the store becomes a trust anchor.
    pub fn trust_manager(&self) -> FtpResult<TrustManager> {
        TrustManager::from_certificates(self.certificates().cloned())
    }

    /// Client identity for `alias` (or the first key when no alias is set).
    pub fn key_manager(&self, alias: Option<&str>, key_password: &str) -> FtpResult<KeyManager> {
        let (key_alias, stored) = self
            .entries
            .iter()
            .find_map(|e| match e {
                KeyStoreEntry::PrivateKey { alias: a, key } => match alias {
                    Some(wanted) if a.as_deref() != Some(wanted) => None,
                    _ => Some((a.clone(), key)),
                },
                _ => None,
            })
            .ok_or_else(|| match alias {
                Some(a) => FtpError::tls_material(format!("No private key with alias '{}'", a)),
                None => FtpError::tls_material("Keystore contains no private key"),
            })?;

        let key = match stored {
            StoredKey::Plain(k) => k.clone_key(),
            StoredKey::Encrypted(der) => self.decrypt_key(der, key_password)?,
        };

        let chain: Vec<CertificateDer<'static>> = self
            .entries
            .iter()
            .filter_map(|e| match e {
                KeyStoreEntry::Certificate { alias: a, der }
                    if key_alias.is_none() || *a == key_alias =>
                {
                    Some(der.clone())
                }
                _ => None,
            })
            .collect();
        if chain.is_empty() {
            return Err(FtpError::tls_material(
                "No certificate chain accompanies the client key",
            ));
        }

        Ok(KeyManager {
            alias: key_alias,
            chain,
            key,
        })
    }

    fn decrypt_key(&self, der: &[u8], key_password: &str) -> FtpResult<PrivateKeyDer<'static>> {
        let candidates = std::iter::once(key_password).chain(self.store_password.as_deref());
        let mut last_err = String::new();
        for password in candidates {
            match decrypt_pkcs8(der, password) {
                Ok(key) => return Ok(key),
                Err(e) => last_err = e,
            }
        }
        Err(FtpError::tls_material(format!(
            "Cannot decrypt client key: {}",
            last_err
        )))
    }
}

fn decrypt_pkcs8(der: &[u8], password: &str) -> Result<PrivateKeyDer<'static>, String> {
    let info = EncryptedPrivateKeyInfo::try_from(der).map_err(|e| e.to_string())?;
    let doc = info.decrypt(password).map_err(|e| e.to_string())?;
    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        doc.as_bytes().to_vec(),
    )))
}

fn parse_pem(bytes: &[u8]) -> FtpResult<Vec<KeyStoreEntry>> {
    let blocks = pem::parse_many(bytes)
        .map_err(|e| FtpError::tls_material(format!("Malformed PEM keystore: {}", e)))?;

    let mut entries = Vec::with_capacity(blocks.len());
    for block in blocks {
        let alias = block.headers().get(ALIAS_HEADER).map(str::to_string);
        let contents = block.contents().to_vec();
        let entry = match block.tag() {
            "CERTIFICATE" => KeyStoreEntry::Certificate {
                alias,
                der: CertificateDer::from(contents),
            },
            "PRIVATE KEY" => KeyStoreEntry::PrivateKey {
                alias,
                key: StoredKey::Plain(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(contents))),
            },
            "RSA PRIVATE KEY" => KeyStoreEntry::PrivateKey {
                alias,
                key: StoredKey::Plain(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(contents))),
            },
            "EC PRIVATE KEY" => KeyStoreEntry::PrivateKey {
                alias,
                key: StoredKey::Plain(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(contents))),
            },
            "ENCRYPTED PRIVATE KEY" => KeyStoreEntry::PrivateKey {
                alias,
                key: StoredKey::Encrypted(contents),
            },
            other => {
                tracing::debug!("Skipping unsupported PEM block '{}'", other);
                continue;
            }
        };
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_der(bytes: &[u8]) -> FtpResult<Vec<KeyStoreEntry>> {
    // An X.509 certificate is a DER SEQUENCE.
    if bytes.first() != Some(&0x30) {
        return Err(FtpError::tls_material(
            "DER keystore does not start with an ASN.1 SEQUENCE",
        ));
    }
    Ok(vec![KeyStoreEntry::Certificate {
        alias: None,
        der: CertificateDer::from(bytes.to_vec()),
    }])
}

// ─── Trust manager ───────────────────────────────────────────────────

/// Validates server certificates against a fixed set of trust anchors.
#[derive(Debug, Clone)]
pub struct TrustManager {
    anchors: Arc<Vec<CertificateDer<'static>>>,
    roots: Arc<RootCertStore>,
}

impl TrustManager {
    pub fn from_certificates<I>(certs: I) -> FtpResult<Self>
    where
        I: IntoIterator<Item = CertificateDer<'static>>,
    {
        let anchors: Vec<CertificateDer<'static>> = certs.into_iter().collect();
        if anchors.is_empty() {
            return Err(FtpError::tls_material(
                "Trust store contains no certificates",
            ));
        }
        let mut roots = RootCertStore::empty();
        for cert in &anchors {
            roots
                .add(cert.clone())
                .map_err(|e| FtpError::tls_material(format!("Invalid trust anchor: {}", e)))?;
        }
        Ok(Self {
            anchors: Arc::new(anchors),
            roots: Arc::new(roots),
        })
    }

    pub fn anchors(&self) -> &[CertificateDer<'static>] {
        &self.anchors
    }

    pub fn root_store(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }

    pub fn verifier(&self) -> FtpResult<Arc<WebPkiServerVerifier>> {
        WebPkiServerVerifier::builder_with_provider(
            self.root_store(),
            Arc::new(rustls::crypto::ring::default_provider()),
        )
        .build()
        .map_err(|e| FtpError::tls_material(format!("Cannot build certificate verifier: {}", e)))
    }

    /// Whether `end_entity` (plus intermediates) chains to one of our
    /// anchors and is valid for `server_name` right now.
    pub fn validates(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &str,
    ) -> bool {
        let Ok(verifier) = self.verifier() else {
            return false;
        };
        let Ok(name) = ServerName::try_from(server_name.to_string()) else {
            return false;
        };
        verifier
            .verify_server_cert(end_entity, intermediates, &name, &[], UnixTime::now())
            .is_ok()
    }
}

// ─── Key manager ─────────────────────────────────────────────────────

/// Client identity presented for mutual TLS.
#[derive(Debug)]
pub struct KeyManager {
    alias: Option<String>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Clone for KeyManager {
    fn clone(&self) -> Self {
        Self {
            alias: self.alias.clone(),
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl KeyManager {
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}
