//! Certificate fixtures for unit tests.

use pkcs8::pkcs5::pbes2;
use pkcs8::PrivateKeyInfo;
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, SanType,
};
use std::net::{IpAddr, Ipv4Addr};

/// A throwaway CA and one leaf it issued for `localhost` / `127.0.0.1`.
pub(crate) struct TestPki {
    pub ca_der: Vec<u8>,
    pub ca_pem: String,
    pub leaf_der: Vec<u8>,
    pub leaf_pem: String,
    pub leaf_key_der: Vec<u8>,
    pub leaf_key_pem: String,
}

impl TestPki {
    pub fn generate() -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new());
        ca_params.distinguished_name = DistinguishedName::new();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "xfer-ftp test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = Certificate::from_params(ca_params).unwrap();

        let mut leaf_params = CertificateParams::new(Vec::<String>::new());
        leaf_params.distinguished_name = DistinguishedName::new();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        leaf_params.subject_alt_names = vec![
            SanType::DnsName("localhost".into()),
            SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ];
        let leaf = Certificate::from_params(leaf_params).unwrap();

        // Signatures are randomised, so serialise each certificate once.
        let ca_der = ca.serialize_der().unwrap();
        let leaf_der = leaf.serialize_der_with_signer(&ca).unwrap();
        let leaf_key_der = leaf.serialize_private_key_der();

        Self {
            ca_pem: pem_block("CERTIFICATE", &ca_der),
            leaf_pem: pem_block("CERTIFICATE", &leaf_der),
            leaf_key_pem: pem_block("PRIVATE KEY", &leaf_key_der),
            ca_der,
            leaf_der,
            leaf_key_der,
        }
    }

    /// The leaf key as a PBES2 (PBKDF2-SHA256 / AES-256-CBC) PKCS#8 block.
    pub fn encrypted_key_pem(&self, password: &str) -> String {
        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut iv);
        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, &salt, &iv).unwrap();
        let info = PrivateKeyInfo::try_from(self.leaf_key_der.as_slice()).unwrap();
        let doc = info.encrypt_with_params(params, password).unwrap();
        pem_block("ENCRYPTED PRIVATE KEY", doc.as_bytes())
    }

    /// Re-encode a single PEM block with an `Alias:` header.
    pub fn with_alias(pem_text: &str, alias: &str) -> String {
        let mut block = pem::parse(pem_text).unwrap();
        block.headers_mut().add("Alias", alias).unwrap();
        pem::encode(&block)
    }
}

fn pem_block(tag: &str, der: &[u8]) -> String {
    pem::encode(&pem::Pem::new(tag, der.to_vec()))
}

/// Control-channel-only FTP server: sends `banner`, then answers each
/// received command with the next reply in `replies`. Resolves to the
/// commands it received once the client hangs up or the script runs out.
pub(crate) async fn scripted_control(
    banner: &'static str,
    replies: Vec<&'static str>,
) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        let mut sock = BufReader::new(sock);
        sock.get_mut()
            .write_all(format!("{}\r\n", banner).as_bytes())
            .await
            .unwrap();
        let mut received = Vec::new();
        for reply in replies {
            let mut line = String::new();
            if sock.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            received.push(line.trim_end().to_string());
            sock.get_mut()
                .write_all(format!("{}\r\n", reply).as_bytes())
                .await
                .unwrap();
        }
        received
    });
    (port, handle)
}
