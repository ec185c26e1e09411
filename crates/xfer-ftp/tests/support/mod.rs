//! In-process FTP/FTPS server for integration tests.
//!
//! Keeps files in memory, supports the commands the client issues
//! (AUTH TLS, USER/PASS, PBSZ/PROT, TYPE, CWD, PASV, LIST, SIZE, RETR,
//! STOR, DELE, RNFR/RNTO, NOOP, QUIT) and records every command line.
//! The PASV reply announces an unroutable address on purpose: clients
//! must connect back to the control host.

#![allow(dead_code)]

use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ─── Certificates ────────────────────────────────────────────────────

/// A CA and a `localhost` / `127.0.0.1` certificate it issued. The leaf
/// serves both as server certificate and as client identity.
pub struct Pki {
    pub ca_der: Vec<u8>,
    pub ca_pem: String,
    pub leaf_der: Vec<u8>,
    pub leaf_pem: String,
    pub leaf_key_der: Vec<u8>,
    pub leaf_key_pem: String,
}

impl Pki {
    pub fn generate(ca_name: &str) -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new());
        ca_params.distinguished_name = DistinguishedName::new();
        ca_params.distinguished_name.push(DnType::CommonName, ca_name);
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

    /// The leaf key as an encrypted PKCS#8 block.
    pub fn encrypted_key_pem(&self, password: &str) -> String {
        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut iv);
        let params =
            pkcs8::pkcs5::pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, &salt, &iv).unwrap();
        let info = pkcs8::PrivateKeyInfo::try_from(self.leaf_key_der.as_slice()).unwrap();
        let doc = info.encrypt_with_params(params, password).unwrap();
        pem_block("ENCRYPTED PRIVATE KEY", doc.as_bytes())
    }

    /// Server TLS config; with `client_ca`, client certificates issued by
    /// it are required.
    pub fn server_config(&self, client_ca: Option<&Pki>) -> Arc<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .unwrap();
        let builder = match client_ca {
            Some(ca) => {
                let mut roots = RootCertStore::empty();
                roots.add(CertificateDer::from(ca.ca_der.clone())).unwrap();
                let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                    .build()
                    .unwrap();
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };
        let mut config = builder
            .with_single_cert(
                vec![CertificateDer::from(self.leaf_der.clone())],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key_der.clone())),
            )
            .unwrap();
        config.send_tls13_tickets = 0;
        Arc::new(config)
    }
}

pub fn pem_block(tag: &str, der: &[u8]) -> String {
    pem::encode(&pem::Pem::new(tag, der.to_vec()))
}

// ─── Server ──────────────────────────────────────────────────────────

pub struct ServerOptions {
    pub username: String,
    pub password: String,
    pub tls: Option<Arc<ServerConfig>>,
    /// Pause in the middle of every RETR. Control commands arriving during
    /// the pause are answered straight away.
    pub retr_pause: Duration,
    pub noop_reply: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            username: "batch".into(),
            password: "secret".into(),
            tls: None,
            retr_pause: Duration::ZERO,
            noop_reply: "200 NOOP ok.".into(),
        }
    }
}

struct Shared {
    options: ServerOptions,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    commands: Mutex<Vec<String>>,
}

pub struct TestServer {
    pub port: u16,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared {
            options,
            files: Mutex::new(BTreeMap::new()),
            commands: Mutex::new(Vec::new()),
        });
        let accept_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    if let Err(e) = session(sock, shared).await {
                        tracing::debug!("test server session ended: {}", e);
                    }
                });
            }
        });
        Self { port, shared, handle }
    }

    pub fn put_file(&self, name: &str, contents: &[u8]) {
        self.shared
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), contents.to_vec());
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.shared.files.lock().unwrap().get(name).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.shared.commands.lock().unwrap().clone()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.split(' ').next() == Some(verb))
            .count()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

type Control = BufReader<Box<dyn Io>>;

async fn reply(ctl: &mut Control, text: &str) -> std::io::Result<()> {
    let stream = ctl.get_mut();
    stream.write_all(format!("{}\r\n", text).as_bytes()).await?;
    stream.flush().await
}

async fn session(sock: TcpStream, shared: Arc<Shared>) -> std::io::Result<()> {
    let mut ctl: Control = BufReader::new(Box::new(sock));
    reply(&mut ctl, "220 xfer-ftp test server ready").await?;

    let mut user: Option<String> = None;
    let mut protected = false;
    let mut passive: Option<TcpListener> = None;
    let mut rename_from: Option<String> = None;

    loop {
        let mut line = String::new();
        if ctl.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end().to_string();
        shared.commands.lock().unwrap().push(line.clone());
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.trim().to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };

        match verb.as_str() {
            "AUTH" => match shared.options.tls {
                Some(ref config) => {
                    reply(&mut ctl, "234 Proceed with negotiation.").await?;
                    let plain = ctl.into_inner();
                    let tls = TlsAcceptor::from(Arc::clone(config)).accept(plain).await?;
                    ctl = BufReader::new(Box::new(tls));
                }
                None => reply(&mut ctl, "502 TLS not available").await?,
            },
            "USER" => {
                user = Some(arg);
                reply(&mut ctl, "331 Please specify the password.").await?;
            }
            "PASS" => {
                if user.as_deref() == Some(shared.options.username.as_str())
                    && arg == shared.options.password
                {
                    reply(&mut ctl, "230 Login successful.").await?;
                } else {
                    reply(&mut ctl, "530 Login incorrect.").await?;
                }
            }
            "PBSZ" => reply(&mut ctl, "200 PBSZ=0").await?,
            "PROT" => {
                protected = arg.eq_ignore_ascii_case("P");
                reply(&mut ctl, "200 Protection level set.").await?;
            }
            "TYPE" => reply(&mut ctl, "200 Type set.").await?,
            "CWD" => {
                if arg.contains("missing") {
                    reply(&mut ctl, "550 Failed to change directory.").await?;
                } else {
                    reply(&mut ctl, "250 Directory successfully changed.").await?;
                }
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                reply(
                    &mut ctl,
                    &format!("227 Entering Passive Mode (10,255,255,1,{},{}).", port / 256, port % 256),
                )
                .await?;
            }
            "NOOP" => reply(&mut ctl, &shared.options.noop_reply).await?,
            "SIZE" => {
                let size = shared.files.lock().unwrap().get(&arg).map(Vec::len);
                match size {
                    Some(n) => reply(&mut ctl, &format!("213 {}", n)).await?,
                    None => reply(&mut ctl, "550 Could not get file size.").await?,
                }
            }
            "LIST" => {
                let target = arg.trim_start_matches("-a").trim().to_string();
                let listing = {
                    let files = shared.files.lock().unwrap();
                    let mut out = String::new();
                    if target.is_empty() {
                        out.push_str("drwxr-xr-x    2 ftp      ftp          4096 Jan 01 12:00 archive\r\n");
                    }
                    for (name, data) in files.iter() {
                        if target.is_empty() || *name == target {
                            out.push_str(&format!(
                                "-rw-r--r--    1 ftp      ftp      {:>8} Jan 01 12:00 {}\r\n",
                                data.len(),
                                name
                            ));
                        }
                    }
                    out
                };
                send_data(&mut ctl, &mut passive, &shared, protected, listing.as_bytes(), Duration::ZERO)
                    .await?;
            }
            "RETR" => {
                let data = shared.files.lock().unwrap().get(&arg).cloned();
                match data {
                    Some(data) => {
                        let pause = shared.options.retr_pause;
                        send_data(&mut ctl, &mut passive, &shared, protected, &data, pause).await?;
                    }
                    None => {
                        passive = None;
                        reply(&mut ctl, "550 No such file or directory.").await?;
                    }
                }
            }
            "STOR" => {
                reply(&mut ctl, "150 Ok to send data.").await?;
                let mut stream = accept_data(&mut passive, &shared, protected).await?;
                let mut body = Vec::new();
                stream.read_to_end(&mut body).await?;
                drop(stream);
                shared.files.lock().unwrap().insert(arg, body);
                reply(&mut ctl, "226 Transfer complete.").await?;
            }
            "DELE" => {
                let removed = shared.files.lock().unwrap().remove(&arg).is_some();
                if removed {
                    reply(&mut ctl, "250 Delete operation successful.").await?;
                } else {
                    reply(&mut ctl, "550 Delete operation failed.").await?;
                }
            }
            "RNFR" => {
                let exists = shared.files.lock().unwrap().contains_key(&arg);
                if exists {
                    rename_from = Some(arg);
                    reply(&mut ctl, "350 Ready for RNTO.").await?;
                } else {
                    reply(&mut ctl, "550 RNFR command failed.").await?;
                }
            }
            "RNTO" => {
                let moved = rename_from.take().and_then(|from| {
                    let mut files = shared.files.lock().unwrap();
                    let data = files.remove(&from)?;
                    files.insert(arg, data);
                    Some(())
                });
                match moved {
                    Some(()) => reply(&mut ctl, "250 Rename successful.").await?,
                    None => reply(&mut ctl, "503 RNFR required first.").await?,
                }
            }
            "QUIT" => {
                reply(&mut ctl, "221 Goodbye.").await?;
                ctl.get_mut().shutdown().await.ok();
                return Ok(());
            }
            _ => reply(&mut ctl, "502 Command not implemented.").await?,
        }
    }
}

async fn accept_data(
    passive: &mut Option<TcpListener>,
    shared: &Shared,
    protected: bool,
) -> std::io::Result<Box<dyn Io>> {
    let listener = passive
        .take()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "no PASV"))?;
    let (sock, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "data accept"))??;
    match (protected, shared.options.tls.as_ref()) {
        (true, Some(config)) => {
            let tls = TlsAcceptor::from(Arc::clone(config)).accept(sock).await?;
            Ok(Box::new(tls))
        }
        _ => Ok(Box::new(sock)),
    }
}

async fn send_data(
    ctl: &mut Control,
    passive: &mut Option<TcpListener>,
    shared: &Shared,
    protected: bool,
    body: &[u8],
    pause: Duration,
) -> std::io::Result<()> {
    reply(ctl, "150 Opening data connection.").await?;
    let mut stream = accept_data(passive, shared, protected).await?;
    let half = body.len() / 2;
    stream.write_all(&body[..half]).await?;
    stream.flush().await?;
    if !pause.is_zero() {
        answer_during_pause(ctl, shared, pause).await?;
    }
    stream.write_all(&body[half..]).await?;
    stream.shutdown().await?;
    drop(stream);
    reply(ctl, "226 Transfer complete.").await
}

async fn answer_during_pause(ctl: &mut Control, shared: &Shared, pause: Duration) -> std::io::Result<()> {
    let deadline = tokio::time::sleep(pause);
    tokio::pin!(deadline);
    let mut line = String::new();
    loop {
        tokio::select! {
            _ = &mut deadline => return Ok(()),
            read = ctl.read_line(&mut line) => {
                if read? == 0 {
                    return Ok(());
                }
                let command = line.trim_end().to_string();
                line.clear();
                shared.commands.lock().unwrap().push(command.clone());
                if command.eq_ignore_ascii_case("NOOP") {
                    reply(ctl, &shared.options.noop_reply).await?;
                } else {
                    reply(ctl, "503 Transfer in progress.").await?;
                }
            }
        }
    }
}
