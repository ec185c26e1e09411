//! Passive-mode data channel (RFC 959 `PASV`).
//!
//! The data socket is TLS-wrapped when the session negotiated `PROT P`,
//! once the server has accepted the transfer command.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{FtpCodec, NetStream};
use crate::ftp::tls;
use regex::Regex;
use rustls::ClientConfig;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// How to reach the data port announced by `PASV`.
#[derive(Debug, Clone)]
pub struct PassiveTarget<'a> {
    /// Control-connection host.
    pub host: &'a str,
    /// Connect to `host` instead of the address in the 227 reply.
    pub skip_reply_address: bool,
    /// When the reply address is used, replace a private or unspecified
    /// one with `host`.
    pub nat_workaround: bool,
    pub data_timeout: Duration,
    /// `Some` when the data channel must be protected.
    pub tls: Option<Arc<ClientConfig>>,
}

/// A connected, not yet protected, data socket.
///
/// FTPS servers only start the data-channel handshake once they have seen
/// the transfer command, so protection is applied in [`establish`](Self::establish)
/// after the preliminary reply.
#[derive(Debug)]
pub struct PendingData {
    tcp: TcpStream,
    host: String,
    data_timeout: Duration,
    tls: Option<Arc<ClientConfig>>,
}

impl PendingData {
    pub fn is_protected(&self) -> bool {
        self.tls.is_some()
    }

    /// Finish the data channel, running the TLS handshake under `PROT P`.
    pub async fn establish(self) -> FtpResult<NetStream> {
        match self.tls {
            Some(config) => {
                let tls = timeout(
                    self.data_timeout,
                    tls::wrap_data_stream(self.tcp, &self.host, config),
                )
                .await
                .map_err(|_| FtpError::data_channel("Data channel TLS handshake timed out"))??;
                Ok(NetStream::Tls(Box::new(tls)))
            }
            None => Ok(NetStream::Plain(self.tcp)),
        }
    }
}

/// Issue `PASV` and connect to the announced port.
pub async fn open_passive(codec: &mut FtpCodec, target: PassiveTarget<'_>) -> FtpResult<PendingData> {
    let resp = codec.expect_ok("PASV").await?;
    let announced = parse_pasv_response(&resp.text())?;

    let data_host = data_host(&target, announced.ip());
    let tcp = connect_within(target.data_timeout, (data_host.as_str(), announced.port())).await?;
    tcp.set_nodelay(true).ok();

    Ok(PendingData {
        tcp,
        host: target.host.to_string(),
        data_timeout: target.data_timeout,
        tls: target.tls,
    })
}

/// Host to open the data connection to.
fn data_host(target: &PassiveTarget<'_>, announced: IpAddr) -> String {
    let behind_nat = match announced {
        IpAddr::V4(ip) => ip.is_private() || ip.is_link_local() || ip.is_unspecified(),
        IpAddr::V6(ip) => ip.is_unspecified(),
    };
    if target.skip_reply_address || (target.nat_workaround && behind_nat) {
        target.host.to_string()
    } else {
        announced.to_string()
    }
}

async fn connect_within<A>(limit: Duration, addr: A) -> FtpResult<TcpStream>
where
    A: tokio::net::ToSocketAddrs + std::fmt::Debug + Copy,
{
    timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| FtpError::data_channel(format!("PASV data connect to {:?} timed out", addr)))?
        .map_err(|e| FtpError::data_channel(format!("PASV data connect to {:?}: {}", addr, e)))
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 reply.
pub fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let re = Regex::new(r"(\d+),\s*(\d+),\s*(\d+),\s*(\d+),\s*(\d+),\s*(\d+)")
        .map_err(|e| FtpError::protocol_error(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let nums = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}
