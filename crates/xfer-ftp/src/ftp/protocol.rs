//! Control-channel command/response codec (RFC 959 §4).
//!
//! Commands go out terminated with `\r\n`; replies are read as single- or
//! multi-line responses and parsed into an [`FtpResponse`].

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FtpResponse;
use std::borrow::Cow;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// A TCP stream that may have been upgraded to TLS.
pub enum NetStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl NetStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, NetStream::Tls(_))
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_flush(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// The FTP command/response codec over one control connection.
pub struct FtpCodec {
    stream: BufReader<NetStream>,
}

impl FtpCodec {
    pub fn new(stream: NetStream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        Self::new(NetStream::Plain(stream))
    }

    pub fn is_tls(&self) -> bool {
        self.stream.get_ref().is_tls()
    }

    /// Give back the underlying stream; fails if unread reply bytes are
    /// still buffered.
    pub fn into_stream(self) -> FtpResult<NetStream> {
        if !self.stream.buffer().is_empty() {
            return Err(FtpError::protocol_error(
                "Unexpected data buffered on the control channel",
            ));
        }
        Ok(self.stream.into_inner())
    }

    /// Send a raw FTP command (without trailing CRLF, which is added here).
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        tracing::trace!(">>> {}", redact(cmd));
        Ok(())
    }

    async fn read_line_raw(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        let n = self.stream.read_line(&mut buf).await?;
        if n == 0 {
            return Err(FtpError::disconnected("Server closed connection"));
        }
        Ok(buf)
    }

    /// Read a complete reply, following `NNN-` continuation lines until the
    /// matching `NNN ` terminator.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line_raw().await?;
        let first = first.trim_end_matches(['\r', '\n']);
        let code = parse_code(first)?;
        let mut lines = vec![first.to_string()];

        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let next = self.read_line_raw().await?;
                let next = next.trim_end_matches(['\r', '\n']);
                lines.push(next.to_string());
                if next.starts_with(&terminator) || next == terminator.trim_end() {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        tracing::trace!(
            "<<< {}",
            resp.lines.last().map(String::as_str).unwrap_or_default()
        );
        Ok(resp)
    }

    /// `read_response` bounded by `limit`.
    pub async fn read_response_within(&mut self, limit: Duration) -> FtpResult<FtpResponse> {
        tokio::time::timeout(limit, self.read_response())
            .await
            .map_err(|_| FtpError::timeout(format!("No reply within {:?}", limit)))?
    }

    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Send a command and require a reply in the given class (1-5).
    pub async fn expect(&mut self, cmd: &str, expected_first_digit: u16) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if resp.code / 100 != expected_first_digit {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    /// Expect a 2xx reply.
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.expect(cmd, 2).await
    }

    pub async fn shutdown(&mut self) -> FtpResult<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

fn parse_code(line: &str) -> FtpResult<u16> {
    line.get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| FtpError::protocol_error(format!("Invalid reply: '{}'", line)))
}

/// Hide the password in logged `PASS` commands.
fn redact(cmd: &str) -> Cow<'_, str> {
    match cmd.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("PASS ") => Cow::Borrowed("PASS ****"),
        _ => Cow::Borrowed(cmd),
    }
}
