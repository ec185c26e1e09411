//! One-shot file operations on a connected [`FtpClient`]: list, size,
//! retrieve, store, delete, rename and NOOP.
//!
//! While a transfer runs, a NOOP is sent on the control channel every
//! keep-alive interval; the replies are collected once the transfer's own
//! completion reply has arrived.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::listing;
use crate::ftp::protocol::NetStream;
use crate::ftp::types::FtpEntry;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval_at, timeout, Duration, Instant};

/// Chunk size for streaming transfers (64 KiB).
const CHUNK: usize = 65_536;

/// Replies that end a transfer command. Anything else read while NOOPs
/// are outstanding answers one of them, whatever its code.
fn is_transfer_reply(code: u16) -> bool {
    matches!(code, 226 | 250 | 425 | 426 | 450 | 451 | 452 | 532 | 550..=553)
}

impl FtpClient {
    /// Directory listing via `LIST`. Hidden entries are requested with
    /// `-a` only when hidden-file listing is enabled.
    pub async fn list_files(&mut self, path: Option<&str>) -> FtpResult<Vec<FtpEntry>> {
        let mut cmd = String::from("LIST");
        if self.lists_hidden_files() {
            cmd.push_str(" -a");
        }
        if let Some(p) = path.filter(|p| !p.is_empty()) {
            cmd.push(' ');
            cmd.push_str(p);
        }

        let mut body = Vec::new();
        self.retrieve_into(&cmd, &mut body).await?;
        let text = String::from_utf8_lossy(&body);
        Ok(listing::parse_listing(&text))
    }

    /// Size of a remote file (RFC 3659 `SIZE`).
    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        let resp = self.codec_mut()?.expect_ok(&format!("SIZE {}", path)).await?;
        let text = resp.text();
        text.split_whitespace()
            .nth(1)
            .and_then(|n| n.trim().parse::<u64>().ok())
            .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse SIZE: {}", text)))
    }

    /// Download `remote_path` into `writer`; returns the byte count.
    pub async fn retrieve_file<W>(&mut self, remote_path: &str, writer: &mut W) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.retrieve_into(&format!("RETR {}", remote_path), writer)
            .await
    }

    /// Upload everything `reader` yields to `remote_path`.
    pub async fn store_file<R>(&mut self, remote_path: &str, reader: &mut R) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let Some(mut data) = self.begin_transfer(&format!("STOR {}", remote_path)).await? else {
            return Ok(0);
        };
        let (bytes, outstanding) = self.pump(reader, &mut data).await?;
        // The server only completes the upload once the data channel closes.
        data.shutdown().await?;
        drop(data);
        self.finish_transfer(outstanding).await?;
        Ok(bytes)
    }

    pub async fn delete_file(&mut self, path: &str) -> FtpResult<()> {
        self.codec_mut()?.expect_ok(&format!("DELE {}", path)).await?;
        Ok(())
    }

    /// `RNFR` + `RNTO`.
    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let codec = self.codec_mut()?;
        codec.expect(&format!("RNFR {}", from), 3).await?;
        codec.expect_ok(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    pub async fn noop(&mut self) -> FtpResult<()> {
        self.codec_mut()?.expect_ok("NOOP").await?;
        Ok(())
    }

    // ─── Transfer plumbing ───────────────────────────────────────

    async fn retrieve_into<W>(&mut self, cmd: &str, writer: &mut W) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let Some(mut data) = self.begin_transfer(cmd).await? else {
            return Ok(0);
        };
        let (bytes, outstanding) = self.pump(&mut data, writer).await?;
        drop(data);
        self.finish_transfer(outstanding).await?;
        Ok(bytes)
    }

    /// Open the data channel and send `cmd`. `None` when the server
    /// completed the command without using the data channel.
    async fn begin_transfer(&mut self, cmd: &str) -> FtpResult<Option<NetStream>> {
        let pending = self.open_data_channel().await?;
        let resp = self.codec_mut()?.execute(cmd).await?;
        if resp.is_preliminary() {
            Ok(Some(pending.establish().await?))
        } else if resp.is_completion() {
            Ok(None)
        } else {
            Err(FtpError::from_reply(resp.code, &resp.text()))
        }
    }

    /// Copy `reader` to `writer`, sending keep-alive NOOPs on the control
    /// channel. Returns bytes copied and NOOPs still awaiting a reply.
    async fn pump<R, W>(&mut self, reader: &mut R, writer: &mut W) -> FtpResult<(u64, u32)>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let every = self.settings().keep_alive_interval;
        let keep_alive = !every.is_zero();
        let period = if keep_alive { every } else { Duration::from_secs(3600) };
        let mut ticker = interval_at(Instant::now() + period, period);
        let data_timeout = self.data_timeout();

        let mut buf = vec![0u8; CHUNK];
        let mut total = 0u64;
        let mut outstanding = 0u32;
        loop {
            tokio::select! {
                read = timeout(data_timeout, reader.read(&mut buf)) => {
                    let n = read.map_err(|_| {
                        FtpError::timeout(format!("No data for {:?}", data_timeout))
                    })??;
                    if n == 0 {
                        break;
                    }
                    writer.write_all(&buf[..n]).await?;
                    total += n as u64;
                }
                _ = ticker.tick(), if keep_alive => {
                    self.codec_mut()?.send_command("NOOP").await?;
                    outstanding += 1;
                }
            }
        }
        writer.flush().await?;
        Ok((total, outstanding))
    }

    /// Read the transfer's completion reply, then drain NOOP replies.
    async fn finish_transfer(&mut self, outstanding: u32) -> FtpResult<()> {
        let reply_timeout = self.settings().keep_alive_reply_timeout;
        let data_timeout = self.data_timeout();
        let codec = self.codec_mut()?;
        let mut outstanding = outstanding;

        let done = loop {
            let resp = codec.read_response_within(data_timeout).await?;
            if outstanding > 0 && !is_transfer_reply(resp.code) {
                outstanding -= 1;
                continue;
            }
            break resp;
        };

        while outstanding > 0 {
            match codec.read_response_within(reply_timeout).await {
                Ok(_) => outstanding -= 1,
                Err(e) if e.kind == FtpErrorKind::Timeout => {
                    tracing::warn!("{} keep-alive replies not received", outstanding);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if !done.is_completion() {
            return Err(FtpError::from_reply(done.code, &done.text()));
        }
        Ok(())
    }
}
