//! File-transfer facade used by batch jobs: connect through the factory,
//! then one call per remote or local file operation.
//!
//! Remote failures come back as [`FtpError`] carrying the correlation id and
//! the server the client is bound to. Every operation logs its duration at
//! debug level.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::factory::{ConnectedClient, ConnectionFactory};
use crate::ftp::material::KeyStoreCache;
use crate::ftp::types::{has_text, ConnectionConfig};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;

pub type FtpConnection = ConnectedClient<FtpClient>;

pub struct FileTransferService {
    factory: ConnectionFactory,
}

impl FileTransferService {
    pub fn new(cache: Arc<KeyStoreCache>) -> Self {
        Self::with_factory(ConnectionFactory::new(cache))
    }

    pub fn with_factory(factory: ConnectionFactory) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    // ─── Connection lifecycle ────────────────────────────────────

    /// Connect, then make sure the local working directory exists.
    pub async fn connected_client(
        &self,
        correlation_id: &str,
        config: &ConnectionConfig,
    ) -> FtpResult<FtpConnection> {
        tracing::info!("CorrelationId: {} Initializing FTP client...", correlation_id);
        let client = self.factory.connect(config, correlation_id).await?;
        tracing::info!("CorrelationId: {} FTP Client connected to server.", correlation_id);

        if has_text(&config.local_working_dir) {
            let dir = config.local_working_dir.as_deref().unwrap_or_default();
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                let server = client.server().to_string();
                client.disconnect().await;
                return Err(FtpError::io_error(format!(
                    "Cannot create local working directory {}: {}",
                    dir, e
                ))
                .with_correlation(correlation_id)
                .with_server(server));
            }
        }
        Ok(client)
    }

    pub async fn disconnect_client(&self, client: FtpConnection) {
        self.factory.disconnect(client).await
    }

    // ─── Remote operations ───────────────────────────────────────

    /// Names of the regular files in the remote working directory.
    pub async fn remote_file_names(&self, client: &mut FtpConnection) -> FtpResult<BTreeSet<String>> {
        let correlation_id = client.correlation_id().to_string();
        tracing::info!(
            "CorrelationId: {} Reading a list of files from the FTP server",
            correlation_id
        );
        let entries = client
            .list_files(None)
            .await
            .map_err(|e| failure(e, client, "Remote directory file listing failed"))?;
        let names: BTreeSet<String> = entries
            .into_iter()
            .filter(|e| e.is_file())
            .map(|e| e.name)
            .collect();

        if names.is_empty() {
            tracing::info!("CorrelationId: {} No files to transfer", correlation_id);
        } else {
            let mut msg = format!(
                "CorrelationId: {} : FTP Client found the following files on the server:",
                correlation_id
            );
            for name in &names {
                msg.push_str("\n --> ");
                msg.push_str(name);
            }
            tracing::info!("{}", msg);
        }
        Ok(names)
    }

    /// Size of one remote file, taken from its listing entry.
    pub async fn remote_file_size(&self, client: &mut FtpConnection, file_name: &str) -> FtpResult<u64> {
        tracing::info!(
            "CorrelationId: {} Getting remote file size {}",
            client.correlation_id(),
            file_name
        );
        let started = Instant::now();
        let entries = client
            .list_files(Some(file_name))
            .await
            .map_err(|e| failure(e, client, &format!("Failed to read remote file size of {}", file_name)))?;
        let [entry] = entries.as_slice() else {
            return Err(failure(
                FtpError::not_found(format!("{} listing entries", entries.len())),
                client,
                &format!("Failed to read remote file {} to get file size", file_name),
            ));
        };
        tracing::debug!(
            "CorrelationId: {} Took [{}] milliseconds to get file size for {} result {}",
            client.correlation_id(),
            started.elapsed().as_millis(),
            file_name,
            entry.size
        );
        Ok(entry.size)
    }

    pub async fn assert_remote_file_exists(&self, client: &mut FtpConnection, file_name: &str) -> FtpResult<()> {
        tracing::info!(
            "CorrelationId: {} Checking if remote file {} exists",
            client.correlation_id(),
            file_name
        );
        let entries = client
            .list_files(Some(file_name))
            .await
            .map_err(|e| failure(e, client, &format!("Failed to check if remote file {} exists", file_name)))?;
        if entries.is_empty() {
            return Err(failure(
                FtpError::not_found("empty listing"),
                client,
                &format!("Remote file {} does not exist", file_name),
            ));
        }
        Ok(())
    }

    /// Download `file_name` from the remote working directory into `local_dir`.
    pub async fn download_file(
        &self,
        client: &mut FtpConnection,
        local_dir: impl AsRef<Path>,
        file_name: &str,
    ) -> FtpResult<u64> {
        tracing::info!(
            "CorrelationId: {} Transferring the file {}",
            client.correlation_id(),
            file_name
        );
        let started = Instant::now();
        let local_path = local_file_path(local_dir.as_ref(), file_name)
            .map_err(|e| failure(e, client, "Refusing download"))?;
        tracing::debug!(
            "CorrelationId: {} Opening output stream to {}",
            client.correlation_id(),
            local_path.display()
        );
        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|e| failure(e.into(), client, &format!("Cannot create {}", local_path.display())))?;
        let bytes = client
            .retrieve_file(file_name, &mut file)
            .await
            .map_err(|e| failure(e, client, &format!("File download error for {}", file_name)))?;
        file.flush()
            .await
            .map_err(|e| failure(e.into(), client, &format!("Cannot flush {}", local_path.display())))?;

        tracing::debug!(
            "CorrelationId: {} Took [{}] milliseconds to download the file {} ({} bytes)",
            client.correlation_id(),
            started.elapsed().as_millis(),
            file_name,
            bytes
        );
        Ok(bytes)
    }

    /// Upload `local_dir/file_name` to the remote working directory.
    pub async fn upload_file(
        &self,
        client: &mut FtpConnection,
        local_dir: impl AsRef<Path>,
        file_name: &str,
    ) -> FtpResult<u64> {
        tracing::info!(
            "CorrelationId: {} Transferring the file {}",
            client.correlation_id(),
            file_name
        );
        let started = Instant::now();
        let local_path = local_file_path(local_dir.as_ref(), file_name)
            .map_err(|e| failure(e, client, "Refusing upload"))?;
        tracing::debug!(
            "CorrelationId: {} Opening input stream from {}",
            client.correlation_id(),
            local_path.display()
        );
        let mut file = tokio::fs::File::open(&local_path)
            .await
            .map_err(|e| failure(e.into(), client, &format!("Cannot open {}", local_path.display())))?;
        let bytes = client
            .store_file(file_name, &mut file)
            .await
            .map_err(|e| failure(e, client, &format!("File upload error for {}", file_name)))?;

        tracing::debug!(
            "CorrelationId: {} Took [{}] milliseconds to upload the file {} ({} bytes)",
            client.correlation_id(),
            started.elapsed().as_millis(),
            file_name,
            bytes
        );
        Ok(bytes)
    }

    pub async fn move_remote_file(&self, client: &mut FtpConnection, from: &str, to: &str) -> FtpResult<()> {
        tracing::info!(
            "CorrelationId: {} Moving remote file {} to {}",
            client.correlation_id(),
            from,
            to
        );
        let started = Instant::now();
        client
            .rename(from, to)
            .await
            .map_err(|e| failure(e, client, &format!("File move failed for {}", from)))?;
        tracing::debug!(
            "CorrelationId: {} Took [{}] milliseconds to move file {} to {}",
            client.correlation_id(),
            started.elapsed().as_millis(),
            from,
            to
        );
        Ok(())
    }

    pub async fn delete_remote_file(&self, client: &mut FtpConnection, file_name: &str) -> FtpResult<()> {
        tracing::info!(
            "CorrelationId: {} Deleting remote file {}",
            client.correlation_id(),
            file_name
        );
        client
            .delete_file(file_name)
            .await
            .map_err(|e| failure(e, client, &format!("Failed to delete remote file {}", file_name)))
    }

    // ─── Local helpers ───────────────────────────────────────────

    /// Names of the regular files directly inside `dir`.
    pub async fn local_file_names(&self, dir: impl AsRef<Path>) -> FtpResult<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    pub async fn create_local_directory(&self, correlation_id: &str, dir: impl AsRef<Path>) -> FtpResult<()> {
        let dir = dir.as_ref();
        tracing::info!(
            "CorrelationId: {} About to create local directory {}.",
            correlation_id,
            dir.display()
        );
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            FtpError::io_error(format!("Failed to create directory {}: {}", dir.display(), e))
                .with_correlation(correlation_id)
        })?;
        tracing::info!(
            "CorrelationId: {} Local directory {} created.",
            correlation_id,
            dir.display()
        );
        Ok(())
    }

    /// Remove an empty local directory. Failures are logged, not returned.
    pub async fn delete_local_directory(&self, correlation_id: &str, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        tracing::info!(
            "CorrelationId: {} About to delete local directory {}.",
            correlation_id,
            dir.display()
        );
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => tracing::info!(
                "CorrelationId: {} Local directory {} deleted.",
                correlation_id,
                dir.display()
            ),
            Err(e) => tracing::error!(
                "CorrelationId: {} Failed to delete {} directory: {}",
                correlation_id,
                dir.display(),
                e
            ),
        }
    }

    pub async fn delete_local_file(&self, correlation_id: &str, path: impl AsRef<Path>) -> FtpResult<()> {
        let path = path.as_ref();
        tracing::info!(
            "CorrelationId: {} About to delete local file {}",
            correlation_id,
            path.display()
        );
        tokio::fs::remove_file(path).await.map_err(|e| {
            let e = FtpError::from(e);
            FtpError::new(
                e.kind,
                format!("Error deleting local file {}: {}", path.display(), e.message),
            )
            .with_correlation(correlation_id)
        })?;
        tracing::info!(
            "CorrelationId: {} Local file {} deleted.",
            correlation_id,
            path.display()
        );
        Ok(())
    }
}

/// Prefix `what` and attach the client's correlation id and server.
/// `local_dir/file_name`, where `file_name` must be a single plain path
/// component. Remote listings are not trusted to stay inside `local_dir`.
fn local_file_path(local_dir: &Path, file_name: &str) -> FtpResult<PathBuf> {
    let mut components = Path::new(file_name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || file_name.contains(['/', '\\']) {
        return Err(FtpError::new(
            FtpErrorKind::PermissionDenied,
            format!("'{}' is not a plain file name", file_name),
        ));
    }
    Ok(local_dir.join(file_name))
}

fn failure(e: FtpError, client: &FtpConnection, what: &str) -> FtpError {
    let mut err = FtpError::new(e.kind, format!("{}: {}", what, e.message))
        .with_correlation(client.correlation_id())
        .with_server(client.server());
    err.code = e.code;
    err
}
