//! Filedock client
//!
//! Every operation opens its own connection. The plain methods (`upload`,
//! `list`, `download`) never fail: errors go to the error log and the caller
//! gets `false`, an empty list or `None`. The `try_` variants return the
//! underlying [`Result`].

use crate::connection::Connection;
use crate::error::report;
use crate::protocol::{
    encode_length, split_file_list, validate_file_name, Command, Reply, COMMAND_BUFFER_SIZE,
    LIST_BUFFER_SIZE, TRANSFER_BUFFER_SIZE,
};
use crate::{Config, Error, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default deadline for socket operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Filedock client
#[derive(Debug, Clone)]
pub struct Client {
    server_addr: SocketAddr,
    temp_dir: PathBuf,
    timeout: Duration,
}

impl Client {
    /// Client for the server at `server_addr`, downloading into `temp_dir`
    pub fn new(server_addr: SocketAddr, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            server_addr,
            temp_dir: temp_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Client using the address, temp directory and deadline of `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.bind_addr, config.temp_dir.clone()).with_timeout(config.io_timeout())
    }

    /// Override the per-operation deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upload `local_path` under `name`
    ///
    /// Returns `true` once the whole send sequence completed and a response
    /// was read. The response text itself does not decide the result; a
    /// non-`FILE_RECEIVED` answer is logged as a warning.
    pub async fn upload(&self, local_path: &Path, name: &str) -> bool {
        match self.try_upload(local_path, name).await {
            Ok(Some(Reply::FileReceived)) => true,
            Ok(reply) => {
                warn!(
                    file = name,
                    response = reply.map_or("<unrecognized>", Reply::as_str),
                    "Server did not confirm upload"
                );
                true
            }
            Err(e) => {
                report(&format!("uploading {}", local_path.display()), &e);
                false
            }
        }
    }

    /// Upload `local_path` under `name` and return the server's reply
    ///
    /// `None` means the server answered with something that is not a reply
    /// literal.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFileName`] before connecting, [`Error::Io`] if the
    /// local file cannot be read, [`Error::Protocol`] if it is too large for
    /// the length prefix, and any connection error.
    pub async fn try_upload(&self, local_path: &Path, name: &str) -> Result<Option<Reply>> {
        validate_file_name(name)?;

        // Reading first fails fast on missing or locked files.
        let data = fs::read(local_path).await?;
        let prefix = encode_length(data.len() as u64)?;
        debug!(file = %local_path.display(), size = data.len(), "Sending file");

        let mut conn = self.connect().await?;
        conn.write_all(&Command::SendFile(name.to_string()).encode())
            .await?;
        conn.write_all(&prefix).await?;
        conn.write_all(&data).await?;
        info!(file = name, size = data.len(), "File sent to server");

        let response = conn.read_to_end_bounded(COMMAND_BUFFER_SIZE).await?;
        let reply = Reply::parse(&response);
        info!(
            response = %String::from_utf8_lossy(&response),
            "Server response"
        );
        Ok(reply)
    }

    /// Names in the server's store; empty on any failure
    pub async fn list(&self) -> Vec<String> {
        match self.try_list().await {
            Ok(names) => names,
            Err(e) => {
                report("retrieving file list", &e);
                Vec::new()
            }
        }
    }

    /// Names in the server's store
    ///
    /// Reads at most one list buffer of response.
    ///
    /// # Errors
    ///
    /// Connection errors, or [`Error::Protocol`] if the server answered `ERROR`.
    pub async fn try_list(&self) -> Result<Vec<String>> {
        let mut conn = self.connect().await?;
        conn.write_all(&Command::ListFiles.encode()).await?;

        let body = conn.read_to_end_bounded(LIST_BUFFER_SIZE).await?;
        if Reply::parse(&body) == Some(Reply::Error) {
            return Err(Error::Protocol("server failed to list files".to_string()));
        }

        let names = split_file_list(&String::from_utf8_lossy(&body));
        info!(count = names.len(), "Files retrieved from server");
        Ok(names)
    }

    /// Download `name` into the temp directory; `None` on any failure
    pub async fn download(&self, name: &str) -> Option<PathBuf> {
        match self.try_download(name).await {
            Ok(path) => Some(path),
            Err(e) => {
                report(&format!("retrieving {name}"), &e);
                None
            }
        }
    }

    /// Download `name` into the temp directory and return the local path
    ///
    /// The download is streamed into a hidden, uniquely named part file and renamed to
    /// `<temp_dir>/<name>` once the server closes the stream. A response that
    /// is exactly a reply literal is treated as the server's refusal.
    ///
    /// # Errors
    ///
    /// [`Error::FileNotFound`] if the server does not have `name`,
    /// [`Error::Protocol`] if it answered `ERROR`, and connection or local
    /// I/O errors.
    pub async fn try_download(&self, name: &str) -> Result<PathBuf> {
        validate_file_name(name)?;
        fs::create_dir_all(&self.temp_dir).await?;

        // fixed-length part name; `name` may already be at the file-name limit
        let part_path = self
            .temp_dir
            .join(format!(".{}.part", Uuid::new_v4().simple()));

        match self.receive_into(name, &part_path).await {
            Ok(()) => {
                let final_path = self.temp_dir.join(name);
                fs::rename(&part_path, &final_path).await?;
                Ok(final_path)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&part_path).await {
                    debug!(path = %part_path.display(), error = %cleanup, "Part file not removed");
                }
                Err(e)
            }
        }
    }

    async fn receive_into(&self, name: &str, part_path: &Path) -> Result<()> {
        let mut conn = self.connect().await?;
        conn.write_all(&Command::GetFile(name.to_string()).encode())
            .await?;

        let mut file = File::create(part_path).await?;
        let mut buf = vec![0u8; TRANSFER_BUFFER_SIZE];
        let mut head: Vec<u8> = Vec::with_capacity(Reply::max_len());
        let mut received: u64 = 0;

        loop {
            let n = conn.read_chunk(&mut buf).await?;
            if n == 0 {
                break;
            }
            if head.len() <= Reply::max_len() {
                let take = n.min(Reply::max_len() + 1 - head.len());
                head.extend_from_slice(&buf[..take]);
            }
            file.write_all(&buf[..n]).await?;
            received += n as u64;
        }
        file.flush().await?;

        match Reply::parse(&head) {
            Some(Reply::FileNotFound) => Err(Error::FileNotFound(name.to_string())),
            Some(Reply::Error | Reply::InvalidCommand) => Err(Error::Protocol(format!(
                "server refused download of {name}: {}",
                String::from_utf8_lossy(&head)
            ))),
            _ => {
                info!(file = name, size = received, "File received");
                Ok(())
            }
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let conn = Connection::connect(self.server_addr, self.timeout).await?;
        debug!(server = %self.server_addr, "Connected to server");
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.io_timeout_secs = 7;
        let client = Client::from_config(&config);
        assert_eq!(client.server_addr, config.bind_addr);
        assert_eq!(client.temp_dir, config.temp_dir);
        assert_eq!(client.timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_invalid_name_is_rejected_locally() {
        // nothing listens here; validation must fail before connecting
        let client = Client::new("127.0.0.1:9".parse().unwrap(), "unused");
        assert!(matches!(
            client.try_download("../secret").await,
            Err(Error::InvalidFileName(_))
        ));
        assert!(matches!(
            client.try_upload(Path::new("Cargo.toml"), "a/b").await,
            Err(Error::InvalidFileName(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let client = Client::new("127.0.0.1:9".parse().unwrap(), "unused");
        assert!(
            !client
                .upload(Path::new("/nonexistent/filedock/source.bin"), "source.bin")
                .await
        );
    }
}
