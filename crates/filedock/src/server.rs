//! Filedock server
//!
//! Owns the listener and the cancellation token. The accept loop hands every
//! connection to its own task and never waits for a handler; stopping cancels
//! the loop and drops the listener immediately. Handlers that are already
//! running see the cancellation at their next read.

use crate::connection::Connection;
use crate::error::report;
use crate::handler::{handle_connection, HandlerContext};
use crate::store::FileStore;
use crate::{Config, Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No listener bound
    Stopped,
    /// Accepting connections
    Listening,
}

/// Filedock server instance
#[derive(Debug)]
pub struct Server {
    config: Config,
    store: FileStore,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Create a stopped server and open its store
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for invalid configuration, [`Error::Io`] if the
    /// storage directory cannot be created.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = FileStore::open(&config.storage_dir).await?;

        Ok(Self {
            config,
            store,
            cancel: CancellationToken::new(),
            accept_task: None,
            local_addr: None,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        if self.accept_task.is_some() {
            ServerState::Listening
        } else {
            ServerState::Stopped
        }
    }

    /// Bound address while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Store served by this instance
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Bind the configured address and start accepting
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if already listening, [`Error::Io`] if binding fails.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.accept_task.is_some() {
            return Err(Error::Config("server is already listening".to_string()));
        }

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;

        self.cancel = CancellationToken::new();
        let ctx = HandlerContext {
            store: self.store.clone(),
            lock_timeout: self.config.io_timeout(),
            max_upload_bytes: self.config.max_upload_bytes,
        };

        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            ctx,
            self.config.io_timeout(),
            self.cancel.clone(),
        )));
        self.local_addr = Some(addr);

        info!(
            event = "server_listening",
            address = %addr,
            storage_dir = %self.store.root().display(),
            "Server started, waiting for connections"
        );
        Ok(addr)
    }

    /// Cancel the accept loop and release the listener
    ///
    /// Does nothing when already stopped.
    pub async fn stop(&mut self) {
        let Some(task) = self.accept_task.take() else {
            return;
        };

        self.cancel.cancel();
        if let Err(e) = task.await {
            error!(error = %e, "Accept loop terminated abnormally");
        }
        self.local_addr = None;

        info!(event = "server_stopped", "Server stopped");
    }

    /// Listen until `shutdown` resolves, then stop
    ///
    /// # Errors
    ///
    /// Errors from [`Server::start`].
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await;
        Ok(())
    }
}

impl Drop for Server {
    /// A server dropped while listening still releases its port.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: HandlerContext,
    io_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Accept loop cancelled");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "Client connected");
                    let conn = Connection::new(stream, peer, io_timeout, cancel.child_token());
                    tokio::spawn(handle_connection(conn, ctx.clone()));
                }
                Err(e) => {
                    report("accepting connection", &Error::from(e));
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}
