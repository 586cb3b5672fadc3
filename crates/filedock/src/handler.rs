//! Per-connection command handling
//!
//! Reads the command line, routes it to the upload, list or download handler
//! and always closes the connection afterwards. Handlers never propagate
//! errors: a failure is reported to the error log and turned into a reply.

use crate::connection::Connection;
use crate::error::report;
use crate::protocol::{decode_length, join_file_list, Command, Reply, TRANSFER_BUFFER_SIZE};
use crate::store::{FileStore, StoreGuard};
use crate::{Error, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// State shared by all handlers of one server
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Store every handler operates on
    pub store: FileStore,
    /// Deadline for store-lock acquisition
    pub lock_timeout: Duration,
    /// Largest accepted upload, 0 for no limit beyond the length prefix
    pub max_upload_bytes: u64,
}

/// Serve one accepted connection end to end
pub async fn handle_connection(mut conn: Connection, ctx: HandlerContext) {
    let peer = conn.peer_addr();

    if let Err(e) = dispatch(&mut conn, &ctx).await {
        report(&format!("connection {peer}"), &e);
    }

    if let Err(e) = conn.shutdown().await {
        debug!(%peer, error = %e, "Shutdown after reply failed");
    }
    debug!(%peer, "Client disconnected");
}

async fn dispatch(conn: &mut Connection, ctx: &HandlerContext) -> Result<()> {
    let line = conn.read_command().await?;
    info!(peer = %conn.peer_addr(), command = %line, "Received command");

    match Command::parse(&line) {
        Ok(Command::SendFile(name)) => handle_upload(conn, ctx, &name).await,
        Ok(Command::ListFiles) => handle_list(conn, ctx).await,
        Ok(Command::GetFile(name)) => handle_download(conn, ctx, &name).await,
        Err(e) => {
            warn!(peer = %conn.peer_addr(), error = %e, "Rejected command");
            conn.send_reply(e.reply()).await
        }
    }
}

async fn handle_upload(conn: &mut Connection, ctx: &HandlerContext, name: &str) -> Result<()> {
    match receive_upload(conn, ctx, name).await {
        Ok(size) => {
            info!(file = name, size, "File received and stored");
            conn.send_reply(Reply::FileReceived).await
        }
        Err(e) => {
            report(&format!("receiving {name}"), &e);
            conn.send_reply(e.reply()).await
        }
    }
}

/// Upload frame: length prefix then exactly that many payload bytes.
///
/// A short transfer leaves the partial file on disk.
async fn receive_upload(conn: &mut Connection, ctx: &HandlerContext, name: &str) -> Result<u64> {
    let guard = acquire(conn, ctx).await?;
    let mut file = ctx.store.create(&guard, name).await?;
    debug!(file = name, "Receiving file");

    let expected = decode_length(conn.read_length_prefix().await?)?;
    if ctx.max_upload_bytes > 0 && expected > ctx.max_upload_bytes {
        return Err(Error::Protocol(format!(
            "declared length {expected} exceeds limit of {} bytes",
            ctx.max_upload_bytes
        )));
    }
    debug!(file = name, expected, "Expected file length");

    let mut buf = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut received: u64 = 0;

    while received < expected {
        let remaining = usize::try_from(expected - received).unwrap_or(usize::MAX);
        let want = remaining.min(buf.len());
        let n = conn.read_chunk(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        received += n as u64;
        debug!(file = name, received, expected, "Upload progress");
    }
    file.flush().await?;

    if received != expected {
        return Err(Error::Transfer { expected, received });
    }
    Ok(received)
}

async fn handle_list(conn: &mut Connection, ctx: &HandlerContext) -> Result<()> {
    match ctx.store.list().await {
        Ok(names) => {
            let body = join_file_list(&names);
            info!(count = names.len(), "Sending file list");
            conn.write_all(body.as_bytes()).await
        }
        Err(e) => {
            report("listing store", &e);
            conn.send_reply(e.reply()).await
        }
    }
}

async fn handle_download(conn: &mut Connection, ctx: &HandlerContext, name: &str) -> Result<()> {
    match ctx.store.contains(name).await {
        Ok(true) => {}
        Ok(false) => {
            info!(file = name, "Requested file not found");
            return conn.send_reply(Reply::FileNotFound).await;
        }
        Err(e) => {
            report(&format!("looking up {name}"), &e);
            return conn.send_reply(e.reply()).await;
        }
    }

    let data = match read_stored(conn, ctx, name).await {
        Ok(data) => data,
        Err(e) => {
            report(&format!("reading {name}"), &e);
            return conn.send_reply(e.reply()).await;
        }
    };

    match conn.write_all(&data).await {
        Ok(()) => {
            info!(file = name, size = data.len(), "File sent to client");
            Ok(())
        }
        Err(e) => {
            report(&format!("sending {name}"), &e);
            conn.send_reply(Reply::Error).await
        }
    }
}

async fn read_stored(conn: &Connection, ctx: &HandlerContext, name: &str) -> Result<Vec<u8>> {
    let guard = acquire(conn, ctx).await?;
    let data = ctx.store.read(&guard, name).await?;
    debug!(file = name, size = data.len(), "Read file data");
    Ok(data)
}

async fn acquire(conn: &Connection, ctx: &HandlerContext) -> Result<StoreGuard> {
    conn.until_cancelled(ctx.store.lock(ctx.lock_timeout)).await
}
