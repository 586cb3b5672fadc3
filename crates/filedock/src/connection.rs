//! A single filedock connection
//!
//! Wraps one TCP stream for the lifetime of a command exchange. Every read
//! and write is bounded by the configured deadline, and reads also stop when
//! the cancellation token fires. Bytes that arrive in the same segment as the
//! command line are kept and served before the socket is read again.

use crate::protocol::{
    split_command_line, Reply, COMMAND_BUFFER_SIZE, LENGTH_PREFIX_SIZE, TRANSFER_BUFFER_SIZE,
};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Live byte stream bound to one socket
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    pending: BytesMut,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Connection {
    /// Wrap an accepted stream
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            peer,
            pending: BytesMut::new(),
            timeout,
            cancel,
        }
    }

    /// Open a client connection to `addr`
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the connect does not finish in time,
    /// [`Error::Connection`] if it is refused.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::timeout(format!("connecting to {addr}")))?
            .map_err(|e| Error::connection(format!("{addr}: {e}")))?;

        Ok(Self::new(stream, addr, timeout, CancellationToken::new()))
    }

    /// Address of the other end
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Run `fut` unless the connection's cancellation token fires first
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], or whatever `fut` returns.
    pub async fn until_cancelled<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    /// Read the command line with one bounded read
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] if the peer closes without sending anything,
    /// otherwise read errors.
    pub async fn read_command(&mut self) -> Result<String> {
        let mut buf = [0u8; COMMAND_BUFFER_SIZE];
        let n = self.read_socket(&mut buf).await?;
        if n == 0 {
            return Err(Error::connection("closed before sending a command"));
        }

        let (line, rest) = split_command_line(&buf[..n]);
        self.pending.extend_from_slice(rest);
        Ok(String::from_utf8_lossy(line).into_owned())
    }

    /// Read whatever is available into `buf`; 0 means end of stream
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`], [`Error::Cancelled`] or [`Error::Io`].
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Ok(n);
        }
        self.read_socket(buf).await
    }

    /// Read the 4-byte upload length prefix
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if the stream ends before 4 bytes arrive.
    pub async fn read_length_prefix(&mut self) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let mut filled = 0;

        while filled < LENGTH_PREFIX_SIZE {
            let n = self.read_chunk(&mut prefix[filled..]).await?;
            if n == 0 {
                return Err(Error::Protocol(format!(
                    "stream ended after {filled} of {LENGTH_PREFIX_SIZE} length bytes"
                )));
            }
            filled += n;
        }

        Ok(prefix)
    }

    /// Read until end of stream or until `limit` bytes are collected
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`], [`Error::Cancelled`] or [`Error::Io`].
    pub async fn read_to_end_bounded(&mut self, limit: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; limit];
        let mut filled = 0;

        while filled < limit {
            let n = self.read_chunk(&mut data[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        data.truncate(filled);
        Ok(data)
    }

    /// Write all of `data`, one deadline per chunk
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] or [`Error::Io`].
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(TRANSFER_BUFFER_SIZE) {
            tokio::time::timeout(self.timeout, self.stream.write_all(chunk))
                .await
                .map_err(|_| Error::timeout(format!("writing to {}", self.peer)))??;
        }
        Ok(())
    }

    /// Send one of the fixed reply literals
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] or [`Error::Io`].
    pub async fn send_reply(&mut self, reply: Reply) -> Result<()> {
        self.write_all(reply.as_str().as_bytes()).await
    }

    /// Flush and close the write side
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] or [`Error::Io`].
    pub async fn shutdown(&mut self) -> Result<()> {
        tokio::time::timeout(self.timeout, self.stream.shutdown())
            .await
            .map_err(|_| Error::timeout(format!("closing {}", self.peer)))??;
        Ok(())
    }

    async fn read_socket(&mut self, buf: &mut [u8]) -> Result<usize> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(self.timeout, self.stream.read(buf)) => {
                res.map_err(|_| Error::timeout(format!("reading from {}", self.peer)))?
                    .map_err(Error::from)
            }
        }
    }
}
