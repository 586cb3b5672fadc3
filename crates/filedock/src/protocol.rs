//! Filedock wire protocol
//!
//! One command per connection. The client sends a text command line, the
//! server answers and closes:
//!
//! | Command                                   | Reply                                          |
//! |-------------------------------------------|------------------------------------------------|
//! | `SEND_FILE <name>` + 4-byte LE length + payload | `FILE_RECEIVED` or `ERROR`               |
//! | `LIST_FILES`                              | comma-joined names                             |
//! | `GET_FILE <name>`                         | raw file bytes until EOF, `FILE_NOT_FOUND`, `ERROR` |
//! | anything else                             | `INVALID_COMMAND`                              |
//!
//! Uploads carry a length prefix; downloads do not and end when the server
//! closes the connection.

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the first read on a fresh connection
pub const COMMAND_BUFFER_SIZE: usize = 1024;

/// Chunk size for payload streaming in both directions
pub const TRANSFER_BUFFER_SIZE: usize = 4096;

/// Size of the single read the client performs for a file list
pub const LIST_BUFFER_SIZE: usize = 4096;

/// Size of the upload length prefix (little-endian `i32`)
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Separator between names in a `LIST_FILES` reply
pub const LIST_DELIMITER: char = ',';

/// Longest accepted file name in bytes
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upload a file into the store
    SendFile(String),
    /// List the store
    ListFiles,
    /// Download a file from the store
    GetFile(String),
}

impl Command {
    /// Upload keyword
    pub const SEND_FILE: &'static str = "SEND_FILE";
    /// List keyword
    pub const LIST_FILES: &'static str = "LIST_FILES";
    /// Download keyword
    pub const GET_FILE: &'static str = "GET_FILE";

    /// Classify a command line by its prefix.
    ///
    /// The file name is everything after the first space. A trailing line
    /// ending is not part of the command.
    ///
    /// # Errors
    ///
    /// [`Error::MissingArgument`] when `SEND_FILE`/`GET_FILE` carry no name,
    /// [`Error::InvalidFileName`] when the name fails [`validate_file_name`],
    /// [`Error::InvalidCommand`] for anything unrecognized.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.starts_with(Self::SEND_FILE) {
            let name = Self::argument(line, Self::SEND_FILE)?;
            Ok(Command::SendFile(name))
        } else if line.starts_with(Self::LIST_FILES) {
            Ok(Command::ListFiles)
        } else if line.starts_with(Self::GET_FILE) {
            let name = Self::argument(line, Self::GET_FILE)?;
            Ok(Command::GetFile(name))
        } else {
            Err(Error::InvalidCommand(truncate_for_log(line)))
        }
    }

    fn argument(line: &str, keyword: &'static str) -> Result<String> {
        match line.split_once(' ') {
            Some((_, name)) if !name.is_empty() => {
                validate_file_name(name)?;
                Ok(name.to_string())
            }
            _ => Err(Error::MissingArgument(keyword)),
        }
    }

    /// Keyword this command is sent with
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::SendFile(_) => Self::SEND_FILE,
            Command::ListFiles => Self::LIST_FILES,
            Command::GetFile(_) => Self::GET_FILE,
        }
    }

    /// Encode as a newline-terminated command line
    pub fn encode(&self) -> Bytes {
        let line = self.to_string();
        let mut buf = BytesMut::with_capacity(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SendFile(name) | Command::GetFile(name) => {
                write!(f, "{} {}", self.keyword(), name)
            }
            Command::ListFiles => f.write_str(Self::LIST_FILES),
        }
    }
}

/// Fixed text replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Upload stored completely
    FileReceived,
    /// Any failure while handling the command
    Error,
    /// Download target is not in the store
    FileNotFound,
    /// Command line was not understood
    InvalidCommand,
}

impl Reply {
    /// Literal sent on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Reply::FileReceived => "FILE_RECEIVED",
            Reply::Error => "ERROR",
            Reply::FileNotFound => "FILE_NOT_FOUND",
            Reply::InvalidCommand => "INVALID_COMMAND",
        }
    }

    /// Match a complete response against the reply literals
    pub fn parse(response: &[u8]) -> Option<Self> {
        [
            Reply::FileReceived,
            Reply::Error,
            Reply::FileNotFound,
            Reply::InvalidCommand,
        ]
        .into_iter()
        .find(|reply| reply.as_str().as_bytes() == response)
    }

    /// Length of the longest literal
    pub(crate) fn max_len() -> usize {
        Reply::InvalidCommand.as_str().len()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split the first read of a connection into the command line and any bytes
/// that followed it.
///
/// A newline ends the command; peers that send a bare command without one get
/// the whole chunk treated as the command.
pub fn split_command_line(chunk: &[u8]) -> (&[u8], &[u8]) {
    match chunk.iter().position(|&b| b == b'\n') {
        Some(pos) => (&chunk[..pos], &chunk[pos + 1..]),
        None => (chunk, &[]),
    }
}

/// Check that a name addresses a plain file directly inside the store
///
/// # Errors
///
/// [`Error::InvalidFileName`] for empty or over-long names, `.`/`..`, path
/// separators, control characters and the list delimiter.
pub fn validate_file_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.len() > MAX_FILE_NAME_LENGTH
        || name == "."
        || name == ".."
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == LIST_DELIMITER || c.is_control());

    if invalid {
        return Err(Error::InvalidFileName(truncate_for_log(name)));
    }
    Ok(())
}

/// Encode an upload length prefix
///
/// # Errors
///
/// [`Error::Protocol`] when `len` does not fit the signed 32-bit prefix.
pub fn encode_length(len: u64) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let len = i32::try_from(len)
        .map_err(|_| Error::Protocol(format!("payload of {len} bytes exceeds length prefix")))?;
    Ok(len.to_le_bytes())
}

/// Decode an upload length prefix
///
/// # Errors
///
/// [`Error::Protocol`] when the declared length is negative.
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<u64> {
    let len = i32::from_le_bytes(prefix);
    u64::try_from(len).map_err(|_| Error::Protocol(format!("negative payload length {len}")))
}

/// Join store entries into a `LIST_FILES` reply body
pub fn join_file_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(LIST_DELIMITER.to_string().as_str())
}

/// Split a `LIST_FILES` reply body; empty entries are dropped
pub fn split_file_list(body: &str) -> Vec<String> {
    body.split(LIST_DELIMITER)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn truncate_for_log(s: &str) -> String {
    const LIMIT: usize = 64;
    match s.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
