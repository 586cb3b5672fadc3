//! # Filedock
//!
//! A small file-transfer service over a single TCP listener.
//!
//! The server accepts concurrent connections, runs one task per connection
//! and serves three commands against a flat storage directory: upload
//! (`SEND_FILE`), list (`LIST_FILES`) and download (`GET_FILE`). Uploads and
//! downloads are serialized by one store-wide lock. The client opens a fresh
//! connection for every operation.
//!
//! ## Features
//!
//! - Async/await with Tokio
//! - Length-prefixed uploads, raw-stream downloads
//! - Per-operation deadlines on every socket read and write
//! - Cooperative shutdown through a cancellation token
//! - Validated file names that cannot leave the store directory

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod store;

pub use client::Client;
pub use config::{Config, LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use protocol::{Command, Reply};
pub use server::{Server, ServerState};
pub use store::FileStore;
