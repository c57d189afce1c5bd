#![forbid(unsafe_code)]
//! Asynchronous ps3netsrv-compatible file server library.
//!
//! This crate implements the server side of the binary protocol PS3 network
//! clients use to browse a remote directory tree and stream game images from
//! it. One directory on the host is exported as the root; clients see paths
//! relative to it and cannot leave it.
//!
//! # Protocol
//!
//! Every request starts with a 16-byte big-endian header (see [`Command`]):
//! a 16-bit opcode, a 16-bit `size` (the length of a path that follows), a
//! 32-bit `count` and a 64-bit `offset`. Replies are packed big-endian
//! records whose layout depends on the opcode; bulk reads reply with raw
//! bytes only.
//!
//! A connection carries one [`session::Session`]: at most one file open for
//! reading, one open for writing and one directory being listed. Requests are
//! answered strictly in order.
//!
//! # Errors
//!
//! A failing filesystem operation (missing file, permission denied, path
//! outside the root) is reported with that command's failure reply and the
//! session continues. Protocol violations and handle or socket failures
//! surface as an [`Error`] and close the connection.
//!
//! # Example
//!
//! ```no_run
//! use ps3net::{Result, Root, ServerConfig, srv::srv_async};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let root = Root::new("/srv/games").await?;
//!     srv_async(root, ServerConfig::new().port(38008)).await
//! }
//! ```
pub mod config;
pub mod error;
pub mod listing;
pub mod path;
pub mod serialize;
pub mod session;
pub mod srv;
pub mod transfer;
#[macro_use]
pub mod utils;
pub mod whitelist;
pub mod wire;

pub use crate::config::ServerConfig;
pub use crate::error::Error;
pub use crate::path::Root;
pub use crate::utils::Result;
pub use crate::whitelist::Whitelist;
pub use crate::wire::*;
