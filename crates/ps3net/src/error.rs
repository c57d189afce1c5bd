//! Error type shared by the protocol engine.
//!
//! Handlers report filesystem failures to the peer with the failure reply of
//! the command and keep the session alive. Everything that reaches the
//! dispatch loop as an [`Error`] ends the connection.

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Socket or file handle failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Opcode outside the command table.
    #[error("unknown command: {0:#06x}")]
    UnknownCommand(u16),

    #[error("no file is open for reading")]
    NoReadHandle,

    #[error("no file is open for writing")]
    NoWriteHandle,

    #[error("no directory was opened before listing request")]
    NoDirectory,

    /// The read handle ended before the requested range was read.
    #[error("file ended within the {requested} bytes requested at offset {offset}")]
    ShortRead { offset: u64, requested: u32 },

    /// A transfer would not fit in the session buffer.
    #[error("{requested} bytes requested but the transfer buffer holds {capacity}")]
    BufferOverflow { requested: u64, capacity: usize },

    /// The client path leaves the served root.
    #[error("path escapes the served root: {}", .0.display())]
    PathEscape(PathBuf),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A name does not fit in a fixed-size wire field.
    #[error("name of {len} bytes exceeds the {max}-byte limit")]
    NameTooLong { len: usize, max: usize },
}

impl Error {
    /// Whether the peer went away, as opposed to a protocol or handle failure.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_kinds() {
        assert!(Error::Io(io::ErrorKind::UnexpectedEof.into()).is_disconnect());
        assert!(Error::Io(io::ErrorKind::ConnectionReset.into()).is_disconnect());
        assert!(!Error::Io(io::ErrorKind::NotFound.into()).is_disconnect());
        assert!(!Error::UnknownCommand(0x1300).is_disconnect());
        assert!(!Error::ShortRead { offset: 0, requested: 10 }.is_disconnect());
    }

    #[test]
    fn display_unknown_command() {
        assert_eq!(
            Error::UnknownCommand(0x1300).to_string(),
            "unknown command: 0x1300"
        );
    }
}
