//! Per-connection state.
//!
//! A [`Session`] is owned by the task serving one connection and is never
//! shared. It holds at most one file open for reading, one open for writing
//! and one directory cursor; the three are independent. Dropping the session
//! closes all of them.

use tokio::fs::File;

use crate::{
    error::Error,
    listing::Entry,
    path::Root,
    utils::Result,
};

/// Position within the snapshot of an opened directory
#[derive(Debug, Default)]
pub enum DirCursor {
    #[default]
    Closed,
    Open {
        entries: Vec<Entry>,
        position: usize,
    },
}

impl DirCursor {
    /// A cursor on the first of `entries`.
    pub fn open(entries: Vec<Entry>) -> DirCursor {
        DirCursor::Open {
            entries,
            position: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, DirCursor::Open { .. })
    }

    pub fn current(&self) -> Option<&Entry> {
        match self {
            DirCursor::Open { entries, position } => entries.get(*position),
            DirCursor::Closed => None,
        }
    }

    pub fn advance(&mut self) {
        if let DirCursor::Open { entries, position } = self {
            *position = (*position + 1).min(entries.len());
        }
    }

    /// The entry under the cursor, moving the cursor past it.
    pub fn take_next(&mut self) -> Option<Entry> {
        let entry = self.current().cloned();
        self.advance();
        entry
    }

    /// Consume every entry from the current position on.
    pub fn drain_remaining(&mut self) -> Vec<Entry> {
        match self {
            DirCursor::Open { entries, position } => {
                let rest = entries.split_off((*position).min(entries.len()));
                *position = entries.len();
                rest
            }
            DirCursor::Closed => Vec::new(),
        }
    }

    pub fn close(&mut self) {
        *self = DirCursor::Closed;
    }
}

pub struct Session {
    root: Root,
    read_file: Option<File>,
    write_file: Option<File>,
    directory: DirCursor,
    buffer: Vec<u8>,
}

impl Session {
    pub fn new(root: Root, buffer_size: usize) -> Session {
        Session {
            root,
            read_file: None,
            write_file: None,
            directory: DirCursor::Closed,
            buffer: vec![0; buffer_size],
        }
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Drop the current read handle, if any.
    pub fn close_read(&mut self) {
        self.read_file = None;
    }

    pub fn set_read(&mut self, file: File) {
        self.read_file = Some(file);
    }

    /// The read handle together with the transfer buffer.
    pub fn read_parts(&mut self) -> Result<(&mut File, &mut [u8])> {
        let file = self.read_file.as_mut().ok_or(Error::NoReadHandle)?;
        Ok((file, &mut self.buffer[..]))
    }

    /// Drop the current write handle, if any.
    pub fn close_write(&mut self) {
        self.write_file = None;
    }

    pub fn set_write(&mut self, file: File) {
        self.write_file = Some(file);
    }

    /// The write handle together with the transfer buffer.
    pub fn write_parts(&mut self) -> Result<(&mut File, &mut [u8])> {
        let file = self.write_file.as_mut().ok_or(Error::NoWriteHandle)?;
        Ok((file, &mut self.buffer[..]))
    }

    /// Replace the directory cursor.
    pub fn set_directory(&mut self, cursor: DirCursor) {
        self.directory = cursor;
    }

    /// The open directory cursor; listing without one is a protocol error.
    pub fn directory(&mut self) -> Result<&mut DirCursor> {
        if self.directory.is_open() {
            Ok(&mut self.directory)
        } else {
            Err(Error::NoDirectory)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(name: &str) -> Entry {
        Entry {
            path: PathBuf::from("/srv").join(name),
            name: name.as_bytes().to_vec(),
        }
    }

    #[test]
    fn cursor_walks_to_end() {
        let mut cursor = DirCursor::open(vec![entry("A"), entry("B")]);
        assert!(cursor.is_open());
        assert_eq!(cursor.current().unwrap().name, b"A");
        assert_eq!(cursor.take_next().unwrap().name, b"A");
        assert_eq!(cursor.current().unwrap().name, b"B");
        cursor.advance();
        assert!(cursor.current().is_none());
        assert!(cursor.take_next().is_none());
        assert!(cursor.is_open());
    }

    #[test]
    fn cursor_drains_from_position() {
        let mut cursor = DirCursor::open(vec![entry("A"), entry("B"), entry("C")]);
        cursor.advance();
        let rest = cursor.drain_remaining();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].name, b"B");
        assert!(cursor.current().is_none());
        assert!(cursor.is_open());
        assert!(cursor.drain_remaining().is_empty());
    }

    #[test]
    fn closed_cursor() {
        let mut cursor = DirCursor::default();
        assert!(!cursor.is_open());
        assert!(cursor.take_next().is_none());
        assert!(cursor.drain_remaining().is_empty());
        cursor = DirCursor::open(Vec::new());
        cursor.close();
        assert!(!cursor.is_open());
    }

    #[tokio::test]
    async fn handles_are_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let root = Root::new(dir.path()).await.unwrap();
        let mut session = Session::new(root, 32);

        assert_eq!(session.buffer_size(), 32);
        assert!(matches!(session.read_parts(), Err(Error::NoReadHandle)));
        assert!(matches!(session.write_parts(), Err(Error::NoWriteHandle)));
        assert!(matches!(session.directory(), Err(Error::NoDirectory)));

        let file = File::create(dir.path().join("f")).await.unwrap();
        session.set_write(file);
        let (_, buf) = session.write_parts().unwrap();
        assert_eq!(buf.len(), 32);
        session.close_write();
        assert!(matches!(session.write_parts(), Err(Error::NoWriteHandle)));
    }
}
