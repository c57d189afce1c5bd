//! Directory listing engine.
//!
//! Opening a directory snapshots its entries; the listing commands then walk
//! that snapshot either one entry per request or all at once.

use std::{
    fs::Metadata,
    io,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use futures::future::{BoxFuture, FutureExt};
use log::warn;
use tokio::fs;
use tokio_stream::{StreamExt, wrappers::ReadDirStream};

use crate::{io_err, path::Root, utils::signed_size, wire::*};

/// A directory entry as seen when the directory was opened
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Full path below the root
    pub path: PathBuf,
    /// Bare file name
    pub name: Vec<u8>,
}

impl Entry {
    fn from_dirent(dirent: &fs::DirEntry) -> Entry {
        Entry {
            path: dirent.path(),
            name: dirent.file_name().as_bytes().to_vec(),
        }
    }

    /// Metadata of the entry with symbolic links followed, as long as the
    /// target stays below `root`.
    async fn metadata(&self, root: &Root) -> io::Result<Metadata> {
        let real = fs::canonicalize(&self.path).await?;
        if !real.starts_with(root.path()) {
            return Err(io_err!(PermissionDenied, "entry points outside the served root"));
        }
        fs::metadata(&real).await
    }
}

/// Listed size: directories always report 0.
fn listed_size(attr: &Metadata) -> i64 {
    if attr.is_dir() { 0 } else { signed_size(attr.len()) }
}

/// Snapshot the entries of `path`, in the order the filesystem returns them.
pub async fn read_entries(path: &Path) -> io::Result<Vec<Entry>> {
    let mut stream = ReadDirStream::new(fs::read_dir(path).await?);
    let mut entries = Vec::new();
    while let Some(dirent) = stream.next().await {
        entries.push(Entry::from_dirent(&dirent?));
    }
    Ok(entries)
}

pub async fn short_entry(root: &Root, entry: &Entry) -> io::Result<ShortEntryReply> {
    let attr = entry.metadata(root).await?;
    Ok(ShortEntryReply {
        size: listed_size(&attr),
        is_directory: attr.is_dir(),
        name: entry.name.clone(),
    })
}

pub async fn long_entry(root: &Root, entry: &Entry) -> io::Result<LongEntryReply> {
    let attr = entry.metadata(root).await?;
    Ok(LongEntryReply {
        size: listed_size(&attr),
        times: From::from(&attr),
        is_directory: attr.is_dir(),
        name: entry.name.clone(),
    })
}

/// Build the batch reply for `entries`.
///
/// Entries whose name does not fit the fixed name slot, whose metadata
/// cannot be read or that point outside `root` are left out.
pub async fn batch(root: &Root, entries: &[Entry]) -> DirectoryBatchReply {
    let mut reply = DirectoryBatchReply::default();

    for entry in entries {
        let name = match Name::new(&entry.name) {
            Ok(name) => name,
            Err(e) => {
                warn!("skipping {:?}: {}", entry.path, e);
                continue;
            }
        };
        let attr = match entry.metadata(root).await {
            Ok(attr) => attr,
            Err(e) => {
                warn!("skipping {:?}: {}", entry.path, e);
                continue;
            }
        };

        reply.entries.push(BatchEntry {
            size: listed_size(&attr),
            mtime: Times::from(&attr).mtime,
            is_directory: attr.is_dir(),
            name,
        });
    }

    reply
}

/// Total size of the regular files below `path`, descending into
/// subdirectories. Symbolic links are not followed.
pub fn directory_size(path: PathBuf) -> BoxFuture<'static, io::Result<u64>> {
    async move {
        let mut total = 0u64;
        let mut stream = ReadDirStream::new(fs::read_dir(&path).await?);
        while let Some(dirent) = stream.next().await {
            let dirent = dirent?;
            let typ = dirent.file_type().await?;
            if typ.is_file() {
                total += dirent.metadata().await?.len();
            } else if typ.is_dir() {
                total += directory_size(dirent.path()).await?;
            }
        }
        Ok(total)
    }
    .boxed()
}
