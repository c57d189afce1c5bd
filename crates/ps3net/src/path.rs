//! Resolution of client paths against the served root.
//!
//! Client paths are interpreted relative to the root whether or not they
//! start with `/`. A path is accepted only if it stays below the root both
//! lexically and once symbolic links in its existing part are followed.

use std::{
    ffi::OsStr,
    io,
    os::unix::ffi::OsStrExt,
    path::{Component, Path, PathBuf},
};

use tokio::fs;

use crate::{error::Error, utils::Result};

/// The served directory, canonicalized once per server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Root {
    path: PathBuf,
}

impl Root {
    pub async fn new(path: impl AsRef<Path>) -> io::Result<Root> {
        let path = fs::canonicalize(path.as_ref()).await?;
        if !fs::metadata(&path).await?.is_dir() {
            return Err(crate::io_err!(NotADirectory, "root must be a directory"));
        }
        Ok(Root { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map the raw path bytes of a command to a location below the root.
    pub async fn resolve(&self, raw: &[u8]) -> Result<PathBuf> {
        let relative = normalize(raw)?;
        let full = self.path.join(&relative);
        self.check_containment(&full).await?;
        Ok(full)
    }

    /// Like [`Root::resolve`], but the root itself is not an acceptable
    /// answer. Used by commands that create or remove the target.
    pub async fn resolve_below(&self, raw: &[u8]) -> Result<PathBuf> {
        let relative = normalize(raw)?;
        if relative.as_os_str().is_empty() {
            return Err(Error::InvalidPath("the served root cannot be modified".into()));
        }
        let full = self.path.join(&relative);
        self.check_containment(&full).await?;
        Ok(full)
    }

    async fn check_containment(&self, full: &Path) -> Result<()> {
        let mut candidate = full;
        loop {
            match fs::canonicalize(candidate).await {
                Ok(real) if real.starts_with(&self.path) => return Ok(()),
                Ok(_) => return Err(Error::PathEscape(full.to_path_buf())),
                // A dangling link could still be created through.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if fs::symlink_metadata(candidate).await.is_ok() {
                        return Err(Error::PathEscape(full.to_path_buf()));
                    }
                }
                Err(e) => return Err(e.into()),
            }
            candidate = match candidate.parent() {
                Some(parent) if parent.starts_with(&self.path) => parent,
                _ => return Err(Error::PathEscape(full.to_path_buf())),
            };
        }
    }
}

/// Lexically clean a client path into a relative path.
///
/// The string ends at the first NUL, `.` is dropped and `..` pops the
/// previous component; popping above the root is rejected.
pub fn normalize(raw: &[u8]) -> Result<PathBuf> {
    let raw = raw.split(|&b| b == 0).next().unwrap_or_default();
    let mut out = PathBuf::new();

    for component in Path::new(OsStr::from_bytes(raw)).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(Error::PathEscape(PathBuf::from(OsStr::from_bytes(raw))));
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_root_and_dots() {
        assert_eq!(
            normalize(b"/GAMES/./BLUS00000/PS3_GAME").unwrap(),
            PathBuf::from("GAMES/BLUS00000/PS3_GAME")
        );
        assert_eq!(normalize(b"a/b/../c").unwrap(), PathBuf::from("a/c"));
        assert_eq!(normalize(b"/").unwrap(), PathBuf::new());
        assert_eq!(normalize(b"").unwrap(), PathBuf::new());
    }

    #[test]
    fn normalize_stops_at_nul() {
        assert_eq!(normalize(b"/ISO/game.iso\0junk").unwrap(), PathBuf::from("ISO/game.iso"));
    }

    #[test]
    fn normalize_rejects_escape() {
        assert!(matches!(normalize(b"../etc/passwd"), Err(Error::PathEscape(_))));
        assert!(matches!(normalize(b"/a/../../b"), Err(Error::PathEscape(_))));
    }

    #[tokio::test]
    async fn resolve_missing_leaf_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = Root::new(dir.path()).await.unwrap();
        let resolved = root.resolve(b"/new/file.bin").await.unwrap();
        assert_eq!(resolved, root.path().join("new/file.bin"));
    }

    #[tokio::test]
    async fn resolve_rejects_symlink_out_of_root() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let root = Root::new(dir.path()).await.unwrap();
        assert!(matches!(
            root.resolve(b"/link/secret").await,
            Err(Error::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn resolve_below_refuses_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = Root::new(dir.path()).await.unwrap();

        for raw in [&b""[..], b"/", b"/./", b"a/.."] {
            assert!(matches!(root.resolve_below(raw).await, Err(Error::InvalidPath(_))));
            assert_eq!(root.resolve(raw).await.unwrap(), root.path());
        }
        assert_eq!(root.resolve_below(b"/sub").await.unwrap(), root.path().join("sub"));
    }

    #[tokio::test]
    async fn root_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(Root::new(&file).await.is_err());
    }
}
