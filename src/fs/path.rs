//! Absolute path resolution.
//!
//! Paths are resolved component by component starting at the root inode,
//! scanning each directory's entries through its extent map. The caller's
//! path is only ever borrowed; `.` and `..` are never delivered by the
//! dispatcher and are not interpreted.

use crate::ctx::A1Fs;
use crate::{NAME_MAX, PATH_MAX, ROOT_INO};
use libc::c_int;

/// Why a path failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// The path or one of its components exceeds the length cap.
    NameTooLong,
    /// A component of the path does not exist.
    NotFound,
    /// A component of the path prefix is not a directory.
    NotDir,
}

impl ResolveError {
    /// The POSIX error number for this outcome.
    pub fn errno(self) -> c_int {
        match self {
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NotFound => libc::ENOENT,
            Self::NotDir => libc::ENOTDIR,
        }
    }
}

/// Splits a path on `/`, collapsing consecutive separators and ignoring a
/// trailing one.
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Splits a path into its parent directory and final component.
pub(crate) fn split_parent_child(path: &str) -> Result<(&str, &str), c_int> {
    if path.len() >= PATH_MAX {
        return Err(libc::ENAMETOOLONG);
    }
    let trimmed = path.trim_end_matches('/');
    let Some(cut) = trimmed.rfind('/') else {
        return Err(libc::ENOENT);
    };
    let name = &trimmed[cut + 1..];
    if name.is_empty() {
        return Err(libc::ENOENT);
    }
    if name.len() >= NAME_MAX {
        return Err(libc::ENAMETOOLONG);
    }
    let parent = if cut == 0 { "/" } else { &trimmed[..cut] };
    Ok((parent, name))
}

impl A1Fs {
    /// Resolves an absolute path to an inode index.
    pub fn resolve(&self, path: &str) -> Result<u32, ResolveError> {
        if path.len() >= PATH_MAX {
            return Err(ResolveError::NameTooLong);
        }
        let mut cur = ROOT_INO;
        for comp in components(path) {
            if comp.len() >= NAME_MAX {
                return Err(ResolveError::NameTooLong);
            }
            let inode = self.inode(cur);
            if !inode.is_dir() {
                return Err(ResolveError::NotDir);
            }
            cur = self
                .dir_entries(&inode)
                .find(|(_, _, e)| e.name() == comp.as_bytes())
                .map(|(_, _, e)| e.ino)
                .ok_or(ResolveError::NotFound)?;
        }
        Ok(cur)
    }
}
