//! Core implementation of the a1fs file system.
//!
//! a1fs is an extent-based POSIX-style file system stored in a single
//! fixed-size image file. The image is memory-mapped and every structure is
//! manipulated in place; this crate holds the on-disk format, the mounted
//! runtime context and all operations on it, plus the formatter routine.
//! The two executables (formatter and driver) are thin front-ends over this
//! crate.

use std::env::ArgsOs;
use std::mem::size_of;
use std::path::PathBuf;
use std::process::exit;
use std::{env, fmt};

pub mod bitmap;
pub mod ctx;
pub mod dir;
pub mod disk;
pub mod extent;
pub mod file;
pub mod format;
pub mod map;
pub mod path;

#[cfg(test)]
pub(crate) mod testutil;

pub use ctx::{A1Fs, FileStat, FsStats, MountError};
pub use format::FormatError;
pub use map::ImageMap;

/// Size of a block, in bytes. Unit of both I/O and allocation.
pub const BLOCK_SIZE: usize = 4096;
/// Magic number identifying an a1fs image; first bytes of the superblock.
pub const MAGIC: u64 = 0xC5C369A1C5C369A1;
/// Maximum length of a file name (path component), including the
/// terminating zero byte of the on-disk record.
pub const NAME_MAX: usize = 252;
/// Maximum length of a path.
pub const PATH_MAX: usize = 4096;
/// Index of the root directory's inode.
pub const ROOT_INO: u32 = 0;
/// Maximum number of extents per inode. The extent array is held in a single
/// block, so this is also exactly how many extent records fit in one.
pub const EXTENTS_PER_FILE: usize = BLOCK_SIZE / size_of::<disk::Extent>();
/// Number of directory entries per block.
pub const DENTRIES_PER_BLOCK: usize = BLOCK_SIZE / size_of::<disk::DirEntry>();

/// Returns the command's name along with an iterator over the command's arguments.
pub fn args() -> (String, ArgsOs) {
    let mut args = env::args_os();
    let bin = args
        .next()
        .map(PathBuf::from)
        .and_then(|p| {
            p.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| {
            error("a1fs", "missing binary name");
        });
    (bin, args)
}

/// Writes an error to stderr, then exits.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}
