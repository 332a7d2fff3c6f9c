//! Shared helpers for the unit tests: scratch image files and the
//! whole-image consistency check.

use crate::ctx::A1Fs;
use crate::disk::DirEntry;
use crate::map::ImageMap;
use crate::{BLOCK_SIZE, DENTRIES_PER_BLOCK, bitmap, format};
use std::collections::HashSet;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::{env, fs, process};

/// A scratch image file under the system temp directory, removed on drop.
pub(crate) struct TempImage {
    path: PathBuf,
}

impl TempImage {
    pub fn new(size: u64) -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = env::temp_dir().join(format!("a1fs-test-{}-{n}.img", process::id()));
        let file = fs::File::create(&path).unwrap();
        file.set_len(size).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Formats a fresh image and mounts it. The guard must be kept alive for as
/// long as the file system is used.
pub(crate) fn mkfs(size: u64, inodes: u32) -> (A1Fs, TempImage) {
    let img = TempImage::new(size);
    let mut map = ImageMap::open(img.path()).unwrap();
    format::format(&mut map, inodes, false).unwrap();
    let fs = A1Fs::new(map).unwrap();
    (fs, img)
}

/// Asserts the cross-structure invariants of the on-disk state: counters
/// against bitmap popcounts, disjoint block ownership, and the per-inode
/// size and link accounting.
pub(crate) fn check_invariants(fs: &A1Fs) {
    let sb = fs.superblock();
    let layout = *fs.layout();

    let used_inodes = bitmap::count_set(fs.inode_bitmap(), sb.num_inodes);
    assert_eq!(sb.available_inodes + used_inodes, sb.num_inodes);
    let used_blocks = bitmap::count_set(fs.data_bitmap(), layout.data_blocks);
    assert_eq!(sb.available_blocks + used_blocks, layout.data_blocks);

    // Every data block is owned by exactly one inode, either as the extent
    // block or inside an extent.
    let mut owned = HashSet::new();
    for ino in 0..sb.num_inodes {
        if !bitmap::test(fs.inode_bitmap(), ino) {
            continue;
        }
        let inode = fs.inode(ino);
        if inode.extent_count > 0 {
            assert!(owned.insert(inode.extent_block), "extent block owned twice");
            for k in 0..inode.extent_count {
                let e = fs.extent(inode.extent_block, k);
                assert!(e.count >= 1);
                for b in e.start..e.start + e.count {
                    assert!(owned.insert(b), "data block {b} owned twice");
                }
            }
        }
        let blocks = fs.block_count(&inode) as u64;
        if inode.is_dir() {
            assert_eq!(
                inode.size,
                inode.dir_entry_count as u64 * size_of::<DirEntry>() as u64
            );
            assert_eq!(
                blocks,
                (inode.dir_entry_count as u64).div_ceil(DENTRIES_PER_BLOCK as u64)
            );
            let subdirs = fs
                .dir_entries(&inode)
                .filter(|(_, _, e)| fs.inode(e.ino).is_dir())
                .count() as u32;
            assert_eq!(inode.links, 2 + subdirs);
        } else {
            assert!(inode.size <= blocks * BLOCK_SIZE as u64);
            if inode.extent_count > 0 && inode.size > 0 {
                assert!(inode.size > (blocks - 1) * BLOCK_SIZE as u64);
            }
        }
    }
    for b in 0..layout.data_blocks {
        assert_eq!(
            bitmap::test(fs.data_bitmap(), b),
            owned.contains(&b),
            "data bitmap disagrees with inode ownership at block {b}"
        );
    }
}
