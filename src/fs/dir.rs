//! Directory operations.
//!
//! A directory's byte stream is a packed array of fixed-size entries with no
//! holes: entry `i` lives in logical block `i / 16`. Removal keeps the array
//! packed by swapping the last entry into the vacated slot, so directories
//! are unordered bags and readdir promises no particular order.

use crate::ctx::A1Fs;
use crate::disk::{DirEntry, Extent, Inode, Timestamp};
use crate::path::{ResolveError, split_parent_child};
use crate::{BLOCK_SIZE, DENTRIES_PER_BLOCK};
use libc::c_int;
use std::mem::size_of;

const DENTRY_SIZE: u64 = size_of::<DirEntry>() as u64;

/// Iterator over a directory's entries in stored order, yielding
/// `(data block, slot, entry)`.
pub(crate) struct DirEntries<'fs> {
    fs: &'fs A1Fs,
    inode: Inode,
    k: u32,
    b: u32,
    slot: u32,
    seen: u32,
}

impl Iterator for DirEntries<'_> {
    type Item = (u32, u32, DirEntry);

    fn next(&mut self) -> Option<Self::Item> {
        if self.seen == self.inode.dir_entry_count || self.k == self.inode.extent_count {
            return None;
        }
        let e = self.fs.extent(self.inode.extent_block, self.k);
        let blk = e.start + self.b;
        let slot = self.slot;
        let entry = self.fs.dentry(blk, slot);
        self.seen += 1;
        self.slot += 1;
        if self.slot == DENTRIES_PER_BLOCK as u32 {
            self.slot = 0;
            self.b += 1;
            if self.b == e.count {
                self.b = 0;
                self.k += 1;
            }
        }
        Some((blk, slot, entry))
    }
}

impl A1Fs {
    pub(crate) fn dir_entries(&self, inode: &Inode) -> DirEntries<'_> {
        DirEntries {
            fs: self,
            inode: *inode,
            k: 0,
            b: 0,
            slot: 0,
            seen: 0,
        }
    }

    /// Inserts an entry for `child_ino` under `name` into the parent
    /// directory, extending it by a block when the last one is full.
    ///
    /// The child's inode record must already be written.
    pub(crate) fn insert_entry(
        &mut self,
        parent_ino: u32,
        name: &[u8],
        child_ino: u32,
        child_is_dir: bool,
    ) -> Result<(), c_int> {
        let parent = self.inode(parent_ino);
        let entry = DirEntry::new(child_ino, name);
        if parent.dir_entry_count == 0 {
            self.grow_from_empty(parent_ino)?;
            let parent = self.inode(parent_ino);
            let blk = self.extent(parent.extent_block, 0).start;
            self.set_dentry(blk, 0, &entry);
        } else if parent.size % BLOCK_SIZE as u64 != 0 {
            // The last block still has a free slot.
            let blk = self.last_block_index(&parent);
            let slot = parent.dir_entry_count % DENTRIES_PER_BLOCK as u32;
            self.set_dentry(blk, slot, &entry);
        } else {
            self.append_block(parent_ino)?;
            let parent = self.inode(parent_ino);
            let blk = self.last_block_index(&parent);
            self.set_dentry(blk, 0, &entry);
        }
        let mut parent = self.inode(parent_ino);
        parent.dir_entry_count += 1;
        parent.size += DENTRY_SIZE;
        parent.mtime = Timestamp::now();
        if child_is_dir {
            parent.links += 1;
        }
        self.set_inode(parent_ino, &parent);
        Ok(())
    }

    /// Removes the entry for `target_ino` from the parent directory by
    /// overwriting it with the last entry, then reclaiming the last block
    /// (and the extent block) when they become unused.
    pub(crate) fn remove_entry(
        &mut self,
        parent_ino: u32,
        target_ino: u32,
        target_is_dir: bool,
    ) -> Result<(), c_int> {
        let per_block = DENTRIES_PER_BLOCK as u32;
        let mut parent = self.inode(parent_ino);
        let last_blk = self.last_block_index(&parent);
        let last_slot = (parent.dir_entry_count - 1) % per_block;
        let last_entry = self.dentry(last_blk, last_slot);
        if last_entry.ino != target_ino {
            let Some((blk, slot, _)) = self
                .dir_entries(&parent)
                .find(|(_, _, e)| e.ino == target_ino)
            else {
                return Err(libc::ENOENT);
            };
            self.set_dentry(blk, slot, &last_entry);
        }
        parent.dir_entry_count -= 1;
        parent.size -= DENTRY_SIZE;
        parent.mtime = Timestamp::now();
        if parent.dir_entry_count % per_block == 0 {
            // The vacated slot was the first of its block.
            self.free_data_block(last_blk);
            let e = self.extent(parent.extent_block, parent.extent_count - 1);
            if e.count > 1 {
                self.set_extent(
                    parent.extent_block,
                    parent.extent_count - 1,
                    Extent {
                        start: e.start,
                        count: e.count - 1,
                    },
                );
            } else {
                parent.extent_count -= 1;
            }
        }
        if parent.dir_entry_count == 0 {
            self.free_data_block(parent.extent_block);
            parent.extent_block = 0;
            parent.links = 2;
        } else if target_is_dir {
            parent.links -= 1;
        }
        self.set_inode(parent_ino, &parent);
        Ok(())
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<(), c_int> {
        let (parent_path, name) = split_parent_child(path)?;
        let parent_ino = self.resolve(parent_path).map_err(ResolveError::errno)?;
        let ino = self.alloc_inode()?;
        self.set_inode(ino, &Inode::new(mode | libc::S_IFDIR, 2));
        if let Err(e) = self.insert_entry(parent_ino, name.as_bytes(), ino, true) {
            // An inode without a directory entry would be unreachable.
            self.free_inode(ino);
            return Err(e);
        }
        Ok(())
    }

    /// Removes the directory at `path`, which must be empty.
    pub fn rmdir(&mut self, path: &str) -> Result<(), c_int> {
        let (parent_path, _) = split_parent_child(path)?;
        let parent_ino = self.resolve(parent_path).map_err(ResolveError::errno)?;
        let target_ino = self.resolve(path).map_err(ResolveError::errno)?;
        if self.inode(target_ino).size != 0 {
            return Err(libc::ENOTEMPTY);
        }
        self.remove_entry(parent_ino, target_ino, true)?;
        self.free_inode(target_ino);
        Ok(())
    }

    /// Yields `.`, `..` and every entry of the directory at `path` to
    /// `filler` as `(name, mode of the named inode)`.
    ///
    /// Fails `ENOMEM` as soon as `filler` returns `false`.
    pub fn readdir<F>(&self, path: &str, mut filler: F) -> Result<(), c_int>
    where
        F: FnMut(&[u8], u32) -> bool,
    {
        let ino = self.resolve(path).map_err(ResolveError::errno)?;
        let dir = self.inode(ino);
        if !filler(b".", dir.mode) || !filler(b"..", dir.mode) {
            return Err(libc::ENOMEM);
        }
        for (_, _, entry) in self.dir_entries(&dir) {
            let child = self.inode(entry.ino);
            if !filler(entry.name(), child.mode) {
                return Err(libc::ENOMEM);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::{check_invariants, mkfs};
    use crate::{DENTRIES_PER_BLOCK, ROOT_INO};
    use std::mem::size_of;

    fn names(fs: &crate::A1Fs, path: &str) -> Vec<String> {
        let mut out = Vec::new();
        fs.readdir(path, |name, _| {
            out.push(String::from_utf8(name.to_vec()).unwrap());
            true
        })
        .unwrap();
        out
    }

    #[test]
    fn mkdir_then_rmdir_restores_counters() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        let before = fs.statfs();

        fs.mkdir("/a", 0o755).unwrap();
        let st = fs.getattr("/a").unwrap();
        assert!(st.mode & libc::S_IFMT == libc::S_IFDIR);
        assert_eq!(st.mode & 0o777, 0o755);
        assert_eq!(st.nlink, 2);
        assert_eq!(st.size, 0);
        assert_eq!(st.blocks, 0);
        assert_eq!(fs.getattr("/").unwrap().nlink, 3);
        check_invariants(&fs);

        fs.rmdir("/a").unwrap();
        assert_eq!(fs.getattr("/a"), Err(libc::ENOENT));
        assert_eq!(fs.getattr("/").unwrap().nlink, 2);
        let after = fs.statfs();
        assert_eq!(after.free_blocks, before.free_blocks);
        assert_eq!(after.free_inodes, before.free_inodes);
        check_invariants(&fs);
    }

    #[test]
    fn rmdir_refuses_non_empty() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.mkdir("/d", 0o755).unwrap();
        fs.create("/d/f", 0o644).unwrap();
        assert_eq!(fs.rmdir("/d"), Err(libc::ENOTEMPTY));
        fs.unlink("/d/f").unwrap();
        fs.rmdir("/d").unwrap();
        check_invariants(&fs);
    }

    #[test]
    fn readdir_yields_dots_then_entries() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.mkdir("/d", 0o755).unwrap();
        fs.create("/d/f", 0o644).unwrap();
        fs.mkdir("/d/s", 0o755).unwrap();

        let listed = names(&fs, "/d");
        assert_eq!(&listed[..2], &[".", ".."]);
        let mut rest = listed[2..].to_vec();
        rest.sort();
        assert_eq!(rest, ["f", "s"]);

        fs.rmdir("/d/s").unwrap();
        assert!(!names(&fs, "/d").contains(&"s".to_string()));
    }

    #[test]
    fn readdir_reports_refused_sink() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.mkdir("/d", 0o755).unwrap();
        assert_eq!(fs.readdir("/d", |_, _| false), Err(libc::ENOMEM));
        let mut left = 3;
        let r = fs.readdir("/", |_, _| {
            left -= 1;
            left > 0
        });
        assert_eq!(r, Err(libc::ENOMEM));
    }

    #[test]
    fn swap_compaction_keeps_entries_packed() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.mkdir("/d", 0o755).unwrap();
        for name in ["a", "b", "c", "e"] {
            fs.create(&format!("/d/{name}"), 0o644).unwrap();
        }
        // Remove from the middle; the last entry takes its slot.
        fs.unlink("/d/b").unwrap();
        let mut rest = names(&fs, "/d")[2..].to_vec();
        rest.sort();
        assert_eq!(rest, ["a", "c", "e"]);
        let d = fs.inode(fs.resolve("/d").unwrap());
        assert_eq!(d.dir_entry_count, 3);
        assert_eq!(d.size, 3 * size_of::<crate::disk::DirEntry>() as u64);
        check_invariants(&fs);
    }

    #[test]
    fn directory_grows_and_shrinks_by_whole_blocks() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.mkdir("/d", 0o755).unwrap();
        let free_before = fs.statfs().free_blocks;

        // Fill exactly one block of entries, then one more.
        for i in 0..DENTRIES_PER_BLOCK {
            fs.create(&format!("/d/f{i}"), 0o644).unwrap();
        }
        // Extent block + one data block so far.
        assert_eq!(fs.statfs().free_blocks, free_before - 2);
        fs.create(&format!("/d/f{DENTRIES_PER_BLOCK}"), 0o644).unwrap();
        let d = fs.inode(fs.resolve("/d").unwrap());
        // Contiguous growth extended the extent in place.
        assert_eq!(d.extent_count, 1);
        assert_eq!(
            d.size,
            (DENTRIES_PER_BLOCK as u64 + 1) * size_of::<crate::disk::DirEntry>() as u64
        );
        assert_eq!(fs.statfs().free_blocks, free_before - 3);

        // Removing the overflow entry frees the second data block.
        fs.unlink(&format!("/d/f{DENTRIES_PER_BLOCK}")).unwrap();
        assert_eq!(fs.statfs().free_blocks, free_before - 2);
        let d = fs.inode(fs.resolve("/d").unwrap());
        assert_eq!(d.extent_count, 1);
        check_invariants(&fs);
    }

    #[test]
    fn link_counts_track_child_directories() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.mkdir("/d", 0o755).unwrap();
        fs.mkdir("/d/s1", 0o755).unwrap();
        fs.mkdir("/d/s2", 0o755).unwrap();
        fs.create("/d/f", 0o644).unwrap();
        assert_eq!(fs.getattr("/d").unwrap().nlink, 4);

        fs.rmdir("/d/s1").unwrap();
        assert_eq!(fs.getattr("/d").unwrap().nlink, 3);
        fs.rmdir("/d/s2").unwrap();
        assert_eq!(fs.getattr("/d").unwrap().nlink, 2);
        fs.unlink("/d/f").unwrap();
        // Empty again: no data blocks, no extent block, link count reset.
        let d = fs.inode(fs.resolve("/d").unwrap());
        assert_eq!((d.extent_count, d.dir_entry_count, d.size, d.links), (0, 0, 0, 2));
        check_invariants(&fs);
    }

    #[test]
    fn root_is_never_destroyed() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        // Removing "/" has no parent entry to compact.
        assert_eq!(fs.rmdir("/"), Err(libc::ENOENT));
        assert_eq!(fs.resolve("/"), Ok(ROOT_INO));
    }
}
