//! Regular file operations.

use crate::BLOCK_SIZE;
use crate::ctx::A1Fs;
use crate::disk::{Inode, Timestamp};
use crate::path::{ResolveError, split_parent_child};
use libc::c_int;

impl A1Fs {
    /// Creates an empty regular file at `path`.
    pub fn create(&mut self, path: &str, mode: u32) -> Result<(), c_int> {
        let (parent_path, name) = split_parent_child(path)?;
        let parent_ino = self.resolve(parent_path).map_err(ResolveError::errno)?;
        let ino = self.alloc_inode()?;
        self.set_inode(ino, &Inode::new(mode | libc::S_IFREG, 1));
        if let Err(e) = self.insert_entry(parent_ino, name.as_bytes(), ino, false) {
            // An inode without a directory entry would be unreachable.
            self.free_inode(ino);
            return Err(e);
        }
        Ok(())
    }

    /// Removes the regular file at `path`, releasing all of its blocks.
    pub fn unlink(&mut self, path: &str) -> Result<(), c_int> {
        let (parent_path, _) = split_parent_child(path)?;
        let parent_ino = self.resolve(parent_path).map_err(ResolveError::errno)?;
        let target_ino = self.resolve(path).map_err(ResolveError::errno)?;
        let mut target = self.inode(target_ino);
        if target.extent_count > 0 {
            self.shrink_to(target_ino, 0);
            target = self.inode(target_ino);
            target.size = 0;
            self.set_inode(target_ino, &target);
        }
        self.remove_entry(parent_ino, target_ino, false)?;
        self.free_inode(target_ino);
        Ok(())
    }

    /// Zeroes the file's bytes in `[from, to)`, a range that must lie within
    /// the allocated blocks.
    fn zero_file_range(&mut self, inode: &Inode, from: u64, to: u64) {
        let mut pos = from;
        while pos < to {
            let Some((blk, off)) = self.locate(inode, pos) else {
                return;
            };
            let n = (BLOCK_SIZE - off).min((to - pos) as usize);
            self.data_block_mut(blk)[off..off + n].fill(0);
            pos += n as u64;
        }
    }

    /// Grows the file until it covers `want` blocks.
    ///
    /// The stale tail of the current last block is zeroed first and every
    /// attached block comes zero-filled, so all bytes past the file's size
    /// read as zero afterwards. On `ENOSPC` the blocks attached so far stay
    /// committed and the size is raised to cover them, so the caller can
    /// observe how far the operation got.
    fn grow_file(&mut self, ino: u32, want: u64) -> Result<(), c_int> {
        let inode = self.inode(ino);
        let have = self.block_count(&inode) as u64;
        self.zero_file_range(&inode, inode.size, have * BLOCK_SIZE as u64);
        for attached in have..want {
            let res = if self.inode(ino).extent_count == 0 {
                self.grow_from_empty(ino)
            } else {
                self.append_block(ino)
            };
            if let Err(e) = res {
                let mut inode = self.inode(ino);
                let reached = attached * BLOCK_SIZE as u64;
                if reached > inode.size {
                    inode.size = reached;
                    inode.mtime = Timestamp::now();
                    self.set_inode(ino, &inode);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Sets the size of the file at `path`, growing it with zeros or
    /// shrinking it and releasing the discarded blocks.
    pub fn truncate(&mut self, path: &str, new_size: u64) -> Result<(), c_int> {
        let ino = self.resolve(path).map_err(ResolveError::errno)?;
        let mut inode = self.inode(ino);
        let old_size = inode.size;
        if new_size < old_size {
            let target = new_size.div_ceil(BLOCK_SIZE as u64) as u32;
            self.shrink_to(ino, target);
            inode = self.inode(ino);
        } else if new_size > old_size {
            self.grow_file(ino, new_size.div_ceil(BLOCK_SIZE as u64))?;
            inode = self.inode(ino);
        }
        inode.size = new_size;
        inode.mtime = Timestamp::now();
        self.set_inode(ino, &inode);
        Ok(())
    }

    /// Reads from the file at `path` into `buf`, starting at `offset`.
    ///
    /// The requested range must not straddle a block boundary. Returns the
    /// number of bytes read: 0 past the end of the file, and short counts
    /// when the file ends inside the range.
    pub fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, c_int> {
        let ino = self.resolve(path).map_err(ResolveError::errno)?;
        let inode = self.inode(ino);
        if offset >= inode.size {
            return Ok(0);
        }
        if offset as usize % BLOCK_SIZE + buf.len() > BLOCK_SIZE {
            return Err(libc::EINVAL);
        }
        let n = (buf.len() as u64).min(inode.size - offset) as usize;
        let Some((blk, off)) = self.locate(&inode, offset) else {
            return Err(libc::EIO);
        };
        buf[..n].copy_from_slice(&self.data_block(blk)[off..off + n]);
        Ok(n)
    }

    /// Writes `data` into the file at `path` at `offset`, extending the file
    /// and zero-filling any hole between the old end and the written range.
    ///
    /// The written range must not straddle a block boundary. Returns the
    /// number of bytes written.
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize, c_int> {
        if data.is_empty() {
            return Ok(0);
        }
        let ino = self.resolve(path).map_err(ResolveError::errno)?;
        if offset as usize % BLOCK_SIZE + data.len() > BLOCK_SIZE {
            return Err(libc::EINVAL);
        }
        let mut inode = self.inode(ino);
        let end = offset + data.len() as u64;
        let alloc = self.block_count(&inode) as u64 * BLOCK_SIZE as u64;
        if end > alloc {
            self.grow_file(ino, end.div_ceil(BLOCK_SIZE as u64))?;
            inode = self.inode(ino);
        } else if end > inode.size {
            // No growth, but the write lands past the end: the stretch from
            // the old end to the end of the allocated region must read as
            // zero around the written range.
            self.zero_file_range(&inode, inode.size, alloc);
        }
        let Some((blk, off)) = self.locate(&inode, offset) else {
            return Err(libc::EIO);
        };
        self.data_block_mut(blk)[off..off + data.len()].copy_from_slice(data);
        if end > inode.size {
            inode.size = end;
        }
        inode.mtime = Timestamp::now();
        self.set_inode(ino, &inode);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::BLOCK_SIZE;
    use crate::disk::Timestamp;
    use crate::testutil::{check_invariants, mkfs};

    #[test]
    fn write_then_read_back() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.create("/f", 0o644).unwrap();

        assert_eq!(fs.write("/f", 10, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read("/f", 10, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        // The hole before the written range reads as zero.
        assert_eq!(fs.read("/f", 5, &mut buf).unwrap(), 5);
        assert_eq!(&buf, &[0; 5]);
        assert_eq!(fs.getattr("/f").unwrap().size, 15);
        check_invariants(&fs);
    }

    #[test]
    fn read_beyond_eof() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", 0, b"abc").unwrap();

        let mut buf = [0u8; 8];
        // Reads past the end return 0 bytes.
        assert_eq!(fs.read("/f", 3, &mut buf).unwrap(), 0);
        assert_eq!(fs.read("/f", 100, &mut buf).unwrap(), 0);
        // A read ending past the end is shortened.
        assert_eq!(fs.read("/f", 1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn overwrite_keeps_size() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", 0, b"0123456789").unwrap();
        fs.write("/f", 2, b"xx").unwrap();
        assert_eq!(fs.getattr("/f").unwrap().size, 10);
        let mut buf = [0u8; 10];
        fs.read("/f", 0, &mut buf).unwrap();
        assert_eq!(&buf, b"01xx456789");
    }

    #[test]
    fn write_past_eof_zeroes_the_gap() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", 0, b"abc").unwrap();
        // Leaves a hole from byte 3 to byte 200 within the same block.
        fs.write("/f", 200, b"tail").unwrap();
        assert_eq!(fs.getattr("/f").unwrap().size, 204);

        let mut buf = [0u8; 100];
        assert_eq!(fs.read("/f", 3, &mut buf).unwrap(), 100);
        assert!(buf.iter().all(|&b| b == 0));
        let mut buf = [0u8; 4];
        fs.read("/f", 200, &mut buf).unwrap();
        assert_eq!(&buf, b"tail");
        check_invariants(&fs);
    }

    #[test]
    fn truncate_grow_then_shrink() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.create("/f", 0o644).unwrap();
        let free = fs.statfs().free_blocks;

        fs.truncate("/f", 2 * BLOCK_SIZE as u64).unwrap();
        let st = fs.getattr("/f").unwrap();
        assert_eq!(st.size, 2 * BLOCK_SIZE as u64);
        // Two data blocks plus the extent block, in 512-byte units.
        assert_eq!(st.blocks, 3 * (BLOCK_SIZE as u64 / 512));
        let mut buf = [0xffu8; 100];
        assert_eq!(fs.read("/f", 0, &mut buf).unwrap(), 100);
        assert!(buf.iter().all(|&b| b == 0));

        fs.truncate("/f", 100).unwrap();
        assert_eq!(fs.getattr("/f").unwrap().size, 100);
        // One data block and the extent block remain held.
        assert_eq!(fs.statfs().free_blocks, free - 2);
        check_invariants(&fs);
    }

    #[test]
    fn truncate_grow_zeroes_stale_tail() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.create("/f", 0o644).unwrap();
        fs.write("/f", 0, b"abc").unwrap();
        // Shrinking inside the block leaves the old byte in place on disk...
        fs.truncate("/f", 2).unwrap();
        // ...and growing again must expose zeros, not the stale byte.
        fs.truncate("/f", 5).unwrap();
        let mut buf = [0xffu8; 5];
        assert_eq!(fs.read("/f", 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"ab\0\0\0");
    }

    #[test]
    fn truncate_to_zero_releases_everything() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.create("/f", 0o644).unwrap();
        let free = fs.statfs().free_blocks;
        fs.truncate("/f", 3 * BLOCK_SIZE as u64).unwrap();
        fs.truncate("/f", 0).unwrap();
        let st = fs.getattr("/f").unwrap();
        assert_eq!((st.size, st.blocks), (0, 0));
        assert_eq!(fs.statfs().free_blocks, free);
        check_invariants(&fs);
    }

    #[test]
    fn create_then_unlink_restores_counters() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.mkdir("/d", 0o755).unwrap();
        let before = fs.statfs();

        fs.create("/d/f", 0o644).unwrap();
        fs.write("/d/f", 0, &[7u8; 1000]).unwrap();
        fs.truncate("/d/f", 3 * BLOCK_SIZE as u64).unwrap();
        fs.unlink("/d/f").unwrap();

        assert_eq!(fs.getattr("/d/f"), Err(libc::ENOENT));
        let after = fs.statfs();
        assert_eq!(after.free_blocks, before.free_blocks);
        assert_eq!(after.free_inodes, before.free_inodes);
        check_invariants(&fs);
    }

    #[test]
    fn utimens_sets_and_stamps() {
        let (mut fs, _img) = mkfs(1024 * 1024, 64);
        fs.create("/f", 0o644).unwrap();
        let ts = Timestamp {
            sec: 1_000_000,
            nsec: 42,
        };
        fs.utimens("/f", Some(ts)).unwrap();
        assert_eq!(fs.getattr("/f").unwrap().mtime, ts);
        fs.utimens("/f", None).unwrap();
        assert!(fs.getattr("/f").unwrap().mtime.sec > ts.sec);
    }

    #[test]
    fn extent_cap_reports_enospc() {
        // 8 MiB image: enough blocks for two fully fragmented files.
        let (mut fs, _img) = mkfs(8 * 1024 * 1024, 16);
        fs.create("/f", 0o644).unwrap();
        fs.create("/g", 0o644).unwrap();

        // Growing the two files in lockstep makes every extension of /f
        // collide with a block owned by /g, so each one adds an extent.
        for i in 1..=512u64 {
            fs.truncate("/f", i * BLOCK_SIZE as u64).unwrap();
            fs.truncate("/g", i * BLOCK_SIZE as u64).unwrap();
        }
        let f = fs.inode(fs.resolve("/f").unwrap());
        assert_eq!(f.extent_count, 512);

        let size_before = fs.getattr("/f").unwrap().size;
        let r = fs.write("/f", 512 * BLOCK_SIZE as u64, b"x");
        assert_eq!(r, Err(libc::ENOSPC));
        assert_eq!(fs.getattr("/f").unwrap().size, size_before);
        check_invariants(&fs);
    }
}
