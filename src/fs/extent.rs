//! Extent map operations.
//!
//! Each inode's extents live in one dedicated data block, appended in
//! traversal order: the file's byte stream is the concatenation of the
//! extents in array order, so every offset walk below iterates that order
//! rather than sorting by start block.

use crate::ctx::A1Fs;
use crate::disk::{Extent, Inode};
use crate::{BLOCK_SIZE, EXTENTS_PER_FILE};
use libc::c_int;

impl A1Fs {
    /// Number of data blocks covered by the inode's extents.
    pub(crate) fn block_count(&self, inode: &Inode) -> u32 {
        (0..inode.extent_count)
            .map(|k| self.extent(inode.extent_block, k).count)
            .sum()
    }

    /// Number of blocks owned by the inode, extent block included.
    ///
    /// The extent block exists only while `extent_count > 0`.
    pub(crate) fn stat_blocks(&self, inode: &Inode) -> u32 {
        if inode.extent_count == 0 {
            0
        } else {
            1 + self.block_count(inode)
        }
    }

    /// Index of the inode's last data block.
    ///
    /// The inode must own at least one extent.
    pub(crate) fn last_block_index(&self, inode: &Inode) -> u32 {
        let e = self.extent(inode.extent_block, inode.extent_count - 1);
        e.start + e.count - 1
    }

    /// Maps a byte offset to `(data block index, offset within block)`.
    ///
    /// Returns `None` when the offset lies beyond the allocated blocks.
    pub(crate) fn locate(&self, inode: &Inode, offset: u64) -> Option<(u32, usize)> {
        let mut acc = 0u64;
        for k in 0..inode.extent_count {
            let e = self.extent(inode.extent_block, k);
            let len = e.count as u64 * BLOCK_SIZE as u64;
            if offset < acc + len {
                let within = offset - acc;
                let blk = e.start + (within / BLOCK_SIZE as u64) as u32;
                return Some((blk, (within % BLOCK_SIZE as u64) as usize));
            }
            acc += len;
        }
        None
    }

    /// Gives the empty inode its extent block and a first data block.
    ///
    /// Requires two free data blocks; fails `ENOSPC` otherwise, leaving the
    /// inode untouched.
    pub(crate) fn grow_from_empty(&mut self, ino: u32) -> Result<(), c_int> {
        if self.superblock().available_blocks < 2 {
            return Err(libc::ENOSPC);
        }
        let ext_blk = self.alloc_data_block()?;
        let first = self.alloc_data_block()?;
        self.set_extent(
            ext_blk,
            0,
            Extent {
                start: first,
                count: 1,
            },
        );
        let mut inode = self.inode(ino);
        inode.extent_block = ext_blk;
        inode.extent_count = 1;
        self.set_inode(ino, &inode);
        Ok(())
    }

    /// Attaches one more zero-filled data block to a non-empty inode.
    ///
    /// If the block right after the current last one is free it is claimed
    /// and the last extent grows in place; otherwise the lowest free block
    /// starts a new extent, subject to the per-inode extent cap.
    pub(crate) fn append_block(&mut self, ino: u32) -> Result<(), c_int> {
        let inode = self.inode(ino);
        let last = self.last_block_index(&inode);
        if self.data_block_is_free(last + 1) {
            self.claim_data_block(last + 1);
            let mut e = self.extent(inode.extent_block, inode.extent_count - 1);
            e.count += 1;
            self.set_extent(inode.extent_block, inode.extent_count - 1, e);
        } else {
            if inode.extent_count as usize == EXTENTS_PER_FILE {
                return Err(libc::ENOSPC);
            }
            let blk = self.alloc_data_block()?;
            self.set_extent(
                inode.extent_block,
                inode.extent_count,
                Extent {
                    start: blk,
                    count: 1,
                },
            );
            let mut inode = inode;
            inode.extent_count += 1;
            self.set_inode(ino, &inode);
        }
        Ok(())
    }

    /// Shrinks the inode to its first `target_blocks` data blocks, freeing
    /// the discarded tail. At zero the extent block itself is released.
    pub(crate) fn shrink_to(&mut self, ino: u32, target_blocks: u32) {
        let mut inode = self.inode(ino);
        let orig_count = inode.extent_count;
        let mut kept_extents = 0;
        let mut acc = 0u32;
        for k in 0..orig_count {
            let mut e = self.extent(inode.extent_block, k);
            let keep = e.count.min(target_blocks.saturating_sub(acc));
            for b in keep..e.count {
                self.free_data_block(e.start + b);
            }
            acc += e.count;
            if keep > 0 {
                if keep != e.count {
                    e.count = keep;
                    self.set_extent(inode.extent_block, k, e);
                }
                kept_extents = k + 1;
            }
        }
        inode.extent_count = kept_extents;
        if target_blocks == 0 && orig_count > 0 {
            self.free_data_block(inode.extent_block);
            inode.extent_block = 0;
        }
        self.set_inode(ino, &inode);
    }
}
