//! Mounted file system runtime context.
//!
//! [`A1Fs`] owns the mapped image and caches the region layout. All reads
//! and writes of on-disk records go through its typed accessors; the
//! allocators below are the only code allowed to touch the bitmaps, so a
//! bitmap bit and its superblock counter always move together.

use crate::disk::{DirEntry, Extent, Inode, Layout, Superblock, Timestamp};
use crate::map::ImageMap;
use crate::path::ResolveError;
use crate::{BLOCK_SIZE, MAGIC, bitmap};
use libc::c_int;
use std::fmt;
use std::mem::size_of;

/// An error preventing an image from being mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountError {
    /// The image does not begin with the a1fs magic number.
    BadMagic,
    /// The superblock's geometry is inconsistent with the image.
    BadGeometry,
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "image does not contain an a1fs file system"),
            Self::BadGeometry => write!(f, "image has a corrupt a1fs superblock"),
        }
    }
}

/// File system statistics, as reported by statfs.
#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub block_size: u32,
    /// Total number of data blocks.
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub name_max: u32,
}

/// Attributes of one file or directory, as reported by getattr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub ino: u32,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    /// Allocated size in 512-byte units, extent block included.
    pub blocks: u64,
    pub mtime: Timestamp,
}

/// A mounted a1fs file system.
pub struct A1Fs {
    img: ImageMap,
    layout: Layout,
}

impl A1Fs {
    /// Mounts the mapped image.
    pub fn new(img: ImageMap) -> Result<Self, MountError> {
        let sb: Superblock =
            *bytemuck::from_bytes(&img.bytes()[..size_of::<Superblock>()]);
        if sb.magic != MAGIC {
            return Err(MountError::BadMagic);
        }
        if sb.size != img.len() as u64 {
            return Err(MountError::BadGeometry);
        }
        let layout = Layout::from_superblock(&sb).ok_or(MountError::BadGeometry)?;
        Ok(Self { img, layout })
    }

    /// Region layout of the image.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub(crate) fn superblock(&self) -> &Superblock {
        bytemuck::from_bytes(&self.img.bytes()[..size_of::<Superblock>()])
    }

    fn superblock_mut(&mut self) -> &mut Superblock {
        bytemuck::from_bytes_mut(&mut self.img.bytes_mut()[..size_of::<Superblock>()])
    }

    /// Reads the inode at index `ino`.
    pub(crate) fn inode(&self, ino: u32) -> Inode {
        let off = self.layout.inode_table_start() + ino as usize * size_of::<Inode>();
        *bytemuck::from_bytes(&self.img.bytes()[off..off + size_of::<Inode>()])
    }

    /// Writes the inode record at index `ino`.
    pub(crate) fn set_inode(&mut self, ino: u32, inode: &Inode) {
        let off = self.layout.inode_table_start() + ino as usize * size_of::<Inode>();
        *bytemuck::from_bytes_mut(&mut self.img.bytes_mut()[off..off + size_of::<Inode>()]) =
            *inode;
    }

    pub(crate) fn inode_bitmap(&self) -> &[u8] {
        &self.img.bytes()[self.layout.inode_bitmap_start()..self.layout.data_bitmap_start()]
    }

    fn inode_bitmap_mut(&mut self) -> &mut [u8] {
        let (start, end) = (
            self.layout.inode_bitmap_start(),
            self.layout.data_bitmap_start(),
        );
        &mut self.img.bytes_mut()[start..end]
    }

    pub(crate) fn data_bitmap(&self) -> &[u8] {
        &self.img.bytes()[self.layout.data_bitmap_start()..self.layout.inode_table_start()]
    }

    fn data_bitmap_mut(&mut self) -> &mut [u8] {
        let (start, end) = (
            self.layout.data_bitmap_start(),
            self.layout.inode_table_start(),
        );
        &mut self.img.bytes_mut()[start..end]
    }

    /// Returns the data block at index `blk`.
    pub(crate) fn data_block(&self, blk: u32) -> &[u8] {
        let off = self.layout.data_block_offset(blk);
        &self.img.bytes()[off..off + BLOCK_SIZE]
    }

    /// Returns the data block at index `blk`, mutable.
    pub(crate) fn data_block_mut(&mut self, blk: u32) -> &mut [u8] {
        let off = self.layout.data_block_offset(blk);
        &mut self.img.bytes_mut()[off..off + BLOCK_SIZE]
    }

    /// Reads entry `k` of the extent array stored in data block `ext_blk`.
    pub(crate) fn extent(&self, ext_blk: u32, k: u32) -> Extent {
        let off = k as usize * size_of::<Extent>();
        *bytemuck::from_bytes(&self.data_block(ext_blk)[off..off + size_of::<Extent>()])
    }

    /// Writes entry `k` of the extent array stored in data block `ext_blk`.
    pub(crate) fn set_extent(&mut self, ext_blk: u32, k: u32, e: Extent) {
        let off = k as usize * size_of::<Extent>();
        *bytemuck::from_bytes_mut(
            &mut self.data_block_mut(ext_blk)[off..off + size_of::<Extent>()],
        ) = e;
    }

    /// Reads directory entry `slot` of data block `blk`.
    pub(crate) fn dentry(&self, blk: u32, slot: u32) -> DirEntry {
        let off = slot as usize * size_of::<DirEntry>();
        *bytemuck::from_bytes(&self.data_block(blk)[off..off + size_of::<DirEntry>()])
    }

    /// Writes directory entry `slot` of data block `blk`.
    pub(crate) fn set_dentry(&mut self, blk: u32, slot: u32, entry: &DirEntry) {
        let off = slot as usize * size_of::<DirEntry>();
        *bytemuck::from_bytes_mut(
            &mut self.data_block_mut(blk)[off..off + size_of::<DirEntry>()],
        ) = *entry;
    }

    /// Allocates the lowest free inode index.
    pub(crate) fn alloc_inode(&mut self) -> Result<u32, c_int> {
        let n = self.superblock().num_inodes;
        let Some(ino) = bitmap::find_first_clear(self.inode_bitmap(), n) else {
            return Err(libc::ENOSPC);
        };
        bitmap::set(self.inode_bitmap_mut(), ino);
        self.superblock_mut().available_inodes -= 1;
        Ok(ino)
    }

    /// Releases the inode at index `ino`.
    pub(crate) fn free_inode(&mut self, ino: u32) {
        bitmap::clear(self.inode_bitmap_mut(), ino);
        self.superblock_mut().available_inodes += 1;
    }

    /// Tells whether data block `blk` exists and is free.
    pub(crate) fn data_block_is_free(&self, blk: u32) -> bool {
        blk < self.layout.data_blocks && !bitmap::test(self.data_bitmap(), blk)
    }

    /// Allocates the lowest free data block and zero-fills it.
    pub(crate) fn alloc_data_block(&mut self) -> Result<u32, c_int> {
        let n = self.layout.data_blocks;
        let Some(blk) = bitmap::find_first_clear(self.data_bitmap(), n) else {
            return Err(libc::ENOSPC);
        };
        self.claim_data_block(blk);
        Ok(blk)
    }

    /// Allocates the known-free data block `blk` and zero-fills it.
    pub(crate) fn claim_data_block(&mut self, blk: u32) {
        bitmap::set(self.data_bitmap_mut(), blk);
        self.superblock_mut().available_blocks -= 1;
        self.data_block_mut(blk).fill(0);
    }

    /// Releases data block `blk`.
    pub(crate) fn free_data_block(&mut self, blk: u32) {
        bitmap::clear(self.data_bitmap_mut(), blk);
        self.superblock_mut().available_blocks += 1;
    }

    /// Reports file system statistics from the superblock counters.
    pub fn statfs(&self) -> FsStats {
        let sb = self.superblock();
        FsStats {
            block_size: BLOCK_SIZE as u32,
            total_blocks: self.layout.data_blocks,
            free_blocks: sb.available_blocks,
            total_inodes: sb.num_inodes,
            free_inodes: sb.available_inodes,
            name_max: crate::NAME_MAX as u32,
        }
    }

    /// Reports the attributes of the file or directory at `path`.
    pub fn getattr(&self, path: &str) -> Result<FileStat, c_int> {
        let ino = self.resolve(path).map_err(ResolveError::errno)?;
        let inode = self.inode(ino);
        Ok(FileStat {
            ino,
            mode: inode.mode,
            nlink: inode.links,
            size: inode.size,
            blocks: self.stat_blocks(&inode) as u64 * (BLOCK_SIZE / 512) as u64,
            mtime: inode.mtime,
        })
    }

    /// Sets the modification time of the file or directory at `path`, to
    /// `mtime` if given and to the current time otherwise.
    pub fn utimens(&mut self, path: &str, mtime: Option<Timestamp>) -> Result<(), c_int> {
        let ino = self.resolve(path).map_err(ResolveError::errno)?;
        let mut inode = self.inode(ino);
        inode.mtime = mtime.unwrap_or_else(Timestamp::now);
        self.set_inode(ino, &inode);
        Ok(())
    }
}
