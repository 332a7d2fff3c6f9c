//! On-disk structures of a1fs and the image layout computation.
//!
//! The image is a contiguous array of 4096-byte blocks: superblock, inode
//! bitmap, data bitmap, inode table, then the data region. All records are
//! little-endian, tightly packed `Pod` types accessed in place inside the
//! mapped image. Field order is part of the format.

use crate::{BLOCK_SIZE, MAGIC};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of bits covered by one bitmap block.
const BITS_PER_BLOCK: u64 = (BLOCK_SIZE * 8) as u64;

/// The a1fs superblock, stored in the first block of the image.
///
/// The two `available_*` counters are authoritative: they are updated on
/// every allocation and free, so answering statfs never requires scanning a
/// bitmap.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Superblock {
    /// Must be [`MAGIC`].
    pub magic: u64,
    /// Image size in bytes.
    pub size: u64,
    /// Total number of inodes.
    pub num_inodes: u32,
    /// Number of unallocated inodes.
    pub available_inodes: u32,
    /// Length of the inode bitmap, in blocks.
    pub inode_bitmap_len: u32,
    /// Length of the data bitmap, in blocks.
    pub data_bitmap_len: u32,
    /// Length of the inode table, in blocks.
    pub inode_table_len: u32,
    /// Number of unallocated data blocks.
    pub available_blocks: u32,
}

/// A modification timestamp, seconds and nanoseconds since the Unix epoch.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i64,
}

impl Timestamp {
    /// Returns the current wall-clock time.
    ///
    /// A clock read failure is reported to stderr and yields the epoch; it
    /// must not fail the enclosing operation.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                sec: d.as_secs() as i64,
                nsec: d.subsec_nanos() as i64,
            },
            Err(_) => {
                eprintln!("a1fs: failed to read the system clock");
                Self { sec: 0, nsec: 0 }
            }
        }
    }
}

/// An inode, one fixed-size record per file or directory.
///
/// The extent array is not inlined: it lives in a dedicated data block named
/// by `extent_block`. That block is allocated lazily; while `extent_count`
/// is zero the field is meaningless.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Inode {
    /// File type and permission bits, as in `st_mode`.
    pub mode: u32,
    /// Number of hard links. 1 for a file, `2 + child directories` for a
    /// directory.
    pub links: u32,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time.
    pub mtime: Timestamp,
    /// Number of valid entries in the extent array.
    pub extent_count: u32,
    /// Number of directory entries; zero for regular files.
    pub dir_entry_count: u32,
    /// Data-block index of the block holding the extent array.
    pub extent_block: u32,
    pub _pad: u32,
}

impl Inode {
    /// Returns a fresh inode with no data, stamped with the current time.
    pub fn new(mode: u32, links: u32) -> Self {
        Self {
            mode,
            links,
            size: 0,
            mtime: Timestamp::now(),
            extent_count: 0,
            dir_entry_count: 0,
            extent_block: 0,
            _pad: 0,
        }
    }

    /// Tells whether the inode is a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    /// Tells whether the inode is a regular file.
    pub fn is_file(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }
}

/// An extent: `count` contiguous data blocks starting at index `start`.
///
/// The logical byte stream of a file is the concatenation of its extents in
/// array order; `start` values are not sorted.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct Extent {
    /// Data-block index of the first block.
    pub start: u32,
    /// Number of blocks, at least 1.
    pub count: u32,
}

/// A directory entry. Entries pack contiguously in the directory's byte
/// stream with no holes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DirEntry {
    /// Inode index of the child.
    pub ino: u32,
    /// Child name, zero-padded.
    pub name: [u8; crate::NAME_MAX],
}

impl DirEntry {
    /// Builds an entry for `name`, which must be shorter than [`crate::NAME_MAX`].
    pub fn new(ino: u32, name: &[u8]) -> Self {
        let mut e = Self {
            ino,
            name: [0; crate::NAME_MAX],
        };
        e.name[..name.len()].copy_from_slice(name);
        e
    }

    /// Returns the name, without the zero padding.
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        &self.name[..len]
    }
}

/// Lengths of the image regions, in blocks, in on-image order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Total number of blocks in the image.
    pub total_blocks: u32,
    /// Length of the inode bitmap.
    pub inode_bitmap_blocks: u32,
    /// Length of the data bitmap.
    pub data_bitmap_blocks: u32,
    /// Length of the inode table.
    pub inode_table_blocks: u32,
    /// Length of the data region.
    pub data_blocks: u32,
}

impl Layout {
    /// Derives the layout for a fresh image of `image_size` bytes holding
    /// `n_inodes` inodes.
    ///
    /// Returns `None` if the geometry is infeasible: no inodes, or the
    /// reserved prefix leaves no data region.
    pub fn compute(image_size: u64, n_inodes: u32) -> Option<Self> {
        if n_inodes == 0 || image_size % BLOCK_SIZE as u64 != 0 {
            return None;
        }
        let total_blocks = u32::try_from(image_size / BLOCK_SIZE as u64).ok()?;
        let inode_bitmap_blocks = (n_inodes as u64).div_ceil(BITS_PER_BLOCK) as u32;
        // Upper bound on the data region, used to size its bitmap.
        let data_bound = total_blocks.checked_sub(1 + inode_bitmap_blocks)?;
        let data_bitmap_blocks = (data_bound as u64).div_ceil(BITS_PER_BLOCK) as u32;
        let inode_table_blocks = (n_inodes as u64 * size_of::<Inode>() as u64)
            .div_ceil(BLOCK_SIZE as u64) as u32;
        let data_blocks = total_blocks
            .checked_sub(1 + inode_bitmap_blocks + data_bitmap_blocks + inode_table_blocks)?;
        if data_blocks == 0 {
            return None;
        }
        Some(Self {
            total_blocks,
            inode_bitmap_blocks,
            data_bitmap_blocks,
            inode_table_blocks,
            data_blocks,
        })
    }

    /// Rebuilds the layout of a mounted image from its superblock.
    ///
    /// The stored region lengths are authoritative; the data-region length is
    /// derived from them. Returns `None` if the regions do not fit in the
    /// image or cannot hold the advertised inode count.
    pub fn from_superblock(sb: &Superblock) -> Option<Self> {
        if sb.size % BLOCK_SIZE as u64 != 0 {
            return None;
        }
        let total_blocks = u32::try_from(sb.size / BLOCK_SIZE as u64).ok()?;
        let data_blocks = total_blocks
            .checked_sub(1 + sb.inode_bitmap_len + sb.data_bitmap_len + sb.inode_table_len)?;
        if data_blocks == 0
            || (sb.inode_bitmap_len as u64) * BITS_PER_BLOCK < sb.num_inodes as u64
            || (sb.data_bitmap_len as u64) * BITS_PER_BLOCK < data_blocks as u64
            || (sb.inode_table_len as u64) * (BLOCK_SIZE as u64)
                < sb.num_inodes as u64 * (size_of::<Inode>() as u64)
        {
            return None;
        }
        Some(Self {
            total_blocks,
            inode_bitmap_blocks: sb.inode_bitmap_len,
            data_bitmap_blocks: sb.data_bitmap_len,
            inode_table_blocks: sb.inode_table_len,
            data_blocks,
        })
    }

    /// Byte offset of the inode bitmap.
    pub fn inode_bitmap_start(&self) -> usize {
        BLOCK_SIZE
    }

    /// Byte offset of the data bitmap.
    pub fn data_bitmap_start(&self) -> usize {
        (1 + self.inode_bitmap_blocks) as usize * BLOCK_SIZE
    }

    /// Byte offset of the inode table.
    pub fn inode_table_start(&self) -> usize {
        (1 + self.inode_bitmap_blocks + self.data_bitmap_blocks) as usize * BLOCK_SIZE
    }

    /// Byte offset of the data region.
    pub fn data_start(&self) -> usize {
        (1 + self.inode_bitmap_blocks + self.data_bitmap_blocks + self.inode_table_blocks) as usize
            * BLOCK_SIZE
    }

    /// Byte offset of the data block at index `blk`.
    pub fn data_block_offset(&self, blk: u32) -> usize {
        self.data_start() + blk as usize * BLOCK_SIZE
    }
}

/// Builds a fresh superblock for the given layout.
pub fn superblock_for(layout: &Layout, image_size: u64, n_inodes: u32) -> Superblock {
    Superblock {
        magic: MAGIC,
        size: image_size,
        num_inodes: n_inodes,
        // The root inode is allocated at format time.
        available_inodes: n_inodes - 1,
        inode_bitmap_len: layout.inode_bitmap_blocks,
        data_bitmap_len: layout.data_bitmap_blocks,
        inode_table_len: layout.inode_table_blocks,
        available_blocks: layout.data_blocks,
    }
}
