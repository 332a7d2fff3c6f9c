//! One-shot image formatter.

use crate::disk::{self, Inode, Layout, Superblock};
use crate::map::ImageMap;
use crate::{MAGIC, ROOT_INO, bitmap};
use std::fmt;
use std::mem::size_of;

/// An error preventing an image from being formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// The requested geometry does not leave room for a data region.
    Geometry,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Geometry => write!(f, "image too small for the requested inode count"),
        }
    }
}

/// Tells whether the image already contains an a1fs file system.
pub fn is_present(img: &ImageMap) -> bool {
    let sb: &Superblock = bytemuck::from_bytes(&img.bytes()[..size_of::<Superblock>()]);
    sb.magic == MAGIC
}

/// Writes an empty a1fs file system onto the image: superblock, zeroed
/// bitmaps with the root inode marked used, and an empty root directory.
///
/// With `zero` the whole image is wiped first; otherwise only the metadata
/// the driver trusts is reset.
pub fn format(img: &mut ImageMap, n_inodes: u32, zero: bool) -> Result<(), FormatError> {
    let layout = Layout::compute(img.len() as u64, n_inodes).ok_or(FormatError::Geometry)?;
    if zero {
        img.bytes_mut().fill(0);
    } else {
        // Both bitmaps must start out clear.
        img.bytes_mut()[layout.inode_bitmap_start()..layout.inode_table_start()].fill(0);
    }

    let sb = disk::superblock_for(&layout, img.len() as u64, n_inodes);
    *bytemuck::from_bytes_mut(&mut img.bytes_mut()[..size_of::<Superblock>()]) = sb;

    let (ibm_start, ibm_end) = (layout.inode_bitmap_start(), layout.data_bitmap_start());
    bitmap::set(&mut img.bytes_mut()[ibm_start..ibm_end], ROOT_INO);

    // The root directory is its own parent: two links from the start.
    let root = Inode::new(libc::S_IFDIR | 0o777, 2);
    let root_off = layout.inode_table_start() + ROOT_INO as usize * size_of::<Inode>();
    *bytemuck::from_bytes_mut(&mut img.bytes_mut()[root_off..root_off + size_of::<Inode>()]) =
        root;
    Ok(())
}
