//! Memory mapping of the image file.

use crate::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::Error;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::null_mut;
use std::slice;

/// A file system image mapped read-write into the address space.
///
/// The mapping is exclusively owned: every pointer into the image is a
/// borrow derived from this handle. Dropping it unmaps the image; changes
/// are carried to the file by the shared mapping.
pub struct ImageMap {
    ptr: *mut u8,
    len: usize,
    // Keeps the image file open for the lifetime of the mapping.
    _file: File,
}

// The handle is the sole owner of the mapping.
unsafe impl Send for ImageMap {}

impl ImageMap {
    /// Opens and maps the image file at `path`.
    ///
    /// Fails if the file cannot be opened read-write, is empty, or its size
    /// is not a multiple of the block size.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(Error::new(
                io::ErrorKind::InvalidData,
                format!("image size must be a non-zero multiple of {BLOCK_SIZE} bytes"),
            ));
        }
        let len = usize::try_from(len)
            .map_err(|_| Error::new(io::ErrorKind::InvalidData, "image too large to map"))?;
        let ptr = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
            _file: file,
        })
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the whole image.
    pub fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Returns the whole image, mutable.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for ImageMap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}
