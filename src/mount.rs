//! The a1fs driver: mounts an image and services file system calls.
//!
//! The driver maps the image, validates it and hands a path-based adapter to
//! the FUSE dispatcher. The dispatcher serializes operations (one worker
//! thread) and negates the errno values returned by the core; the adapter
//! only translates attributes and splits oversized transfers on block
//! boundaries, which the core requires.

use a1fs::disk::Timestamp;
use a1fs::{A1Fs, BLOCK_SIZE, FileStat, ImageMap, error};
use fuse_mt::{
    CallbackResult, CreatedEntry, DirectoryEntry, FileAttr, FileType, FilesystemMT, FuseMT,
    RequestInfo, ResultCreate, ResultEmpty, ResultEntry, ResultOpen, ResultReaddir, ResultSlice,
    ResultStatfs, ResultWrite, Statfs,
};
use libc::c_int;
use std::env::ArgsOs;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const BIN: &str = "a1fs";

/// How long the kernel may cache returned attributes.
const TTL: Duration = Duration::from_secs(1);

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the image file to mount.
    image: Option<PathBuf>,
    /// The directory on which the file system is to be mounted.
    mountpoint: Option<PathBuf>,
    /// Extra options forwarded to the dispatcher.
    fuse_opts: Vec<OsString>,
}

fn parse_args(mut args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-o") => {
                let Some(opt) = args.next() else {
                    error(BIN, "missing value after -o");
                };
                res.fuse_opts.push(opt);
            }
            _ if res.image.is_none() => res.image = Some(PathBuf::from(arg)),
            _ if res.mountpoint.is_none() => res.mountpoint = Some(PathBuf::from(arg)),
            _ => {
                print_usage();
                exit(1);
            }
        }
    }
    res
}

/// Prints command usage.
fn print_usage() {
    eprintln!("{BIN}: bad usage");
    eprintln!("Try '{BIN} --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!("Usage:");
    println!(" {BIN} [-h]");
    println!(" {BIN} [-o option[,...]] image mountpoint");
    println!();
    println!("Mounts the a1fs file system contained in the image file.");
    println!();
    println!("Options:");
    println!(" -o option\tforwards a mount option to the dispatcher");
    println!(" -h\t\tprints help");
}

/// Borrows a dispatcher path as UTF-8; names are stored as text on disk.
fn path_str(path: &Path) -> Result<&str, c_int> {
    path.to_str().ok_or(libc::EINVAL)
}

/// Joins a parent directory path and a child name.
fn child_path(parent: &Path, name: &OsStr) -> Result<String, c_int> {
    let parent = path_str(parent)?;
    let name = name.to_str().ok_or(libc::EINVAL)?;
    if parent.ends_with('/') {
        Ok(format!("{parent}{name}"))
    } else {
        Ok(format!("{parent}/{name}"))
    }
}

fn system_time(ts: Timestamp) -> SystemTime {
    UNIX_EPOCH + Duration::new(ts.sec.max(0) as u64, ts.nsec.clamp(0, 999_999_999) as u32)
}

fn timestamp(t: SystemTime) -> Timestamp {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => Timestamp {
            sec: d.as_secs() as i64,
            nsec: d.subsec_nanos() as i64,
        },
        Err(_) => Timestamp { sec: 0, nsec: 0 },
    }
}

/// Path-based adapter between the dispatcher and the mounted file system.
struct A1Driver {
    fs: Mutex<A1Fs>,
    uid: u32,
    gid: u32,
}

impl A1Driver {
    fn new(fs: A1Fs) -> Self {
        Self {
            fs: Mutex::new(fs),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn attr(&self, st: &FileStat) -> FileAttr {
        let kind = if st.mode & libc::S_IFMT == libc::S_IFDIR {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        let mtime = system_time(st.mtime);
        FileAttr {
            size: st.size,
            blocks: st.blocks,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm: (st.mode & 0o7777) as u16,
            nlink: st.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            flags: 0,
        }
    }
}

impl FilesystemMT for A1Driver {
    fn init(&self, _req: RequestInfo) -> ResultEmpty {
        Ok(())
    }

    fn getattr(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>) -> ResultEntry {
        let fs = self.fs.lock().map_err(|_| libc::EIO)?;
        let st = fs.getattr(path_str(path)?)?;
        Ok((TTL, self.attr(&st)))
    }

    fn truncate(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, size: u64) -> ResultEmpty {
        let mut fs = self.fs.lock().map_err(|_| libc::EIO)?;
        fs.truncate(path_str(path)?, size)
    }

    fn utimens(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        _atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> ResultEmpty {
        let mut fs = self.fs.lock().map_err(|_| libc::EIO)?;
        fs.utimens(path_str(path)?, mtime.map(timestamp))
    }

    fn mkdir(&self, _req: RequestInfo, parent: &Path, name: &OsStr, mode: u32) -> ResultEntry {
        let mut fs = self.fs.lock().map_err(|_| libc::EIO)?;
        let path = child_path(parent, name)?;
        fs.mkdir(&path, mode)?;
        let st = fs.getattr(&path)?;
        Ok((TTL, self.attr(&st)))
    }

    fn unlink(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        let mut fs = self.fs.lock().map_err(|_| libc::EIO)?;
        fs.unlink(&child_path(parent, name)?)
    }

    fn rmdir(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        let mut fs = self.fs.lock().map_err(|_| libc::EIO)?;
        fs.rmdir(&child_path(parent, name)?)
    }

    fn open(&self, _req: RequestInfo, _path: &Path, _flags: u32) -> ResultOpen {
        Ok((0, 0))
    }

    fn read(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: u64,
        offset: u64,
        size: u32,
        callback: impl FnOnce(ResultSlice<'_>) -> CallbackResult,
    ) -> CallbackResult {
        let Ok(fs) = self.fs.lock() else {
            return callback(Err(libc::EIO));
        };
        let path = match path_str(path) {
            Ok(p) => p,
            Err(e) => return callback(Err(e)),
        };
        // The core reads within one block at a time.
        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let off = offset + filled as u64;
            let chunk = (BLOCK_SIZE - off as usize % BLOCK_SIZE).min(buf.len() - filled);
            match fs.read(path, off, &mut buf[filled..filled + chunk]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    if n < chunk {
                        break;
                    }
                }
                Err(e) => return callback(Err(e)),
            }
        }
        callback(Ok(&buf[..filled]))
    }

    fn write(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: u64,
        offset: u64,
        data: Vec<u8>,
        _flags: u32,
    ) -> ResultWrite {
        let mut fs = self.fs.lock().map_err(|_| libc::EIO)?;
        let path = path_str(path)?;
        // The core writes within one block at a time.
        let mut written = 0;
        while written < data.len() {
            let off = offset + written as u64;
            let chunk = (BLOCK_SIZE - off as usize % BLOCK_SIZE).min(data.len() - written);
            match fs.write(path, off, &data[written..written + chunk]) {
                Ok(n) => written += n,
                Err(e) if written == 0 => return Err(e),
                Err(_) => break,
            }
        }
        Ok(written as u32)
    }

    fn flush(&self, _req: RequestInfo, _path: &Path, _fh: u64, _lock_owner: u64) -> ResultEmpty {
        Ok(())
    }

    fn release(
        &self,
        _req: RequestInfo,
        _path: &Path,
        _fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> ResultEmpty {
        Ok(())
    }

    fn opendir(&self, _req: RequestInfo, _path: &Path, _flags: u32) -> ResultOpen {
        Ok((0, 0))
    }

    fn readdir(&self, _req: RequestInfo, path: &Path, _fh: u64) -> ResultReaddir {
        let fs = self.fs.lock().map_err(|_| libc::EIO)?;
        let mut entries = Vec::new();
        fs.readdir(path_str(path)?, |name, mode| {
            let kind = if mode & libc::S_IFMT == libc::S_IFDIR {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push(DirectoryEntry {
                name: OsStr::from_bytes(name).to_owned(),
                kind,
            });
            true
        })?;
        Ok(entries)
    }

    fn releasedir(&self, _req: RequestInfo, _path: &Path, _fh: u64, _flags: u32) -> ResultEmpty {
        Ok(())
    }

    fn statfs(&self, _req: RequestInfo, _path: &Path) -> ResultStatfs {
        let fs = self.fs.lock().map_err(|_| libc::EIO)?;
        let st = fs.statfs();
        Ok(Statfs {
            blocks: st.total_blocks as u64,
            bfree: st.free_blocks as u64,
            bavail: st.free_blocks as u64,
            files: st.total_inodes as u64,
            ffree: st.free_inodes as u64,
            bsize: st.block_size,
            namelen: st.name_max,
            frsize: st.block_size,
        })
    }

    fn create(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        mode: u32,
        _flags: u32,
    ) -> ResultCreate {
        let mut fs = self.fs.lock().map_err(|_| libc::EIO)?;
        let path = child_path(parent, name)?;
        fs.create(&path, mode)?;
        let st = fs.getattr(&path)?;
        Ok(CreatedEntry {
            ttl: TTL,
            attr: self.attr(&st),
            fh: 0,
            flags: 0,
        })
    }
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_help();
        exit(0);
    }
    let (Some(image), Some(mountpoint)) = (args.image, args.mountpoint) else {
        print_usage();
        exit(1);
    };
    let map = ImageMap::open(&image).unwrap_or_else(|e| {
        error(BIN, format_args!("{}: {e}", image.display()));
    });
    let fs = A1Fs::new(map).unwrap_or_else(|e| {
        error(BIN, format_args!("{}: {e}", image.display()));
    });
    let driver = A1Driver::new(fs);

    let mut opts: Vec<OsString> = vec!["-o".into(), "fsname=a1fs".into()];
    for o in args.fuse_opts {
        opts.push("-o".into());
        opts.push(o);
    }
    let opt_refs: Vec<&OsStr> = opts.iter().map(OsString::as_os_str).collect();
    // One dispatch thread: operations are serialized, the core needs no
    // locking of its own.
    if let Err(e) = fuse_mt::mount(FuseMT::new(driver, 1), &mountpoint, &opt_refs) {
        error(BIN, format_args!("{}: {e}", mountpoint.display()));
    }
}
