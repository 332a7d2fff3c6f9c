//! Entry point of the a1fs tools.
//!
//! The formatter and the driver ship as one binary dispatching on the name
//! it was invoked under; installing `mkfs.a1fs` as a link to `a1fs` yields
//! the two executables.

mod mkfs;
mod mount;

use a1fs::error;

fn main() {
    let (bin, args) = a1fs::args();
    match bin.as_str() {
        "mkfs.a1fs" | "mkfs" => mkfs::main(args),
        "a1fs" | "mount.a1fs" => mount::main(args),
        _ => error("a1fs", "invalid binary name"),
    }
}
