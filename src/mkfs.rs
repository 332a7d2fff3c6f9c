//! The `mkfs.a1fs` tool formats an image file into an a1fs file system.

use a1fs::{BLOCK_SIZE, ImageMap, error, format};
use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;

const BIN: &str = "mkfs.a1fs";

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// Overwrite an existing a1fs file system.
    force: bool,
    /// Zero out the image contents before formatting.
    zero: bool,
    /// Number of inodes.
    n_inodes: Option<u32>,
    /// The path to the image file to format.
    image: Option<PathBuf>,
}

fn parse_args(mut args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-f") => res.force = true,
            Some("-z") => res.zero = true,
            Some("-i") => {
                res.n_inodes = args
                    .next()
                    .and_then(|v| v.to_str().and_then(|v| v.parse().ok()));
                if res.n_inodes.is_none() {
                    error(BIN, "invalid number of inodes");
                }
            }
            _ => res.image = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!("Usage:");
    println!(" {BIN} -i num [-f] [-z] image");
    println!();
    println!("Formats the image file into an a1fs file system. The file must exist");
    println!("and its size must be a multiple of {BLOCK_SIZE} bytes.");
    println!();
    println!("Options:");
    println!(" -i num\tnumber of inodes; required");
    println!(" -f\tforce format, overwriting an existing a1fs file system");
    println!(" -z\tzero out the image contents");
    println!(" -h\tprints help");
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_help();
        exit(0);
    }
    let Some(image) = args.image else {
        error(BIN, "specify path to an image file");
    };
    let n_inodes = args.n_inodes.unwrap_or(0);
    if n_inodes == 0 {
        error(BIN, "missing or invalid number of inodes");
    }
    let mut map = ImageMap::open(&image).unwrap_or_else(|e| {
        error(BIN, format_args!("{}: {e}", image.display()));
    });
    if !args.force && format::is_present(&map) {
        error(BIN, "image already contains a1fs; use -f to overwrite");
    }
    format::format(&mut map, n_inodes, args.zero).unwrap_or_else(|e| {
        error(BIN, format_args!("failed to format the image: {e}"));
    });
}
