//! The `fsck` tool compacts a filesystem image down to its live entries.
//!
//! Compaction keeps only the latest live entry of each inode, monotonically
//! reducing the log head without changing what the tree resolves to. It
//! requires exclusive access to the image: no mount may be active.

use logfs::error;
use logfs::image::Image;
use logfs::ops;
use logfs::scan;
use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// If true, list the live log entries instead of compacting.
    list: bool,
    /// The path to the image file.
    image: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-l" | "--list") => res.list = true,
            _ => res.image = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" fsck.logfs [options] <image>");
    println!();
    println!("Compacts the image so that only the latest live entry of each inode remains.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
    println!(" -l, --list\tLists the live log entries instead of compacting.");
}

/// Prints every live log entry of `img`.
fn list(img: &[u8]) {
    for (off, inode) in scan::entries(img) {
        if inode.deleted != 0 {
            continue;
        }
        println!(
            "inode {}: mode {:o}, size {}",
            inode.inode_number, inode.mode, inode.size
        );
        if inode.is_dir() {
            for dentry in scan::dentries(img, off) {
                println!(
                    "\t{} (inode {})",
                    String::from_utf8_lossy(dentry.name_bytes()),
                    dentry.inode_number
                );
            }
        }
    }
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_help();
        exit(0);
    }
    let path = args.image.unwrap_or_else(|| {
        error("fsck.logfs", "specify path to an image");
    });
    let mut img = Image::open(&path).unwrap_or_else(|e| {
        error("fsck.logfs", format_args!("{}: {e}", path.display()));
    });
    scan::validate(&img).unwrap_or_else(|e| {
        error("fsck.logfs", format_args!("{}: {e}", path.display()));
    });

    if args.list {
        list(&img);
        return;
    }
    ops::compact(&mut img);
}
