//! The `mkfs` tool initializes an empty filesystem on an image file.

use logfs::error;
use logfs::image::Image;
use logfs::layout::MAGIC;
use logfs::layout::SUPERBLOCK_SIZE;
use logfs::layout::Superblock;
use logfs::ops;
use logfs::prompt::prompt;
use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// If true, reformat without asking.
    force: bool,
    /// The path to the image file to format.
    image: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-f" | "--force") => res.force = true,
            _ => res.image = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" mkfs.logfs [options] <image>");
    println!();
    println!("Initializes an empty filesystem on an image file that already has the desired size.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
    println!(" -f, --force\tReformats without asking, even if the image already holds a filesystem.");
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_help();
        exit(0);
    }
    let path = args.image.unwrap_or_else(|| {
        error("mkfs.logfs", "specify path to an image");
    });
    let mut img = Image::open(&path).unwrap_or_else(|e| {
        error("mkfs.logfs", format_args!("{}: {e}", path.display()));
    });

    if img.len() >= SUPERBLOCK_SIZE && Superblock::read(&img).magic == MAGIC && !args.force {
        println!("{} already contains a filesystem", path.display());
        let confirm = prompt("Proceed anyway? (y/N) ")
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }

    ops::format(&mut img).unwrap_or_else(|e| {
        error("mkfs.logfs", format_args!("{}: {e}", path.display()));
    });
}
