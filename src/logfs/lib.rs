//! Core of the log-structured filesystem, shared by all the tools.
//!
//! The filesystem lives on a fixed-size image file. Every metadata and data
//! mutation appends a log entry at the head recorded in the superblock; the
//! live view of the tree is the most recent non-deleted entry per inode.
//! The formatter initializes an image, the mount server serves it through
//! FUSE, and the compactor rewrites it down to its live entries.

use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;
use std::{env, fmt};

pub mod image;
pub mod layout;
pub mod ops;
pub mod prompt;
pub mod scan;

/// Returns the command's name along with an iterator over the command's
/// arguments.
pub fn args() -> (String, ArgsOs) {
    let mut args = env::args_os();
    let bin = args
        .next()
        .map(PathBuf::from)
        .and_then(|p| {
            p.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| {
            error("logfs", "missing binary name");
        });
    (bin, args)
}

/// Writes an error to stderr, then exits.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}

/// Enumeration of filesystem operation errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FsError {
    /// The path does not resolve to a live entry.
    NotFound,
    /// The path already resolves to a live entry.
    Exists,
    /// The entry is not a directory.
    NotDir,
    /// The entry is a directory.
    IsDir,
    /// The log cannot hold the new entries.
    NoSpace,
}

impl FsError {
    /// Returns the matching errno value, for the filesystem bridge.
    pub fn errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NotDir => libc::ENOTDIR,
            Self::IsDir => libc::EISDIR,
            Self::NoSpace => libc::ENOSPC,
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(fmt, "entry not found"),
            Self::Exists => write!(fmt, "entry already exists"),
            Self::NotDir => write!(fmt, "not a directory"),
            Self::IsDir => write!(fmt, "is a directory"),
            Self::NoSpace => write!(fmt, "no space left on image"),
        }
    }
}
