//! The `mount` tool serves a filesystem image through FUSE.
//!
//! The kernel bridge dispatches one operation at a time, so every handler
//! runs to completion against the mapped image before the next one starts.
//! Reads only scan the log; mutations append at the head.

use fuser::FileAttr;
use fuser::FileType;
use fuser::Filesystem;
use fuser::MountOption;
use fuser::ReplyAttr;
use fuser::ReplyData;
use fuser::ReplyDirectory;
use fuser::ReplyEmpty;
use fuser::ReplyEntry;
use fuser::ReplyStatfs;
use fuser::ReplyWrite;
use fuser::Request;
use log::debug;
use logfs::error;
use logfs::image::Image;
use logfs::layout::Inode;
use logfs::layout::MAX_FILE_NAME_LEN;
use logfs::layout::ROOT_INODE;
use logfs::layout::Superblock;
use logfs::ops;
use logfs::scan;
use std::env::ArgsOs;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use std::time::UNIX_EPOCH;

/// Lifetime of the attributes handed to the kernel.
const TTL: Duration = Duration::from_secs(1);

/// Converts a log inode number to the number exposed through the bridge.
///
/// The bridge reserves 1 for the root, while the log reserves 0.
fn fuse_ino(inode_number: u32) -> u64 {
    inode_number as u64 + 1
}

/// Converts a bridge inode number back to a log inode number.
fn log_ino(ino: u64) -> u32 {
    (ino - 1) as u32
}

/// Builds the bridge attributes of an entry.
fn attr(inode: &Inode) -> FileAttr {
    let timestamp = |secs: i64| UNIX_EPOCH + Duration::from_secs(secs as u64);
    FileAttr {
        ino: fuse_ino(inode.inode_number),
        size: inode.size as u64,
        blocks: (inode.size as u64).div_ceil(512),
        atime: timestamp(inode.atime),
        mtime: timestamp(inode.mtime),
        ctime: timestamp(inode.ctime),
        crtime: timestamp(inode.ctime),
        kind: if inode.is_dir() {
            FileType::Directory
        } else {
            FileType::RegularFile
        },
        perm: (inode.mode & 0o7777) as u16,
        nlink: inode.links,
        uid: inode.uid,
        gid: inode.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

/// The filesystem server. The mapped image is the single source of truth.
struct LogFs {
    img: Image,
}

impl LogFs {
    /// Common body of `mknod` and `mkdir`.
    fn create(&mut self, parent: u64, name: &OsStr, mode: u32, reply: ReplyEntry) {
        let Some((parent_off, _)) = scan::latest(&self.img, log_ino(parent)) else {
            reply.error(libc::ENOENT);
            return;
        };
        match ops::create(&mut self.img, parent_off, name.as_bytes(), mode) {
            Ok((_, inode)) => reply.entry(&TTL, &attr(&inode), 0),
            Err(e) => reply.error(e.errno()),
        }
    }
}

impl Filesystem for LogFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup parent={parent} name={name:?}");
        let Some((parent_off, _)) = scan::latest(&self.img, log_ino(parent)) else {
            reply.error(libc::ENOENT);
            return;
        };
        match scan::lookup(&self.img, parent_off, name.as_bytes()) {
            Some((_, inode)) => reply.entry(&TTL, &attr(&inode), 0),
            None => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        debug!("getattr ino={ino}");
        match scan::latest(&self.img, log_ino(ino)) {
            Some((_, inode)) => reply.attr(&TTL, &attr(&inode)),
            None => reply.error(libc::ENOENT),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod parent={parent} name={name:?} mode={mode:o}");
        self.create(parent, name, libc::S_IFREG as u32, reply);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir parent={parent} name={name:?} mode={mode:o}");
        self.create(parent, name, libc::S_IFDIR as u32, reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink parent={parent} name={name:?}");
        let Some((parent_off, _)) = scan::latest(&self.img, log_ino(parent)) else {
            reply.error(libc::ENOENT);
            return;
        };
        match ops::remove(&mut self.img, parent_off, name.as_bytes()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read ino={ino} offset={offset} size={size}");
        let Some((off, _)) = scan::latest(&self.img, log_ino(ino)) else {
            reply.error(libc::ENOENT);
            return;
        };
        let payload = scan::payload(&self.img, off);
        let offset = offset as usize;
        if offset >= payload.len() {
            reply.data(&[]);
            return;
        }
        let end = payload.len().min(offset + size as usize);
        reply.data(&payload[offset..end]);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write ino={ino} offset={offset} size={}", data.len());
        let Some((off, _)) = scan::latest(&self.img, log_ino(ino)) else {
            reply.error(libc::ENOENT);
            return;
        };
        match ops::write_at(&mut self.img, off, data, offset as usize) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir ino={ino} offset={offset}");
        let inode_number = log_ino(ino);
        let Some((off, inode)) = scan::latest(&self.img, inode_number) else {
            reply.error(libc::ENOENT);
            return;
        };
        if !inode.is_dir() {
            reply.error(libc::ENOTDIR);
            return;
        }

        let parent = scan::parent_of(&self.img, inode_number).unwrap_or(ROOT_INODE);
        let mut entries = vec![
            (fuse_ino(inode_number), FileType::Directory, b".".to_vec()),
            (fuse_ino(parent), FileType::Directory, b"..".to_vec()),
        ];
        for dentry in scan::dentries(&self.img, off) {
            // A dentry whose target is tombstoned cannot be resolved.
            let Some((_, child)) = scan::latest(&self.img, dentry.inode_number as u32) else {
                continue;
            };
            let kind = if child.is_dir() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((
                fuse_ino(child.inode_number),
                kind,
                dentry.name_bytes().to_vec(),
            ));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            // The offset of an entry is the index of the next one.
            if reply.add(ino, i as i64 + 1, kind, OsStr::from_bytes(&name)) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let head = Superblock::read(&self.img).head;
        let blocks = self.img.len() as u64 / 512;
        let free = (self.img.len() as u64 - head) / 512;
        reply.statfs(
            blocks,
            free,
            free,
            0,
            0,
            512,
            (MAX_FILE_NAME_LEN - 1) as u32,
            512,
        );
    }
}

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// Mount options forwarded to the bridge.
    options: Vec<String>,
    /// The path to the image, then the mountpoint.
    positional: Vec<PathBuf>,
}

fn parse_args(mut args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-o") => {
                if let Some(options) = args.next().and_then(|s| s.into_string().ok()) {
                    res.options.extend(options.split(',').map(str::to_owned));
                }
            }
            _ => res.positional.push(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints the command's usage.
fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" mount.logfs [-h]");
    eprintln!(" mount.logfs <image> <mountpoint> [-o options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!(" -h:\t\tprints usage");
    eprintln!(" -o options:\tcomma-separated mount options, forwarded to the bridge");
    eprintln!(" image:\t\tthe image file holding the filesystem");
    eprintln!(" mountpoint:\tthe directory on which the filesystem is to be mounted");
}

/// Translates the `-o` option list into bridge mount options.
fn mount_options(options: &[String]) -> Vec<MountOption> {
    let mut res = vec![MountOption::FSName("logfs".to_owned())];
    for option in options {
        res.push(match option.as_str() {
            "ro" => MountOption::RO,
            "rw" => MountOption::RW,
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "auto_unmount" => MountOption::AutoUnmount,
            _ => MountOption::CUSTOM(option.clone()),
        });
    }
    res
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_usage();
        exit(0);
    }
    match &args.positional[..] {
        [image, mountpoint] => {
            env_logger::init();
            let img = Image::open(image).unwrap_or_else(|e| {
                error("mount.logfs", format_args!("{}: {e}", image.display()));
            });
            scan::validate(&img).unwrap_or_else(|e| {
                error("mount.logfs", format_args!("{}: {e}", image.display()));
            });

            let options = mount_options(&args.options);
            if let Err(e) = fuser::mount2(LogFs { img }, mountpoint, &options) {
                error("mount.logfs", e);
            }
        }
        _ => {
            print_usage();
            exit(1);
        }
    }
}
