//! Mutating operations on a filesystem image.
//!
//! Every mutation follows the same discipline: resolve the current state by
//! scanning, check that the new entries fit below the end of the image,
//! copy their bytes at the head, and only then advance the head in the
//! superblock. The head update is the linearization point; a crash before it
//! leaves the image unchanged for readers.

use crate::FsError;
use crate::layout::DENTRY_SIZE;
use crate::layout::Dentry;
use crate::layout::INODE_SIZE;
use crate::layout::Inode;
use crate::layout::ROOT_INODE;
use crate::layout::SUPERBLOCK_SIZE;
use crate::layout::Superblock;
use crate::layout::split;
use crate::scan;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Returns the current timestamp in seconds since the Unix epoch.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System clock panic!")
        .as_secs() as i64
}

/// Returns the uid and gid of the current process.
fn owner() -> (u32, u32) {
    unsafe { (libc::getuid(), libc::getgid()) }
}

/// Initializes an empty filesystem on `img`: a superblock and a single
/// root-directory entry with an empty payload.
pub fn format(img: &mut [u8]) -> Result<(), FsError> {
    if img.len() < SUPERBLOCK_SIZE + INODE_SIZE {
        return Err(FsError::NoSpace);
    }
    let (uid, gid) = owner();
    let root = Inode::new(ROOT_INODE, libc::S_IFDIR as u32, uid, gid, 0, now());
    root.write(img, SUPERBLOCK_SIZE);
    Superblock::new((SUPERBLOCK_SIZE + INODE_SIZE) as u64).write(img);
    Ok(())
}

/// Creates a child named `name` with the given mode under the directory
/// entry at `parent_off`, and returns the child's entry.
///
/// Two entries are appended: a copy of the parent extended with one dentry,
/// then an empty entry for the child at the next unused inode number. Space
/// for both is checked before either byte is written.
pub fn create(
    img: &mut [u8],
    parent_off: usize,
    name: &[u8],
    mode: u32,
) -> Result<(usize, Inode), FsError> {
    let parent = Inode::read(img, parent_off);
    if !parent.is_dir() {
        return Err(FsError::NotDir);
    }
    if scan::lookup(img, parent_off, name).is_some() {
        return Err(FsError::Exists);
    }

    let inode_number = scan::max_inode(img) + 1;
    let mut sb = Superblock::read(img);
    let head = sb.head as usize;
    let parent_len = INODE_SIZE + parent.size as usize + DENTRY_SIZE;
    let child_off = head + parent_len;
    if child_off + INODE_SIZE > img.len() {
        return Err(FsError::NoSpace);
    }

    // Parent copy, its payload extended with the new dentry. The copy keeps
    // the parent's ownership and timestamps.
    img.copy_within(parent_off..parent_off + INODE_SIZE + parent.size as usize, head);
    Dentry::new(name, inode_number as u64).write(img, head + INODE_SIZE + parent.size as usize);
    let mut new_parent = Inode::read(img, head);
    new_parent.size += DENTRY_SIZE as u32;
    new_parent.write(img, head);

    let (uid, gid) = owner();
    let child = Inode::new(inode_number, mode, uid, gid, 0, now());
    child.write(img, child_off);

    sb.head = (child_off + INODE_SIZE) as u64;
    sb.write(img);
    Ok((child_off, child))
}

/// Appends a new version of the regular-file entry at `entry_off` with
/// `data` written at byte `offset`, extending the file as needed.
///
/// Returns the number of bytes written. Bytes between the old end of the
/// file and `offset`, if any, are left unspecified.
pub fn write_at(
    img: &mut [u8],
    entry_off: usize,
    data: &[u8],
    offset: usize,
) -> Result<usize, FsError> {
    let old = Inode::read(img, entry_off);
    let new_size = (offset + data.len()).max(old.size as usize);
    if u32::try_from(new_size).is_err() {
        return Err(FsError::NoSpace);
    }

    let mut sb = Superblock::read(img);
    let head = sb.head as usize;
    if head + INODE_SIZE + new_size > img.len() {
        return Err(FsError::NoSpace);
    }

    // Carry the previous payload over, then lay the new bytes on top.
    img.copy_within(
        entry_off + INODE_SIZE..entry_off + INODE_SIZE + old.size as usize,
        head + INODE_SIZE,
    );
    let dst = head + INODE_SIZE + offset;
    img[dst..dst + data.len()].copy_from_slice(data);

    let (uid, gid) = owner();
    let inode = Inode::new(
        old.inode_number,
        libc::S_IFREG as u32,
        uid,
        gid,
        new_size as u32,
        now(),
    );
    inode.write(img, head);

    sb.head = (head + INODE_SIZE + new_size) as u64;
    sb.write(img);
    Ok(data.len())
}

/// Removes the child named `name` from the directory entry at `parent_off`.
///
/// Every log entry of the target inode is tombstoned in place, then a new
/// parent entry is appended whose payload omits the removed dentry,
/// preserving the order of the surviving ones.
pub fn remove(img: &mut [u8], parent_off: usize, name: &[u8]) -> Result<(), FsError> {
    let (_, target) = scan::lookup(img, parent_off, name).ok_or(FsError::NotFound)?;
    if target.is_dir() {
        return Err(FsError::IsDir);
    }
    let parent = Inode::read(img, parent_off);
    let inode_number = target.inode_number;

    // Tombstone every version of the inode, historical ones included.
    let offsets: Vec<usize> = scan::entries(img)
        .filter(|(_, e)| e.inode_number == inode_number && e.deleted == 0)
        .map(|(off, _)| off)
        .collect();
    let found = !offsets.is_empty();
    for off in offsets {
        let mut entry = Inode::read(img, off);
        entry.deleted = 1;
        entry.write(img, off);
    }

    let keep: Vec<Dentry> = scan::dentries(img, parent_off)
        .filter(|d| d.inode_number != inode_number as u64)
        .collect();
    let new_size = keep.len() * DENTRY_SIZE;

    let mut sb = Superblock::read(img);
    let head = sb.head as usize;
    if head + INODE_SIZE + new_size > img.len() {
        return Err(FsError::NoSpace);
    }

    let (uid, gid) = owner();
    let new_parent = Inode::new(
        parent.inode_number,
        libc::S_IFDIR as u32,
        uid,
        gid,
        new_size as u32,
        now(),
    );
    new_parent.write(img, head);
    for (i, dentry) in keep.iter().enumerate() {
        dentry.write(img, head + INODE_SIZE + i * DENTRY_SIZE);
    }

    sb.head = (head + INODE_SIZE + new_size) as u64;
    sb.write(img);

    if !found {
        return Err(FsError::NotFound);
    }
    Ok(())
}

/// Rewrites `img` so that only the latest live entry of each inode remains,
/// in ascending inode-number order.
///
/// Inode numbers and entry bytes are preserved, so the operation is
/// semantically the identity and idempotent at the byte level.
pub fn compact(img: &mut [u8]) {
    let mut out = vec![0; img.len()];
    let mut head = SUPERBLOCK_SIZE;
    for ino in 0..=scan::max_inode(img) {
        if let Some((off, inode)) = scan::latest(img, ino) {
            let len = INODE_SIZE + inode.size as usize;
            out[head..head + len].copy_from_slice(&img[off..off + len]);
            head += len;
        }
    }
    Superblock::new(head as u64).write(&mut out);
    img.copy_from_slice(&out);
}

/// Returns the attributes of the entry at `path`.
pub fn getattr(img: &[u8], path: &str) -> Result<Inode, FsError> {
    scan::resolve(img, path)
        .map(|(_, inode)| inode)
        .ok_or(FsError::NotFound)
}

/// Creates an empty regular file at `path`. The parent must exist and the
/// path must not.
pub fn mknod(img: &mut [u8], path: &str) -> Result<(), FsError> {
    create_at(img, path, libc::S_IFREG as u32)
}

/// Creates an empty directory at `path`. The parent must exist and the path
/// must not.
pub fn mkdir(img: &mut [u8], path: &str) -> Result<(), FsError> {
    create_at(img, path, libc::S_IFDIR as u32)
}

fn create_at(img: &mut [u8], path: &str, mode: u32) -> Result<(), FsError> {
    if scan::resolve(img, path).is_some() {
        return Err(FsError::Exists);
    }
    let (parent, leaf) = split(path);
    let (parent_off, _) = scan::resolve(img, parent).ok_or(FsError::NotFound)?;
    create(img, parent_off, leaf, mode).map(|_| ())
}

/// Reads up to `size` bytes at `offset` from the file at `path`.
///
/// Reading at or past the end of the file yields an empty slice. Reads do
/// not touch the log.
pub fn read<'a>(
    img: &'a [u8],
    path: &str,
    size: usize,
    offset: usize,
) -> Result<&'a [u8], FsError> {
    let (off, _) = scan::resolve(img, path).ok_or(FsError::NotFound)?;
    let payload = scan::payload(img, off);
    if offset >= payload.len() {
        return Ok(&[]);
    }
    let end = payload.len().min(offset + size);
    Ok(&payload[offset..end])
}

/// Writes `data` at `offset` into the file at `path` and returns the number
/// of bytes written.
pub fn write(img: &mut [u8], path: &str, data: &[u8], offset: usize) -> Result<usize, FsError> {
    let (off, _) = scan::resolve(img, path).ok_or(FsError::NotFound)?;
    write_at(img, off, data, offset)
}

/// Emits `.`, `..`, then the name of each dentry of the directory at `path`.
pub fn readdir(img: &[u8], path: &str, mut emit: impl FnMut(&[u8])) -> Result<(), FsError> {
    let (off, inode) = scan::resolve(img, path).ok_or(FsError::NotFound)?;
    if !inode.is_dir() {
        return Err(FsError::NotDir);
    }
    emit(b".");
    emit(b"..");
    for dentry in scan::dentries(img, off) {
        emit(dentry.name_bytes());
    }
    Ok(())
}

/// Removes the regular file at `path`.
pub fn unlink(img: &mut [u8], path: &str) -> Result<(), FsError> {
    let (_, target) = scan::resolve(img, path).ok_or(FsError::NotFound)?;
    if target.is_dir() {
        return Err(FsError::IsDir);
    }
    let (parent, leaf) = split(path);
    let (parent_off, _) = scan::resolve(img, parent).ok_or(FsError::NotFound)?;
    remove(img, parent_off, leaf)
}
