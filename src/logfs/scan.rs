//! Scan primitives over the log region.
//!
//! The log has no index besides the superblock's head offset: every question
//! about the tree is answered by walking the entries in `[SUPERBLOCK_SIZE,
//! head)` and keeping the most recent live answer.

use crate::layout::DENTRY_SIZE;
use crate::layout::Dentry;
use crate::layout::INODE_SIZE;
use crate::layout::Inode;
use crate::layout::MAGIC;
use crate::layout::MAX_PATH_NAME_LEN;
use crate::layout::ROOT_INODE;
use crate::layout::SUPERBLOCK_SIZE;
use crate::layout::Superblock;
use std::io;

/// Iterator over the log entries of an image, yielding each entry's offset
/// and inode record.
pub struct LogIter<'a> {
    img: &'a [u8],
    off: usize,
    head: usize,
}

impl Iterator for LogIter<'_> {
    type Item = (usize, Inode);

    fn next(&mut self) -> Option<Self::Item> {
        if self.off >= self.head {
            return None;
        }
        let off = self.off;
        let inode = Inode::read(self.img, off);
        self.off = off + INODE_SIZE + inode.size as usize;
        Some((off, inode))
    }
}

/// Returns an iterator over every log entry of `img`, tombstoned ones
/// included.
pub fn entries(img: &[u8]) -> LogIter<'_> {
    LogIter {
        img,
        off: SUPERBLOCK_SIZE,
        head: Superblock::read(img).head as usize,
    }
}

/// Returns the latest live entry for the given inode number.
pub fn latest(img: &[u8], inode_number: u32) -> Option<(usize, Inode)> {
    entries(img)
        .filter(|(_, e)| e.inode_number == inode_number && e.deleted == 0)
        .last()
}

/// Returns the greatest inode number ever written to the log.
///
/// Tombstoned entries count too, so freed numbers are never recycled while
/// their history remains.
pub fn max_inode(img: &[u8]) -> u32 {
    entries(img)
        .map(|(_, e)| e.inode_number)
        .max()
        .unwrap_or(ROOT_INODE)
}

/// Returns the payload bytes of the log entry at `off`.
pub fn payload(img: &[u8], off: usize) -> &[u8] {
    let inode = Inode::read(img, off);
    &img[off + INODE_SIZE..off + INODE_SIZE + inode.size as usize]
}

/// Returns an iterator over the dentries of the directory entry at `off`.
pub fn dentries(img: &[u8], off: usize) -> impl Iterator<Item = Dentry> + '_ {
    payload(img, off)
        .chunks_exact(DENTRY_SIZE)
        .map(|chunk| Dentry::read(chunk, 0))
}

/// Looks `name` up in the directory entry at `dir_off` and returns the
/// latest live entry of the matching child.
///
/// Returns `None` if the entry at `dir_off` is not a directory, if the name
/// is absent, or if every dentry carrying the name points at a tombstoned
/// inode.
pub fn lookup(img: &[u8], dir_off: usize, name: &[u8]) -> Option<(usize, Inode)> {
    let dir = Inode::read(img, dir_off);
    if !dir.is_dir() {
        return None;
    }
    dentries(img, dir_off)
        .filter(|d| d.name_matches(name))
        .find_map(|d| latest(img, d.inode_number as u32))
}

/// Resolves a path to the latest live entry it names.
///
/// The path is tokenized by `/`, empty tokens ignored; an empty token list
/// resolves to the root. Paths are truncated to `MAX_PATH_NAME_LEN` bytes.
pub fn resolve(img: &[u8], path: &str) -> Option<(usize, Inode)> {
    let path = path.as_bytes();
    let path = &path[..path.len().min(MAX_PATH_NAME_LEN)];

    let mut cur = latest(img, ROOT_INODE)?;
    for token in path.split(|b| *b == b'/').filter(|t| !t.is_empty()) {
        cur = lookup(img, cur.0, token)?;
    }
    Some(cur)
}

/// Returns the inode number of the directory whose payload names
/// `inode_number`.
///
/// The root directory is its own parent.
pub fn parent_of(img: &[u8], inode_number: u32) -> Option<u32> {
    if inode_number == ROOT_INODE {
        return Some(ROOT_INODE);
    }
    for ino in 0..=max_inode(img) {
        if let Some((off, dir)) = latest(img, ino) {
            if dir.is_dir() && dentries(img, off).any(|d| d.inode_number == inode_number as u64) {
                return Some(ino);
            }
        }
    }
    None
}

/// Checks that `img` carries a well-formed superblock.
pub fn validate(img: &[u8]) -> io::Result<()> {
    if img.len() < SUPERBLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "image smaller than a superblock",
        ));
    }
    let sb = Superblock::read(img);
    if sb.magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad magic number",
        ));
    }
    if sb.head < SUPERBLOCK_SIZE as u64 || sb.head > img.len() as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "head offset out of bounds",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ops;

    fn image() -> Vec<u8> {
        let mut img = vec![0; 1 << 20];
        ops::format(&mut img).unwrap();
        img
    }

    #[test]
    fn resolve_root() {
        let img = image();

        let (off, root) = resolve(&img, "/").unwrap();
        assert_eq!(off, SUPERBLOCK_SIZE);
        assert_eq!(root.inode_number, ROOT_INODE);
        assert!(root.is_dir());
        assert_eq!(root.size, 0);

        // The empty path is the root too.
        let (off2, _) = resolve(&img, "").unwrap();
        assert_eq!(off2, off);
    }

    #[test]
    fn resolve_nested() {
        let mut img = image();
        ops::mkdir(&mut img, "/a").unwrap();
        ops::mknod(&mut img, "/a/b").unwrap();

        let (off, entry) = resolve(&img, "/a/b").unwrap();
        assert!(!entry.is_dir());
        assert_eq!(latest(&img, entry.inode_number).unwrap().0, off);

        // Redundant slashes are ignored, missing names fail.
        assert!(resolve(&img, "//a///b").is_some());
        assert!(resolve(&img, "/a/c").is_none());
        assert!(resolve(&img, "/b").is_none());
        // A regular file cannot be walked through.
        assert!(resolve(&img, "/a/b/c").is_none());
    }

    #[test]
    fn log_walk_is_exact() {
        let mut img = image();
        ops::mkdir(&mut img, "/a").unwrap();
        ops::mknod(&mut img, "/a/b").unwrap();
        ops::write(&mut img, "/a/b", b"hello", 0).unwrap();

        let mut off = SUPERBLOCK_SIZE;
        for (o, inode) in entries(&img) {
            assert_eq!(o, off);
            off += INODE_SIZE + inode.size as usize;
        }
        assert_eq!(off as u64, Superblock::read(&img).head);
    }

    #[test]
    fn latest_picks_highest_offset() {
        let mut img = image();
        ops::mknod(&mut img, "/f").unwrap();
        let (_, entry) = resolve(&img, "/f").unwrap();
        ops::write(&mut img, "/f", b"one", 0).unwrap();
        ops::write(&mut img, "/f", b"two", 0).unwrap();

        let (off, e) = latest(&img, entry.inode_number).unwrap();
        assert_eq!(e.size, 3);
        assert_eq!(payload(&img, off), b"two");
        // Three versions of the file remain in the log.
        let versions = entries(&img)
            .filter(|(_, e)| e.inode_number == entry.inode_number)
            .count();
        assert_eq!(versions, 3);
    }

    #[test]
    fn max_inode_is_monotonic() {
        let mut img = image();
        assert_eq!(max_inode(&img), 0);
        ops::mkdir(&mut img, "/a").unwrap();
        assert_eq!(max_inode(&img), 1);
        ops::mknod(&mut img, "/a/b").unwrap();
        assert_eq!(max_inode(&img), 2);
        ops::unlink(&mut img, "/a/b").unwrap();
        assert_eq!(max_inode(&img), 2);
    }

    #[test]
    fn parent_lookup() {
        let mut img = image();
        ops::mkdir(&mut img, "/a").unwrap();
        ops::mknod(&mut img, "/a/b").unwrap();

        let (_, a) = resolve(&img, "/a").unwrap();
        let (_, b) = resolve(&img, "/a/b").unwrap();
        assert_eq!(parent_of(&img, ROOT_INODE), Some(ROOT_INODE));
        assert_eq!(parent_of(&img, a.inode_number), Some(ROOT_INODE));
        assert_eq!(parent_of(&img, b.inode_number), Some(a.inode_number));
    }

    #[test]
    fn validation() {
        let img = image();
        assert!(validate(&img).is_ok());

        let mut bad = img.clone();
        bad[0] ^= 0xff;
        assert!(validate(&bad).is_err());

        let mut bad = img;
        Superblock::new(u64::MAX).write(&mut bad);
        assert!(validate(&bad).is_err());

        assert!(validate(&[0; 8]).is_err());
    }
}
