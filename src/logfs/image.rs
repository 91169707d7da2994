//! Memory mapping of a filesystem image.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Error;
use std::ops::Deref;
use std::ops::DerefMut;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::null_mut;
use std::slice;

/// A filesystem image mapped into memory.
///
/// The mapping is shared with the backing file: stores land in the file,
/// written back at the latest when the image is unmapped on drop.
pub struct Image {
    /// Keeps the backing file open for the lifetime of the mapping.
    _file: File,
    ptr: *mut u8,
    len: usize,
}

impl Image {
    /// Opens the image at `path` and maps it read-write.
    ///
    /// The whole file is mapped; its current length is the image size.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
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
            _file: file,
            ptr: ptr as *mut u8,
            len,
        })
    }
}

// The mapping is exclusively owned by the `Image`.
unsafe impl Send for Image {}

impl Deref for Image {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for Image {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as _, self.len);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ops;
    use crate::scan;
    use std::env;
    use std::fs;
    use std::process;

    #[test]
    fn map_format_reopen() {
        let path = env::temp_dir().join(format!("logfs-image-test-{}", process::id()));
        let file = File::create(&path).unwrap();
        file.set_len(1 << 16).unwrap();
        drop(file);

        {
            let mut img = Image::open(&path).unwrap();
            assert_eq!(img.len(), 1 << 16);
            ops::format(&mut img).unwrap();
            ops::mknod(&mut img, "/f").unwrap();
            ops::write(&mut img, "/f", b"persisted", 0).unwrap();
        }

        // The mutations went through the mapping to the backing file.
        let img = Image::open(&path).unwrap();
        scan::validate(&img).unwrap();
        assert_eq!(ops::read(&img, "/f", 16, 0).unwrap(), b"persisted");
        drop(img);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn open_missing() {
        assert!(Image::open(Path::new("/nonexistent/image")).is_err());
    }
}
