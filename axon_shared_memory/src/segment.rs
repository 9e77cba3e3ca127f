//! Named POSIX shared memory segments with own-or-attach semantics

use crate::error::{ShmError, ShmResult};
use axon::consts::{MAX_SEGMENT_NAME_LEN, SEGMENT_MAX_SIZE};
use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use std::fs::File;

/// A named shared memory region mapped read-write into this process.
///
/// Exactly one participant per name is the **creator**; everyone else is an
/// **attacher**. Only the creator unlinks the name, which it does on drop.
/// Attachers unmap without unlinking, so a mapping stays valid after the
/// name disappears.
pub struct SharedSegment {
    name: String,
    base: *mut u8,
    len: usize,
    is_owner: bool,
    // Held only for the munmap on drop.
    _mmap: MmapMut,
}

// The region is process-shared by design; all mutation of its contents goes
// through the process-shared primitives embedded in it.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a new segment of `size` bytes, failing if the name is taken.
    pub fn create(name: &str, size: usize) -> ShmResult<Self> {
        validate_name(name)?;
        validate_size(size)?;

        let fd = match shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => fd,
            Err(nix::Error::EEXIST) => {
                return Err(ShmError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let file = File::from(fd);
        if let Err(e) = file.set_len(size as u64) {
            // The name is ours; do not leave a zero-length husk behind.
            let _ = shm_unlink(name);
            return Err(e.into());
        }

        let mmap = match unsafe { MmapMut::map_mut(&file) } {
            Ok(m) => m,
            Err(e) => {
                let _ = shm_unlink(name);
                return Err(e.into());
            }
        };

        Ok(Self::from_mapping(name.to_string(), mmap, size, true))
    }

    /// Attach to an existing segment, inferring the size from the mapping.
    pub fn open(name: &str) -> ShmResult<Self> {
        validate_name(name)?;

        let fd = match shm_open(name, OFlag::O_RDWR, Mode::empty()) {
            Ok(fd) => fd,
            Err(nix::Error::ENOENT) => {
                return Err(ShmError::NotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let file = File::from(fd);
        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(ShmError::InvalidSize { size });
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self::from_mapping(name.to_string(), mmap, size, false))
    }

    /// Check whether a segment with this name currently exists.
    pub fn exists(name: &str) -> bool {
        if validate_name(name).is_err() {
            return false;
        }
        shm_open(name, OFlag::O_RDWR, Mode::empty()).is_ok()
    }

    fn from_mapping(name: String, mut mmap: MmapMut, len: usize, is_owner: bool) -> Self {
        let base = mmap.as_mut_ptr();
        Self {
            name,
            base,
            len,
            is_owner,
            _mmap: mmap,
        }
    }

    /// Base pointer of the mapped region.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the mapping is zero bytes long (never the case for a
    /// successfully constructed segment).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Segment name, with its leading separator.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when this handle created the segment.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Remove the name from the namespace. Creator only; existing mappings
    /// remain valid until the last attacher unmaps.
    pub fn unlink(&self) -> ShmResult<()> {
        if !self.is_owner {
            return Err(ShmError::Uninitialized);
        }
        shm_unlink(self.name.as_str())?;
        Ok(())
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if self.is_owner {
            let _ = shm_unlink(self.name.as_str());
        }
    }
}

/// Validate a POSIX shared memory object name: a leading separator, no
/// embedded separators, bounded length.
pub fn validate_name(name: &str) -> ShmResult<()> {
    let ok = name.len() > 1
        && name.len() <= MAX_SEGMENT_NAME_LEN
        && name.starts_with('/')
        && !name[1..].contains('/')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(ShmError::NameInvalid {
            name: name.to_string(),
        })
    }
}

/// Validate segment size constraints.
pub fn validate_size(size: usize) -> ShmResult<()> {
    if size == 0 || size > SEGMENT_MAX_SIZE {
        return Err(ShmError::InvalidSize { size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("/axon_test_seg_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("/ok_name").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("/").is_err());
        assert!(validate_name("no_leading_slash").is_err());
        assert!(validate_name("/nested/name").is_err());
        assert!(validate_name(&format!("/{}", "x".repeat(MAX_SEGMENT_NAME_LEN))).is_err());
    }

    #[test]
    fn test_size_validation() {
        assert!(validate_size(1).is_ok());
        assert!(validate_size(SEGMENT_MAX_SIZE).is_ok());
        assert!(validate_size(0).is_err());
        assert!(validate_size(SEGMENT_MAX_SIZE + 1).is_err());
    }

    #[test]
    fn test_create_open_unlink_cycle() {
        let name = unique("cycle");
        let seg = SharedSegment::create(&name, 4096).unwrap();
        assert!(seg.is_owner());
        assert_eq!(seg.len(), 4096);
        assert!(SharedSegment::exists(&name));

        let attached = SharedSegment::open(&name).unwrap();
        assert!(!attached.is_owner());
        assert_eq!(attached.len(), 4096);

        drop(seg);
        assert!(!SharedSegment::exists(&name));
        // Attacher mapping stays valid after unlink.
        unsafe { attached.as_ptr().write(0xA5) };
    }

    #[test]
    fn test_exclusive_create() {
        let name = unique("excl");
        let _seg = SharedSegment::create(&name, 4096).unwrap();
        let second = SharedSegment::create(&name, 4096);
        assert!(matches!(second, Err(ShmError::AlreadyExists { .. })));
    }

    #[test]
    fn test_open_missing() {
        let result = SharedSegment::open("/axon_test_seg_missing");
        assert!(matches!(result, Err(ShmError::NotFound { .. })));
    }

    #[test]
    fn test_contents_shared_between_mappings() {
        let name = unique("shared");
        let writer = SharedSegment::create(&name, 64).unwrap();
        let reader = SharedSegment::open(&name).unwrap();

        unsafe { writer.as_ptr().add(10).write(0x5A) };
        assert_eq!(unsafe { reader.as_ptr().add(10).read() }, 0x5A);
    }
}
