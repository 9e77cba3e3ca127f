//! Segment discovery: enumerate live AXON segments from the host namespace.
//!
//! Discovery is advisory tooling over `/dev/shm`; the registry remains the
//! authority on who publishes what. It exists so an operator process can
//! inspect a running deployment without joining it.

use crate::error::{ShmError, ShmResult};
use std::path::PathBuf;
use std::time::SystemTime;

/// Metadata for one discovered segment.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// Segment name in open-able form, with its leading separator.
    pub name: String,
    /// Mapped size in bytes, header included.
    pub size: usize,
    /// Last modification time of the backing object.
    pub modified: SystemTime,
}

/// Filesystem scanner over the named shared memory namespace.
pub struct SegmentScan {
    root: PathBuf,
}

impl SegmentScan {
    /// Scanner over the host's default namespace root.
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/dev/shm"),
        }
    }

    /// List every segment whose name starts with `prefix` (no leading
    /// separator), newest first. A missing namespace root lists empty.
    pub fn list(&self, prefix: &str) -> ShmResult<Vec<SegmentInfo>> {
        let mut segments = Vec::new();
        if !self.root.exists() {
            return Ok(segments);
        }

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            if !file_name.starts_with(prefix) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            segments.push(SegmentInfo {
                name: format!("/{}", file_name),
                size: meta.len() as usize,
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        segments.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(segments)
    }

    /// Find one segment by its full name (with the leading separator).
    pub fn find(&self, name: &str) -> ShmResult<Option<SegmentInfo>> {
        let stripped = name.strip_prefix('/').ok_or_else(|| ShmError::NameInvalid {
            name: name.to_string(),
        })?;
        Ok(self
            .list(stripped)?
            .into_iter()
            .find(|info| info.name == name))
    }
}

impl Default for SegmentScan {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether a process is alive without signalling it.
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false,
        Err(nix::Error::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SharedSegment;

    #[test]
    fn test_created_segment_is_discoverable() {
        let name = format!("/axon_test_disc_{}", std::process::id());
        let _seg = SharedSegment::create(&name, 4096).unwrap();

        let scan = SegmentScan::new();
        let listed = scan.list("axon_test_disc_").unwrap();
        assert!(listed.iter().any(|info| info.name == name));

        let found = scan.find(&name).unwrap().unwrap();
        assert_eq!(found.size, 4096);
    }

    #[test]
    fn test_unlinked_segment_disappears() {
        let name = format!("/axon_test_disc_gone_{}", std::process::id());
        {
            let _seg = SharedSegment::create(&name, 4096).unwrap();
        }
        let scan = SegmentScan::new();
        assert!(scan.find(&name).unwrap().is_none());
    }

    #[test]
    fn test_find_requires_separator() {
        let scan = SegmentScan::new();
        assert!(matches!(
            scan.find("no_separator"),
            Err(ShmError::NameInvalid { .. })
        ));
    }

    #[test]
    fn test_process_liveness() {
        assert!(is_process_alive(std::process::id()));
        assert!(is_process_alive(1));
        // PID far above any default pid_max.
        assert!(!is_process_alive(u32::MAX / 2));
    }
}
