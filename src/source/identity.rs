use std::fs::Metadata;

/// Identity of a physical file as seen at a point in time
///
/// Rotation is detected by comparing two snapshots: a different inode means
/// the path now names another file, a smaller length means truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    /// Device and inode where the platform exposes them
    pub inode: Option<(u64, u64)>,
    /// Length in bytes
    pub len: u64,
}

impl FileIdentity {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            inode: inode_of(meta),
            len: meta.len(),
        }
    }

    /// Whether `current` names a different file than `self`, or the same file cut short
    pub fn is_rotated(&self, current: &FileIdentity) -> bool {
        let replaced = match (self.inode, current.inode) {
            (Some(before), Some(now)) => before != now,
            _ => false,
        };
        replaced || current.len < self.len
    }

    /// Whether the path still names the same underlying file
    pub fn same_file(&self, current: &FileIdentity) -> bool {
        match (self.inode, current.inode) {
            (Some(before), Some(now)) => before == now,
            _ => true,
        }
    }
}

#[cfg(unix)]
fn inode_of(meta: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn inode_of(_meta: &Metadata) -> Option<(u64, u64)> {
    None
}
