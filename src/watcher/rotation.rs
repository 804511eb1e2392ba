//! File identity snapshots and rotation predicates.

use std::fs::Metadata;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Size and inode of a file at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub size: u64,
    pub inode: u64,
}

impl FileSnapshot {
    /// Build a snapshot from file metadata.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            inode: inode_of(metadata),
        }
    }

    /// Stat `path` and build a snapshot.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be stat'ed.
    pub async fn stat(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self::from_metadata(&metadata))
    }
}

#[cfg(unix)]
fn inode_of(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

// No stable inode available; rotation falls back to size-decrease detection.
#[cfg(not(unix))]
fn inode_of(_metadata: &Metadata) -> u64 {
    0
}

/// Decides whether a change between two snapshots is a rotation.
///
/// Inode stability is platform dependent (network mounts and some overlay
/// filesystems reuse or fake inodes), so the predicate is swappable.
pub trait RotationPredicate: Send + Sync {
    fn is_rotation(&self, previous: &FileSnapshot, current: &FileSnapshot) -> bool;
}

/// Rotation when the inode changed, or the size strictly decreased from a
/// non-empty file.
#[derive(Debug, Clone, Copy, Default)]
pub struct InodeOrShrink;

impl RotationPredicate for InodeOrShrink {
    fn is_rotation(&self, previous: &FileSnapshot, current: &FileSnapshot) -> bool {
        current.inode != previous.inode || shrank(previous, current)
    }
}

/// Rotation only on a strict size decrease. For filesystems without stable inodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShrinkOnly;

impl RotationPredicate for ShrinkOnly {
    fn is_rotation(&self, previous: &FileSnapshot, current: &FileSnapshot) -> bool {
        shrank(previous, current)
    }
}

fn shrank(previous: &FileSnapshot, current: &FileSnapshot) -> bool {
    previous.size > 0 && current.size < previous.size
}
