use std::fmt;
use std::path::PathBuf;

use crate::store::data::{AlbumId, ItemId, RootId};

/// A row the scanner wants to delete because its file or folder is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionCandidate {
    Album { id: AlbumId, root_id: RootId, url: String, path: PathBuf },
    Item { id: ItemId, album_id: AlbumId, path: PathBuf },
}

impl DeletionCandidate {
    /// Where the missing file or folder used to be
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Album { path, .. } | Self::Item { path, .. } => path,
        }
    }
}

impl fmt::Display for DeletionCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Album { path, .. } => write!(f, "album {}", path.display()),
            Self::Item { path, .. } => write!(f, "item {}", path.display()),
        }
    }
}

/// Asked, synchronously, before the scanner deletes anything.
///
/// Returning `false` aborts the whole scan.
pub trait ConfirmDeletion: Send + Sync {
    fn confirm_deletion(&self, candidates: &[DeletionCandidate]) -> bool;
}

impl<F> ConfirmDeletion for F
where
    F: Fn(&[DeletionCandidate]) -> bool + Send + Sync,
{
    fn confirm_deletion(&self, candidates: &[DeletionCandidate]) -> bool {
        self(candidates)
    }
}
