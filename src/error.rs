/// Error types for the catalog
///
/// Failures fall into four groups:
/// - storage: a statement, the connection or the filesystem failed
/// - consistency: a tag or album invariant would be broken, rejected before any write
/// - user abort: the confirmation collaborator declined a destructive step
/// - serialization: configuration or a saved search could not be (de)serialized
///
/// "Not found" is never an error; lookups return `Option` or an empty list.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::data::{AlbumId, ItemId, RootId, TagId};

/// Result type used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A statement failed (malformed query, I/O failure, constraint violation)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The filesystem refused an operation on `path`
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The database exists but was not created by this catalog (or by another version of it)
    #[error("unrecognized catalog schema (DBVersion = {0:?})")]
    UnrecognizedSchema(Option<String>),

    /// Moving `tag` below `parent` would make it its own ancestor
    #[error("tag {tag} cannot be moved below {parent}, which is itself or one of its descendants")]
    TagCycle { tag: TagId, parent: TagId },

    #[error("tag {0} does not exist")]
    UnknownTag(TagId),

    #[error("album {0} does not exist")]
    UnknownAlbum(AlbumId),

    #[error("item {0} does not exist")]
    UnknownItem(ItemId),

    /// `url` cannot be the new url of `album` (e.g. it lies below the album itself)
    #[error("album {album} cannot be renamed to {url}")]
    InvalidAlbumUrl { album: AlbumId, url: String },

    #[error("collection root {0} does not exist")]
    UnknownRoot(RootId),

    /// The confirmation collaborator declined deleting `0` stale entries
    #[error("removal of {0} stale entries was declined, scan aborted")]
    UserAbort(usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Store-level failure: the caller may retry the whole operation later
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io { .. } | Self::UnrecognizedSchema(_))
    }

    /// Invariant violation detected before anything was written
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Self::TagCycle { .. }
                | Self::UnknownTag(_)
                | Self::UnknownAlbum(_)
                | Self::UnknownItem(_)
                | Self::UnknownRoot(_)
                | Self::InvalidAlbumUrl { .. }
        )
    }

    pub fn is_user_abort(&self) -> bool {
        matches!(self, Self::UserAbort(_))
    }
}
