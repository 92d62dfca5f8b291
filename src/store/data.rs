/// Shared data structures for the catalog
///
/// These structs represent the rows that flow between the store
/// and its callers (cache, scanner, UI collaborators).

use std::path::{Component, Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};

pub type RootId = i64;
pub type AlbumId = i64;
pub type TagId = i64;
pub type ItemId = i64;
pub type SearchId = i64;

/// Synthetic root of the tag tree. It has no row in `Tags`.
pub const ROOT_TAG: TagId = 0;

/// Album url of a collection root directory itself
pub const ROOT_ALBUM_URL: &str = "/";

/// A collection root: a directory tree managed by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRoot {
    pub id: RootId,
    pub label: String,
    pub path: PathBuf,
}

/// A physical album (one managed folder)
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    pub id: AlbumId,
    pub root_id: RootId,
    /// Root-relative, normalized (e.g. "/2007/Summer")
    pub url: String,
    pub date: NaiveDate,
    pub caption: String,
    pub collection: String,
    pub icon: Option<ItemId>,
}

/// Icon of a tag: either a theme icon name or an item used as icon
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TagIcon {
    #[default]
    None,
    Theme(String),
    Item(ItemId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: TagId,
    pub parent_id: TagId,
    pub name: String,
    pub icon: TagIcon,
}

/// A single managed file
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub album_id: AlbumId,
    /// Filename only (e.g., "DSC_0001.NEF")
    pub name: String,
    pub caption: String,
    /// Capture time; `None` until the scanner backfills it
    pub date_time: Option<NaiveDateTime>,
}

/// Where an item lives on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemLocation {
    pub root_id: RootId,
    pub root_path: PathBuf,
    pub album_id: AlbumId,
    pub album_url: String,
    pub name: String,
}

impl ItemLocation {
    pub fn file_path(&self) -> PathBuf {
        album_dir(&self.root_path, &self.album_url).join(&self.name)
    }
}

/// A saved search: a name and its serialized query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub id: SearchId,
    pub name: String,
    pub query: String,
}

/// Directory of album `url` below `root`
pub fn album_dir(root: &Path, url: &str) -> PathBuf {
    let relative = url.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Normalize an album url: '/'-separated, leading '/', no trailing '/',
/// with empty, "." and ".." segments resolved. Any other character,
/// backslashes included, is part of a folder name.
pub fn normalize_url(url: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in url.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Album url of `dir` relative to `root`.
///
/// `None` if `dir` is outside `root` or a folder name below the root is not
/// valid UTF-8: such a url could not be mapped back to the directory.
pub fn url_for_dir(root: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(format!("/{}", segments.join("/")))
}
