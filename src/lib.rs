//! # raw-catalog
//!
//! Catalog of a photo collection: collection roots, physical albums (one per
//! folder), hierarchical tags with a maintained ancestor closure, items and
//! their properties, all in one SQLite database.
//!
//! - [`store`]: the relational store and its sessions/transactions
//! - [`closure`]: tag ancestor/descendant closure maintenance
//! - [`cache`]: one shared, lazily loaded metadata object per item
//! - [`scan`]: reconciles albums and items with the filesystem
//! - [`search`]: saved and ad hoc item queries
//! - [`catalog`]: opens everything from a [`CatalogConfig`]

pub mod cache;
pub mod catalog;
pub mod closure;
pub mod config;
pub mod error;
pub mod notify;
pub mod scan;
pub mod search;
pub mod store;

pub use cache::{ItemCache, ItemInfo};
pub use catalog::Catalog;
pub use config::{CatalogConfig, RootConfig, ScanConfig};
pub use error::{Error, Result};
pub use notify::{Change, ChangeListener, ItemField};
pub use scan::{CancelToken, ConfirmDeletion, DeletionCandidate, ScanReport, Scanner};
pub use search::{AlbumRef, SearchQuery};
pub use store::data::{
    Album, AlbumId, AlbumRoot, Item, ItemId, ItemLocation, RootId, Search, SearchId, Tag, TagIcon, TagId,
    ROOT_TAG,
};
pub use store::{Session, Store};
