//! # Item metadata cache
//!
//! One canonical, reference-counted [`ItemInfo`] per item id. Fields are
//! populated lazily, one at a time, the first time they are read, and kept
//! until a committed change to the item invalidates them.
//!
//! Locks, always taken in this order:
//! 1. the per-object field lock (`Entry::fields`)
//! 2. the store connection
//! 3. the registry lock (`Shared::registry`)
//!
//! An `Arc<Entry>` is never released while the registry lock is held, since
//! dropping the last handle unregisters the entry.

mod bulk;
mod info;

pub use info::ItemInfo;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::Result;
use crate::notify::{Change, ChangeListener, ItemField};
use crate::store::data::{normalize_url, ItemId, ItemLocation, RootId, TagId};
use crate::store::Store;

/// `(collection root, album url, file name)`
type ItemPath = (RootId, String, String);

fn path_key(location: &ItemLocation) -> ItemPath {
    (location.root_id, location.album_url.clone(), location.name.clone())
}

/// Cached fields of one item. `None` means "not cached yet".
#[derive(Debug, Default)]
pub(crate) struct Fields {
    /// The row is gone; every accessor returns an empty value
    invalid: bool,
    location: Option<ItemLocation>,
    caption: Option<String>,
    date_time: Option<Option<NaiveDateTime>>,
    rating: Option<Option<u8>>,
    tag_ids: Option<Vec<TagId>>,
    properties: Option<BTreeMap<String, String>>,
}

pub(crate) struct Entry {
    id: ItemId,
    fields: RwLock<Fields>,
    /// Serializes write-through mutations of this item
    writer: Mutex<()>,
    shared: Weak<Shared>,
}

impl Drop for Entry {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let location = self.fields.get_mut().location.take();
        let this: *const Entry = self;

        let mut registry = shared.registry.write();
        // A replacement may already be registered under this id.
        let ours = registry
            .by_id
            .get(&self.id)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), this));
        if ours {
            registry.by_id.remove(&self.id);
            if let Some(location) = location {
                let key = path_key(&location);
                if registry.by_path.get(&key) == Some(&self.id) {
                    registry.by_path.remove(&key);
                }
            }
        }
        trace!(id = self.id, "cache entry released");
    }
}

#[derive(Default)]
struct Registry {
    by_id: HashMap<ItemId, Weak<Entry>>,
    by_path: HashMap<ItemPath, ItemId>,
}

pub(crate) struct Shared {
    store: Arc<Store>,
    registry: RwLock<Registry>,
}

impl Shared {
    /// Canonical object for `id`, registering a new one if none is alive.
    fn get(self: &Arc<Self>, id: ItemId) -> ItemInfo {
        let existing = self.registry.read().by_id.get(&id).and_then(Weak::upgrade);
        if let Some(entry) = existing {
            return ItemInfo::new(entry, self.clone());
        }

        let mut registry = self.registry.write();
        // Someone else may have registered it between the two locks.
        if let Some(entry) = registry.by_id.get(&id).and_then(Weak::upgrade) {
            return ItemInfo::new(entry, self.clone());
        }
        let entry = Arc::new(Entry {
            id,
            fields: RwLock::new(Fields::default()),
            writer: Mutex::new(()),
            shared: Arc::downgrade(self),
        });
        registry.by_id.insert(id, Arc::downgrade(&entry));
        drop(registry);

        trace!(id, "cache entry created");
        ItemInfo::new(entry, self.clone())
    }

    fn live(&self, id: ItemId) -> Option<Arc<Entry>> {
        self.registry.read().by_id.get(&id).and_then(Weak::upgrade)
    }

    fn live_entries(&self) -> Vec<Arc<Entry>> {
        self.registry.read().by_id.values().filter_map(Weak::upgrade).collect()
    }

    /// Index `location` for path lookups. Caller holds the entry's field lock.
    fn remember_path(&self, id: ItemId, location: &ItemLocation) {
        self.registry.write().by_path.insert(path_key(location), id);
    }

    /// Caller holds the entry's field lock.
    fn forget_path(&self, id: ItemId, location: &ItemLocation) {
        let key = path_key(location);
        let mut registry = self.registry.write();
        if registry.by_path.get(&key) == Some(&id) {
            registry.by_path.remove(&key);
        }
    }

    fn forget_location(&self, id: ItemId, fields: &mut Fields) {
        if let Some(location) = fields.location.take() {
            self.forget_path(id, &location);
        }
    }

    fn clear(&self, id: ItemId, fields: &mut Fields) {
        self.forget_location(id, fields);
        *fields = Fields { invalid: fields.invalid, ..Fields::default() };
    }

    /// Drop whatever a committed change made stale.
    fn apply(&self, change: &Change) {
        match *change {
            Change::ItemAdded(id) => {
                if let Some(entry) = self.live(id) {
                    let mut fields = entry.fields.write();
                    self.clear(id, &mut fields);
                    fields.invalid = false;
                }
            }
            Change::ItemChanged(id, field) => {
                let Some(entry) = self.live(id) else {
                    return;
                };
                let mut fields = entry.fields.write();
                match field {
                    ItemField::Caption => fields.caption = None,
                    ItemField::DateTime => fields.date_time = None,
                    ItemField::Rating => {
                        fields.rating = None;
                        fields.properties = None;
                    }
                    ItemField::Tags => fields.tag_ids = None,
                    ItemField::Properties => fields.properties = None,
                    ItemField::Location => self.forget_location(id, &mut fields),
                }
            }
            Change::ItemRemoved(id) => {
                if let Some(entry) = self.live(id) {
                    let mut fields = entry.fields.write();
                    self.clear(id, &mut fields);
                    fields.invalid = true;
                }
            }
            Change::TagRemoved(tag) => {
                for entry in self.live_entries() {
                    let mut fields = entry.fields.write();
                    if fields.tag_ids.as_ref().is_some_and(|ids| ids.contains(&tag)) {
                        fields.tag_ids = None;
                    }
                }
            }
            Change::AlbumRenamed(album) | Change::AlbumRemoved(album) => {
                for entry in self.live_entries() {
                    let mut fields = entry.fields.write();
                    if fields.location.as_ref().is_some_and(|l| l.album_id == album) {
                        self.forget_location(entry.id, &mut fields);
                    }
                }
            }
            Change::TagAdded(_)
            | Change::TagMoved(_)
            | Change::TagRenamed(_)
            | Change::AlbumAdded(_)
            | Change::AlbumIconChanged(_) => {}
        }
    }
}

/// Subscribed to the store; holds the cache weakly so dropping the last
/// [`ItemCache`] also retires the listener.
struct CacheListener {
    shared: Weak<Shared>,
}

impl ChangeListener for CacheListener {
    fn on_change(&self, change: &Change) {
        if let Some(shared) = self.shared.upgrade() {
            shared.apply(change);
        }
    }
}

/// Thread-safe, lazily populated cache of item metadata.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct ItemCache {
    shared: Arc<Shared>,
}

impl ItemCache {
    /// Build a cache over `store` and subscribe it to the store's changes.
    pub fn new(store: Arc<Store>) -> Self {
        let shared = Arc::new(Shared { store: store.clone(), registry: RwLock::new(Registry::default()) });
        store.subscribe(Arc::new(CacheListener { shared: Arc::downgrade(&shared) }));
        Self { shared }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.shared.store
    }

    /// Canonical handle for `id`. Never fails: a handle for an id without a
    /// row reads as empty.
    pub fn get(&self, id: ItemId) -> ItemInfo {
        self.shared.get(id)
    }

    /// Handle for the item `name` in album `url` of collection `root`, or
    /// `None` if the store has no such item.
    pub fn get_by_path(&self, root: RootId, url: &str, name: &str) -> Result<Option<ItemInfo>> {
        let key = (root, normalize_url(url), name.to_string());
        let known = self.shared.registry.read().by_path.get(&key).copied();
        if let Some(entry) = known.and_then(|id| self.shared.live(id)) {
            return Ok(Some(ItemInfo::new(entry, self.shared.clone())));
        }

        let location = self.shared.store.session(|s| match s.item_id_by_path(root, &key.1, name)? {
            Some(id) => Ok(s.item_location(id)?.map(|location| (id, location))),
            None => Ok(None),
        })?;
        let Some((id, location)) = location else {
            return Ok(None);
        };

        let info = self.shared.get(id);
        info.prime_location(location);
        Ok(Some(info))
    }

    /// Number of canonical objects currently alive
    pub fn len(&self) -> usize {
        self.shared.registry.read().by_id.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every cached field; live handles reload on their next read.
    pub fn invalidate_all(&self) {
        let entries = self.shared.live_entries();
        for entry in &entries {
            let mut fields = entry.fields.write();
            self.shared.clear(entry.id, &mut fields);
            fields.invalid = false;
        }
        debug!(entries = entries.len(), "item cache invalidated");
    }
}

impl std::fmt::Debug for ItemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemCache").field("live", &self.len()).finish()
    }
}
