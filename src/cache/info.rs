//! Canonical item handle: double-checked field accessors and write-through mutators.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::warn;

use super::{Entry, Fields, Shared};
use crate::error::Result;
use crate::store::data::{AlbumId, ItemId, ItemLocation, TagId};
use crate::store::items::clamp_rating;
use crate::store::Session;

/// Shared handle to the canonical metadata object of one item.
///
/// Accessors never fail: if the item row is gone (or the store cannot be
/// read) they return an empty value and the handle stays usable.
#[derive(Clone)]
pub struct ItemInfo {
    entry: Arc<Entry>,
    shared: Arc<Shared>,
}

impl ItemInfo {
    pub(super) fn new(entry: Arc<Entry>, shared: Arc<Shared>) -> Self {
        Self { entry, shared }
    }

    pub fn id(&self) -> ItemId {
        self.entry.id
    }

    /// Whether both handles refer to the same canonical object
    pub fn ptr_eq(&self, other: &ItemInfo) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// Return the cached field, or load it from the store.
    ///
    /// `load` yields `Ok(None)` when the item row does not exist; the object
    /// is then marked invalid. Store errors are logged and read as empty.
    fn cached<T: Clone>(
        &self,
        slot: fn(&Fields) -> &Option<T>,
        slot_mut: fn(&mut Fields) -> &mut Option<T>,
        load: impl FnOnce(&Session<'_>, ItemId) -> Result<Option<T>>,
    ) -> Option<T> {
        {
            let fields = self.entry.fields.read();
            if fields.invalid {
                return None;
            }
            if let Some(value) = slot(&*fields) {
                return Some(value.clone());
            }
        }

        let mut fields = self.entry.fields.write();
        // Another reader may have populated it while we waited.
        if fields.invalid {
            return None;
        }
        if let Some(value) = slot(&*fields) {
            return Some(value.clone());
        }

        let id = self.entry.id;
        match self.shared.store.session(|s| load(s, id)) {
            Ok(Some(value)) => {
                *slot_mut(&mut *fields) = Some(value.clone());
                Some(value)
            }
            Ok(None) => {
                fields.invalid = true;
                None
            }
            Err(err) => {
                warn!(id, error = %err, "failed to load item field");
                None
            }
        }
    }

    /// Run `load` only if the item row still exists.
    fn if_exists<T>(
        s: &Session<'_>,
        id: ItemId,
        load: impl FnOnce(&Session<'_>) -> Result<T>,
    ) -> Result<Option<T>> {
        if s.item(id)?.is_none() {
            return Ok(None);
        }
        load(s).map(Some)
    }

    // --- accessors ---

    /// Whether the item row exists
    pub fn is_valid(&self) -> bool {
        self.location().is_some()
    }

    pub fn location(&self) -> Option<ItemLocation> {
        {
            let fields = self.entry.fields.read();
            if fields.invalid || fields.location.is_some() {
                return fields.location.clone();
            }
        }

        let mut fields = self.entry.fields.write();
        if fields.invalid || fields.location.is_some() {
            return fields.location.clone();
        }
        let id = self.entry.id;
        match self.shared.store.session(|s| s.item_location(id)) {
            Ok(Some(location)) => {
                self.shared.remember_path(id, &location);
                fields.location = Some(location.clone());
                Some(location)
            }
            Ok(None) => {
                fields.invalid = true;
                None
            }
            Err(err) => {
                warn!(id, error = %err, "failed to load item location");
                None
            }
        }
    }

    /// File name, empty for an invalid item
    pub fn name(&self) -> String {
        self.location().map(|l| l.name).unwrap_or_default()
    }

    pub fn album_id(&self) -> Option<AlbumId> {
        self.location().map(|l| l.album_id)
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.location().map(|l| l.file_path())
    }

    pub fn caption(&self) -> String {
        self.cached(|f| &f.caption, |f| &mut f.caption, |s, id| Ok(s.item(id)?.map(|i| i.caption)))
            .unwrap_or_default()
    }

    pub fn date_time(&self) -> Option<NaiveDateTime> {
        self.cached(|f| &f.date_time, |f| &mut f.date_time, |s, id| Ok(s.item(id)?.map(|i| i.date_time)))
            .flatten()
    }

    /// Star rating; `None` if unrated or invalid
    pub fn rating(&self) -> Option<u8> {
        self.cached(|f| &f.rating, |f| &mut f.rating, |s, id| Self::if_exists(s, id, |s| s.item_rating(id)))
            .flatten()
    }

    /// Ids of the tags attached to the item, ascending
    pub fn tag_ids(&self) -> Vec<TagId> {
        self.cached(|f| &f.tag_ids, |f| &mut f.tag_ids, |s, id| Self::if_exists(s, id, |s| s.item_tag_ids(id)))
            .unwrap_or_default()
    }

    pub fn property(&self, key: &str) -> Option<String> {
        let properties = self.cached(
            |f| &f.properties,
            |f| &mut f.properties,
            |s, id| Self::if_exists(s, id, |s| Ok(s.item_properties(id)?.into_iter().collect::<BTreeMap<_, _>>())),
        )?;
        properties.get(key).cloned()
    }

    // --- mutators ---

    /// Write `write` through to the store, then apply `update` to the cached
    /// fields. Both run under the object's writer lock, so `update` sees every
    /// earlier mutation of this object and may derive from the current fields.
    ///
    /// A no-op on an invalid object; an object whose row is gone turns invalid.
    pub(super) fn write_through<T>(
        &self,
        write: impl FnOnce(&Session<'_>, ItemId) -> Result<T>,
        update: impl FnOnce(&mut Fields, &T),
    ) -> Result<Option<T>> {
        let _writer = self.entry.writer.lock();
        if self.entry.fields.read().invalid {
            return Ok(None);
        }

        let id = self.entry.id;
        let value = self.shared.store.session(|s| {
            s.atomic(|s| if s.item_exists(id)? { write(s, id).map(Some) } else { Ok(None) })
        })?;

        let mut fields = self.entry.fields.write();
        match &value {
            Some(value) if !fields.invalid => update(&mut *fields, value),
            Some(_) => {}
            None => {
                self.shared.clear(id, &mut fields);
                fields.invalid = true;
            }
        }
        Ok(value)
    }

    pub fn set_caption(&self, caption: &str) -> Result<()> {
        self.write_through(
            |s, id| s.set_item_caption(id, caption),
            |f, _| f.caption = Some(caption.to_string()),
        )?;
        Ok(())
    }

    pub fn set_date_time(&self, date_time: Option<NaiveDateTime>) -> Result<()> {
        self.write_through(|s, id| s.set_item_date(id, date_time), |f, _| f.date_time = Some(date_time))?;
        Ok(())
    }

    /// Store a rating clamped to 0..=5. Returns the stored value.
    pub fn set_rating(&self, rating: i64) -> Result<u8> {
        let stored = self.write_through(
            |s, id| s.set_item_rating(id, rating),
            |f, &r| {
                f.rating = Some(Some(r));
                f.properties = None;
            },
        )?;
        Ok(stored.unwrap_or_else(|| clamp_rating(rating)))
    }

    /// Attach `tag` to the item.
    pub fn set_tag(&self, tag: TagId) -> Result<()> {
        self.write_through(|s, id| s.add_item_tag(id, tag), |f, _| with_tag(f, tag))?;
        Ok(())
    }

    pub fn remove_tag(&self, tag: TagId) -> Result<()> {
        self.write_through(|s, id| s.remove_item_tag(id, tag), |f, _| without_tag(f, tag))?;
        Ok(())
    }

    pub fn remove_all_tags(&self) -> Result<()> {
        self.write_through(|s, id| s.remove_all_item_tags(id), |f, _| f.tag_ids = Some(Vec::new()))?;
        Ok(())
    }

    /// Copy the item to `name` in `album` and return the copy's handle.
    pub fn copy_to(&self, album: AlbumId, name: &str) -> Result<Option<ItemInfo>> {
        let id = self.entry.id;
        let copy = self.shared.store.session(|s| s.copy_item(id, album, name))?;
        Ok(copy.map(|copy| self.shared.get(copy)))
    }

    /// Seed the location of a freshly resolved object.
    pub(super) fn prime_location(&self, location: ItemLocation) {
        let mut fields = self.entry.fields.write();
        if fields.location.is_none() && !fields.invalid {
            self.shared.remember_path(self.entry.id, &location);
            fields.location = Some(location);
        }
    }

    pub(super) fn entry(&self) -> &Arc<Entry> {
        &self.entry
    }
}

/// Add `tag` to the cached tag ids. Ids that are not loaded stay unloaded.
pub(super) fn with_tag(fields: &mut Fields, tag: TagId) {
    if let Some(tags) = fields.tag_ids.as_mut() {
        if let Err(at) = tags.binary_search(&tag) {
            tags.insert(at, tag);
        }
    }
}

pub(super) fn without_tag(fields: &mut Fields, tag: TagId) {
    if let Some(tags) = fields.tag_ids.as_mut() {
        tags.retain(|&t| t != tag);
    }
}

impl std::fmt::Debug for ItemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemInfo").field("id", &self.entry.id).finish_non_exhaustive()
    }
}
