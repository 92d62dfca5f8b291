//! Item, item-tag association and item property statements.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::debug;

use crate::error::{Error, Result};
use crate::notify::{Change, ItemField};
use crate::store::data::{
    album_dir, normalize_url, AlbumId, Item, ItemId, ItemLocation, RootId, TagId, ROOT_TAG,
};
use crate::store::{placeholders, Session};

/// Property key holding the 0-5 star rating
pub const RATING_KEY: &str = "Rating";

/// Highest rating an item can carry
pub const MAX_RATING: u8 = 5;

/// Bound values per `IN (...)` list
const CHUNK: usize = 500;

const ITEM_COLUMNS: &str = "id, albumId, name, caption, datetime";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        album_id: row.get(1)?,
        name: row.get(2)?,
        caption: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        date_time: row.get(4)?,
    })
}

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<ItemLocation> {
    Ok(ItemLocation {
        root_id: row.get(0)?,
        root_path: PathBuf::from(row.get::<_, String>(1)?),
        album_id: row.get(2)?,
        album_url: row.get(3)?,
        name: row.get(4)?,
    })
}

impl Session<'_> {
    // --- items ---

    /// Insert an item, or update caption and datetime of the item already
    /// filed under `(album, name)`. The id of an existing item never changes.
    pub fn add_item(
        &self,
        album: AlbumId,
        name: &str,
        date_time: Option<NaiveDateTime>,
        caption: &str,
    ) -> Result<ItemId> {
        if let Some(existing) = self.item_by_name(album, name)? {
            self.conn().execute(
                "UPDATE Items SET caption = ?1, datetime = ?2 WHERE id = ?3",
                params![caption, date_time, existing.id],
            )?;
            if existing.caption != caption {
                self.record(Change::ItemChanged(existing.id, ItemField::Caption));
            }
            if existing.date_time != date_time {
                self.record(Change::ItemChanged(existing.id, ItemField::DateTime));
            }
            return Ok(existing.id);
        }

        if self.album(album)?.is_none() {
            return Err(Error::UnknownAlbum(album));
        }
        self.conn().execute(
            "INSERT INTO Items (name, albumId, caption, datetime) VALUES (?1, ?2, ?3, ?4)",
            params![name, album, caption, date_time],
        )?;
        let id = self.conn().last_insert_rowid();
        self.record(Change::ItemAdded(id));
        Ok(id)
    }

    pub fn item_exists(&self, id: ItemId) -> Result<bool> {
        let found = self
            .conn()
            .prepare_cached("SELECT 1 FROM Items WHERE id = ?1")?
            .exists([id])?;
        Ok(found)
    }

    pub fn item(&self, id: ItemId) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM Items WHERE id = ?1");
        Ok(self.conn().query_row(&sql, [id], item_from_row).optional()?)
    }

    pub fn item_by_name(&self, album: AlbumId, name: &str) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM Items WHERE albumId = ?1 AND name = ?2");
        Ok(self.conn().query_row(&sql, params![album, name], item_from_row).optional()?)
    }

    /// Id of the item `name` in album `url` of collection `root`
    pub fn item_id_by_path(&self, root: RootId, url: &str, name: &str) -> Result<Option<ItemId>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT I.id FROM Items AS I JOIN Albums AS A ON A.id = I.albumId
                 WHERE A.rootId = ?1 AND A.url = ?2 AND I.name = ?3",
                params![root, normalize_url(url), name],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn item_location(&self, id: ItemId) -> Result<Option<ItemLocation>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT R.id, R.path, A.id, A.url, I.name
                 FROM Items AS I
                   JOIN Albums AS A ON A.id = I.albumId
                   JOIN AlbumRoots AS R ON R.id = A.rootId
                 WHERE I.id = ?1",
                [id],
                location_from_row,
            )
            .optional()?)
    }

    pub fn item_names_in_album(&self, album: AlbumId) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT name FROM Items WHERE albumId = ?1 ORDER BY name")?;
        let names = stmt.query_map([album], |row| row.get(0))?;
        Ok(names.collect::<rusqlite::Result<_>>()?)
    }

    pub fn items_in_album(&self, album: AlbumId) -> Result<Vec<ItemId>> {
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT id FROM Items WHERE albumId = ?1 ORDER BY id")?;
        let ids = stmt.query_map([album], |row| row.get(0))?;
        Ok(ids.collect::<rusqlite::Result<_>>()?)
    }

    /// Items with no capture datetime, with the file each one maps to
    pub fn items_without_date(&self) -> Result<Vec<(ItemId, PathBuf)>> {
        let mut stmt = self.conn().prepare(
            "SELECT I.id, R.path, A.url, I.name
             FROM Items AS I
               JOIN Albums AS A ON A.id = I.albumId
               JOIN AlbumRoots AS R ON R.id = A.rootId
             WHERE I.datetime IS NULL OR I.datetime = ''
             ORDER BY I.id",
        )?;
        let rows = stmt.query_map([], |row| {
            let root: String = row.get(1)?;
            let url: String = row.get(2)?;
            let name: String = row.get(3)?;
            Ok((row.get::<_, ItemId>(0)?, album_dir(root.as_ref(), &url).join(name)))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Capture datetimes of many items; items that do not exist are absent
    /// from the result.
    pub fn items_date_times(&self, items: &[ItemId]) -> Result<HashMap<ItemId, Option<NaiveDateTime>>> {
        let mut out = HashMap::with_capacity(items.len());
        for chunk in items.chunks(CHUNK) {
            let sql = format!("SELECT id, datetime FROM Items WHERE id IN ({})", placeholders(chunk.len()));
            let mut stmt = self.conn().prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk))?;
            while let Some(row) = rows.next()? {
                out.insert(row.get(0)?, row.get(1)?);
            }
        }
        Ok(out)
    }

    pub fn set_item_caption(&self, id: ItemId, caption: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute("UPDATE Items SET caption = ?1 WHERE id = ?2", params![caption, id])?;
        if changed > 0 {
            self.record(Change::ItemChanged(id, ItemField::Caption));
        }
        Ok(())
    }

    pub fn set_item_date(&self, id: ItemId, date_time: Option<NaiveDateTime>) -> Result<()> {
        let changed = self
            .conn()
            .execute("UPDATE Items SET datetime = ?1 WHERE id = ?2", params![date_time, id])?;
        if changed > 0 {
            self.record(Change::ItemChanged(id, ItemField::DateTime));
        }
        Ok(())
    }

    /// File item `id` as `name` in `album`, replacing any item already there.
    pub fn move_item(&self, id: ItemId, album: AlbumId, name: &str) -> Result<()> {
        self.atomic(|s| {
            if s.item(id)?.is_none() {
                return Ok(());
            }
            if s.album(album)?.is_none() {
                return Err(Error::UnknownAlbum(album));
            }
            if let Some(target) = s.item_by_name(album, name)? {
                if target.id == id {
                    return Ok(());
                }
                s.purge_items(&[target.id])?;
            }

            s.conn().execute(
                "UPDATE Items SET albumId = ?1, name = ?2 WHERE id = ?3",
                params![album, name, id],
            )?;
            s.record(Change::ItemChanged(id, ItemField::Location));
            Ok(())
        })
    }

    /// Copy item `id` (caption, datetime, tags, properties) to `name` in
    /// `album`, replacing any item already there. Returns the new item's id,
    /// or `None` if the source does not exist.
    pub fn copy_item(&self, id: ItemId, album: AlbumId, name: &str) -> Result<Option<ItemId>> {
        self.atomic(|s| {
            let Some(source) = s.item(id)? else {
                return Ok(None);
            };
            if source.album_id == album && source.name == name {
                return Ok(Some(id));
            }
            if let Some(target) = s.item_by_name(album, name)? {
                s.purge_items(&[target.id])?;
            }

            let copy = s.add_item(album, name, source.date_time, &source.caption)?;
            s.conn().execute(
                "INSERT INTO ItemTags (itemId, tagId) SELECT ?1, tagId FROM ItemTags WHERE itemId = ?2",
                [copy, id],
            )?;
            s.conn().execute(
                "INSERT INTO ItemProperties (itemId, key, value)
                    SELECT ?1, key, value FROM ItemProperties WHERE itemId = ?2",
                [copy, id],
            )?;
            Ok(Some(copy))
        })
    }

    /// Delete an item with its associations and properties. Returns whether
    /// it existed.
    pub fn delete_item(&self, id: ItemId) -> Result<bool> {
        self.atomic(|s| {
            if s.item(id)?.is_none() {
                return Ok(false);
            }
            s.purge_items(&[id])?;
            Ok(true)
        })
    }

    pub fn delete_item_by_name(&self, album: AlbumId, name: &str) -> Result<Option<ItemId>> {
        self.atomic(|s| match s.item_by_name(album, name)? {
            Some(item) => {
                s.purge_items(&[item.id])?;
                Ok(Some(item.id))
            }
            None => Ok(None),
        })
    }

    /// Delete the given items and everything that references them: tag
    /// associations, properties, and album/tag icon references.
    /// Callers provide the atomic scope.
    pub(crate) fn purge_items(&self, ids: &[ItemId]) -> Result<()> {
        for chunk in ids.chunks(CHUNK) {
            let marks = placeholders(chunk.len());

            let icon_albums: Vec<AlbumId> = {
                let sql = format!("SELECT id FROM Albums WHERE iconItemId IN ({marks})");
                let mut stmt = self.conn().prepare(&sql)?;
                let ids = stmt.query_map(params_from_iter(chunk), |row| row.get(0))?;
                ids.collect::<rusqlite::Result<_>>()?
            };

            for sql in [
                format!("DELETE FROM ItemTags WHERE itemId IN ({marks})"),
                format!("DELETE FROM ItemProperties WHERE itemId IN ({marks})"),
                format!("UPDATE Albums SET iconItemId = NULL WHERE iconItemId IN ({marks})"),
                format!("UPDATE Tags SET iconItemId = NULL WHERE iconItemId IN ({marks})"),
                format!("DELETE FROM Items WHERE id IN ({marks})"),
            ] {
                self.conn().execute(&sql, params_from_iter(chunk))?;
            }

            for &album in &icon_albums {
                self.record(Change::AlbumIconChanged(album));
            }
            for &id in chunk {
                self.record(Change::ItemRemoved(id));
            }
        }
        debug!(count = ids.len(), "items purged");
        Ok(())
    }

    // --- tag associations ---

    pub fn item_tag_ids(&self, item: ItemId) -> Result<Vec<TagId>> {
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT tagId FROM ItemTags WHERE itemId = ?1 ORDER BY tagId")?;
        let ids = stmt.query_map([item], |row| row.get(0))?;
        Ok(ids.collect::<rusqlite::Result<_>>()?)
    }

    /// Tag ids of many items in few round-trips. Every requested item gets
    /// an entry, possibly empty.
    pub fn items_tag_ids(&self, items: &[ItemId]) -> Result<HashMap<ItemId, Vec<TagId>>> {
        let mut out: HashMap<ItemId, Vec<TagId>> = items.iter().map(|&id| (id, Vec::new())).collect();
        for chunk in items.chunks(CHUNK) {
            let sql = format!(
                "SELECT itemId, tagId FROM ItemTags WHERE itemId IN ({}) ORDER BY itemId, tagId",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn().prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk))?;
            while let Some(row) = rows.next()? {
                out.entry(row.get(0)?).or_default().push(row.get(1)?);
            }
        }
        Ok(out)
    }

    pub fn item_tag_names(&self, item: ItemId) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT T.name FROM ItemTags AS IT JOIN Tags AS T ON T.id = IT.tagId
             WHERE IT.itemId = ?1 ORDER BY T.name",
        )?;
        let names = stmt.query_map([item], |row| row.get(0))?;
        Ok(names.collect::<rusqlite::Result<_>>()?)
    }

    /// Tags carried by every one of `items`
    pub fn common_tag_ids(&self, items: &[ItemId]) -> Result<Vec<TagId>> {
        let mut per_item = self.items_tag_ids(items)?.into_values();
        let Some(mut common) = per_item.next() else {
            return Ok(Vec::new());
        };
        for tags in per_item {
            common.retain(|t| tags.contains(t));
        }
        common.sort_unstable();
        Ok(common)
    }

    /// Attach `tag` to `item`. Attaching twice is a no-op.
    pub fn add_item_tag(&self, item: ItemId, tag: TagId) -> Result<()> {
        if tag == ROOT_TAG || !self.tag_exists(tag)? {
            return Err(Error::UnknownTag(tag));
        }
        if !self.item_exists(item)? {
            return Err(Error::UnknownItem(item));
        }
        let added = self.conn().execute(
            "INSERT OR IGNORE INTO ItemTags (itemId, tagId) VALUES (?1, ?2)",
            [item, tag],
        )?;
        if added > 0 {
            self.record(Change::ItemChanged(item, ItemField::Tags));
        }
        Ok(())
    }

    pub fn remove_item_tag(&self, item: ItemId, tag: TagId) -> Result<()> {
        let removed = self
            .conn()
            .execute("DELETE FROM ItemTags WHERE itemId = ?1 AND tagId = ?2", [item, tag])?;
        if removed > 0 {
            self.record(Change::ItemChanged(item, ItemField::Tags));
        }
        Ok(())
    }

    pub fn remove_all_item_tags(&self, item: ItemId) -> Result<()> {
        let removed = self.conn().execute("DELETE FROM ItemTags WHERE itemId = ?1", [item])?;
        if removed > 0 {
            self.record(Change::ItemChanged(item, ItemField::Tags));
        }
        Ok(())
    }

    /// Items tagged with `tag`, or with any tag below it when
    /// `include_descendants` is set.
    pub fn items_with_tag(&self, tag: TagId, include_descendants: bool) -> Result<Vec<ItemId>> {
        let sql = if include_descendants {
            "SELECT DISTINCT IT.itemId FROM ItemTags AS IT
               JOIN TagClosure AS C ON C.tagId = IT.tagId
             WHERE C.ancestorId = ?1 ORDER BY IT.itemId"
        } else {
            "SELECT itemId FROM ItemTags WHERE tagId = ?1 ORDER BY itemId"
        };
        let mut stmt = self.conn().prepare_cached(sql)?;
        let ids = stmt.query_map([tag], |row| row.get(0))?;
        Ok(ids.collect::<rusqlite::Result<_>>()?)
    }

    // --- properties ---

    pub fn item_property(&self, item: ItemId, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM ItemProperties WHERE itemId = ?1 AND key = ?2",
                params![item, key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Every `(key, value)` of the item, ordered by key
    pub fn item_properties(&self, item: ItemId) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT key, value FROM ItemProperties WHERE itemId = ?1 ORDER BY key")?;
        let rows = stmt.query_map([item], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn set_item_property(&self, item: ItemId, key: &str, value: &str) -> Result<()> {
        if !self.item_exists(item)? {
            return Err(Error::UnknownItem(item));
        }
        self.conn().execute(
            "INSERT INTO ItemProperties (itemId, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (itemId, key) DO UPDATE SET value = excluded.value",
            params![item, key, value],
        )?;
        self.record(Change::ItemChanged(item, property_field(key)));
        Ok(())
    }

    pub fn remove_item_property(&self, item: ItemId, key: &str) -> Result<()> {
        let removed = self.conn().execute(
            "DELETE FROM ItemProperties WHERE itemId = ?1 AND key = ?2",
            params![item, key],
        )?;
        if removed > 0 {
            self.record(Change::ItemChanged(item, property_field(key)));
        }
        Ok(())
    }

    /// Star rating, `None` when the item was never rated.
    pub fn item_rating(&self, item: ItemId) -> Result<Option<u8>> {
        let value = self.item_property(item, RATING_KEY)?;
        Ok(value.and_then(|v| v.trim().parse::<i64>().ok()).map(clamp_rating))
    }

    /// Store a rating, clamped to `0..=MAX_RATING`.
    pub fn set_item_rating(&self, item: ItemId, rating: i64) -> Result<u8> {
        let rating = clamp_rating(rating);
        self.set_item_property(item, RATING_KEY, &rating.to_string())?;
        Ok(rating)
    }
}

fn property_field(key: &str) -> ItemField {
    if key == RATING_KEY {
        ItemField::Rating
    } else {
        ItemField::Properties
    }
}

pub(crate) fn clamp_rating(rating: i64) -> u8 {
    rating.clamp(0, MAX_RATING as i64) as u8
}
