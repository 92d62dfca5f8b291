//! Collection root and album statements.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::notify::Change;
use crate::store::data::{
    album_dir, normalize_url, Album, AlbumId, AlbumRoot, ItemId, RootId, ROOT_ALBUM_URL,
};
use crate::store::Session;

const ALBUM_COLUMNS: &str = "id, rootId, url, date, caption, collection, iconItemId";

fn album_from_row(row: &Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        root_id: row.get(1)?,
        url: row.get(2)?,
        date: row.get(3)?,
        caption: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        collection: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        icon: row.get(6)?,
    })
}

fn root_from_row(row: &Row<'_>) -> rusqlite::Result<AlbumRoot> {
    Ok(AlbumRoot { id: row.get(0)?, label: row.get(1)?, path: PathBuf::from(row.get::<_, String>(2)?) })
}

impl Session<'_> {
    // --- collection roots ---

    /// Register `path` as a collection root, or return the existing root
    /// for it (its label is updated).
    pub fn add_root(&self, label: &str, path: &Path) -> Result<RootId> {
        let path = path.to_string_lossy();
        let existing = self
            .conn()
            .query_row("SELECT id FROM AlbumRoots WHERE path = ?1", [path.as_ref()], |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            self.conn()
                .execute("UPDATE AlbumRoots SET label = ?1 WHERE id = ?2", params![label, id])?;
            return Ok(id);
        }

        self.conn().execute(
            "INSERT INTO AlbumRoots (label, path) VALUES (?1, ?2)",
            params![label, path.as_ref()],
        )?;
        let id = self.conn().last_insert_rowid();
        debug!(id, label, path = %path, "collection root added");
        Ok(id)
    }

    pub fn root(&self, id: RootId) -> Result<Option<AlbumRoot>> {
        Ok(self
            .conn()
            .query_row("SELECT id, label, path FROM AlbumRoots WHERE id = ?1", [id], root_from_row)
            .optional()?)
    }

    pub fn roots(&self) -> Result<Vec<AlbumRoot>> {
        let mut stmt = self.conn().prepare("SELECT id, label, path FROM AlbumRoots ORDER BY id")?;
        let roots = stmt.query_map([], root_from_row)?;
        Ok(roots.collect::<rusqlite::Result<_>>()?)
    }

    // --- albums ---

    /// Insert an album, or update date, caption and collection of the album
    /// already filed at `(root, url)`. Returns its id.
    pub fn add_album(
        &self,
        root: RootId,
        url: &str,
        date: NaiveDate,
        caption: &str,
        collection: &str,
    ) -> Result<AlbumId> {
        let url = normalize_url(url);
        if self.root(root)?.is_none() {
            return Err(Error::UnknownRoot(root));
        }

        if let Some(album) = self.album_by_url(root, &url)? {
            self.conn().execute(
                "UPDATE Albums SET date = ?1, caption = ?2, collection = ?3 WHERE id = ?4",
                params![date, caption, collection, album.id],
            )?;
            return Ok(album.id);
        }

        self.conn().execute(
            "INSERT INTO Albums (rootId, url, date, caption, collection) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![root, url, date, caption, collection],
        )?;
        let id = self.conn().last_insert_rowid();
        self.record(Change::AlbumAdded(id));
        debug!(id, root, url = %url, "album added");
        Ok(id)
    }

    /// Id of the album at `(root, url)`, created (dated today) if missing.
    pub fn get_or_create_album(&self, root: RootId, url: &str) -> Result<AlbumId> {
        match self.album_by_url(root, url)? {
            Some(album) => Ok(album.id),
            None => self.add_album(root, url, Local::now().date_naive(), "", ""),
        }
    }

    pub fn album(&self, id: AlbumId) -> Result<Option<Album>> {
        let sql = format!("SELECT {ALBUM_COLUMNS} FROM Albums WHERE id = ?1");
        Ok(self.conn().query_row(&sql, [id], album_from_row).optional()?)
    }

    pub fn album_by_url(&self, root: RootId, url: &str) -> Result<Option<Album>> {
        let sql = format!("SELECT {ALBUM_COLUMNS} FROM Albums WHERE rootId = ?1 AND url = ?2");
        Ok(self
            .conn()
            .query_row(&sql, params![root, normalize_url(url)], album_from_row)
            .optional()?)
    }

    /// All albums, ordered by root then url
    pub fn albums(&self) -> Result<Vec<Album>> {
        let sql = format!("SELECT {ALBUM_COLUMNS} FROM Albums ORDER BY rootId, url");
        let mut stmt = self.conn().prepare(&sql)?;
        let albums = stmt.query_map([], album_from_row)?;
        Ok(albums.collect::<rusqlite::Result<_>>()?)
    }

    pub fn albums_in_root(&self, root: RootId) -> Result<Vec<Album>> {
        let sql = format!("SELECT {ALBUM_COLUMNS} FROM Albums WHERE rootId = ?1 ORDER BY url");
        let mut stmt = self.conn().prepare(&sql)?;
        let albums = stmt.query_map([root], album_from_row)?;
        Ok(albums.collect::<rusqlite::Result<_>>()?)
    }

    pub fn set_album_caption(&self, id: AlbumId, caption: &str) -> Result<()> {
        self.conn()
            .execute("UPDATE Albums SET caption = ?1 WHERE id = ?2", params![caption, id])?;
        Ok(())
    }

    pub fn set_album_collection(&self, id: AlbumId, collection: &str) -> Result<()> {
        self.conn()
            .execute("UPDATE Albums SET collection = ?1 WHERE id = ?2", params![collection, id])?;
        Ok(())
    }

    pub fn set_album_date(&self, id: AlbumId, date: NaiveDate) -> Result<()> {
        self.conn().execute("UPDATE Albums SET date = ?1 WHERE id = ?2", params![date, id])?;
        Ok(())
    }

    /// Use `item` as the album icon (`None` clears it).
    pub fn set_album_icon(&self, id: AlbumId, item: Option<ItemId>) -> Result<()> {
        let changed = self
            .conn()
            .execute("UPDATE Albums SET iconItemId = ?1 WHERE id = ?2", params![item, id])?;
        if changed > 0 {
            self.record(Change::AlbumIconChanged(id));
        }
        Ok(())
    }

    /// File path of the album icon item, if set and still present
    pub fn album_icon_path(&self, id: AlbumId) -> Result<Option<PathBuf>> {
        let row = self
            .conn()
            .query_row(
                "SELECT R.path, IA.url, I.name
                 FROM Albums AS A
                   JOIN Items AS I ON I.id = A.iconItemId
                   JOIN Albums AS IA ON IA.id = I.albumId
                   JOIN AlbumRoots AS R ON R.id = IA.rootId
                 WHERE A.id = ?1",
                [id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;
        Ok(row.map(|(root, url, name)| album_dir(root.as_ref(), &url).join(name)))
    }

    /// Move album `id` to `new_url` within its root. Albums below it follow;
    /// an album already filed at `new_url` is deleted first. A url below the
    /// album itself is rejected with [`Error::InvalidAlbumUrl`].
    pub fn rename_album(&self, id: AlbumId, new_url: &str) -> Result<()> {
        let new_url = normalize_url(new_url);
        self.atomic(|s| {
            let album = s.album(id)?.ok_or(Error::UnknownAlbum(id))?;
            if album.url == new_url {
                return Ok(());
            }
            if album.url == ROOT_ALBUM_URL {
                warn!(id, "the root album of a collection cannot be renamed");
                return Ok(());
            }
            if new_url.starts_with(&format!("{}/", album.url)) {
                return Err(Error::InvalidAlbumUrl { album: id, url: new_url.clone() });
            }

            if let Some(stale) = s.album_by_url(album.root_id, &new_url)? {
                s.delete_album(stale.id)?;
            }

            let old_prefix = format!("{}/", album.url);
            let new_prefix = format!("{new_url}/");
            let prefix_len = old_prefix.chars().count() as i64;
            let children: Vec<AlbumId> = {
                let mut stmt = s.conn().prepare(
                    "SELECT id FROM Albums WHERE rootId = ?1 AND substr(url, 1, ?2) = ?3",
                )?;
                let ids = stmt.query_map(params![album.root_id, prefix_len, old_prefix], |row| row.get(0))?;
                ids.collect::<rusqlite::Result<_>>()?
            };

            s.conn().execute(
                "UPDATE Albums SET url = ?1 || substr(url, ?2 + 1)
                 WHERE rootId = ?3 AND substr(url, 1, ?2) = ?4",
                params![new_prefix, prefix_len, album.root_id, old_prefix],
            )?;
            s.conn()
                .execute("UPDATE Albums SET url = ?1 WHERE id = ?2", params![new_url, id])?;

            s.record(Change::AlbumRenamed(id));
            for child in children {
                s.record(Change::AlbumRenamed(child));
            }
            debug!(id, from = %album.url, to = %new_url, "album renamed");
            Ok(())
        })
    }

    /// Delete the album together with its items, their tag associations and
    /// properties. Returns the removed item ids (empty if the album did not exist).
    pub fn delete_album(&self, id: AlbumId) -> Result<Vec<ItemId>> {
        self.atomic(|s| {
            if s.album(id)?.is_none() {
                return Ok(Vec::new());
            }
            let items = s.items_in_album(id)?;
            s.purge_items(&items)?;
            s.conn().execute("DELETE FROM Albums WHERE id = ?1", [id])?;
            s.record(Change::AlbumRemoved(id));
            debug!(id, items = items.len(), "album deleted");
            Ok(items)
        })
    }

    /// Mean capture date of the dated items in the album
    pub fn album_average_date(&self, id: AlbumId) -> Result<Option<NaiveDate>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT datetime FROM Items WHERE albumId = ?1 AND datetime IS NOT NULL AND datetime <> ''")?;
        let dates = stmt.query_map([id], |row| row.get::<_, NaiveDateTime>(0))?;

        let mut sum = 0i64;
        let mut count = 0i64;
        for date in dates {
            sum += date?.and_utc().timestamp();
            count += 1;
        }
        if count == 0 {
            return Ok(None);
        }
        Ok(chrono::DateTime::from_timestamp(sum / count, 0).map(|d| d.date_naive()))
    }
}
