//! Tag statements.
//!
//! Every mutation keeps `TagClosure` in step through [`crate::closure`] and
//! runs atomically, so the closure table is never observed half-updated.

use std::path::PathBuf;

use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::debug;

use crate::closure;
use crate::error::{Error, Result};
use crate::notify::Change;
use crate::store::data::{album_dir, ItemId, Tag, TagIcon, TagId, ROOT_TAG};
use crate::store::{placeholders, Session};

const TAG_COLUMNS: &str = "id, parentId, name, iconItemId, iconName";

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    let icon_item: Option<ItemId> = row.get(3)?;
    let icon_name: Option<String> = row.get(4)?;
    let icon = match (icon_item, icon_name) {
        (Some(item), _) => TagIcon::Item(item),
        (None, Some(name)) if !name.is_empty() => TagIcon::Theme(name),
        _ => TagIcon::None,
    };
    Ok(Tag { id: row.get(0)?, parent_id: row.get(1)?, name: row.get(2)?, icon })
}

fn icon_columns(icon: &TagIcon) -> (Option<ItemId>, Option<&str>) {
    match icon {
        TagIcon::None => (None, None),
        TagIcon::Theme(name) => (None, Some(name.as_str())),
        TagIcon::Item(id) => (Some(*id), None),
    }
}

impl Session<'_> {
    pub fn tag_exists(&self, id: TagId) -> Result<bool> {
        if id == ROOT_TAG {
            return Ok(true);
        }
        let found = self
            .conn()
            .query_row("SELECT 1 FROM Tags WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Create a tag below `parent` (or [`ROOT_TAG`]) and return its id.
    pub fn add_tag(&self, parent: TagId, name: &str, icon: TagIcon) -> Result<TagId> {
        self.atomic(|s| {
            if !s.tag_exists(parent)? {
                return Err(Error::UnknownTag(parent));
            }
            let (icon_item, icon_name) = icon_columns(&icon);
            s.conn().execute(
                "INSERT INTO Tags (parentId, name, iconItemId, iconName) VALUES (?1, ?2, ?3, ?4)",
                params![parent, name, icon_item, icon_name],
            )?;
            let id = s.conn().last_insert_rowid();
            closure::link(s, id, parent)?;
            s.record(Change::TagAdded(id));
            debug!(id, parent, name, "tag added");
            Ok(id)
        })
    }

    pub fn tag(&self, id: TagId) -> Result<Option<Tag>> {
        let sql = format!("SELECT {TAG_COLUMNS} FROM Tags WHERE id = ?1");
        Ok(self.conn().query_row(&sql, [id], tag_from_row).optional()?)
    }

    /// Child tag of `parent` called `name`
    pub fn tag_by_name(&self, parent: TagId, name: &str) -> Result<Option<Tag>> {
        let sql = format!("SELECT {TAG_COLUMNS} FROM Tags WHERE parentId = ?1 AND name = ?2");
        Ok(self.conn().query_row(&sql, params![parent, name], tag_from_row).optional()?)
    }

    /// All tags, ordered by id (parents always precede their children only
    /// if they were never moved; callers needing a tree should use `parent_id`).
    pub fn tags(&self) -> Result<Vec<Tag>> {
        let sql = format!("SELECT {TAG_COLUMNS} FROM Tags ORDER BY id");
        let mut stmt = self.conn().prepare(&sql)?;
        let tags = stmt.query_map([], tag_from_row)?;
        Ok(tags.collect::<rusqlite::Result<_>>()?)
    }

    pub fn set_tag_name(&self, id: TagId, name: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute("UPDATE Tags SET name = ?1 WHERE id = ?2", params![name, id])?;
        if changed > 0 {
            self.record(Change::TagRenamed(id));
        }
        Ok(())
    }

    pub fn set_tag_icon(&self, id: TagId, icon: TagIcon) -> Result<()> {
        let (icon_item, icon_name) = icon_columns(&icon);
        self.conn().execute(
            "UPDATE Tags SET iconItemId = ?1, iconName = ?2 WHERE id = ?3",
            params![icon_item, icon_name, id],
        )?;
        Ok(())
    }

    /// File path of the item used as icon, if the tag uses one
    pub fn tag_icon_path(&self, id: TagId) -> Result<Option<PathBuf>> {
        let row = self
            .conn()
            .query_row(
                "SELECT R.path, A.url, I.name
                 FROM Tags AS T
                   JOIN Items AS I ON I.id = T.iconItemId
                   JOIN Albums AS A ON A.id = I.albumId
                   JOIN AlbumRoots AS R ON R.id = A.rootId
                 WHERE T.id = ?1",
                [id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;
        Ok(row.map(|(root, url, name)| album_dir(root.as_ref(), &url).join(name)))
    }

    /// Re-parent `id` (with its whole subtree) below `new_parent`.
    ///
    /// Rejected with [`Error::TagCycle`] before any write if `new_parent` is
    /// the tag itself or one of its descendants.
    pub fn move_tag(&self, id: TagId, new_parent: TagId) -> Result<()> {
        self.atomic(|s| {
            let tag = s.tag(id)?.ok_or(Error::UnknownTag(id))?;
            if !s.tag_exists(new_parent)? {
                return Err(Error::UnknownTag(new_parent));
            }
            closure::check_move(s, id, new_parent)?;
            if tag.parent_id == new_parent {
                return Ok(());
            }

            s.conn()
                .execute("UPDATE Tags SET parentId = ?1 WHERE id = ?2", [new_parent, id])?;
            closure::relink(s, id, new_parent)?;
            s.record(Change::TagMoved(id));
            Ok(())
        })
    }

    /// Delete `id`, every tag below it, and all their item associations.
    /// Returns the removed tag ids (empty if `id` did not exist).
    pub fn delete_tag(&self, id: TagId) -> Result<Vec<TagId>> {
        if id == ROOT_TAG {
            return Err(Error::UnknownTag(id));
        }
        self.atomic(|s| {
            let subtree = closure::descendants(s, id)?;
            if subtree.is_empty() {
                return Ok(subtree);
            }

            let marks = placeholders(subtree.len());
            s.conn().execute(
                &format!("DELETE FROM ItemTags WHERE tagId IN ({marks})"),
                params_from_iter(&subtree),
            )?;
            s.conn().execute(
                &format!("DELETE FROM Tags WHERE id IN ({marks})"),
                params_from_iter(&subtree),
            )?;
            closure::unlink(s, &subtree)?;

            for &tag in &subtree {
                s.record(Change::TagRemoved(tag));
            }
            debug!(id, removed = subtree.len(), "tag subtree deleted");
            Ok(subtree)
        })
    }

    /// Ancestors of `id` (itself and the root included)
    pub fn tag_ancestors(&self, id: TagId) -> Result<Vec<TagId>> {
        closure::ancestors(self, id)
    }

    /// The subtree below `id` (itself included)
    pub fn tag_descendants(&self, id: TagId) -> Result<Vec<TagId>> {
        closure::descendants(self, id)
    }

    /// Tags whose closure rows are inconsistent; empty on a healthy store.
    pub fn check_tag_closure(&self) -> Result<Vec<TagId>> {
        closure::verify(self)
    }
}
