//! Album kinds and saved search queries.
//!
//! A view of items is either a physical album, a tag (with everything
//! tagged below it) or a saved search. [`AlbumRef`] names one of them and
//! [`Session::items_in`] resolves it to item ids.

use chrono::NaiveDateTime;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::store::data::{AlbumId, ItemId, SearchId, TagId};
use crate::store::items::RATING_KEY;
use crate::store::{placeholders, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlbumRef {
    Physical(AlbumId),
    Tag(TagId),
    Search(SearchId),
}

/// Serialized form of a saved search. Every set criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Case-insensitive substring of the item name or caption
    pub text: Option<String>,
    /// Any of these tags, or a tag below one of them
    pub tags: Vec<TagId>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    pub min_rating: Option<u8>,
    pub album: Option<AlbumId>,
}

impl SearchQuery {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT I.id FROM Items AS I WHERE 1 = 1");
        let mut values = Vec::new();

        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", escape_like(text));
            sql.push_str(
                " AND (I.name LIKE ? ESCAPE '\\' OR IFNULL(I.caption, '') LIKE ? ESCAPE '\\')",
            );
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        if !self.tags.is_empty() {
            sql.push_str(&format!(
                " AND I.id IN (SELECT IT.itemId FROM ItemTags AS IT
                     JOIN TagClosure AS C ON C.tagId = IT.tagId
                   WHERE C.ancestorId IN ({}))",
                placeholders(self.tags.len())
            ));
            values.extend(self.tags.iter().map(|&t| Value::Integer(t)));
        }
        if let Some(from) = self.from {
            sql.push_str(" AND I.datetime >= ?");
            values.push(Value::Text(format_datetime(from)));
        }
        if let Some(to) = self.to {
            sql.push_str(" AND I.datetime <= ?");
            values.push(Value::Text(format_datetime(to)));
        }
        if let Some(rating) = self.min_rating {
            sql.push_str(
                " AND I.id IN (SELECT itemId FROM ItemProperties
                   WHERE key = ? AND CAST(value AS INTEGER) >= ?)",
            );
            values.push(Value::Text(RATING_KEY.to_string()));
            values.push(Value::Integer(rating.into()));
        }
        if let Some(album) = self.album {
            sql.push_str(" AND I.albumId = ?");
            values.push(Value::Integer(album));
        }

        sql.push_str(" ORDER BY I.id");
        (sql, values)
    }
}

/// Same text layout rusqlite uses when binding a `NaiveDateTime`
fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format("%F %T%.f").to_string()
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Session<'_> {
    /// Items matching `query`, ordered by id
    pub fn run_search(&self, query: &SearchQuery) -> Result<Vec<ItemId>> {
        let (sql, values) = query.to_sql();
        let mut stmt = self.conn().prepare(&sql)?;
        let ids = stmt.query_map(params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(ids.collect::<rusqlite::Result<_>>()?)
    }

    /// Save `query` under `name`.
    pub fn save_search(&self, name: &str, query: &SearchQuery) -> Result<SearchId> {
        self.add_search(name, &query.to_json()?)
    }

    /// Items shown by the given album, tag or saved search
    pub fn items_in(&self, album: AlbumRef) -> Result<Vec<ItemId>> {
        match album {
            AlbumRef::Physical(id) => self.items_in_album(id),
            AlbumRef::Tag(id) => self.items_with_tag(id, true),
            AlbumRef::Search(id) => {
                let Some(search) = self.search(id)? else {
                    return Ok(Vec::new());
                };
                let query = SearchQuery::from_json(&search.query).inspect_err(|err| {
                    warn!(id, name = %search.name, error = %err, "saved search is malformed");
                })?;
                self.run_search(&query)
            }
        }
    }
}
