//! Tag hierarchy closure maintenance.
//!
//! `TagClosure` holds one `(tagId, ancestorId)` row for every ancestor of
//! every tag, the tag itself and the synthetic root included, so that
//! `closure(t) = {t} ∪ closure(parent(t))` with `closure(ROOT_TAG) = {ROOT_TAG}`.
//!
//! Only the tag statements of the store call into this module, always from
//! inside a transaction or savepoint.

use std::collections::{BTreeSet, HashMap};

use rusqlite::params_from_iter;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::data::{TagId, ROOT_TAG};
use crate::store::{placeholders, Session};

/// Every ancestor of `tag`, itself and the root included.
pub fn ancestors(s: &Session<'_>, tag: TagId) -> Result<Vec<TagId>> {
    if tag == ROOT_TAG {
        return Ok(vec![ROOT_TAG]);
    }
    let mut stmt = s
        .conn()
        .prepare_cached("SELECT ancestorId FROM TagClosure WHERE tagId = ?1 ORDER BY ancestorId")?;
    let ids = stmt.query_map([tag], |row| row.get(0))?;
    Ok(ids.collect::<rusqlite::Result<_>>()?)
}

/// Every tag in the subtree below `tag`, itself included.
pub fn descendants(s: &Session<'_>, tag: TagId) -> Result<Vec<TagId>> {
    let mut stmt = s
        .conn()
        .prepare_cached("SELECT tagId FROM TagClosure WHERE ancestorId = ?1 ORDER BY tagId")?;
    let ids = stmt.query_map([tag], |row| row.get(0))?;
    Ok(ids.collect::<rusqlite::Result<_>>()?)
}

/// closure(tag) = {tag} ∪ closure(parent) for a freshly inserted tag.
pub(crate) fn link(s: &Session<'_>, tag: TagId, parent: TagId) -> Result<()> {
    s.conn().execute(
        "INSERT INTO TagClosure (tagId, ancestorId)
            SELECT ?1, ?1
            UNION SELECT ?1, ?2
            UNION SELECT ?1, ancestorId FROM TagClosure WHERE tagId = ?2",
        [tag, parent],
    )?;
    Ok(())
}

/// Reject moving `tag` below `new_parent` if that would create a cycle.
pub(crate) fn check_move(s: &Session<'_>, tag: TagId, new_parent: TagId) -> Result<()> {
    if tag == new_parent || ancestors(s, new_parent)?.contains(&tag) {
        return Err(Error::TagCycle { tag, parent: new_parent });
    }
    Ok(())
}

/// Re-point the subtree of `tag` from its current ancestor chain to the
/// chain of `new_parent`. Edges inside the subtree are kept untouched.
pub(crate) fn relink(s: &Session<'_>, tag: TagId, new_parent: TagId) -> Result<()> {
    let subtree = descendants(s, tag)?;
    let outer: Vec<TagId> = ancestors(s, tag)?.into_iter().filter(|&a| a != tag).collect();

    if !outer.is_empty() {
        let sql = format!(
            "DELETE FROM TagClosure WHERE tagId IN ({}) AND ancestorId IN ({})",
            placeholders(subtree.len()),
            placeholders(outer.len()),
        );
        s.conn().execute(&sql, params_from_iter(subtree.iter().chain(outer.iter())))?;
    }

    let chain = ancestors(s, new_parent)?;
    let mut insert = s
        .conn()
        .prepare_cached("INSERT OR IGNORE INTO TagClosure (tagId, ancestorId) VALUES (?1, ?2)")?;
    for &descendant in &subtree {
        for &ancestor in &chain {
            insert.execute([descendant, ancestor])?;
        }
    }

    debug!(tag, new_parent, subtree = subtree.len(), "tag closure relinked");
    Ok(())
}

/// Drop every closure row of the given tags.
pub(crate) fn unlink(s: &Session<'_>, tags: &[TagId]) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }
    let sql = format!("DELETE FROM TagClosure WHERE tagId IN ({})", placeholders(tags.len()));
    s.conn().execute(&sql, params_from_iter(tags))?;
    Ok(())
}

/// Tags whose stored closure differs from the one implied by the parent
/// links (plus ids of closure rows without a tag). Empty when consistent.
pub fn verify(s: &Session<'_>) -> Result<Vec<TagId>> {
    let parents: HashMap<TagId, TagId> = {
        let mut stmt = s.conn().prepare("SELECT id, parentId FROM Tags")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, TagId>(0)?, row.get::<_, TagId>(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut stored: HashMap<TagId, BTreeSet<TagId>> = HashMap::new();
    {
        let mut stmt = s.conn().prepare("SELECT tagId, ancestorId FROM TagClosure")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            stored.entry(row.get::<_, TagId>(0)?).or_default().insert(row.get::<_, TagId>(1)?);
        }
    }

    let mut broken = BTreeSet::new();
    for &tag in parents.keys() {
        let mut expected = BTreeSet::from([tag]);
        let mut current = tag;
        // Bounded by the tag count so a corrupt parent loop terminates.
        for _ in 0..=parents.len() {
            match parents.get(&current) {
                Some(&parent) => {
                    expected.insert(parent);
                    current = parent;
                }
                None => break,
            }
        }
        if current != ROOT_TAG || stored.get(&tag) != Some(&expected) {
            broken.insert(tag);
        }
    }
    broken.extend(stored.keys().filter(|t| !parents.contains_key(*t)));

    Ok(broken.into_iter().collect())
}
