//! Batch loaders and bulk mutations over many cached items.
//!
//! Loaders fetch one field for many items in a single session, then write
//! each result into its canonical object under that object's own lock.
//! Bulk mutations run in one transaction: every item is changed or none is.

use std::collections::BTreeMap;

use parking_lot::MutexGuard;
use tracing::{debug, info};

use super::info::{with_tag, without_tag};
use super::{Fields, ItemCache, ItemInfo};
use crate::error::Result;
use crate::store::data::{ItemId, TagId};
use crate::store::items::clamp_rating;
use crate::store::Session;

/// Distinct handles ordered by id, so writer locks are always taken in the
/// same order.
fn distinct(items: &[ItemInfo]) -> Vec<&ItemInfo> {
    let by_id: BTreeMap<ItemId, &ItemInfo> = items.iter().map(|info| (info.id(), info)).collect();
    by_id.into_values().collect()
}

fn lock_writers<'a>(items: &[&'a ItemInfo]) -> Vec<MutexGuard<'a, ()>> {
    items.iter().map(|info| info.entry().writer.lock()).collect()
}

impl ItemCache {
    /// Populate the tag ids of every handle that has none cached.
    pub fn load_tag_ids(&self, items: &[ItemInfo]) -> Result<()> {
        let missing: Vec<&ItemInfo> = distinct(items)
            .into_iter()
            .filter(|info| {
                let fields = info.entry().fields.read();
                !fields.invalid && fields.tag_ids.is_none()
            })
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let ids: Vec<ItemId> = missing.iter().map(|info| info.id()).collect();
        let mut loaded = self.store().session(|s| s.items_tag_ids(&ids))?;

        for info in missing {
            let mut fields = info.entry().fields.write();
            if fields.invalid || fields.tag_ids.is_some() {
                continue;
            }
            fields.tag_ids = loaded.remove(&info.id());
        }
        debug!(count = ids.len(), "tag ids batch loaded");
        Ok(())
    }

    /// Populate the capture datetime of every handle that has none cached.
    /// Handles whose row is gone become invalid.
    pub fn load_date_times(&self, items: &[ItemInfo]) -> Result<()> {
        let missing: Vec<&ItemInfo> = distinct(items)
            .into_iter()
            .filter(|info| {
                let fields = info.entry().fields.read();
                !fields.invalid && fields.date_time.is_none()
            })
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let ids: Vec<ItemId> = missing.iter().map(|info| info.id()).collect();
        let loaded = self.store().session(|s| s.items_date_times(&ids))?;

        for info in missing {
            let mut fields = info.entry().fields.write();
            if fields.invalid || fields.date_time.is_some() {
                continue;
            }
            match loaded.get(&info.id()) {
                Some(date_time) => fields.date_time = Some(*date_time),
                None => {
                    let id = info.id();
                    self.shared.clear(id, &mut fields);
                    fields.invalid = true;
                }
            }
        }
        debug!(count = ids.len(), "datetimes batch loaded");
        Ok(())
    }

    /// Attach `tag` to every item in one transaction. `progress(done, total)`
    /// is called after each item.
    pub fn assign_tag(
        &self,
        items: &[ItemInfo],
        tag: TagId,
        progress: impl FnMut(usize, usize),
    ) -> Result<()> {
        self.bulk(items, progress, |s, id| s.add_item_tag(id, tag), |fields| with_tag(fields, tag))?;
        info!(items = items.len(), tag, "tag assigned");
        Ok(())
    }

    /// Detach `tag` from every item in one transaction.
    pub fn remove_tag(
        &self,
        items: &[ItemInfo],
        tag: TagId,
        progress: impl FnMut(usize, usize),
    ) -> Result<()> {
        self.bulk(items, progress, |s, id| s.remove_item_tag(id, tag), |fields| without_tag(fields, tag))?;
        info!(items = items.len(), tag, "tag removed");
        Ok(())
    }

    /// Rate every item (clamped to 0..=5) in one transaction.
    pub fn assign_rating(
        &self,
        items: &[ItemInfo],
        rating: i64,
        progress: impl FnMut(usize, usize),
    ) -> Result<()> {
        let rating = clamp_rating(rating);
        self.bulk(
            items,
            progress,
            |s, id| s.set_item_rating(id, rating.into()).map(drop),
            |fields| {
                fields.rating = Some(Some(rating));
                fields.properties = None;
            },
        )?;
        info!(items = items.len(), rating, "rating assigned");
        Ok(())
    }

    /// Shared shape of the bulk mutations: lock every object's writer, write
    /// all of them in one transaction, then apply `update` to the cached
    /// fields. Items whose row is gone are skipped and their objects turn
    /// invalid.
    fn bulk(
        &self,
        items: &[ItemInfo],
        mut progress: impl FnMut(usize, usize),
        mut write: impl FnMut(&Session<'_>, ItemId) -> Result<()>,
        mut update: impl FnMut(&mut Fields),
    ) -> Result<()> {
        let targets: Vec<&ItemInfo> = distinct(items)
            .into_iter()
            .filter(|info| !info.entry().fields.read().invalid)
            .collect();

        let _writers = lock_writers(&targets);
        let total = targets.len();
        let present = self.store().with_transaction(|s| {
            let mut present = Vec::with_capacity(total);
            for (done, info) in targets.iter().enumerate() {
                let exists = s.item_exists(info.id())?;
                if exists {
                    write(s, info.id())?;
                }
                present.push(exists);
                progress(done + 1, total);
            }
            Ok(present)
        })?;

        for (info, exists) in targets.iter().zip(present) {
            let mut fields = info.entry().fields.write();
            if !exists {
                self.shared.clear(info.id(), &mut fields);
                fields.invalid = true;
            } else if !fields.invalid {
                update(&mut *fields);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fixture;
    use super::*;
    use crate::store::data::{TagIcon, ROOT_TAG};

    fn handles(cache: &ItemCache, album: i64, n: usize) -> Vec<ItemInfo> {
        let ids = cache
            .store()
            .with_transaction(|s| {
                (0..n).map(|i| s.add_item(album, &format!("bulk_{i:02}.jpg"), None, "")).collect::<Result<Vec<_>>>()
            })
            .unwrap();
        ids.into_iter().map(|id| cache.get(id)).collect()
    }

    #[test]
    fn test_assign_tag_reports_progress_and_updates_cache() {
        let (cache, album, _) = fixture();
        let items = handles(&cache, album, 5);
        let tag = cache.store().session(|s| s.add_tag(ROOT_TAG, "Picked", TagIcon::None)).unwrap();

        let mut calls = Vec::new();
        cache.assign_tag(&items, tag, |done, total| calls.push((done, total))).unwrap();

        assert_eq!(calls, (1..=5).map(|d| (d, 5)).collect::<Vec<_>>());
        for info in &items {
            assert_eq!(info.tag_ids(), vec![tag]);
        }
        assert_eq!(cache.store().session(|s| s.items_with_tag(tag, false)).unwrap().len(), 5);

        cache.remove_tag(&items, tag, |_, _| {}).unwrap();
        assert!(items.iter().all(|info| info.tag_ids().is_empty()));
    }

    #[test]
    fn test_failed_bulk_changes_nothing() {
        let (cache, album, _) = fixture();
        let items = handles(&cache, album, 3);

        // Tag 404 does not exist: the first write fails and the batch rolls back
        let err = cache.assign_tag(&items, 404, |_, _| {}).unwrap_err();
        assert!(err.is_consistency());
        assert!(items.iter().all(|info| info.tag_ids().is_empty()));
    }

    #[test]
    fn test_assign_rating_clamps() {
        let (cache, album, _) = fixture();
        let items = handles(&cache, album, 3);
        cache.assign_rating(&items, 11, |_, _| {}).unwrap();
        for info in &items {
            assert_eq!(info.rating(), Some(5));
            assert_eq!(cache.store().session(|s| s.item_rating(info.id())).unwrap(), Some(5));
        }
    }

    #[test]
    fn test_batch_loaders() {
        let (cache, album, first) = fixture();
        let mut items = handles(&cache, album, 3);
        items.push(cache.get(first));
        items.push(cache.get(first));
        let gone = cache.get(12345);
        items.push(gone.clone());

        cache.load_tag_ids(&items).unwrap();
        cache.load_date_times(&items).unwrap();

        assert!(items[0].tag_ids().is_empty());
        assert_eq!(items[3].date_time(), None);
        assert!(!gone.is_valid());
    }

    #[test]
    fn test_bulk_skips_items_without_row() {
        let (cache, album, _) = fixture();
        let mut items = handles(&cache, album, 2);
        let ghost = cache.get(4343);
        items.push(ghost.clone());
        let tag = cache.store().session(|s| s.add_tag(ROOT_TAG, "Picked", TagIcon::None)).unwrap();

        let mut calls = 0;
        cache.assign_tag(&items, tag, |_, _| calls += 1).unwrap();
        cache.assign_rating(&items, 2, |_, _| {}).unwrap();

        assert_eq!(calls, 3);
        assert!(!ghost.is_valid());
        assert!(ghost.tag_ids().is_empty());
        assert_eq!(cache.store().session(|s| s.items_with_tag(tag, false)).unwrap().len(), 2);
        let orphans = cache
            .store()
            .execute("SELECT COUNT(*) FROM ItemTags WHERE itemId = 4343", &[])
            .unwrap();
        assert_eq!(orphans[0][0], rusqlite::types::Value::Integer(0));
    }
}
