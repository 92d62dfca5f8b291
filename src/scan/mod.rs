//! # Filesystem reconciliation scan
//!
//! Aligns the album and item rows of every collection root with what is on
//! disk, in four phases:
//! 1. stale albums: albums whose folder is gone are deleted after confirmation
//! 2. walk: every folder gets an album, every new file an item; items whose
//!    file is gone become deletion candidates
//! 3. backfill: items without a capture time get one (embedded metadata,
//!    else file modification time)
//! 4. deletion: the item candidates are deleted after confirmation
//!
//! Declining a confirmation aborts the scan with [`Error::UserAbort`] and
//! nothing is deleted. A scan over an unchanged tree writes nothing.

mod confirm;
mod metadata;

pub use confirm::{ConfirmDeletion, DeletionCandidate};
pub use metadata::{file_time, ExifExtractor, Metadata, MetadataExtractor, NoMetadata};

use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::cache::ItemCache;
use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::store::data::{album_dir, url_for_dir, AlbumRoot, ItemId, RootId};
use crate::store::Store;

/// Shared flag to stop a running scan from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag so the scanner can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// What a scan did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub albums_created: usize,
    pub items_added: usize,
    pub dates_backfilled: usize,
    pub albums_deleted: usize,
    pub items_deleted: usize,
    /// Every candidate presented for confirmation
    pub candidates: Vec<DeletionCandidate>,
    /// Roots skipped because their directory is unavailable
    pub unavailable_roots: Vec<RootId>,
    pub cancelled: bool,
}

impl ScanReport {
    /// True if the scan changed no row and found nothing to delete.
    pub fn is_unchanged(&self) -> bool {
        self.albums_created == 0
            && self.items_added == 0
            && self.dates_backfilled == 0
            && self.albums_deleted == 0
            && self.items_deleted == 0
            && self.candidates.is_empty()
    }
}

/// A file found in a folder that has no item yet
struct NewItem {
    name: String,
    date_time: Option<chrono::NaiveDateTime>,
    caption: String,
}

pub struct Scanner {
    store: Arc<Store>,
    cache: ItemCache,
    config: ScanConfig,
    confirm: Box<dyn ConfirmDeletion>,
    extractor: Box<dyn MetadataExtractor>,
    cancel: CancelToken,
}

impl Scanner {
    pub fn new(
        cache: ItemCache,
        config: ScanConfig,
        confirm: impl ConfirmDeletion + 'static,
        extractor: impl MetadataExtractor + 'static,
    ) -> Self {
        Self {
            store: cache.store().clone(),
            cache,
            config,
            confirm: Box::new(confirm),
            extractor: Box::new(extractor),
            cancel: CancelToken::default(),
        }
    }

    /// Token that stops this scanner between folders and between files
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run one full reconciliation.
    pub fn scan(&self) -> Result<ScanReport> {
        let started = Instant::now();
        let mut report = ScanReport::default();

        let mut available = Vec::new();
        for root in self.store.session(|s| s.roots())? {
            if root.path.is_dir() {
                available.push(root);
            } else {
                warn!(root = root.id, path = %root.path.display(), "collection root unavailable, skipped");
                report.unavailable_roots.push(root.id);
            }
        }

        if self.remove_stale_albums(&available, &mut report)?.is_break() {
            return Ok(cancelled(report));
        }

        let mut candidates = Vec::new();
        let phase = Instant::now();
        for root in &available {
            if self.walk_root(root, &mut candidates, &mut report)?.is_break() {
                return Ok(cancelled(report));
            }
        }
        info!(
            elapsed_ms = phase.elapsed().as_millis() as u64,
            albums = report.albums_created,
            items = report.items_added,
            "scan: tree walked"
        );

        if self.backfill_dates(&available, &mut candidates, &mut report)?.is_break() {
            return Ok(cancelled(report));
        }

        self.remove_missing_items(candidates, &mut report)?;

        info!(elapsed_ms = started.elapsed().as_millis() as u64, ?report, "scan finished");
        Ok(report)
    }

    fn checkpoint(&self) -> ControlFlow<()> {
        if self.cancel.is_cancelled() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// Phase 1: albums whose folder vanished, deleted with their items.
    fn remove_stale_albums(&self, roots: &[AlbumRoot], report: &mut ScanReport) -> Result<ControlFlow<()>> {
        let phase = Instant::now();
        let mut stale = Vec::new();
        self.store.session(|s| {
            for root in roots {
                for album in s.albums_in_root(root.id)? {
                    let path = album_dir(&root.path, &album.url);
                    if !path.is_dir() {
                        stale.push(DeletionCandidate::Album {
                            id: album.id,
                            root_id: root.id,
                            url: album.url,
                            path,
                        });
                    }
                }
            }
            Ok(())
        })?;

        if stale.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }
        if self.checkpoint().is_break() {
            return Ok(ControlFlow::Break(()));
        }

        report.candidates.extend(stale.iter().cloned());
        if !self.confirm.confirm_deletion(&stale) {
            info!(albums = stale.len(), "stale album removal declined");
            return Err(Error::UserAbort(stale.len()));
        }

        let removed_items = self.store.with_transaction(|s| {
            let mut removed = 0;
            for candidate in &stale {
                if let DeletionCandidate::Album { id, .. } = candidate {
                    removed += s.delete_album(*id)?.len();
                }
            }
            Ok(removed)
        })?;
        report.albums_deleted += stale.len();
        report.items_deleted += removed_items;

        info!(
            elapsed_ms = phase.elapsed().as_millis() as u64,
            albums = stale.len(),
            items = removed_items,
            "scan: stale albums removed"
        );
        Ok(ControlFlow::Continue(()))
    }

    /// Phase 2 for one collection root.
    fn walk_root(
        &self,
        root: &AlbumRoot,
        candidates: &mut Vec<DeletionCandidate>,
        report: &mut ScanReport,
    ) -> Result<ControlFlow<()>> {
        let skip_hidden = self.config.skip_hidden;
        let walker = WalkDir::new(&root.path)
            .follow_links(self.config.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| entry.depth() == 0 || keep_entry(entry, skip_hidden));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(root = root.id, error = %err, "unreadable entry skipped");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if self.checkpoint().is_break() {
                return Ok(ControlFlow::Break(()));
            }
            let Some(url) = url_for_dir(&root.path, entry.path()) else {
                warn!(root = root.id, path = %entry.path().display(), "folder has no album url, skipped");
                continue;
            };
            if self.scan_dir(root, &url, entry.path(), candidates, report)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Reconcile one folder with its album. Writes happen in a single
    /// transaction, and only if something changed.
    fn scan_dir(
        &self,
        root: &AlbumRoot,
        url: &str,
        dir: &Path,
        candidates: &mut Vec<DeletionCandidate>,
        report: &mut ScanReport,
    ) -> Result<ControlFlow<()>> {
        let (present, accepted) = self.list_files(dir);
        let (album, known) = self.store.session(|s| match s.album_by_url(root.id, url)? {
            Some(album) => Ok((Some(album.id), s.item_names_in_album(album.id)?)),
            None => Ok((None, Vec::new())),
        })?;
        let known: BTreeSet<String> = known.into_iter().collect();

        let mut new_items = Vec::new();
        for name in accepted.difference(&known) {
            if self.checkpoint().is_break() {
                return Ok(ControlFlow::Break(()));
            }
            new_items.push(self.describe(&dir.join(name), name));
        }

        if album.is_none() || !new_items.is_empty() {
            let added = new_items.len();
            self.store.with_transaction(|s| {
                let album = match album {
                    Some(id) => id,
                    None => s.add_album(root.id, url, folder_date(dir), "", "")?,
                };
                for item in &new_items {
                    s.add_item(album, &item.name, item.date_time, &item.caption)?;
                }
                Ok(())
            })?;
            if album.is_none() {
                report.albums_created += 1;
            }
            report.items_added += added;
            debug!(root = root.id, url, added, "folder reconciled");
        }

        if let Some(album) = album {
            // Filtered-out files that are already cataloged still count as present.
            let missing: Vec<&String> = known.difference(&present).collect();
            if !missing.is_empty() {
                self.store.session(|s| {
                    for name in missing {
                        if let Some(item) = s.item_by_name(album, name)? {
                            candidates.push(DeletionCandidate::Item {
                                id: item.id,
                                album_id: album,
                                path: dir.join(name),
                            });
                        }
                    }
                    Ok(())
                })?;
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Names of the files directly inside `dir`: all of them, and the ones
    /// new items may be created for.
    fn list_files(&self, dir: &Path) -> (BTreeSet<String>, BTreeSet<String>) {
        let present: BTreeSet<String> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.config.follow_links)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "unreadable entry skipped");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        let accepted = present.iter().filter(|name| self.config.accepts(name)).cloned().collect();
        (present, accepted)
    }

    fn describe(&self, path: &Path, name: &str) -> NewItem {
        let metadata = self.extractor.extract(path).unwrap_or_default();
        NewItem {
            name: name.to_string(),
            date_time: metadata.date_time.or_else(|| file_time(path)),
            caption: metadata.caption.unwrap_or_default(),
        }
    }

    /// Phase 3: items with no capture time. Items whose file is gone join
    /// the deletion candidates instead.
    fn backfill_dates(
        &self,
        roots: &[AlbumRoot],
        candidates: &mut Vec<DeletionCandidate>,
        report: &mut ScanReport,
    ) -> Result<ControlFlow<()>> {
        let phase = Instant::now();
        let undated = self.store.session(|s| s.items_without_date())?;
        let mut known: HashSet<ItemId> = candidates.iter().filter_map(item_id).collect();

        for (id, path) in undated {
            if !roots.iter().any(|root| path.starts_with(&root.path)) {
                continue;
            }
            if self.checkpoint().is_break() {
                return Ok(ControlFlow::Break(()));
            }

            if !path.is_file() {
                if known.insert(id) {
                    let info = self.cache.get(id);
                    if let Some(album_id) = info.album_id() {
                        candidates.push(DeletionCandidate::Item { id, album_id, path });
                    }
                }
                continue;
            }

            let date_time = self
                .extractor
                .extract(&path)
                .and_then(|m| m.date_time)
                .or_else(|| file_time(&path));
            if let Some(date_time) = date_time {
                self.cache.get(id).set_date_time(Some(date_time))?;
                report.dates_backfilled += 1;
            }
        }

        info!(
            elapsed_ms = phase.elapsed().as_millis() as u64,
            backfilled = report.dates_backfilled,
            "scan: dates backfilled"
        );
        Ok(ControlFlow::Continue(()))
    }

    /// Phase 4: confirm and delete every missing item at once.
    fn remove_missing_items(&self, candidates: Vec<DeletionCandidate>, report: &mut ScanReport) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }

        report.candidates.extend(candidates.iter().cloned());
        if !self.confirm.confirm_deletion(&candidates) {
            info!(items = candidates.len(), "missing item removal declined");
            return Err(Error::UserAbort(candidates.len()));
        }

        let removed = self.store.with_transaction(|s| {
            let mut removed = 0;
            for id in candidates.iter().filter_map(item_id) {
                if s.delete_item(id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })?;
        report.items_deleted += removed;
        info!(items = removed, "scan: missing items removed");
        Ok(())
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn cancelled(mut report: ScanReport) -> ScanReport {
    info!(?report, "scan cancelled");
    report.cancelled = true;
    report
}

fn item_id(candidate: &DeletionCandidate) -> Option<ItemId> {
    match candidate {
        DeletionCandidate::Item { id, .. } => Some(*id),
        DeletionCandidate::Album { .. } => None,
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

/// Whether the walk descends into / looks at `entry`. Folders whose name is
/// not UTF-8 are pruned with their subtree since no album url can name them.
fn keep_entry(entry: &DirEntry, skip_hidden: bool) -> bool {
    if skip_hidden && is_hidden(entry) {
        return false;
    }
    if entry.file_type().is_dir() && entry.file_name().to_str().is_none() {
        warn!(path = %entry.path().display(), "folder name is not valid UTF-8, skipped");
        return false;
    }
    true
}

/// Date of a new album: the folder's modification day, else today
fn folder_date(dir: &Path) -> NaiveDate {
    file_time(dir).map(|t| t.date()).unwrap_or_else(|| Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;

    type Seen = Arc<Mutex<Vec<Vec<DeletionCandidate>>>>;

    /// Answers every confirmation with `answer` and remembers what it was asked
    fn recorder(answer: bool) -> (Seen, impl ConfirmDeletion) {
        let seen: Seen = Arc::default();
        let log = seen.clone();
        let confirm = move |candidates: &[DeletionCandidate]| {
            log.lock().push(candidates.to_vec());
            answer
        };
        (seen, confirm)
    }

    struct FixedDate(NaiveDateTime);

    impl MetadataExtractor for FixedDate {
        fn extract(&self, _path: &Path) -> Option<Metadata> {
            Some(Metadata { date_time: Some(self.0), caption: Some("embedded".into()) })
        }
    }

    fn jpg_only() -> ScanConfig {
        ScanConfig { extensions: vec!["jpg".into()], ..Default::default() }
    }

    /// photos/
    ///   notes.txt
    ///   .hidden/x.jpg
    ///   2007/a.jpg, b.jpg
    fn tree() -> (TempDir, ItemCache, RootId) {
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        fs::create_dir_all(photos.join("2007")).unwrap();
        fs::create_dir_all(photos.join(".hidden")).unwrap();
        fs::write(photos.join("notes.txt"), b"n").unwrap();
        fs::write(photos.join(".hidden").join("x.jpg"), b"x").unwrap();
        fs::write(photos.join("2007").join("a.jpg"), b"a").unwrap();
        fs::write(photos.join("2007").join("b.jpg"), b"b").unwrap();

        let store = Arc::new(Store::open_in_memory().unwrap());
        let root = store.session(|s| s.add_root("Photos", &photos)).unwrap();
        (dir, ItemCache::new(store), root)
    }

    fn scanner(cache: &ItemCache, confirm: impl ConfirmDeletion + 'static) -> Scanner {
        Scanner::new(cache.clone(), jpg_only(), confirm, NoMetadata)
    }

    #[test]
    fn test_first_scan_catalogs_tree() {
        let (_dir, cache, root) = tree();
        let (seen, confirm) = recorder(true);

        let report = scanner(&cache, confirm).scan().unwrap();
        assert_eq!(report.albums_created, 2);
        assert_eq!(report.items_added, 2);
        assert!(report.candidates.is_empty());
        assert!(seen.lock().is_empty());

        let store = cache.store();
        let album = store.session(|s| s.album_by_url(root, "/2007")).unwrap().unwrap();
        let names = store.session(|s| s.item_names_in_album(album.id)).unwrap();
        assert_eq!(names, vec!["a.jpg".to_string(), "b.jpg".to_string()]);
        assert!(store.session(|s| s.album_by_url(root, "/.hidden")).unwrap().is_none());

        // No embedded metadata: the file's modification time is used
        let info = cache.get_by_path(root, "/2007", "a.jpg").unwrap().unwrap();
        assert!(info.date_time().is_some());
    }

    #[test]
    fn test_rescan_of_unchanged_tree_is_noop() {
        let (_dir, cache, _) = tree();
        let (seen, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);

        scanner.scan().unwrap();
        let again = scanner.scan().unwrap();
        assert!(again.is_unchanged(), "{again:?}");
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_extractor_wins_over_file_time() {
        let (_dir, cache, root) = tree();
        let taken = NaiveDate::from_ymd_opt(2007, 7, 14).unwrap().and_hms_opt(9, 30, 0).unwrap();
        let (_, confirm) = recorder(true);

        Scanner::new(cache.clone(), jpg_only(), confirm, FixedDate(taken)).scan().unwrap();

        let info = cache.get_by_path(root, "/2007", "b.jpg").unwrap().unwrap();
        assert_eq!(info.date_time(), Some(taken));
        assert_eq!(info.caption(), "embedded");
    }

    #[test]
    fn test_missing_file_deleted_after_confirmation() {
        let (dir, cache, root) = tree();
        let (seen, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);
        scanner.scan().unwrap();

        let gone = dir.path().join("photos").join("2007").join("b.jpg");
        fs::remove_file(&gone).unwrap();
        let report = scanner.scan().unwrap();

        assert_eq!(report.items_deleted, 1);
        let asked = seen.lock();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0].len(), 1);
        assert_eq!(asked[0][0].path(), &gone);
        assert!(cache.get_by_path(root, "/2007", "b.jpg").unwrap().is_none());
    }

    #[test]
    fn test_declined_album_removal_aborts_without_deleting() {
        let (dir, cache, root) = tree();
        let (_, accept) = recorder(true);
        scanner(&cache, accept).scan().unwrap();

        fs::remove_dir_all(dir.path().join("photos").join("2007")).unwrap();
        let (seen, decline) = recorder(false);
        let err = scanner(&cache, decline).scan().unwrap_err();

        assert!(matches!(err, Error::UserAbort(1)));
        assert_eq!(seen.lock().len(), 1);
        let album = cache.store().session(|s| s.album_by_url(root, "/2007")).unwrap().unwrap();
        assert_eq!(cache.store().session(|s| s.item_names_in_album(album.id)).unwrap().len(), 2);
    }

    #[test]
    fn test_accepted_album_removal_deletes_items() {
        let (dir, cache, root) = tree();
        let (_, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);
        scanner.scan().unwrap();
        let info = cache.get_by_path(root, "/2007", "a.jpg").unwrap().unwrap();

        fs::remove_dir_all(dir.path().join("photos").join("2007")).unwrap();
        let report = scanner.scan().unwrap();

        assert_eq!(report.albums_deleted, 1);
        assert_eq!(report.items_deleted, 2);
        assert!(cache.store().session(|s| s.album_by_url(root, "/2007")).unwrap().is_none());
        assert!(!info.is_valid());
    }

    #[test]
    fn test_missing_undated_item_is_offered_once() {
        let (_dir, cache, root) = tree();
        let (seen, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);
        scanner.scan().unwrap();

        let ghost = cache
            .store()
            .session(|s| {
                let album = s.album_by_url(root, "/2007")?.map(|a| a.id).unwrap_or_default();
                s.add_item(album, "ghost.jpg", None, "")
            })
            .unwrap();

        let report = scanner.scan().unwrap();
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(item_id(&report.candidates[0]), Some(ghost));
        assert_eq!(report.items_deleted, 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_undated_item_is_backfilled() {
        let (_dir, cache, root) = tree();
        let (_, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);
        scanner.scan().unwrap();

        let info = cache.get_by_path(root, "/2007", "a.jpg").unwrap().unwrap();
        info.set_date_time(None).unwrap();

        let report = scanner.scan().unwrap();
        assert_eq!(report.dates_backfilled, 1);
        assert!(info.date_time().is_some());
    }

    #[test]
    fn test_cancelled_scan_stops_early() {
        let (_dir, cache, _) = tree();
        let (seen, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);

        let token = scanner.cancel_token();
        token.cancel();
        let report = scanner.scan().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.albums_created, 0);
        assert!(seen.lock().is_empty());

        token.reset();
        let report = scanner.scan().unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.albums_created, 2);
    }

    #[test]
    fn test_unavailable_root_is_skipped() {
        let (dir, cache, _) = tree();
        let offline = dir.path().join("unplugged");
        let (root, album) = cache
            .store()
            .session(|s| {
                let root = s.add_root("External", &offline)?;
                let album = s.add_album(root, "/trip", NaiveDate::from_ymd_opt(2008, 1, 1).unwrap_or_default(), "", "")?;
                s.add_item(album, "c.jpg", None, "")?;
                Ok((root, album))
            })
            .unwrap();

        let (seen, confirm) = recorder(true);
        let report = scanner(&cache, confirm).scan().unwrap();

        assert_eq!(report.unavailable_roots, vec![root]);
        assert!(report.candidates.is_empty());
        assert!(seen.lock().is_empty());
        assert_eq!(cache.store().session(|s| s.item_names_in_album(album)).unwrap(), vec!["c.jpg".to_string()]);
    }

    #[test]
    fn test_new_file_in_known_album() {
        let (dir, cache, root) = tree();
        let (_, confirm) = recorder(true);
        scanner(&cache, confirm).scan().unwrap();

        let folder = dir.path().join("photos").join("2007");
        fs::write(folder.join("IMG_0001.JPG"), b"1").unwrap();
        let taken = NaiveDate::from_ymd_opt(2007, 8, 2).unwrap().and_hms_opt(18, 4, 0).unwrap();
        let (seen, confirm) = recorder(true);
        let report = Scanner::new(cache.clone(), jpg_only(), confirm, FixedDate(taken)).scan().unwrap();

        assert_eq!((report.albums_created, report.items_added), (0, 1));
        assert!(report.candidates.is_empty());
        assert!(seen.lock().is_empty());
        let info = cache.get_by_path(root, "/2007", "IMG_0001.JPG").unwrap().unwrap();
        assert_eq!(info.date_time(), Some(taken));

        // Nothing embedded: the modification time is used
        let second = folder.join("IMG_0002.JPG");
        fs::write(&second, b"2").unwrap();
        let (_, confirm) = recorder(true);
        let report = scanner(&cache, confirm).scan().unwrap();
        assert_eq!((report.albums_created, report.items_added), (0, 1));
        let info = cache.get_by_path(root, "/2007", "IMG_0002.JPG").unwrap().unwrap();
        assert_eq!(info.date_time(), file_time(&second));
        assert!(info.date_time().is_some());
    }

    #[test]
    fn test_filtered_out_file_still_on_disk_is_kept() {
        let (dir, cache, root) = tree();
        let (seen, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);
        scanner.scan().unwrap();

        // Imported by hand although the scan would not pick them up
        let folder = dir.path().join("photos").join("2007");
        fs::write(folder.join("scan.png"), b"p").unwrap();
        fs::write(folder.join(".sidecar.jpg"), b"s").unwrap();
        let album = cache.store().session(|s| s.album_by_url(root, "/2007")).unwrap().unwrap().id;
        cache
            .store()
            .with_transaction(|s| {
                s.add_item(album, "scan.png", None, "")?;
                s.add_item(album, ".sidecar.jpg", None, "")
            })
            .unwrap();

        let report = scanner.scan().unwrap();
        assert!(report.candidates.is_empty(), "{:?}", report.candidates);
        assert_eq!(report.items_deleted, 0);
        assert!(seen.lock().is_empty());
        assert_eq!(cache.store().session(|s| s.item_names_in_album(album)).unwrap().len(), 4);

        fs::remove_file(folder.join("scan.png")).unwrap();
        let report = scanner.scan().unwrap();
        assert_eq!(report.items_deleted, 1);
        assert!(cache.get_by_path(root, "/2007", "scan.png").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_backslash_folder_is_stable_across_scans() {
        let (dir, cache, root) = tree();
        let odd = dir.path().join("photos").join("a\\b");
        fs::create_dir_all(&odd).unwrap();
        fs::write(odd.join("x.jpg"), b"x").unwrap();
        let (seen, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);

        assert_eq!(scanner.scan().unwrap().albums_created, 3);
        let again = scanner.scan().unwrap();
        assert!(again.is_unchanged(), "{again:?}");
        assert!(seen.lock().is_empty());
        assert!(cache.get_by_path(root, "/a\\b", "x.jpg").unwrap().is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_folder_is_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (dir, cache, _) = tree();
        let odd = dir.path().join("photos").join(OsStr::from_bytes(b"caf\xe9"));
        fs::create_dir_all(odd.join("inner")).unwrap();
        fs::write(odd.join("x.jpg"), b"x").unwrap();
        fs::write(odd.join("inner").join("y.jpg"), b"y").unwrap();
        let (seen, confirm) = recorder(true);
        let scanner = scanner(&cache, confirm);

        let first = scanner.scan().unwrap();
        assert_eq!((first.albums_created, first.items_added), (2, 2));
        assert!(scanner.scan().unwrap().is_unchanged());
        assert!(seen.lock().is_empty());
    }
}
