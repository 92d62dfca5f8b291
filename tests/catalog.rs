//! End-to-end behavior of the catalog: store, tag closure, cache and scanner
//! working together.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use parking_lot::Mutex;
use raw_catalog::scan::NoMetadata;
use raw_catalog::{
    AlbumId, Catalog, CatalogConfig, Change, DeletionCandidate, Error, ItemCache, Store, TagIcon, TagId, ROOT_TAG,
};
use rstest::rstest;

fn store_with_album() -> (Arc<Store>, AlbumId) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let album = store
        .with_transaction(|s| {
            let root = s.add_root("Photos", Path::new("/photos"))?;
            s.add_album(root, "/2007", NaiveDate::from_ymd_opt(2007, 7, 1).unwrap(), "", "")
        })
        .unwrap();
    (store, album)
}

/// Small deterministic generator so the random walk is reproducible
struct Lcg(u64);

impl Lcg {
    fn below(&mut self, n: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) % n as u64) as usize
    }
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(42)]
fn test_closure_survives_random_edits(#[case] seed: u64) {
    let (store, _) = store_with_album();
    let mut rng = Lcg(seed);
    let mut tags: Vec<TagId> = Vec::new();

    for step in 0..200 {
        let pick = |rng: &mut Lcg, tags: &[TagId]| {
            if tags.is_empty() || rng.below(4) == 0 {
                ROOT_TAG
            } else {
                tags[rng.below(tags.len())]
            }
        };
        match rng.below(5) {
            0 | 1 => {
                let parent = pick(&mut rng, &tags);
                let id = store.session(|s| s.add_tag(parent, &format!("t{step}"), TagIcon::None)).unwrap();
                tags.push(id);
            }
            2 | 3 if !tags.is_empty() => {
                let tag = tags[rng.below(tags.len())];
                let parent = pick(&mut rng, &tags);
                match store.session(|s| s.move_tag(tag, parent)) {
                    Ok(()) | Err(Error::TagCycle { .. }) => {}
                    Err(err) => panic!("unexpected move failure: {err}"),
                }
            }
            4 if !tags.is_empty() => {
                let tag = tags[rng.below(tags.len())];
                let removed = store.session(|s| s.delete_tag(tag)).unwrap();
                tags.retain(|t| !removed.contains(t));
            }
            _ => {}
        }
        assert!(store.session(|s| s.check_tag_closure()).unwrap().is_empty(), "step {step}");
    }
}

#[test]
fn test_cycle_is_rejected_without_change() {
    let (store, _) = store_with_album();
    let (a, b, c) = store
        .session(|s| {
            let a = s.add_tag(ROOT_TAG, "A", TagIcon::None)?;
            let b = s.add_tag(a, "B", TagIcon::None)?;
            let c = s.add_tag(b, "C", TagIcon::None)?;
            Ok((a, b, c))
        })
        .unwrap();

    let err = store.session(|s| s.move_tag(a, c)).unwrap_err();
    assert!(matches!(err, Error::TagCycle { tag, parent } if tag == a && parent == c));
    assert!(store.session(|s| s.move_tag(b, b)).unwrap_err().is_consistency());

    let tag = store.session(|s| s.tag(a)).unwrap().unwrap();
    assert_eq!(tag.parent_id, ROOT_TAG);
    assert_eq!(store.session(|s| s.tag_ancestors(c)).unwrap(), vec![ROOT_TAG, a, b, c]);
}

#[test]
fn test_deleting_album_cascades() {
    let (store, album) = store_with_album();
    let cache = ItemCache::new(store.clone());
    let tag = store.session(|s| s.add_tag(ROOT_TAG, "Keep", TagIcon::None)).unwrap();

    let ids = store
        .with_transaction(|s| {
            let mut ids = Vec::new();
            for i in 0..10 {
                let id = s.add_item(album, &format!("IMG_{i:04}.JPG"), None, "")?;
                s.add_item_tag(id, tag)?;
                s.set_item_property(id, "Lens", "35mm")?;
                ids.push(id);
            }
            s.set_album_icon(album, Some(ids[0]))?;
            s.set_tag_icon(tag, TagIcon::Item(ids[1]))?;
            Ok(ids)
        })
        .unwrap();
    let handles: Vec<_> = ids.iter().map(|&id| cache.get(id)).collect();
    assert!(handles.iter().all(|h| h.is_valid()));

    let removed = store.with_transaction(|s| s.delete_album(album)).unwrap();
    assert_eq!(removed.len(), 10);

    let leftovers = store
        .execute(
            "SELECT (SELECT COUNT(*) FROM Items) + (SELECT COUNT(*) FROM ItemTags)
                  + (SELECT COUNT(*) FROM ItemProperties)",
            &[],
        )
        .unwrap();
    assert_eq!(leftovers[0][0], rusqlite::types::Value::Integer(0));
    assert_eq!(store.session(|s| s.tag(tag)).unwrap().unwrap().icon, TagIcon::None);
    assert!(handles.iter().all(|h| !h.is_valid()));
}

#[test]
fn test_cache_hands_out_one_object_per_item() {
    let (store, album) = store_with_album();
    let cache = ItemCache::new(store.clone());
    let id = store.session(|s| s.add_item(album, "a.jpg", None, "")).unwrap();

    let handles: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8).map(|_| scope.spawn(|| cache.get(id))).collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    assert!(handles.windows(2).all(|pair| pair[0].ptr_eq(&pair[1])));

    let by_path = cache.get_by_path(handles[0].location().unwrap().root_id, "/2007", "a.jpg").unwrap().unwrap();
    assert!(by_path.ptr_eq(&handles[0]));
    assert_eq!(cache.len(), 1);

    drop(handles);
    drop(by_path);
    assert!(cache.is_empty());
}

#[test]
fn test_failed_transaction_is_invisible() {
    let (store, album) = store_with_album();
    let seen = Arc::new(Mutex::new(Vec::<Change>::new()));
    let log = seen.clone();
    store.subscribe(Arc::new(move |change: &Change| log.lock().push(change.clone())));

    let err = store
        .with_transaction(|s| {
            for i in 0..5 {
                s.add_item(album, &format!("{i}.jpg"), None, "")?;
            }
            s.add_item_tag(1, 9999)
        })
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTag(9999)));
    assert!(store.session(|s| s.items_in_album(album)).unwrap().is_empty());
    assert!(seen.lock().is_empty());

    store
        .with_transaction(|s| {
            for i in 0..5 {
                s.add_item(album, &format!("{i}.jpg"), None, "")?;
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(seen.lock().iter().filter(|c| matches!(c, Change::ItemAdded(_))).count(), 5);
}

#[test]
fn test_readers_see_all_or_nothing() {
    let (store, album) = store_with_album();

    thread::scope(|scope| {
        let reader = scope.spawn(|| {
            for _ in 0..200 {
                let n = store.session(|s| s.items_in_album(album)).unwrap().len();
                assert!(n == 0 || n == 20, "saw {n} items");
            }
        });
        store
            .with_transaction(|s| {
                for i in 0..20 {
                    s.add_item(album, &format!("{i:02}.jpg"), None, "")?;
                }
                Ok(())
            })
            .unwrap();
        reader.join().unwrap();
    });
}

#[test]
fn test_scan_rescan_and_removal() {
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    fs::create_dir_all(photos.join("2007").join("Summer")).unwrap();
    fs::write(photos.join("2007").join("a.jpg"), b"a").unwrap();
    fs::write(photos.join("2007").join("Summer").join("b.jpg"), b"b").unwrap();

    let config = CatalogConfig { database_path: dir.path().join("catalog.db"), ..Default::default() }
        .with_root("Photos", &photos);
    let catalog = Catalog::open(config).unwrap();
    let asked = Arc::new(Mutex::new(0usize));
    let count = asked.clone();
    let scanner = catalog.scanner(
        move |candidates: &[DeletionCandidate]| {
            *count.lock() += candidates.len();
            true
        },
        NoMetadata,
    );

    let first = scanner.scan().unwrap();
    assert_eq!((first.albums_created, first.items_added), (3, 2));
    assert!(scanner.scan().unwrap().is_unchanged());

    fs::remove_dir_all(photos.join("2007").join("Summer")).unwrap();
    let report = scanner.scan().unwrap();
    assert_eq!((report.albums_deleted, report.items_deleted), (1, 1));
    assert_eq!(*asked.lock(), 1);
    assert!(scanner.scan().unwrap().is_unchanged());
}
