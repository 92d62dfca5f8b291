/// Catalog wiring
///
/// Opens the store named by a [`CatalogConfig`], registers its collection
/// roots and hands out the shared cache and scanners built on top of it.
/// Components take the store/cache handles explicitly; nothing is global.

use std::sync::Arc;

use tracing::info;

use crate::cache::ItemCache;
use crate::config::CatalogConfig;
use crate::error::Result;
use crate::scan::{ConfirmDeletion, MetadataExtractor, Scanner};
use crate::store::Store;

pub struct Catalog {
    config: CatalogConfig,
    store: Arc<Store>,
    cache: ItemCache,
}

impl Catalog {
    /// Open (or create) the catalog database and register configured roots.
    pub fn open(config: CatalogConfig) -> Result<Self> {
        let store = Store::open(&config.database_path)?;
        Self::with_store(config, store)
    }

    /// Same as [`Catalog::open`] over a private in-memory database.
    pub fn open_in_memory(config: CatalogConfig) -> Result<Self> {
        Self::with_store(config, Store::open_in_memory()?)
    }

    fn with_store(config: CatalogConfig, store: Store) -> Result<Self> {
        store.with_transaction(|s| {
            for root in &config.roots {
                s.add_root(&root.label, &root.path)?;
            }
            Ok(())
        })?;
        info!(roots = config.roots.len(), "catalog ready");

        let store = Arc::new(store);
        let cache = ItemCache::new(store.clone());
        Ok(Self { config, store, cache })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }

    /// A scanner over every registered root, using the configured scan options.
    pub fn scanner(
        &self,
        confirm: impl ConfirmDeletion + 'static,
        extractor: impl MetadataExtractor + 'static,
    ) -> Scanner {
        Scanner::new(self.cache.clone(), self.config.scan.clone(), confirm, extractor)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("store", &self.store)
            .field("cache", &self.cache)
            .finish()
    }
}
