//! Change notifications.
//!
//! Sessions queue a [`Change`] for every successful mutation; the store hands
//! them to the registered listeners once the enclosing transaction has
//! committed. Nothing is delivered for a rolled back transaction.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::store::data::{AlbumId, ItemId, TagId};

/// Which part of an item changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemField {
    Caption,
    DateTime,
    Rating,
    Tags,
    Properties,
    /// Name or owning album changed (move/rename)
    Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    ItemAdded(ItemId),
    ItemChanged(ItemId, ItemField),
    ItemRemoved(ItemId),
    TagAdded(TagId),
    TagRemoved(TagId),
    TagMoved(TagId),
    TagRenamed(TagId),
    AlbumAdded(AlbumId),
    AlbumRemoved(AlbumId),
    AlbumRenamed(AlbumId),
    AlbumIconChanged(AlbumId),
}

/// Receives committed changes. Called on the thread that committed them.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, change: &Change);
}

impl<F> ChangeListener for F
where
    F: Fn(&Change) + Send + Sync,
{
    fn on_change(&self, change: &Change) {
        self(change)
    }
}

#[derive(Default)]
pub(crate) struct Notifier {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl Notifier {
    pub(crate) fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn emit(&self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        // Snapshot so a listener may subscribe others without deadlocking.
        let listeners = self.listeners.read().clone();
        for change in changes {
            trace!(?change, "emitting change");
            for listener in &listeners {
                listener.on_change(change);
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
