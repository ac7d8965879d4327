//! Transient display handles for the active and original versions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::history::{History, ImageVersion, VersionId};

const OBJECT_URL_PREFIX: &str = "blob:retoucher/";

/// A live reference a renderer can draw from. Released exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct DisplayHandle {
    url: String,
    version: VersionId,
}

impl DisplayHandle {
    pub fn new(url: impl Into<String>, version: VersionId) -> Self {
        Self {
            url: url.into(),
            version,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub const fn version(&self) -> VersionId {
        self.version
    }
}

pub trait HandleRegistry {
    fn mint(&mut self, version: &ImageVersion) -> DisplayHandle;
    fn release(&mut self, handle: DisplayHandle);
}

impl<R: HandleRegistry + ?Sized> HandleRegistry for &mut R {
    fn mint(&mut self, version: &ImageVersion) -> DisplayHandle {
        (**self).mint(version)
    }

    fn release(&mut self, handle: DisplayHandle) {
        (**self).release(handle)
    }
}

/// In-process object URLs. Keeps each payload alive while its URL is live.
#[derive(Debug, Default)]
pub struct ObjectUrlRegistry {
    next: u64,
    live: HashMap<String, Arc<[u8]>>,
    minted: u64,
    released: u64,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.live.get(url).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub const fn minted(&self) -> u64 {
        self.minted
    }

    pub const fn released(&self) -> u64 {
        self.released
    }
}

impl HandleRegistry for ObjectUrlRegistry {
    fn mint(&mut self, version: &ImageVersion) -> DisplayHandle {
        self.next += 1;
        self.minted += 1;
        let url = format!("{OBJECT_URL_PREFIX}{}", self.next);
        self.live.insert(url.clone(), version.shared_payload());
        DisplayHandle::new(url, version.id())
    }

    fn release(&mut self, handle: DisplayHandle) {
        if self.live.remove(handle.url()).is_some() {
            self.released += 1;
        } else {
            tracing::warn!(url = handle.url(), "released an unknown display handle");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSlot {
    Active,
    Original,
}

/// Owns one handle per slot and keeps them pointed at the history's
/// current and original versions.
#[derive(Debug)]
pub struct DisplayHandles<R: HandleRegistry> {
    registry: R,
    active: Option<DisplayHandle>,
    original: Option<DisplayHandle>,
}

impl<R: HandleRegistry> DisplayHandles<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            active: None,
            original: None,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn get(&self, slot: HandleSlot) -> Option<&DisplayHandle> {
        match slot {
            HandleSlot::Active => self.active.as_ref(),
            HandleSlot::Original => self.original.as_ref(),
        }
    }

    pub fn active(&self) -> Option<&DisplayHandle> {
        self.get(HandleSlot::Active)
    }

    pub fn original(&self) -> Option<&DisplayHandle> {
        self.get(HandleSlot::Original)
    }

    /// Re-points both slots at `history`. Returns true if anything changed.
    pub fn sync(&mut self, history: &History) -> bool {
        let active = self.sync_slot(HandleSlot::Active, history.current());
        let original = self.sync_slot(HandleSlot::Original, history.original());
        active || original
    }

    fn sync_slot(&mut self, slot: HandleSlot, target: Option<&ImageVersion>) -> bool {
        let current = self.get(slot).map(DisplayHandle::version);
        if current == target.map(ImageVersion::id) {
            return false;
        }

        // Mint before releasing so the slot is never empty while a frame
        // may still be drawing from it.
        let replacement = target.map(|version| self.registry.mint(version));
        let previous = match slot {
            HandleSlot::Active => std::mem::replace(&mut self.active, replacement),
            HandleSlot::Original => std::mem::replace(&mut self.original, replacement),
        };
        if let Some(previous) = previous {
            self.registry.release(previous);
        }
        tracing::debug!(
            ?slot,
            from = ?current,
            to = ?self.get(slot).map(DisplayHandle::version),
            "display handle swapped"
        );
        true
    }

    /// Releases every handle. Safe to call more than once.
    pub fn teardown(&mut self) {
        for handle in [self.active.take(), self.original.take()].into_iter().flatten() {
            self.registry.release(handle);
        }
    }
}

impl<R: HandleRegistry> Drop for DisplayHandles<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::version;
    use crate::history::{VersionIds, VersionOrigin};

    /// Records the order of mint/release calls.
    #[derive(Default)]
    struct Journal {
        inner: ObjectUrlRegistry,
        events: Vec<String>,
    }

    impl HandleRegistry for Journal {
        fn mint(&mut self, version: &ImageVersion) -> DisplayHandle {
            let handle = self.inner.mint(version);
            self.events.push(format!("mint {}", handle.url()));
            handle
        }

        fn release(&mut self, handle: DisplayHandle) {
            self.events.push(format!("release {}", handle.url()));
            self.inner.release(handle);
        }
    }

    fn history_with(count: usize, ids: &mut VersionIds) -> History {
        let mut history = History::new();
        history.reset(version(ids, VersionOrigin::Upload));
        for _ in 1..count {
            history.append(version(ids, VersionOrigin::Filter));
        }
        history
    }

    #[test]
    fn sync_mints_one_handle_per_slot() {
        let mut ids = VersionIds::default();
        let history = history_with(1, &mut ids);
        let mut registry = ObjectUrlRegistry::new();
        let mut handles = DisplayHandles::new(&mut registry);

        assert!(handles.sync(&history));
        assert!(!handles.sync(&history));

        let active = handles.active().expect("active handle");
        let original = handles.original().expect("original handle");
        assert_eq!(active.version(), original.version());
        assert_ne!(active.url(), original.url());
        assert!(handles.registry().resolve(active.url()).is_some());
        assert_eq!(handles.registry().live_count(), 2);
    }

    #[test]
    fn undo_swaps_only_the_active_slot_and_mints_before_release() {
        let mut ids = VersionIds::default();
        let mut history = history_with(2, &mut ids);
        let mut handles = DisplayHandles::new(Journal::default());
        handles.sync(&history);
        let original_url = handles.original().expect("original").url().to_string();

        history.undo().expect("undo");
        assert!(handles.sync(&history));

        assert_eq!(handles.original().expect("original").url(), original_url);
        let events = &handles.registry().events;
        assert_eq!(
            events[events.len() - 2..],
            ["mint blob:retoucher/3", "release blob:retoucher/1"]
        );
        assert_eq!(handles.registry().inner.live_count(), 2);
    }

    #[test]
    fn every_mint_is_matched_by_one_release_after_drop() {
        let mut ids = VersionIds::default();
        let mut registry = ObjectUrlRegistry::new();
        {
            let mut history = history_with(3, &mut ids);
            let mut handles = DisplayHandles::new(&mut registry);
            handles.sync(&history);
            history.undo().expect("undo");
            handles.sync(&history);
            history.append(version(&mut ids, VersionOrigin::Crop));
            handles.sync(&history);
            history.reset(version(&mut ids, VersionOrigin::Upload));
            handles.sync(&history);
        }

        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.minted(), registry.released());
        assert!(registry.minted() >= 5);
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut ids = VersionIds::default();
        let history = history_with(1, &mut ids);
        let mut registry = ObjectUrlRegistry::new();
        let mut handles = DisplayHandles::new(&mut registry);
        handles.sync(&history);
        handles.teardown();
        handles.teardown();
        assert!(handles.active().is_none());
        drop(handles);
        assert_eq!(registry.released(), 2);
    }

    #[test]
    fn empty_history_releases_existing_handles() {
        let mut ids = VersionIds::default();
        let history = history_with(1, &mut ids);
        let mut handles = DisplayHandles::new(ObjectUrlRegistry::new());
        handles.sync(&history);
        assert!(handles.sync(&History::new()));
        assert_eq!(handles.registry().live_count(), 0);
    }
}
