//! # Dirty Object Registry
//!
//! Push-model change detection: producers mark objects dirty at mutation
//! time, and any number of independent pollers (one per connection lane,
//! debug tools, ...) each see the *whole* dirty set until they reset.
//!
//! ## Frame Protocol
//!
//! ```text
//!   mutation code          poller A                poller B
//!        │                     │                       │
//!   mark_dirty(H) ──►  get_dirty_objects(A)    get_dirty_objects(B)
//!        │             ...capture...           ...capture...
//!        │             reset_dirty_objects(A)  reset_dirty_objects(B)
//!        │                                             │
//!        │                       last reset ──► shared set cleared
//!        ▼
//!   end_frame() ── heals pollers that forgot to reset
//! ```
//!
//! The set is shared, so it is only reclaimed when no poller holds an
//! unreset read. With no poller registered nothing is recorded at all.

mod shared;

pub use shared::SharedDirtyRegistry;

use std::collections::HashSet;

use lattice_core::{FullHandleKey, NetBitArray, ObjectHandle};

use crate::config::{ReplicationConfig, DEFAULT_POLLER_SLOTS};
use crate::diag::usage_error;

/// Handle to a poller slot in a [`DirtyObjectRegistry`].
///
/// Slots are reused after [`DirtyObjectRegistry::destroy_poller`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PollerHandle(u32);

impl PollerHandle {
    /// The invalid poller handle.
    pub const INVALID: Self = Self(u32::MAX);

    /// Returns true unless this is [`PollerHandle::INVALID`].
    ///
    /// A valid-looking handle can still be stale; the registry checks that.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl Default for PollerHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Read-only view of the shared dirty set.
///
/// Every poller receives the same instance. Membership uses full handle
/// identity, so equal ids from different replication systems stay apart.
#[derive(Debug, Default)]
pub struct DirtyObjectSet {
    handles: HashSet<FullHandleKey>,
}

impl DirtyObjectSet {
    /// Returns true if `handle` (id and system) is dirty.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.handles.contains(&FullHandleKey(handle))
    }

    /// Returns the number of dirty handles.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if nothing is dirty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Iterates over dirty handles in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.handles.iter().map(|key| key.handle())
    }

    fn insert(&mut self, handle: ObjectHandle) {
        self.handles.insert(FullHandleKey(handle));
    }

    fn clear(&mut self) {
        self.handles.clear();
    }
}

/// Live state, present between `init` and `deinit`.
#[derive(Debug)]
struct RegistryState {
    dirty: DirtyObjectSet,
    /// One bit per slot: slot is owned by a poller.
    allocated: NetBitArray,
    /// One bit per slot: poller has read and not yet reset.
    has_read: NetBitArray,
    poller_count: usize,
}

impl RegistryState {
    fn new(slots: usize) -> Self {
        Self {
            dirty: DirtyObjectSet::default(),
            allocated: NetBitArray::new(slots),
            has_read: NetBitArray::new(slots),
            poller_count: 0,
        }
    }

    fn owns(&self, poller: PollerHandle) -> bool {
        poller.is_valid() && self.allocated.get(poller.0)
    }
}

/// Process-wide store of objects changed since each poller last looked.
///
/// Constructed once by the host and handed to every producer and
/// consumer. A freshly constructed registry is *uninitialized*: marks are
/// dropped and pollers cannot be created until [`init`](Self::init).
///
/// Not internally synchronized; see [`SharedDirtyRegistry`] for hosts
/// that drive it from several threads.
#[derive(Debug)]
pub struct DirtyObjectRegistry {
    state: Option<RegistryState>,
    /// Returned to readers when there is nothing to read.
    empty: DirtyObjectSet,
    initial_poller_slots: usize,
}

impl Default for DirtyObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DirtyObjectRegistry {
    /// Creates an uninitialized registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: None,
            empty: DirtyObjectSet::default(),
            initial_poller_slots: DEFAULT_POLLER_SLOTS,
        }
    }

    /// Creates an uninitialized registry sized from `config`.
    #[must_use]
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            initial_poller_slots: config.initial_poller_slots.max(1),
            ..Self::new()
        }
    }

    /// Brings the registry to life. Calling it twice is harmless.
    pub fn init(&mut self) {
        if self.state.is_some() {
            tracing::debug!("dirty object registry already initialized");
            return;
        }
        self.state = Some(RegistryState::new(self.initial_poller_slots));
        tracing::debug!(slots = self.initial_poller_slots, "dirty object registry initialized");
    }

    /// Drops all state. Pollers still registered become stale.
    pub fn deinit(&mut self) {
        if let Some(state) = self.state.take() {
            if state.poller_count > 0 {
                tracing::warn!(
                    pollers = state.poller_count,
                    "dirty object registry deinitialized with active pollers"
                );
            }
        }
    }

    /// Returns true between [`init`](Self::init) and [`deinit`](Self::deinit).
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Returns the number of active pollers.
    #[must_use]
    pub fn poller_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.poller_count)
    }

    /// Returns the number of handles currently dirty.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.dirty.len())
    }

    /// Records that `handle` changed.
    ///
    /// No-op while uninitialized or while no poller exists, so marks made
    /// with nobody listening never surface later.
    #[inline]
    pub fn mark_dirty(&mut self, handle: ObjectHandle) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.poller_count == 0 {
            return;
        }
        if !handle.is_valid() {
            tracing::trace!("ignoring mark_dirty on invalid handle");
            return;
        }
        state.dirty.insert(handle);
    }

    /// Records a batch of changed handles.
    pub fn mark_dirty_many<I>(&mut self, handles: I)
    where
        I: IntoIterator<Item = ObjectHandle>,
    {
        if self.poller_count() == 0 {
            return;
        }
        for handle in handles {
            self.mark_dirty(handle);
        }
    }

    /// Registers a new poller in the lowest free slot.
    ///
    /// Returns [`PollerHandle::INVALID`] if the registry is uninitialized.
    pub fn create_poller(&mut self) -> PollerHandle {
        let Some(state) = self.state.as_mut() else {
            tracing::debug!("create_poller on uninitialized dirty object registry");
            return PollerHandle::INVALID;
        };

        let slots = state.allocated.len();
        let free = (0..slots)
            .find(|&slot| !state.allocated.get(slot_u32(slot)))
            .unwrap_or(slots);
        if free >= slots {
            let grown = (slots * 2).max(free + 1);
            state.allocated.grow(grown);
            state.has_read.grow(grown);
        }

        let slot = slot_u32(free);
        state.allocated.set(slot);
        state.has_read.clear(slot);
        state.poller_count += 1;
        tracing::debug!(poller = slot, pollers = state.poller_count, "dirty poller created");

        PollerHandle(slot)
    }

    /// Releases a poller slot.
    ///
    /// Destroying a poller that read without resetting is a usage error:
    /// it is logged and the slot is released anyway, and its read counts as
    /// a reset. When the last poller goes away the dirty set is emptied.
    pub fn destroy_poller(&mut self, poller: PollerHandle) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if !state.owns(poller) {
            usage_error!(poller = poller.0, "destroy_poller on unknown or stale poller");
            return;
        }

        if state.has_read.get(poller.0) {
            usage_error!(
                poller = poller.0,
                "dirty poller destroyed without resetting its dirty objects"
            );
            state.has_read.clear(poller.0);
            if state.has_read.none_set() {
                state.dirty.clear();
            }
        }

        state.allocated.clear(poller.0);
        state.poller_count -= 1;
        tracing::debug!(poller = poller.0, pollers = state.poller_count, "dirty poller destroyed");

        if state.poller_count == 0 {
            state.dirty.clear();
        }
    }

    /// Returns the shared dirty set and flags `poller` as having read it.
    ///
    /// Returns an empty set if the registry is uninitialized or the poller
    /// is unknown. Call [`reset_dirty_objects`](Self::reset_dirty_objects)
    /// once the poller has captured what it needs.
    pub fn get_dirty_objects(&mut self, poller: PollerHandle) -> &DirtyObjectSet {
        let Some(state) = self.state.as_mut() else {
            return &self.empty;
        };
        if !state.owns(poller) {
            usage_error!(poller = poller.0, "get_dirty_objects on unknown or stale poller");
            return &self.empty;
        }

        state.has_read.set(poller.0);
        &state.dirty
    }

    /// Returns true if `poller` has read and not yet reset.
    #[must_use]
    pub fn has_read(&self, poller: PollerHandle) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.owns(poller) && state.has_read.get(poller.0))
    }

    /// Marks `poller` as done with the current dirty set.
    ///
    /// Once no poller holds an unreset read, the shared set is cleared.
    pub fn reset_dirty_objects(&mut self, poller: PollerHandle) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if !state.owns(poller) {
            usage_error!(poller = poller.0, "reset_dirty_objects on unknown or stale poller");
            return;
        }

        state.has_read.clear(poller.0);
        if state.has_read.none_set() {
            state.dirty.clear();
        }
    }

    /// Frame boundary hook. Call once per tick from the owning scheduler.
    ///
    /// Pollers that read this frame but never reset are logged and reset
    /// here, which also reclaims the shared set.
    pub fn end_frame(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let mut healed = 0usize;
        for slot in state.has_read.iter_ones() {
            tracing::warn!(poller = slot, "dirty poller did not reset before end of frame");
            healed += 1;
        }

        if healed > 0 {
            state.has_read.clear_all();
            state.dirty.clear();
        } else if state.poller_count == 0 && !state.dirty.is_empty() {
            state.dirty.clear();
        }
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn slot_u32(slot: usize) -> u32 {
    slot as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_registry() -> DirtyObjectRegistry {
        let mut registry = DirtyObjectRegistry::new();
        registry.init();
        registry
    }

    #[test]
    fn test_uninitialized_is_silent() {
        let mut registry = DirtyObjectRegistry::new();
        let poller = registry.create_poller();
        assert!(!poller.is_valid());

        registry.mark_dirty(ObjectHandle::new(2, 1));
        assert!(registry.get_dirty_objects(poller).is_empty());
        registry.reset_dirty_objects(poller);
        registry.destroy_poller(poller);
        registry.end_frame();
        assert_eq!(registry.dirty_count(), 0);
    }

    #[test]
    fn test_mark_without_pollers_is_dropped() {
        let mut registry = live_registry();
        registry.mark_dirty(ObjectHandle::new(2, 1));
        assert_eq!(registry.dirty_count(), 0);

        let poller = registry.create_poller();
        assert!(!registry.get_dirty_objects(poller).contains(ObjectHandle::new(2, 1)));
        registry.reset_dirty_objects(poller);
        registry.destroy_poller(poller);
    }

    #[test]
    fn test_poller_sees_marks_until_reset() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        let handle = ObjectHandle::new(4, 1);

        registry.mark_dirty(handle);
        assert!(registry.get_dirty_objects(poller).contains(handle));
        assert!(registry.has_read(poller));
        // Still there on a second read within the frame.
        assert!(registry.get_dirty_objects(poller).contains(handle));

        registry.reset_dirty_objects(poller);
        assert!(!registry.has_read(poller));
        assert!(registry.get_dirty_objects(poller).is_empty());
        registry.reset_dirty_objects(poller);
        registry.destroy_poller(poller);
    }

    #[test]
    fn test_invalid_handle_not_recorded() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        registry.mark_dirty(ObjectHandle::INVALID);
        assert_eq!(registry.dirty_count(), 0);
        registry.destroy_poller(poller);
    }

    #[test]
    fn test_slots_reused_lowest_first() {
        let mut registry = live_registry();
        let a = registry.create_poller();
        let b = registry.create_poller();
        let c = registry.create_poller();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));

        registry.destroy_poller(b);
        let d = registry.create_poller();
        assert_eq!(d.index(), 1);
        assert_eq!(registry.poller_count(), 3);
    }

    #[test]
    fn test_slot_array_grows() {
        let config = ReplicationConfig {
            initial_poller_slots: 1,
            ..ReplicationConfig::default()
        };
        let mut registry = DirtyObjectRegistry::from_config(&config);
        registry.init();

        let pollers: Vec<_> = (0..9).map(|_| registry.create_poller()).collect();
        assert!(pollers.iter().all(|p| p.is_valid()));
        assert_eq!(pollers[8].index(), 8);
        assert_eq!(registry.poller_count(), 9);
    }

    #[test]
    fn test_last_destroy_clears_set() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        registry.mark_dirty(ObjectHandle::new(6, 1));
        assert_eq!(registry.dirty_count(), 1);

        registry.destroy_poller(poller);
        assert_eq!(registry.dirty_count(), 0);
    }

    #[test]
    #[cfg(not(feature = "strict-asserts"))]
    fn test_destroy_without_reset_still_frees_slot() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        let _ = registry.get_dirty_objects(poller);

        registry.destroy_poller(poller);
        assert_eq!(registry.poller_count(), 0);
        assert!(!registry.has_read(poller));
    }

    #[test]
    #[cfg(not(feature = "strict-asserts"))]
    fn test_destroy_unreset_poller_releases_shared_set() {
        let mut registry = live_registry();
        let a = registry.create_poller();
        let b = registry.create_poller();
        let h = ObjectHandle::new(6, 1);

        registry.mark_dirty(h);
        assert!(registry.get_dirty_objects(a).contains(h));
        assert!(registry.get_dirty_objects(b).contains(h));
        registry.reset_dirty_objects(a);
        assert_eq!(registry.dirty_count(), 1);

        registry.destroy_poller(b);
        assert_eq!(registry.dirty_count(), 0);

        registry.end_frame();
        assert!(!registry.get_dirty_objects(a).contains(h));
        registry.reset_dirty_objects(a);
    }

    #[test]
    #[cfg(not(feature = "strict-asserts"))]
    fn test_stale_poller_is_ignored() {
        let mut registry = live_registry();
        let live = registry.create_poller();
        let stale = registry.create_poller();
        registry.destroy_poller(stale);

        registry.mark_dirty(ObjectHandle::new(8, 1));
        assert!(registry.get_dirty_objects(stale).is_empty());
        registry.destroy_poller(stale);
        assert_eq!(registry.poller_count(), 1);
        assert_eq!(registry.dirty_count(), 1);
        registry.destroy_poller(live);
    }

    #[test]
    fn test_end_frame_heals_forgotten_reset() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        registry.mark_dirty(ObjectHandle::new(10, 1));
        let _ = registry.get_dirty_objects(poller);

        registry.end_frame();
        assert!(!registry.has_read(poller));
        assert_eq!(registry.dirty_count(), 0);
    }

    #[test]
    fn test_end_frame_keeps_unread_marks() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        registry.mark_dirty(ObjectHandle::new(12, 1));

        registry.end_frame();
        assert!(registry.get_dirty_objects(poller).contains(ObjectHandle::new(12, 1)));
        registry.reset_dirty_objects(poller);
    }

    #[test]
    #[cfg(not(feature = "strict-asserts"))]
    fn test_deinit_then_init_starts_clean() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        registry.mark_dirty(ObjectHandle::new(14, 1));

        registry.deinit();
        assert!(!registry.is_initialized());
        assert_eq!(registry.poller_count(), 0);

        registry.init();
        assert_eq!(registry.dirty_count(), 0);
        assert!(registry.get_dirty_objects(poller).is_empty());
    }

    #[test]
    fn test_same_id_different_systems_both_tracked() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        let a = ObjectHandle::new(20, 1);
        let b = ObjectHandle::new(20, 2);

        registry.mark_dirty(a);
        registry.mark_dirty(b);
        let dirty = registry.get_dirty_objects(poller);
        assert_eq!(dirty.len(), 2);
        assert!(dirty.contains(a) && dirty.contains(b));
        assert!(!dirty.contains(ObjectHandle::new(20, 3)));
        registry.reset_dirty_objects(poller);
    }

    #[test]
    #[cfg(all(feature = "strict-asserts", debug_assertions))]
    #[should_panic(expected = "replication usage error")]
    fn test_strict_asserts_catch_forgotten_reset() {
        let mut registry = live_registry();
        let poller = registry.create_poller();
        let _ = registry.get_dirty_objects(poller);
        registry.destroy_poller(poller);
    }
}
