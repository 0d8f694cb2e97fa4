//! # Object Handles
//!
//! Handles are lightweight identifiers for replicated objects:
//! - A 32-bit id, non-zero when valid
//! - The id of the replication system that owns the object (0 = unbound)
//!
//! The low bit of the id separates the two id generators that share the
//! namespace: odd ids are static objects (loaded with the level), even
//! ids are dynamic objects (spawned at runtime).

use std::fmt;
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};

/// Identifier of a replicated object and its owning replication system.
///
/// `==` and `Hash` compare the id only. That is cheap and correct while a
/// single replication system is active. When several systems coexist
/// (multi-world sessions), use [`ObjectHandle::full_compare`] or key
/// containers with [`FullHandleKey`].
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ObjectHandle {
    id: u32,
    system_id: u32,
}

impl ObjectHandle {
    /// The invalid handle.
    pub const INVALID: Self = Self { id: 0, system_id: 0 };

    /// Creates a handle from an id and a replication system id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32, system_id: u32) -> Self {
        Self { id, system_id }
    }

    /// Returns true if the handle refers to an object (`id != 0`).
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.id != 0
    }

    /// Returns true for a valid handle from the static id generator.
    #[inline]
    #[must_use]
    pub const fn is_static(self) -> bool {
        self.id & 1 == 1
    }

    /// Returns true for a valid handle from the dynamic id generator.
    #[inline]
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        self.is_valid() && self.id & 1 == 0
    }

    /// Returns the object id.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// Returns the owning replication system id, or `None` if unbound.
    #[inline]
    #[must_use]
    pub const fn system_id(self) -> Option<u32> {
        if self.system_id == 0 {
            None
        } else {
            Some(self.system_id)
        }
    }

    /// Compares id and replication system id.
    ///
    /// Use this wherever handles from different replication systems may
    /// meet; default `==` would treat them as the same object.
    #[inline]
    #[must_use]
    pub const fn full_compare(a: Self, b: Self) -> bool {
        a.id == b.id && a.system_id == b.system_id
    }
}

impl Default for ObjectHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl PartialEq for ObjectHandle {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ObjectHandle {}

impl Hash for ObjectHandle {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle(id={}, system={})", self.id, self.system_id)
    }
}

/// Container key that compares handles by id *and* replication system.
#[derive(Clone, Copy, Debug)]
pub struct FullHandleKey(pub ObjectHandle);

impl FullHandleKey {
    /// Returns the wrapped handle.
    #[inline]
    #[must_use]
    pub const fn handle(self) -> ObjectHandle {
        self.0
    }
}

impl PartialEq for FullHandleKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        ObjectHandle::full_compare(self.0, other.0)
    }
}

impl Eq for FullHandleKey {}

impl Hash for FullHandleKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
        self.0.system_id.hash(state);
    }
}

impl From<ObjectHandle> for FullHandleKey {
    fn from(handle: ObjectHandle) -> Self {
        Self(handle)
    }
}

/// Hands out handle ids for one replication system.
///
/// Static and dynamic objects draw from independent counters; the low
/// bit keeps the two ranges disjoint.
#[derive(Debug)]
pub struct HandleIdAllocator {
    system_id: u32,
    next_static: Option<u32>,
    next_dynamic: Option<u32>,
}

impl HandleIdAllocator {
    /// Creates an allocator binding every handle to `system_id`.
    #[must_use]
    pub const fn new(system_id: u32) -> Self {
        Self {
            system_id,
            next_static: Some(1),
            next_dynamic: Some(2),
        }
    }

    /// Returns the replication system id stamped on allocated handles.
    #[inline]
    #[must_use]
    pub const fn system_id(&self) -> u32 {
        self.system_id
    }

    /// Allocates the next static (odd) id.
    ///
    /// Returns [`ObjectHandle::INVALID`] once the id space is exhausted.
    pub fn allocate_static(&mut self) -> ObjectHandle {
        Self::allocate(&mut self.next_static, self.system_id, "static")
    }

    /// Allocates the next dynamic (even, non-zero) id.
    ///
    /// Returns [`ObjectHandle::INVALID`] once the id space is exhausted.
    pub fn allocate_dynamic(&mut self) -> ObjectHandle {
        Self::allocate(&mut self.next_dynamic, self.system_id, "dynamic")
    }

    fn allocate(next: &mut Option<u32>, system_id: u32, kind: &str) -> ObjectHandle {
        let Some(id) = *next else {
            tracing::warn!(system_id, kind, "handle id space exhausted");
            return ObjectHandle::INVALID;
        };
        *next = id.checked_add(2);
        ObjectHandle::new(id, system_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_validity() {
        assert!(!ObjectHandle::INVALID.is_valid());
        assert!(!ObjectHandle::default().is_valid());
        assert!(ObjectHandle::new(3, 0).is_valid());
    }

    #[test]
    fn test_static_dynamic_exclusive() {
        for id in 1..100u32 {
            let handle = ObjectHandle::new(id, 1);
            assert_ne!(handle.is_static(), handle.is_dynamic(), "id {id}");
        }
        assert!(!ObjectHandle::INVALID.is_static());
        assert!(!ObjectHandle::INVALID.is_dynamic());
    }

    #[test]
    fn test_system_id_unbound() {
        assert_eq!(ObjectHandle::new(4, 0).system_id(), None);
        assert_eq!(ObjectHandle::new(4, 2).system_id(), Some(2));
    }

    #[test]
    fn test_default_equality_ignores_system() {
        let a = ObjectHandle::new(42, 1);
        let b = ObjectHandle::new(42, 2);
        assert_eq!(a, b);
        assert!(!ObjectHandle::full_compare(a, b));
        assert!(ObjectHandle::full_compare(a, ObjectHandle::new(42, 1)));
    }

    #[test]
    fn test_full_key_disambiguates_in_sets() {
        let a = ObjectHandle::new(42, 1);
        let b = ObjectHandle::new(42, 2);

        let by_id: HashSet<ObjectHandle> = [a, b].into_iter().collect();
        assert_eq!(by_id.len(), 1);

        let by_full: HashSet<FullHandleKey> = [a, b].into_iter().map(FullHandleKey).collect();
        assert_eq!(by_full.len(), 2);
    }

    #[test]
    fn test_allocator_generators_disjoint() {
        let mut ids = HandleIdAllocator::new(7);
        let s0 = ids.allocate_static();
        let d0 = ids.allocate_dynamic();
        let s1 = ids.allocate_static();
        let d1 = ids.allocate_dynamic();

        assert!(s0.is_static() && s1.is_static());
        assert!(d0.is_dynamic() && d1.is_dynamic());
        assert_eq!((s0.id(), s1.id()), (1, 3));
        assert_eq!((d0.id(), d1.id()), (2, 4));
        assert_eq!(d1.system_id(), Some(7));
    }

    #[test]
    fn test_allocator_exhaustion() {
        let mut ids = HandleIdAllocator {
            system_id: 1,
            next_static: Some(u32::MAX),
            next_dynamic: None,
        };
        assert_eq!(ids.allocate_static().id(), u32::MAX);
        assert!(!ids.allocate_static().is_valid());
        assert!(!ids.allocate_dynamic().is_valid());
    }

    #[test]
    fn test_pod_layout() {
        let handle = ObjectHandle::new(0x0102_0304, 9);
        let bytes: &[u8] = bytemuck::bytes_of(&handle);
        assert_eq!(bytes.len(), 8);
        let back: ObjectHandle = bytemuck::pod_read_unaligned(bytes);
        assert!(ObjectHandle::full_compare(handle, back));
    }
}
