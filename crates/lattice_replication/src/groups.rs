//! # Object Groups
//!
//! Named and anonymous sets of replicated objects, used by relevancy code
//! to decide which connections receive which objects.
//!
//! ## Layout
//!
//! ```text
//! groups[handle]          memberships[object]          filtered
//! ┌───┬──────────────┐    ┌────┬──────────────────┐    ┌──────────┐
//! │ 0 │ (reserved)   │    │  0 │ [g1, g3, -, -]   │    │ 1        │
//! │ 1 │ [0, 7, 9]    │◄──►│  7 │ [g1, -, -, -]    │    │ ...      │
//! │ 3 │ [0]          │    │  9 │ [g1, -, -, -]    │    │ bit N =  │
//! └───┴──────────────┘    └────┴──────────────────┘    │ N in any │
//!   forward member list     reverse index (max 4)      │ group    │
//!                                                      └──────────┘
//! ```
//!
//! Forward list, reverse index and the filtered bit array are updated
//! together on every add/remove/clear/destroy. The bit array is never
//! rebuilt from scratch.

use std::collections::HashMap;
use std::fmt;

use lattice_core::NetBitArray;

use crate::config::ReplicationConfig;
use crate::diag::usage_error;
use crate::error::{GroupError, GroupResult};

/// Maximum number of groups one object can belong to at the same time.
pub const MAX_GROUP_MEMBERSHIPS: usize = 4;

/// Handle to a group. Handle 0 is reserved and never valid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupHandle(u16);

impl GroupHandle {
    /// The "no group" handle.
    pub const NONE: Self = Self(0);

    /// Returns true unless this is [`GroupHandle::NONE`].
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns the raw handle value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    fn slot(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Group {
    /// Dense object indices, unordered.
    members: Vec<u32>,
    name: Option<String>,
    findable_by_name: bool,
}

/// Inline reverse record: the groups one object belongs to.
#[derive(Clone, Copy, Debug, Default)]
struct GroupMembership {
    groups: [GroupHandle; MAX_GROUP_MEMBERSHIPS],
    count: u8,
}

impl GroupMembership {
    fn as_slice(&self) -> &[GroupHandle] {
        &self.groups[..usize::from(self.count)]
    }

    fn contains(&self, group: GroupHandle) -> bool {
        self.as_slice().contains(&group)
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn is_full(&self) -> bool {
        usize::from(self.count) == MAX_GROUP_MEMBERSHIPS
    }

    fn push(&mut self, group: GroupHandle) {
        debug_assert!(!self.is_full());
        self.groups[usize::from(self.count)] = group;
        self.count += 1;
    }

    /// Swap-removes `group`; returns whether it was present.
    fn remove(&mut self, group: GroupHandle) -> bool {
        let Some(pos) = self.as_slice().iter().position(|&g| g == group) else {
            return false;
        };
        let last = usize::from(self.count) - 1;
        self.groups[pos] = self.groups[last];
        self.groups[last] = GroupHandle::NONE;
        self.count -= 1;
        true
    }
}

/// Registry of object groups with a maintained union bit array.
///
/// Group handles are small integers reused after destruction. Object
/// indices are dense indices from the host's index allocator.
#[derive(Debug)]
pub struct GroupRegistry {
    /// Indexed by handle; slot 0 is never used.
    groups: Vec<Option<Group>>,
    free_handles: Vec<u16>,
    memberships: Box<[GroupMembership]>,
    filtered: NetBitArray,
    names: HashMap<String, GroupHandle>,
    max_groups: usize,
}

impl GroupRegistry {
    /// Creates a registry addressing `max_objects` object indices and up
    /// to `max_groups` live groups. All storage is allocated up front.
    ///
    /// # Panics
    ///
    /// Panics if either size is zero, `max_objects` exceeds `u32::MAX`
    /// or `max_groups` exceeds `u16::MAX`.
    #[must_use]
    pub fn new(max_objects: usize, max_groups: usize) -> Self {
        assert!(max_objects > 0, "max_objects must be greater than zero");
        assert!(max_objects <= u32::MAX as usize, "max_objects cannot exceed u32::MAX");
        assert!(max_groups > 0, "max_groups must be greater than zero");
        assert!(max_groups <= u16::MAX as usize, "max_groups cannot exceed u16::MAX");

        let mut groups = Vec::with_capacity(max_groups + 1);
        groups.resize_with(max_groups + 1, || None);

        #[allow(clippy::cast_possible_truncation)]
        let free_handles: Vec<u16> = (1..=max_groups as u16).rev().collect();

        Self {
            groups,
            free_handles,
            memberships: vec![GroupMembership::default(); max_objects].into_boxed_slice(),
            filtered: NetBitArray::new(max_objects),
            names: HashMap::new(),
            max_groups,
        }
    }

    /// Creates a registry sized from a validated config.
    #[must_use]
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.max_objects, config.max_groups)
    }

    /// Returns the number of addressable object indices.
    #[inline]
    #[must_use]
    pub fn max_objects(&self) -> usize {
        self.memberships.len()
    }

    /// Returns the number of live groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.max_groups - self.free_handles.len()
    }

    /// Creates an anonymous group. It filters via its handle only.
    ///
    /// # Errors
    ///
    /// [`GroupError::GroupLimitReached`] if every slot is taken.
    pub fn create_group(&mut self) -> GroupResult<GroupHandle> {
        self.allocate_group(None, false)
    }

    /// Creates a group that [`named_group_handle`](Self::named_group_handle)
    /// can find.
    ///
    /// # Errors
    ///
    /// [`GroupError::NameInUse`] if a findable group already has this name,
    /// [`GroupError::GroupLimitReached`] if every slot is taken.
    pub fn create_named_group(&mut self, name: &str) -> GroupResult<GroupHandle> {
        if self.names.contains_key(name) {
            return Err(GroupError::NameInUse(name.to_owned()));
        }
        let handle = self.allocate_group(Some(name), true)?;
        self.names.insert(name.to_owned(), handle);
        Ok(handle)
    }

    /// Creates a group carrying a name for diagnostics only. It is not
    /// findable by name and may share its name with other groups.
    ///
    /// # Errors
    ///
    /// [`GroupError::GroupLimitReached`] if every slot is taken.
    pub fn create_debug_named_group(&mut self, name: &str) -> GroupResult<GroupHandle> {
        self.allocate_group(Some(name), false)
    }

    fn allocate_group(&mut self, name: Option<&str>, findable_by_name: bool) -> GroupResult<GroupHandle> {
        let Some(raw) = self.free_handles.pop() else {
            tracing::warn!(max_groups = self.max_groups, "group limit reached");
            return Err(GroupError::GroupLimitReached {
                max_groups: self.max_groups,
            });
        };
        let handle = GroupHandle(raw);
        self.groups[handle.slot()] = Some(Group {
            members: Vec::new(),
            name: name.map(str::to_owned),
            findable_by_name,
        });
        tracing::debug!(group = raw, name = name.unwrap_or(""), "group created");
        Ok(handle)
    }

    /// Returns the findable group with this name.
    #[must_use]
    pub fn named_group_handle(&self, name: &str) -> Option<GroupHandle> {
        self.names.get(name).copied()
    }

    /// Destroys the findable group with this name. Returns false if none.
    pub fn destroy_named_group(&mut self, name: &str) -> bool {
        match self.named_group_handle(name) {
            Some(handle) => {
                self.destroy_group(handle);
                true
            }
            None => false,
        }
    }

    /// Returns true if `handle` refers to a live group. O(1).
    #[inline]
    #[must_use]
    pub fn is_valid_group(&self, handle: GroupHandle) -> bool {
        handle.is_valid() && matches!(self.groups.get(handle.slot()), Some(Some(_)))
    }

    /// Destroys a group, dropping it from every member's reverse record,
    /// and frees the handle for reuse.
    pub fn destroy_group(&mut self, handle: GroupHandle) {
        if !self.is_valid_group(handle) {
            usage_error!(group = handle.0, "destroy_group on invalid group");
            return;
        }

        self.detach_all_members(handle);
        if let Some(group) = self.groups[handle.slot()].take() {
            if group.findable_by_name {
                if let Some(name) = group.name {
                    self.names.remove(&name);
                }
            }
        }
        self.free_handles.push(handle.0);
        tracing::debug!(group = handle.0, "group destroyed");
    }

    /// Removes every member but keeps the group alive.
    pub fn clear_group(&mut self, handle: GroupHandle) {
        if !self.is_valid_group(handle) {
            usage_error!(group = handle.0, "clear_group on invalid group");
            return;
        }
        self.detach_all_members(handle);
    }

    fn detach_all_members(&mut self, handle: GroupHandle) {
        let Some(group) = self.groups.get_mut(handle.slot()).and_then(Option::as_mut) else {
            return;
        };
        let mut members = std::mem::take(&mut group.members);
        for &object_index in &members {
            let membership = &mut self.memberships[object_index as usize];
            membership.remove(handle);
            if membership.is_empty() {
                self.filtered.clear(object_index);
            }
        }
        // Keep the allocation for the next fill.
        members.clear();
        group.members = members;
    }

    /// Adds an object to a group. Adding an existing member is a no-op.
    ///
    /// # Errors
    ///
    /// - [`GroupError::InvalidGroup`] for a dead or reserved handle
    /// - [`GroupError::ObjectIndexOutOfRange`] past `max_objects`
    /// - [`GroupError::MembershipLimitReached`] if the object is already
    ///   in [`MAX_GROUP_MEMBERSHIPS`] groups; nothing is changed
    pub fn add_to_group(&mut self, handle: GroupHandle, object_index: u32) -> GroupResult<()> {
        if !self.is_valid_group(handle) {
            usage_error!(group = handle.0, object_index, "add_to_group on invalid group");
            return Err(GroupError::InvalidGroup(handle));
        }
        let Some(membership) = self.memberships.get_mut(object_index as usize) else {
            return Err(GroupError::ObjectIndexOutOfRange {
                object_index,
                max_objects: self.memberships.len(),
            });
        };
        if membership.contains(handle) {
            return Ok(());
        }
        if membership.is_full() {
            tracing::warn!(group = handle.0, object_index, "object group membership limit reached");
            return Err(GroupError::MembershipLimitReached {
                object_index,
                limit: MAX_GROUP_MEMBERSHIPS,
            });
        }

        membership.push(handle);
        if let Some(group) = self.groups[handle.slot()].as_mut() {
            group.members.push(object_index);
        }
        self.filtered.set(object_index);
        Ok(())
    }

    /// Removes an object from a group. Returns whether it was a member.
    pub fn remove_from_group(&mut self, handle: GroupHandle, object_index: u32) -> bool {
        if !self.is_valid_group(handle) {
            usage_error!(group = handle.0, object_index, "remove_from_group on invalid group");
            return false;
        }
        let Some(membership) = self.memberships.get_mut(object_index as usize) else {
            return false;
        };
        if !membership.remove(handle) {
            return false;
        }
        if membership.is_empty() {
            self.filtered.clear(object_index);
        }

        if let Some(group) = self.groups[handle.slot()].as_mut() {
            if let Some(pos) = group.members.iter().position(|&m| m == object_index) {
                group.members.swap_remove(pos);
            }
        }
        true
    }

    /// Drops an object from every group, e.g. when its index is retired.
    pub fn remove_object(&mut self, object_index: u32) {
        let Some(membership) = self.memberships.get_mut(object_index as usize) else {
            return;
        };
        let record = std::mem::take(membership);
        for &handle in record.as_slice() {
            if let Some(group) = self.groups[handle.slot()].as_mut() {
                if let Some(pos) = group.members.iter().position(|&m| m == object_index) {
                    group.members.swap_remove(pos);
                }
            }
        }
        self.filtered.clear(object_index);
    }

    /// Returns true if the object is a member of the group. O(1).
    #[must_use]
    pub fn contains(&self, handle: GroupHandle, object_index: u32) -> bool {
        self.is_valid_group(handle)
            && self
                .memberships
                .get(object_index as usize)
                .is_some_and(|membership| membership.contains(handle))
    }

    /// Returns the groups an object belongs to (at most
    /// [`MAX_GROUP_MEMBERSHIPS`]).
    #[must_use]
    pub fn group_memberships(&self, object_index: u32) -> &[GroupHandle] {
        self.memberships
            .get(object_index as usize)
            .map(GroupMembership::as_slice)
            .unwrap_or_default()
    }

    /// Returns the members of a group, unordered. Empty for invalid handles.
    #[must_use]
    pub fn members(&self, handle: GroupHandle) -> &[u32] {
        match self.groups.get(handle.slot()) {
            Some(Some(group)) if handle.is_valid() => group.members.as_slice(),
            _ => &[],
        }
    }

    /// Returns the group's name, findable or not.
    #[must_use]
    pub fn group_name(&self, handle: GroupHandle) -> Option<&str> {
        match self.groups.get(handle.slot()) {
            Some(Some(group)) if handle.is_valid() => group.name.as_deref(),
            _ => None,
        }
    }

    /// Bit N is set iff object N belongs to at least one group.
    #[inline]
    #[must_use]
    pub fn filtered_objects(&self) -> &NetBitArray {
        &self.filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> GroupRegistry {
        GroupRegistry::new(64, 8)
    }

    #[test]
    fn test_handle_zero_never_valid() {
        let mut groups = registry();
        let handle = groups.create_group().unwrap();
        assert!(handle.is_valid());
        assert_eq!(handle.raw(), 1);
        assert!(!groups.is_valid_group(GroupHandle::NONE));
    }

    #[test]
    fn test_add_contains_remove() {
        let mut groups = registry();
        let team = groups.create_group().unwrap();

        groups.add_to_group(team, 5).unwrap();
        assert!(groups.contains(team, 5));
        assert!(groups.filtered_objects().get(5));
        assert_eq!(groups.members(team), &[5]);

        assert!(groups.remove_from_group(team, 5));
        assert!(!groups.contains(team, 5));
        assert!(!groups.filtered_objects().get(5));
        assert!(!groups.remove_from_group(team, 5));
    }

    #[test]
    fn test_double_add_is_idempotent() {
        let mut groups = registry();
        let team = groups.create_group().unwrap();
        groups.add_to_group(team, 3).unwrap();
        groups.add_to_group(team, 3).unwrap();
        assert_eq!(groups.members(team).len(), 1);
        assert_eq!(groups.group_memberships(3), &[team]);
    }

    #[test]
    fn test_filter_bit_survives_until_last_group() {
        let mut groups = registry();
        let a = groups.create_group().unwrap();
        let b = groups.create_group().unwrap();
        groups.add_to_group(a, 9).unwrap();
        groups.add_to_group(b, 9).unwrap();

        groups.remove_from_group(a, 9);
        assert!(groups.filtered_objects().get(9));
        groups.remove_from_group(b, 9);
        assert!(!groups.filtered_objects().get(9));
    }

    #[test]
    fn test_fifth_membership_rejected_without_side_effects() {
        let mut groups = registry();
        let handles: Vec<_> = (0..5).map(|_| groups.create_group().unwrap()).collect();
        for &handle in &handles[..4] {
            groups.add_to_group(handle, 1).unwrap();
        }

        let err = groups.add_to_group(handles[4], 1).unwrap_err();
        assert_eq!(
            err,
            GroupError::MembershipLimitReached {
                object_index: 1,
                limit: MAX_GROUP_MEMBERSHIPS
            }
        );
        assert!(!groups.contains(handles[4], 1));
        assert!(groups.members(handles[4]).is_empty());
        assert_eq!(groups.group_memberships(1), &handles[..4]);
    }

    #[test]
    fn test_clear_keeps_group_alive() {
        let mut groups = registry();
        let zone = groups.create_group().unwrap();
        for i in 0..10 {
            groups.add_to_group(zone, i).unwrap();
        }

        groups.clear_group(zone);
        assert!(groups.is_valid_group(zone));
        assert!(groups.members(zone).is_empty());
        assert!(groups.filtered_objects().none_set());
        for i in 0..10 {
            assert!(groups.group_memberships(i).is_empty());
        }
    }

    #[test]
    fn test_destroy_then_reuse_has_no_stale_members() {
        let mut groups = registry();
        let old = groups.create_group().unwrap();
        groups.add_to_group(old, 2).unwrap();
        groups.destroy_group(old);
        assert!(!groups.is_valid_group(old));

        let reused = groups.create_group().unwrap();
        assert_eq!(reused, old);
        assert!(!groups.contains(reused, 2));
        assert!(groups.group_memberships(2).is_empty());
        assert!(!groups.filtered_objects().get(2));
    }

    #[test]
    fn test_group_limit() {
        let mut groups = GroupRegistry::new(4, 2);
        groups.create_group().unwrap();
        groups.create_group().unwrap();
        assert_eq!(
            groups.create_group(),
            Err(GroupError::GroupLimitReached { max_groups: 2 })
        );
        assert_eq!(groups.group_count(), 2);
    }

    #[test]
    fn test_named_groups() {
        let mut groups = registry();
        let red = groups.create_named_group("team_red").unwrap();
        assert_eq!(groups.named_group_handle("team_red"), Some(red));
        assert_eq!(groups.group_name(red), Some("team_red"));
        assert_eq!(
            groups.create_named_group("team_red"),
            Err(GroupError::NameInUse("team_red".into()))
        );

        assert!(groups.destroy_named_group("team_red"));
        assert_eq!(groups.named_group_handle("team_red"), None);
        assert!(!groups.destroy_named_group("team_red"));
    }

    #[test]
    fn test_debug_named_group_not_findable() {
        let mut groups = registry();
        let zone = groups.create_debug_named_group("zone_7").unwrap();
        assert_eq!(groups.group_name(zone), Some("zone_7"));
        assert_eq!(groups.named_group_handle("zone_7"), None);
        // Name stays free for a findable group.
        groups.create_named_group("zone_7").unwrap();
    }

    #[test]
    fn test_object_index_out_of_range() {
        let mut groups = registry();
        let team = groups.create_group().unwrap();
        assert!(matches!(
            groups.add_to_group(team, 64),
            Err(GroupError::ObjectIndexOutOfRange { object_index: 64, .. })
        ));
        assert!(!groups.contains(team, 64));
        assert!(groups.group_memberships(64).is_empty());
    }

    #[test]
    fn test_remove_object_from_all_groups() {
        let mut groups = registry();
        let a = groups.create_group().unwrap();
        let b = groups.create_group().unwrap();
        groups.add_to_group(a, 4).unwrap();
        groups.add_to_group(b, 4).unwrap();
        groups.add_to_group(b, 5).unwrap();

        groups.remove_object(4);
        assert!(groups.members(a).is_empty());
        assert_eq!(groups.members(b), &[5]);
        assert!(!groups.filtered_objects().get(4));
        assert!(groups.filtered_objects().get(5));
    }

    #[test]
    #[cfg(not(feature = "strict-asserts"))]
    fn test_invalid_handle_is_noop() {
        let mut groups = registry();
        let stale = groups.create_group().unwrap();
        groups.destroy_group(stale);

        assert_eq!(groups.add_to_group(stale, 1), Err(GroupError::InvalidGroup(stale)));
        assert!(!groups.remove_from_group(stale, 1));
        groups.clear_group(stale);
        groups.destroy_group(stale);
        groups.destroy_group(GroupHandle::NONE);
        assert_eq!(groups.group_count(), 0);
        assert!(groups.filtered_objects().none_set());
    }
}
