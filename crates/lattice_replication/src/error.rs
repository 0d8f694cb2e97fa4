//! # Replication Error Types
//!
//! Recoverable failures returned to callers. Usage errors (forgotten
//! resets, stale poller handles) are not here: they are logged and
//! self-healed instead of being returned.

use thiserror::Error;

use crate::groups::GroupHandle;

/// Errors from group registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// The group handle is 0, out of range, or refers to a destroyed group.
    #[error("invalid group handle {0}")]
    InvalidGroup(GroupHandle),

    /// Every group slot is in use.
    #[error("group limit reached: {max_groups} groups")]
    GroupLimitReached {
        /// Configured maximum number of groups.
        max_groups: usize,
    },

    /// The object already belongs to the maximum number of groups.
    #[error("object {object_index} already belongs to {limit} groups")]
    MembershipLimitReached {
        /// Dense index of the object.
        object_index: u32,
        /// Membership ceiling per object.
        limit: usize,
    },

    /// The object index is past the configured object capacity.
    #[error("object index {object_index} out of range (max objects {max_objects})")]
    ObjectIndexOutOfRange {
        /// Dense index of the object.
        object_index: u32,
        /// Configured maximum number of objects.
        max_objects: usize,
    },

    /// A findable group with this name already exists.
    #[error("group name already in use: {0}")]
    NameInUse(String),
}

/// Result type for group operations.
pub type GroupResult<T> = Result<T, GroupError>;

/// Errors from loading a [`ReplicationConfig`](crate::ReplicationConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML was malformed or had wrongly typed fields.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value was out of its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for config loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
