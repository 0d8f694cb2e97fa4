//! # LATTICE Replication
//!
//! Change detection and poll scheduling for networked object replication.
//!
//! ## Components
//!
//! - [`DirtyObjectRegistry`]: objects changed since each poller last looked
//! - [`GroupRegistry`]: interest/visibility groups plus a live union bit-set
//! - [`PollFrequencyLimiter`]: spreads periodic per-object sampling evenly
//!
//! ## Tick Model
//!
//! One driving thread per logical tick. Nothing blocks, nothing suspends.
//!
//! ```text
//! tick N
//!   ├─ gameplay mutates objects ──► dirty.mark_dirty(handle)
//!   ├─ relevancy moves objects  ──► groups.add_to_group / remove_from_group
//!   ├─ limiter.update(scope, paused, &mut due)  ──► sample `due`
//!   ├─ per connection: dirty.get_dirty_objects(poller) ... reset_dirty_objects
//!   └─ dirty.end_frame()   (heals forgotten resets)
//! ```
//!
//! ## Failure Model
//!
//! - Caller bugs (forgotten resets, stale handles): logged through
//!   `tracing`, degraded to no-ops, healed at the next frame boundary.
//!   The `strict-asserts` feature turns them into debug assertions.
//! - Capacity limits: returned as [`GroupError`] values.
//! - Nobody listening (no pollers, uninitialized registry): silent.
//!
//! ## Example
//!
//! ```rust
//! use lattice_core::{HandleIdAllocator, NetBitArray};
//! use lattice_replication::{DirtyObjectRegistry, GroupRegistry, PollFrequencyLimiter};
//!
//! let mut dirty = DirtyObjectRegistry::new();
//! dirty.init();
//! let lane = dirty.create_poller();
//!
//! let mut ids = HandleIdAllocator::new(1);
//! let crate_obj = ids.allocate_dynamic();
//! dirty.mark_dirty(crate_obj);
//! assert!(dirty.get_dirty_objects(lane).contains(crate_obj));
//! dirty.reset_dirty_objects(lane);
//!
//! let mut groups = GroupRegistry::new(1024, 16);
//! let team = groups.create_named_group("team_blue").unwrap();
//! groups.add_to_group(team, 7).unwrap();
//! assert!(groups.filtered_objects().get(7));
//!
//! let mut limiter = PollFrequencyLimiter::new(1024);
//! limiter.set_poll_period(7, 4);
//! let scope = NetBitArray::from_indices(1024, [7]);
//! let mut due = NetBitArray::new(1024);
//! let polled: usize = (0..4)
//!     .map(|_| limiter.update(&scope, &NetBitArray::new(1024), &mut due))
//!     .sum();
//! assert_eq!(polled, 1);
//!
//! dirty.destroy_poller(lane);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

mod diag;

pub mod config;
pub mod dirty;
pub mod error;
pub mod groups;
pub mod poll;

pub use config::ReplicationConfig;
pub use dirty::{DirtyObjectRegistry, DirtyObjectSet, PollerHandle, SharedDirtyRegistry};
pub use error::{ConfigError, ConfigResult, GroupError, GroupResult};
pub use groups::{GroupHandle, GroupRegistry, MAX_GROUP_MEMBERSHIPS};
pub use poll::{period_for_frequency, PollFrequencyLimiter};
