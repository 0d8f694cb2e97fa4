//! # LATTICE Core
//!
//! Leaf types shared by every LATTICE replication component:
//!
//! - [`ObjectHandle`]: sparse, opaque identifier of a replicated object
//! - [`HandleIdAllocator`]: static/dynamic id generators for one system
//! - [`NetBitArray`]: dense per-object bit array
//!
//! Handles are sparse. Anything stored per object in a [`NetBitArray`] is
//! addressed by a *dense* object index, which the host's index allocator
//! assigns. That allocator lives outside this workspace.
//!
//! ## Example
//!
//! ```rust
//! use lattice_core::{HandleIdAllocator, NetBitArray, ObjectHandle};
//!
//! let mut ids = HandleIdAllocator::new(1);
//! let door = ids.allocate_static();
//! assert!(door.is_static());
//!
//! let mut relevant = NetBitArray::new(1024);
//! relevant.set(17);
//! assert!(relevant.get(17));
//! # let _ = ObjectHandle::INVALID;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod bits;
pub mod handle;

pub use bits::{NetBitArray, SetBitIter};
pub use handle::{FullHandleKey, HandleIdAllocator, ObjectHandle};
