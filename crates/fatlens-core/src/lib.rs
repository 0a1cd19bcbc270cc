//! Read-only access to FAT32 volume images held in memory.
//!
//! A [`Volume`] is mounted over any `AsRef<[u8]>` image. Files are located by
//! slash-separated 8.3 paths, opened into [`Descriptor`]s and read with positional
//! reads that follow the file's cluster chain through the FAT.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod cluster;
pub mod dir;
pub mod error;
pub mod fat;
pub mod geometry;
pub mod handle;
pub mod path;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod volume;

pub use cluster::ClusterReader;
pub use dir::{Attributes, LongFragment, RawEntry, ShortEntry, Timestamps, live_entries};
pub use error::{VolumeError, VolumeErrorKind, VolumeResult};
pub use fat::{ClusterChain, FatEntry, FatTable};
pub use geometry::Geometry;
pub use handle::{Descriptor, OpenFile};
pub use path::{PathComponents, PathResolver};
pub use volume::Volume;
