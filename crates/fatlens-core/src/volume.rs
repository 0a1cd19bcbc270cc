use crate::cluster::ClusterReader;
use crate::dir::{RawEntry, ShortEntry, scan_directory};
use crate::error::{VolumeError, VolumeErrorKind, VolumeResult};
use crate::fat::FatTable;
use crate::geometry::Geometry;
use crate::handle::{Descriptor, HandleTable, OpenFile};
use crate::path::{PathComponents, PathResolver};
use alloc::vec::Vec;
use core::fmt;
use core::ops::ControlFlow;
use tracing::{debug, trace};

struct Mounted<I> {
    image: I,
    geometry: Geometry,
}

impl<I: AsRef<[u8]>> Mounted<I> {
    fn fat(&self) -> FatTable<'_> {
        FatTable::new(self.image.as_ref(), &self.geometry)
    }

    fn reader(&self) -> ClusterReader<'_> {
        ClusterReader::new(self.image.as_ref(), &self.geometry)
    }

    fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(self.fat(), self.reader(), self.geometry.root_cluster())
    }
}

/// A read-only FAT32 volume over a resident image.
///
/// An instance starts unmounted and accepts exactly one [`mount`](Self::mount). It owns
/// the image, the decoded [`Geometry`] and the descriptor table.
pub struct Volume<I> {
    mounted: Option<Mounted<I>>,
    handles: HandleTable,
}

impl<I> fmt::Debug for Volume<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("geometry", &self.mounted.as_ref().map(|m| &m.geometry))
            .field("handles", &self.handles)
            .finish()
    }
}

impl<I> Default for Volume<I> {
    fn default() -> Self {
        Self {
            mounted: None,
            handles: HandleTable::new(),
        }
    }
}

impl<I: AsRef<[u8]>> Volume<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an instance and mount `image` on it.
    pub fn with_image(image: I) -> VolumeResult<Self> {
        let mut volume = Self::new();
        volume.mount(image)?;
        Ok(volume)
    }

    /// Decode the BPB and take ownership of `image`. On error the instance stays
    /// unmounted.
    pub fn mount(&mut self, image: I) -> VolumeResult<&Geometry> {
        if self.mounted.is_some() {
            return Err(VolumeError::new(VolumeErrorKind::AlreadyMounted));
        }
        let geometry = Geometry::parse(image.as_ref())?;
        debug!(
            bytes_per_sector = geometry.bytes_per_sector(),
            sectors_per_cluster = geometry.sectors_per_cluster(),
            root_cluster = geometry.root_cluster(),
            data_clusters = geometry.data_clusters(),
            "mounted FAT32 volume"
        );
        let mounted = self.mounted.insert(Mounted { image, geometry });
        Ok(&mounted.geometry)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.mounted.as_ref().map(|m| &m.geometry)
    }

    /// Borrow the backing image.
    pub fn image(&self) -> Option<&[u8]> {
        self.mounted.as_ref().map(|m| m.image.as_ref())
    }

    fn mounted(&self) -> VolumeResult<&Mounted<I>> {
        self.mounted
            .as_ref()
            .ok_or_else(|| VolumeError::new(VolumeErrorKind::NotMounted))
    }

    /// Resolve `path` to its directory entry.
    pub fn resolve(&self, path: &str) -> VolumeResult<ShortEntry> {
        self.mounted()?.resolver().resolve(path)
    }

    /// Open the file at `path`. Directories are rejected with `InvalidTarget`.
    pub fn open(&mut self, path: &str) -> VolumeResult<Descriptor> {
        let entry = self.resolve(path)?;
        if entry.is_directory() {
            return Err(VolumeError::with_message(
                VolumeErrorKind::InvalidTarget,
                "cannot open a directory",
            ));
        }
        let descriptor = self.handles.insert(entry.first_cluster(), entry.size())?;
        debug!(%descriptor, path, size = entry.size(), "opened file");
        Ok(descriptor)
    }

    pub fn close(&mut self, descriptor: Descriptor) -> VolumeResult<()> {
        self.mounted()?;
        self.handles.close(descriptor)?;
        trace!(%descriptor, "closed file");
        Ok(())
    }

    /// Recorded state of an open descriptor.
    pub fn stat(&self, descriptor: Descriptor) -> VolumeResult<OpenFile> {
        self.mounted()?;
        self.handles.get(descriptor).copied()
    }

    /// Number of descriptors currently open.
    pub fn open_count(&self) -> usize {
        self.handles.open_count()
    }

    /// Copy up to `buf.len()` bytes starting at byte `offset` of the file.
    ///
    /// Returns the number of bytes copied, which is short near the end of the file or
    /// when the cluster chain ends early. Reading nothing is not an error.
    pub fn pread(
        &self,
        descriptor: Descriptor,
        buf: &mut [u8],
        offset: u64,
    ) -> VolumeResult<usize> {
        let mounted = self.mounted()?;
        let file = self.handles.get(descriptor)?;
        let size = file.size() as u64;
        if buf.is_empty() || offset >= size {
            return Ok(0);
        }

        let cluster_bytes = mounted.geometry.cluster_bytes();
        let want = (size - offset).min(buf.len() as u64) as usize;
        let skip = offset / cluster_bytes;
        let mut within = (offset % cluster_bytes) as usize;
        let reader = mounted.reader();
        let mut copied = 0;

        for (index, cluster) in mounted.fat().chain(file.start_cluster()).enumerate() {
            let cluster = cluster?;
            if (index as u64) < skip {
                continue;
            }
            let data = reader.read(cluster)?;
            let take = (want - copied).min(data.len() - within);
            buf[copied..copied + take].copy_from_slice(&data[within..within + take]);
            copied += take;
            within = 0;
            if copied == want {
                break;
            }
        }
        trace!(%descriptor, offset, copied, "pread");
        Ok(copied)
    }

    /// Live entries of the directory at `path`; "" and "/" name the root.
    pub fn list(&self, path: &str) -> VolumeResult<Vec<RawEntry>> {
        let mounted = self.mounted()?;
        let start = if PathComponents::parse(path).is_root() {
            mounted.geometry.root_cluster()
        } else {
            let cluster = mounted.resolver().resolve(path)?.first_cluster();
            if cluster < 2 {
                return Err(VolumeError::with_message(
                    VolumeErrorKind::NotFound,
                    alloc::format!("{path:?} has no directory clusters"),
                ));
            }
            cluster
        };
        let mut entries = Vec::new();
        scan_directory(&mounted.fat(), &mounted.reader(), start, |entry| {
            entries.push(entry);
            ControlFlow::<()>::Continue(())
        })?;
        Ok(entries)
    }

    /// Like [`list`](Self::list), but any failure yields an empty sequence.
    pub fn readdir(&self, path: &str) -> Vec<RawEntry> {
        self.list(path).unwrap_or_else(|err| {
            debug!(path, error = %err, "readdir failed");
            Vec::new()
        })
    }
}
