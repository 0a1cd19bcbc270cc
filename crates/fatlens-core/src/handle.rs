use crate::error::{VolumeError, VolumeErrorKind, VolumeResult};
use alloc::vec::Vec;
use core::fmt;

/// Handle returned by [`Volume::open`](crate::Volume::open). Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Descriptor(u32);

impl Descriptor {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// State recorded for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    descriptor: Descriptor,
    start_cluster: u32,
    size: u32,
    open: bool,
}

impl OpenFile {
    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Descriptor table. Descriptors index the table directly and are handed out in
/// increasing order; closed slots stay allocated.
#[derive(Debug, Default)]
pub struct HandleTable {
    files: Vec<OpenFile>,
    open: usize,
}

impl HandleTable {
    pub const fn new() -> Self {
        Self {
            files: Vec::new(),
            open: 0,
        }
    }

    pub fn insert(&mut self, start_cluster: u32, size: u32) -> VolumeResult<Descriptor> {
        let raw = u32::try_from(self.files.len()).map_err(|_| {
            VolumeError::with_message(
                VolumeErrorKind::InvalidDescriptor,
                "descriptor space exhausted",
            )
        })?;
        let descriptor = Descriptor(raw);
        self.files.push(OpenFile {
            descriptor,
            start_cluster,
            size,
            open: true,
        });
        self.open += 1;
        Ok(descriptor)
    }

    /// Look up an open descriptor.
    pub fn get(&self, descriptor: Descriptor) -> VolumeResult<&OpenFile> {
        self.files
            .get(descriptor.0 as usize)
            .filter(|file| file.open)
            .ok_or_else(|| invalid(descriptor))
    }

    pub fn close(&mut self, descriptor: Descriptor) -> VolumeResult<()> {
        let file = self
            .files
            .get_mut(descriptor.0 as usize)
            .filter(|file| file.open)
            .ok_or_else(|| invalid(descriptor))?;
        file.open = false;
        self.open -= 1;
        Ok(())
    }

    /// Number of descriptors still open.
    pub fn open_count(&self) -> usize {
        self.open
    }

    /// Number of descriptors ever issued.
    pub fn issued(&self) -> usize {
        self.files.len()
    }
}

fn invalid(descriptor: Descriptor) -> VolumeError {
    VolumeError::with_message(
        VolumeErrorKind::InvalidDescriptor,
        alloc::format!("{descriptor} is not open"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_increase_monotonically() {
        let mut table = HandleTable::new();
        let a = table.insert(3, 10).unwrap();
        let b = table.insert(4, 20).unwrap();
        assert_eq!(a.get(), 0);
        assert_eq!(b.get(), 1);
        assert_eq!(table.get(b).unwrap().start_cluster(), 4);
        assert_eq!(table.get(b).unwrap().size(), 20);
    }

    #[test]
    fn close_succeeds_exactly_once() {
        let mut table = HandleTable::new();
        let fd = table.insert(3, 10).unwrap();
        table.close(fd).unwrap();
        let err = table.close(fd).unwrap_err();
        assert_eq!(err.kind(), VolumeErrorKind::InvalidDescriptor);
        assert!(table.get(fd).is_err());
    }

    #[test]
    fn unknown_descriptor_is_invalid() {
        let mut table = HandleTable::new();
        assert!(table.close(Descriptor::new(0)).is_err());
        table.insert(3, 1).unwrap();
        assert!(table.close(Descriptor::new(7)).is_err());
        assert!(table.get(Descriptor::new(u32::MAX)).is_err());
    }

    #[test]
    fn closed_descriptors_are_not_reused() {
        let mut table = HandleTable::new();
        let first = table.insert(3, 1).unwrap();
        table.close(first).unwrap();
        let second = table.insert(3, 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(table.open_count(), 1);
        assert_eq!(table.issued(), 2);
    }

    #[test]
    fn holds_many_open_descriptors() {
        let mut table = HandleTable::new();
        let fds: Vec<_> = (0..200).map(|i| table.insert(2 + i, i).unwrap()).collect();
        assert_eq!(table.open_count(), 200);
        for (i, fd) in fds.iter().enumerate() {
            assert_eq!(table.get(*fd).unwrap().size(), i as u32);
        }
    }
}
