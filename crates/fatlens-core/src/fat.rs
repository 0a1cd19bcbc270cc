use crate::error::{VolumeError, VolumeResult};
use crate::geometry::Geometry;
use alloc::format;
use byteorder::{ByteOrder, LittleEndian};

/// FAT32 entries only use the low 28 bits.
pub const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;
/// Smallest masked value that marks the end of a chain.
pub const FAT_EOC: u32 = 0x0FFF_FFF8;
pub const FAT_BAD: u32 = 0x0FFF_FFF7;
const FAT_FREE: u32 = 0x0000_0000;
const FAT_ENTRY_LEN: u64 = 4;

/// Classified FAT entry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Reserved,
    Next(u32),
    Bad,
    EndOfChain,
}

impl FatEntry {
    /// Classify a raw entry; the reserved top nibble is ignored.
    pub const fn from_raw(value: u32) -> Self {
        match value & FAT_ENTRY_MASK {
            FAT_FREE => FatEntry::Free,
            1 => FatEntry::Reserved,
            FAT_BAD => FatEntry::Bad,
            v if v >= FAT_EOC => FatEntry::EndOfChain,
            v => FatEntry::Next(v),
        }
    }
}

/// Read access to the first FAT of a resident image.
#[derive(Clone, Copy)]
pub struct FatTable<'a> {
    image: &'a [u8],
    geometry: &'a Geometry,
}

impl<'a> FatTable<'a> {
    pub fn new(image: &'a [u8], geometry: &'a Geometry) -> Self {
        Self { image, geometry }
    }

    /// Masked FAT value stored for `cluster`.
    pub fn next(&self, cluster: u32) -> VolumeResult<u32> {
        let offset = self.geometry.fat_entry_offset(cluster);
        let end = offset + FAT_ENTRY_LEN;
        if end > self.image.len() as u64 {
            return Err(VolumeError::corrupt(format!(
                "FAT entry for cluster {cluster} lies beyond the image"
            )));
        }
        let raw = LittleEndian::read_u32(&self.image[offset as usize..end as usize]);
        Ok(raw & FAT_ENTRY_MASK)
    }

    pub fn entry(&self, cluster: u32) -> VolumeResult<FatEntry> {
        self.next(cluster).map(FatEntry::from_raw)
    }

    /// Iterate the cluster chain beginning at `start`.
    pub fn chain(&self, start: u32) -> ClusterChain<'a> {
        ClusterChain {
            fat: *self,
            pending: Some(Ok(start)),
            visited: 0,
            limit: self.geometry.data_clusters(),
        }
    }
}

/// Clusters of one file or directory, links resolved lazily through the FAT.
///
/// Yields the start cluster first and stops after the cluster whose FAT entry is an
/// end-of-chain marker. Links to free, bad or reserved entries and chains longer than
/// the data region are reported once as `CorruptVolume`, after which the iterator is
/// exhausted.
pub struct ClusterChain<'a> {
    fat: FatTable<'a>,
    pending: Option<VolumeResult<u32>>,
    visited: u32,
    limit: u32,
}

impl Iterator for ClusterChain<'_> {
    type Item = VolumeResult<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let cluster = match self.pending.take()? {
            Ok(cluster) => cluster,
            Err(err) => return Some(Err(err)),
        };
        if cluster < 2 {
            return Some(Err(VolumeError::corrupt(format!(
                "chain references cluster {cluster}"
            ))));
        }
        if self.visited >= self.limit {
            return Some(Err(VolumeError::corrupt(
                "cluster chain longer than the data region",
            )));
        }
        self.visited += 1;
        self.pending = match self.fat.entry(cluster) {
            Ok(FatEntry::EndOfChain) => None,
            Ok(FatEntry::Next(next)) => Some(Ok(next)),
            Ok(other) => Some(Err(VolumeError::corrupt(format!(
                "cluster {cluster} links to {other:?}"
            )))),
            Err(err) => Some(Err(err)),
        };
        Some(Ok(cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VolumeErrorKind;
    use crate::testing::ImageBuilder;
    use alloc::vec::Vec;

    fn patch_entry(image: &mut [u8], geom: &Geometry, cluster: u32, value: u32) {
        let offset = geom.fat_entry_offset(cluster) as usize;
        image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn classifies_entries() {
        assert_eq!(FatEntry::from_raw(0), FatEntry::Free);
        assert_eq!(FatEntry::from_raw(1), FatEntry::Reserved);
        assert_eq!(FatEntry::from_raw(7), FatEntry::Next(7));
        assert_eq!(FatEntry::from_raw(0x0FFF_FFF7), FatEntry::Bad);
        assert_eq!(FatEntry::from_raw(0x0FFF_FFF8), FatEntry::EndOfChain);
        assert_eq!(FatEntry::from_raw(0x0FFF_FFFF), FatEntry::EndOfChain);
        // Top nibble is reserved and must not affect classification.
        assert_eq!(FatEntry::from_raw(0xF000_0009), FatEntry::Next(9));
        assert_eq!(FatEntry::from_raw(0xFFFF_FFFF), FatEntry::EndOfChain);
    }

    #[test]
    fn next_masks_reserved_bits() {
        let mut image = ImageBuilder::new().build();
        let geom = Geometry::parse(&image).unwrap();
        patch_entry(&mut image, &geom, 5, 0xA000_0006);
        let fat = FatTable::new(&image, &geom);
        assert_eq!(fat.next(5).unwrap(), 6);
    }

    #[test]
    fn chain_follows_links_in_fat_order() {
        let mut builder = ImageBuilder::new().fragmented();
        let root = builder.root();
        builder.file(root, "SPAN.BIN", &[1u8; 512 * 3 + 1]);
        let image = builder.build();
        let geom = Geometry::parse(&image).unwrap();
        let fat = FatTable::new(&image, &geom);

        let root_chain: Vec<u32> = fat
            .chain(geom.root_cluster())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(root_chain, [geom.root_cluster()]);

        // Fragmented allocation hands out clusters from the top down.
        let start = geom.root_cluster() - 1;
        let chain: Vec<u32> = fat.chain(start).collect::<Result<_, _>>().unwrap();
        assert_eq!(chain, [start, start - 1, start - 2, start - 3]);
        for pair in chain.windows(2) {
            assert_eq!(fat.next(pair[0]).unwrap(), pair[1]);
        }
        assert!(fat.next(*chain.last().unwrap()).unwrap() >= FAT_EOC);
    }

    #[test]
    fn chain_detects_cycles() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        builder.file(root, "LOOP.BIN", &[0u8; 1024]);
        let mut image = builder.build();
        let geom = Geometry::parse(&image).unwrap();
        // File occupies clusters 3 and 4; point 4 back at 3.
        patch_entry(&mut image, &geom, 4, 3);
        let fat = FatTable::new(&image, &geom);
        let results: Vec<_> = fat.chain(3).collect();
        let err = results.last().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind(), VolumeErrorKind::CorruptVolume);
        assert_eq!(results.len() as u32, geom.data_clusters() + 1);
    }

    #[test]
    fn chain_rejects_link_to_free_cluster() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        builder.file(root, "A.BIN", &[0u8; 10]);
        let mut image = builder.build();
        let geom = Geometry::parse(&image).unwrap();
        patch_entry(&mut image, &geom, 3, 0);
        let fat = FatTable::new(&image, &geom);
        let mut chain = fat.chain(3);
        assert_eq!(chain.next().unwrap().unwrap(), 3);
        assert_eq!(
            chain.next().unwrap().unwrap_err().kind(),
            VolumeErrorKind::CorruptVolume
        );
        assert!(chain.next().is_none());
    }

    #[test]
    fn next_rejects_entry_beyond_image() {
        let image = ImageBuilder::new().build();
        let geom = Geometry::parse(&image).unwrap();
        let fat = FatTable::new(&image, &geom);
        let err = fat.next(u32::MAX).unwrap_err();
        assert_eq!(err.kind(), VolumeErrorKind::CorruptVolume);
    }
}
