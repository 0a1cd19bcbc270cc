use crate::error::{VolumeError, VolumeErrorKind, VolumeResult};
use byteorder::{ByteOrder, LittleEndian};

/// Length of the boot sector prefix that holds every BPB field we decode.
pub const BOOT_SECTOR_LEN: usize = 512;

const BPB_BYTES_PER_SECTOR: usize = 11;
const BPB_SECTORS_PER_CLUSTER: usize = 13;
const BPB_RESERVED_SECTORS: usize = 14;
const BPB_FAT_COUNT: usize = 16;
const BPB_TOTAL_SECTORS_16: usize = 19;
const BPB_FAT_SIZE_16: usize = 22;
const BPB_TOTAL_SECTORS_32: usize = 32;
const BPB_FAT_SIZE_32: usize = 36;
const BPB_ROOT_CLUSTER: usize = 44;

/// Raw BIOS Parameter Block fields, as stored in the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bpb {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fat_count: u8,
    total_sectors_16: u16,
    fat_size_16: u16,
    total_sectors_32: u32,
    fat_size_32: u32,
    root_cluster: u32,
}

impl Bpb {
    fn parse(sector: &[u8]) -> Self {
        Self {
            bytes_per_sector: LittleEndian::read_u16(&sector[BPB_BYTES_PER_SECTOR..]),
            sectors_per_cluster: sector[BPB_SECTORS_PER_CLUSTER],
            reserved_sectors: LittleEndian::read_u16(&sector[BPB_RESERVED_SECTORS..]),
            fat_count: sector[BPB_FAT_COUNT],
            total_sectors_16: LittleEndian::read_u16(&sector[BPB_TOTAL_SECTORS_16..]),
            fat_size_16: LittleEndian::read_u16(&sector[BPB_FAT_SIZE_16..]),
            total_sectors_32: LittleEndian::read_u32(&sector[BPB_TOTAL_SECTORS_32..]),
            fat_size_32: LittleEndian::read_u32(&sector[BPB_FAT_SIZE_32..]),
            root_cluster: LittleEndian::read_u32(&sector[BPB_ROOT_CLUSTER..]),
        }
    }
}

/// Fixed layout of a mounted FAT32 volume, derived once from the BPB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    fat_count: u32,
    sectors_per_fat: u32,
    root_cluster: u32,
    first_data_sector: u64,
    total_sectors: u64,
    data_clusters: u32,
}

impl Geometry {
    /// Decode the BPB at the start of `image` and validate it against the image length.
    pub fn parse(image: &[u8]) -> VolumeResult<Self> {
        if image.len() < BOOT_SECTOR_LEN {
            return Err(VolumeError::with_message(
                VolumeErrorKind::Io,
                "image too short to hold a boot sector",
            ));
        }
        let bpb = Bpb::parse(&image[..BOOT_SECTOR_LEN]);

        let bytes_per_sector = bpb.bytes_per_sector as u32;
        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(VolumeError::corrupt("unsupported bytes per sector"));
        }
        let sectors_per_cluster = bpb.sectors_per_cluster as u32;
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(VolumeError::corrupt(
                "sectors per cluster must be a non-zero power of two",
            ));
        }
        if bpb.reserved_sectors == 0 || bpb.fat_count == 0 {
            return Err(VolumeError::corrupt("reserved sectors and FAT count must be non-zero"));
        }
        // FAT12/FAT16 carry their FAT size in the 16-bit field.
        if bpb.fat_size_16 != 0 || bpb.fat_size_32 == 0 {
            return Err(VolumeError::corrupt("not a FAT32 volume"));
        }
        if bpb.root_cluster < 2 {
            return Err(VolumeError::corrupt("root cluster below 2"));
        }

        let reserved_sectors = bpb.reserved_sectors as u32;
        let fat_count = bpb.fat_count as u32;
        let sectors_per_fat = bpb.fat_size_32;
        let first_data_sector =
            reserved_sectors as u64 + fat_count as u64 * sectors_per_fat as u64;

        let image_sectors = image.len() as u64 / bytes_per_sector as u64;
        let declared = if bpb.total_sectors_32 != 0 {
            bpb.total_sectors_32 as u64
        } else {
            bpb.total_sectors_16 as u64
        };
        let total_sectors = if declared == 0 {
            image_sectors
        } else {
            declared.min(image_sectors)
        };
        if first_data_sector >= total_sectors {
            return Err(VolumeError::corrupt("data region starts beyond the image"));
        }
        let data_clusters = (total_sectors - first_data_sector) / sectors_per_cluster as u64;
        let data_clusters = u32::try_from(data_clusters)
            .map_err(|_| VolumeError::corrupt("data cluster count exceeds 32 bits"))?;

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            sectors_per_fat,
            root_cluster: bpb.root_cluster,
            first_data_sector,
            total_sectors,
            data_clusters,
        })
    }

    /// Logical sector size in bytes.
    pub const fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    pub const fn sectors_per_cluster(&self) -> u32 {
        self.sectors_per_cluster
    }

    /// Size of a cluster in bytes.
    pub const fn cluster_bytes(&self) -> u64 {
        self.sectors_per_cluster as u64 * self.bytes_per_sector as u64
    }

    /// Sectors in front of the first FAT, boot sector included.
    pub const fn reserved_sectors(&self) -> u32 {
        self.reserved_sectors
    }

    pub const fn fat_count(&self) -> u32 {
        self.fat_count
    }

    pub const fn sectors_per_fat(&self) -> u32 {
        self.sectors_per_fat
    }

    /// First cluster of the root directory.
    pub const fn root_cluster(&self) -> u32 {
        self.root_cluster
    }

    /// First sector of the data region (cluster 2).
    pub const fn first_data_sector(&self) -> u64 {
        self.first_data_sector
    }

    /// Sectors covered by the volume, clamped to the image length.
    pub const fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    /// Number of whole clusters in the data region.
    pub const fn data_clusters(&self) -> u32 {
        self.data_clusters
    }

    /// Absolute byte offset of the first sector of `cluster`.
    pub fn cluster_offset(&self, cluster: u32) -> Option<u64> {
        if cluster < 2 {
            return None;
        }
        let sector = (cluster as u64 - 2)
            .checked_mul(self.sectors_per_cluster as u64)?
            .checked_add(self.first_data_sector)?;
        sector.checked_mul(self.bytes_per_sector as u64)
    }

    /// Absolute byte offset of the FAT entry describing `cluster` in the first FAT.
    pub fn fat_entry_offset(&self, cluster: u32) -> u64 {
        let bytes_per_sector = self.bytes_per_sector as u64;
        let byte_offset = cluster as u64 * 4;
        let fat_sector = self.reserved_sectors as u64 + byte_offset / bytes_per_sector;
        fat_sector * bytes_per_sector + byte_offset % bytes_per_sector
    }
}
