use crate::cluster::ClusterReader;
use crate::error::VolumeResult;
use crate::fat::FatTable;
use alloc::string::String;
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use core::ops::ControlFlow;

/// Size of one directory slot in bytes.
pub const DIR_ENTRY_LEN: usize = 32;
/// Name byte marking the end of a directory's live region.
pub const SLOT_END: u8 = 0x00;
/// Name byte marking a deleted slot.
pub const SLOT_DELETED: u8 = 0xE5;

bitflags! {
    /// Directory entry attribute byte.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const LONG_NAME = 0x0F;
        /// Every defined bit. The top two bits of the byte are reserved and dropped
        /// on decode.
        const LONG_NAME_MASK = 0x3F;
    }
}

/// Raw timestamp words of a short entry. Not interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub nt_reserved: u8,
    pub created_tenths: u8,
    pub created_time: u16,
    pub created_date: u16,
    pub accessed_date: u16,
    pub modified_time: u16,
    pub modified_date: u16,
}

/// Decoded 8.3 directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortEntry {
    name: [u8; 11],
    attributes: Attributes,
    timestamps: Timestamps,
    first_cluster: u32,
    size: u32,
}

impl ShortEntry {
    fn decode(slot: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&slot[..11]);
        let attr = slot[11] & Attributes::LONG_NAME_MASK.bits();
        let cluster_hi = LittleEndian::read_u16(&slot[20..]) as u32;
        let cluster_lo = LittleEndian::read_u16(&slot[26..]) as u32;
        Self {
            name,
            attributes: Attributes::from_bits_retain(attr),
            timestamps: Timestamps {
                nt_reserved: slot[12],
                created_tenths: slot[13],
                created_time: LittleEndian::read_u16(&slot[14..]),
                created_date: LittleEndian::read_u16(&slot[16..]),
                accessed_date: LittleEndian::read_u16(&slot[18..]),
                modified_time: LittleEndian::read_u16(&slot[22..]),
                modified_date: LittleEndian::read_u16(&slot[24..]),
            },
            first_cluster: ((cluster_hi << 16) | cluster_lo) & crate::fat::FAT_ENTRY_MASK,
            size: LittleEndian::read_u32(&slot[28..]),
        }
    }

    /// Space-padded 11-byte name as stored on disk.
    pub fn raw_name(&self) -> &[u8; 11] {
        &self.name
    }

    /// Base name without pad spaces.
    pub fn base(&self) -> &[u8] {
        trim_padding(&self.name[..8])
    }

    /// Extension without pad spaces; empty when blank.
    pub fn extension(&self) -> &[u8] {
        trim_padding(&self.name[8..])
    }

    /// Reconstructed `NAME.EXT` form, e.g. `"HELLO   TXT"` → `"HELLO.TXT"`.
    pub fn name_bytes(&self) -> ([u8; 12], usize) {
        let mut buf = [0u8; 12];
        let base = self.base();
        buf[..base.len()].copy_from_slice(base);
        let mut len = base.len();
        let ext = self.extension();
        if !ext.is_empty() {
            buf[len] = b'.';
            len += 1;
            buf[len..len + ext.len()].copy_from_slice(ext);
            len += ext.len();
        }
        (buf, len)
    }

    /// Display form of [`name_bytes`](Self::name_bytes); non-ASCII bytes are replaced.
    pub fn short_name(&self) -> String {
        let (buf, len) = self.name_bytes();
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }

    /// Case-insensitive comparison of the reconstructed name against a path component.
    pub fn matches(&self, component: &str) -> bool {
        let (buf, len) = self.name_bytes();
        buf[..len].eq_ignore_ascii_case(component.as_bytes())
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes.contains(Attributes::VOLUME_ID)
    }

    pub fn timestamps(&self) -> Timestamps {
        self.timestamps
    }

    /// First cluster, high and low words combined and masked to 28 bits.
    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    /// File size in bytes; zero for directories.
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Long-filename fragment. Fields are kept raw; names are never assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongFragment {
    pub ordinal: u8,
    pub name1: [u8; 10],
    pub attributes: u8,
    pub kind: u8,
    pub checksum: u8,
    pub name2: [u8; 12],
    pub first_cluster_lo: u16,
    pub name3: [u8; 4],
}

impl LongFragment {
    fn decode(slot: &[u8]) -> Self {
        let mut name1 = [0u8; 10];
        name1.copy_from_slice(&slot[1..11]);
        let mut name2 = [0u8; 12];
        name2.copy_from_slice(&slot[14..26]);
        let mut name3 = [0u8; 4];
        name3.copy_from_slice(&slot[28..32]);
        Self {
            ordinal: slot[0],
            name1,
            attributes: slot[11],
            kind: slot[12],
            checksum: slot[13],
            name2,
            first_cluster_lo: LittleEndian::read_u16(&slot[26..]),
            name3,
        }
    }

    /// Sequence number with the last-fragment flag stripped.
    pub fn sequence(&self) -> u8 {
        self.ordinal & 0x1F
    }

    /// Whether this is the last (highest-numbered) fragment of its name.
    pub fn is_last(&self) -> bool {
        self.ordinal & 0x40 != 0
    }
}

/// A live directory slot, discriminated by its attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEntry {
    Short(ShortEntry),
    Long(LongFragment),
}

impl RawEntry {
    /// Decode a 32-byte slot. Callers filter end and deleted slots first.
    pub fn decode(slot: &[u8]) -> Self {
        let attr = slot[11];
        if attr & Attributes::LONG_NAME.bits() == Attributes::LONG_NAME.bits() {
            RawEntry::Long(LongFragment::decode(slot))
        } else {
            RawEntry::Short(ShortEntry::decode(slot))
        }
    }

    pub fn as_short(&self) -> Option<&ShortEntry> {
        match self {
            RawEntry::Short(entry) => Some(entry),
            RawEntry::Long(_) => None,
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, RawEntry::Long(_))
    }
}

/// Live entries of one directory cluster: stops at the first end slot and skips deleted
/// slots.
pub fn live_entries(cluster: &[u8]) -> impl Iterator<Item = RawEntry> + '_ {
    cluster
        .chunks_exact(DIR_ENTRY_LEN)
        .take_while(|slot| slot[0] != SLOT_END)
        .filter(|slot| slot[0] != SLOT_DELETED)
        .map(RawEntry::decode)
}

/// Walk every cluster of the directory starting at `start` and feed its live entries
/// to `visit` until it breaks. An end slot only ends the scan of its own cluster.
pub(crate) fn scan_directory<T>(
    fat: &FatTable<'_>,
    reader: &ClusterReader<'_>,
    start: u32,
    mut visit: impl FnMut(RawEntry) -> ControlFlow<T>,
) -> VolumeResult<Option<T>> {
    for cluster in fat.chain(start) {
        let data = reader.read(cluster?)?;
        for entry in live_entries(data) {
            if let ControlFlow::Break(found) = visit(entry) {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &field[..end]
}
