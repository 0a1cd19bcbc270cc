//! Synthesizes small FAT32 images for tests.
//!
//! The layout is deliberately simple: one boot sector region, `fat_count` identical
//! FATs and a data region sized to exactly the clusters the tree needs plus a few
//! spare ones. Directories and files receive their clusters in creation order,
//! root first.

use alloc::vec;
use alloc::vec::Vec;

const FAT_MEDIA: u32 = 0x0FFF_FFF8;
const FAT_EOC: u32 = 0x0FFF_FFFF;

/// Directory handle inside an [`ImageBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirId(usize);

enum Node {
    Dir { slots: Vec<Slot> },
    File { data: Vec<u8> },
}

enum Slot {
    Entry {
        name: [u8; 11],
        attr: u8,
        target: Option<usize>,
    },
    Deleted {
        name: [u8; 11],
    },
    Long {
        ordinal: u8,
        checksum: u8,
    },
    End,
}

/// Builder for an in-memory FAT32 volume.
pub struct ImageBuilder {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fat_count: u8,
    spare_clusters: u32,
    fragmented: bool,
    nodes: Vec<Node>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// 512-byte sectors, one sector per cluster, two FATs and an empty root.
    pub fn new() -> Self {
        Self {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 32,
            fat_count: 2,
            spare_clusters: 4,
            fragmented: false,
            nodes: vec![Node::Dir { slots: Vec::new() }],
        }
    }

    pub fn bytes_per_sector(mut self, bytes: u16) -> Self {
        self.bytes_per_sector = bytes;
        self
    }

    pub fn sectors_per_cluster(mut self, sectors: u8) -> Self {
        self.sectors_per_cluster = sectors;
        self
    }

    pub fn fat_count(mut self, count: u8) -> Self {
        self.fat_count = count;
        self
    }

    /// Unused clusters appended to the data region.
    pub fn spare_clusters(mut self, clusters: u32) -> Self {
        self.spare_clusters = clusters;
        self
    }

    /// Hand out clusters from the top of the data region downwards, so that no chain
    /// is laid out in ascending order.
    pub fn fragmented(mut self) -> Self {
        self.fragmented = true;
        self
    }

    pub fn root(&self) -> DirId {
        DirId(0)
    }

    /// Add a subdirectory, including its "." and ".." entries.
    pub fn dir(&mut self, parent: DirId, name: &str) -> DirId {
        let id = self.nodes.len();
        let parent_target = if parent.0 == 0 { None } else { Some(parent.0) };
        self.nodes.push(Node::Dir {
            slots: vec![
                Slot::Entry {
                    name: encode_name("."),
                    attr: 0x10,
                    target: Some(id),
                },
                Slot::Entry {
                    name: encode_name(".."),
                    attr: 0x10,
                    target: parent_target,
                },
            ],
        });
        self.push_slot(
            parent,
            Slot::Entry {
                name: encode_name(name),
                attr: 0x10,
                target: Some(id),
            },
        );
        DirId(id)
    }

    pub fn file(&mut self, dir: DirId, name: &str, data: &[u8]) {
        let id = self.nodes.len();
        self.nodes.push(Node::File {
            data: data.to_vec(),
        });
        self.push_slot(
            dir,
            Slot::Entry {
                name: encode_name(name),
                attr: 0x20,
                target: Some(id),
            },
        );
    }

    /// A slot whose first name byte is 0xE5.
    pub fn deleted(&mut self, dir: DirId, name: &str) {
        self.push_slot(
            dir,
            Slot::Deleted {
                name: encode_name(name),
            },
        );
    }

    pub fn long_fragment(&mut self, dir: DirId, ordinal: u8, checksum: u8) {
        self.push_slot(dir, Slot::Long { ordinal, checksum });
    }

    /// An all-zero slot; later slots of the same cluster are not live.
    pub fn end_marker(&mut self, dir: DirId) {
        self.push_slot(dir, Slot::End);
    }

    pub fn volume_label(&mut self, dir: DirId, label: &str) {
        let mut name = [b' '; 11];
        for (idx, byte) in label.bytes().take(11).enumerate() {
            name[idx] = byte.to_ascii_uppercase();
        }
        self.push_slot(
            dir,
            Slot::Entry {
                name,
                attr: 0x08,
                target: None,
            },
        );
    }

    fn push_slot(&mut self, dir: DirId, slot: Slot) {
        match &mut self.nodes[dir.0] {
            Node::Dir { slots } => slots.push(slot),
            Node::File { .. } => panic!("{dir:?} is not a directory"),
        }
    }

    fn cluster_bytes(&self) -> usize {
        self.bytes_per_sector as usize * self.sectors_per_cluster as usize
    }

    fn clusters_needed(&self, node: &Node) -> usize {
        let bytes = match node {
            Node::Dir { slots } => (slots.len() * 32).max(1),
            Node::File { data } => data.len(),
        };
        bytes.div_ceil(self.cluster_bytes())
    }

    /// Lay out the tree and return the raw image bytes.
    pub fn build(&self) -> Vec<u8> {
        let bps = self.bytes_per_sector as usize;
        let cluster_bytes = self.cluster_bytes();
        let used: usize = self.nodes.iter().map(|n| self.clusters_needed(n)).sum();
        let data_clusters = used as u32 + self.spare_clusters;

        let mut cursor = if self.fragmented { data_clusters + 1 } else { 2 };
        let chains: Vec<Vec<u32>> = self
            .nodes
            .iter()
            .map(|node| {
                (0..self.clusters_needed(node))
                    .map(|_| {
                        let cluster = cursor;
                        if self.fragmented {
                            cursor -= 1;
                        } else {
                            cursor += 1;
                        }
                        cluster
                    })
                    .collect()
            })
            .collect();

        let fat_sectors = ((data_clusters as usize + 2) * 4).div_ceil(bps);
        let first_data_sector =
            self.reserved_sectors as usize + self.fat_count as usize * fat_sectors;
        let total_sectors =
            first_data_sector + data_clusters as usize * self.sectors_per_cluster as usize;
        let mut image = vec![0u8; total_sectors * bps];

        self.write_boot_sector(
            &mut image,
            total_sectors as u32,
            fat_sectors as u32,
            chains[0][0],
        );

        let mut fat = vec![0u32; data_clusters as usize + 2];
        fat[0] = FAT_MEDIA;
        fat[1] = FAT_EOC;
        for chain in &chains {
            for pair in chain.windows(2) {
                fat[pair[0] as usize] = pair[1];
            }
            if let Some(last) = chain.last() {
                fat[*last as usize] = FAT_EOC;
            }
        }
        for copy in 0..self.fat_count as usize {
            let start = (self.reserved_sectors as usize + copy * fat_sectors) * bps;
            for (idx, value) in fat.iter().enumerate() {
                let at = start + idx * 4;
                image[at..at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }

        let first_cluster = |target: Option<usize>| -> u32 {
            target
                .and_then(|idx| chains[idx].first().copied())
                .unwrap_or(0)
        };
        for (idx, node) in self.nodes.iter().enumerate() {
            let bytes = match node {
                Node::File { data } => data.clone(),
                Node::Dir { slots } => {
                    let mut bytes = Vec::with_capacity(slots.len() * 32);
                    for slot in slots {
                        let size = match slot {
                            Slot::Entry {
                                target: Some(t), ..
                            } => match &self.nodes[*t] {
                                Node::File { data } => data.len() as u32,
                                Node::Dir { .. } => 0,
                            },
                            _ => 0,
                        };
                        let target = match slot {
                            Slot::Entry { target, .. } => *target,
                            _ => None,
                        };
                        let encoded = encode_slot(slot, first_cluster(target), size);
                        bytes.extend_from_slice(&encoded);
                    }
                    bytes
                }
            };
            for (chunk, cluster) in bytes.chunks(cluster_bytes).zip(&chains[idx]) {
                let at = (first_data_sector
                    + (*cluster as usize - 2) * self.sectors_per_cluster as usize)
                    * bps;
                image[at..at + chunk.len()].copy_from_slice(chunk);
            }
        }
        image
    }

    fn write_boot_sector(
        &self,
        image: &mut [u8],
        total_sectors: u32,
        fat_sectors: u32,
        root: u32,
    ) {
        let buf = &mut image[..512];
        buf[0] = 0xEB;
        buf[1] = 0x58;
        buf[2] = 0x90;
        buf[3..11].copy_from_slice(b"FATLENS ");
        buf[11..13].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        buf[13] = self.sectors_per_cluster;
        buf[14..16].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        buf[16] = self.fat_count;
        buf[21] = 0xF8; // media descriptor
        buf[32..36].copy_from_slice(&total_sectors.to_le_bytes());
        buf[36..40].copy_from_slice(&fat_sectors.to_le_bytes());
        buf[44..48].copy_from_slice(&root.to_le_bytes());
        buf[48..50].copy_from_slice(&1u16.to_le_bytes()); // fsinfo
        buf[50..52].copy_from_slice(&6u16.to_le_bytes()); // backup boot sector
        buf[64] = 0x80; // drive number
        buf[66] = 0x29; // boot signature
        buf[67..71].copy_from_slice(&0x2026_1016u32.to_le_bytes());
        buf[71..82].copy_from_slice(b"NO NAME    ");
        buf[82..90].copy_from_slice(b"FAT32   ");
        buf[510] = 0x55;
        buf[511] = 0xAA;
    }
}

fn encode_slot(slot: &Slot, cluster: u32, size: u32) -> [u8; 32] {
    let mut buf = [0u8; 32];
    match slot {
        Slot::Entry { name, attr, .. } => {
            buf[..11].copy_from_slice(name);
            buf[11] = *attr;
            buf[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
            buf[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
            buf[28..32].copy_from_slice(&size.to_le_bytes());
        }
        Slot::Deleted { name } => {
            buf[..11].copy_from_slice(name);
            buf[0] = 0xE5;
            buf[11] = 0x20;
        }
        Slot::Long { ordinal, checksum } => {
            buf[0] = *ordinal;
            buf[1..11].copy_from_slice(b"l\0f\0n\0\0\0\xFF\xFF");
            buf[11] = 0x0F;
            buf[13] = *checksum;
            buf[14..26].fill(0xFF);
            buf[28..32].fill(0xFF);
        }
        Slot::End => {}
    }
    buf
}

/// Space-padded, upper-cased 8.3 name; "." and ".." are kept verbatim.
fn encode_name(name: &str) -> [u8; 11] {
    let mut out = [b' '; 11];
    if name == "." || name == ".." {
        out[..name.len()].copy_from_slice(name.as_bytes());
        return out;
    }
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    for (idx, byte) in base.bytes().take(8).enumerate() {
        out[idx] = byte.to_ascii_uppercase();
    }
    for (idx, byte) in ext.bytes().take(3).enumerate() {
        out[8 + idx] = byte.to_ascii_uppercase();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_short_names() {
        assert_eq!(&encode_name("hello.txt"), b"HELLO   TXT");
        assert_eq!(&encode_name("makefile"), b"MAKEFILE   ");
        assert_eq!(&encode_name("toolongname.rs"), b"TOOLONGNRS ");
        assert_eq!(&encode_name(".."), b"..         ");
    }

    #[test]
    fn image_length_matches_declared_sectors() {
        let mut builder = ImageBuilder::new().sectors_per_cluster(2);
        let root = builder.root();
        builder.file(root, "A.BIN", &[1; 3000]);
        let image = builder.build();
        let total = u32::from_le_bytes(image[32..36].try_into().unwrap());
        assert_eq!(image.len(), total as usize * 512);
        assert_eq!(&image[510..512], b"\x55\xAA");
    }
}
