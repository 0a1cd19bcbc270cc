//! Path tokenizing and resolution against directory cluster chains.

use crate::cluster::ClusterReader;
use crate::dir::{RawEntry, ShortEntry, scan_directory};
use crate::error::{VolumeError, VolumeErrorKind, VolumeResult};
use crate::fat::FatTable;
use alloc::vec::Vec;
use core::ops::ControlFlow;
use tracing::trace;

/// Normalized components of a volume path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathComponents<'p> {
    parts: Vec<&'p str>,
}

impl<'p> PathComponents<'p> {
    /// Split on '/', drop empty and "." components and let ".." pop its predecessor.
    /// A ".." with nothing left to pop is dropped.
    pub fn parse(path: &'p str) -> Self {
        let mut parts = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        Self { parts }
    }

    /// True when the path names the root directory.
    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'p str> + '_ {
        self.parts.iter().copied()
    }

    /// Only the final component may contain a '.'.
    fn check_intermediates(&self) -> VolumeResult<()> {
        let intermediates = &self.parts[..self.parts.len().saturating_sub(1)];
        if let Some(part) = intermediates.iter().find(|part| part.contains('.')) {
            return Err(VolumeError::with_message(
                VolumeErrorKind::NotFound,
                alloc::format!("intermediate component {part:?} contains '.'"),
            ));
        }
        Ok(())
    }
}

/// Walks directory chains from the root cluster to the entry named by a path.
pub struct PathResolver<'a> {
    fat: FatTable<'a>,
    reader: ClusterReader<'a>,
    root_cluster: u32,
}

impl<'a> PathResolver<'a> {
    pub fn new(fat: FatTable<'a>, reader: ClusterReader<'a>, root_cluster: u32) -> Self {
        Self {
            fat,
            reader,
            root_cluster,
        }
    }

    /// Resolve `path` to its short entry. The root has no entry and yields `NotFound`.
    pub fn resolve(&self, path: &str) -> VolumeResult<ShortEntry> {
        let components = PathComponents::parse(path);
        if components.is_root() {
            return Err(VolumeError::with_message(
                VolumeErrorKind::NotFound,
                "root directory has no entry",
            ));
        }
        components.check_intermediates()?;

        let mut cluster = self.root_cluster;
        let mut found: Option<ShortEntry> = None;
        for component in components.iter() {
            // An entry without clusters (empty file, volume label) has nothing to
            // descend into.
            if found.is_some() && cluster < 2 {
                return Err(VolumeError::with_message(
                    VolumeErrorKind::NotFound,
                    alloc::format!("{component:?} not found"),
                ));
            }
            // Intermediate matches are descended into without checking the
            // DIRECTORY attribute.
            let entry = self.find_in_directory(cluster, component)?.ok_or_else(|| {
                VolumeError::with_message(
                    VolumeErrorKind::NotFound,
                    alloc::format!("{component:?} not found"),
                )
            })?;
            trace!(component, cluster = entry.first_cluster(), "path component matched");
            cluster = entry.first_cluster();
            found = Some(entry);
        }
        found.ok_or_else(|| VolumeError::new(VolumeErrorKind::NotFound))
    }

    /// First short entry of the directory at `start` whose name matches `name`.
    pub fn find_in_directory(&self, start: u32, name: &str) -> VolumeResult<Option<ShortEntry>> {
        scan_directory(&self.fat, &self.reader, start, |entry| match entry {
            RawEntry::Short(short) if short.matches(name) => ControlFlow::Break(short),
            _ => ControlFlow::Continue(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::testing::ImageBuilder;

    fn parts(path: &str) -> Vec<&str> {
        PathComponents::parse(path).iter().collect()
    }

    #[test]
    fn tokenizes_on_slashes() {
        assert_eq!(parts("/DIR1/DIR2/FILE.BIN"), ["DIR1", "DIR2", "FILE.BIN"]);
        assert_eq!(parts("DIR1//FILE.BIN/"), ["DIR1", "FILE.BIN"]);
        assert!(PathComponents::parse("").is_root());
        assert!(PathComponents::parse("/").is_root());
        assert!(PathComponents::parse("///").is_root());
    }

    #[test]
    fn dot_components_are_removed() {
        assert_eq!(parts("./A/./B.TXT"), ["A", "B.TXT"]);
        assert_eq!(parts("A/./././B"), ["A", "B"]);
        assert!(PathComponents::parse("/./").is_root());
    }

    #[test]
    fn dotdot_pops_previous_component() {
        assert_eq!(parts("A/../B.TXT"), ["B.TXT"]);
        assert_eq!(parts("A/B/../../C"), ["C"]);
        assert_eq!(parts("A/B/../C"), ["A", "C"]);
    }

    #[test]
    fn leading_dotdot_is_dropped() {
        assert_eq!(parts("../A.TXT"), ["A.TXT"]);
        assert_eq!(parts("/../../A/B"), ["A", "B"]);
    }

    fn nested_image() -> Vec<u8> {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        let dir1 = builder.dir(root, "DIR1");
        let dir2 = builder.dir(dir1, "DIR2");
        builder.file(dir2, "FILE.BIN", b"nested");
        builder.file(root, "FOO.TXT", b"foo");
        builder.file(root, "DOT.D", b"dotted");
        builder.build()
    }

    fn with_resolver<T>(image: &[u8], f: impl FnOnce(&PathResolver<'_>) -> T) -> T {
        let geom = Geometry::parse(image).unwrap();
        let resolver = PathResolver::new(
            FatTable::new(image, &geom),
            ClusterReader::new(image, &geom),
            geom.root_cluster(),
        );
        f(&resolver)
    }

    #[test]
    fn resolves_nested_path() {
        let image = nested_image();
        with_resolver(&image, |resolver| {
            let entry = resolver.resolve("/DIR1/DIR2/FILE.BIN").unwrap();
            assert_eq!(entry.size(), 6);
            assert!(!entry.is_directory());
            let dir = resolver.resolve("DIR1/DIR2").unwrap();
            assert!(dir.is_directory());
        });
    }

    #[test]
    fn case_variants_resolve_to_same_entry() {
        let image = nested_image();
        with_resolver(&image, |resolver| {
            let a = resolver.resolve("FOO.TXT").unwrap();
            let b = resolver.resolve("foo.txt").unwrap();
            let c = resolver.resolve("/Foo.Txt").unwrap();
            assert_eq!(a, b);
            assert_eq!(b, c);
        });
    }

    #[test]
    fn root_has_no_entry() {
        let image = nested_image();
        with_resolver(&image, |resolver| {
            for path in ["", "/", "/./", "DIR1/.."] {
                let err = resolver.resolve(path).unwrap_err();
                assert_eq!(err.kind(), VolumeErrorKind::NotFound, "path {path:?}");
            }
        });
    }

    #[test]
    fn missing_component_is_not_found() {
        let image = nested_image();
        with_resolver(&image, |resolver| {
            let err = resolver.resolve("/DIR1/NOPE/FILE.BIN").unwrap_err();
            assert_eq!(err.kind(), VolumeErrorKind::NotFound);
            let err = resolver.resolve("/NOSUCH.TXT").unwrap_err();
            assert_eq!(err.kind(), VolumeErrorKind::NotFound);
        });
    }

    #[test]
    fn clusterless_entries_cannot_be_descended() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        builder.file(root, "MAKEFILE", &[]);
        builder.volume_label(root, "LABEL");
        let image = builder.build();
        with_resolver(&image, |resolver| {
            assert_eq!(resolver.resolve("MAKEFILE").unwrap().first_cluster(), 0);
            for path in ["MAKEFILE/X", "LABEL/X", "/LABEL/A/B"] {
                let err = resolver.resolve(path).unwrap_err();
                assert_eq!(err.kind(), VolumeErrorKind::NotFound, "path {path:?}");
            }
        });
    }

    #[test]
    fn dotted_intermediate_component_is_rejected() {
        let image = nested_image();
        with_resolver(&image, |resolver| {
            assert!(resolver.resolve("DOT.D").is_ok());
            let err = resolver.resolve("DOT.D/ANY").unwrap_err();
            assert_eq!(err.kind(), VolumeErrorKind::NotFound);
        });
    }

    #[test]
    fn dotdot_navigation_resolves() {
        let image = nested_image();
        with_resolver(&image, |resolver| {
            let entry = resolver.resolve("DIR1/DIR2/../DIR2/./FILE.BIN").unwrap();
            assert_eq!(entry.size(), 6);
            assert!(resolver.resolve("../FOO.TXT").is_ok());
        });
    }

    #[test]
    fn resolves_through_multi_cluster_directories() {
        let mut builder = ImageBuilder::new().fragmented();
        let root = builder.root();
        let dir1 = builder.dir(root, "DIR1");
        // 16 slots per 512-byte cluster; push DIR2 into DIR1's third cluster.
        for i in 0..40 {
            builder.file(dir1, &alloc::format!("F{i}.DAT"), &[i as u8]);
        }
        let dir2 = builder.dir(dir1, "DIR2");
        for i in 0..20 {
            builder.deleted(dir2, &alloc::format!("OLD{i}.TMP"));
        }
        builder.file(dir2, "FILE.BIN", b"deep");
        let image = builder.build();
        with_resolver(&image, |resolver| {
            let entry = resolver.resolve("/DIR1/DIR2/FILE.BIN").unwrap();
            assert_eq!(entry.size(), 4);
            assert!(resolver.resolve("/dir1/f39.dat").is_ok());
        });
    }

    #[test]
    fn skips_deleted_and_long_slots() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        builder.deleted(root, "GONE.TXT");
        builder.long_fragment(root, 0x41, 0x12);
        builder.file(root, "KEEP.TXT", b"k");
        let image = builder.build();
        with_resolver(&image, |resolver| {
            assert_eq!(
                resolver.resolve("GONE.TXT").unwrap_err().kind(),
                VolumeErrorKind::NotFound
            );
            assert!(resolver.resolve("KEEP.TXT").is_ok());
        });
    }
}
