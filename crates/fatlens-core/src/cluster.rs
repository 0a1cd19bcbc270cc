use crate::error::{VolumeError, VolumeResult};
use crate::geometry::Geometry;
use alloc::format;

/// Bounds-checked view of data-region clusters in a resident image.
#[derive(Clone, Copy)]
pub struct ClusterReader<'a> {
    image: &'a [u8],
    geometry: &'a Geometry,
}

impl<'a> ClusterReader<'a> {
    pub fn new(image: &'a [u8], geometry: &'a Geometry) -> Self {
        Self { image, geometry }
    }

    /// Borrow the `cluster_bytes()` long region that backs `cluster`.
    pub fn read(&self, cluster: u32) -> VolumeResult<&'a [u8]> {
        let start = self
            .geometry
            .cluster_offset(cluster)
            .ok_or_else(|| VolumeError::corrupt(format!("invalid cluster {cluster}")))?;
        let end = start
            .checked_add(self.geometry.cluster_bytes())
            .filter(|end| *end <= self.image.len() as u64)
            .ok_or_else(|| {
                VolumeError::corrupt(format!("cluster {cluster} lies beyond the image"))
            })?;
        Ok(&self.image[start as usize..end as usize])
    }
}
