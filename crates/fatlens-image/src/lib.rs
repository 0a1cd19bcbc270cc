use anyhow::{Context, Result};
use async_trait::async_trait;
use fatlens_core::{Volume, VolumeError, VolumeErrorKind, VolumeResult};
use std::{
    io::{self, Read},
    ops::Deref,
    path::{Path, PathBuf},
};
use tokio::{fs::OpenOptions, task};
use tracing::debug;

/// A volume image held entirely in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeImage {
    bytes: Vec<u8>,
}

impl VolumeImage {
    /// Read the whole file at `path` into memory.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_display = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .await
            .with_context(|| format!("open {} read-only", path_display))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("stat {}", path_display))?
            .len();
        let capacity = usize::try_from(len)
            .with_context(|| format!("{} is too large to load", path_display))?;

        let mut file = file.into_std().await;
        let bytes = task::spawn_blocking(move || {
            let mut bytes = Vec::with_capacity(capacity);
            file.read_to_end(&mut bytes)?;
            Ok::<_, io::Error>(bytes)
        })
        .await
        .map_err(|err| io::Error::other(err.to_string()))?
        .with_context(|| format!("read {}", path_display))?;

        debug!(path = %path_display, len = bytes.len(), "loaded volume image");
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Deref for VolumeImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for VolumeImage {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Something a volume image can be loaded from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Short description used in logs.
    fn describe(&self) -> String;

    async fn load(&self) -> Result<VolumeImage>;
}

/// Image stored in a regular file.
#[derive(Debug, Clone)]
pub struct FileImageSource {
    path: PathBuf,
}

impl FileImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ImageSource for FileImageSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn load(&self) -> Result<VolumeImage> {
        VolumeImage::open(&self.path).await
    }
}

/// Image bytes that are already resident.
#[derive(Debug, Clone)]
pub struct MemoryImageSource {
    bytes: Vec<u8>,
}

impl MemoryImageSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[async_trait]
impl ImageSource for MemoryImageSource {
    fn describe(&self) -> String {
        format!("memory:{} bytes", self.bytes.len())
    }

    async fn load(&self) -> Result<VolumeImage> {
        Ok(VolumeImage::from_bytes(self.bytes.clone()))
    }
}

/// Load an image from `source` and mount it.
///
/// A failed load is reported as [`VolumeErrorKind::Io`] carrying the full error chain.
pub async fn mount_source<S>(source: &S) -> VolumeResult<Volume<VolumeImage>>
where
    S: ImageSource + ?Sized,
{
    let image = source.load().await.map_err(io_error)?;
    let volume = Volume::with_image(image)?;
    if let Some(geometry) = volume.geometry() {
        debug!(
            source = %source.describe(),
            cluster_bytes = geometry.cluster_bytes(),
            data_clusters = geometry.data_clusters(),
            "mounted volume"
        );
    }
    Ok(volume)
}

/// Load the image file at `path` and mount it.
pub async fn mount_path(path: impl AsRef<Path>) -> VolumeResult<Volume<VolumeImage>> {
    mount_source(&FileImageSource::new(path.as_ref())).await
}

/// [`mount_path`] for callers that are not inside a tokio runtime.
pub fn mount_path_blocking(path: impl AsRef<Path>) -> VolumeResult<Volume<VolumeImage>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|err| VolumeError::with_message(VolumeErrorKind::Io, err.to_string()))?;
    runtime.block_on(mount_path(path))
}

fn io_error(err: anyhow::Error) -> VolumeError {
    VolumeError::with_message(VolumeErrorKind::Io, format!("{err:#}"))
}
