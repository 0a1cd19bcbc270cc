use alloc::string::String;
use core::fmt;

pub type VolumeResult<T> = core::result::Result<T, VolumeError>;

/// Describes the failure category for volume operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeErrorKind {
    /// The instance has no mounted image.
    NotMounted,
    /// `mount` was called on an instance that already holds an image.
    AlreadyMounted,
    /// The backing image could not be read.
    Io,
    /// Path resolution failed.
    NotFound,
    /// The path resolved to a directory where a file was required.
    InvalidTarget,
    /// Unknown or already closed descriptor.
    InvalidDescriptor,
    /// On-disk structures point outside the image or form an invalid chain.
    CorruptVolume,
}

/// Error surfaced by [`Volume`](crate::Volume) operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeError {
    kind: VolumeErrorKind,
    message: Option<String>,
}

impl VolumeError {
    pub const fn new(kind: VolumeErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: VolumeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::with_message(VolumeErrorKind::CorruptVolume, message)
    }

    pub fn kind(&self) -> VolumeErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for VolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VolumeError {}

impl From<VolumeErrorKind> for VolumeError {
    fn from(kind: VolumeErrorKind) -> Self {
        Self::new(kind)
    }
}
