//! Image addressing: local paths and object-store references

use std::fmt;
use std::path::{Path, PathBuf};

const S3_SCHEME: &str = "s3://";

/// Where an image lives. Created by the caller and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageHandle {
    /// A file on the local filesystem
    Local(PathBuf),
    /// An object in a bucket, optionally read through an assumed role
    Remote {
        bucket: String,
        key: String,
        role_arn: Option<String>,
    },
}

impl ImageHandle {
    /// Parse a path or `s3://bucket/key` URI.
    ///
    /// Anything that is not an `s3://` URI is treated as a local path.
    ///
    /// # Example
    ///
    /// ```
    /// use aerial_meta::ImageHandle;
    ///
    /// let remote = ImageHandle::parse("s3://flights/2024/IMG_0001.jpg");
    /// assert_eq!(remote.file_name(), Some("IMG_0001.jpg"));
    /// assert!(!remote.is_local());
    /// ```
    pub fn parse(location: &str) -> Self {
        match location.strip_prefix(S3_SCHEME) {
            Some(rest) => {
                let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
                Self::Remote {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    role_arn: None,
                }
            }
            None => Self::Local(PathBuf::from(location)),
        }
    }

    /// Create a local handle
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self::Local(path.as_ref().to_path_buf())
    }

    /// Create a remote handle
    pub fn remote(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Remote {
            bucket: bucket.into(),
            key: key.into(),
            role_arn: None,
        }
    }

    /// Attach an assumed-role credential reference (remote handles only)
    pub fn with_role(self, role: impl Into<String>) -> Self {
        match self {
            Self::Remote { bucket, key, .. } => Self::Remote {
                bucket,
                key,
                role_arn: Some(role.into()),
            },
            local => local,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Local path, if this is a local image
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote { .. } => None,
        }
    }

    /// Final path component (file name or last key segment)
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::Local(path) => path.file_name().and_then(|n| n.to_str()),
            Self::Remote { key, .. } => key.rsplit('/').next().filter(|s| !s.is_empty()),
        }
    }

    /// Lower-cased file extension without the dot
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { bucket, key, .. } => write!(f, "{}{}/{}", S3_SCHEME, bucket, key),
        }
    }
}

impl From<&str> for ImageHandle {
    fn from(location: &str) -> Self {
        Self::parse(location)
    }
}

impl From<PathBuf> for ImageHandle {
    fn from(path: PathBuf) -> Self {
        Self::Local(path)
    }
}

impl From<&Path> for ImageHandle {
    fn from(path: &Path) -> Self {
        Self::local(path)
    }
}
