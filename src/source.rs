//! Byte sources for raw tag extraction
//!
//! A [`RawTagSource`] hands out the prefix of an image, growing a single buffer on
//! demand. Bytes that have been fetched once are never requested again, so EXIF
//! decoding and the XMP scan can share one read path for the same image.
//!
//! - Local files are reopened for each read and closed before it returns
//! - Remote objects are read with explicit byte-range requests

use crate::error::{Error, Result};
use crate::handle::ImageHandle;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Chunk size for growing reads (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// Upper bound on bytes accumulated while scanning for a metadata packet (256 MB)
///
/// Legitimate XMP packets sit well inside the first few megabytes of an image.
pub const MAX_SCAN_BYTES: usize = 256 * 1024 * 1024;

/// A byte range in a file (offset and size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// Offset from start of file
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

impl ByteRange {
    /// Create a new byte range
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset of this range (exclusive), saturating at `u64::MAX`
    pub fn end_offset(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Value for an HTTP `Range` header (inclusive end, open-ended when unbounded)
    pub fn header_value(&self) -> String {
        match self.offset.checked_add(self.size) {
            Some(end) if self.size > 0 && end != u64::MAX => {
                format!("bytes={}-{}", self.offset, end - 1)
            }
            _ => format!("bytes={}-", self.offset),
        }
    }
}

/// Prefix reads over an image's raw bytes.
pub trait RawTagSource: Send {
    /// Return bytes `[0, n)`, or fewer if the stream ends first.
    ///
    /// Bytes already held are reused; only the missing tail is fetched.
    fn read_up_to(&mut self, n: usize) -> Result<&[u8]>;

    /// True once a read has come back short
    fn is_exhausted(&self) -> bool;

    /// Number of bytes held so far
    fn buffered(&self) -> usize;
}

/// Byte-range reads against an object store
pub trait RangeFetch: Send + Sync {
    /// Fetch `range` of `bucket/key`.
    ///
    /// Returns fewer bytes than requested only at the end of the object (possibly none).
    fn fetch(&self, bucket: &str, key: &str, role_arn: Option<&str>, range: ByteRange)
        -> Result<Vec<u8>>;
}

/// Open a byte source for an image handle.
///
/// Remote handles need a `fetcher`; local handles ignore it.
pub fn open_source(
    handle: &ImageHandle,
    fetcher: Option<Arc<dyn RangeFetch>>,
) -> Result<Box<dyn RawTagSource>> {
    match handle {
        ImageHandle::Local(path) => Ok(Box::new(LocalSource::open(path.clone())?)),
        ImageHandle::Remote {
            bucket,
            key,
            role_arn,
        } => {
            let fetcher = fetcher.ok_or_else(|| Error::SourceUnavailable {
                source_name: handle.to_string(),
                reason: "no range fetcher configured for remote objects".into(),
            })?;
            Ok(Box::new(RemoteSource::new(
                bucket.clone(),
                key.clone(),
                role_arn.clone(),
                fetcher,
            )))
        }
    }
}

/// Monotonically growing prefix buffer
#[derive(Debug, Default)]
struct GrowingBuffer {
    data: Vec<u8>,
    exhausted: bool,
}

impl GrowingBuffer {
    /// The range still needed to satisfy a read of `n` bytes, if any
    fn missing(&self, n: usize) -> Option<ByteRange> {
        if self.exhausted || self.data.len() >= n {
            return None;
        }
        let held = self.data.len();
        Some(ByteRange::new(held as u64, (n - held) as u64))
    }

    fn append(&mut self, bytes: &[u8], requested: u64) {
        if (bytes.len() as u64) < requested {
            self.exhausted = true;
        }
        self.data.extend_from_slice(bytes);
    }

    fn view(&self, n: usize) -> &[u8] {
        &self.data[..n.min(self.data.len())]
    }
}

/// A local file, reopened for each growing read
#[derive(Debug)]
pub struct LocalSource {
    path: PathBuf,
    buffer: GrowingBuffer,
}

impl LocalSource {
    /// Check that the file can be opened and create the source
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        File::open(&path).map_err(|e| unavailable(&path, e))?;
        Ok(Self {
            path,
            buffer: GrowingBuffer::default(),
        })
    }
}

fn unavailable(path: &std::path::Path, err: std::io::Error) -> Error {
    Error::SourceUnavailable {
        source_name: path.display().to_string(),
        reason: err.to_string(),
    }
}

impl RawTagSource for LocalSource {
    fn read_up_to(&mut self, n: usize) -> Result<&[u8]> {
        if let Some(range) = self.buffer.missing(n) {
            let file = File::open(&self.path).map_err(|e| unavailable(&self.path, e))?;
            let mut reader = BufReader::new(file);
            reader.seek(SeekFrom::Start(range.offset))?;
            let mut chunk = Vec::new();
            reader.take(range.size).read_to_end(&mut chunk)?;
            debug!(
                "read {} bytes at offset {} from {}",
                chunk.len(),
                range.offset,
                self.path.display()
            );
            self.buffer.append(&chunk, range.size);
        }
        Ok(self.buffer.view(n))
    }

    fn is_exhausted(&self) -> bool {
        self.buffer.exhausted
    }

    fn buffered(&self) -> usize {
        self.buffer.data.len()
    }
}

/// A remote object read with explicit byte-range requests
pub struct RemoteSource {
    bucket: String,
    key: String,
    role_arn: Option<String>,
    fetcher: Arc<dyn RangeFetch>,
    buffer: GrowingBuffer,
}

impl RemoteSource {
    pub fn new(
        bucket: String,
        key: String,
        role_arn: Option<String>,
        fetcher: Arc<dyn RangeFetch>,
    ) -> Self {
        Self {
            bucket,
            key,
            role_arn,
            fetcher,
            buffer: GrowingBuffer::default(),
        }
    }
}

impl RawTagSource for RemoteSource {
    fn read_up_to(&mut self, n: usize) -> Result<&[u8]> {
        if let Some(range) = self.buffer.missing(n) {
            let chunk =
                self.fetcher
                    .fetch(&self.bucket, &self.key, self.role_arn.as_deref(), range)?;
            debug!(
                "fetched {} ({} bytes) from {}/{}",
                range.header_value(),
                chunk.len(),
                self.bucket,
                self.key
            );
            self.buffer.append(&chunk, range.size);
        }
        Ok(self.buffer.view(n))
    }

    fn is_exhausted(&self) -> bool {
        self.buffer.exhausted
    }

    fn buffered(&self) -> usize {
        self.buffer.data.len()
    }
}

/// An in-memory image, mainly for callers that already hold the bytes
#[derive(Debug)]
pub struct MemorySource {
    data: Vec<u8>,
    served: usize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, served: 0 }
    }
}

impl RawTagSource for MemorySource {
    fn read_up_to(&mut self, n: usize) -> Result<&[u8]> {
        let end = n.min(self.data.len());
        self.served = self.served.max(end);
        Ok(&self.data[..end])
    }

    fn is_exhausted(&self) -> bool {
        self.served >= self.data.len()
    }

    fn buffered(&self) -> usize {
        self.served
    }
}

/// Range reads over plain HTTP(S), path-style: `{endpoint}/{bucket}/{key}`
pub struct HttpRangeFetcher {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpRangeFetcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), bucket, key)
    }
}

impl RangeFetch for HttpRangeFetcher {
    fn fetch(
        &self,
        bucket: &str,
        key: &str,
        role_arn: Option<&str>,
        range: ByteRange,
    ) -> Result<Vec<u8>> {
        let url = self.url(bucket, key);
        let object_unavailable = |reason: String| Error::SourceUnavailable {
            source_name: url.clone(),
            reason,
        };
        if let Some(role) = role_arn {
            debug!("range read of {} under role {}", url, role);
        }

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::RANGE, range.header_value())
            .send()
            .map_err(|e| object_unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(object_unavailable(format!("HTTP {}", status)));
        }
        let partial = status == reqwest::StatusCode::PARTIAL_CONTENT;
        let body = response
            .bytes()
            .map_err(|e| object_unavailable(e.to_string()))?;

        if partial {
            return Ok(body.to_vec());
        }
        // Server ignored the Range header and sent the whole object
        let start = (range.offset as usize).min(body.len());
        let end = (range.end_offset().min(body.len() as u64)) as usize;
        Ok(body[start..end].to_vec())
    }
}
