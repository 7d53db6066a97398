use bytes::Bytes;
use futures::stream::BoxStream;

use crate::CloudError;

pub const STORAGE_CLASS_STANDARD: &str = "STANDARD";
pub const STORAGE_CLASS_GLACIER: &str = "GLACIER";
pub const STORAGE_CLASS_DEEP_ARCHIVE: &str = "DEEP_ARCHIVE";

/// One object entry from a listing page.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    /// Entity tag as returned by the backend, quotes included. `None` when
    /// the backend omitted it, which the scanner treats as a manifest error.
    pub etag: Option<String>,
    /// `None` means the backend omitted the class; callers default to
    /// [`STORAGE_CLASS_STANDARD`].
    pub storage_class: Option<String>,
    pub last_modified: Option<String>,
}

/// One page of a current-objects listing.
#[derive(Debug, Clone)]
pub struct ObjectPage {
    /// `None` when the backend response carried no object list at all.
    pub contents: Option<Vec<ObjectEntry>>,
    /// Backend-reported number of keys in this page.
    pub key_count: Option<u64>,
    pub next_token: Option<String>,
}

/// A `{Key, VersionId}` pair identifying one object version or delete marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRef {
    pub key: String,
    pub version_id: String,
}

/// One page of a versions listing.
#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    pub versions: Vec<VersionRef>,
    pub delete_markers: Vec<VersionRef>,
    pub next_token: Option<String>,
}

/// An in-progress multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUploadRef {
    pub key: String,
    pub upload_id: String,
}

/// One page of a multipart-uploads listing.
#[derive(Debug, Clone, Default)]
pub struct MultipartPage {
    pub uploads: Vec<MultipartUploadRef>,
    pub next_token: Option<String>,
}

/// A streaming object body plus the metadata the downloader needs.
pub struct ObjectBody {
    pub stream: BoxStream<'static, Result<Bytes, CloudError>>,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
}

/// Response of a head request.
#[derive(Debug, Clone, Default)]
pub struct HeadObjectInfo {
    /// Raw `Restore` header, e.g. `ongoing-request="false", expiry-date=…`.
    /// Absent for objects without a pending or completed restore.
    pub restore: Option<String>,
}

/// Outcome of a bulk delete.
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub deleted: Vec<VersionRef>,
    pub errors: Vec<DeleteErrorEntry>,
}

/// One failed entry of a bulk delete.
#[derive(Debug, Clone)]
pub struct DeleteErrorEntry {
    pub key: String,
    pub version_id: String,
    pub code: String,
    pub message: String,
}

/// Retrieval tier for archive restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTier {
    Standard,
    Bulk,
    Expedited,
}

impl RestoreTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreTier::Standard => "Standard",
            RestoreTier::Bulk => "Bulk",
            RestoreTier::Expedited => "Expedited",
        }
    }
}

impl std::str::FromStr for RestoreTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Standard" => Ok(RestoreTier::Standard),
            "Bulk" => Ok(RestoreTier::Bulk),
            "Expedited" => Ok(RestoreTier::Expedited),
            other => Err(format!("unknown restore tier: {}", other)),
        }
    }
}
