//! Object-store capability interface for the s3-evac migration engine.
//!
//! The migration core never talks to a cloud SDK directly. It consumes the
//! narrow [`ObjectStorage`] trait defined here, which is implemented twice:
//!
//! - [`S3Cloud`]: the production adapter over `aws-sdk-s3`.
//! - [`InMemoryCloud`]: a fake cloud replaying a fixed object set, used by
//!   unit tests and the `--test` smoke mode.

mod error;
mod in_memory;
mod s3;
mod types;

pub use error::CloudError;
pub use in_memory::InMemoryCloud;
pub use s3::S3Cloud;
pub use types::{
    DeleteErrorEntry, DeleteOutcome, HeadObjectInfo, MultipartPage, MultipartUploadRef,
    ObjectBody, ObjectEntry, ObjectPage, RestoreTier, VersionPage, VersionRef,
    STORAGE_CLASS_DEEP_ARCHIVE, STORAGE_CLASS_GLACIER, STORAGE_CLASS_STANDARD,
};

use async_trait::async_trait;

/// The narrow object-store interface the migration core consumes.
///
/// Pagination is explicit: listing calls take a continuation token and return
/// one page. Callers loop until `next_token` is `None`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Names of every bucket visible to the credentials in use.
    async fn list_buckets(&self) -> Result<Vec<String>, CloudError>;

    /// One page of the bucket's current objects.
    ///
    /// `contents` stays `None` when the backend omitted the object list, so
    /// callers can cross-check it against `key_count` and fail fast on
    /// truncated responses.
    async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, CloudError>;

    /// One page of the bucket's object versions and delete markers.
    async fn list_object_versions(
        &self,
        bucket: &str,
        continuation: Option<String>,
        max_keys: Option<i32>,
    ) -> Result<VersionPage, CloudError>;

    /// One page of the bucket's in-progress multipart uploads.
    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Result<MultipartPage, CloudError>;

    /// Streaming body of one object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody, CloudError>;

    /// Object metadata, including the `Restore` header used for glacier
    /// polling.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectInfo, CloudError>;

    /// Requests an archive restore.
    ///
    /// Returns [`CloudError::RestoreAlreadyInProgress`] when the backend
    /// reports one is already running; callers treat that as success.
    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        tier: RestoreTier,
    ) -> Result<(), CloudError>;

    /// Bulk-deletes specific object versions.
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[VersionRef],
    ) -> Result<DeleteOutcome, CloudError>;

    /// Aborts one in-progress multipart upload.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), CloudError>;

    /// Deletes an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), CloudError>;
}
