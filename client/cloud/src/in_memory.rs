//! In-memory fake cloud.
//!
//! Replays a fixed object set through the [`ObjectStorage`] interface so the
//! migration pipeline can run end to end without network or credentials.
//! Used by unit tests and by the `--test` smoke mode.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use md5::{Digest, Md5};

use crate::types::*;
use crate::{CloudError, ObjectStorage};

#[derive(Clone)]
struct FakeObject {
    data: Bytes,
    etag: Option<String>,
    storage_class: String,
    last_modified: String,
    version_id: String,
    restore_requested: bool,
    restore_complete: bool,
}

impl FakeObject {
    fn is_archived(&self) -> bool {
        self.storage_class == STORAGE_CLASS_GLACIER
            || self.storage_class == STORAGE_CLASS_DEEP_ARCHIVE
    }
}

#[derive(Default)]
struct FakeBucket {
    objects: BTreeMap<String, FakeObject>,
    delete_markers: Vec<VersionRef>,
    multipart_uploads: Vec<MultipartUploadRef>,
    /// When set, the next objects listing returns a page with no contents but
    /// a non-zero key count, emulating a truncated backend response.
    malformed_listing: bool,
}

struct State {
    buckets: BTreeMap<String, FakeBucket>,
    page_size: usize,
    chunk_size: usize,
    instant_restore: bool,
    next_version: u64,
}

/// A fake cloud replaying seeded buckets from memory.
#[derive(Clone)]
pub struct InMemoryCloud {
    inner: Arc<Mutex<State>>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                buckets: BTreeMap::new(),
                page_size: 1000,
                chunk_size: 1024 * 1024,
                instant_restore: false,
                next_version: 1,
            })),
        }
    }

    /// Listing page size, lowered by tests that exercise pagination.
    pub fn set_page_size(&self, page_size: usize) {
        self.inner.lock().unwrap().page_size = page_size.max(1);
    }

    /// Download chunk size, lowered by tests that cancel mid-object.
    pub fn set_chunk_size(&self, chunk_size: usize) {
        self.inner.lock().unwrap().chunk_size = chunk_size.max(1);
    }

    /// When set, restore requests complete immediately.
    pub fn set_instant_restore(&self, instant: bool) {
        self.inner.lock().unwrap().instant_restore = instant;
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.inner
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    /// Seeds a single-part object; the etag is the quoted MD5 of the data,
    /// exactly as the real backend reports it.
    pub fn put_object(&self, bucket: &str, key: &str, data: &[u8]) {
        let etag = format!("\"{}\"", hex::encode(Md5::digest(data)));
        self.put_object_with(bucket, key, data, Some(&etag), STORAGE_CLASS_STANDARD);
    }

    /// Seeds an archived object with a correct single-part etag.
    pub fn put_archived_object(&self, bucket: &str, key: &str, data: &[u8], storage_class: &str) {
        let etag = format!("\"{}\"", hex::encode(Md5::digest(data)));
        self.put_object_with(bucket, key, data, Some(&etag), storage_class);
    }

    /// Seeds an object with full control over etag and storage class. Pass a
    /// composite etag (`…-3`) to emulate a multipart upload, or `None` to
    /// emulate a backend that omitted the etag.
    pub fn put_object_with(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        etag: Option<&str>,
        storage_class: &str,
    ) {
        let mut state = self.inner.lock().unwrap();
        let version_id = format!("v{}", state.next_version);
        state.next_version += 1;
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .objects
            .insert(
                key.to_string(),
                FakeObject {
                    data: Bytes::copy_from_slice(data),
                    etag: etag.map(str::to_string),
                    storage_class: storage_class.to_string(),
                    last_modified: "2024-01-01T00:00:00Z".to_string(),
                    version_id,
                    restore_requested: false,
                    restore_complete: false,
                },
            );
    }

    pub fn add_delete_marker(&self, bucket: &str, key: &str) {
        let mut state = self.inner.lock().unwrap();
        let version_id = format!("v{}", state.next_version);
        state.next_version += 1;
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .delete_markers
            .push(VersionRef {
                key: key.to_string(),
                version_id,
            });
    }

    pub fn add_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .multipart_uploads
            .push(MultipartUploadRef {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            });
    }

    pub fn set_malformed_listing(&self, bucket: &str) {
        if let Some(b) = self.inner.lock().unwrap().buckets.get_mut(bucket) {
            b.malformed_listing = true;
        }
    }

    /// Completes every requested restore, as if the archive tier finished
    /// thawing between polls.
    pub fn complete_restores(&self) {
        for bucket in self.inner.lock().unwrap().buckets.values_mut() {
            for object in bucket.objects.values_mut() {
                if object.restore_requested {
                    object.restore_complete = true;
                }
            }
        }
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.inner.lock().unwrap().buckets.contains_key(bucket)
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .buckets
            .get(bucket)
            .map(|b| b.objects.len())
            .unwrap_or(0)
    }

    pub fn aborted_upload_count(&self, bucket: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .buckets
            .get(bucket)
            .map(|b| b.multipart_uploads.len())
            .unwrap_or(0)
    }

    fn not_found(bucket: &str, key: &str) -> CloudError {
        CloudError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for InMemoryCloud {
    async fn list_buckets(&self) -> Result<Vec<String>, CloudError> {
        Ok(self.inner.lock().unwrap().buckets.keys().cloned().collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, CloudError> {
        let mut state = self.inner.lock().unwrap();
        let page_size = state.page_size;
        let fake_bucket = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::not_found(bucket, ""))?;

        if fake_bucket.malformed_listing {
            fake_bucket.malformed_listing = false;
            return Ok(ObjectPage {
                contents: None,
                key_count: Some(fake_bucket.objects.len().max(1) as u64),
                next_token: None,
            });
        }

        let entries: Vec<ObjectEntry> = fake_bucket
            .objects
            .range(continuation.unwrap_or_default()..)
            .take(page_size)
            .map(|(key, object)| ObjectEntry {
                key: key.clone(),
                size: object.data.len() as u64,
                etag: object.etag.clone(),
                storage_class: Some(object.storage_class.clone()),
                last_modified: Some(object.last_modified.clone()),
            })
            .collect();

        let next_token = entries.last().and_then(|last| {
            let mut after = last.key.clone();
            // Smallest key strictly greater than the last one served.
            after.push('\u{0}');
            fake_bucket
                .objects
                .range(after.clone()..)
                .next()
                .map(|_| after)
        });

        Ok(ObjectPage {
            key_count: Some(entries.len() as u64),
            contents: Some(entries),
            next_token,
        })
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        _continuation: Option<String>,
        max_keys: Option<i32>,
    ) -> Result<VersionPage, CloudError> {
        let state = self.inner.lock().unwrap();
        let fake_bucket = state
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::not_found(bucket, ""))?;

        let mut versions: Vec<VersionRef> = fake_bucket
            .objects
            .iter()
            .map(|(key, object)| VersionRef {
                key: key.clone(),
                version_id: object.version_id.clone(),
            })
            .collect();
        let mut delete_markers = fake_bucket.delete_markers.clone();

        if let Some(max) = max_keys {
            let max = max.max(0) as usize;
            if versions.len() >= max {
                versions.truncate(max);
                delete_markers.clear();
            } else {
                let remaining = max - versions.len();
                delete_markers.truncate(remaining);
            }
        }

        Ok(VersionPage {
            versions,
            delete_markers,
            next_token: None,
        })
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        _continuation: Option<String>,
    ) -> Result<MultipartPage, CloudError> {
        let state = self.inner.lock().unwrap();
        let fake_bucket = state
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::not_found(bucket, ""))?;

        Ok(MultipartPage {
            uploads: fake_bucket.multipart_uploads.clone(),
            next_token: None,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody, CloudError> {
        let state = self.inner.lock().unwrap();
        let object = state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .ok_or_else(|| Self::not_found(bucket, key))?;

        if object.is_archived() && !object.restore_complete {
            return Err(CloudError::api(
                "GetObject",
                format!(
                    "InvalidObjectState: {}/{} is archived and not restored",
                    bucket, key
                ),
            ));
        }

        let data = object.data.clone();
        let etag = object.etag.clone();
        let chunk_size = state.chunk_size;

        let chunks: Vec<Result<Bytes, CloudError>> = if data.is_empty() {
            Vec::new()
        } else {
            (0..data.len())
                .step_by(chunk_size)
                .map(|start| Ok(data.slice(start..data.len().min(start + chunk_size))))
                .collect()
        };

        Ok(ObjectBody {
            content_length: Some(data.len() as u64),
            etag,
            stream: futures::stream::iter(chunks).boxed(),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectInfo, CloudError> {
        let state = self.inner.lock().unwrap();
        let object = state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .ok_or_else(|| Self::not_found(bucket, key))?;

        let restore = object.restore_requested.then(|| {
            format!(
                "ongoing-request=\"{}\"",
                if object.restore_complete { "false" } else { "true" }
            )
        });

        Ok(HeadObjectInfo { restore })
    }

    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        _days: u32,
        _tier: RestoreTier,
    ) -> Result<(), CloudError> {
        let mut state = self.inner.lock().unwrap();
        let instant = state.instant_restore;
        let object = state
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.objects.get_mut(key))
            .ok_or_else(|| Self::not_found(bucket, key))?;

        if object.restore_requested && !object.restore_complete {
            return Err(CloudError::RestoreAlreadyInProgress {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        object.restore_requested = true;
        if instant {
            object.restore_complete = true;
        }
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[VersionRef],
    ) -> Result<DeleteOutcome, CloudError> {
        let mut state = self.inner.lock().unwrap();
        let fake_bucket = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::not_found(bucket, ""))?;

        let mut outcome = DeleteOutcome::default();
        for object_ref in objects {
            let matches_version = fake_bucket
                .objects
                .get(&object_ref.key)
                .map(|o| o.version_id == object_ref.version_id)
                .unwrap_or(false);
            if matches_version {
                fake_bucket.objects.remove(&object_ref.key);
                outcome.deleted.push(object_ref.clone());
                continue;
            }

            let marker_index = fake_bucket
                .delete_markers
                .iter()
                .position(|m| m == object_ref);
            if let Some(index) = marker_index {
                fake_bucket.delete_markers.remove(index);
                outcome.deleted.push(object_ref.clone());
                continue;
            }

            outcome.errors.push(DeleteErrorEntry {
                key: object_ref.key.clone(),
                version_id: object_ref.version_id.clone(),
                code: "NoSuchVersion".to_string(),
                message: "The specified version does not exist".to_string(),
            });
        }

        Ok(outcome)
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.inner.lock().unwrap();
        let fake_bucket = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::not_found(bucket, key))?;

        fake_bucket
            .multipart_uploads
            .retain(|u| !(u.key == key && u.upload_id == upload_id));
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), CloudError> {
        let mut state = self.inner.lock().unwrap();
        let fake_bucket = state
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::not_found(bucket, ""))?;

        if !fake_bucket.objects.is_empty() || !fake_bucket.delete_markers.is_empty() {
            return Err(CloudError::api(
                "DeleteBucket",
                format!("BucketNotEmpty: {} still has contents", bucket),
            ));
        }

        state.buckets.remove(bucket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn seeded_objects_are_listed_in_key_order() {
        let cloud = InMemoryCloud::new();
        cloud.put_object("b", "z.txt", b"z");
        cloud.put_object("b", "a.txt", b"a");

        let page = cloud.list_objects("b", None).await.unwrap();
        let keys: Vec<_> = page
            .contents
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a.txt", "z.txt"]);
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn listing_paginates_with_small_page_size() {
        let cloud = InMemoryCloud::new();
        cloud.set_page_size(2);
        for i in 0..5 {
            cloud.put_object("b", &format!("k{}", i), b"x");
        }

        let mut token = None;
        let mut seen = Vec::new();
        loop {
            let page = cloud.list_objects("b", token).await.unwrap();
            seen.extend(page.contents.unwrap().into_iter().map(|o| o.key));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn get_object_streams_all_bytes() {
        let cloud = InMemoryCloud::new();
        cloud.set_chunk_size(3);
        cloud.put_object("b", "k", b"0123456789");

        let body = cloud.get_object("b", "k").await.unwrap();
        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        assert!(chunks.len() > 1, "small chunk size must split the body");
        let all: Vec<u8> = chunks.concat();
        assert_eq!(all, b"0123456789");
    }

    #[tokio::test]
    async fn restore_lifecycle_matches_head_header() {
        let cloud = InMemoryCloud::new();
        cloud.put_object_with("b", "cold", b"x", Some("\"aa\""), STORAGE_CLASS_GLACIER);

        assert!(cloud.head_object("b", "cold").await.unwrap().restore.is_none());

        cloud
            .restore_object("b", "cold", 90, RestoreTier::Standard)
            .await
            .unwrap();
        assert_eq!(
            cloud.head_object("b", "cold").await.unwrap().restore.as_deref(),
            Some("ongoing-request=\"true\"")
        );

        // A second request while thawing reports the benign error.
        let again = cloud
            .restore_object("b", "cold", 90, RestoreTier::Standard)
            .await;
        assert!(matches!(
            again,
            Err(CloudError::RestoreAlreadyInProgress { .. })
        ));

        cloud.complete_restores();
        assert_eq!(
            cloud.head_object("b", "cold").await.unwrap().restore.as_deref(),
            Some("ongoing-request=\"false\"")
        );
    }

    #[tokio::test]
    async fn archived_object_body_is_gated_on_restore() {
        let cloud = InMemoryCloud::new();
        cloud.put_object_with("b", "cold", b"x", Some("\"aa\""), STORAGE_CLASS_DEEP_ARCHIVE);

        assert!(cloud.get_object("b", "cold").await.is_err());

        cloud
            .restore_object("b", "cold", 90, RestoreTier::Bulk)
            .await
            .unwrap();
        cloud.complete_restores();
        assert!(cloud.get_object("b", "cold").await.is_ok());
    }

    #[tokio::test]
    async fn delete_bucket_requires_empty_bucket() {
        let cloud = InMemoryCloud::new();
        cloud.put_object("b", "k", b"x");

        assert!(cloud.delete_bucket("b").await.is_err());

        let versions = cloud.list_object_versions("b", None, None).await.unwrap();
        cloud.delete_objects("b", &versions.versions).await.unwrap();
        cloud.delete_bucket("b").await.unwrap();
        assert!(!cloud.bucket_exists("b"));
    }
}
