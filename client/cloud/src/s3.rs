//! AWS S3 implementation of the [`ObjectStorage`] capability interface.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::{Delete, GlacierJobParameters, ObjectIdentifier, RestoreRequest, Tier};
use aws_sdk_s3::Client;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::types::*;
use crate::{CloudError, ObjectStorage};

/// Read objects in ~1 MiB chunks so memory stays bounded regardless of
/// object size.
const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Versions and multipart listings paginate with a marker pair rather than a
/// single token; the pair is folded into one opaque token with this separator.
const MARKER_SEPARATOR: char = '\u{0}';

/// Object storage backed by AWS S3.
pub struct S3Cloud {
    client: Client,
}

impl S3Cloud {
    /// Builds a client from the ambient AWS environment (env credentials,
    /// profile, IMDS) the way every S3 tool in this workspace's lineage does.
    pub async fn connect() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        debug!(region = ?config.region(), "Connected to S3");
        Self {
            client: Client::new(&config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Creates a bucket. Only the smoke flow needs this; the migration core
    /// never creates cloud-side state.
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), CloudError> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| CloudError::api("CreateBucket", DisplayErrorContext(&e)))?;
        Ok(())
    }

    /// Uploads a small object. Only the smoke flow needs this.
    pub async fn put_object_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
    ) -> Result<(), CloudError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(data.into())
            .send()
            .await
            .map_err(|e| CloudError::api("PutObject", DisplayErrorContext(&e)))?;
        Ok(())
    }
}

fn split_marker_token(token: Option<String>) -> (Option<String>, Option<String>) {
    match token {
        Some(token) => match token.split_once(MARKER_SEPARATOR) {
            Some((key, id)) => {
                let key = (!key.is_empty()).then(|| key.to_string());
                let id = (!id.is_empty()).then(|| id.to_string());
                (key, id)
            }
            None => (Some(token), None),
        },
        None => (None, None),
    }
}

fn join_marker_token(key_marker: Option<&str>, id_marker: Option<&str>) -> Option<String> {
    if key_marker.is_none() && id_marker.is_none() {
        return None;
    }
    Some(format!(
        "{}{}{}",
        key_marker.unwrap_or(""),
        MARKER_SEPARATOR,
        id_marker.unwrap_or("")
    ))
}

#[async_trait]
impl ObjectStorage for S3Cloud {
    async fn list_buckets(&self) -> Result<Vec<String>, CloudError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| CloudError::api("ListBuckets", DisplayErrorContext(&e)))?;

        let mut buckets: Vec<String> = output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect();
        buckets.sort();
        Ok(buckets)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, CloudError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| CloudError::api("ListObjectsV2", DisplayErrorContext(&e)))?;

        // The Option matters: a page with no Contents member but a non-zero
        // KeyCount is a truncated response the scanner must reject.
        let contents = output.contents.map(|objects| {
            objects
                .into_iter()
                .filter_map(|object| {
                    let key = object.key?;
                    Some(ObjectEntry {
                        key,
                        size: object.size.unwrap_or(0).max(0) as u64,
                        etag: object.e_tag,
                        storage_class: object.storage_class.map(|c| c.as_str().to_string()),
                        last_modified: object.last_modified.map(|dt| dt.to_string()),
                    })
                })
                .collect()
        });

        let next_token = if output.is_truncated.unwrap_or(false) {
            output.next_continuation_token
        } else {
            None
        };

        Ok(ObjectPage {
            contents,
            key_count: output.key_count.map(|count| count.max(0) as u64),
            next_token,
        })
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        continuation: Option<String>,
        max_keys: Option<i32>,
    ) -> Result<VersionPage, CloudError> {
        let (key_marker, version_id_marker) = split_marker_token(continuation);

        let output = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .set_key_marker(key_marker)
            .set_version_id_marker(version_id_marker)
            .set_max_keys(max_keys)
            .send()
            .await
            .map_err(|e| CloudError::api("ListObjectVersions", DisplayErrorContext(&e)))?;

        let versions = output
            .versions()
            .iter()
            .filter_map(|v| {
                Some(VersionRef {
                    key: v.key()?.to_string(),
                    version_id: v.version_id()?.to_string(),
                })
            })
            .collect();

        let delete_markers = output
            .delete_markers()
            .iter()
            .filter_map(|m| {
                Some(VersionRef {
                    key: m.key()?.to_string(),
                    version_id: m.version_id()?.to_string(),
                })
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            join_marker_token(output.next_key_marker(), output.next_version_id_marker())
        } else {
            None
        };

        Ok(VersionPage {
            versions,
            delete_markers,
            next_token,
        })
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Result<MultipartPage, CloudError> {
        let (key_marker, upload_id_marker) = split_marker_token(continuation);

        let output = self
            .client
            .list_multipart_uploads()
            .bucket(bucket)
            .set_key_marker(key_marker)
            .set_upload_id_marker(upload_id_marker)
            .send()
            .await
            .map_err(|e| CloudError::api("ListMultipartUploads", DisplayErrorContext(&e)))?;

        let uploads = output
            .uploads()
            .iter()
            .filter_map(|u| {
                Some(MultipartUploadRef {
                    key: u.key()?.to_string(),
                    upload_id: u.upload_id()?.to_string(),
                })
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            join_marker_token(output.next_key_marker(), output.next_upload_id_marker())
        } else {
            None
        };

        Ok(MultipartPage {
            uploads,
            next_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody, CloudError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    CloudError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    CloudError::api("GetObject", DisplayErrorContext(&service_error))
                }
            })?;

        let content_length = output.content_length.map(|len| len.max(0) as u64);
        let etag = output.e_tag;
        let reader = output.body.into_async_read();
        let stream = ReaderStream::with_capacity(reader, DOWNLOAD_CHUNK_SIZE)
            .map(|chunk| chunk.map_err(CloudError::from))
            .boxed();

        Ok(ObjectBody {
            stream,
            content_length,
            etag,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectInfo, CloudError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    CloudError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    CloudError::api("HeadObject", DisplayErrorContext(&service_error))
                }
            })?;

        Ok(HeadObjectInfo {
            restore: output.restore,
        })
    }

    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        tier: RestoreTier,
    ) -> Result<(), CloudError> {
        let sdk_tier = match tier {
            RestoreTier::Standard => Tier::Standard,
            RestoreTier::Bulk => Tier::Bulk,
            RestoreTier::Expedited => Tier::Expedited,
        };
        let job_parameters = GlacierJobParameters::builder()
            .tier(sdk_tier)
            .build()
            .map_err(|e| CloudError::api("RestoreObject", e))?;
        let restore_request = RestoreRequest::builder()
            .days(days as i32)
            .glacier_job_parameters(job_parameters)
            .build();

        match self
            .client
            .restore_object()
            .bucket(bucket)
            .key(key)
            .restore_request(restore_request)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.meta().code() == Some("RestoreAlreadyInProgress") {
                    Err(CloudError::RestoreAlreadyInProgress {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })
                } else {
                    Err(CloudError::api(
                        "RestoreObject",
                        DisplayErrorContext(&service_error),
                    ))
                }
            }
        }
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[VersionRef],
    ) -> Result<DeleteOutcome, CloudError> {
        let identifiers: Vec<ObjectIdentifier> = objects
            .iter()
            .map(|object| {
                ObjectIdentifier::builder()
                    .key(&object.key)
                    .version_id(&object.version_id)
                    .build()
                    .map_err(|e| CloudError::api("DeleteObjects", e))
            })
            .collect::<Result<_, _>>()?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .map_err(|e| CloudError::api("DeleteObjects", e))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| CloudError::api("DeleteObjects", DisplayErrorContext(&e)))?;

        let deleted = output
            .deleted()
            .iter()
            .filter_map(|d| {
                Some(VersionRef {
                    key: d.key()?.to_string(),
                    version_id: d.version_id().unwrap_or("").to_string(),
                })
            })
            .collect();

        let errors = output
            .errors()
            .iter()
            .map(|e| DeleteErrorEntry {
                key: e.key().unwrap_or("").to_string(),
                version_id: e.version_id().unwrap_or("").to_string(),
                code: e.code().unwrap_or("").to_string(),
                message: e.message().unwrap_or("").to_string(),
            })
            .collect();

        Ok(DeleteOutcome { deleted, errors })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), CloudError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| CloudError::api("AbortMultipartUpload", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), CloudError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| CloudError::api("DeleteBucket", DisplayErrorContext(&e)))?;
        Ok(())
    }
}
