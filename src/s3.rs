use anyhow::{Context, Result};
use aws_sdk_s3::{
    error::ProvideErrorMetadata,
    operation::{
        delete_object::DeleteObjectError,
        get_object::GetObjectError,
        head_object::{HeadObjectError, HeadObjectOutput},
        list_objects::{ListObjectsError, ListObjectsOutput},
        put_object::PutObjectError,
        RequestId, RequestIdExt,
    },
    primitives::ByteStream,
    Client,
};
use log::{trace, warn};
use tokio::sync::mpsc;

/// S3 object storage.
#[derive(Clone)]
pub struct S3 {
    client: Client,
}

/// Optional parameters of `S3::list` and `S3::list_tags`. Zero or empty
/// values leave the parameter unset.
#[derive(Debug, Clone, Default)]
pub struct ListObjects {
    /// Maximum number of keys returned; S3 returns up to 1000 if unset.
    pub max_keys: i32,
    /// Key to start listing after.
    pub marker: String,
    /// Groups keys; when set, the common prefixes are listed instead of keys.
    pub delimiter: String,
}

impl ListObjects {
    fn max_keys(&self) -> Option<i32> {
        Some(self.max_keys).filter(|&n| n > 0)
    }

    fn marker(&self) -> Option<String> {
        Some(self.marker.clone()).filter(|m| !m.is_empty())
    }

    fn delimiter(&self) -> Option<String> {
        Some(self.delimiter.clone()).filter(|d| !d.is_empty())
    }
}

/// Error response of the S3 service, as opposed to a failure to reach it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceError {
    /// S3 error code, e.g. `NoSuchKey` or `AccessDenied`.
    pub code: Option<String>,
    pub message: Option<String>,
    pub request_id: Option<String>,
    /// Extended request id (`x-amz-id-2`).
    pub host_id: Option<String>,
}

impl ServiceError {
    /// True if the object (or, for `info`, its metadata) does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self.code.as_deref(), Some("NoSuchKey" | "NotFound"))
    }
}

fn service_error_of<E>(err: &(dyn std::error::Error + 'static)) -> Option<ServiceError>
where E: ProvideErrorMetadata + RequestId + RequestIdExt + std::error::Error + 'static
{
    err.downcast_ref::<E>().map(|e| ServiceError {
        code: e.code().map(String::from),
        message: e.message().map(String::from),
        request_id: e.request_id().map(String::from),
        host_id: e.extended_request_id().map(String::from),
    })
}

/// Normalizes a folder name to the prefix of its content, `None` for an
/// empty name.
fn folder_prefix(folder: &str) -> Option<String> {
    match folder {
        "" => None,
        f if f.ends_with('/') => Some(f.to_string()),
        f => Some(format!("{f}/")),
    }
}

/// Extracts keys and ETags from a listing, skipping the folder object equal
/// to `prefix`. With `grouped`, the common prefixes are returned as keys and
/// no tags are returned.
fn listing_entries(out: &ListObjectsOutput, prefix: &str, grouped: bool) -> (Vec<String>, Vec<String>) {
    if grouped {
        let prefixes = out.common_prefixes()
            .iter()
            .filter_map(|p| p.prefix())
            .map(String::from)
            .collect();
        return (prefixes, Vec::new());
    }

    out.contents()
        .iter()
        .filter_map(|obj| obj.key().map(|key| (key, obj.e_tag().unwrap_or_default())))
        .filter(|(key, _)| *key != prefix)
        .map(|(key, tag)| (key.to_string(), tag.to_string()))
        .unzip()
}

impl S3 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Finds the S3 service error behind an error returned by one of the
    /// `S3` methods. Returns `None` for transport, credential and other
    /// failures where S3 never answered.
    pub fn service_error(err: &anyhow::Error) -> Option<ServiceError> {
        err.chain().find_map(|e| {
            service_error_of::<GetObjectError>(e)
                .or_else(|| service_error_of::<HeadObjectError>(e))
                .or_else(|| service_error_of::<PutObjectError>(e))
                .or_else(|| service_error_of::<DeleteObjectError>(e))
                .or_else(|| service_error_of::<ListObjectsError>(e))
        })
    }

    /// Returns the content of an object.
    pub async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let out = self.client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("can't get s3 object {key}"))?;

        let data = out.body
            .collect()
            .await
            .with_context(|| format!("can't read s3 object {key}"))?;
        Ok(data.into_bytes().to_vec())
    }

    /// Returns the metadata of an object without fetching its content.
    pub async fn info(&self, bucket: &str, key: &str) -> Result<HeadObjectOutput> {
        self.client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("can't get info of s3 object {key}"))
    }

    /// Stores the content of an object.
    pub async fn set(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("can't put s3 object {key}"))?;
        Ok(())
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("can't delete s3 object {key}"))?;
        Ok(())
    }

    /// Deletes all objects in a folder, then the folder object itself.
    ///
    /// Only the first listing page is processed. Failing deletes of single
    /// objects are logged and skipped.
    pub async fn delete_folder(&self, bucket: &str, folder: &str) -> Result<()> {
        let Some(prefix) = folder_prefix(folder) else {
            return Ok(());
        };

        let keys = self.list(bucket, &prefix, ListObjects::default()).await?;
        for key in keys.iter().rev() {
            if let Err(e) = self.delete(bucket, key).await {
                warn!("{e:#}");
            }
        }

        self.delete(bucket, prefix.trim_end_matches('/')).await
    }

    /// Lists object keys starting with `prefix`, or the common prefixes if
    /// `params` has a delimiter.
    pub async fn list(&self, bucket: &str, prefix: &str, params: ListObjects) -> Result<Vec<String>> {
        let (keys, _) = self.list_tags(bucket, prefix, params).await?;
        Ok(keys)
    }

    /// Like `list`, additionally returning the ETag of each key ("" if S3
    /// sent none). Without delimiter, both lists have the same length.
    pub async fn list_tags(&self, bucket: &str, prefix: &str, params: ListObjects) -> Result<(Vec<String>, Vec<String>)> {
        let delimiter = params.delimiter();
        let grouped = delimiter.is_some();
        let out = self.client
            .list_objects()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter)
            .set_max_keys(params.max_keys())
            .set_marker(params.marker())
            .send()
            .await
            .with_context(|| format!("can't list s3 objects of bucket {bucket} with prefix {prefix}"))?;

        Ok(listing_entries(&out, prefix, grouped))
    }

    /// Lists object keys starting with `prefix` and delivers them through a
    /// channel.
    pub async fn list_stream(&self, bucket: &str, prefix: &str) -> Result<mpsc::Receiver<String>> {
        let keys = self.list(bucket, prefix, ListObjects::default()).await?;

        let (tx, rx) = mpsc::channel(10);
        tokio::spawn(async move {
            for key in keys {
                if tx.send(key).await.is_err() {
                    trace!("listing receiver dropped");
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[test]
fn test_folder_prefix() {
    assert_eq!(folder_prefix(""), None);
    assert_eq!(folder_prefix("saves"), Some("saves/".to_string()));
    assert_eq!(folder_prefix("saves/"), Some("saves/".to_string()));
}

#[test]
fn test_list_objects_params() {
    let params = ListObjects::default();
    assert_eq!(params.max_keys(), None);
    assert_eq!(params.marker(), None);
    assert_eq!(params.delimiter(), None);

    let params = ListObjects { max_keys: 10, marker: "a/b".into(), delimiter: "/".into() };
    assert_eq!(params.max_keys(), Some(10));
    assert_eq!(params.marker().as_deref(), Some("a/b"));
    assert_eq!(params.delimiter().as_deref(), Some("/"));
}

#[test]
fn test_listing_entries() {
    use aws_sdk_s3::types::{CommonPrefix, Object};

    let out = ListObjectsOutput::builder()
        .contents(Object::builder().key("saves/").build())
        .contents(Object::builder().key("saves/1").e_tag("\"abc\"").build())
        .contents(Object::builder().key("saves/2").build())
        .common_prefixes(CommonPrefix::builder().prefix("saves/old/").build())
        .build();

    let (keys, tags) = listing_entries(&out, "saves/", false);
    assert_eq!(keys, vec!["saves/1", "saves/2"]);
    assert_eq!(tags, vec!["\"abc\"", ""]);

    let (keys, tags) = listing_entries(&out, "saves/", true);
    assert_eq!(keys, vec!["saves/old/"]);
    assert!(tags.is_empty());
}

#[test]
fn test_service_error() {
    use aws_sdk_s3::{error::ErrorMetadata, types::error::NoSuchKey};

    let no_such_key = NoSuchKey::builder()
        .meta(ErrorMetadata::builder().code("NoSuchKey").message("The specified key does not exist.").build())
        .build();
    let err = anyhow::Error::new(GetObjectError::NoSuchKey(no_such_key))
        .context("can't get s3 object not_existing_key");

    let service_error = S3::service_error(&err).unwrap();
    assert_eq!(service_error.code.as_deref(), Some("NoSuchKey"));
    assert_eq!(service_error.message.as_deref(), Some("The specified key does not exist."));
    assert!(service_error.is_not_found());

    let denied = anyhow::Error::new(DeleteObjectError::generic(
        ErrorMetadata::builder().code("AccessDenied").build(),
    ))
    .context("can't delete s3 object saves/1");
    let service_error = S3::service_error(&denied).unwrap();
    assert_eq!(service_error.code.as_deref(), Some("AccessDenied"));
    assert!(!service_error.is_not_found());

    let transport = anyhow::anyhow!("dispatch failure").context("can't get s3 object saves/1");
    assert_eq!(S3::service_error(&transport), None);
}
