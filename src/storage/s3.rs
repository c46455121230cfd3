//! S3-backed receipt storage.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;

use super::{ReceiptStorage, StorageError, StorageResult};

pub struct S3ReceiptStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl S3ReceiptStorage {
    /// Builds a client from the ambient AWS environment. `public_base_url`
    /// is the host serving the bucket (CDN or the bucket endpoint itself);
    /// stored objects are addressed as `<public_base_url>/<path>`.
    pub async fn from_env(bucket: String, public_base_url: Option<String>) -> Self {
        let aws_config =
            aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let public_base_url = public_base_url
            .unwrap_or_else(|| format!("https://{bucket}.s3.amazonaws.com"));
        Self {
            client: aws_sdk_s3::Client::new(&aws_config),
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ReceiptStorage for S3ReceiptStorage {
    async fn store_pdf(&self, path: &str, bytes: Vec<u8>) -> StorageResult<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type("application/pdf")
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|error| {
                StorageError::Backend(format!("S3 upload failed for {path}: {error}"))
            })?;
        Ok(format!("{}/{path}", self.public_base_url))
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
