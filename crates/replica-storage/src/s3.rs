//! S3 object store using server-side copies.

use std::fmt::Write as _;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use replica_core::{ObjectStore, ObjectStoreError};
use tracing::{debug, info};

/// Object store backed by an S3 (or compatible) endpoint.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from the ambient AWS configuration (environment, profile, IMDS).
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        info!(region = ?config.region(), "S3 object store initialised");
        Self::new(Client::new(&config))
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

/// `CopySource` value: bucket and key joined by `/`, with the key percent-encoded.
fn copy_source(bucket: &str, key: &str) -> String {
    let mut encoded = String::with_capacity(bucket.len() + key.len() + 1);
    encoded.push_str(bucket);
    encoded.push('/');
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'/' | b'-' | b'_' | b'.' | b'~') {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<String, ObjectStoreError> {
        if !self.object_exists(source_bucket, source_key).await? {
            return Err(ObjectStoreError::NotFound {
                bucket: source_bucket.to_string(),
                key: source_key.to_string(),
            });
        }
        self.client
            .copy_object()
            .copy_source(copy_source(source_bucket, source_key))
            .bucket(target_bucket)
            .key(target_key)
            .send()
            .await
            .map_err(|err| {
                ObjectStoreError::transport(
                    "copy_object",
                    target_bucket,
                    target_key,
                    err.into_service_error(),
                )
            })?;
        debug!(source_bucket, source_key, target_bucket, target_key, "object copied");
        Ok(target_key.to_string())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(ObjectStoreError::transport(
                        "head_object",
                        bucket,
                        key,
                        service_error,
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::copy_source;

    #[test]
    fn copy_source_encodes_reserved_characters() {
        assert_eq!(
            copy_source("models", "copies/op/model/4/model_artifact/tree v2+.bin"),
            "models/copies/op/model/4/model_artifact/tree%20v2%2B.bin"
        );
    }
}
