pub mod records;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use records::{PersistedRecord, RecordStore};
pub use s3::S3ObjectStore;

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// S3-style object storage scoped to a single bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> Result<bool>;

    async fn create_bucket(&self) -> Result<()>;

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Every object whose key starts with `prefix`, across all pages.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
}
