pub mod http;
pub mod local;

use crate::domain::error::Result;
use async_trait::async_trait;

pub use http::HttpObjectStorage;
pub use local::LocalObjectStorage;

/// Read access to the bucket holding uploaded template binaries.
///
/// `path` is passed through untouched; callers that need an encoded form
/// (see the filename repair ladder) encode it themselves.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn backend(&self) -> &str;
    async fn download(&self, path: &str) -> Result<Vec<u8>>;
}
