use super::ObjectStorage;
use crate::domain::error::{AppError, Result};
use async_trait::async_trait;

pub struct HttpObjectStorage {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(base_url: &str, bucket: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    fn backend(&self) -> &str {
        "http"
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.object_url(path);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key).header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::StorageError(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            return Err(AppError::NotFound(format!("Object not found: {}", path)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::StorageError(format!(
                "Storage error ({}): {}",
                status, text
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::StorageError(format!("Failed to read body: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_layout() {
        let storage = HttpObjectStorage::new("https://files.example.com/", "/templates/", None);
        assert_eq!(
            storage.object_url("/protocol/Átvételi%20jegyzőkönyv.xlsx"),
            "https://files.example.com/storage/v1/object/templates/protocol/Átvételi%20jegyzőkönyv.xlsx"
        );
    }

    #[test]
    fn test_blank_api_key_is_dropped() {
        let storage = HttpObjectStorage::new("http://localhost", "b", Some("  ".to_string()));
        assert!(storage.api_key.is_none());
    }
}
