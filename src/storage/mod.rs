//! Storage operations for file uploads and downloads

mod types;

use log::debug;
use reqwest::{multipart, Client};
use serde_json::json;

use crate::error::StorageError;

pub use types::{FileObject, FileOptions, ListOptions, SignedUrlResponse, SortBy, UploadResponse};

/// Client for the storage endpoints
pub struct StorageClient {
    /// The base URL for the project
    url: String,

    /// The anonymous API key for the project
    key: String,

    /// HTTP client used for requests
    http_client: Client,
}

/// Client scoped to a single bucket
pub struct BucketClient<'a> {
    storage: &'a StorageClient,
    bucket_id: String,
}

impl StorageClient {
    /// Create a new StorageClient
    pub(crate) fn new(url: &str, key: &str, http_client: Client) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            http_client,
        }
    }

    fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1{}", self.url, path)
    }

    /// Get a client for a specific bucket
    pub fn from(&self, bucket_id: &str) -> BucketClient<'_> {
        BucketClient {
            storage: self,
            bucket_id: bucket_id.to_string(),
        }
    }
}

impl<'a> BucketClient<'a> {
    fn object_url(&self, path: &str) -> String {
        self.storage
            .storage_url(&format!("/object/{}/{}", self.bucket_id, path))
    }

    /// Upload a file to the bucket
    pub async fn upload(
        &self,
        path: &str,
        data: Vec<u8>,
        options: FileOptions,
    ) -> Result<UploadResponse, StorageError> {
        let url = self.object_url(path);
        debug!("uploading {} bytes to {}", data.len(), url);

        let file_name = path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("file")
            .to_string();

        let mut part = multipart::Part::bytes(data).file_name(file_name);
        if let Some(content_type) = &options.content_type {
            part = part.mime_str(content_type)?;
        }
        let form = multipart::Form::new().part("file", part);

        let response = self
            .storage
            .http_client
            .post(&url)
            .header("apikey", &self.storage.key)
            .header(
                "Cache-Control",
                options.cache_control.as_deref().unwrap_or("3600"),
            )
            .header("x-upsert", options.upsert.to_string())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(StorageError::from_response(status, &body));
        }

        let uploaded: UploadResponse = response.json().await?;
        Ok(uploaded)
    }

    /// Download a file from the bucket
    pub async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(path);

        let response = self
            .storage
            .http_client
            .get(&url)
            .header("apikey", &self.storage.key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(StorageError::from_response(status, &body));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// List files under a prefix
    pub async fn list(
        &self,
        prefix: &str,
        options: ListOptions,
    ) -> Result<Vec<FileObject>, StorageError> {
        let url = self
            .storage
            .storage_url(&format!("/object/list/{}", self.bucket_id));

        let mut body = json!({
            "prefix": prefix,
        });
        if let Some(limit) = options.limit {
            body["limit"] = json!(limit);
        }
        if let Some(offset) = options.offset {
            body["offset"] = json!(offset);
        }
        if let Some(sort_by) = &options.sort_by {
            body["sortBy"] = json!({
                "column": sort_by.column,
                "order": sort_by.order.as_param(),
            });
        }

        let response = self
            .storage
            .http_client
            .post(&url)
            .header("apikey", &self.storage.key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(StorageError::from_response(status, &body));
        }

        let files: Vec<FileObject> = response.json().await?;
        Ok(files)
    }

    /// Delete files from the bucket
    pub async fn remove(&self, paths: &[&str]) -> Result<(), StorageError> {
        let url = self
            .storage
            .storage_url(&format!("/object/{}", self.bucket_id));

        let body = json!({ "prefixes": paths });

        let response = self
            .storage
            .http_client
            .delete(&url)
            .header("apikey", &self.storage.key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(StorageError::from_response(status, &body));
        }

        Ok(())
    }

    /// Create a signed URL granting temporary access to a file
    pub async fn create_signed_url(
        &self,
        path: &str,
        expires_in: i64,
    ) -> Result<SignedUrlResponse, StorageError> {
        let url = self
            .storage
            .storage_url(&format!("/object/sign/{}/{}", self.bucket_id, path));

        let body = json!({ "expiresIn": expires_in });

        let response = self
            .storage
            .http_client
            .post(&url)
            .header("apikey", &self.storage.key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(StorageError::from_response(status, &body));
        }

        let signed: SignedUrlResponse = response.json().await?;
        Ok(signed)
    }

    /// Public URL for a file in a public bucket. No request is made; access
    /// still depends on the bucket actually being public.
    pub fn get_public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.storage.url, self.bucket_id, path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgrest::SortOrder;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_storage(url: &str) -> StorageClient {
        StorageClient::new(url, "test-key", Client::new())
    }

    #[test]
    fn test_upload_parses_key() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/storage/v1/object/avatars/user-1.png"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "Key": "avatars/user-1.png"
                })))
                .mount(&mock_server)
                .await;

            let storage = test_storage(&mock_server.uri());
            let uploaded = storage
                .from("avatars")
                .upload(
                    "user-1.png",
                    vec![0x89, 0x50, 0x4e, 0x47],
                    FileOptions::default().with_content_type("image/png"),
                )
                .await
                .unwrap();

            assert_eq!(uploaded.key, "avatars/user-1.png");
        });
    }

    #[test]
    fn test_upload_error_surfaces_message() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/storage/v1/object/avatars/user-1.png"))
                .respond_with(ResponseTemplate::new(413).set_body_json(serde_json::json!({
                    "statusCode": "413",
                    "error": "Payload too large",
                    "message": "The object exceeded the maximum allowed size"
                })))
                .mount(&mock_server)
                .await;

            let storage = test_storage(&mock_server.uri());
            let error = storage
                .from("avatars")
                .upload("user-1.png", vec![0u8; 16], FileOptions::default())
                .await
                .expect_err("upload should fail");

            assert_eq!(
                error.user_message(),
                "The object exceeded the maximum allowed size"
            );
        });
    }

    #[test]
    fn test_download_returns_bytes() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;

            Mock::given(method("GET"))
                .and(path("/storage/v1/object/avatars/user-1.png"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
                .mount(&mock_server)
                .await;

            let storage = test_storage(&mock_server.uri());
            let bytes = storage.from("avatars").download("user-1.png").await.unwrap();
            assert_eq!(bytes, vec![1u8, 2, 3]);
        });
    }

    #[test]
    fn test_list_sends_prefix_and_sort() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/storage/v1/object/list/avatars"))
                .and(body_partial_json(serde_json::json!({
                    "prefix": "user-1",
                    "limit": 20,
                    "sortBy": {"column": "created_at", "order": "desc"}
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                    {"name": "user-1.png", "id": "f1"}
                ])))
                .mount(&mock_server)
                .await;

            let storage = test_storage(&mock_server.uri());
            let files = storage
                .from("avatars")
                .list(
                    "user-1",
                    ListOptions {
                        limit: Some(20),
                        offset: None,
                        sort_by: Some(SortBy {
                            column: "created_at".to_string(),
                            order: SortOrder::Descending,
                        }),
                    },
                )
                .await
                .unwrap();

            assert_eq!(files.len(), 1);
            assert_eq!(files[0].name, "user-1.png");
        });
    }

    #[test]
    fn test_remove_sends_prefixes() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;

            Mock::given(method("DELETE"))
                .and(path("/storage/v1/object/avatars"))
                .and(body_partial_json(serde_json::json!({
                    "prefixes": ["user-1.png", "user-2.png"]
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
                .mount(&mock_server)
                .await;

            let storage = test_storage(&mock_server.uri());
            storage
                .from("avatars")
                .remove(&["user-1.png", "user-2.png"])
                .await
                .unwrap();
        });
    }

    #[test]
    fn test_create_signed_url() {
        tokio_test::block_on(async {
            let mock_server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/storage/v1/object/sign/avatars/user-1.png"))
                .and(body_partial_json(serde_json::json!({"expiresIn": 3600})))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "signedURL": "/object/sign/avatars/user-1.png?token=abc"
                })))
                .mount(&mock_server)
                .await;

            let storage = test_storage(&mock_server.uri());
            let signed = storage
                .from("avatars")
                .create_signed_url("user-1.png", 3600)
                .await
                .unwrap();

            assert!(signed.signed_url.contains("token=abc"));
        });
    }

    #[test]
    fn test_public_url_is_pure() {
        let storage = test_storage("https://project.example.com");
        let url = storage.from("avatars").get_public_url("user-1.png");
        assert_eq!(
            url,
            "https://project.example.com/storage/v1/object/public/avatars/user-1.png"
        );
    }
}
