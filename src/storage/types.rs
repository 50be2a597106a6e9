//! Types for storage operations

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::postgrest::SortOrder;

/// A file in a storage bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    /// The file name
    pub name: String,

    /// The file ID
    pub id: Option<String>,

    /// Creation timestamp
    pub created_at: Option<String>,

    /// Update timestamp
    pub updated_at: Option<String>,

    /// Last accessed timestamp
    pub last_accessed_at: Option<String>,

    /// File metadata (size, mimetype, ...)
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Response for an upload request
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    /// Object key, `bucket/path`
    #[serde(rename = "Key")]
    pub key: String,

    /// The object ID, on servers that report one
    #[serde(rename = "Id")]
    pub id: Option<String>,
}

/// Options for uploading a file
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Cache control header, seconds
    pub cache_control: Option<String>,

    /// Content type of the uploaded data
    pub content_type: Option<String>,

    /// Overwrite an existing object at the same path
    pub upsert: bool,
}

impl FileOptions {
    pub fn with_cache_control(mut self, value: &str) -> Self {
        self.cache_control = Some(value.to_string());
        self
    }

    pub fn with_content_type(mut self, value: &str) -> Self {
        self.content_type = Some(value.to_string());
        self
    }

    pub fn with_upsert(mut self, value: bool) -> Self {
        self.upsert = value;
        self
    }
}

/// Sort key for listing files
#[derive(Debug, Clone)]
pub struct SortBy {
    pub column: String,
    pub order: SortOrder,
}

/// Options for listing files
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Maximum number of files to return
    pub limit: Option<u32>,

    /// Offset for pagination
    pub offset: Option<u32>,

    /// Sort key and direction
    pub sort_by: Option<SortBy>,
}

/// Response for a signed URL request
#[derive(Debug, Clone, Deserialize)]
pub struct SignedUrlResponse {
    /// The signed URL, relative to the storage endpoint
    #[serde(rename = "signedURL")]
    pub signed_url: String,
}
