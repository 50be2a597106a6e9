//! Data API client for table reads and writes.
//!
//! Requests follow the PostgREST conventions: filters ride in the query
//! string as `column=op.value`, ordering as `order=column.direction`, and
//! mutations ask for the changed rows back with `Prefer:
//! return=representation`.

use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::DataError;

/// Sort direction for `order`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub(crate) fn as_param(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Request builder scoped to a single table or view
pub struct Table {
    base_url: String,
    key: String,
    table: String,
    http_client: Client,
    bearer: Option<String>,
    schema: String,
    // Insertion-ordered so an unchanged builder produces the same query
    // string on every execution
    query_params: Vec<(String, String)>,
}

impl Table {
    /// Create a builder for a table
    pub(crate) fn new(base_url: &str, key: &str, table: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.to_string(),
            key: key.to_string(),
            table: table.to_string(),
            http_client,
            bearer: None,
            schema: "public".to_string(),
            query_params: Vec::new(),
        }
    }

    /// Attach an access token; requests then run as that user
    pub fn with_auth(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    /// Query a schema other than `public`
    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    fn set_param(&mut self, key: &str, value: String) {
        match self.query_params.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.query_params.push((key.to_string(), value)),
        }
    }

    /// Choose the columns to return
    pub fn select(mut self, columns: &str) -> Self {
        self.set_param("select", columns.to_string());
        self
    }

    /// Keep rows where `column` equals `value`
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.set_param(column, format!("eq.{}", value));
        self
    }

    /// Keep rows where `column` does not equal `value`
    pub fn neq(mut self, column: &str, value: &str) -> Self {
        self.set_param(column, format!("neq.{}", value));
        self
    }

    /// Keep rows where `column` is greater than `value`
    pub fn gt(mut self, column: &str, value: &str) -> Self {
        self.set_param(column, format!("gt.{}", value));
        self
    }

    /// Keep rows where `column` is greater than or equal to `value`
    pub fn gte(mut self, column: &str, value: &str) -> Self {
        self.set_param(column, format!("gte.{}", value));
        self
    }

    /// Keep rows where `column` is less than `value`
    pub fn lt(mut self, column: &str, value: &str) -> Self {
        self.set_param(column, format!("lt.{}", value));
        self
    }

    /// Keep rows where `column` is less than or equal to `value`
    pub fn lte(mut self, column: &str, value: &str) -> Self {
        self.set_param(column, format!("lte.{}", value));
        self
    }

    /// Keep rows where `column` matches a SQL LIKE pattern
    pub fn like(mut self, column: &str, pattern: &str) -> Self {
        self.set_param(column, format!("like.{}", pattern));
        self
    }

    /// Case-insensitive LIKE
    pub fn ilike(mut self, column: &str, pattern: &str) -> Self {
        self.set_param(column, format!("ilike.{}", pattern));
        self
    }

    /// Keep rows where `column` is one of `values`
    pub fn in_list(mut self, column: &str, values: &[&str]) -> Self {
        self.set_param(column, format!("in.({})", values.join(",")));
        self
    }

    /// Order the result by a column
    pub fn order(mut self, column: &str, direction: SortOrder) -> Self {
        self.set_param("order", format!("{}.{}", column, direction.as_param()));
        self
    }

    /// Limit the number of returned rows
    pub fn limit(mut self, count: u32) -> Self {
        self.set_param("limit", count.to_string());
        self
    }

    /// Skip the first `count` rows
    pub fn offset(mut self, count: u32) -> Self {
        self.set_param("offset", count.to_string());
        self
    }

    fn build_url(&self) -> Result<String, DataError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))?;
        for (key, value) in &self.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url.to_string())
    }

    fn request(&self, http_method: Method, url: &str) -> RequestBuilder {
        let mut builder = self
            .http_client
            .request(http_method.clone(), url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json");
        if let Some(token) = &self.bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        if self.schema != "public" {
            let profile_header = match http_method {
                Method::GET | Method::HEAD => "Accept-Profile",
                _ => "Content-Profile",
            };
            builder = builder.header(profile_header, &self.schema);
        }
        builder
    }

    async fn error_from(status: StatusCode, response: Response) -> Result<DataError, DataError> {
        let body = response.text().await?;
        Ok(DataError::from_response(status, &body))
    }

    /// Run the built query and deserialize the matching rows
    pub async fn execute<T: DeserializeOwned>(self) -> Result<Vec<T>, DataError> {
        let url = self.build_url()?;
        debug!("GET {}", url);

        let response = self.request(Method::GET, &url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(status, response).await?);
        }

        let body = response.text().await?;
        let rows: Vec<T> = serde_json::from_str(&body)?;
        Ok(rows)
    }

    /// Run the built query expecting at most one row
    pub async fn execute_one<T: DeserializeOwned>(self) -> Result<Option<T>, DataError> {
        let rows: Vec<T> = self.limit(1).execute().await?;
        Ok(rows.into_iter().next())
    }

    /// Insert one or more rows, returning the stored representation
    pub async fn insert<T: Serialize>(self, values: &T) -> Result<Vec<Value>, DataError> {
        let url = self.build_url()?;
        debug!("POST {}", url);

        let response = self
            .request(Method::POST, &url)
            .header("Prefer", "return=representation")
            .json(values)
            .send()
            .await?;

        Self::rows_from(response).await
    }

    /// Update the rows matched by the current filters
    pub async fn update<T: Serialize>(self, values: &T) -> Result<Vec<Value>, DataError> {
        let url = self.build_url()?;
        debug!("PATCH {}", url);

        let response = self
            .request(Method::PATCH, &url)
            .header("Prefer", "return=representation")
            .json(values)
            .send()
            .await?;

        Self::rows_from(response).await
    }

    /// Delete the rows matched by the current filters
    pub async fn delete(self) -> Result<Vec<Value>, DataError> {
        let url = self.build_url()?;
        debug!("DELETE {}", url);

        let response = self
            .request(Method::DELETE, &url)
            .header("Prefer", "return=representation")
            .send()
            .await?;

        Self::rows_from(response).await
    }

    async fn rows_from(response: Response) -> Result<Vec<Value>, DataError> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(status, response).await?);
        }

        // 204 responses have no body
        let body = response.text().await?;
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Value> = serde_json::from_str(&body)?;
        Ok(rows)
    }
}
