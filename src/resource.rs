//! Declarative binding of a table query to observable state.
//!
//! A [`Resource`] owns a [`ResourceQuery`] describing what to load and
//! publishes a [`ResourceState`] snapshot through a watch channel. Reads
//! update the state; writes go through [`Resource::insert`],
//! [`Resource::update`] and [`Resource::delete`], which re-run the query
//! after the write so the published rows are current before the call
//! returns. Responses carry a sequence ticket so a slow response can
//! never overwrite the result of a later request.

use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::auth::Auth;
use crate::error::{DataError, FALLBACK_ERROR_MESSAGE};
use crate::postgrest::{SortOrder, Table};

/// Description of the rows a [`Resource`] loads.
///
/// Two descriptors compare equal only when every field matches, and any
/// inequality makes [`Resource::set_query`] re-run the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceQuery {
    pub table: String,
    pub select: Option<String>,
    pub filters: BTreeMap<String, Value>,
    pub order: Option<(String, SortOrder)>,
    pub limit: Option<u32>,
    /// Column used to address single rows in `update` and `delete`
    pub key_column: String,
}

impl ResourceQuery {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            select: None,
            filters: BTreeMap::new(),
            order: None,
            limit: None,
            key_column: "id".to_string(),
        }
    }

    /// Request only the named columns instead of `*`
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    /// Keep rows where `column` equals `value`
    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.insert(column.to_string(), value.into());
        self
    }

    pub fn order(mut self, column: &str, direction: SortOrder) -> Self {
        self.order = Some((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, count: u32) -> Self {
        self.limit = Some(count);
        self
    }

    pub fn key_column(mut self, column: &str) -> Self {
        self.key_column = column.to_string();
        self
    }
}

/// Failure captured in a [`ResourceState`], reduced to what a UI shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceError {
    pub message: String,
    pub code: Option<String>,
}

impl ResourceError {
    fn from_data_error(error: &DataError) -> Self {
        match error {
            DataError::Api { body, .. } => Self {
                message: body
                    .message
                    .clone()
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string()),
                code: body.code.clone(),
            },
            DataError::UnparsedApi { message, .. } if !message.is_empty() => Self {
                message: message.clone(),
                code: None,
            },
            _ => Self {
                message: FALLBACK_ERROR_MESSAGE.to_string(),
                code: None,
            },
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Published snapshot of a [`Resource`].
///
/// `data` survives a failed reload so consumers keep showing the last
/// good rows next to the error.
#[derive(Debug, Clone)]
pub struct ResourceState<T> {
    pub loading: bool,
    pub data: Option<Vec<T>>,
    pub error: Option<ResourceError>,
}

impl<T> ResourceState<T> {
    fn initial() -> Self {
        Self {
            loading: true,
            data: None,
            error: None,
        }
    }
}

/// A table query bound to observable state.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
pub struct Resource<T> {
    base_url: String,
    key: String,
    schema: String,
    http_client: Client,
    auth: Arc<Auth>,
    query: Mutex<ResourceQuery>,
    // Monotonic ticket; a response only lands if no newer fetch started
    seq: AtomicU64,
    state: watch::Sender<ResourceState<T>>,
    state_rx: watch::Receiver<ResourceState<T>>,
}

impl<T: DeserializeOwned + Clone> Resource<T> {
    pub(crate) fn new(
        base_url: &str,
        key: &str,
        schema: &str,
        http_client: Client,
        auth: Arc<Auth>,
        query: ResourceQuery,
    ) -> Self {
        let (state, state_rx) = watch::channel(ResourceState::initial());
        Self {
            base_url: base_url.to_string(),
            key: key.to_string(),
            schema: schema.to_string(),
            http_client,
            auth,
            query: Mutex::new(query),
            seq: AtomicU64::new(0),
            state,
            state_rx,
        }
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.state_rx.clone()
    }

    /// Current state snapshot
    pub fn state(&self) -> ResourceState<T> {
        self.state_rx.borrow().clone()
    }

    /// Current query descriptor
    pub fn query(&self) -> ResourceQuery {
        self.query.lock().unwrap().clone()
    }

    fn table(&self, name: &str) -> Table {
        let mut table =
            Table::new(&self.base_url, &self.key, name, self.http_client.clone())
                .schema(&self.schema);
        if let Some(session) = self.auth.get_session() {
            table = table.with_auth(&session.access_token);
        }
        table
    }

    async fn run_query(&self, query: &ResourceQuery) -> Result<Vec<T>, DataError> {
        let mut table = self
            .table(&query.table)
            .select(query.select.as_deref().unwrap_or("*"));
        for (column, value) in &query.filters {
            table = table.eq(column, &filter_value(value));
        }
        if let Some((column, direction)) = &query.order {
            table = table.order(column, *direction);
        }
        if let Some(limit) = query.limit {
            table = table.limit(limit);
        }
        table.execute().await
    }

    /// Run the query and publish the result.
    ///
    /// A failure keeps the previously published rows and records the
    /// error next to them. When fetches overlap, only the most recently
    /// started one may publish; the others are discarded on arrival.
    pub async fn fetch(&self) {
        let ticket = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let query = self.query.lock().unwrap().clone();

        self.state.send_modify(|state| state.loading = true);
        debug!("loading {} (ticket {})", query.table, ticket);

        let result = self.run_query(&query).await;

        // Ticket check and publish share the channel lock; a stale
        // completion cannot land once a newer fetch has settled.
        let published = self.state.send_if_modified(|state| {
            if self.seq.load(Ordering::SeqCst) != ticket {
                return false;
            }
            state.loading = false;
            match result {
                Ok(rows) => {
                    state.data = Some(rows);
                    state.error = None;
                }
                Err(error) => {
                    state.error = Some(ResourceError::from_data_error(&error));
                }
            }
            true
        });
        if !published {
            debug!("discarding stale rows for {} (ticket {})", query.table, ticket);
        }
    }

    /// Re-run the current query
    pub async fn refetch(&self) {
        self.fetch().await;
    }

    /// Replace the query descriptor.
    ///
    /// Reloads when the new descriptor differs from the current one in
    /// any field; an identical descriptor is a no-op.
    pub async fn set_query(&self, query: ResourceQuery) {
        {
            let mut current = self.query.lock().unwrap();
            if *current == query {
                debug!("query for {} unchanged, keeping current rows", query.table);
                return;
            }
            *current = query;
        }
        self.fetch().await;
    }

    /// Insert rows, then reload so the published state includes them.
    ///
    /// The write's own failure is returned; a failure during the reload
    /// is recorded in the state instead.
    pub async fn insert<V: Serialize>(&self, values: &V) -> Result<Vec<Value>, DataError> {
        let table_name = self.query.lock().unwrap().table.clone();
        let rows = self.table(&table_name).insert(values).await?;
        self.fetch().await;
        Ok(rows)
    }

    /// Update the row whose key column equals `id`, then reload
    pub async fn update<V: Serialize>(
        &self,
        id: impl Into<Value>,
        values: &V,
    ) -> Result<Vec<Value>, DataError> {
        let (table_name, key_column) = {
            let query = self.query.lock().unwrap();
            (query.table.clone(), query.key_column.clone())
        };
        let id = id.into();
        let rows = self
            .table(&table_name)
            .eq(&key_column, &filter_value(&id))
            .update(values)
            .await?;
        self.fetch().await;
        Ok(rows)
    }

    /// Delete the row whose key column equals `id`, then reload
    pub async fn delete(&self, id: impl Into<Value>) -> Result<Vec<Value>, DataError> {
        let (table_name, key_column) = {
            let query = self.query.lock().unwrap();
            (query.table.clone(), query.key_column.clone())
        };
        let id = id.into();
        let rows = self
            .table(&table_name)
            .eq(&key_column, &filter_value(&id))
            .delete()
            .await?;
        self.fetch().await;
        Ok(rows)
    }
}

// Strings go into the filter bare; everything else keeps its JSON form
fn filter_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
