//! Configuration options for the client

use std::time::Duration;

/// Configuration options for the client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout applied to every outgoing request
    pub request_timeout: Option<Duration>,

    /// The database schema queried through the data API
    pub db_schema: String,

    /// Capacity of the session event channel; subscribers that fall more
    /// than this many events behind observe a lag and must reconcile
    pub auth_event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            db_schema: "public".to_string(),
            auth_event_capacity: 16,
        }
    }
}

impl ClientOptions {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the database schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }

    /// Set the session event channel capacity
    pub fn with_auth_event_capacity(mut self, value: usize) -> Self {
        self.auth_event_capacity = value;
        self
    }
}
