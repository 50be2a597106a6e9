//! Session-synchronized data access for Supabase-backed applications.
//!
//! The client mirrors the remote authentication session as observable
//! state and binds table queries to observable row sets, so application
//! code reads state and issues writes without juggling tokens or
//! request lifecycles.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod postgrest;
pub mod resource;
pub mod storage;

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::auth::Auth;
use crate::config::ClientOptions;
use crate::context::SessionContext;
use crate::postgrest::Table;
use crate::resource::{Resource, ResourceQuery};
use crate::storage::StorageClient;

/// The main entry point for the client
pub struct Plinth {
    /// The base URL of the backing project
    pub url: String,
    /// The anonymous API key for the project
    pub key: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// Auth client, shared by session mirrors and resources
    pub auth: Arc<Auth>,
    /// Client options
    pub options: ClientOptions,
}

impl Plinth {
    /// Create a new client
    ///
    /// # Arguments
    ///
    /// * `project_url` - The base URL of your project
    /// * `api_key` - The anonymous API key of your project
    ///
    /// # Example
    ///
    /// ```
    /// use plinth::Plinth;
    ///
    /// let client = Plinth::new("https://your-project.supabase.co", "your-anon-key");
    /// ```
    pub fn new(project_url: &str, api_key: &str) -> Self {
        Self::new_with_options(project_url, api_key, ClientOptions::default())
    }

    /// Create a new client with custom options
    ///
    /// # Example
    ///
    /// ```
    /// use plinth::{config::ClientOptions, Plinth};
    ///
    /// let options = ClientOptions::default().with_db_schema("api");
    /// let client = Plinth::new_with_options(
    ///     "https://your-project.supabase.co",
    ///     "your-anon-key",
    ///     options,
    /// );
    /// ```
    pub fn new_with_options(project_url: &str, api_key: &str, options: ClientOptions) -> Self {
        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().expect("failed to construct HTTP client");

        let url = project_url.trim_end_matches('/').to_string();
        let auth = Arc::new(Auth::new(&url, api_key, http_client.clone(), &options));

        Self {
            url,
            key: api_key.to_string(),
            http_client,
            auth,
            options,
        }
    }

    /// Get a reference to the auth client for credential operations
    pub fn auth(&self) -> &Arc<Auth> {
        &self.auth
    }

    /// Start a session mirror backed by this client's auth state.
    ///
    /// The mirror runs as a background task until the returned context is
    /// dropped, so this must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use plinth::Plinth;
    ///
    /// # async fn run() {
    /// let client = Plinth::new("https://your-project.supabase.co", "your-anon-key");
    /// let session = client.context();
    /// session.ready().await;
    /// # }
    /// ```
    pub fn context(&self) -> SessionContext {
        SessionContext::start(self.auth.clone())
    }

    /// Build a query against a table or view.
    ///
    /// When a session is present the request runs as that user; otherwise
    /// it runs with the anonymous key only.
    ///
    /// # Example
    ///
    /// ```
    /// use plinth::Plinth;
    ///
    /// let client = Plinth::new("https://your-project.supabase.co", "your-anon-key");
    /// let query = client.from("posts").select("id,title");
    /// ```
    pub fn from(&self, table: &str) -> Table {
        let mut builder = Table::new(&self.url, &self.key, table, self.http_client.clone())
            .schema(&self.options.db_schema);
        if let Some(session) = self.auth.get_session() {
            builder = builder.with_auth(&session.access_token);
        }
        builder
    }

    /// Get a client for file operations
    ///
    /// # Example
    ///
    /// ```
    /// use plinth::Plinth;
    ///
    /// let client = Plinth::new("https://your-project.supabase.co", "your-anon-key");
    /// let storage = client.storage();
    /// ```
    pub fn storage(&self) -> StorageClient {
        StorageClient::new(&self.url, &self.key, self.http_client.clone())
    }

    /// Bind a query descriptor to observable state.
    ///
    /// The resource starts empty; call [`Resource::fetch`] to load it, or
    /// use [`Plinth::bind`] to create and load in one step.
    ///
    /// # Example
    ///
    /// ```
    /// use plinth::{resource::ResourceQuery, Plinth};
    ///
    /// let client = Plinth::new("https://your-project.supabase.co", "your-anon-key");
    /// let posts = client.resource::<serde_json::Value>(ResourceQuery::new("posts"));
    /// ```
    pub fn resource<T: DeserializeOwned + Clone>(&self, query: ResourceQuery) -> Arc<Resource<T>> {
        Arc::new(Resource::new(
            &self.url,
            &self.key,
            &self.options.db_schema,
            self.http_client.clone(),
            self.auth.clone(),
            query,
        ))
    }

    /// Bind a query descriptor and run its first load
    pub async fn bind<T: DeserializeOwned + Clone>(&self, query: ResourceQuery) -> Arc<Resource<T>> {
        let resource = self.resource(query);
        resource.fetch().await;
        resource
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::ClientOptions;
    pub use crate::context::{SessionContext, SessionPhase};
    pub use crate::error::{AuthError, DataError, StorageError};
    pub use crate::postgrest::SortOrder;
    pub use crate::resource::{ResourceQuery, ResourceState};
    pub use crate::Plinth;
}
