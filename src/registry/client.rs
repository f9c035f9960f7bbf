//! Registry clients

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::Client;

use super::config::RegistryConfig;
use super::entry::{NewStream, RegistryEntry};
use super::error::RegistryError;

/// Access to the external stream registry
pub trait RegistryClient: Send + Sync + 'static {
    /// List every registered stream
    fn list_streams(
        &self,
    ) -> impl Future<Output = Result<Vec<RegistryEntry>, RegistryError>> + Send;

    /// Register a new stream
    fn add_stream(
        &self,
        stream: &NewStream,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;
}

/// Registry client over HTTP
///
/// `GET <url>/streams` lists entries, `POST <url>/streams` inserts one.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    streams_url: String,
    client: Client,
}

impl HttpRegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            return Err(RegistryError::InvalidConfig(format!(
                "registry url '{}' is not http(s)",
                config.url
            )));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            streams_url: config.streams_url(),
            client,
        })
    }

    pub fn streams_url(&self) -> &str {
        &self.streams_url
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::Status {
        status: status.as_u16(),
        body,
    })
}

impl RegistryClient for HttpRegistryClient {
    async fn list_streams(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let response = self.client.get(&self.streams_url).send().await?;
        let body = check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn add_stream(&self, stream: &NewStream) -> Result<(), RegistryError> {
        let response = self
            .client
            .post(&self.streams_url)
            .json(stream)
            .send()
            .await?;
        let text = check_status(response).await?.text().await.unwrap_or_default();

        tracing::debug!(name = %stream.name, response = %text, "Registry accepted stream");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<RegistryEntry>,
    inserts: Vec<NewStream>,
    unreachable: bool,
    rejected: HashSet<String>,
}

/// In-process registry
///
/// Keeps entries in memory. Stands in for the HTTP client when no external
/// registry is configured, and observes reconciliation in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with entries of the given names
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        registry.lock().entries = names.into_iter().map(RegistryEntry::named).collect();
        registry
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Names of all entries, in insertion order
    pub fn names(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .map(|entry| entry.name().to_string())
            .collect()
    }

    /// Every insertion received so far
    pub fn inserts(&self) -> Vec<NewStream> {
        self.lock().inserts.clone()
    }

    /// Make every call fail as if the service were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Refuse insertions of `name`
    pub fn reject(&self, name: impl Into<String>) {
        self.lock().rejected.insert(name.into());
    }
}

impl RegistryClient for MemoryRegistry {
    async fn list_streams(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let state = self.lock();
        if state.unreachable {
            return Err(RegistryError::Network("registry unreachable".into()));
        }
        Ok(state.entries.clone())
    }

    async fn add_stream(&self, stream: &NewStream) -> Result<(), RegistryError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(RegistryError::Network("registry unreachable".into()));
        }
        if state.rejected.contains(&stream.name) {
            return Err(RegistryError::Status {
                status: 500,
                body: format!("cannot add '{}'", stream.name),
            });
        }

        state.inserts.push(stream.clone());
        state.entries.push(RegistryEntry::named(stream.name.clone()));
        Ok(())
    }
}
