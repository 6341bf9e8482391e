use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use solo_core::{DependencyError, Payload};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An external round trip made once per inbound message.
#[async_trait]
pub trait Dependency: Send + Sync {
    async fn call(&self, payload: &Payload) -> Result<(), DependencyError>;
}

/// Issues a GET against a fixed URL. Any HTTP status counts as a completed
/// round trip; only transport failures are errors.
pub struct HttpDependency {
    client: Client,
    url: String,
}

impl HttpDependency {
    pub fn new(url: impl Into<String>) -> Result<Self, DependencyError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| DependencyError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Dependency for HttpDependency {
    async fn call(&self, _payload: &Payload) -> Result<(), DependencyError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DependencyError::Network(e.to_string()))?;
        // Drain the body so the measured time covers the full response.
        response
            .bytes()
            .await
            .map_err(|e| DependencyError::Network(e.to_string()))?;
        Ok(())
    }
}
