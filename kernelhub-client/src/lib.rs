//! KernelHub HTTP Client
//!
//! A type-safe HTTP client for the KernelHub master API.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use kernelhub_client::KernelhubClient;
//! use kernelhub_core::domain::task::TaskKind;
//! use kernelhub_core::dto::log::LogQuery;
//! use kernelhub_core::dto::task::LaunchTask;
//!
//! # async fn example() -> kernelhub_client::Result<()> {
//! let client = KernelhubClient::new("http://localhost:8080");
//!
//! let task = client
//!     .launch_task(LaunchTask {
//!         kind: TaskKind::Notebook,
//!         owner: "alice".to_string(),
//!         template_name: None,
//!         config: Default::default(),
//!         files: Vec::new(),
//!     })
//!     .await?;
//!
//! let query = LogQuery { follow: true, ..LogQuery::default() };
//! let mut logs = client.stream_logs(task.id, query);
//! while let Some(entry) = logs.next().await {
//!     println!("{}", entry?.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
mod logs;
mod tasks;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use logs::LogEntryStream;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the KernelHub master API
///
/// Groups of endpoints:
/// - Task lifecycle (launch, get, list, kill, purge)
/// - Log streaming
#[derive(Debug, Clone)]
pub struct KernelhubClient {
    /// Base URL of the master (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl KernelhubClient {
    /// Create a new client
    ///
    /// # Example
    /// ```
    /// use kernelhub_client::KernelhubClient;
    ///
    /// let client = KernelhubClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure proxies, TLS settings, etc. Do not set a
    /// total request timeout if you follow log streams.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the master
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::from_body(status.as_u16(), &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle a response that carries no content (kill, purge)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::from_body(status.as_u16(), &error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = KernelhubClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = KernelhubClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = KernelhubClient::with_client("http://localhost:8080", http_client);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
