//! Instrument Catalog Client
//!
//! Reads the active instrument list from the BitMEX REST API.

use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{CatalogError, CatalogSource};
use crate::domain::symbols::Symbol;
use crate::infrastructure::bitmex::messages::InstrumentInfo;

/// Path of the active instrument listing.
pub const ACTIVE_INSTRUMENTS_PATH: &str = "/api/v1/instrument/active";

/// HTTP [`CatalogSource`] backed by `GET /api/v1/instrument/active`.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalog {
    /// Create a catalog client for a REST base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(rest_base_url: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bitmex-stream-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url: format!(
                "{}{ACTIVE_INSTRUMENTS_PATH}",
                rest_base_url.trim_end_matches('/')
            ),
        })
    }

    /// Full catalog URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn fetch_symbols(&self) -> Result<Vec<Symbol>, CatalogError> {
        tracing::debug!(url = %self.url, "Fetching instrument catalog");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CatalogError::Request(e.to_string()))?;

        let instruments: Vec<InstrumentInfo> = response
            .json()
            .await
            .map_err(|e| CatalogError::Malformed(e.to_string()))?;

        Ok(instruments.into_iter().map(|i| i.symbol).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let catalog =
            HttpCatalog::new("https://testnet.bitmex.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            catalog.url(),
            "https://testnet.bitmex.com/api/v1/instrument/active"
        );
    }

    #[tokio::test]
    async fn unreachable_catalog_is_request_error() {
        let catalog = HttpCatalog::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();

        let result = catalog.fetch_symbols().await;

        assert!(matches!(result, Err(CatalogError::Request(_))));
    }
}
