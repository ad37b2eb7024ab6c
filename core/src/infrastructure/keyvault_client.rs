//! Secret-Store HTTP Client
//!
//! Reqwest-backed implementation of the [`SecretStore`] seam. Talks to a
//! cloud secret store over its REST surface: list secret names under the
//! vault URL, then fetch each value. Every call sits under a 30 s
//! wall-clock ceiling.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::tools::{SecretStore, ToolError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct KeyvaultClient {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SecretList {
    value: Vec<SecretRef>,
}

#[derive(Debug, Deserialize)]
struct SecretRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: String,
}

impl KeyvaultClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<T, ToolError> {
        let response = tokio::select! {
            result = self.client.get(url).send() => {
                result.map_err(|e| ToolError::Http(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
        };

        if !response.status().is_success() {
            return Err(ToolError::Http(format!(
                "HTTP {} fetching {url}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ToolError::Http(e.to_string()))
    }
}

impl Default for KeyvaultClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for KeyvaultClient {
    async fn fetch_secrets(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, ToolError> {
        let base = url.trim_end_matches('/');
        let list: SecretList = self
            .get_json(&format!("{base}/secrets?api-version=7.4"), cancel)
            .await?;

        debug!(count = list.value.len(), "Listed secrets");

        let mut secrets = HashMap::with_capacity(list.value.len());
        for secret in list.value {
            // The id is the full secret URL; the last segment is the name.
            let name = secret
                .id
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(&secret.id)
                .to_string();

            let bundle: SecretBundle = self
                .get_json(&format!("{base}/secrets/{name}?api-version=7.4"), cancel)
                .await?;
            secrets.insert(name, bundle.value);
        }

        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetches_listed_secrets() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let list = server
            .mock("GET", "/secrets?api-version=7.4")
            .with_status(200)
            .with_body(format!(
                r#"{{"value": [{{"id": "{url}/secrets/db-password"}}]}}"#
            ))
            .create_async()
            .await;
        let secret = server
            .mock("GET", "/secrets/db-password?api-version=7.4")
            .with_status(200)
            .with_body(r#"{"value": "hunter2"}"#)
            .create_async()
            .await;

        let client = KeyvaultClient::new();
        let secrets = client
            .fetch_secrets(&url, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(secrets["db-password"], "hunter2");
        list.assert_async().await;
        secret.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/secrets?api-version=7.4")
            .with_status(403)
            .create_async()
            .await;

        let client = KeyvaultClient::new();
        let result = client
            .fetch_secrets(&server.url(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ToolError::Http(_))));
    }
}
