//! Reqwest-Backed HTTP Seam
//!
//! Implementation of [`HttpClient`] used by the curl worker.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::domain::tools::{HttpClient, HttpResponse, ToolError};

#[derive(Default)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ToolError> {
        let method = reqwest::Method::from_str(&method.to_uppercase())
            .map_err(|_| ToolError::Http(format!("invalid HTTP method '{method}'")))?;

        let mut request = self.client.request(method, url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = tokio::select! {
            result = request.send() => result.map_err(|e| ToolError::Http(e.to_string()))?,
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
        };

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Http(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}
