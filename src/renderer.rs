//! Narrow interface to the external headless-browser renderer.
//!
//! Some jurisdictions serve their documents from single-page applications
//! that plain HTTP fetching cannot read. Those sources are discovered
//! through the offline catalog and retrieved one document at a time, on
//! explicit user action, through a renderer service. The renderer itself is
//! an external collaborator; this module only defines the seam and its
//! HTTP realisation. Bulk crawling through this path is not supported.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::LexError;

/// One rendered document.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderedDocument {
    pub url: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Renders a single document URL into extractable text.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedDocument, LexError>;
}

/// HTTP client for a renderer service exposing `POST /render`.
pub struct HttpRenderer {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self, LexError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LexError::internal(format!("http client init failed: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl DocumentRenderer for HttpRenderer {
    async fn render(&self, url: &str) -> Result<RenderedDocument, LexError> {
        let response = self
            .client
            .post(format!("{}/render", self.endpoint))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| LexError::RendererFailed {
                message: format!("renderer unreachable: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LexError::RendererFailed {
                message: format!("renderer returned {}", status),
            });
        }

        let mut rendered: RenderedDocument =
            response.json().await.map_err(|e| LexError::RendererFailed {
                message: format!("malformed renderer response: {}", e),
            })?;
        if rendered.url.is_empty() {
            rendered.url = url.to_string();
        }
        if rendered.text.trim().is_empty() {
            return Err(LexError::RendererFailed {
                message: "renderer returned an empty document".to_string(),
            });
        }
        Ok(rendered)
    }
}
