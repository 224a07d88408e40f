//! HTTP page loader backed by `reqwest`.

use super::{html, resolve_url, NodeRef, PageLoader, PageRoot};
use crate::config::FetchConfig;
use crate::errors::LoadError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

/// Loads pages over HTTP and parses them as HTML.
///
/// There is no script engine: clicking an element follows its `href`,
/// resolved against the page the element was found on.
#[derive(Debug)]
pub struct HttpPageLoader {
    client: reqwest::Client,
}

impl HttpPageLoader {
    /// Creates a loader from fetch settings.
    pub fn new(config: &FetchConfig) -> Result<Self, LoadError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Ignoring invalid header"),
            }
        }

        let timeout = config
            .timeout()
            .map_err(|reason| LoadError::Unsupported(reason.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| LoadError::transport("", e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    async fn load_page(&self, url: &str) -> Result<PageRoot, LoadError> {
        debug!(url, "Fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::transport(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| LoadError::transport(url, e.to_string()))?;

        Ok(html::parse_document(&final_url, &body))
    }

    async fn click(&self, page_url: &str, node: &NodeRef) -> Result<PageRoot, LoadError> {
        let href = node
            .attribute("href")
            .ok_or_else(|| LoadError::Unsupported(format!("click on <{}> without href", node.tag_name())))?;
        self.load_page(&resolve_url(page_url, &href)?).await
    }
}
