//! Page-load collaborator trait and an in-memory implementation.

use super::{NodeRef, PageRoot};
use crate::errors::LoadError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use url::Url;

/// Loads pages and performs navigation actions.
///
/// Implementations decide how sessions are shared; the engine only needs the
/// resulting root node and its URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Loads the page at `url`.
    async fn load_page(&self, url: &str) -> Result<PageRoot, LoadError>;

    /// Clicks `node`, found on the page at `page_url`, and returns the page
    /// shown afterwards.
    async fn click(&self, page_url: &str, node: &NodeRef) -> Result<PageRoot, LoadError>;
}

/// Resolves `href` against `base` following RFC 3986 reference resolution.
///
/// # Errors
///
/// Returns [`LoadError::InvalidUrl`] if `base` is not an absolute URL or the
/// joined reference cannot be parsed.
pub fn resolve_url(base: &str, href: &str) -> Result<String, LoadError> {
    let base = Url::parse(base).map_err(|e| LoadError::invalid_url(base, e.to_string()))?;
    let joined = base
        .join(href.trim())
        .map_err(|e| LoadError::invalid_url(href, e.to_string()))?;
    Ok(joined.into())
}

/// A loader serving pages from memory.
///
/// Clicking follows the clicked element's `href`, resolved against the page
/// the element was found on.
#[derive(Debug, Default)]
pub struct StaticPageLoader {
    pages: HashMap<String, PageRoot>,
    history: RwLock<Vec<String>>,
}

impl StaticPageLoader {
    /// Creates an empty site.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a page.
    #[must_use]
    pub fn with_page(mut self, url: impl Into<String>, root: NodeRef) -> Self {
        let url = url.into();
        self.pages.insert(url.clone(), PageRoot::new(url, root));
        self
    }

    /// Returns every URL served so far, in request order.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.read().clone()
    }

    fn serve(&self, url: &str) -> Result<PageRoot, LoadError> {
        let page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| LoadError::not_found(url))?;
        self.history.write().push(url.to_string());
        Ok(page)
    }
}

#[async_trait]
impl PageLoader for StaticPageLoader {
    async fn load_page(&self, url: &str) -> Result<PageRoot, LoadError> {
        self.serve(url)
    }

    async fn click(&self, page_url: &str, node: &NodeRef) -> Result<PageRoot, LoadError> {
        match node.attribute("href") {
            Some(href) => self.serve(&resolve_url(page_url, &href)?),
            // Clicking something that is not a link keeps the current page.
            None => self.serve(page_url),
        }
    }
}
