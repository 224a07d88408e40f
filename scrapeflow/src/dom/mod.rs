//! Document model and page-load collaborators.
//!
//! The engine only talks to documents through [`DomNode`] and to the network
//! through [`PageLoader`]. This module provides:
//! - the node trait and page root type
//! - an in-memory element tree (also the target of HTML parsing)
//! - stock search strategies
//! - page loaders (static in-memory site, and HTTP behind the `http` feature)

mod element;
#[cfg(feature = "html")]
pub mod html;
#[cfg(feature = "http")]
mod http;
mod loader;
mod search;

pub use element::{Element, ElementBuilder};
#[cfg(feature = "http")]
pub use http::HttpPageLoader;
pub use loader::{resolve_url, PageLoader, StaticPageLoader};
#[cfg(test)]
pub use loader::MockPageLoader;
pub use search::Search;

use crate::errors::SearchError;
use std::fmt;
use std::sync::Arc;

/// A shared handle to a document node.
pub type NodeRef = Arc<dyn DomNode>;

/// Read-only access to one node of a loaded document.
pub trait DomNode: Send + Sync + fmt::Debug {
    /// Returns the element's tag name in lowercase.
    fn tag_name(&self) -> &str;

    /// Returns the concatenated text content of the node and its descendants.
    fn text(&self) -> String;

    /// Returns an attribute value.
    fn attribute(&self, name: &str) -> Option<String>;

    /// Returns the element children in document order.
    fn children(&self) -> Vec<NodeRef>;

    /// Returns the parent element, if any.
    fn parent(&self) -> Option<NodeRef>;

    /// Returns the node's position among its parent's element children.
    fn sibling_index(&self) -> Option<usize>;

    /// Returns descendants matching a CSS selector, in document order.
    fn select_css(&self, selector: &str) -> Result<Vec<NodeRef>, SearchError> {
        Err(SearchError::Unsupported(format!("css selector '{selector}'")))
    }
}

/// The root of a loaded page.
#[derive(Debug, Clone)]
pub struct PageRoot {
    /// The URL the page was loaded from (after redirects).
    pub url: String,
    /// The document's root node.
    pub root: NodeRef,
}

impl PageRoot {
    /// Creates a page root.
    #[must_use]
    pub fn new(url: impl Into<String>, root: NodeRef) -> Self {
        Self {
            url: url.into(),
            root,
        }
    }
}
