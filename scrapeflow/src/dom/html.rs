//! HTML parsing into the in-memory element tree.
//!
//! Markup is parsed with `scraper` once per page and converted into
//! [`Element`]s, which are `Send + Sync`. `scraper` documents are not, so CSS
//! selection runs against the kept source: each distinct selector is matched
//! over the whole document once, and the element-index paths of its matches
//! are cached per document. A scoped selection keeps the cached matches below
//! the scope element.

use super::{Element, ElementBuilder, PageRoot};
use crate::errors::SearchError;
use parking_lot::Mutex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashMap;
use std::sync::Arc;

/// Parses a full HTML document into a page root.
#[must_use]
pub fn parse_document(url: &str, html: &str) -> PageRoot {
    let document = Html::parse_document(html);
    let builder = convert(document.root_element());
    let root: Element = builder.build_with_source(Arc::from(html));
    PageRoot::new(url, root.into_node())
}

fn convert(element: ElementRef<'_>) -> ElementBuilder {
    let value = element.value();
    let mut builder = ElementBuilder::new(value.name());
    for (name, attr) in value.attrs() {
        builder = builder.attr(name, attr);
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => builder = builder.text(&**text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    builder = builder.child(convert(child));
                }
            }
            _ => {}
        }
    }
    builder
}

/// Markup of a parsed page plus its selector matches.
pub(crate) struct SourceDocument {
    source: Arc<str>,
    matches: Mutex<HashMap<String, Arc<[Vec<usize>]>>>,
}

impl SourceDocument {
    pub(crate) fn new(source: Arc<str>) -> Self {
        Self {
            source,
            matches: Mutex::new(HashMap::new()),
        }
    }

    /// Selects descendants of the element at `path` and returns their paths,
    /// in document order.
    pub(crate) fn select_paths(
        &self,
        path: &[usize],
        selector: &str,
    ) -> Result<Vec<Vec<usize>>, SearchError> {
        let matches = self.matches_for(selector)?;
        Ok(matches
            .iter()
            .filter(|found| found.len() > path.len() && found.starts_with(path))
            .cloned()
            .collect())
    }

    fn matches_for(&self, selector: &str) -> Result<Arc<[Vec<usize>]>, SearchError> {
        if let Some(found) = self.matches.lock().get(selector) {
            return Ok(Arc::clone(found));
        }

        let parsed = Selector::parse(selector).map_err(|e| SearchError::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        let document = Html::parse_document(&self.source);
        let found: Arc<[Vec<usize>]> = document.select(&parsed).map(element_path).collect();

        // Two workers may race on the same selector; both computed the same set.
        let mut matches = self.matches.lock();
        Ok(Arc::clone(matches.entry(selector.to_string()).or_insert(found)))
    }

    #[cfg(test)]
    fn cached_selectors(&self) -> usize {
        self.matches.lock().len()
    }
}

fn element_path(element: ElementRef<'_>) -> Vec<usize> {
    let mut path = Vec::new();
    let mut node = *element;
    while let Some(parent) = node.parent() {
        if ElementRef::wrap(parent).is_none() {
            break;
        }
        path.push(node.prev_siblings().filter(|s| s.value().is_element()).count());
        node = parent;
    }
    path.reverse();
    path
}
