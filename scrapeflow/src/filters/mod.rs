//! Filters over found nodes.
//!
//! A filter is a pure function from a node list to a node list. Steps compose
//! them in declaration order through a [`FilterPipeline`].

use crate::dom::NodeRef;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

type FilterFn = dyn Fn(Vec<NodeRef>) -> Vec<NodeRef> + Send + Sync;

/// A named node-list transformation.
#[derive(Clone)]
pub struct Filter {
    name: String,
    func: Arc<FilterFn>,
}

impl Filter {
    /// Wraps a custom list transformation.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<NodeRef>) -> Vec<NodeRef> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Keeps nodes for which `predicate` holds.
    pub fn matching<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&NodeRef) -> bool + Send + Sync + 'static,
    {
        Self::new(name, move |mut nodes| {
            nodes.retain(|n| predicate(n));
            nodes
        })
    }

    /// Keeps only the first node.
    #[must_use]
    pub fn first() -> Self {
        Self::new("first", |nodes| nodes.into_iter().take(1).collect())
    }

    /// Keeps only the last node.
    #[must_use]
    pub fn last() -> Self {
        Self::new("last", |mut nodes| nodes.pop().into_iter().collect())
    }

    /// Keeps the node at `index` (zero based).
    #[must_use]
    pub fn nth(index: usize) -> Self {
        Self::new(format!("nth({index})"), move |nodes| {
            nodes.into_iter().nth(index).into_iter().collect()
        })
    }

    /// Drops the first `count` nodes.
    #[must_use]
    pub fn skip(count: usize) -> Self {
        Self::new(format!("skip({count})"), move |nodes| {
            nodes.into_iter().skip(count).collect()
        })
    }

    /// Keeps at most `count` nodes.
    #[must_use]
    pub fn limit(count: usize) -> Self {
        Self::new(format!("limit({count})"), move |nodes| {
            nodes.into_iter().take(count).collect()
        })
    }

    /// Keeps nodes that carry the attribute.
    #[must_use]
    pub fn has_attribute(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::matching(format!("has_attribute({name})"), move |n| {
            n.attribute(&name).is_some()
        })
    }

    /// Keeps nodes whose attribute equals `value`.
    #[must_use]
    pub fn attribute_equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        Self::matching(format!("attribute_equals({name}={value})"), move |n| {
            n.attribute(&name).as_deref() == Some(value.as_str())
        })
    }

    /// Keeps nodes whose text contains `needle`.
    #[must_use]
    pub fn text_contains(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::matching(format!("text_contains({needle})"), move |n| {
            n.text().contains(&needle)
        })
    }

    /// Keeps nodes whose text matches `pattern`.
    #[must_use]
    pub fn text_matches(pattern: Regex) -> Self {
        Self::matching(format!("text_matches({pattern})"), move |n| {
            pattern.is_match(&n.text())
        })
    }

    /// Returns the filter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the filter.
    #[must_use]
    pub fn apply(&self, nodes: Vec<NodeRef>) -> Vec<NodeRef> {
        (self.func)(nodes)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("name", &self.name).finish()
    }
}

/// Filters applied in declaration order.
#[derive(Debug, Clone, Default)]
pub struct FilterPipeline {
    filters: Vec<Filter>,
}

impl FilterPipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter.
    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    /// Returns the number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns true if no filters are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs every filter in order.
    #[must_use]
    pub fn apply(&self, nodes: Vec<NodeRef>) -> Vec<NodeRef> {
        self.filters
            .iter()
            .fold(nodes, |nodes, filter| filter.apply(nodes))
    }
}
