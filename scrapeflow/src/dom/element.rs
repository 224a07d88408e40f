//! In-memory element tree.

use super::{DomNode, NodeRef};
#[cfg(feature = "html")]
use crate::errors::SearchError;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "html")]
type Source = super::html::SourceDocument;
#[cfg(not(feature = "html"))]
type Source = str;

/// An immutable element of an in-memory document.
///
/// Elements are cheap to clone and safe to share across worker tasks. Every
/// handle keeps the whole document alive so parent links never dangle.
#[derive(Clone)]
pub struct Element {
    root: Arc<ElementData>,
    data: Arc<ElementData>,
}

struct ElementData {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Arc<ElementData>>,
    parent: Weak<ElementData>,
    /// Element-index path from the document root.
    path: Vec<usize>,
    /// Markup the tree was parsed from, when it came from HTML.
    source: Option<Arc<Source>>,
}

enum Content {
    Text(String),
    Element(ElementBuilder),
}

/// Builder for element trees.
pub struct ElementBuilder {
    tag: String,
    attributes: Vec<(String, String)>,
    content: Vec<Content>,
}

impl ElementBuilder {
    /// Starts a new element.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            content: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Appends a text node.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.content.push(Content::Text(text.into()));
        self
    }

    /// Appends a child element.
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.content.push(Content::Element(child));
        self
    }

    /// Appends several child elements.
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Self>) -> Self {
        self.content
            .extend(children.into_iter().map(Content::Element));
        self
    }

    /// Builds the tree rooted at this element.
    #[must_use]
    pub fn build(self) -> Element {
        Element::from_root(materialize(self, Weak::new(), Vec::new(), None))
    }

    /// Builds the tree and records the markup it was parsed from.
    #[cfg(feature = "html")]
    #[must_use]
    pub(crate) fn build_with_source(self, source: Arc<str>) -> Element {
        let document = Arc::new(Source::new(source));
        Element::from_root(materialize(self, Weak::new(), Vec::new(), Some(document)))
    }
}

fn materialize(
    builder: ElementBuilder,
    parent: Weak<ElementData>,
    path: Vec<usize>,
    source: Option<Arc<Source>>,
) -> Arc<ElementData> {
    Arc::new_cyclic(|me| {
        let mut text = String::new();
        let mut children = Vec::new();
        for content in builder.content {
            match content {
                Content::Text(t) => text.push_str(&t),
                Content::Element(child) => {
                    let mut child_path = path.clone();
                    child_path.push(children.len());
                    let child = materialize(child, me.clone(), child_path, source.clone());
                    text.push_str(&child.text);
                    children.push(child);
                }
            }
        }

        ElementData {
            tag: builder.tag,
            attributes: builder.attributes,
            text,
            children,
            parent,
            path,
            source,
        }
    })
}

impl Element {
    fn from_root(root: Arc<ElementData>) -> Self {
        Self {
            data: root.clone(),
            root,
        }
    }

    fn wrap(&self, data: Arc<ElementData>) -> NodeRef {
        Arc::new(Self {
            root: self.root.clone(),
            data,
        })
    }

    /// Returns this element as a shared node handle.
    #[must_use]
    pub fn into_node(self) -> NodeRef {
        Arc::new(self)
    }

    #[cfg(feature = "html")]
    fn resolve(root: &Arc<ElementData>, path: &[usize]) -> Option<Arc<ElementData>> {
        let mut current = root.clone();
        for &index in path {
            current = current.children.get(index)?.clone();
        }
        Some(current)
    }
}

impl DomNode for Element {
    fn tag_name(&self) -> &str {
        &self.data.tag
    }

    fn text(&self) -> String {
        self.data.text.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.data
            .attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn children(&self) -> Vec<NodeRef> {
        self.data
            .children
            .iter()
            .map(|child| self.wrap(child.clone()))
            .collect()
    }

    fn parent(&self) -> Option<NodeRef> {
        self.data.parent.upgrade().map(|parent| self.wrap(parent))
    }

    fn sibling_index(&self) -> Option<usize> {
        self.data.path.last().copied()
    }

    #[cfg(feature = "html")]
    fn select_css(&self, selector: &str) -> Result<Vec<NodeRef>, SearchError> {
        let Some(source) = self.data.source.as_deref() else {
            return Err(SearchError::Unsupported(format!(
                "css selector '{selector}' on a tree not parsed from HTML"
            )));
        };
        let paths = source.select_paths(&self.data.path, selector)?;
        Ok(paths
            .iter()
            .filter_map(|path| Self::resolve(&self.root, path))
            .map(|data| self.wrap(data))
            .collect())
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.data.tag)
            .field("attributes", &self.data.attributes)
            .field("children", &self.data.children.len())
            .finish()
    }
}
