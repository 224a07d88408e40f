//! Swappable DOM search strategies.

use super::NodeRef;
use crate::errors::StepError;
use std::fmt;
use std::sync::Arc;

type SearchFn = dyn Fn(&NodeRef) -> Result<Vec<NodeRef>, StepError> + Send + Sync;

/// A search from one node to zero or more nodes.
///
/// The engine never inspects the strategy; it only calls [`Search::run`].
#[derive(Clone)]
pub struct Search {
    label: String,
    func: Arc<SearchFn>,
}

impl Search {
    /// Wraps a custom search closure.
    pub fn new<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(&NodeRef) -> Result<Vec<NodeRef>, StepError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    /// Returns a short description used in step names and logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs the search from `node`.
    pub fn run(&self, node: &NodeRef) -> Result<Vec<NodeRef>, StepError> {
        (self.func)(node)
    }

    /// Direct element children.
    #[must_use]
    pub fn children() -> Self {
        Self::new("children", |node| Ok(node.children()))
    }

    /// The parent element.
    #[must_use]
    pub fn parent() -> Self {
        Self::new("parent", |node| Ok(node.parent().into_iter().collect()))
    }

    /// All descendants in document order.
    #[must_use]
    pub fn descendants() -> Self {
        Self::new("descendants", |node| {
            let mut found = Vec::new();
            collect_descendants(node, &mut found);
            Ok(found)
        })
    }

    /// Elements sharing the node's parent, excluding the node itself.
    #[must_use]
    pub fn siblings() -> Self {
        Self::new("siblings", |node| {
            let Some(parent) = node.parent() else {
                return Ok(Vec::new());
            };
            let own = node.sibling_index();
            Ok(parent
                .children()
                .into_iter()
                .enumerate()
                .filter(|(index, _)| Some(*index) != own)
                .map(|(_, sibling)| sibling)
                .collect())
        })
    }

    /// Descendants with the given tag name.
    #[must_use]
    pub fn by_tag(tag: impl Into<String>) -> Self {
        let tag = tag.into().to_ascii_lowercase();
        Self::new(format!("by_tag({tag})"), move |node| {
            let mut found = Vec::new();
            collect_descendants(node, &mut found);
            found.retain(|n| n.tag_name() == tag);
            Ok(found)
        })
    }

    /// Descendants matching a CSS selector.
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        let selector = selector.into();
        Self::new(format!("css({selector})"), move |node| {
            Ok(node.select_css(&selector)?)
        })
    }
}

fn collect_descendants(node: &NodeRef, out: &mut Vec<NodeRef>) {
    for child in node.children() {
        out.push(child.clone());
        collect_descendants(&child, out);
    }
}

impl fmt::Debug for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Search").field("label", &self.label).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementBuilder;

    fn list() -> NodeRef {
        ElementBuilder::new("ul")
            .child(ElementBuilder::new("li").text("A"))
            .child(
                ElementBuilder::new("li")
                    .text("B")
                    .child(ElementBuilder::new("span").text("x")),
            )
            .child(ElementBuilder::new("li").text("C"))
            .build()
            .into_node()
    }

    fn texts(nodes: &[NodeRef]) -> Vec<String> {
        nodes.iter().map(|n| n.text()).collect()
    }

    #[test]
    fn test_children_and_parent() {
        let root = list();
        let children = Search::children().run(&root).unwrap();
        assert_eq!(texts(&children), vec!["A", "Bx", "C"]);

        let parent = Search::parent().run(&children[0]).unwrap();
        assert_eq!(parent.len(), 1);
        assert_eq!(parent[0].tag_name(), "ul");
        assert!(Search::parent().run(&root).unwrap().is_empty());
    }

    #[test]
    fn test_descendants_and_tag() {
        let root = list();
        assert_eq!(Search::descendants().run(&root).unwrap().len(), 4);
        let spans = Search::by_tag("SPAN").run(&root).unwrap();
        assert_eq!(texts(&spans), vec!["x"]);
    }

    #[test]
    fn test_siblings() {
        let root = list();
        let children = root.children();
        let siblings = Search::siblings().run(&children[1]).unwrap();
        assert_eq!(texts(&siblings), vec!["A", "C"]);
    }

    #[test]
    fn test_custom_search_error() {
        let failing = Search::new("failing", |_| Err(anyhow::anyhow!("nope").into()));
        assert_eq!(failing.label(), "failing");
        assert!(failing.run(&list()).is_err());
    }
}
