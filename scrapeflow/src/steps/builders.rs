//! Free functions that declare steps.
//!
//! ```ignore
//! use scrapeflow::prelude::*;
//!
//! let item = css("li.item")
//!     .collect(Collector::model::<Item>().publish())
//!     .next(&text().collect(Collector::one(|i: &mut Item, v| i.name = v.into())));
//! let steps = paginate(&css("a.next").next(&click().next(&yield_next_page()))).next(&item);
//! ```

use super::kind::{PageLink, Pagination, Parser};
use super::{StepKind, StepNode};
use crate::dom::Search;

/// A step running a search strategy.
#[track_caller]
#[must_use]
pub fn search(search: Search) -> StepNode {
    StepNode::new(StepKind::Search(search))
}

/// Direct element children.
#[track_caller]
#[must_use]
pub fn children() -> StepNode {
    search(Search::children())
}

/// The parent element.
#[track_caller]
#[must_use]
pub fn parent() -> StepNode {
    search(Search::parent())
}

/// Elements sharing the input node's parent.
#[track_caller]
#[must_use]
pub fn siblings() -> StepNode {
    search(Search::siblings())
}

/// All descendants in document order.
#[track_caller]
#[must_use]
pub fn descendants() -> StepNode {
    search(Search::descendants())
}

/// Descendants with the given tag.
#[track_caller]
#[must_use]
pub fn by_tag(tag: impl Into<String>) -> StepNode {
    search(Search::by_tag(tag))
}

/// Descendants matching a CSS selector.
#[track_caller]
#[must_use]
pub fn css(selector: impl Into<String>) -> StepNode {
    search(Search::css(selector))
}

/// A step running a parser.
#[track_caller]
#[must_use]
pub fn parse(parser: Parser) -> StepNode {
    StepNode::new(StepKind::Parse(parser))
}

/// The input node's trimmed text.
#[track_caller]
#[must_use]
pub fn text() -> StepNode {
    parse(Parser::text())
}

/// An attribute of the input node.
#[track_caller]
#[must_use]
pub fn attribute(name: impl Into<String>) -> StepNode {
    parse(Parser::attribute(name))
}

/// Loads the page linked by the input node's `href`.
#[track_caller]
#[must_use]
pub fn navigate() -> StepNode {
    navigate_by("href")
}

/// Loads the page whose URL is held in `attribute`.
#[track_caller]
#[must_use]
pub fn navigate_by(attribute: impl Into<String>) -> StepNode {
    StepNode::new(StepKind::Navigate {
        attribute: attribute.into(),
    })
}

/// Clicks the input node.
#[track_caller]
#[must_use]
pub fn click() -> StepNode {
    StepNode::new(StepKind::Click)
}

/// Processes every page reached through `trigger`.
///
/// Steps attached with [`StepNode::next`] process each page; `trigger` runs
/// against each page and must end in exactly one [`yield_next_page`].
#[track_caller]
#[must_use]
pub fn paginate(trigger: &StepNode) -> StepNode {
    StepNode::new(StepKind::Paginate(Pagination::new(trigger)))
}

/// Hands the page it receives to the enclosing paginate step.
#[track_caller]
#[must_use]
pub fn yield_next_page() -> StepNode {
    StepNode::new(StepKind::YieldNextPage(PageLink::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(children().name(), "search(children)");
        assert_eq!(css("li").name(), "search(css(li))");
        assert_eq!(text().name(), "parse(text)");
        assert_eq!(attribute("href").name(), "parse(attribute(href))");
        assert_eq!(navigate().name(), "navigate(href)");
        assert_eq!(click().name(), "click");
        assert_eq!(yield_next_page().name(), "yield_next_page");
        assert_eq!(paginate(&yield_next_page()).name(), "paginate");
    }

    #[test]
    fn test_network_bound_kinds() {
        assert!(navigate().kind().is_network_bound());
        assert!(click().kind().is_network_bound());
        assert!(!css("a").kind().is_network_bound());
        assert!(!text().kind().is_network_bound());
    }
}
