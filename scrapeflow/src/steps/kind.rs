//! Operation parameters of each step kind.

use super::StepNode;
use crate::dom::{NodeRef, Search};
use crate::errors::{PaginationConfigError, StepError};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

type ParseFn = dyn Fn(&NodeRef) -> Result<Option<String>, StepError> + Send + Sync;

/// Extracts a scalar value from a node.
///
/// `Ok(None)` means the node carries no value; the branch ends quietly.
#[derive(Clone)]
pub struct Parser {
    label: String,
    func: Arc<ParseFn>,
}

impl Parser {
    /// Wraps a custom extraction closure.
    pub fn new<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(&NodeRef) -> Result<Option<String>, StepError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    /// The node's trimmed text.
    #[must_use]
    pub fn text() -> Self {
        Self::new("text", |node| Ok(Some(node.text().trim().to_string())))
    }

    /// The value of an attribute.
    #[must_use]
    pub fn attribute(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(format!("attribute({name})"), move |node| {
            Ok(node.attribute(&name))
        })
    }

    /// Returns the parser label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Extracts the value.
    pub fn parse(&self, node: &NodeRef) -> Result<Option<String>, StepError> {
        (self.func)(node)
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser").field("label", &self.label).finish()
    }
}

/// The back-edge from a yield leaf to the paginate step that owns it.
///
/// Bound once at execution time; copies start unbound.
#[derive(Default)]
pub struct PageLink {
    target: OnceLock<Weak<StepNode>>,
}

impl PageLink {
    /// Binds the link. Returns false if it was already bound.
    pub fn bind(&self, owner: &Arc<StepNode>) -> bool {
        self.target.set(Arc::downgrade(owner)).is_ok()
    }

    /// Returns true once bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.target.get().is_some()
    }

    /// The owning paginate step, if bound and still alive.
    #[must_use]
    pub fn target(&self) -> Option<Arc<StepNode>> {
        self.target.get().and_then(Weak::upgrade)
    }
}

impl Clone for PageLink {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for PageLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageLink")
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Paginate parameters: the trigger subtree that discovers the next page.
pub struct Pagination {
    trigger: Vec<Arc<StepNode>>,
    binding: OnceLock<Result<(), PaginationConfigError>>,
}

impl Pagination {
    pub(crate) fn new(trigger: &StepNode) -> Self {
        Self {
            trigger: vec![Arc::new(trigger.clone())],
            binding: OnceLock::new(),
        }
    }

    /// The trigger subtree roots.
    #[must_use]
    pub fn trigger(&self) -> &[Arc<StepNode>] {
        &self.trigger
    }

    /// Validates the trigger subtree and binds its yield leaf to `owner`.
    ///
    /// Runs once per declared step; later calls return the first outcome.
    ///
    /// # Errors
    ///
    /// Returns an error unless the trigger subtree holds exactly one
    /// yield-next-page step.
    pub fn bind(&self, owner: &Arc<StepNode>) -> Result<(), PaginationConfigError> {
        self.binding
            .get_or_init(|| {
                let mut leaves = Vec::new();
                for root in &self.trigger {
                    collect_page_links(root, &mut leaves);
                }
                match leaves.as_slice() {
                    [leaf] => {
                        leaf.bind(owner);
                        Ok(())
                    }
                    _ => Err(PaginationConfigError::yield_leaves(
                        owner.name(),
                        owner.declared_at().to_string(),
                        leaves.len(),
                    )),
                }
            })
            .clone()
    }
}

fn collect_page_links<'a>(step: &'a StepNode, out: &mut Vec<&'a PageLink>) {
    if let StepKind::YieldNextPage(link) = step.kind() {
        out.push(link);
    }
    for next in step.next_steps() {
        collect_page_links(next, out);
    }
}

impl Clone for Pagination {
    fn clone(&self) -> Self {
        Self {
            trigger: self
                .trigger
                .iter()
                .map(|step| Arc::new(StepNode::clone(step)))
                .collect(),
            binding: OnceLock::new(),
        }
    }
}

impl fmt::Debug for Pagination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pagination")
            .field("trigger", &self.trigger)
            .field("bound", &self.binding.get().is_some())
            .finish()
    }
}

/// What a step does with its input node.
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Finds nodes relative to the input node.
    Search(Search),
    /// Extracts a value from the input node.
    Parse(Parser),
    /// Loads the URL held in an attribute of the input node.
    Navigate {
        /// Attribute carrying the URL.
        attribute: String,
    },
    /// Clicks the input node.
    Click,
    /// Processes the input page, then follows the trigger subtree to the next.
    Paginate(Pagination),
    /// Hands the input page back to the owning paginate step.
    YieldNextPage(PageLink),
}

impl StepKind {
    /// A short description used as the default step name.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Search(search) => format!("search({})", search.label()),
            Self::Parse(parser) => format!("parse({})", parser.label()),
            Self::Navigate { attribute } => format!("navigate({attribute})"),
            Self::Click => "click".to_string(),
            Self::Paginate(_) => "paginate".to_string(),
            Self::YieldNextPage(_) => "yield_next_page".to_string(),
        }
    }

    /// Returns true for steps that fetch pages.
    #[must_use]
    pub fn is_network_bound(&self) -> bool {
        matches!(self, Self::Navigate { .. } | Self::Click)
    }
}
