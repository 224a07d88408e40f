//! Run-wide services and per-unit contexts.

use super::failures::FailureCollector;
use super::scheduler::TaskScheduler;
use super::tracker::Subtree;
use crate::cancellation::CancellationToken;
use crate::config::ScraperConfig;
use crate::dom::{NodeRef, PageLoader, PageRoot};
use crate::errors::PaginationConfigError;
use crate::events::EventSink;
use crate::models::ContextModels;
use crate::order::{StepOrder, StepOrderGenerator};
use crate::publish::PublishQueue;
use crate::steps::StepNode;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Services shared by every unit of one run.
pub struct RunContext {
    pub(crate) run_id: Uuid,
    pub(crate) config: ScraperConfig,
    pub(crate) orders: StepOrderGenerator,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) publisher: Arc<PublishQueue>,
    pub(crate) loader: Arc<dyn PageLoader>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) failures: Arc<FailureCollector>,
    pub(crate) cancel: Arc<CancellationToken>,
    fatal: Mutex<Option<PaginationConfigError>>,
}

impl RunContext {
    /// Assembles the services of a run.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        run_id: Uuid,
        config: ScraperConfig,
        scheduler: Arc<TaskScheduler>,
        publisher: Arc<PublishQueue>,
        loader: Arc<dyn PageLoader>,
        events: Arc<dyn EventSink>,
        failures: Arc<FailureCollector>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            run_id,
            config,
            orders: StepOrderGenerator::new(),
            scheduler,
            publisher,
            loader,
            events,
            failures,
            cancel,
            fatal: Mutex::new(None),
        }
    }

    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Records a fatal configuration error and cancels the run.
    ///
    /// Only the first error is kept.
    pub fn fail(&self, err: PaginationConfigError) {
        error!(
            step = %err.step,
            declared_at = %err.declared_at,
            code = %err.error_info.code,
            "{err}"
        );
        let reason = err.to_string();
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.cancel.cancel(reason);
    }

    /// Takes the fatal error, if one was recorded.
    #[must_use]
    pub fn take_fatal(&self) -> Option<PaginationConfigError> {
        self.fatal.lock().take()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// State pinned by a paginate step for the pages it processes.
#[derive(Debug, Clone)]
pub struct PaginationFrame {
    pub(crate) step: Arc<StepNode>,
    pub(crate) root: StepOrder,
    pub(crate) root_subtree: Arc<Subtree>,
    pub(crate) models: ContextModels,
    pub(crate) page: usize,
    pub(crate) enclosing: Option<Arc<PaginationFrame>>,
}

impl PaginationFrame {
    /// The recursive root every page is scheduled under.
    #[must_use]
    pub fn root(&self) -> &StepOrder {
        &self.root
    }

    /// The one-based page number.
    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }
}

/// What a scheduled step receives from its parent.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub(crate) node: NodeRef,
    pub(crate) page_url: Arc<str>,
    pub(crate) models: ContextModels,
    pub(crate) pagination: Option<Arc<PaginationFrame>>,
}

impl StepInput {
    /// Input for top-level steps: the page root and an empty model stack.
    #[must_use]
    pub fn for_page(page: &PageRoot) -> Self {
        Self {
            node: Arc::clone(&page.root),
            page_url: Arc::from(page.url.as_str()),
            models: ContextModels::new(),
            pagination: None,
        }
    }
}

/// Everything one running unit of work sees.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub(crate) order: StepOrder,
    pub(crate) subtree: Arc<Subtree>,
    pub(crate) node: NodeRef,
    pub(crate) page_url: Arc<str>,
    pub(crate) models: ContextModels,
    pub(crate) pagination: Option<Arc<PaginationFrame>>,
}

impl StepContext {
    /// Binds an input to the unit it runs in.
    #[must_use]
    pub fn new(order: StepOrder, subtree: Arc<Subtree>, input: StepInput) -> Self {
        Self {
            order,
            subtree,
            node: input.node,
            page_url: input.page_url,
            models: input.models,
            pagination: input.pagination,
        }
    }

    /// Input for a step scheduled from this context on `node`.
    #[must_use]
    pub fn input_for(&self, node: NodeRef, models: ContextModels) -> StepInput {
        StepInput {
            node,
            page_url: Arc::clone(&self.page_url),
            models,
            pagination: self.pagination.clone(),
        }
    }

    /// The unit's order.
    #[must_use]
    pub fn order(&self) -> &StepOrder {
        &self.order
    }

    /// The node the unit works on.
    #[must_use]
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// The URL of the page the node belongs to.
    #[must_use]
    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    /// The models in scope.
    #[must_use]
    pub fn models(&self) -> &ContextModels {
        &self.models
    }
}
