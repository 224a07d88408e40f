//! Task scheduler: exclusivity, throttling and a bounded worker pool.

use super::failures::{FailureCollector, FailureRecord};
use super::throttle::Throttle;
use super::tracker::{SiblingRegistry, Subtree};
use crate::cancellation::CancellationToken;
use crate::errors::StepError;
use crate::events::{types, EventSink};
use crate::order::StepOrder;
use crate::publish::PublishQueue;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, trace, warn, Instrument};

type Work = Box<dyn FnOnce(Arc<Subtree>) -> BoxFuture<'static, Result<(), StepError>> + Send>;

/// Lifecycle of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Handed to the scheduler.
    Submitted,
    /// Waiting for throttle admission.
    Throttled,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Returned an error or panicked.
    Failed,
    /// Dropped before running because the run was cancelled.
    Skipped,
}

impl UnitState {
    /// The event emitted on entering this state.
    #[must_use]
    pub fn event_type(self) -> &'static str {
        match self {
            Self::Submitted => types::UNIT_SUBMITTED,
            Self::Throttled => types::UNIT_THROTTLED,
            Self::Running => types::UNIT_STARTED,
            Self::Completed => types::UNIT_COMPLETED,
            Self::Failed => types::UNIT_FAILED,
            Self::Skipped => types::UNIT_SKIPPED,
        }
    }

    /// Returns true for final states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// One schedulable piece of work.
///
/// The work closure receives the unit's own [`Subtree`] so that everything it
/// submits is tracked beneath it.
pub struct UnitOfWork {
    order: StepOrder,
    step_name: String,
    exclusive: bool,
    throttled: bool,
    network_bound: bool,
    parent: Arc<Subtree>,
    work: Work,
}

impl UnitOfWork {
    /// Creates a non-exclusive, unthrottled unit.
    pub fn new<F, Fut>(
        order: StepOrder,
        step_name: impl Into<String>,
        parent: Arc<Subtree>,
        work: F,
    ) -> Self
    where
        F: FnOnce(Arc<Subtree>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        Self {
            order,
            step_name: step_name.into(),
            exclusive: false,
            throttled: false,
            network_bound: false,
            parent,
            work: Box::new(move |subtree| work(subtree).boxed()),
        }
    }

    /// Waits for every earlier sibling's subtree before running.
    #[must_use]
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Passes through throttle admission before running.
    #[must_use]
    pub fn throttled(mut self, network_bound: bool) -> Self {
        self.throttled = true;
        self.network_bound = network_bound;
        self
    }

    /// The unit's order.
    #[must_use]
    pub fn order(&self) -> &StepOrder {
        &self.order
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("order", &self.order)
            .field("step", &self.step_name)
            .field("exclusive", &self.exclusive)
            .field("throttled", &self.throttled)
            .field("network_bound", &self.network_bound)
            .finish_non_exhaustive()
    }
}

/// Identity of a unit while it is driven.
struct UnitLabel {
    order: StepOrder,
    step_name: String,
}

/// Runs units of work on tokio tasks.
///
/// Submission never blocks. Each unit first waits for exclusivity, then for
/// throttle admission, and only then takes one of `max_concurrency` permits.
pub struct TaskScheduler {
    permits: Semaphore,
    throttle: Arc<dyn Throttle>,
    siblings: SiblingRegistry,
    publisher: Arc<PublishQueue>,
    events: Arc<dyn EventSink>,
    failures: Arc<FailureCollector>,
    cancel: Arc<CancellationToken>,
}

impl TaskScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        max_concurrency: usize,
        throttle: Arc<dyn Throttle>,
        publisher: Arc<PublishQueue>,
        events: Arc<dyn EventSink>,
        failures: Arc<FailureCollector>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            permits: Semaphore::new(max_concurrency.max(1)),
            throttle,
            siblings: SiblingRegistry::new(),
            publisher,
            events,
            failures,
            cancel,
        }
    }

    /// Submits a unit and returns its subtree.
    pub fn submit(self: &Arc<Self>, unit: UnitOfWork) -> Arc<Subtree> {
        let UnitOfWork {
            order,
            step_name,
            exclusive,
            throttled,
            network_bound,
            parent,
            work,
        } = unit;

        let (subtree, guard) = parent.child(order.clone());
        let in_flight = self.publisher.enter(order.clone());
        let predecessors = order.parent().map_or_else(Vec::new, |parent_order| {
            self.siblings
                .register(&parent_order, Arc::clone(&subtree), exclusive)
        });

        let label = UnitLabel { order, step_name };
        debug!(
            order = %label.order,
            step = %label.step_name,
            exclusive,
            waiting_on = predecessors.len(),
            "Submitting unit"
        );
        self.transition(&label, UnitState::Submitted);

        let span = info_span!("unit", order = %label.order, step = %label.step_name);
        let scheduler = Arc::clone(self);
        let own = Arc::clone(&subtree);
        tokio::spawn(
            async move {
                scheduler
                    .drive(&label, predecessors, throttled.then_some(network_bound), own, work)
                    .await;
                drop(in_flight);
                drop(guard);
            }
            .instrument(span),
        );
        subtree
    }

    async fn drive(
        &self,
        label: &UnitLabel,
        predecessors: Vec<Arc<Subtree>>,
        throttle: Option<bool>,
        subtree: Arc<Subtree>,
        work: Work,
    ) {
        if !predecessors.is_empty() {
            trace!(count = predecessors.len(), "Waiting for earlier siblings");
            let earlier = async {
                for sibling in &predecessors {
                    sibling.wait().await;
                }
            };
            tokio::select! {
                () = earlier => {}
                () = self.cancel.cancelled() => {}
            }
        }
        if self.skip_if_cancelled(label) {
            return;
        }

        if let Some(network_bound) = throttle {
            self.transition(label, UnitState::Throttled);
            self.throttle.admit(network_bound).await;
        }

        let Ok(_permit) = self.permits.acquire().await else {
            self.skip(label);
            return;
        };
        if self.skip_if_cancelled(label) {
            return;
        }

        self.transition(label, UnitState::Running);
        let outcome = AssertUnwindSafe(async move { work(subtree).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.failures.record_completion();
                self.transition(label, UnitState::Completed);
            }
            Ok(Err(error)) => {
                warn!(
                    order = %label.order,
                    step = %label.step_name,
                    error = %error,
                    "Unit of work failed; abandoning branch"
                );
                self.fail(
                    label,
                    FailureRecord::new(&label.order, &label.step_name, error.to_string())
                        .with_error_type(error.kind()),
                );
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(
                    order = %label.order,
                    step = %label.step_name,
                    panic = %message,
                    "Unit of work panicked; abandoning branch"
                );
                self.fail(
                    label,
                    FailureRecord::new(&label.order, &label.step_name, message)
                        .with_error_type("Panic"),
                );
            }
        }
    }

    fn fail(&self, label: &UnitLabel, record: FailureRecord) {
        let error = record.error.clone();
        self.failures.record_failure(record);
        self.events.try_emit(
            UnitState::Failed.event_type(),
            Some(json!({
                "order": label.order.to_string(),
                "step": label.step_name,
                "error": error,
            })),
        );
    }

    fn skip_if_cancelled(&self, label: &UnitLabel) -> bool {
        if self.cancel.is_cancelled() {
            self.skip(label);
            return true;
        }
        false
    }

    fn skip(&self, label: &UnitLabel) {
        debug!(order = %label.order, step = %label.step_name, "Run cancelled; skipping unit");
        self.failures.record_skip();
        self.transition(label, UnitState::Skipped);
    }

    fn transition(&self, label: &UnitLabel, state: UnitState) {
        if state == UnitState::Failed {
            return;
        }
        trace!(order = %label.order, step = %label.step_name, state = ?state, "Unit state");
        self.events.try_emit(
            state.event_type(),
            Some(json!({
                "order": label.order.to_string(),
                "step": label.step_name,
            })),
        );
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("available_permits", &self.permits.available_permits())
            .field("sibling_groups", &self.siblings.parent_count())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
