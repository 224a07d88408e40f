//! Run events.
//!
//! Every scheduling transition and every skipped configuration error is
//! reported on an [`EventSink`] in addition to being logged.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod types {
    /// A run began.
    pub const RUN_STARTED: &str = "run.started";
    /// A run finished, successfully or not.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A unit of work was handed to the scheduler.
    pub const UNIT_SUBMITTED: &str = "unit.submitted";
    /// A unit of work is waiting on the throttle.
    pub const UNIT_THROTTLED: &str = "unit.throttled";
    /// A unit of work began running.
    pub const UNIT_STARTED: &str = "unit.started";
    /// A unit of work finished successfully.
    pub const UNIT_COMPLETED: &str = "unit.completed";
    /// A unit of work returned an error or panicked.
    pub const UNIT_FAILED: &str = "unit.failed";
    /// A unit of work was dropped because the run was cancelled.
    pub const UNIT_SKIPPED: &str = "unit.skipped";
    /// A `One` collector tried to write twice into the same container.
    pub const COLLECTOR_DUPLICATE: &str = "collector.duplicate";
    /// A collector found no container of its type in scope.
    pub const COLLECTOR_MISSING_CONTAINER: &str = "collector.missing_container";
    /// A parsed value could not be written into its container.
    pub const COLLECTOR_REJECTED: &str = "collector.rejected";
    /// A guarded step found no model of the guarded type.
    pub const GUARD_MISSING_MODEL: &str = "guard.missing_model";
    /// A navigation did not change the page.
    pub const NAVIGATION_UNCHANGED: &str = "navigation.unchanged";
    /// A paginate step began processing a page.
    pub const PAGINATION_PAGE: &str = "pagination.page";
    /// A model was released to the model sink.
    pub const MODEL_PUBLISHED: &str = "model.published";
}
