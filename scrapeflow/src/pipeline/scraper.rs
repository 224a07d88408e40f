//! The run driver: assembles a run's services and executes a step tree.

use crate::cancellation::CancellationToken;
use crate::config::ScraperConfig;
use crate::dom::{PageLoader, PageRoot};
use crate::errors::ScrapeflowError;
use crate::events::{types, EventSink, LoggingEventSink};
use crate::execution::{
    schedule_step, FailureCollector, FailureSummary, IntervalThrottle, RunContext, StepInput,
    Subtree, TaskScheduler, Throttle,
};
use crate::observability::WideEventEmitter;
use crate::order::StepOrder;
use crate::publish::{ModelSink, PublishQueue, PublishedModel};
use crate::steps::StepNode;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// The outcome of a successful run.
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the last unit of work finished.
    pub finished_at: DateTime<Utc>,
    /// Published models in step order.
    pub models: Vec<PublishedModel>,
    /// Unit counts and failures.
    pub failures: FailureSummary,
}

impl ScrapeReport {
    /// Clones every published `T`, in step order.
    #[must_use]
    pub fn values<T: Clone + 'static>(&self) -> Vec<T> {
        self.models.iter().filter_map(PublishedModel::get::<T>).collect()
    }

    /// Wall-clock duration of the run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Returns true if no unit of work failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.failures.has_failures()
    }
}

/// Builder for a [`Scraper`].
#[derive(Default)]
pub struct ScraperBuilder {
    steps: Vec<Arc<StepNode>>,
    config: ScraperConfig,
    loader: Option<Arc<dyn PageLoader>>,
    throttle: Option<Arc<dyn Throttle>>,
    events: Option<Arc<dyn EventSink>>,
    model_sink: Option<Arc<dyn ModelSink>>,
}

impl ScraperBuilder {
    /// Adds a top-level step. The step tree is copied.
    #[must_use]
    pub fn step(mut self, step: &StepNode) -> Self {
        self.steps.push(Arc::new(step.clone()));
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: ScraperConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the page loader.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn PageLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Overrides the throttle built from the configuration.
    #[must_use]
    pub fn throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Sets the event sink. Defaults to a [`LoggingEventSink`].
    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the sink receiving published models as they are released.
    #[must_use]
    pub fn model_sink(mut self, sink: Arc<dyn ModelSink>) -> Self {
        self.model_sink = Some(sink);
        self
    }

    /// Builds the scraper.
    ///
    /// # Errors
    ///
    /// Returns an error if no step was added, if the configuration holds
    /// unusable values, or if no loader was set and the default HTTP loader
    /// cannot be created.
    pub fn build(self) -> Result<Scraper, ScrapeflowError> {
        if self.steps.is_empty() {
            return Err(ScrapeflowError::Configuration(
                "a scraper needs at least one step".to_string(),
            ));
        }
        self.config.validate()?;
        let loader = match self.loader {
            Some(loader) => loader,
            None => default_loader(&self.config)?,
        };
        let throttle = self
            .throttle
            .unwrap_or_else(|| IntervalThrottle::from_config(&self.config.throttle));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(LoggingEventSink::default()));

        Ok(Scraper {
            steps: self.steps,
            config: self.config,
            loader,
            throttle,
            events,
            model_sink: self.model_sink,
        })
    }
}

#[cfg(feature = "http")]
fn default_loader(config: &ScraperConfig) -> Result<Arc<dyn PageLoader>, ScrapeflowError> {
    Ok(Arc::new(crate::dom::HttpPageLoader::new(&config.fetch)?))
}

#[cfg(not(feature = "http"))]
fn default_loader(_config: &ScraperConfig) -> Result<Arc<dyn PageLoader>, ScrapeflowError> {
    Err(ScrapeflowError::Configuration(
        "no page loader set and the `http` feature is disabled".to_string(),
    ))
}

/// Executes a declared step tree against pages.
///
/// A scraper can run any number of times; every run has its own order
/// generator, scheduler and publishing queue.
pub struct Scraper {
    steps: Vec<Arc<StepNode>>,
    config: ScraperConfig,
    loader: Arc<dyn PageLoader>,
    throttle: Arc<dyn Throttle>,
    events: Arc<dyn EventSink>,
    model_sink: Option<Arc<dyn ModelSink>>,
}

impl Scraper {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ScraperBuilder {
        ScraperBuilder::default()
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Loads `url` and runs every top-level step on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the start page cannot be loaded, or if a paginate
    /// step is misconfigured.
    pub async fn run(&self, url: &str) -> Result<ScrapeReport, ScrapeflowError> {
        let page = self.loader.load_page(url).await?;
        self.run_on(page).await
    }

    /// Runs every top-level step on an already loaded page.
    ///
    /// Returns once every unit of work, including every page reached through
    /// pagination, has finished and every publication was released.
    ///
    /// # Errors
    ///
    /// Returns an error if a paginate step is misconfigured.
    pub async fn run_on(&self, page: PageRoot) -> Result<ScrapeReport, ScrapeflowError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id, url = %page.url);
        self.execute(run_id, page).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid, page: PageRoot) -> Result<ScrapeReport, ScrapeflowError> {
        let started_at = Utc::now();
        info!(steps = self.steps.len(), "Starting run");
        self.events.try_emit(
            types::RUN_STARTED,
            Some(json!({
                "run_id": run_id.to_string(),
                "url": page.url,
                "steps": self.steps.len(),
            })),
        );

        let publisher = Arc::new(PublishQueue::new(
            self.model_sink.clone(),
            Arc::clone(&self.events),
        ));
        let failures = Arc::new(FailureCollector::new());
        let cancel = Arc::new(CancellationToken::new());
        let scheduler = Arc::new(TaskScheduler::new(
            self.config.max_concurrency,
            Arc::clone(&self.throttle),
            Arc::clone(&publisher),
            Arc::clone(&self.events),
            Arc::clone(&failures),
            Arc::clone(&cancel),
        ));
        let run = Arc::new(RunContext::new(
            run_id,
            self.config.clone(),
            scheduler,
            Arc::clone(&publisher),
            Arc::clone(&self.loader),
            Arc::clone(&self.events),
            Arc::clone(&failures),
            cancel,
        ));

        let origin = StepOrder::initial();
        let (root, guard) = Subtree::root(origin.clone());
        for step in &self.steps {
            schedule_step(&run, step, &origin, &root, StepInput::for_page(&page));
        }
        drop(guard);
        root.wait().await;

        if let Some(err) = run.take_fatal() {
            warn!(error = %err, "Run aborted");
            self.events.try_emit(
                types::RUN_COMPLETED,
                Some(json!({
                    "run_id": run_id.to_string(),
                    "error": err.to_string(),
                    "error_info": err.error_info.to_json(),
                })),
            );
            return Err(err.into());
        }

        let report = ScrapeReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            models: publisher.take_published(),
            failures: failures.summary(),
        };
        info!(
            models = report.models.len(),
            completed = report.failures.completed_units,
            failed = report.failures.failed_units,
            duration_ms = report.duration_ms(),
            "Run finished"
        );
        WideEventEmitter::new().emit_run(self.events.as_ref(), &report);
        Ok(report)
    }
}

impl fmt::Debug for Scraper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scraper")
            .field("steps", &self.steps)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementBuilder, StaticPageLoader};
    use crate::steps::builders::children;

    #[test]
    fn test_build_requires_steps() {
        let result = Scraper::builder()
            .loader(Arc::new(StaticPageLoader::new()))
            .build();
        assert!(matches!(result, Err(ScrapeflowError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_invalid_timeout() {
        let mut config = ScraperConfig::default();
        config.fetch.timeout_seconds = -1.0;
        let result = Scraper::builder()
            .step(&children())
            .config(config)
            .build();
        assert!(matches!(result, Err(ScrapeflowError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_run_reports_missing_start_page() {
        let scraper = Scraper::builder()
            .step(&children())
            .loader(Arc::new(StaticPageLoader::new()))
            .build()
            .unwrap();

        let err = scraper.run("http://example.com/").await.unwrap_err();
        assert!(matches!(err, ScrapeflowError::Load(_)));
    }

    #[tokio::test]
    async fn test_empty_run_report() {
        let page = PageRoot::new(
            "http://example.com/",
            ElementBuilder::new("html").build().into_node(),
        );
        let scraper = Scraper::builder()
            .step(&children())
            .loader(Arc::new(StaticPageLoader::new()))
            .build()
            .unwrap();

        let report = scraper.run_on(page).await.unwrap();
        assert!(report.models.is_empty());
        assert!(report.is_success());
        assert_eq!(report.failures.completed_units, 1);
        assert!(report.duration_ms() >= 0);
    }
}
