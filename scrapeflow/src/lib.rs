//! # Scrapeflow
//!
//! A step-based scraping pipeline with deterministic ordering over
//! concurrent execution.
//!
//! Scrapeflow provides a structured approach to scraping with support for:
//!
//! - **Declarative step trees**: search, parse, navigate, click and paginate
//!   steps composed with filters, collectors and guards
//! - **Concurrent execution**: steps fan out over found nodes on a bounded
//!   worker pool, with per-step exclusivity and network throttling
//! - **Ordered publishing**: models are released in the order of the declared
//!   tree, once everything below them has finished
//! - **Recursive pagination**: a trigger subtree finds the next page and feeds
//!   it back into the same processing subtree
//! - **Event-driven observability**: every scheduling transition and every
//!   skipped configuration error is reported on an event sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scrapeflow::prelude::*;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Item {
//!     title: String,
//! }
//!
//! let item = by_tag("li")
//!     .collect(Collector::model::<Item>().publish())
//!     .next(&text().collect(Collector::one(|i: &mut Item, v| i.title = v.into())));
//! let next_page = by_tag("a")
//!     .filter(Filter::attribute_equals("rel", "next"))
//!     .next(&navigate().next(&yield_next_page()));
//!
//! let scraper = Scraper::builder()
//!     .step(&paginate(&next_page).next(&item))
//!     .build()?;
//! let report = scraper.run("https://example.com/list").await?;
//! for item in report.values::<Item>() {
//!     println!("{}", item.title);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod dom;
pub mod errors;
pub mod events;
pub mod execution;
pub mod filters;
pub mod models;
pub mod observability;
pub mod order;
pub mod pipeline;
pub mod publish;
pub mod steps;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{FetchConfig, PaginationConfig, ScraperConfig, ThrottleConfig};
    pub use crate::dom::{
        DomNode, Element, ElementBuilder, NodeRef, PageLoader, PageRoot, Search,
        StaticPageLoader,
    };
    #[cfg(feature = "http")]
    pub use crate::dom::HttpPageLoader;
    pub use crate::errors::{
        ContractErrorInfo, LoadError, PaginationConfigError, ScrapeflowError, StepError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::execution::{FailureRecord, FailureSummary, IntervalThrottle, NoThrottle, Throttle};
    pub use crate::filters::Filter;
    pub use crate::models::{Cardinality, Collector, ModelCollector, ValueCollector};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::order::StepOrder;
    pub use crate::pipeline::{ScrapeReport, Scraper, ScraperBuilder};
    pub use crate::publish::{CollectingModelSink, ModelSink, PublishedModel};
    pub use crate::steps::builders::*;
    pub use crate::steps::{ExecutionGuard, Parser, StepNode};
}
