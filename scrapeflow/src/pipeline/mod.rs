//! Running step trees.
//!
//! This module provides:
//! - The [`Scraper`] run driver and its builder
//! - The [`ScrapeReport`] returned by a finished run

mod integration_tests;
mod scraper;

pub use scraper::{ScrapeReport, Scraper, ScraperBuilder};
