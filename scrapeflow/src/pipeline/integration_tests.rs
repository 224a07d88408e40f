//! End-to-end scenarios for step tree execution.

#[cfg(test)]
mod tests {
    use crate::config::{ScraperConfig, ThrottleConfig};
    use crate::dom::{
        DomNode, ElementBuilder, MockPageLoader, NodeRef, PageLoader, PageRoot, StaticPageLoader,
    };
    use crate::errors::{codes, LoadError, ScrapeflowError, StepError};
    use crate::events::{types, CollectingEventSink};
    use crate::filters::Filter;
    use crate::models::{Cardinality, Collector};
    use crate::pipeline::{ScrapeReport, Scraper};
    use crate::publish::CollectingModelSink;
    use crate::steps::builders::{
        by_tag, click, navigate, paginate, parse, text, yield_next_page,
    };
    use crate::steps::{ExecutionGuard, Parser, StepNode};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const START: &str = "http://site.test/1";

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Item {
        title: String,
        tags: Vec<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Listing {
        heading: String,
        items: Vec<Item>,
    }

    fn item(title: &str, tags: &[&str]) -> ElementBuilder {
        ElementBuilder::new("li")
            .child(ElementBuilder::new("h2").text(title))
            .children(tags.iter().map(|t| ElementBuilder::new("span").text(*t)))
    }

    fn listing(titles: &[&str], next: Option<&str>) -> NodeRef {
        let mut body = ElementBuilder::new("body")
            .child(ElementBuilder::new("ul").children(titles.iter().map(|t| item(t, &[]))));
        if let Some(href) = next {
            body = body.child(
                ElementBuilder::new("a")
                    .attr("rel", "next")
                    .attr("href", href)
                    .text("next"),
            );
        }
        ElementBuilder::new("html").child(body).build().into_node()
    }

    fn empty_page() -> NodeRef {
        ElementBuilder::new("html").build().into_node()
    }

    fn set_title() -> Collector {
        Collector::one(|i: &mut Item, v: &str| i.title = v.to_string())
    }

    fn titles(report: &ScrapeReport) -> Vec<String> {
        report.values::<Item>().into_iter().map(|i| i.title).collect()
    }

    struct Harness {
        events: Arc<CollectingEventSink>,
        models: Arc<CollectingModelSink>,
        config: ScraperConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                events: Arc::new(CollectingEventSink::new()),
                models: Arc::new(CollectingModelSink::new()),
                config: ScraperConfig::new().with_throttle(ThrottleConfig::disabled()),
            }
        }

        fn scraper(&self, step: &StepNode, loader: Arc<dyn PageLoader>) -> Scraper {
            Scraper::builder()
                .step(step)
                .config(self.config.clone())
                .loader(loader)
                .event_sink(self.events.clone())
                .model_sink(self.models.clone())
                .build()
                .unwrap()
        }

        async fn run(&self, step: &StepNode, root: NodeRef) -> ScrapeReport {
            self.scraper(step, Arc::new(StaticPageLoader::new()))
                .run_on(PageRoot::new(START, root))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_children_titles_in_document_order() {
        let harness = Harness::new();
        let step = by_tag("li")
            .collect(Collector::model::<Item>().publish())
            .next(&by_tag("h2").next(&text().collect(set_title())));

        let report = harness.run(&step, listing(&["A", "B", "C"], None)).await;

        assert_eq!(titles(&report), vec!["A", "B", "C"]);
        assert_eq!(harness.models.values::<Item>(), report.values::<Item>());
        assert!(report.is_success());
        assert_eq!(harness.events.count(types::RUN_STARTED), 1);
        assert_eq!(harness.events.count(types::RUN_COMPLETED), 1);
        assert_eq!(harness.events.count(types::MODEL_PUBLISHED), 3);
    }

    #[tokio::test]
    async fn test_value_collector_on_search_uses_node_text() {
        let harness = Harness::new();
        let step = by_tag("h2")
            .collect(Collector::model::<Item>().publish())
            .collect(set_title());

        let report = harness.run(&step, listing(&[" A ", "B"], None)).await;

        assert_eq!(titles(&report), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_sibling_branches_are_isolated() {
        let harness = Harness::new();
        let page = ElementBuilder::new("ul")
            .child(item("A", &["a1", "a2"]))
            .child(item("B", &["b1"]))
            .build()
            .into_node();
        let step = by_tag("li")
            .collect(Collector::model::<Item>().publish())
            .next(&by_tag("h2").next(&text().collect(set_title())))
            .next(&by_tag("span").collect(Collector::many(|i: &mut Item, v: &str| {
                i.tags.push(v.to_string());
            })));

        let report = harness.run(&step, page).await;
        let mut items = report.values::<Item>();
        for item in &mut items {
            item.tags.sort();
        }

        assert_eq!(
            items,
            vec![
                Item {
                    title: "A".into(),
                    tags: vec!["a1".into(), "a2".into()],
                },
                Item {
                    title: "B".into(),
                    tags: vec!["b1".into()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_one_collector_applies_at_most_once() {
        let harness = Harness::new();
        let step = by_tag("body")
            .collect(Collector::model::<Listing>().publish())
            .next(&by_tag("li").next(&text().collect(Collector::one(
                |l: &mut Listing, v: &str| l.heading = v.to_string(),
            ))));

        let report = harness.run(&step, listing(&["A", "B", "C"], None)).await;

        let heading = report.values::<Listing>()[0].heading.clone();
        assert!(["A", "B", "C"].contains(&heading.as_str()));
        assert_eq!(harness.events.count(types::COLLECTOR_DUPLICATE), 2);
        let payload = &harness.events.payloads(types::COLLECTOR_DUPLICATE)[0];
        assert_eq!(payload["error_info"]["code"], codes::COLLECTOR_ONE);
    }

    #[tokio::test]
    async fn test_nested_models_accumulate_into_container() {
        let harness = Harness::new();
        let items = by_tag("li")
            .collect(
                Collector::model::<Item>()
                    .into(Cardinality::Many, |l: &mut Listing, i: Item| l.items.push(i)),
            )
            .next(&by_tag("h2").next(&text().collect(set_title())));
        let step = by_tag("body")
            .collect(Collector::model::<Listing>().publish())
            .next(&items);

        let report = harness.run(&step, listing(&["A", "B", "C"], None)).await;

        assert_eq!(report.models.len(), 1);
        let mut collected: Vec<String> = report.values::<Listing>()[0]
            .items
            .iter()
            .map(|i| i.title.clone())
            .collect();
        collected.sort();
        assert_eq!(collected, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_missing_container_is_skipped() {
        let harness = Harness::new();
        let step = by_tag("li")
            .collect(
                Collector::model::<Item>()
                    .publish()
                    .into(Cardinality::Many, |l: &mut Listing, i: Item| l.items.push(i)),
            )
            .collect(set_title());

        let report = harness.run(&step, listing(&["A", "B"], None)).await;

        assert_eq!(titles(&report), vec!["A", "B"]);
        assert_eq!(harness.events.count(types::COLLECTOR_MISSING_CONTAINER), 2);
    }

    #[tokio::test]
    async fn test_guards_filter_next_steps() {
        let harness = Harness::new();
        let tag_heading = by_tag("h2").collect(Collector::many(|i: &mut Item, v: &str| {
            i.tags.push(v.to_string());
        }));
        let step = by_tag("li")
            .collect(Collector::model::<Item>().publish())
            .collect(set_title())
            .next_if(ExecutionGuard::new(|i: &Item| i.title != "B"), &tag_heading)
            .next_if(ExecutionGuard::new(|_: &Listing| true), &text());

        let report = harness.run(&step, listing(&["A", "B", "C"], None)).await;

        let tags: Vec<Vec<String>> = report.values::<Item>().into_iter().map(|i| i.tags).collect();
        assert_eq!(tags, vec![vec!["A".to_string()], vec![], vec!["C".to_string()]]);
        assert_eq!(harness.events.count(types::GUARD_MISSING_MODEL), 3);
    }

    #[tokio::test]
    async fn test_filters_narrow_found_nodes() {
        let harness = Harness::new();
        let step = by_tag("li")
            .filter(Filter::text_contains("o"))
            .filter(Filter::last())
            .collect(Collector::model::<Item>().publish())
            .collect(set_title());

        let report = harness.run(&step, listing(&["one", "two", "three"], None)).await;

        assert_eq!(titles(&report), vec!["two"]);
    }

    #[tokio::test]
    async fn test_failed_unit_abandons_only_its_branch() {
        let harness = Harness::new();
        let strict = parse(Parser::new("strict", |node| {
            let title = node.text().trim().to_string();
            if title == "B" {
                return Err(StepError::Parse(format!("cannot handle {title}")));
            }
            Ok(Some(title))
        }))
        .collect(set_title());
        let step = by_tag("li")
            .collect(Collector::model::<Item>().publish())
            .next(&strict);

        let report = harness.run(&step, listing(&["A", "B", "C"], None)).await;

        assert_eq!(titles(&report), vec!["A", "", "C"]);
        assert!(!report.is_success());
        assert_eq!(report.failures.failed_units, 1);
        assert_eq!(report.failures.failures[0].error_type, "ParseError");
        assert_eq!(harness.events.count(types::UNIT_FAILED), 1);
    }

    fn three_page_site() -> Arc<StaticPageLoader> {
        Arc::new(
            StaticPageLoader::new()
                .with_page("http://site.test/2", listing(&["c", "d"], Some("/3")))
                .with_page("http://site.test/3", listing(&["e", "f"], None)),
        )
    }

    fn paginated_items() -> StepNode {
        let items = by_tag("li")
            .collect(Collector::model::<Item>().publish())
            .next(&text().collect(set_title()));
        let trigger = by_tag("a")
            .filter(Filter::attribute_equals("rel", "next"))
            .next(&navigate().next(&yield_next_page()));
        paginate(&trigger).next(&items)
    }

    #[tokio::test]
    async fn test_pagination_groups_items_per_page() {
        let harness = Harness::new();
        let loader = three_page_site();
        let scraper = harness.scraper(&paginated_items(), loader.clone());

        let report = scraper
            .run_on(PageRoot::new(START, listing(&["a", "b"], Some("/2"))))
            .await
            .unwrap();

        assert_eq!(titles(&report), vec!["a", "b", "c", "d", "e", "f"]);
        // Every page is processed under its own child of the paginate unit.
        let mut pages: BTreeMap<Vec<u32>, usize> = BTreeMap::new();
        for model in &report.models {
            *pages.entry(model.order().path()[..3].to_vec()).or_default() += 1;
        }
        assert_eq!(pages.into_values().collect::<Vec<_>>(), vec![2, 2, 2]);
        assert_eq!(loader.history(), vec!["http://site.test/2", "http://site.test/3"]);
        assert_eq!(harness.events.count(types::PAGINATION_PAGE), 3);
    }

    /// Serves listing pages from a static site and answers clicks on items
    /// with a detail page, slower for the first item of every page.
    struct StaggeredDetails {
        site: Arc<StaticPageLoader>,
    }

    #[async_trait]
    impl PageLoader for StaggeredDetails {
        async fn load_page(&self, url: &str) -> Result<PageRoot, LoadError> {
            self.site.load_page(url).await
        }

        async fn click(&self, _page_url: &str, node: &NodeRef) -> Result<PageRoot, LoadError> {
            let label = node.text().trim().to_string();
            let base = if matches!(label.as_str(), "a" | "c" | "e") { 40 } else { 2 };
            let jitter = rand::random::<u64>() % 10;
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            let detail = ElementBuilder::new("html")
                .child(ElementBuilder::new("p").text(format!("tag-{label}")))
                .build()
                .into_node();
            Ok(PageRoot::new(format!("http://site.test/item/{label}"), detail))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pagination_order_survives_out_of_order_item_completion() {
        let details = click().next(&by_tag("p").next(&text().collect(Collector::many(
            |i: &mut Item, v: &str| i.tags.push(v.to_string()),
        ))));
        let items = by_tag("li")
            .collect(Collector::model::<Item>().publish())
            .next(&by_tag("h2").next(&text().collect(set_title())))
            .next(&details);
        let trigger = by_tag("a")
            .filter(Filter::attribute_equals("rel", "next"))
            .next(&navigate().next(&yield_next_page()));
        let step = paginate(&trigger).next(&items);

        for _ in 0..10 {
            let harness = Harness::new();
            let loader = Arc::new(StaggeredDetails {
                site: three_page_site(),
            });
            let report = harness
                .scraper(&step, loader)
                .run_on(PageRoot::new(START, listing(&["a", "b"], Some("/2"))))
                .await
                .unwrap();

            assert_eq!(titles(&report), vec!["a", "b", "c", "d", "e", "f"]);
            for item in report.values::<Item>() {
                assert_eq!(item.tags, vec![format!("tag-{}", item.title)]);
            }
            let mut pages: BTreeMap<Vec<u32>, usize> = BTreeMap::new();
            for model in &report.models {
                *pages.entry(model.order().path()[..3].to_vec()).or_default() += 1;
            }
            assert_eq!(pages.into_values().collect::<Vec<_>>(), vec![2, 2, 2]);
            assert_eq!(harness.models.values::<Item>(), report.values::<Item>());
        }
    }

    #[tokio::test]
    async fn test_pagination_stops_at_max_pages() {
        let mut harness = Harness::new();
        harness.config = harness.config.clone().with_max_pages(2);
        let loader = three_page_site();
        let scraper = harness.scraper(&paginated_items(), loader.clone());

        let report = scraper
            .run_on(PageRoot::new(START, listing(&["a", "b"], Some("/2"))))
            .await
            .unwrap();

        assert_eq!(titles(&report), vec!["a", "b", "c", "d"]);
        assert_eq!(loader.history(), vec!["http://site.test/2"]);
    }

    #[tokio::test]
    async fn test_pagination_without_yield_is_fatal() {
        let harness = Harness::new();
        let loader = three_page_site();
        let step = paginate(&by_tag("a").next(&navigate())).next(&by_tag("li"));
        let scraper = harness.scraper(&step, loader.clone());

        let err = scraper
            .run_on(PageRoot::new(START, listing(&["a"], Some("/2"))))
            .await
            .unwrap_err();

        match err {
            ScrapeflowError::Pagination(err) => {
                assert_eq!(err.error_info.code, codes::PAGINATION_YIELD);
            }
            other => panic!("expected a pagination error, got {other}"),
        }
        assert!(loader.history().is_empty());
    }

    #[tokio::test]
    async fn test_click_that_keeps_the_page_ends_the_branch() {
        let harness = Harness::new();
        let mut loader = MockPageLoader::new();
        loader
            .expect_click()
            .withf(|page_url, _| page_url.to_string() == START)
            .times(1)
            .returning(|_, _| Ok(PageRoot::new(START, empty_page())));
        let step = by_tag("a").next(&click().collect(Collector::model::<Item>().publish()));

        let report = harness
            .scraper(&step, Arc::new(loader))
            .run_on(PageRoot::new(START, listing(&[], Some("/2"))))
            .await
            .unwrap();

        assert!(report.models.is_empty());
        assert_eq!(harness.events.count(types::NAVIGATION_UNCHANGED), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_contained() {
        let harness = Harness::new();
        let mut loader = MockPageLoader::new();
        loader
            .expect_load_page()
            .returning(|url| Err(LoadError::transport(url, "connection reset")));
        let step = by_tag("a").next(&navigate().collect(Collector::model::<Item>().publish()));

        let report = harness
            .scraper(&step, Arc::new(loader))
            .run_on(PageRoot::new(START, listing(&[], Some("/2"))))
            .await
            .unwrap();

        assert_eq!(report.failures.failed_units, 1);
        assert_eq!(report.failures.failures[0].error_type, "LoadError");
    }

    /// Counts how many clicks are in progress at once.
    #[derive(Default)]
    struct ConcurrencyProbe {
        active: AtomicUsize,
        peak: AtomicUsize,
        clicked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageLoader for ConcurrencyProbe {
        async fn load_page(&self, url: &str) -> Result<PageRoot, LoadError> {
            Err(LoadError::not_found(url))
        }

        async fn click(&self, _page_url: &str, node: &NodeRef) -> Result<PageRoot, LoadError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let label = node.text().trim().to_string();
            self.clicked.lock().push(label.clone());
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(PageRoot::new(format!("http://site.test/{label}"), empty_page()))
        }
    }

    #[tokio::test]
    async fn test_exclusive_steps_run_one_at_a_time_in_order() {
        let harness = Harness::new();
        let probe = Arc::new(ConcurrencyProbe::default());
        let step = by_tag("li").next_exclusively(&click());

        harness
            .scraper(&step, probe.clone())
            .run_on(PageRoot::new(START, listing(&["A", "B", "C"], None)))
            .await
            .unwrap();

        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
        assert_eq!(*probe.clicked.lock(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_plain_steps_run_concurrently() {
        let harness = Harness::new();
        let probe = Arc::new(ConcurrencyProbe::default());
        let step = by_tag("li").next(&click());

        harness
            .scraper(&step, probe.clone())
            .run_on(PageRoot::new(START, listing(&["A", "B", "C"], None)))
            .await
            .unwrap();

        assert!(probe.peak.load(Ordering::SeqCst) > 1);
        assert_eq!(probe.clicked.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let mut harness = Harness::new();
        harness.config = harness.config.clone().with_max_concurrency(1);
        let probe = Arc::new(ConcurrencyProbe::default());
        let step = by_tag("li").next(&click());

        harness
            .scraper(&step, probe.clone())
            .run_on(PageRoot::new(START, listing(&["A", "B", "C"], None)))
            .await
            .unwrap();

        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    }
}
