//! Pagination: process a page, run the trigger subtree, repeat on the page it
//! yields.
//!
//! Every page is scheduled beneath the paginate step's own unit, so the
//! order tree stays shallow no matter how many pages there are:
//!
//! ```text
//! paginate [root]
//! ├── process page 1      [root.1]
//! ├── trigger page 1      [root.2]
//! │   └── ... yield_next_page
//! ├── process page 2      [root.3]
//! ├── trigger page 2      [root.4]
//! ...
//! ```
//!
//! Both units are exclusive, so a page is fully processed before its trigger
//! runs, and the next page waits for the trigger that found it.

use super::context::{PaginationFrame, RunContext, StepContext, StepInput};
use super::engine;
use super::helper;
use super::scheduler::UnitOfWork;
use crate::dom::NodeRef;
use crate::events::types;
use crate::steps::{PageLink, Pagination, StepKind, StepNode};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Starts paginating from the context's page.
///
/// A misconfigured trigger subtree is fatal for the whole run.
pub(crate) fn start(
    run: &Arc<RunContext>,
    step: &Arc<StepNode>,
    pagination: &Pagination,
    ctx: &StepContext,
) {
    if let Err(err) = pagination.bind(step) {
        run.fail(err);
        return;
    }
    let frame = PaginationFrame {
        step: Arc::clone(step),
        root: ctx.order.clone(),
        root_subtree: Arc::clone(&ctx.subtree),
        models: ctx.models.clone(),
        page: 1,
        enclosing: ctx.pagination.clone(),
    };
    dispatch_page(run, Arc::new(frame), Arc::clone(&ctx.node), Arc::clone(&ctx.page_url));
}

/// Hands the context's page back to the paginate step the link points at.
pub(crate) fn yield_page(run: &Arc<RunContext>, link: &PageLink, ctx: &StepContext) {
    let Some(target) = link.target() else {
        warn!(order = %ctx.order, "yield_next_page is not bound to a paginate step");
        return;
    };
    let Some(frame) = find_frame(ctx.pagination.as_ref(), &target) else {
        warn!(
            order = %ctx.order,
            paginate = target.name(),
            "yield_next_page ran outside of its paginate step"
        );
        return;
    };
    let next = PaginationFrame {
        page: frame.page + 1,
        ..PaginationFrame::clone(frame)
    };
    dispatch_page(run, Arc::new(next), Arc::clone(&ctx.node), Arc::clone(&ctx.page_url));
}

fn find_frame<'a>(
    mut frame: Option<&'a Arc<PaginationFrame>>,
    target: &Arc<StepNode>,
) -> Option<&'a Arc<PaginationFrame>> {
    while let Some(current) = frame {
        if Arc::ptr_eq(&current.step, target) {
            return Some(current);
        }
        frame = current.enclosing.as_ref();
    }
    None
}

/// Schedules the processing of one page and, below the page limit, its
/// trigger subtree.
fn dispatch_page(run: &Arc<RunContext>, frame: Arc<PaginationFrame>, page: NodeRef, page_url: Arc<str>) {
    info!(
        paginate = frame.step.name(),
        root = %frame.root,
        page = frame.page,
        url = %page_url,
        "Processing page"
    );
    run.events.try_emit(
        types::PAGINATION_PAGE,
        Some(json!({
            "root": frame.root.to_string(),
            "step": frame.step.name(),
            "page": frame.page,
            "url": page_url.as_ref(),
        })),
    );

    let input = StepInput {
        node: Arc::clone(&page),
        page_url: Arc::clone(&page_url),
        models: frame.models.clone(),
        pagination: frame.enclosing.clone(),
    };
    let process_run = Arc::clone(run);
    let process_step = Arc::clone(&frame.step);
    let order = run.orders.gen_next(&frame.root);
    let process_order = order.clone();
    let process = UnitOfWork::new(
        order,
        format!("{} page {}", frame.step.name(), frame.page),
        Arc::clone(&frame.root_subtree),
        move |subtree| async move {
            let ctx = StepContext::new(process_order, subtree, input);
            let root = Arc::clone(&ctx.node);
            helper::process(&process_run, &process_step, &ctx, vec![root], None);
            Ok(())
        },
    )
    .exclusive(true);
    run.scheduler.submit(process);

    let max_pages = run.config.pagination.max_pages;
    if max_pages.is_some_and(|max| frame.page >= max) {
        debug!(page = frame.page, "Page limit reached; not looking for a next page");
        return;
    }

    let input = StepInput {
        node: page,
        page_url,
        models: frame.models.clone(),
        pagination: Some(Arc::clone(&frame)),
    };
    let trigger_run = Arc::clone(run);
    let order = run.orders.gen_next(&frame.root);
    let trigger_order = order.clone();
    let trigger_frame = Arc::clone(&frame);
    let trigger = UnitOfWork::new(
        order,
        format!("{} trigger {}", frame.step.name(), frame.page),
        Arc::clone(&frame.root_subtree),
        move |subtree| async move {
            let Some(roots) = trigger_roots(&trigger_frame) else {
                return Ok(());
            };
            for root in roots {
                engine::schedule_step(&trigger_run, root, &trigger_order, &subtree, input.clone());
            }
            Ok(())
        },
    )
    .exclusive(true);
    run.scheduler.submit(trigger);
}

fn trigger_roots(frame: &PaginationFrame) -> Option<&[Arc<StepNode>]> {
    match frame.step.kind() {
        StepKind::Paginate(pagination) => Some(pagination.trigger()),
        _ => None,
    }
}
