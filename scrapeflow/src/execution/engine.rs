//! Dispatch over step kinds.

use super::context::{RunContext, StepContext, StepInput};
use super::scheduler::UnitOfWork;
use super::tracker::Subtree;
use super::{helper, pagination};
use crate::dom::{resolve_url, PageRoot};
use crate::errors::{codes, ContractErrorInfo, StepError};
use crate::events::types;
use crate::order::StepOrder;
use crate::steps::{GuardOutcome, StepKind, StepNode};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Schedules `step` on `input` as a child of the unit at `parent_order`.
///
/// Returns `None` when the step's guard keeps it from running.
pub(crate) fn schedule_step(
    run: &Arc<RunContext>,
    step: &Arc<StepNode>,
    parent_order: &StepOrder,
    parent: &Arc<Subtree>,
    input: StepInput,
) -> Option<Arc<Subtree>> {
    if let Some(guard) = step.guard() {
        match guard.check(&input.models) {
            GuardOutcome::Pass => {}
            GuardOutcome::Reject => {
                debug!(step = step.name(), parent = %parent_order, "Guard rejected step");
                return None;
            }
            GuardOutcome::MissingModel => {
                warn!(
                    step = step.name(),
                    parent = %parent_order,
                    model = guard.model_name(),
                    "Guarded model is not in scope; skipping step"
                );
                let info = ContractErrorInfo::new(
                    codes::GUARD_MODEL_MISSING,
                    format!("No {} in scope", guard.model_name()),
                )
                .with_context_entry("step", step.name());
                run.events.try_emit(
                    types::GUARD_MISSING_MODEL,
                    Some(json!({
                        "parent": parent_order.to_string(),
                        "step": step.name(),
                        "declared_at": step.declared_at().to_string(),
                        "error_info": info.to_json(),
                    })),
                );
                return None;
            }
        }
    }

    let order = run.orders.gen_next(parent_order);
    let unit_run = Arc::clone(run);
    let unit_step = Arc::clone(step);
    let unit_order = order.clone();
    let network_bound = step.kind().is_network_bound();
    let mut unit = UnitOfWork::new(order, step.name(), Arc::clone(parent), move |subtree| {
        execute(unit_run, unit_step, StepContext::new(unit_order, subtree, input))
    })
    .exclusive(step.is_exclusive());
    if network_bound {
        unit = unit.throttled(true);
    }
    Some(run.scheduler.submit(unit))
}

/// Runs one step against its context.
async fn execute(
    run: Arc<RunContext>,
    step: Arc<StepNode>,
    mut ctx: StepContext,
) -> Result<(), StepError> {
    match step.kind() {
        StepKind::Search(search) => {
            let found = search.run(&ctx.node)?;
            debug!(found = found.len(), "Search finished");
            helper::process(&run, &step, &ctx, found, None);
        }
        StepKind::Parse(parser) => match parser.parse(&ctx.node)? {
            Some(value) => {
                let node = Arc::clone(&ctx.node);
                helper::process(&run, &step, &ctx, vec![node], Some(value));
            }
            None => debug!("Parser produced no value"),
        },
        StepKind::Navigate { attribute } => {
            let Some(href) = ctx.node.attribute(attribute) else {
                debug!(attribute = %attribute, "Node has no link to follow");
                return Ok(());
            };
            let url = resolve_url(&ctx.page_url, &href)?;
            let page = run.loader.load_page(&url).await?;
            arrive(&run, &step, &mut ctx, page);
        }
        StepKind::Click => {
            let page = run.loader.click(&ctx.page_url, &ctx.node).await?;
            arrive(&run, &step, &mut ctx, page);
        }
        StepKind::Paginate(paginate) => {
            pagination::start(&run, &step, paginate, &ctx);
        }
        StepKind::YieldNextPage(link) => {
            pagination::yield_page(&run, link, &ctx);
        }
    }
    Ok(())
}

/// Continues on a freshly loaded page, unless the page did not change.
fn arrive(run: &Arc<RunContext>, step: &Arc<StepNode>, ctx: &mut StepContext, page: PageRoot) {
    if page.url == *ctx.page_url {
        info!(url = %page.url, "Navigation did not change the page; no next nodes");
        run.events.try_emit(
            types::NAVIGATION_UNCHANGED,
            Some(json!({
                "order": ctx.order.to_string(),
                "step": step.name(),
                "url": page.url,
            })),
        );
        return;
    }
    debug!(from = %ctx.page_url, to = %page.url, "Navigated");
    ctx.page_url = Arc::from(page.url.as_str());
    helper::process(run, step, ctx, vec![page.root], None);
}
