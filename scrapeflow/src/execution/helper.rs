//! The shared "apply collectors, then fan out" routine of every step kind.

use super::context::{RunContext, StepContext};
use super::engine;
use super::tracker::Subtree;
use crate::dom::NodeRef;
use crate::errors::{codes, ContractErrorInfo};
use crate::events::types;
use crate::models::{Applied, Collector, ModelAccumulator, ModelHandle};
use crate::order::StepOrder;
use crate::publish::Reservation;
use crate::steps::StepNode;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, trace, warn, Instrument, Span};

/// A finished model waiting to be written into its container.
struct Accumulation {
    accumulator: ModelAccumulator,
    container: ModelHandle,
    model: ModelHandle,
}

/// Where a collector outcome happened, for diagnostics.
struct Site<'a> {
    step: &'a StepNode,
    order: &'a StepOrder,
}

/// Processes the nodes a step produced.
///
/// For every node that survives the step's filters: copies the model stack,
/// runs the model collectors and then the value collectors, and schedules
/// the step's next steps on the node. Published and accumulated models are
/// finalized once every step below the node has finished.
pub(crate) fn process(
    run: &Arc<RunContext>,
    step: &Arc<StepNode>,
    ctx: &StepContext,
    nodes: Vec<NodeRef>,
    value: Option<String>,
) {
    let found = nodes.len();
    let nodes = step.filters().apply(nodes);
    if nodes.len() != found {
        trace!(found, kept = nodes.len(), "Filters dropped nodes");
    }

    let site = Site {
        step,
        order: &ctx.order,
    };
    for node in nodes {
        let mut models = ctx.models.clone();
        let mut publications: Vec<(Reservation, ModelHandle)> = Vec::new();
        let mut accumulations = Vec::new();

        for collector in step.collectors() {
            let Collector::Model(collector) = collector else {
                continue;
            };
            let model = collector.supply();
            if let Some(accumulator) = collector.accumulator() {
                match models.find(accumulator.container_type()) {
                    Some(container) => accumulations.push(Accumulation {
                        accumulator: accumulator.clone(),
                        container: container.clone(),
                        model: model.clone(),
                    }),
                    None => report(run, &site, accumulator.container_name(), &Applied::MissingContainer),
                }
            }
            models.push(model.clone());
            if collector.is_published() {
                let reservation = run.publisher.reserve(run.orders.gen_next(&ctx.order));
                trace!(slot = %reservation.order(), model = collector.type_name(), "Reserved publication");
                publications.push((reservation, model));
            }
        }

        let mut text = None;
        for collector in step.collectors() {
            let Collector::Value(collector) = collector else {
                continue;
            };
            let input = match &value {
                Some(parsed) => parsed.as_str(),
                None => text.get_or_insert_with(|| node.text().trim().to_string()).as_str(),
            };
            let outcome = collector.apply(&models, input);
            report(run, &site, collector.container_name(), &outcome);
        }

        let children: Vec<Arc<Subtree>> = step
            .next_steps()
            .iter()
            .filter_map(|next| {
                engine::schedule_step(
                    run,
                    next,
                    &ctx.order,
                    &ctx.subtree,
                    ctx.input_for(Arc::clone(&node), models.clone()),
                )
            })
            .collect();

        if !publications.is_empty() || !accumulations.is_empty() {
            finalize(run, step, ctx, children, accumulations, publications);
        }
    }
}

/// Waits for the node's children, then accumulates and publishes its models.
fn finalize(
    run: &Arc<RunContext>,
    step: &Arc<StepNode>,
    ctx: &StepContext,
    children: Vec<Arc<Subtree>>,
    accumulations: Vec<Accumulation>,
    publications: Vec<(Reservation, ModelHandle)>,
) {
    let hold = ctx.subtree.hold();
    let run = Arc::clone(run);
    let step = Arc::clone(step);
    let order = ctx.order.clone();
    tokio::spawn(
        async move {
            for child in &children {
                child.wait().await;
            }
            let site = Site {
                step: &step,
                order: &order,
            };
            for item in accumulations {
                let outcome = item.accumulator.apply(&item.container, &item.model);
                report(&run, &site, item.accumulator.container_name(), &outcome);
            }
            if run.cancel.is_cancelled() {
                debug!(withdrawn = publications.len(), "Run cancelled; withdrawing publications");
                drop(publications);
            } else {
                for (reservation, model) in publications {
                    reservation.complete(model);
                }
            }
            drop(hold);
        }
        .instrument(Span::current()),
    );
}

fn report(run: &RunContext, site: &Site<'_>, container: &str, outcome: &Applied) {
    let (event, info) = match outcome {
        Applied::Written => {
            trace!(container, "Collector applied");
            return;
        }
        Applied::Duplicate => {
            warn!(
                order = %site.order,
                step = site.step.name(),
                container,
                "Collector already wrote into this container; ignoring value"
            );
            (
                types::COLLECTOR_DUPLICATE,
                ContractErrorInfo::new(
                    codes::COLLECTOR_ONE,
                    format!("A single-valued collector wrote twice into {container}"),
                )
                .with_fix_hint("Use a many-valued collector, or filter the nodes down to one."),
            )
        }
        Applied::MissingContainer => {
            warn!(
                order = %site.order,
                step = site.step.name(),
                container,
                "No container of the collector's type in scope; ignoring value"
            );
            (
                types::COLLECTOR_MISSING_CONTAINER,
                ContractErrorInfo::new(
                    codes::CONTAINER_MISSING,
                    format!("No {container} in scope"),
                )
                .with_fix_hint("Supply the container with a model collector on an enclosing step."),
            )
        }
        Applied::Rejected(reason) => {
            warn!(
                order = %site.order,
                step = site.step.name(),
                container,
                reason = %reason,
                "Collector rejected value"
            );
            (
                types::COLLECTOR_REJECTED,
                ContractErrorInfo::new(codes::COLLECTOR_REJECTED, reason.clone()),
            )
        }
    };
    let info = info
        .with_context_entry("step", site.step.name())
        .with_context_entry("container", container);
    run.events.try_emit(
        event,
        Some(json!({
            "order": site.order.to_string(),
            "step": site.step.name(),
            "declared_at": site.step.declared_at().to_string(),
            "error_info": info.to_json(),
        })),
    );
}
