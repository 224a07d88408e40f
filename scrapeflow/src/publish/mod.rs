//! Ordered publishing of finished models.
//!
//! Models are released to the [`ModelSink`] in [`StepOrder`] order, no matter
//! in which order their subtrees finish. Every submitted unit and every
//! reserved publication is *in flight*; a ready publication is released once
//! no in-flight order sorts before it other than its own ancestors.

use crate::events::{types, EventSink};
use crate::models::ModelHandle;
use crate::order::StepOrder;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A model released by the publishing queue.
#[derive(Clone)]
pub struct PublishedModel {
    order: StepOrder,
    model: ModelHandle,
}

impl PublishedModel {
    /// The order the model was published under.
    #[must_use]
    pub fn order(&self) -> &StepOrder {
        &self.order
    }

    /// The model's type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.model.type_name()
    }

    /// Returns true if the model is a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.model.is::<T>()
    }

    /// Returns a copy of the model as a `T`.
    #[must_use]
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.model.with(T::clone)
    }

    /// Reads the model as a `T`.
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.model.with(f)
    }
}

impl fmt::Debug for PublishedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishedModel")
            .field("order", &self.order)
            .field("type", &self.model.type_name())
            .finish()
    }
}

/// Receives published models, in order, one at a time.
///
/// The sink is called from worker tasks, outside the queue's lock.
pub trait ModelSink: Send + Sync {
    /// Called once per published model.
    fn on_model(&self, model: &PublishedModel);
}

/// A sink that keeps every model it receives.
#[derive(Debug, Default)]
pub struct CollectingModelSink {
    models: Mutex<Vec<PublishedModel>>,
}

impl CollectingModelSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the received models.
    #[must_use]
    pub fn models(&self) -> Vec<PublishedModel> {
        self.models.lock().clone()
    }

    /// Returns copies of the received models of type `T`.
    #[must_use]
    pub fn values<T: Clone + 'static>(&self) -> Vec<T> {
        self.models
            .lock()
            .iter()
            .filter_map(PublishedModel::get::<T>)
            .collect()
    }

    /// Returns the number of received models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    /// Returns true if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.lock().is_empty()
    }
}

impl ModelSink for CollectingModelSink {
    fn on_model(&self, model: &PublishedModel) {
        self.models.lock().push(model.clone());
    }
}

#[derive(Default)]
struct QueueState {
    in_flight: BTreeMap<StepOrder, usize>,
    ready: BTreeMap<StepOrder, ModelHandle>,
    published: Vec<PublishedModel>,
    /// Released models not yet handed to the sink.
    outbox: VecDeque<PublishedModel>,
    delivering: bool,
}

impl QueueState {
    fn enter(&mut self, order: StepOrder) {
        *self.in_flight.entry(order).or_default() += 1;
    }

    fn exit(&mut self, order: &StepOrder) {
        if let Some(count) = self.in_flight.get_mut(order) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(order);
            }
        }
    }

    fn is_blocked(&self, order: &StepOrder) -> bool {
        self.in_flight
            .range(..order)
            .any(|(earlier, _)| !earlier.is_ancestor_of(order))
    }

    /// Moves every releasable model to `published` and the outbox.
    fn release(&mut self) {
        while let Some(order) = self.ready.keys().next().cloned() {
            if self.is_blocked(&order) {
                break;
            }
            let Some(model) = self.ready.remove(&order) else {
                break;
            };
            let published = PublishedModel { order, model };
            self.published.push(published.clone());
            self.outbox.push_back(published);
        }
    }
}

/// The fan-in publishing barrier of a run.
pub struct PublishQueue {
    state: Mutex<QueueState>,
    sink: Option<Arc<dyn ModelSink>>,
    events: Arc<dyn EventSink>,
}

impl PublishQueue {
    /// Creates a queue forwarding to `sink`.
    #[must_use]
    pub fn new(sink: Option<Arc<dyn ModelSink>>, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            sink,
            events,
        }
    }

    /// Marks a unit of work as in flight until the guard is dropped.
    #[must_use]
    pub fn enter(self: &Arc<Self>, order: StepOrder) -> InFlight {
        self.state.lock().enter(order.clone());
        InFlight {
            queue: Arc::clone(self),
            order,
        }
    }

    /// Reserves a publication slot at `order`.
    ///
    /// The slot blocks every later publication until it is completed or
    /// dropped.
    #[must_use]
    pub fn reserve(self: &Arc<Self>, order: StepOrder) -> Reservation {
        self.state.lock().enter(order.clone());
        Reservation {
            queue: Arc::clone(self),
            order,
            completed: false,
        }
    }

    /// Takes every model published so far.
    #[must_use]
    pub fn take_published(&self) -> Vec<PublishedModel> {
        std::mem::take(&mut self.state.lock().published)
    }

    /// Returns the number of in-flight orders and unreleased models.
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state.in_flight.len() + state.ready.len()
    }

    fn exit(&self, order: &StepOrder) {
        {
            let mut state = self.state.lock();
            state.exit(order);
            state.release();
        }
        self.deliver();
    }

    fn complete(&self, order: &StepOrder, model: ModelHandle) {
        {
            let mut state = self.state.lock();
            state.exit(order);
            state.ready.insert(order.clone(), model);
            state.release();
        }
        self.deliver();
    }

    /// Hands released models to the sink in release order.
    ///
    /// One caller at a time drains the outbox; others only enqueue. The flag
    /// is cleared under the same lock that observes the empty outbox, so no
    /// model is left behind. Units release their subtree only after their
    /// guards returned from here, so a run cannot finish mid-delivery.
    fn deliver(&self) {
        {
            let mut state = self.state.lock();
            if state.delivering || state.outbox.is_empty() {
                return;
            }
            state.delivering = true;
        }
        loop {
            let published = {
                let mut state = self.state.lock();
                match state.outbox.pop_front() {
                    Some(published) => published,
                    None => {
                        state.delivering = false;
                        return;
                    }
                }
            };
            debug!(order = %published.order, model = published.type_name(), "Publishing model");
            if let Some(sink) = &self.sink {
                sink.on_model(&published);
            }
            self.events.try_emit(
                types::MODEL_PUBLISHED,
                Some(json!({
                    "order": published.order.to_string(),
                    "model": published.type_name(),
                })),
            );
        }
    }
}

impl fmt::Debug for PublishQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PublishQueue")
            .field("in_flight", &state.in_flight.len())
            .field("ready", &state.ready.len())
            .field("published", &state.published.len())
            .field("undelivered", &state.outbox.len())
            .finish()
    }
}

/// An in-flight unit of work. Dropping it lets later publications proceed.
#[derive(Debug)]
pub struct InFlight {
    queue: Arc<PublishQueue>,
    order: StepOrder,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.queue.exit(&self.order);
    }
}

/// A reserved publication slot.
///
/// Dropping it without completing withdraws the publication.
#[derive(Debug)]
pub struct Reservation {
    queue: Arc<PublishQueue>,
    order: StepOrder,
    completed: bool,
}

impl Reservation {
    /// The reserved order.
    #[must_use]
    pub fn order(&self) -> &StepOrder {
        &self.order
    }

    /// Marks the model ready for release.
    pub fn complete(mut self, model: ModelHandle) {
        self.completed = true;
        self.queue.complete(&self.order, model);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.completed {
            self.queue.exit(&self.order);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingEventSink, NoOpEventSink};
    use pretty_assertions::assert_eq;
    use std::sync::{OnceLock, Weak};

    fn order(path: &[u32]) -> StepOrder {
        StepOrder::from_path(path.to_vec())
    }

    fn queue() -> (Arc<PublishQueue>, Arc<CollectingModelSink>) {
        let sink = Arc::new(CollectingModelSink::new());
        let queue = Arc::new(PublishQueue::new(
            Some(sink.clone() as Arc<dyn ModelSink>),
            Arc::new(NoOpEventSink),
        ));
        (queue, sink)
    }

    fn published_orders(sink: &CollectingModelSink) -> Vec<String> {
        sink.models().iter().map(|m| m.order().to_string()).collect()
    }

    #[test]
    fn test_out_of_order_completion_is_released_in_order() {
        let (queue, sink) = queue();
        let first = queue.reserve(order(&[0, 1]));
        let second = queue.reserve(order(&[0, 2]));
        let third = queue.reserve(order(&[0, 3]));

        third.complete(ModelHandle::new(3_u32));
        second.complete(ModelHandle::new(2_u32));
        assert!(sink.is_empty());

        first.complete(ModelHandle::new(1_u32));
        assert_eq!(published_orders(&sink), vec!["0-1", "0-2", "0-3"]);
        assert_eq!(sink.values::<u32>(), vec![1, 2, 3]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_running_unit_blocks_later_publications_but_not_its_own() {
        let (queue, sink) = queue();
        let unit = queue.enter(order(&[0, 1]));
        let later = queue.reserve(order(&[0, 2, 1]));
        let own = queue.reserve(order(&[0, 1, 1]));

        later.complete(ModelHandle::new("later"));
        own.complete(ModelHandle::new("own"));
        // The unit is an ancestor of its own publication.
        assert_eq!(published_orders(&sink), vec!["0-1-1"]);

        drop(unit);
        assert_eq!(published_orders(&sink), vec!["0-1-1", "0-2-1"]);
    }

    #[test]
    fn test_dropped_reservation_unblocks() {
        let (queue, sink) = queue();
        let withdrawn = queue.reserve(order(&[0, 1]));
        queue.reserve(order(&[0, 2])).complete(ModelHandle::new(2_u8));
        assert!(sink.is_empty());

        drop(withdrawn);
        assert_eq!(published_orders(&sink), vec!["0-2"]);
    }

    #[test]
    fn test_take_published_and_events() {
        let events = Arc::new(CollectingEventSink::new());
        let queue = Arc::new(PublishQueue::new(None, events.clone()));
        queue.reserve(order(&[0, 1])).complete(ModelHandle::new(String::from("x")));

        let published = queue.take_published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].get::<String>().as_deref(), Some("x"));
        assert!(published[0].is::<String>());
        assert!(queue.take_published().is_empty());
        assert_eq!(events.count(types::MODEL_PUBLISHED), 1);
    }

    /// A sink that reads and extends the queue it is fed by.
    #[derive(Default)]
    struct ReentrantSink {
        queue: OnceLock<Weak<PublishQueue>>,
        seen: Mutex<Vec<(String, usize)>>,
    }

    impl ModelSink for ReentrantSink {
        fn on_model(&self, model: &PublishedModel) {
            let Some(queue) = self.queue.get().and_then(Weak::upgrade) else {
                return;
            };
            let pending = queue.pending();
            if model.order() == &order(&[0, 1]) {
                queue.reserve(order(&[0, 9])).complete(ModelHandle::new(9_u32));
            }
            self.seen.lock().push((model.order().to_string(), pending));
        }
    }

    #[test]
    fn test_sink_may_call_back_into_the_queue() {
        let sink = Arc::new(ReentrantSink::default());
        let queue = Arc::new(PublishQueue::new(
            Some(sink.clone() as Arc<dyn ModelSink>),
            Arc::new(NoOpEventSink),
        ));
        sink.queue.set(Arc::downgrade(&queue)).unwrap();

        let first = queue.reserve(order(&[0, 1]));
        queue.reserve(order(&[0, 2])).complete(ModelHandle::new(2_u32));
        first.complete(ModelHandle::new(1_u32));

        assert_eq!(
            *sink.seen.lock(),
            vec![
                ("0-1".to_string(), 0),
                ("0-2".to_string(), 0),
                ("0-9".to_string(), 0),
            ]
        );
        let orders: Vec<String> = queue
            .take_published()
            .iter()
            .map(|m| m.order().to_string())
            .collect();
        assert_eq!(orders, vec!["0-1", "0-2", "0-9"]);
    }
}
