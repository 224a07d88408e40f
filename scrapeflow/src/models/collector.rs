//! Collectors: how parsed values and generated models reach their containers.

use super::{ContextModels, ModelHandle};
use std::any::{Any, TypeId};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_COLLECTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one declared collector.
///
/// Copies of a step keep the ids of their collectors, so the same logical
/// collector reached through two attachment points is still recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectorId(u64);

impl CollectorId {
    /// Allocates a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_COLLECTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CollectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collector#{}", self.0)
    }
}

/// How often an accumulator may write into the same container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Exactly once per container instance.
    One,
    /// Any number of times, e.g. into a collection.
    Many,
}

/// Result of applying an accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The write happened.
    Written,
    /// A `One` accumulator already wrote into this container; nothing changed.
    Duplicate,
    /// No container of the expected type is in scope.
    MissingContainer,
    /// The value could not be converted or had the wrong type.
    Rejected(String),
}

type ValueFn = dyn Fn(&mut (dyn Any + Send), &str) -> Result<(), String> + Send + Sync;
type ModelFn = dyn Fn(&mut (dyn Any + Send), Box<dyn Any + Send>) -> Result<(), String> + Send + Sync;
type FactoryFn = dyn Fn() -> ModelHandle + Send + Sync;

fn container_mismatch(expected: &str) -> String {
    format!("container is not a {expected}")
}

/// Where an accumulator writes, and how often.
#[derive(Clone, Debug)]
struct Target {
    id: CollectorId,
    container: TypeId,
    container_name: &'static str,
    cardinality: Cardinality,
}

impl Target {
    fn new<C: 'static>(cardinality: Cardinality) -> Self {
        Self {
            id: CollectorId::next(),
            container: TypeId::of::<C>(),
            container_name: std::any::type_name::<C>(),
            cardinality,
        }
    }

    /// Runs `write` under the container's lock, honoring `One`.
    ///
    /// A rejected write does not consume the `One` slot.
    fn write<F>(&self, container: &ModelHandle, write: F) -> Applied
    where
        F: FnOnce(&mut (dyn Any + Send)) -> Result<(), String>,
    {
        let once = self.cardinality == Cardinality::One;
        container.with_any_mut(|any| {
            if once && container.is_applied(self.id) {
                return Applied::Duplicate;
            }
            match write(any) {
                Ok(()) => {
                    if once {
                        container.mark_applied(self.id);
                    }
                    Applied::Written
                }
                Err(reason) => Applied::Rejected(reason),
            }
        })
    }
}

/// Accumulates a step's parsed value into a container on the stack.
#[derive(Clone)]
pub struct ValueCollector {
    target: Target,
    apply: Arc<ValueFn>,
}

impl ValueCollector {
    /// Writes the raw string into the innermost `C`.
    pub fn new<C, F>(cardinality: Cardinality, apply: F) -> Self
    where
        C: Send + 'static,
        F: Fn(&mut C, &str) + Send + Sync + 'static,
    {
        let apply = move |container: &mut (dyn Any + Send), value: &str| {
            let container = container
                .downcast_mut::<C>()
                .ok_or_else(|| container_mismatch(std::any::type_name::<C>()))?;
            apply(container, value);
            Ok(())
        };
        Self {
            target: Target::new::<C>(cardinality),
            apply: Arc::new(apply),
        }
    }

    /// Parses the value as `V` before writing it into the innermost `C`.
    ///
    /// A value that does not parse is rejected without consuming a `One` slot.
    pub fn parsed<C, V, F>(cardinality: Cardinality, apply: F) -> Self
    where
        C: Send + 'static,
        V: FromStr,
        V::Err: fmt::Display,
        F: Fn(&mut C, V) + Send + Sync + 'static,
    {
        let apply = move |container: &mut (dyn Any + Send), value: &str| {
            let container = container
                .downcast_mut::<C>()
                .ok_or_else(|| container_mismatch(std::any::type_name::<C>()))?;
            let parsed = value
                .trim()
                .parse::<V>()
                .map_err(|e| format!("cannot parse '{value}': {e}"))?;
            apply(container, parsed);
            Ok(())
        };
        Self {
            target: Target::new::<C>(cardinality),
            apply: Arc::new(apply),
        }
    }

    /// The collector's identity.
    #[must_use]
    pub fn id(&self) -> CollectorId {
        self.target.id
    }

    /// The container type name.
    #[must_use]
    pub fn container_name(&self) -> &'static str {
        self.target.container_name
    }

    /// The collector's cardinality.
    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.target.cardinality
    }

    /// Applies `value` to the innermost matching container in `models`.
    pub fn apply(&self, models: &ContextModels, value: &str) -> Applied {
        let Some(container) = models.find(self.target.container) else {
            return Applied::MissingContainer;
        };
        self.target.write(container, |any| (self.apply)(any, value))
    }
}

impl fmt::Debug for ValueCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCollector")
            .field("id", &self.target.id)
            .field("container", &self.target.container_name)
            .field("cardinality", &self.target.cardinality)
            .finish()
    }
}

/// Writes a finished sub-model into an enclosing container.
#[derive(Clone)]
pub struct ModelAccumulator {
    target: Target,
    apply: Arc<ModelFn>,
}

impl ModelAccumulator {
    /// The container type.
    #[must_use]
    pub fn container_type(&self) -> TypeId {
        self.target.container
    }

    /// The container type name.
    #[must_use]
    pub fn container_name(&self) -> &'static str {
        self.target.container_name
    }

    /// The accumulator's identity.
    #[must_use]
    pub fn id(&self) -> CollectorId {
        self.target.id
    }

    /// Writes a snapshot of `model` into `container`.
    pub fn apply(&self, container: &ModelHandle, model: &ModelHandle) -> Applied {
        let item = model.snapshot();
        self.target.write(container, |any| (self.apply)(any, item))
    }
}

impl fmt::Debug for ModelAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelAccumulator")
            .field("id", &self.target.id)
            .field("container", &self.target.container_name)
            .field("cardinality", &self.target.cardinality)
            .finish()
    }
}

/// Supplies a fresh model for every node a step processes.
#[derive(Clone)]
pub struct ModelCollector {
    type_name: &'static str,
    factory: Arc<FactoryFn>,
    publish: bool,
    into: Option<ModelAccumulator>,
}

impl ModelCollector {
    /// Creates a collector from a model factory.
    pub fn new<T, F>(factory: F) -> Self
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            factory: Arc::new(move || ModelHandle::new(factory())),
            publish: false,
            into: None,
        }
    }

    /// Creates a collector that supplies `T::default()`.
    #[must_use]
    pub fn of<T: Default + Clone + Send + 'static>() -> Self {
        Self::new(T::default)
    }

    /// Marks the model for publishing once its subtree has finished.
    #[must_use]
    pub fn publish(mut self) -> Self {
        self.publish = true;
        self
    }

    /// Writes the finished model into the enclosing `C` on the stack.
    ///
    /// The write happens after every step below the model has finished, so
    /// the container receives the completed value.
    #[must_use]
    pub fn into<C, T, F>(mut self, cardinality: Cardinality, apply: F) -> Self
    where
        C: Send + 'static,
        T: Send + 'static,
        F: Fn(&mut C, T) + Send + Sync + 'static,
    {
        let apply = move |container: &mut (dyn Any + Send), item: Box<dyn Any + Send>| {
            let container = container
                .downcast_mut::<C>()
                .ok_or_else(|| container_mismatch(std::any::type_name::<C>()))?;
            let item = item
                .downcast::<T>()
                .map_err(|_| format!("model is not a {}", std::any::type_name::<T>()))?;
            apply(container, *item);
            Ok(())
        };
        self.into = Some(ModelAccumulator {
            target: Target::new::<C>(cardinality),
            apply: Arc::new(apply),
        });
        self
    }

    /// Instantiates a new model.
    #[must_use]
    pub fn supply(&self) -> ModelHandle {
        (self.factory)()
    }

    /// Returns true if the model is published.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.publish
    }

    /// The accumulator into an enclosing container, if any.
    #[must_use]
    pub fn accumulator(&self) -> Option<&ModelAccumulator> {
        self.into.as_ref()
    }

    /// The supplied model's type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ModelCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCollector")
            .field("model", &self.type_name)
            .field("publish", &self.publish)
            .field("into", &self.into)
            .finish()
    }
}

/// One collector attached to a step.
#[derive(Debug, Clone)]
pub enum Collector {
    /// Supply and push a new model.
    Model(ModelCollector),
    /// Accumulate the parsed value into a container.
    Value(ValueCollector),
}

impl Collector {
    /// Supplies `T::default()` for every processed node.
    #[must_use]
    pub fn model<T: Default + Clone + Send + 'static>() -> ModelCollector {
        ModelCollector::of::<T>()
    }

    /// Sets a field of the innermost `C` exactly once.
    pub fn one<C, F>(apply: F) -> Self
    where
        C: Send + 'static,
        F: Fn(&mut C, &str) + Send + Sync + 'static,
    {
        Self::Value(ValueCollector::new(Cardinality::One, apply))
    }

    /// Adds the value to the innermost `C`, any number of times.
    pub fn many<C, F>(apply: F) -> Self
    where
        C: Send + 'static,
        F: Fn(&mut C, &str) + Send + Sync + 'static,
    {
        Self::Value(ValueCollector::new(Cardinality::Many, apply))
    }
}

impl From<ModelCollector> for Collector {
    fn from(collector: ModelCollector) -> Self {
        Self::Model(collector)
    }
}

impl From<ValueCollector> for Collector {
    fn from(collector: ValueCollector) -> Self {
        Self::Value(collector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Listing {
        title: String,
        tags: Vec<String>,
        items: Vec<Item>,
        count: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Item {
        name: String,
    }

    fn stack_with_listing() -> (ContextModels, ModelHandle) {
        let listing = ModelHandle::new(Listing::default());
        let mut models = ContextModels::new();
        models.push(listing.clone());
        (models, listing)
    }

    #[test]
    fn test_one_applies_at_most_once() {
        let (models, listing) = stack_with_listing();
        let Collector::Value(title) = Collector::one(|l: &mut Listing, v| l.title = v.to_string())
        else {
            unreachable!()
        };

        assert_eq!(title.apply(&models, "first"), Applied::Written);
        assert_eq!(title.apply(&models, "second"), Applied::Duplicate);
        assert_eq!(
            listing.with(|l: &Listing| l.title.clone()),
            Some("first".to_string())
        );
    }

    #[test]
    fn test_copies_share_identity() {
        let (models, _) = stack_with_listing();
        let title = ValueCollector::new(Cardinality::One, |l: &mut Listing, v: &str| {
            l.title = v.to_string();
        });
        let copy = title.clone();

        assert_eq!(title.id(), copy.id());
        assert_eq!(title.apply(&models, "a"), Applied::Written);
        assert_eq!(copy.apply(&models, "b"), Applied::Duplicate);
    }

    #[test]
    fn test_many_appends() {
        let (models, listing) = stack_with_listing();
        let tags = ValueCollector::new(Cardinality::Many, |l: &mut Listing, v: &str| {
            l.tags.push(v.to_string());
        });

        for tag in ["x", "y", "z"] {
            assert_eq!(tags.apply(&models, tag), Applied::Written);
        }
        assert_eq!(
            listing.with(|l: &Listing| l.tags.clone()).unwrap(),
            vec!["x", "y", "z"]
        );
    }

    #[test]
    fn test_missing_container() {
        let models = ContextModels::new();
        let title = ValueCollector::new(Cardinality::One, |l: &mut Listing, v: &str| {
            l.title = v.to_string();
        });
        assert_eq!(title.apply(&models, "x"), Applied::MissingContainer);
    }

    #[test]
    fn test_parsed_rejects_bad_values() {
        let (models, listing) = stack_with_listing();
        let count = ValueCollector::parsed(Cardinality::One, |l: &mut Listing, n: u32| l.count = n);

        assert!(matches!(count.apply(&models, "many"), Applied::Rejected(_)));
        assert_eq!(count.apply(&models, " 42 "), Applied::Written);
        assert_eq!(listing.with(|l: &Listing| l.count), Some(42));
    }

    #[test]
    fn test_model_accumulator_writes_snapshot() {
        let (_, listing) = stack_with_listing();
        let collector = ModelCollector::of::<Item>()
            .publish()
            .into(Cardinality::Many, |l: &mut Listing, item: Item| l.items.push(item));
        assert!(collector.is_published());

        let item = collector.supply();
        item.with_mut(|i: &mut Item| i.name = "widget".into());

        let accumulator = collector.accumulator().unwrap();
        assert_eq!(accumulator.container_type(), TypeId::of::<Listing>());
        assert_eq!(accumulator.apply(&listing, &item), Applied::Written);

        // Later changes to the item are not visible in the container.
        item.with_mut(|i: &mut Item| i.name = "changed".into());
        assert_eq!(
            listing.with(|l: &Listing| l.items.clone()).unwrap(),
            vec![Item {
                name: "widget".into()
            }]
        );
    }

    #[test]
    fn test_model_accumulator_one_rejects_second_item() {
        let (_, listing) = stack_with_listing();
        let collector = ModelCollector::of::<Item>()
            .into(Cardinality::One, |l: &mut Listing, item: Item| l.title = item.name);
        let accumulator = collector.accumulator().unwrap();

        assert_eq!(accumulator.apply(&listing, &collector.supply()), Applied::Written);
        assert_eq!(accumulator.apply(&listing, &collector.supply()), Applied::Duplicate);
    }
}
