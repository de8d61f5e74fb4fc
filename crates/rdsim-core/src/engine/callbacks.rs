use super::error::EngineError;
use crate::core::models::ids::{ListenerId, ReactionRuleId, SpeciesId};
use nalgebra::Point3;
use slotmap::SlotMap;
use std::any::Any;
use std::marker::PhantomData;
use thiserror::Error;

/// Error returned by a listener to abort the current `run_iterations` call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A particle taking part in a reaction, identified by its creation serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticleRef {
    pub species: SpeciesId,
    pub serial: u64,
}

/// Read-only description of one fired reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionEvent {
    pub rule: ReactionRuleId,
    pub rule_name: String,
    pub iteration: u64,
    pub time: f64,
    pub position: Point3<f64>,
    pub reactants: Vec<ParticleRef>,
    pub products: Vec<ParticleRef>,
}

/// Receives reaction events synchronously on the scheduler's thread.
///
/// The listener owns whatever state it needs; the engine never inspects it.
/// Listeners cannot reach back into the simulation while it is stepping.
pub trait ReactionListener: Send + 'static {
    fn on_reaction(&mut self, event: &ReactionEvent) -> Result<(), CallbackError>;
}

/// Which fired rules a listener is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleFilter {
    #[default]
    All,
    Rule(ReactionRuleId),
}

impl RuleFilter {
    pub fn accepts(&self, rule: ReactionRuleId) -> bool {
        match self {
            RuleFilter::All => true,
            RuleFilter::Rule(id) => *id == rule,
        }
    }
}

/// Typed handle returned on registration, used to read the listener's state back.
#[derive(Debug)]
pub struct ListenerHandle<L> {
    id: ListenerId,
    _listener: PhantomData<fn() -> L>,
}

impl<L> Clone for ListenerHandle<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for ListenerHandle<L> {}

impl<L> ListenerHandle<L> {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

trait ErasedListener: Send {
    fn on_reaction(&mut self, event: &ReactionEvent) -> Result<(), CallbackError>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<L: ReactionListener> ErasedListener for L {
    fn on_reaction(&mut self, event: &ReactionEvent) -> Result<(), CallbackError> {
        ReactionListener::on_reaction(self, event)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

struct Registration {
    filter: RuleFilter,
    listener: Box<dyn ErasedListener>,
}

/// Registered listeners, invoked in registration order.
#[derive(Default)]
pub struct CallbackDispatcher {
    listeners: SlotMap<ListenerId, Registration>,
    order: Vec<ListenerId>,
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("listeners", &self.order.len())
            .finish()
    }
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<L: ReactionListener>(&mut self, listener: L, filter: RuleFilter) -> ListenerHandle<L> {
        let id = self.listeners.insert(Registration {
            filter,
            listener: Box::new(listener),
        });
        self.order.push(id);
        ListenerHandle {
            id,
            _listener: PhantomData,
        }
    }

    pub fn get<L: ReactionListener>(&self, handle: ListenerHandle<L>) -> Option<&L> {
        self.listeners
            .get(handle.id)
            .and_then(|r| r.listener.as_any().downcast_ref::<L>())
    }

    /// Removes the listener and returns it with its final state.
    pub fn unregister<L: ReactionListener>(&mut self, handle: ListenerHandle<L>) -> Option<L> {
        let registration = self.listeners.remove(handle.id)?;
        self.order.retain(|&id| id != handle.id);
        registration.listener.into_any().downcast::<L>().ok().map(|b| *b)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn has_listener_for(&self, rule: ReactionRuleId) -> bool {
        self.order
            .iter()
            .any(|&id| self.listeners[id].filter.accepts(rule))
    }

    /// Delivers `event` to every matching listener; the first error stops delivery.
    pub fn dispatch(&mut self, event: &ReactionEvent) -> Result<(), EngineError> {
        for &id in &self.order {
            let registration = &mut self.listeners[id];
            if !registration.filter.accepts(event.rule) {
                continue;
            }
            registration
                .listener
                .on_reaction(event)
                .map_err(|source| EngineError::Callback {
                    rule: event.rule_name.clone(),
                    iteration: event.iteration,
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(ReactionRuleId, u64)>,
    }

    impl ReactionListener for Recorder {
        fn on_reaction(&mut self, event: &ReactionEvent) -> Result<(), CallbackError> {
            self.seen.push((event.rule, event.iteration));
            Ok(())
        }
    }

    struct Failing;

    impl ReactionListener for Failing {
        fn on_reaction(&mut self, _: &ReactionEvent) -> Result<(), CallbackError> {
            Err(CallbackError::new("listener refused"))
        }
    }

    fn rules() -> (ReactionRuleId, ReactionRuleId) {
        let mut ids: SlotMap<ReactionRuleId, ()> = SlotMap::with_key();
        (ids.insert(()), ids.insert(()))
    }

    fn event(rule: ReactionRuleId, iteration: u64) -> ReactionEvent {
        ReactionEvent {
            rule,
            rule_name: "actin binding".to_string(),
            iteration,
            time: iteration as f64 * 1e-5,
            position: Point3::origin(),
            reactants: Vec::new(),
            products: Vec::new(),
        }
    }

    #[test]
    fn filtered_listeners_only_see_their_rule() {
        let (bind, decay) = rules();
        let mut dispatcher = CallbackDispatcher::new();
        let all = dispatcher.register(Recorder::default(), RuleFilter::All);
        let only_bind = dispatcher.register(Recorder::default(), RuleFilter::Rule(bind));

        dispatcher.dispatch(&event(bind, 1)).unwrap();
        dispatcher.dispatch(&event(decay, 2)).unwrap();

        assert_eq!(dispatcher.get(all).unwrap().seen, vec![(bind, 1), (decay, 2)]);
        assert_eq!(dispatcher.get(only_bind).unwrap().seen, vec![(bind, 1)]);
        assert!(dispatcher.has_listener_for(decay));
    }

    #[test]
    fn listener_errors_propagate_and_stop_later_listeners() {
        let (bind, _) = rules();
        let mut dispatcher = CallbackDispatcher::new();
        dispatcher.register(Failing, RuleFilter::All);
        let after = dispatcher.register(Recorder::default(), RuleFilter::All);

        let err = dispatcher.dispatch(&event(bind, 7)).unwrap_err();
        assert!(matches!(err, EngineError::Callback { iteration: 7, .. }));
        assert!(dispatcher.get(after).unwrap().seen.is_empty());
    }

    #[test]
    fn unregister_returns_the_listener_state() {
        let (bind, _) = rules();
        let mut dispatcher = CallbackDispatcher::new();
        let handle = dispatcher.register(Recorder::default(), RuleFilter::All);
        dispatcher.dispatch(&event(bind, 3)).unwrap();

        let recorder = dispatcher.unregister(handle).unwrap();
        assert_eq!(recorder.seen.len(), 1);
        assert!(dispatcher.is_empty());
        assert!(dispatcher.get(handle).is_none());
    }
}
