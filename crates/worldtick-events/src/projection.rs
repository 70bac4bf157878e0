//! Fan-out of individual events to read-model handlers.
//!
//! Handlers run synchronously in registration order. The first failure
//! aborts the dispatch of that event: handlers registered after the failing
//! one do not see it. Read models are therefore not a durability boundary;
//! rebuild them from the log with [`ReplayEngine::rebuild`] instead.
//!
//! [`ReplayEngine::rebuild`]: crate::ReplayEngine::rebuild

use std::sync::Arc;

use worldtick_types::Event;

use crate::error::{DispatchError, ProjectionError};

/// A read model maintained by folding over the event stream.
pub trait Projection: Send + Sync {
    /// Stable name used in logs and dispatch errors.
    fn name(&self) -> &str;

    /// Fold one event into the read model.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the event cannot be applied.
    fn handle_event(&self, event: &Event) -> Result<(), ProjectionError>;
}

/// Ordered set of registered projections.
#[derive(Default)]
pub struct ProjectionDispatcher {
    projections: Vec<Arc<dyn Projection>>,
}

impl ProjectionDispatcher {
    /// Create a dispatcher with no projections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a projection. It runs after every projection registered
    /// before it.
    pub fn register_projection(&mut self, projection: Arc<dyn Projection>) {
        tracing::debug!(projection = projection.name(), "Registered projection");
        self.projections.push(projection);
    }

    /// Number of registered projections.
    pub fn len(&self) -> usize {
        self.projections.len()
    }

    /// Whether no projection is registered.
    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    /// Apply `event` to every projection in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] naming the first projection that failed;
    /// later projections are not invoked for this event.
    pub fn project_event(&self, event: &Event) -> Result<(), DispatchError> {
        for projection in &self.projections {
            projection
                .handle_event(event)
                .map_err(|source| DispatchError {
                    projection: projection.name().to_owned(),
                    event_type: event.event_type.clone(),
                    version: event.version,
                    source,
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProjectionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.projections.iter().map(|p| p.name()).collect();
        f.debug_struct("ProjectionDispatcher")
            .field("projections", &names)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records every event version it sees; optionally fails on one version.
    struct Recorder {
        name: &'static str,
        fail_on: Option<u64>,
        seen: Mutex<Vec<u64>>,
    }

    impl Recorder {
        fn new(name: &'static str, fail_on: Option<u64>) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail_on,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<u64> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Projection for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn handle_event(&self, event: &Event) -> Result<(), ProjectionError> {
            if self.fail_on == Some(event.version) {
                return Err(ProjectionError::new("refused"));
            }
            self.seen.lock().unwrap().push(event.version);
            Ok(())
        }
    }

    fn event(version: u64) -> Event {
        Event::new("world.ticked", "w1", "world", version, Vec::new())
    }

    #[test]
    fn handlers_run_in_registration_order() {
        struct Tagged(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl Projection for Tagged {
            fn name(&self) -> &str {
                self.0
            }
            fn handle_event(&self, _event: &Event) -> Result<(), ProjectionError> {
                self.1.lock().unwrap().push(self.0);
                Ok(())
            }
        }

        let order = Arc::new(Mutex::new(Vec::new()));

        let mut dispatcher = ProjectionDispatcher::new();
        dispatcher.register_projection(Arc::new(Tagged("first", Arc::clone(&order))));
        dispatcher.register_projection(Arc::new(Tagged("second", Arc::clone(&order))));
        dispatcher.register_projection(Arc::new(Tagged("third", Arc::clone(&order))));

        dispatcher.project_event(&event(1)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn first_failure_skips_later_handlers() {
        let a = Recorder::new("a", None);
        let b = Recorder::new("b", Some(2));
        let c = Recorder::new("c", None);

        let mut dispatcher = ProjectionDispatcher::new();
        dispatcher.register_projection(a.clone());
        dispatcher.register_projection(b.clone());
        dispatcher.register_projection(c.clone());

        dispatcher.project_event(&event(1)).unwrap();
        let err = dispatcher.project_event(&event(2)).unwrap_err();
        assert_eq!(err.projection, "b");
        assert_eq!(err.version, 2);

        // `a` applied the event before the failure; `c` never saw it.
        assert_eq!(a.seen(), vec![1, 2]);
        assert_eq!(b.seen(), vec![1]);
        assert_eq!(c.seen(), vec![1]);
    }

    #[test]
    fn empty_dispatcher_accepts_everything() {
        let dispatcher = ProjectionDispatcher::new();
        assert!(dispatcher.is_empty());
        assert!(dispatcher.project_event(&event(1)).is_ok());
    }
}
