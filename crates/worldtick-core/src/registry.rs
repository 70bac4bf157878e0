//! Process-wide table of per-world clock state.
//!
//! Each world's state sits behind its own mutex, so updates to one world
//! never contend with another. The outer map lock is held only long enough
//! to look up or insert an entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use worldtick_types::{WorldId, WorldState};

/// Errors returned by [`WorldClockRegistry`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A world with this id is already registered.
    #[error("world {world_id} is already registered")]
    AlreadyExists {
        /// The conflicting world id.
        world_id: WorldId,
    },

    /// No world with this id is registered.
    #[error("world {world_id} not found")]
    NotFound {
        /// The requested world id.
        world_id: WorldId,
    },

    /// A mutation would have broken a clock invariant and was discarded.
    #[error("rejected update to world {world_id}: {reason}")]
    Regression {
        /// The world whose update was rejected.
        world_id: WorldId,
        /// Which invariant the mutation broke.
        reason: String,
    },
}

/// Concurrency-safe table of [`WorldState`] keyed by [`WorldId`].
///
/// Constructed explicitly by the process root and shared via [`Arc`].
#[derive(Debug, Default)]
pub struct WorldClockRegistry {
    worlds: RwLock<HashMap<WorldId, Arc<Mutex<WorldState>>>>,
}

impl WorldClockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a world.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyExists`] if the id is taken.
    pub fn register_world(&self, state: WorldState) -> Result<(), RegistryError> {
        let mut worlds = self.worlds.write().unwrap_or_else(PoisonError::into_inner);
        if worlds.contains_key(&state.id) {
            return Err(RegistryError::AlreadyExists { world_id: state.id });
        }
        worlds.insert(state.id, Arc::new(Mutex::new(state)));
        Ok(())
    }

    /// Snapshot of a world's current state.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the world is unknown.
    pub fn get_world(&self, world_id: WorldId) -> Result<WorldState, RegistryError> {
        let entry = self.entry(world_id)?;
        let state = lock(&entry);
        Ok(state.clone())
    }

    /// Whether a world is registered.
    pub fn contains(&self, world_id: WorldId) -> bool {
        self.worlds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&world_id)
    }

    /// Ids of every registered world.
    pub fn world_ids(&self) -> Vec<WorldId> {
        self.worlds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Apply `mutator` to a world's state and return whatever it returns.
    ///
    /// The mutator runs on a copy under the world's lock. The copy replaces
    /// the stored state only if `tick_count` and `game_time` did not
    /// decrease, the id is unchanged, and `paused_at` is present exactly
    /// when the status is `Paused`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the world is unknown, or
    /// [`RegistryError::Regression`] if the mutation was rejected.
    pub fn update_world<F, R>(&self, world_id: WorldId, mutator: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&mut WorldState) -> R,
    {
        let entry = self.entry(world_id)?;
        let mut stored = lock(&entry);

        let mut next = stored.clone();
        let result = mutator(&mut next);

        if let Some(reason) = regression(&stored, &next) {
            return Err(RegistryError::Regression { world_id, reason });
        }
        *stored = next;
        Ok(result)
    }

    fn entry(&self, world_id: WorldId) -> Result<Arc<Mutex<WorldState>>, RegistryError> {
        self.worlds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&world_id)
            .cloned()
            .ok_or(RegistryError::NotFound { world_id })
    }
}

fn lock(entry: &Mutex<WorldState>) -> MutexGuard<'_, WorldState> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Describe the first invariant `next` breaks relative to `prev`.
fn regression(prev: &WorldState, next: &WorldState) -> Option<String> {
    if next.id != prev.id {
        return Some(format!("id changed to {}", next.id));
    }
    if next.tick_count < prev.tick_count {
        return Some(format!(
            "tick_count would decrease from {} to {}",
            prev.tick_count, next.tick_count
        ));
    }
    if next.game_time < prev.game_time {
        return Some(format!(
            "game_time would decrease from {:?} to {:?}",
            prev.game_time, next.game_time
        ));
    }
    if !next.pause_marker_consistent() {
        return Some(format!(
            "paused_at must be present exactly when paused (status {:?})",
            next.status
        ));
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use chrono::Utc;
    use worldtick_types::WorldStatus;

    use super::*;

    fn registered() -> (WorldClockRegistry, WorldId) {
        let registry = WorldClockRegistry::new();
        let id = WorldId::new();
        registry
            .register_world(WorldState::new(id, "Aster", 1.0))
            .unwrap();
        (registry, id)
    }

    #[test]
    fn register_then_get() {
        let (registry, id) = registered();
        let state = registry.get_world(id).unwrap();
        assert_eq!(state.name, "Aster");
        assert_eq!(state.status, WorldStatus::Running);
        assert!(registry.contains(id));
        assert_eq!(registry.world_ids(), vec![id]);
    }

    #[test]
    fn duplicate_register_fails() {
        let (registry, id) = registered();
        let err = registry
            .register_world(WorldState::new(id, "Other", 2.0))
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyExists { world_id: id });
        assert_eq!(registry.get_world(id).unwrap().name, "Aster");
    }

    #[test]
    fn unknown_world_is_not_found() {
        let registry = WorldClockRegistry::new();
        let id = WorldId::new();
        assert_eq!(
            registry.get_world(id).unwrap_err(),
            RegistryError::NotFound { world_id: id }
        );
        assert!(registry.update_world(id, |_| ()).is_err());
    }

    #[test]
    fn update_returns_mutated_totals() {
        let (registry, id) = registered();
        let (ticks, game_time) = registry
            .update_world(id, |w| {
                w.tick_count = w.tick_count.saturating_add(1);
                w.game_time = w.game_time.saturating_add(Duration::from_millis(100));
                (w.tick_count, w.game_time)
            })
            .unwrap();
        assert_eq!(ticks, 1);
        assert_eq!(game_time, Duration::from_millis(100));
        assert_eq!(registry.get_world(id).unwrap().tick_count, 1);
    }

    #[test]
    fn decreasing_totals_are_rejected() {
        let (registry, id) = registered();
        registry
            .update_world(id, |w| {
                w.tick_count = 5;
                w.game_time = Duration::from_secs(5);
            })
            .unwrap();

        let err = registry.update_world(id, |w| w.tick_count = 4).unwrap_err();
        assert!(matches!(err, RegistryError::Regression { .. }));
        let err = registry
            .update_world(id, |w| w.game_time = Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Regression { .. }));

        let state = registry.get_world(id).unwrap();
        assert_eq!(state.tick_count, 5);
        assert_eq!(state.game_time, Duration::from_secs(5));
    }

    #[test]
    fn pause_marker_must_match_status() {
        let (registry, id) = registered();
        assert!(
            registry
                .update_world(id, |w| w.status = WorldStatus::Paused)
                .is_err()
        );
        assert!(
            registry
                .update_world(id, |w| w.paused_at = Some(Utc::now()))
                .is_err()
        );
        registry
            .update_world(id, |w| {
                w.status = WorldStatus::Paused;
                w.paused_at = Some(Utc::now());
            })
            .unwrap();
        registry
            .update_world(id, |w| {
                w.status = WorldStatus::CatchingUp;
                w.paused_at = None;
            })
            .unwrap();
        assert_eq!(
            registry.get_world(id).unwrap().status,
            WorldStatus::CatchingUp
        );
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let (registry, id) = registered();
        let registry = Arc::new(registry);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        registry
                            .update_world(id, |w| w.tick_count = w.tick_count.saturating_add(1))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get_world(id).unwrap().tick_count, 800);
    }
}
