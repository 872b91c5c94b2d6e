//! The configuration registry: the single source of truth for what ran.

use crate::errors::{
    DuplicateStageError, RegistryFrozenError, SimflowError, UnknownStageError,
};
use crate::stages::StageConfig;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Callback interface for registration events.
///
/// The replay journal subscribes through this to capture invocation-time
/// snapshots. An observer failure aborts (and rolls back) the registration,
/// so the registry and its observers never disagree about what was recorded.
pub trait RegistryObserver: Send + Sync {
    /// Called after a configuration lands in the registry.
    ///
    /// `seq` is the zero-based registration index.
    fn on_register(&self, seq: u32, config: &StageConfig) -> Result<(), SimflowError>;
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: IndexMap<String, StageConfig>,
    frozen: bool,
}

/// Insertion-ordered store mapping stage name to configuration snapshot.
///
/// Names are unique within a run: registering a duplicate fails rather than
/// overwriting, so no stage's provenance is silently lost. Once frozen the
/// registry is read-only.
#[derive(Default)]
pub struct ConfigRegistry {
    inner: RwLock<RegistryInner>,
    observers: RwLock<Vec<Arc<dyn RegistryObserver>>>,
}

impl ConfigRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes an observer to registration events.
    pub fn subscribe(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.write().push(observer);
    }

    /// Registers a stage configuration under its name.
    ///
    /// Fails with [`DuplicateStageError`] if the name is taken, or
    /// [`RegistryFrozenError`] after [`freeze`](Self::freeze).
    pub fn register(&self, config: StageConfig) -> Result<(), SimflowError> {
        let name = config.name.clone();
        let seq = {
            let mut inner = self.inner.write();
            if inner.frozen {
                return Err(RegistryFrozenError::new(&name).into());
            }
            if inner.entries.contains_key(&name) {
                return Err(DuplicateStageError::new(&name).into());
            }
            let seq = u32::try_from(inner.entries.len()).unwrap_or(u32::MAX);
            inner.entries.insert(name.clone(), config.clone());
            seq
        };
        debug!(stage = %name, seq, "registered stage configuration");

        let observers = self.observers.read().clone();
        for observer in observers {
            if let Err(err) = observer.on_register(seq, &config) {
                self.inner.write().entries.shift_remove(&name);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Returns a clone of the named stage's configuration.
    pub fn get(&self, name: &str) -> Result<StageConfig, SimflowError> {
        self.inner
            .read()
            .entries
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownStageError::new(name).into())
    }

    /// Whether a stage name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().entries.contains_key(name)
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// The registered configurations, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, StageConfig)> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect()
    }

    /// Makes the registry read-only.
    pub fn freeze(&self) {
        let mut inner = self.inner.write();
        if !inner.frozen {
            debug!(stages = inner.entries.len(), "freezing configuration registry");
            inner.frozen = true;
        }
    }

    /// Whether the registry has been frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }
}

impl std::fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConfigRegistry")
            .field("stages", &inner.entries.len())
            .field("frozen", &inner.frozen)
            .finish()
    }
}
