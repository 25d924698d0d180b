//! The canonical, shared state container for schedule entities.
//!
//! Holds the live dataset and, while a simulation session is active,
//! the sandbox copy. Every reader goes through [`DatasetStore::current`],
//! so no call site can drift from the controller's notion of which view
//! is active. Direct CRUD is allowed only in live mode and invalidates
//! the metrics cache.

use crate::backend::Metrics;
use crate::entity::{Entity, EntityId};
use crate::error::{StateError, TourlineResult, ValidationError};

/// Canonical entity state plus the optional simulation sandbox.
#[derive(Default)]
pub struct DatasetStore {
    canonical: Vec<Entity>,
    sandbox: Option<Vec<Entity>>,
    metrics_cache: Option<Metrics>,
}

impl DatasetStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The items every reader should see: the sandbox while one is
    /// open, the canonical list otherwise.
    #[must_use]
    pub fn current(&self) -> &[Entity] {
        self.sandbox.as_deref().unwrap_or(&self.canonical)
    }

    /// The canonical list, regardless of sandbox state.
    #[must_use]
    pub fn canonical(&self) -> &[Entity] {
        &self.canonical
    }

    /// Returns true while a sandbox is open.
    #[must_use]
    pub const fn is_simulating(&self) -> bool {
        self.sandbox.is_some()
    }

    /// Replaces the canonical list wholesale (fetch/refresh). Live
    /// mode only.
    pub fn replace_canonical(&mut self, items: Vec<Entity>) -> Result<(), StateError> {
        self.ensure_live("replace_canonical")?;
        self.canonical = items;
        self.metrics_cache = None;
        Ok(())
    }

    /// Replaces an entity in place by id. Live mode only.
    pub fn update_entity(&mut self, entity: Entity) -> TourlineResult<()> {
        self.ensure_live("update_entity")?;
        let slot = self
            .canonical
            .iter_mut()
            .find(|e| e.id() == entity.id())
            .ok_or_else(|| ValidationError::UnknownEntity {
                id: entity.id().clone(),
            })?;
        *slot = entity;
        self.metrics_cache = None;
        Ok(())
    }

    /// Removes an entity by id. Live mode only.
    pub fn delete_entity(&mut self, id: &EntityId) -> TourlineResult<()> {
        self.ensure_live("delete_entity")?;
        let before = self.canonical.len();
        self.canonical.retain(|e| e.id() != id);
        if self.canonical.len() == before {
            return Err(ValidationError::UnknownEntity { id: id.clone() }.into());
        }
        self.metrics_cache = None;
        Ok(())
    }

    /// Inserts a new entity. Live mode only.
    pub fn insert_entity(&mut self, entity: Entity) -> TourlineResult<()> {
        self.ensure_live("insert_entity")?;
        if self.canonical.iter().any(|e| e.id() == entity.id()) {
            return Err(ValidationError::DuplicateEntityId {
                id: entity.id().clone(),
            }
            .into());
        }
        self.canonical.push(entity);
        self.metrics_cache = None;
        Ok(())
    }

    /// Opens the sandbox as a deep copy of the canonical list.
    pub fn open_sandbox(&mut self) -> Result<(), StateError> {
        if self.sandbox.is_some() {
            return Err(StateError::SandboxOpen {
                operation: "open_sandbox".to_string(),
            });
        }
        self.sandbox = Some(self.canonical.clone());
        Ok(())
    }

    /// Mutable access to the sandbox items.
    pub fn sandbox_mut(&mut self) -> Result<&mut Vec<Entity>, StateError> {
        self.sandbox.as_mut().ok_or_else(|| StateError::NoSandbox {
            operation: "sandbox_mut".to_string(),
        })
    }

    /// Commits the sandbox: it becomes the canonical list, atomically
    /// from the reader's perspective.
    pub fn fold_sandbox(&mut self) -> Result<(), StateError> {
        let sandbox = self.sandbox.take().ok_or_else(|| StateError::NoSandbox {
            operation: "fold_sandbox".to_string(),
        })?;
        self.canonical = sandbox;
        self.metrics_cache = None;
        Ok(())
    }

    /// Discards the sandbox; the canonical list (and its metrics
    /// cache) is exactly as it was before the session.
    pub fn drop_sandbox(&mut self) -> Result<(), StateError> {
        self.sandbox.take().ok_or_else(|| StateError::NoSandbox {
            operation: "drop_sandbox".to_string(),
        })?;
        Ok(())
    }

    /// The cached metrics, if still valid.
    #[must_use]
    pub const fn cached_metrics(&self) -> Option<&Metrics> {
        self.metrics_cache.as_ref()
    }

    /// Stores freshly computed metrics for the canonical list.
    pub fn cache_metrics(&mut self, metrics: Metrics) {
        self.metrics_cache = Some(metrics);
    }

    fn ensure_live(&self, operation: &str) -> Result<(), StateError> {
        if self.sandbox.is_some() {
            return Err(StateError::SandboxOpen {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}
