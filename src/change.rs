//! Proposed mutations to the schedule.
//!
//! A [`Change`] is immutable once created; during a simulation session
//! changes are appended to an ordered pending list and each one is
//! applied both to the local sandbox and to the backend's working copy
//! through the single [`Change::apply_to`] routine, so the two views
//! cannot drift.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Entity, EntityId};
use crate::error::BackendError;

/// Stable identifier for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(Uuid);

impl ChangeId {
    /// Creates a new random change id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of mutation a change proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Reschedule an existing entity.
    Move,
    /// Update fields of an existing entity.
    Update,
    /// Add a new entity.
    Create,
    /// Remove an existing entity.
    Delete,
}

impl ChangeKind {
    /// Base risk severity for this kind of change.
    ///
    /// Policy constants: deletes are the most disruptive, creates add
    /// unplanned load, moves shuffle the schedule, updates are mild.
    #[must_use]
    pub const fn base_severity(&self) -> f64 {
        match self {
            Self::Move => 10.0,
            Self::Update => 5.0,
            Self::Create => 15.0,
            Self::Delete => 30.0,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Update => "update",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single proposed mutation to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Unique change id.
    pub id: ChangeId,
    /// The entity this change targets. For `Create`, the id the new
    /// entity will carry.
    pub target: EntityId,
    /// What kind of mutation this is.
    pub kind: ChangeKind,
    /// Partial new field values. Required for move/update/create,
    /// ignored for delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_data: Option<serde_json::Value>,
    /// When the change was staged.
    pub created_at: DateTime<Utc>,
}

impl Change {
    /// Creates a change.
    #[must_use]
    pub fn new(target: impl Into<EntityId>, kind: ChangeKind, new_data: Option<serde_json::Value>) -> Self {
        Self {
            id: ChangeId::new(),
            target: target.into(),
            kind,
            new_data,
            created_at: Utc::now(),
        }
    }

    /// Creates a move change with partial new schedule fields.
    #[must_use]
    pub fn move_entity(target: impl Into<EntityId>, new_data: serde_json::Value) -> Self {
        Self::new(target, ChangeKind::Move, Some(new_data))
    }

    /// Creates an update change with partial new field values.
    #[must_use]
    pub fn update(target: impl Into<EntityId>, new_data: serde_json::Value) -> Self {
        Self::new(target, ChangeKind::Update, Some(new_data))
    }

    /// Creates a create change carrying the full new entity.
    #[must_use]
    pub fn create(target: impl Into<EntityId>, new_data: serde_json::Value) -> Self {
        Self::new(target, ChangeKind::Create, Some(new_data))
    }

    /// Creates a delete change.
    #[must_use]
    pub fn delete(target: impl Into<EntityId>) -> Self {
        Self::new(target, ChangeKind::Delete, None)
    }

    /// Applies this change to an entity list.
    ///
    /// Validation happens before any mutation: on error the list is
    /// exactly as it was. Move and update merge the partial `new_data`
    /// object over the serialized entity, preserving `id` and `kind`;
    /// create inserts a full entity; delete removes by id.
    pub fn apply_to(&self, items: &mut Vec<Entity>) -> Result<(), BackendError> {
        match self.kind {
            ChangeKind::Move | ChangeKind::Update => {
                let patch = self.require_payload()?;
                let idx = items
                    .iter()
                    .position(|e| e.id() == &self.target)
                    .ok_or_else(|| self.missing_target())?;
                let merged = merge_entity(&items[idx], patch)?;
                items[idx] = merged;
                Ok(())
            }
            ChangeKind::Create => {
                let payload = self.require_payload()?;
                if items.iter().any(|e| e.id() == &self.target) {
                    return Err(BackendError::Malformed {
                        detail: format!("create would duplicate existing id {}", self.target),
                    });
                }
                let entity: Entity =
                    serde_json::from_value(payload.clone()).map_err(|e| BackendError::Malformed {
                        detail: format!("create payload is not a valid entity: {e}"),
                    })?;
                if entity.id() != &self.target {
                    return Err(BackendError::Malformed {
                        detail: format!(
                            "create payload id {} does not match target {}",
                            entity.id(),
                            self.target
                        ),
                    });
                }
                items.push(entity);
                Ok(())
            }
            ChangeKind::Delete => {
                let before = items.len();
                items.retain(|e| e.id() != &self.target);
                if items.len() == before {
                    return Err(self.missing_target());
                }
                Ok(())
            }
        }
    }

    fn require_payload(&self) -> Result<&serde_json::Value, BackendError> {
        self.new_data.as_ref().ok_or_else(|| BackendError::Malformed {
            detail: format!("change kind '{}' requires new_data", self.kind),
        })
    }

    fn missing_target(&self) -> BackendError {
        BackendError::Malformed {
            detail: format!("change targets non-existent entity {}", self.target),
        }
    }
}

/// Merges a partial JSON object over an entity, keeping identity fields.
///
/// `id` and `kind` keys in the patch are ignored: a change can never
/// rename or re-type an entity.
fn merge_entity(entity: &Entity, patch: &serde_json::Value) -> Result<Entity, BackendError> {
    let patch_obj = patch.as_object().ok_or_else(|| BackendError::Malformed {
        detail: "new_data must be a JSON object".to_string(),
    })?;

    let mut value = serde_json::to_value(entity).map_err(|e| BackendError::Internal {
        message: format!("entity serialization failed: {e}"),
    })?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| BackendError::Internal {
            message: "entity did not serialize to an object".to_string(),
        })?;

    for (key, val) in patch_obj {
        if key == "id" || key == "kind" {
            continue;
        }
        obj.insert(key.clone(), val.clone());
    }

    serde_json::from_value(value).map_err(|e| BackendError::Malformed {
        detail: format!("merged entity is invalid: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{date, entities, small_dataset, task};
    use serde_json::json;

    #[test]
    fn kind_severity_ordering() {
        assert!(ChangeKind::Delete.base_severity() > ChangeKind::Create.base_severity());
        assert!(ChangeKind::Create.base_severity() > ChangeKind::Move.base_severity());
        assert!(ChangeKind::Move.base_severity() > ChangeKind::Update.base_severity());
    }

    #[test]
    fn move_merges_new_deadline() {
        let mut items = entities(&small_dataset());
        let change = Change::move_entity("T1", json!({ "deadline": "2025-06-10" }));
        change.apply_to(&mut items).unwrap();

        let Entity::Task(t) = items.iter().find(|e| e.id().as_str() == "T1").unwrap() else {
            panic!("expected task");
        };
        assert_eq!(t.deadline, date(2025, 6, 10));
    }

    #[test]
    fn merge_never_changes_id_or_kind() {
        let mut items = entities(&small_dataset());
        let change = Change::update("T1", json!({ "id": "T9", "kind": "show", "title": "renamed" }));
        change.apply_to(&mut items).unwrap();

        let entity = items.iter().find(|e| e.id().as_str() == "T1").unwrap();
        assert_eq!(entity.kind_name(), "task");
        assert_eq!(entity.base().title, "renamed");
    }

    #[test]
    fn update_missing_target_leaves_list_untouched() {
        let mut items = entities(&small_dataset());
        let snapshot = items.clone();
        let change = Change::update("NOPE", json!({ "title": "x" }));
        let err = change.apply_to(&mut items).unwrap_err();
        assert!(matches!(err, BackendError::Malformed { .. }));
        assert_eq!(items, snapshot);
    }

    #[test]
    fn create_inserts_and_rejects_duplicates() {
        let mut items = entities(&small_dataset());
        let new_task = serde_json::to_value(Entity::Task(task("T2"))).unwrap();
        Change::create("T2", new_task.clone()).apply_to(&mut items).unwrap();
        assert!(items.iter().any(|e| e.id().as_str() == "T2"));

        let err = Change::create("T2", new_task).apply_to(&mut items).unwrap_err();
        assert!(matches!(err, BackendError::Malformed { .. }));
    }

    #[test]
    fn create_payload_id_must_match_target() {
        let mut items = Vec::new();
        let new_task = serde_json::to_value(Entity::Task(task("T2"))).unwrap();
        let err = Change::create("T3", new_task).apply_to(&mut items).unwrap_err();
        assert!(matches!(err, BackendError::Malformed { .. }));
        assert!(items.is_empty());
    }

    #[test]
    fn delete_removes_and_rejects_missing() {
        let mut items = entities(&small_dataset());
        Change::delete("S1").apply_to(&mut items).unwrap();
        assert!(!items.iter().any(|e| e.id().as_str() == "S1"));

        let err = Change::delete("S1").apply_to(&mut items).unwrap_err();
        assert!(matches!(err, BackendError::Malformed { .. }));
    }

    #[test]
    fn change_serde_round_trip() {
        let change = Change::move_entity("T1", json!({ "deadline": "2025-06-10" }));
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["kind"], "move");
        let back: Change = serde_json::from_value(json).unwrap();
        assert_eq!(back, change);
    }
}
