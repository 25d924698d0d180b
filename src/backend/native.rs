//! The authoritative compute engine.
//!
//! Maintains a reverse-dependency index over its working copy so that
//! dependent lookup is a map hit rather than a scan, and uses the
//! full-rate decay and deterministic jitter formulas. Construction
//! goes through [`NativeEngine::probe`], which runs a sentinel
//! simulation round to verify the engine is usable in the current
//! environment before it is installed as the active backend.

use std::collections::HashMap;

use chrono::Utc;

use crate::change::{Change, ChangeKind};
use crate::entity::{Entity, EntityDataset, EntityId};
use crate::error::BackendError;

use super::{
    cascade_effects, clamp_risk, compute_metrics, critical_path, late_release_decay,
    recompute_deadlines, ComputeBackend, LoadAck, Metrics, SimulationResult,
};

/// Revenue decay per day a dependent task slips past a release date.
const REVENUE_DECAY_PER_DAY: f64 = 0.015;

/// Risk added per direct dependent of the changed entity.
const RISK_PER_DEPENDENT: f64 = 10.0;

/// Upper bound (exclusive) of the deterministic jitter term.
const JITTER_SPAN: f64 = 10.0;

/// The authoritative simulation engine.
#[derive(Default)]
pub struct NativeEngine {
    items: Option<Vec<Entity>>,
    dependents: HashMap<EntityId, Vec<EntityId>>,
}

impl NativeEngine {
    /// Probes whether the engine can run here.
    ///
    /// Loads a sentinel dataset and simulates one change, verifying the
    /// output is sane. If the sentinel round fails, the caller falls
    /// back to the same-process engine.
    pub fn probe() -> Result<Self, BackendError> {
        let mut sentinel = Self::default();
        sentinel.load_dataset(probe_dataset())?;
        let result = sentinel.simulate(&Change::move_entity(
            "probe-task",
            serde_json::json!({ "deadline": "2025-01-02" }),
        ))?;
        if !(0.0..=100.0).contains(&result.risk_score) {
            return Err(BackendError::Internal {
                message: format!("probe produced out-of-range risk {}", result.risk_score),
            });
        }
        Ok(Self::default())
    }

    fn rebuild_index(&mut self) {
        self.dependents.clear();
        let Some(items) = &self.items else {
            return;
        };
        for item in items {
            for dep in item.dependencies() {
                self.dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(item.id().clone());
            }
        }
    }

    fn dependents_of(&self, id: &EntityId) -> Vec<EntityId> {
        let mut deps = self.dependents.get(id).cloned().unwrap_or_default();
        deps.sort();
        deps.dedup();
        deps
    }
}

impl ComputeBackend for NativeEngine {
    fn load_dataset(&mut self, dataset: EntityDataset) -> Result<LoadAck, BackendError> {
        // Dangling references are data-quality warnings, not load errors.
        dataset.validate().map_err(|e| BackendError::Malformed {
            detail: e.to_string(),
        })?;
        let items = dataset.into_entities();
        let loaded = items.len();
        self.items = Some(items);
        self.rebuild_index();
        Ok(LoadAck {
            entities_loaded: loaded,
        })
    }

    fn simulate(&mut self, change: &Change) -> Result<SimulationResult, BackendError> {
        if self.items.is_none() {
            return Err(BackendError::NotLoaded);
        }

        let dependents = self.dependents_of(&change.target);
        let items = self.items.as_mut().ok_or(BackendError::NotLoaded)?;
        let before = items.iter().find(|e| e.id() == &change.target).cloned();

        change.apply_to(items)?;

        let after = items.iter().find(|e| e.id() == &change.target).cloned();

        let (revenue_change, expense_change) = match change.kind {
            ChangeKind::Delete => {
                let gone = before.as_ref().ok_or_else(|| BackendError::Internal {
                    message: "delete applied without a prior snapshot".to_string(),
                })?;
                (-gone.revenue_contribution(), -gone.cost_contribution())
            }
            ChangeKind::Create => {
                let made = after.as_ref().ok_or_else(|| BackendError::Internal {
                    message: "create applied without a resulting entity".to_string(),
                })?;
                (made.revenue_contribution(), made.cost_contribution())
            }
            ChangeKind::Move => {
                let moved = after.as_ref().ok_or_else(|| BackendError::Internal {
                    message: "move applied without a resulting entity".to_string(),
                })?;
                let loss = late_release_decay(items, moved, REVENUE_DECAY_PER_DAY);
                (-loss, 0.0)
            }
            ChangeKind::Update => {
                let (old, new) = match (before.as_ref(), after.as_ref()) {
                    (Some(o), Some(n)) => (o, n),
                    _ => {
                        return Err(BackendError::Internal {
                            message: "update applied without before/after snapshots".to_string(),
                        })
                    }
                };
                (
                    new.revenue_contribution() - old.revenue_contribution(),
                    new.cost_contribution() - old.cost_contribution(),
                )
            }
        };
        let financial_impact = revenue_change - expense_change;

        let delta_days = match (before.as_ref(), after.as_ref()) {
            (Some(old), Some(new)) => new
                .schedule_date()
                .signed_duration_since(old.schedule_date())
                .num_days(),
            _ => 0,
        };
        let new_deadlines = recompute_deadlines(items, after.as_ref(), &dependents, delta_days);

        let mut affected: Vec<EntityId> = Vec::with_capacity(dependents.len() + 1);
        affected.push(change.target.clone());
        affected.extend(dependents.iter().cloned());
        affected.sort();
        affected.dedup();

        let risk_score = clamp_risk(
            dependents.len() as f64 * RISK_PER_DEPENDENT
                + change.kind.base_severity()
                + jitter(change),
        );

        let pushed = new_deadlines
            .keys()
            .filter(|id| *id != &change.target)
            .count();
        let result = SimulationResult {
            financial_impact,
            affected_entities: affected,
            cascade_effects: cascade_effects(change.kind, dependents.len(), pushed),
            new_deadlines,
            risk_score,
            revenue_change,
            expense_change,
            critical_path: critical_path(items),
        };

        // Deletes and creates invalidate the reverse index.
        self.rebuild_index();

        Ok(result)
    }

    fn metrics(&self) -> Result<Metrics, BackendError> {
        let items = self.items.as_ref().ok_or(BackendError::NotLoaded)?;
        Ok(compute_metrics(items, Utc::now().date_naive()))
    }
}

/// Deterministic jitter in [0, `JITTER_SPAN`), derived from a stable
/// hash of the change id and target so repeated runs agree.
fn jitter(change: &Change) -> f64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(change.id.as_uuid().as_bytes());
    hasher.update(change.target.as_str().as_bytes());
    let hash = hasher.finalize();
    let mut word = [0_u8; 8];
    word.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(word) as f64 / u64::MAX as f64) * JITTER_SPAN
}

fn probe_dataset() -> EntityDataset {
    serde_json::from_value(serde_json::json!({
        "tasks": [{
            "id": "probe-task",
            "title": "probe",
            "start_date": "2025-01-01",
            "status": "scheduled",
            "organization": "probe",
            "created_by": "probe",
            "priority": "medium",
            "deadline": "2025-01-01",
            "estimated_hours": 1.0
        }]
    }))
    .expect("sentinel dataset is well-formed")
}
