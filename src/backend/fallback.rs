//! The same-process fallback engine.
//!
//! Used when the native engine cannot be brought up. Satisfies the
//! identical contract and populates every result field the native
//! engine does, but trades the reverse-dependency index for naive
//! scans and uses simpler coefficients: flat 1% per-day decay and no
//! jitter term.

use chrono::Utc;

use crate::change::{Change, ChangeKind};
use crate::entity::{Entity, EntityDataset, EntityId};
use crate::error::BackendError;

use super::{
    cascade_effects, clamp_risk, compute_metrics, critical_path, late_release_decay,
    recompute_deadlines, ComputeBackend, LoadAck, Metrics, SimulationResult,
};

/// Flat per-day decay used instead of the native rate.
const FALLBACK_DECAY_PER_DAY: f64 = 0.01;

/// Risk added per direct dependent.
const RISK_PER_DEPENDENT: f64 = 10.0;

/// The substitute simulation engine.
#[derive(Default)]
pub struct FallbackEngine {
    items: Option<Vec<Entity>>,
}

impl FallbackEngine {
    fn dependents_of(items: &[Entity], id: &EntityId) -> Vec<EntityId> {
        let mut deps: Vec<EntityId> = items
            .iter()
            .filter(|e| e.dependencies().contains(id))
            .map(|e| e.id().clone())
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

impl ComputeBackend for FallbackEngine {
    fn load_dataset(&mut self, dataset: EntityDataset) -> Result<LoadAck, BackendError> {
        dataset.validate().map_err(|e| BackendError::Malformed {
            detail: e.to_string(),
        })?;
        let items = dataset.into_entities();
        let loaded = items.len();
        self.items = Some(items);
        Ok(LoadAck {
            entities_loaded: loaded,
        })
    }

    fn simulate(&mut self, change: &Change) -> Result<SimulationResult, BackendError> {
        let items = self.items.as_mut().ok_or(BackendError::NotLoaded)?;

        let dependents = Self::dependents_of(items, &change.target);
        let before = items.iter().find(|e| e.id() == &change.target).cloned();

        change.apply_to(items)?;

        let after = items.iter().find(|e| e.id() == &change.target).cloned();

        let (revenue_change, expense_change) = match change.kind {
            ChangeKind::Delete => before
                .as_ref()
                .map(|e| (-e.revenue_contribution(), -e.cost_contribution()))
                .unwrap_or((0.0, 0.0)),
            ChangeKind::Create => after
                .as_ref()
                .map(|e| (e.revenue_contribution(), e.cost_contribution()))
                .unwrap_or((0.0, 0.0)),
            ChangeKind::Move => {
                let loss = after
                    .as_ref()
                    .map(|e| late_release_decay(items, e, FALLBACK_DECAY_PER_DAY))
                    .unwrap_or(0.0);
                (-loss, 0.0)
            }
            ChangeKind::Update => match (before.as_ref(), after.as_ref()) {
                (Some(old), Some(new)) => (
                    new.revenue_contribution() - old.revenue_contribution(),
                    new.cost_contribution() - old.cost_contribution(),
                ),
                _ => (0.0, 0.0),
            },
        };

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

        let pushed = new_deadlines
            .keys()
            .filter(|id| *id != &change.target)
            .count();

        Ok(SimulationResult {
            financial_impact: revenue_change - expense_change,
            affected_entities: affected,
            cascade_effects: cascade_effects(change.kind, dependents.len(), pushed),
            new_deadlines,
            risk_score: clamp_risk(
                dependents.len() as f64 * RISK_PER_DEPENDENT + change.kind.base_severity(),
            ),
            revenue_change,
            expense_change,
            critical_path: critical_path(items),
        })
    }

    fn metrics(&self) -> Result<Metrics, BackendError> {
        let items = self.items.as_ref().ok_or(BackendError::NotLoaded)?;
        Ok(compute_metrics(items, Utc::now().date_naive()))
    }
}
