//! Compute backend contract and the two engines that satisfy it.
//!
//! The backend owns the simulation math: it keeps a private working
//! copy of the dataset, applies each change cumulatively, and returns
//! projected financial impact, risk, cascades, and a critical path.
//! Two interchangeable implementations exist: the authoritative
//! [`NativeEngine`] and the [`FallbackEngine`] substituted when the
//! native path cannot be brought up. Callers never learn which one
//! answered.

pub mod fallback;
pub mod native;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::change::Change;
use crate::entity::{Entity, EntityDataset, EntityId};
use crate::error::BackendError;

pub use fallback::FallbackEngine;
pub use native::NativeEngine;

/// Revenue magnitude above which an entity belongs to the critical path.
pub(crate) const CRITICAL_PATH_REVENUE_THRESHOLD: f64 = 10_000.0;

/// Acknowledgement of a dataset load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadAck {
    /// Number of entities now in the working copy.
    pub entities_loaded: usize,
}

/// The computed impact of one simulated change.
///
/// Both engines populate every field; values may differ between them
/// but the shape never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Signed net financial delta implied by the change.
    pub financial_impact: f64,
    /// Ids of entities touched by the change, sorted.
    pub affected_entities: Vec<EntityId>,
    /// Human-readable descriptions of how the change propagates.
    pub cascade_effects: Vec<String>,
    /// Recomputed deadlines keyed by entity id.
    pub new_deadlines: BTreeMap<EntityId, NaiveDate>,
    /// Risk score in [0, 100].
    pub risk_score: f64,
    /// Signed revenue delta.
    pub revenue_change: f64,
    /// Signed expense delta.
    pub expense_change: f64,
    /// Most consequential entities, sorted lexicographically by id.
    pub critical_path: Vec<EntityId>,
}

/// Aggregate snapshot of the backend's current working copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of tasks.
    pub total_tasks: usize,
    /// Tasks with completed status.
    pub completed_tasks: usize,
    /// Completed tasks as a percentage of all tasks.
    pub completion_rate: f64,
    /// Number of releases.
    pub total_releases: usize,
    /// Releases already out (completed, or release date passed).
    pub released_count: usize,
    /// Tasks past their deadline and not in a terminal state.
    pub overdue_tasks: usize,
    /// Sum of revenue contributions across all entities.
    pub total_revenue_impact: f64,
    /// Sum of cost contributions across all entities.
    pub total_cost_impact: f64,
    /// Revenue minus cost.
    pub net_impact: f64,
    /// Blend of completion, on-time, and reported progress rates, in
    /// [0, 100].
    pub efficiency_score: f64,
}

/// The contract every compute backend satisfies.
///
/// The working copy persists across `simulate` calls within a session:
/// later changes see the effect of earlier ones. No method blocks
/// indefinitely; timeouts are the caller's concern.
pub trait ComputeBackend: Send {
    /// Replaces the working copy with `dataset`. Idempotent: loading
    /// the same dataset twice yields the same internal state.
    fn load_dataset(&mut self, dataset: EntityDataset) -> Result<LoadAck, BackendError>;

    /// Applies `change` to the working copy and returns its impact.
    /// A malformed change is rejected whole; the working copy is never
    /// partially mutated.
    fn simulate(&mut self, change: &Change) -> Result<SimulationResult, BackendError>;

    /// Recomputes aggregate metrics from the current working copy.
    fn metrics(&self) -> Result<Metrics, BackendError>;
}

/// The backend resolved once at worker init: native when available,
/// fallback otherwise. Exposed only through [`ComputeBackend`] so no
/// caller can branch on which concrete engine is active.
pub enum ActiveBackend {
    /// The authoritative engine.
    Native(NativeEngine),
    /// The same-process substitute.
    Fallback(FallbackEngine),
}

impl ActiveBackend {
    /// Resolves the active backend.
    ///
    /// Tries to bring up the native engine; on probe failure (or when
    /// the `native-engine` feature is disabled) the fallback is
    /// substituted silently and initialization still succeeds.
    #[must_use]
    pub fn init() -> Self {
        if cfg!(feature = "native-engine") {
            if let Ok(engine) = NativeEngine::probe() {
                return Self::Native(engine);
            }
        }
        Self::Fallback(FallbackEngine::default())
    }
}

impl ComputeBackend for ActiveBackend {
    fn load_dataset(&mut self, dataset: EntityDataset) -> Result<LoadAck, BackendError> {
        match self {
            Self::Native(e) => e.load_dataset(dataset),
            Self::Fallback(e) => e.load_dataset(dataset),
        }
    }

    fn simulate(&mut self, change: &Change) -> Result<SimulationResult, BackendError> {
        match self {
            Self::Native(e) => e.simulate(change),
            Self::Fallback(e) => e.simulate(change),
        }
    }

    fn metrics(&self) -> Result<Metrics, BackendError> {
        match self {
            Self::Native(e) => e.metrics(),
            Self::Fallback(e) => e.metrics(),
        }
    }
}

/// Computes aggregate metrics over an entity list as of `today`.
///
/// Shared by both engines so the metrics contract cannot drift.
pub(crate) fn compute_metrics(items: &[Entity], today: NaiveDate) -> Metrics {
    let mut total_tasks = 0_usize;
    let mut completed_tasks = 0_usize;
    let mut overdue_tasks = 0_usize;
    let mut total_releases = 0_usize;
    let mut released_count = 0_usize;
    let mut total_revenue_impact = 0.0_f64;
    let mut total_cost_impact = 0.0_f64;
    let mut progress_total = 0.0_f64;

    for item in items {
        total_revenue_impact += item.revenue_contribution();
        total_cost_impact += item.cost_contribution();

        match item {
            Entity::Task(t) => {
                total_tasks += 1;
                progress_total += t.completion_percentage.clamp(0.0, 100.0);
                if t.base.status == crate::entity::EntityStatus::Completed {
                    completed_tasks += 1;
                }
                if t.deadline < today && !t.base.status.is_terminal() {
                    overdue_tasks += 1;
                }
            }
            Entity::Release(r) => {
                total_releases += 1;
                if r.base.status == crate::entity::EntityStatus::Completed || r.release_date <= today {
                    released_count += 1;
                }
            }
            Entity::Show(_) => {}
        }
    }

    let completion_rate = if total_tasks > 0 {
        (completed_tasks as f64 / total_tasks as f64) * 100.0
    } else {
        0.0
    };
    let on_time_rate = if total_tasks > 0 {
        (1.0 - overdue_tasks as f64 / total_tasks as f64) * 100.0
    } else {
        0.0
    };
    let avg_progress = if total_tasks > 0 {
        progress_total / total_tasks as f64
    } else {
        0.0
    };

    Metrics {
        total_tasks,
        completed_tasks,
        completion_rate,
        total_releases,
        released_count,
        overdue_tasks,
        total_revenue_impact,
        total_cost_impact,
        net_impact: total_revenue_impact - total_cost_impact,
        // Policy: completion weighs 50%, staying on time 30%, reported
        // task progress 20%.
        efficiency_score: 0.5 * completion_rate + 0.3 * on_time_rate + 0.2 * avg_progress,
    }
}

/// Critical path: entities whose revenue magnitude clears the threshold
/// or that carry at least one dependency, in stable lexicographic order.
pub(crate) fn critical_path(items: &[Entity]) -> Vec<EntityId> {
    let mut path: Vec<EntityId> = items
        .iter()
        .filter(|e| {
            e.revenue_contribution().abs() > CRITICAL_PATH_REVENUE_THRESHOLD
                || !e.dependencies().is_empty()
        })
        .map(|e| e.id().clone())
        .collect();
    path.sort();
    path
}

/// Clamps a risk score into [0, 100].
pub(crate) fn clamp_risk(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Cascade-effect template strings shared by both engines.
pub(crate) fn cascade_effects(
    kind: crate::change::ChangeKind,
    dependent_count: usize,
    pushed_deadlines: usize,
) -> Vec<String> {
    use crate::change::ChangeKind;

    let mut effects = Vec::new();
    if dependent_count > 0 {
        effects.push(format!("{dependent_count} dependent items affected"));
    }
    match kind {
        ChangeKind::Delete => {
            if dependent_count > 0 {
                effects.push(format!(
                    "{dependent_count} dangling dependency references left behind"
                ));
            }
            effects.push("Resource reallocation may be needed".to_string());
        }
        ChangeKind::Move if pushed_deadlines > 0 => {
            effects.push(format!("Deadlines pushed for {pushed_deadlines} dependent tasks"));
        }
        _ => {}
    }
    effects
}

/// Recommends new deadlines after a schedule shift of `delta_days`:
/// the moved target's own date plus each dependent task's deadline
/// shifted by the same delta.
pub(crate) fn recompute_deadlines(
    items: &[Entity],
    target: Option<&Entity>,
    dependents: &[EntityId],
    delta_days: i64,
) -> BTreeMap<EntityId, NaiveDate> {
    let mut map = BTreeMap::new();
    if delta_days == 0 {
        return map;
    }
    if let Some(t) = target {
        map.insert(t.id().clone(), t.schedule_date());
    }
    for id in dependents {
        if let Some(Entity::Task(task)) = items.iter().find(|e| e.id() == id) {
            let pushed = task
                .deadline
                .checked_add_signed(chrono::Duration::days(delta_days))
                .unwrap_or(task.deadline);
            map.insert(id.clone(), pushed);
        }
    }
    map
}

/// Revenue loss when a task's deadline lands past the release date of
/// a release it depends on: `rate` of projected revenue per day late.
pub(crate) fn late_release_decay(items: &[Entity], target: &Entity, rate: f64) -> f64 {
    let Entity::Task(task) = target else {
        return 0.0;
    };
    let mut loss = 0.0;
    for dep in &task.dependencies {
        if let Some(Entity::Release(release)) = items.iter().find(|e| e.id() == dep) {
            if task.deadline > release.release_date {
                let days_late = task
                    .deadline
                    .signed_duration_since(release.release_date)
                    .num_days() as f64;
                loss += release.projected_revenue * rate * days_late;
            }
        }
    }
    loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityStatus;
    use crate::test_fixtures::{date, entities, release, show, small_dataset, task, task_with_deps};

    #[test]
    fn metrics_counts_and_rates() {
        let mut done = task("T2");
        done.base.status = EntityStatus::Completed;
        let mut overdue = task("T3");
        overdue.deadline = date(2025, 1, 1);

        let dataset = EntityDataset {
            tasks: vec![task("T1"), done, overdue],
            releases: vec![release("R1")],
            shows: vec![show("S1")],
        };
        let items = entities(&dataset);
        let metrics = compute_metrics(&items, date(2025, 5, 15));

        assert_eq!(metrics.total_tasks, 3);
        assert_eq!(metrics.completed_tasks, 1);
        assert_eq!(metrics.overdue_tasks, 1);
        assert_eq!(metrics.total_releases, 1);
        assert_eq!(metrics.released_count, 0);
        assert!((metrics.completion_rate - 100.0 / 3.0).abs() < 1e-9);
        assert!(
            (metrics.net_impact - (metrics.total_revenue_impact - metrics.total_cost_impact)).abs()
                < 1e-9
        );
        assert!(metrics.efficiency_score > 0.0 && metrics.efficiency_score <= 100.0);
    }

    #[test]
    fn efficiency_reflects_reported_task_progress() {
        let behind = EntityDataset {
            tasks: vec![task("T1")],
            ..EntityDataset::default()
        };
        let mut halfway = task("T1");
        halfway.completion_percentage = 50.0;
        let ahead = EntityDataset {
            tasks: vec![halfway],
            ..EntityDataset::default()
        };

        let today = date(2025, 5, 15);
        let m_behind = compute_metrics(&entities(&behind), today);
        let m_ahead = compute_metrics(&entities(&ahead), today);

        // Same status and deadline: only the reported progress differs.
        assert_eq!(m_ahead.completion_rate, m_behind.completion_rate);
        assert_eq!(m_ahead.overdue_tasks, m_behind.overdue_tasks);
        assert!((m_ahead.efficiency_score - m_behind.efficiency_score - 10.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_empty_dataset_is_all_zero() {
        let metrics = compute_metrics(&[], date(2025, 1, 1));
        assert_eq!(metrics.total_tasks, 0);
        assert_eq!(metrics.completion_rate, 0.0);
        assert_eq!(metrics.efficiency_score, 0.0);
    }

    #[test]
    fn critical_path_is_sorted_and_threshold_driven() {
        let dataset = EntityDataset {
            // T1 has a dependency, R1 and S1 clear the revenue threshold,
            // T9 has neither.
            tasks: vec![task_with_deps("T1", &["R1"]), task("T9")],
            releases: vec![release("R1")],
            shows: vec![show("S1")],
        };
        let items = entities(&dataset);
        let path = critical_path(&items);
        let ids: Vec<&str> = path.iter().map(EntityId::as_str).collect();
        assert_eq!(ids, vec!["R1", "S1", "T1"]);
    }

    #[test]
    fn active_backend_init_always_succeeds() {
        let mut backend = ActiveBackend::init();
        let ack = backend.load_dataset(small_dataset()).unwrap();
        assert_eq!(ack.entities_loaded, 3);
        assert!(backend.metrics().is_ok());
    }

    #[test]
    fn clamp_risk_bounds() {
        assert_eq!(clamp_risk(-5.0), 0.0);
        assert_eq!(clamp_risk(42.0), 42.0);
        assert_eq!(clamp_risk(250.0), 100.0);
    }
}
