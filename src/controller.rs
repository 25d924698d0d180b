//! The simulation session state machine.
//!
//! The controller owns the [`DatasetStore`] and the [`WorkerTransport`]
//! and drives the Live -> Simulating -> Live lifecycle. Staged changes
//! are applied to the sandbox synchronously (the UI sees them at once)
//! while the impact analysis arrives asynchronously from the worker —
//! a deliberate two-speed design: `current_items` and `last_result`
//! are separate and may briefly disagree.
//!
//! Late results are fenced by a session epoch: an impact computed for
//! a session that has since been committed or discarded is ignored.

use std::fmt;

use crate::backend::{Metrics, SimulationResult};
use crate::change::Change;
use crate::entity::{DataWarning, Entity, EntityDataset, EntityId};
use crate::error::{StateError, TourlineResult};
use crate::store::DatasetStore;
use crate::worker::{RequestHandle, WorkerTransport};

/// The controller's two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    /// No sandbox; reads and writes act on the canonical dataset.
    Live,
    /// Sandbox active; zero or more changes staged.
    Simulating,
}

impl fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Live => "Live",
            Self::Simulating => "Simulating",
        })
    }
}

/// Freshness of the impact analysis relative to the sandbox data.
///
/// The sandbox never rolls back on a failed analysis; the UI shows the
/// analysis as stale until a retry succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    /// No change staged yet this session.
    Idle,
    /// A simulate request is in flight.
    Pending,
    /// `last_result` reflects the latest staged change.
    Fresh,
    /// The latest simulate request failed; `last_result` lags.
    Stale,
}

/// Handle for one in-flight impact computation, fenced by the session
/// epoch it was issued under.
#[derive(Debug)]
pub struct ImpactHandle {
    inner: RequestHandle,
    epoch: u64,
}

/// Orchestrates simulation sessions over the store and the transport.
pub struct SimulationController {
    store: DatasetStore,
    transport: WorkerTransport,
    mode: SimulationMode,
    pending_changes: Vec<Change>,
    last_result: Option<SimulationResult>,
    analysis: AnalysisState,
    epoch: u64,
}

impl SimulationController {
    /// Creates a controller owning `transport`, with an empty store.
    #[must_use]
    pub fn new(transport: WorkerTransport) -> Self {
        Self {
            store: DatasetStore::new(),
            transport,
            mode: SimulationMode::Live,
            pending_changes: Vec::new(),
            last_result: None,
            analysis: AnalysisState::Idle,
            epoch: 0,
        }
    }

    /// Brings up the worker's compute backend.
    pub fn initialize(&self) -> TourlineResult<()> {
        self.transport.initialize()?;
        Ok(())
    }

    /// Loads a fresh dataset: validates it, replaces the canonical
    /// list, and hands it to the backend. Live mode only. Returns the
    /// data-quality warnings found during validation.
    pub fn load_dataset(&mut self, dataset: EntityDataset) -> TourlineResult<Vec<DataWarning>> {
        self.ensure_mode(SimulationMode::Live, "load_dataset")?;
        let warnings = dataset.validate()?;
        self.transport.load_dataset(&dataset)?;
        self.store.replace_canonical(dataset.into_entities())?;
        Ok(warnings)
    }

    /// Enters a simulation session: deep-copies the canonical list
    /// into the sandbox and freshly gives the backend the canonical
    /// dataset so its working copy starts from the same baseline.
    pub fn enter_simulation(&mut self) -> TourlineResult<()> {
        self.ensure_mode(SimulationMode::Live, "enter_simulation")?;
        self.transport
            .load_dataset(&EntityDataset::from_entities(self.store.canonical()))?;
        self.store.open_sandbox()?;
        self.pending_changes.clear();
        self.last_result = None;
        self.analysis = AnalysisState::Idle;
        self.epoch += 1;
        self.mode = SimulationMode::Simulating;
        Ok(())
    }

    /// Stages a change: applies it optimistically to the sandbox,
    /// appends it to the pending list, and submits it to the worker.
    ///
    /// The returned handle resolves to the impact analysis via
    /// [`resolve_impact`](Self::resolve_impact). A malformed change is
    /// rejected here, before anything is staged.
    ///
    /// If submission to the worker fails the change stays staged in the
    /// sandbox and pending list but never reached the backend's working
    /// copy: the analysis is marked stale and stays stale until the
    /// session ends, since there is no per-change resubmit.
    pub fn simulate_change(&mut self, change: Change) -> TourlineResult<ImpactHandle> {
        self.ensure_mode(SimulationMode::Simulating, "simulate_change")?;

        change.apply_to(self.store.sandbox_mut()?)?;
        self.pending_changes.push(change.clone());

        let inner = match self.transport.submit_simulate(&change) {
            Ok(inner) => inner,
            Err(err) => {
                self.analysis = AnalysisState::Stale;
                return Err(err.into());
            }
        };
        self.analysis = AnalysisState::Pending;
        Ok(ImpactHandle {
            inner,
            epoch: self.epoch,
        })
    }

    /// Waits for an in-flight impact and records it as the latest
    /// result. Returns `Ok(None)` when the handle belongs to a session
    /// that has since ended: such late results are ignored.
    ///
    /// On failure the sandbox data stays as applied; only the analysis
    /// is marked stale.
    pub fn resolve_impact(&mut self, handle: ImpactHandle) -> TourlineResult<Option<SimulationResult>> {
        let timeout = self.transport.request_timeout();
        match handle.inner.join_timeout(timeout) {
            Ok(value) => {
                let result: SimulationResult = crate::worker::decode(value)?;
                if handle.epoch != self.epoch || self.mode != SimulationMode::Simulating {
                    return Ok(None);
                }
                self.last_result = Some(result.clone());
                self.analysis = AnalysisState::Fresh;
                Ok(Some(result))
            }
            Err(err) => {
                if handle.epoch == self.epoch && self.mode == SimulationMode::Simulating {
                    self.analysis = AnalysisState::Stale;
                }
                Err(err.into())
            }
        }
    }

    /// Commits the session: the sandbox replaces the canonical list
    /// atomically, and the final entity list is returned so an
    /// external service can persist it. The core does not persist.
    pub fn commit_simulation(&mut self) -> TourlineResult<Vec<Entity>> {
        self.ensure_mode(SimulationMode::Simulating, "commit_simulation")?;
        if self.pending_changes.is_empty() {
            return Err(StateError::NothingToCommit.into());
        }

        self.store.fold_sandbox()?;
        self.end_session();
        Ok(self.store.canonical().to_vec())
    }

    /// Discards the session: the sandbox is dropped and the canonical
    /// list is exactly as it was before `enter_simulation`.
    pub fn discard_simulation(&mut self) -> TourlineResult<()> {
        self.ensure_mode(SimulationMode::Simulating, "discard_simulation")?;
        self.store.drop_sandbox()?;
        self.end_session();
        Ok(())
    }

    /// Aggregate metrics for the current view.
    ///
    /// In live mode a valid cache is served directly; otherwise the
    /// backend is given the canonical dataset and asked to recompute.
    /// In simulation mode the backend's cumulative working copy is
    /// queried as-is.
    pub fn metrics(&mut self) -> TourlineResult<Metrics> {
        if self.mode == SimulationMode::Live {
            if let Some(cached) = self.store.cached_metrics() {
                return Ok(cached.clone());
            }
            self.transport
                .load_dataset(&EntityDataset::from_entities(self.store.canonical()))?;
            let metrics = self.transport.get_metrics()?;
            self.store.cache_metrics(metrics.clone());
            return Ok(metrics);
        }
        Ok(self.transport.get_metrics()?)
    }

    /// The items the UI should render right now.
    #[must_use]
    pub fn current_items(&self) -> &[Entity] {
        self.store.current()
    }

    /// Changes staged during the active session, in order.
    #[must_use]
    pub fn pending_changes(&self) -> &[Change] {
        &self.pending_changes
    }

    /// The most recent impact analysis, if any.
    #[must_use]
    pub const fn last_result(&self) -> Option<&SimulationResult> {
        self.last_result.as_ref()
    }

    /// The controller's current mode.
    #[must_use]
    pub const fn mode(&self) -> SimulationMode {
        self.mode
    }

    /// Freshness of the impact analysis.
    #[must_use]
    pub const fn analysis_state(&self) -> AnalysisState {
        self.analysis
    }

    /// Direct update of a live entity, bypassing simulation.
    pub fn update_entity(&mut self, entity: Entity) -> TourlineResult<()> {
        self.store.update_entity(entity)
    }

    /// Direct delete of a live entity, bypassing simulation.
    pub fn delete_entity(&mut self, id: &EntityId) -> TourlineResult<()> {
        self.store.delete_entity(id)
    }

    /// Direct insert of a live entity, bypassing simulation.
    pub fn insert_entity(&mut self, entity: Entity) -> TourlineResult<()> {
        self.store.insert_entity(entity)
    }

    /// Shuts down the owned transport. Further worker calls fail until
    /// a new controller is built around a fresh transport.
    pub fn terminate(&mut self) {
        self.transport.terminate();
    }

    fn end_session(&mut self) {
        self.pending_changes.clear();
        self.last_result = None;
        self.analysis = AnalysisState::Idle;
        self.epoch += 1;
        self.mode = SimulationMode::Live;
    }

    fn ensure_mode(&self, expected: SimulationMode, operation: &str) -> Result<(), StateError> {
        if self.mode != expected {
            return Err(StateError::InvalidMode {
                operation: operation.to_string(),
                mode: self.mode.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TourlineError, TransportError};
    use crate::test_fixtures::small_dataset;
    use crate::worker::WorkerConfig;
    use serde_json::json;

    fn controller_with_data() -> SimulationController {
        let transport = WorkerTransport::start(WorkerConfig::default());
        let mut controller = SimulationController::new(transport);
        controller.initialize().unwrap();
        controller.load_dataset(small_dataset()).unwrap();
        controller
    }

    #[test]
    fn starts_live_and_rejects_simulating_only_operations() {
        let mut controller = controller_with_data();
        assert_eq!(controller.mode(), SimulationMode::Live);

        let err = controller.commit_simulation().unwrap_err();
        assert!(matches!(
            err,
            TourlineError::State(StateError::InvalidMode { .. })
        ));
        let err = controller.discard_simulation().unwrap_err();
        assert!(err.is_state());
    }

    #[test]
    fn optimistic_apply_is_immediate_and_analysis_lags() {
        let mut controller = controller_with_data();
        controller.enter_simulation().unwrap();

        let handle = controller
            .simulate_change(Change::delete("S1"))
            .unwrap();
        assert!(format!("{handle:?}").contains("ImpactHandle"));

        // Two-speed: the sandbox already reflects the change while the
        // analysis is still pending.
        assert!(!controller.current_items().iter().any(|e| e.id().as_str() == "S1"));
        assert_eq!(controller.analysis_state(), AnalysisState::Pending);
        assert!(controller.last_result().is_none());

        let result = controller.resolve_impact(handle).unwrap().unwrap();
        assert_eq!(controller.analysis_state(), AnalysisState::Fresh);
        assert_eq!(controller.last_result(), Some(&result));
    }

    #[test]
    fn malformed_change_is_rejected_before_staging() {
        let mut controller = controller_with_data();
        controller.enter_simulation().unwrap();

        let err = controller
            .simulate_change(Change::update("ghost", json!({ "title": "x" })))
            .unwrap_err();
        assert!(err.is_backend());
        assert!(controller.pending_changes().is_empty());
        assert_eq!(controller.current_items().len(), 3);
    }

    #[test]
    fn commit_requires_pending_changes() {
        let mut controller = controller_with_data();
        controller.enter_simulation().unwrap();
        let err = controller.commit_simulation().unwrap_err();
        assert!(matches!(
            err,
            TourlineError::State(StateError::NothingToCommit)
        ));
    }

    #[test]
    fn late_result_for_discarded_session_is_ignored() {
        let mut controller = controller_with_data();
        controller.enter_simulation().unwrap();

        let handle = controller.simulate_change(Change::delete("S1")).unwrap();
        controller.discard_simulation().unwrap();

        // The worker's answer arrives after the session ended.
        let resolved = controller.resolve_impact(handle).unwrap();
        assert!(resolved.is_none());
        assert!(controller.last_result().is_none());
        assert_eq!(controller.analysis_state(), AnalysisState::Idle);
    }

    #[test]
    fn live_metrics_are_cached_until_crud_invalidates() {
        let mut controller = controller_with_data();
        let first = controller.metrics().unwrap();
        let second = controller.metrics().unwrap();
        assert_eq!(first, second);

        let id = EntityId::from("S1");
        controller.delete_entity(&id).unwrap();
        let third = controller.metrics().unwrap();
        assert!(third.total_revenue_impact < first.total_revenue_impact);
    }

    #[test]
    fn failed_submit_marks_analysis_stale() {
        let mut controller = controller_with_data();
        controller.enter_simulation().unwrap();

        let handle = controller.simulate_change(Change::delete("S1")).unwrap();
        controller.resolve_impact(handle).unwrap();
        assert_eq!(controller.analysis_state(), AnalysisState::Fresh);

        controller.terminate();
        let err = controller.simulate_change(Change::delete("R1")).unwrap_err();
        assert!(err.is_transport());

        // The change is staged locally but never reached the worker:
        // the analysis must no longer read as fresh.
        assert_eq!(controller.pending_changes().len(), 2);
        assert!(!controller.current_items().iter().any(|e| e.id().as_str() == "R1"));
        assert_eq!(controller.analysis_state(), AnalysisState::Stale);
    }

    #[test]
    fn terminated_controller_surfaces_worker_gone() {
        let mut controller = controller_with_data();
        controller.terminate();
        let err = controller.enter_simulation().unwrap_err();
        assert!(matches!(
            err,
            TourlineError::Transport(TransportError::WorkerGone)
        ));
    }
}
