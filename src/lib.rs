//! # tourline - Timeline Simulation Engine
//!
//! tourline is the what-if sandbox at the core of a tour-management
//! schedule: operators tentatively move, update, create, or delete
//! schedule entities (tasks, releases, shows) and see projected
//! financial impact, risk, and cascading effects before committing
//! anything to the live dataset.
//!
//! ## Core Concepts
//!
//! - **Entity**: a schedulable record — a [`Task`](entity::Task),
//!   [`Release`](entity::Release), or [`Show`](entity::Show)
//! - **Change**: one immutable proposed mutation to one entity
//! - **Sandbox**: the isolated working copy mutated during a session
//! - **Compute backend**: the simulation math, hosted out-of-thread
//!   behind an asynchronous, correlated message protocol
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tourline::{Change, SimulationController, WorkerConfig, WorkerTransport};
//!
//! let transport = WorkerTransport::start(WorkerConfig::default());
//! let mut controller = SimulationController::new(transport);
//! controller.initialize()?;
//! controller.load_dataset(dataset)?;
//!
//! controller.enter_simulation()?;
//! let handle = controller.simulate_change(Change::delete("R1"))?;
//! let impact = controller.resolve_impact(handle)?;
//! controller.discard_simulation()?; // or commit_simulation()
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod backend;
pub mod change;
pub mod controller;
pub mod entity;
pub mod error;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export primary types at crate root for convenience
pub use backend::{
    ActiveBackend, ComputeBackend, FallbackEngine, LoadAck, Metrics, NativeEngine,
    SimulationResult,
};
pub use change::{Change, ChangeId, ChangeKind};
pub use controller::{AnalysisState, ImpactHandle, SimulationController, SimulationMode};
pub use entity::{
    DataWarning, Entity, EntityBase, EntityDataset, EntityId, EntityStatus, Release, Show, Task,
    TaskPriority,
};
pub use error::{
    BackendError, StateError, TourlineError, TourlineResult, TransportError, ValidationError,
};
pub use store::DatasetStore;
pub use worker::{
    RequestEnvelope, RequestHandle, RequestId, RequestKind, ResponseEnvelope, WorkerConfig,
    WorkerTransport,
};
