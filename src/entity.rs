//! Schedulable entities and the dataset they are loaded into.
//!
//! The entity layer is the prerequisite for everything in tourline.
//! Every schedule record is one of three kinds (task, release, show)
//! sharing a common base, and a whole session's records are loaded at
//! once as an [`EntityDataset`].

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Stable entity identifier.
///
/// Entity ids are caller-supplied strings carried by the dataset load
/// format; they are opaque to the engine and never change after load.
/// Ordering is lexicographic, which gives the critical path its stable
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity id from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle status shared by all entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Not yet scheduled.
    Draft,
    /// Scheduled but not started.
    Scheduled,
    /// In progress.
    Active,
    /// Finished.
    Completed,
    /// Abandoned.
    Cancelled,
}

impl EntityStatus {
    /// Returns true for terminal states (completed or cancelled).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Task priority, highest to lowest urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Blocking other work.
    Critical,
    /// Should be done soon.
    High,
    /// Normal backlog.
    Medium,
    /// Nice to have.
    Low,
}

/// Fields shared by every entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBase {
    /// Unique, immutable identifier.
    pub id: EntityId,
    /// Human-readable title.
    pub title: String,
    /// Schedule start date.
    pub start_date: NaiveDate,
    /// Optional schedule end date; must be >= `start_date` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Lifecycle status.
    pub status: EntityStatus,
    /// Owning organization scope.
    pub organization: String,
    /// Identity of the creator.
    pub created_by: String,
    /// Free-form metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Shared base fields.
    #[serde(flatten)]
    pub base: EntityBase,
    /// Urgency classification.
    pub priority: TaskPriority,
    /// Assignee, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Hard deadline for completion.
    pub deadline: NaiveDate,
    /// Estimated effort in hours.
    pub estimated_hours: f64,
    /// Completion progress in percent, 0-100.
    #[serde(default)]
    pub completion_percentage: f64,
    /// Projected cost if the task runs.
    #[serde(default)]
    pub cost_impact: f64,
    /// Projected revenue attributable to the task.
    #[serde(default)]
    pub revenue_impact: f64,
    /// Ids of entities this task depends on.
    #[serde(default)]
    pub dependencies: Vec<EntityId>,
}

/// A planned release (album, single, video).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Shared base fields.
    #[serde(flatten)]
    pub base: EntityBase,
    /// Distribution platforms.
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Planned release date.
    pub release_date: NaiveDate,
    /// Allocated budget.
    pub budget: f64,
    /// Projected revenue if released on time.
    pub projected_revenue: f64,
    /// Marketing spend committed so far.
    #[serde(default)]
    pub marketing_spend: f64,
    /// Ids of entities this release depends on.
    #[serde(default)]
    pub dependencies: Vec<EntityId>,
}

/// A booked show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    /// Shared base fields.
    #[serde(flatten)]
    pub base: EntityBase,
    /// Venue capacity.
    pub venue_capacity: u32,
    /// Expected attendance.
    pub expected_attendance: u32,
    /// Expected revenue.
    pub revenue: f64,
    /// Expected expenses.
    pub expenses: f64,
}

/// A schedulable entity: one of task, release, or show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    /// A unit of scheduled work.
    Task(Task),
    /// A planned release.
    Release(Release),
    /// A booked show.
    Show(Show),
}

impl Entity {
    /// Returns the entity's identifier.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.base().id
    }

    /// Returns the shared base fields.
    #[must_use]
    pub fn base(&self) -> &EntityBase {
        match self {
            Self::Task(t) => &t.base,
            Self::Release(r) => &r.base,
            Self::Show(s) => &s.base,
        }
    }

    /// Returns the kind as a lowercase wire name.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::Release(_) => "release",
            Self::Show(_) => "show",
        }
    }

    /// Returns the entity's dependency list. Shows have none.
    #[must_use]
    pub fn dependencies(&self) -> &[EntityId] {
        match self {
            Self::Task(t) => &t.dependencies,
            Self::Release(r) => &r.dependencies,
            Self::Show(_) => &[],
        }
    }

    /// The date this entity is scheduled against: a task's deadline, a
    /// release's release date, a show's start date.
    #[must_use]
    pub fn schedule_date(&self) -> NaiveDate {
        match self {
            Self::Task(t) => t.deadline,
            Self::Release(r) => r.release_date,
            Self::Show(s) => s.base.start_date,
        }
    }

    /// Projected revenue attributable to this entity.
    #[must_use]
    pub fn revenue_contribution(&self) -> f64 {
        match self {
            Self::Task(t) => t.revenue_impact,
            Self::Release(r) => r.projected_revenue,
            Self::Show(s) => s.revenue,
        }
    }

    /// Projected cost attributable to this entity.
    #[must_use]
    pub fn cost_contribution(&self) -> f64 {
        match self {
            Self::Task(t) => t.cost_impact,
            Self::Release(r) => r.budget + r.marketing_spend,
            Self::Show(s) => s.expenses,
        }
    }
}

/// A data-quality warning found during dataset validation.
///
/// Warnings do not fail the load; they are surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataWarning {
    /// The entity carrying the problematic reference.
    pub entity: EntityId,
    /// The referenced id that does not exist in the dataset.
    pub dangling_dependency: EntityId,
}

impl fmt::Display for DataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} references missing dependency {}",
            self.entity, self.dangling_dependency
        )
    }
}

/// The dataset load format: all schedulable entities for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDataset {
    /// All tasks.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// All releases.
    #[serde(default)]
    pub releases: Vec<Release>,
    /// All shows.
    #[serde(default)]
    pub shows: Vec<Show>,
}

impl EntityDataset {
    /// Total number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len() + self.releases.len() + self.shows.len()
    }

    /// Returns true if the dataset holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens the dataset into a single entity list, tasks first, then
    /// releases, then shows. Order within each kind is preserved.
    #[must_use]
    pub fn into_entities(self) -> Vec<Entity> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.tasks.into_iter().map(Entity::Task));
        out.extend(self.releases.into_iter().map(Entity::Release));
        out.extend(self.shows.into_iter().map(Entity::Show));
        out
    }

    /// Rebuilds a dataset from a flat entity list.
    #[must_use]
    pub fn from_entities(items: &[Entity]) -> Self {
        let mut dataset = Self::default();
        for item in items {
            match item {
                Entity::Task(t) => dataset.tasks.push(t.clone()),
                Entity::Release(r) => dataset.releases.push(r.clone()),
                Entity::Show(s) => dataset.shows.push(s.clone()),
            }
        }
        dataset
    }

    /// Validates dataset invariants.
    ///
    /// Hard failures: empty ids, duplicate ids, end date before start
    /// date. Dangling dependency references are returned as warnings.
    pub fn validate(&self) -> Result<Vec<DataWarning>, ValidationError> {
        let mut seen: HashSet<&EntityId> = HashSet::with_capacity(self.len());
        let mut bases: Vec<(&EntityBase, &[EntityId])> = Vec::with_capacity(self.len());

        for task in &self.tasks {
            bases.push((&task.base, &task.dependencies));
        }
        for release in &self.releases {
            bases.push((&release.base, &release.dependencies));
        }
        for show in &self.shows {
            bases.push((&show.base, &[]));
        }

        for (base, _) in &bases {
            if base.id.is_empty() {
                return Err(ValidationError::EmptyEntityId);
            }
            if !seen.insert(&base.id) {
                return Err(ValidationError::DuplicateEntityId {
                    id: base.id.clone(),
                });
            }
            if let Some(end) = base.end_date {
                if end < base.start_date {
                    return Err(ValidationError::InvalidDateRange {
                        id: base.id.clone(),
                        start: base.start_date,
                        end,
                    });
                }
            }
        }

        let mut warnings = Vec::new();
        for (base, deps) in &bases {
            for dep in *deps {
                if !seen.contains(dep) {
                    warnings.push(DataWarning {
                        entity: base.id.clone(),
                        dangling_dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(warnings)
    }
}
