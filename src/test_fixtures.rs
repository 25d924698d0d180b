//! Shared fixtures for unit tests.

use chrono::NaiveDate;

use crate::entity::{
    Entity, EntityBase, EntityDataset, EntityId, EntityStatus, Release, Show, Task, TaskPriority,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn base(id: &str) -> EntityBase {
    EntityBase {
        id: EntityId::from(id),
        title: format!("{id} title"),
        start_date: date(2025, 5, 1),
        end_date: None,
        status: EntityStatus::Scheduled,
        organization: "org-1".to_string(),
        created_by: "tester".to_string(),
        metadata: serde_json::Value::Null,
    }
}

pub fn task(id: &str) -> Task {
    Task {
        base: base(id),
        priority: TaskPriority::Medium,
        assignee: None,
        deadline: date(2025, 6, 1),
        estimated_hours: 8.0,
        completion_percentage: 0.0,
        cost_impact: 500.0,
        revenue_impact: 2_000.0,
        dependencies: Vec::new(),
    }
}

pub fn task_with_deps(id: &str, deps: &[&str]) -> Task {
    let mut t = task(id);
    t.dependencies = deps.iter().map(|d| EntityId::from(*d)).collect();
    t
}

pub fn release(id: &str) -> Release {
    Release {
        base: base(id),
        platforms: vec!["streaming".to_string()],
        release_date: date(2025, 6, 15),
        budget: 10_000.0,
        projected_revenue: 50_000.0,
        marketing_spend: 3_000.0,
        dependencies: Vec::new(),
    }
}

pub fn show(id: &str) -> Show {
    Show {
        base: base(id),
        venue_capacity: 1_200,
        expected_attendance: 900,
        revenue: 30_000.0,
        expenses: 12_000.0,
    }
}

/// One task depending on one release, plus a show: the smallest dataset
/// that exercises cascades, revenue, and expenses at once.
pub fn small_dataset() -> EntityDataset {
    EntityDataset {
        tasks: vec![task_with_deps("T1", &["R1"])],
        releases: vec![release("R1")],
        shows: vec![show("S1")],
    }
}

pub fn entities(dataset: &EntityDataset) -> Vec<Entity> {
    dataset.clone().into_entities()
}
