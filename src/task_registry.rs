//! Task Registry
//!
//! Authoritative record of every admitted transcription task. Tasks are stored
//! in a `DashMap` keyed by task id, so transitions on one task serialize on its
//! shard while unrelated tasks proceed in parallel. Every transition is
//! checked against the lifecycle `queued -> started -> {completed | failed |
//! timeout}`; anything else is an internal inconsistency and is logged loudly.

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, error};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{FailureKind, Segment, Task, TaskFailure, TaskStatus};

/// Registry entry: the public task plus reaper bookkeeping
#[derive(Debug)]
struct TaskEntry {
    task: Task,
    /// Monotonic instant of the terminal transition
    finished_at: Option<Instant>,
}

/// Outcome written by a terminal transition
enum Outcome {
    Completed(Vec<Segment>),
    Failed(TaskFailure),
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task in `queued` state and return its id
    pub fn create(&self) -> String {
        let task_id = Uuid::new_v4().to_string();
        let task = Task {
            task_id: task_id.clone(),
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            result: None,
            error: None,
        };
        self.tasks.insert(
            task_id.clone(),
            TaskEntry {
                task,
                finished_at: None,
            },
        );
        debug!("Task {} created", task_id);
        task_id
    }

    /// Register a task that is already `completed` with `result`.
    ///
    /// Used for results served from the cache: the task is inserted in its
    /// terminal state, so it is never seen `queued` or `started`.
    pub fn create_completed(&self, result: Vec<Segment>) -> String {
        let task_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let task = Task {
            task_id: task_id.clone(),
            status: TaskStatus::Completed,
            created_at: now,
            start_time: Some(now),
            end_time: Some(now),
            result: Some(result),
            error: None,
        };
        self.tasks.insert(
            task_id.clone(),
            TaskEntry {
                task,
                finished_at: Some(Instant::now()),
            },
        );
        debug!("Task {} created completed", task_id);
        task_id
    }

    /// `queued -> started`
    pub fn mark_started(&self, task_id: &str) -> Result<(), CoreError> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;

        if entry.task.status != TaskStatus::Queued {
            return Err(inconsistency(task_id, entry.task.status, TaskStatus::Started));
        }
        entry.task.status = TaskStatus::Started;
        entry.task.start_time = Some(Utc::now());
        Ok(())
    }

    /// `started -> completed`
    pub fn mark_completed(&self, task_id: &str, result: Vec<Segment>) -> Result<(), CoreError> {
        self.finish(task_id, TaskStatus::Completed, Outcome::Completed(result))
    }

    /// `started -> failed`
    pub fn mark_failed(&self, task_id: &str, failure: TaskFailure) -> Result<(), CoreError> {
        self.finish(task_id, TaskStatus::Failed, Outcome::Failed(failure))
    }

    /// `started -> timeout`
    pub fn mark_timeout(&self, task_id: &str, deadline: Duration) -> Result<(), CoreError> {
        let failure = TaskFailure::new(
            FailureKind::ProviderTimeout,
            CoreError::ProviderTimeout(deadline.as_secs()).to_string(),
        );
        self.finish(task_id, TaskStatus::Timeout, Outcome::Failed(failure))
    }

    fn finish(&self, task_id: &str, to: TaskStatus, outcome: Outcome) -> Result<(), CoreError> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;

        if entry.task.status != TaskStatus::Started {
            return Err(inconsistency(task_id, entry.task.status, to));
        }

        entry.task.status = to;
        entry.task.end_time = Some(Utc::now());
        entry.finished_at = Some(Instant::now());
        match outcome {
            Outcome::Completed(result) => entry.task.result = Some(result),
            Outcome::Failed(failure) => entry.task.error = Some(failure),
        }
        debug!("Task {} is now {}", task_id, to);
        Ok(())
    }

    /// Snapshot of a task
    pub fn get(&self, task_id: &str) -> Result<Task, CoreError> {
        self.tasks
            .get(task_id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| CoreError::NotFound(task_id.to_string()))
    }

    /// Tasks still queued or started, oldest first
    pub fn list_active(&self) -> Vec<Task> {
        let mut active: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| entry.task.status.is_active())
            .map(|entry| entry.task.clone())
            .collect();
        active.sort_by_key(|task| task.created_at);
        active
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.task.status == status)
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.task.status.is_active())
            .count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Evict terminal tasks whose end time is older than `ttl`
    pub fn reap_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| match entry.finished_at {
            Some(finished) => now.saturating_duration_since(finished) < ttl,
            None => true,
        });
        before.saturating_sub(self.tasks.len())
    }

    /// Drop a task that never left `queued`, used when admission is rolled back
    pub(crate) fn discard_queued(&self, task_id: &str) -> bool {
        self.tasks
            .remove_if(task_id, |_, entry| entry.task.status == TaskStatus::Queued)
            .is_some()
    }
}

fn inconsistency(task_id: &str, from: TaskStatus, to: TaskStatus) -> CoreError {
    error!(
        "Internal inconsistency: task {} cannot move from {} to {}",
        task_id, from, to
    );
    CoreError::InternalInconsistency {
        task_id: task_id.to_string(),
        from,
        to,
    }
}
