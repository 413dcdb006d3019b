use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use core_lib::schema::Schema;
use sift::{Artifact, TaskHandle};
use crate::error::ServiceError;

///
/// The task state machine: -
///
///   pending --start--> running --ok-----> completed
///                         |
///                         +----fail-----> failed
///                         +----cancel---> canceled
///
/// Terminal states are immutable - every transition method refuses to move a task
/// backwards or out of a terminal state.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending   => "pending",
            TaskState::Running   => "running",
            TaskState::Completed => "completed",
            TaskState::Failed    => "failed",
            TaskState::Canceled  => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Canceled)
    }
}

struct Task {
    state: TaskState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    schema: Arc<Schema>,
    files: Vec<PathBuf>,
    callback_url: Option<String>,
    handle: Arc<TaskHandle>,
    artifact: Option<Arc<Artifact>>,
    error: Option<String>,
}

///
/// One row of the list tool's output.
///
#[derive(Clone, Debug, Serialize)]
pub struct TaskBrief {
    pub task_id: String,
    pub status: &'static str,
    pub created_at: String,
}

///
/// The status tool's view of one task.
///
#[derive(Clone, Debug, Serialize)]
pub struct StatusView {
    pub task_id: String,
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

///
/// Everything the callback needs, captured under the lock in one go.
///
pub struct CallbackView {
    pub callback_url: Option<String>,
    pub status: &'static str,
    pub artifact: Option<Arc<Artifact>>,
    pub error: Option<String>,
}

///
/// The in-process task registry. The lock is held only for reads and state
/// transitions - pipeline work, file I/O and callbacks all happen outside it.
///
pub struct Registry {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { tasks: RwLock::new(HashMap::new()) }
    }

    ///
    /// Register a new pending task and hand back its id.
    ///
    pub fn create(&self, schema: Arc<Schema>, files: Vec<PathBuf>, callback_url: Option<String>) -> Uuid {
        let task_id = Uuid::new_v4();
        let file_count = files.len();

        self.tasks.write().insert(task_id, Task {
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            schema,
            files,
            callback_url,
            handle: Arc::new(TaskHandle::new()),
            artifact: None,
            error: None,
        });

        log::info!("Created task {} ({} files)", task_id, file_count);
        task_id
    }

    ///
    /// Move a pending task to running and return what the worker needs to process it.
    ///
    /// Returns None when the task is gone or no longer pending (e.g. canceled while
    /// queued) - the worker just moves on.
    ///
    pub fn claim(&self, task_id: Uuid, budget: Duration) -> Option<(Arc<Schema>, Vec<PathBuf>, Arc<TaskHandle>)> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&task_id)?;

        if task.state != TaskState::Pending {
            return None
        }

        task.state = TaskState::Running;
        task.started_at = Some(Utc::now());
        task.handle.arm(budget);

        Some((task.schema.clone(), task.files.clone(), task.handle.clone()))
    }

    pub fn complete(&self, task_id: Uuid, artifact: Arc<Artifact>) {
        self.finish(task_id, TaskState::Completed, Some(artifact), None);
    }

    pub fn fail(&self, task_id: Uuid, error: String) {
        self.finish(task_id, TaskState::Failed, None, Some(error));
    }

    pub fn mark_canceled(&self, task_id: Uuid, error: Option<String>) {
        self.finish(task_id, TaskState::Canceled, None, error);
    }

    fn finish(&self, task_id: Uuid, state: TaskState, artifact: Option<Arc<Artifact>>, error: Option<String>) {
        let mut tasks = self.tasks.write();
        let task = match tasks.get_mut(&task_id) {
            Some(task) => task,
            None => return,
        };

        // State transitions never go backwards.
        if task.state.is_terminal() {
            return
        }

        task.state = state;
        task.finished_at = Some(Utc::now());
        task.artifact = artifact;
        task.error = error;

        log::info!("Task {} is now {}", task_id, state.as_str());
    }

    ///
    /// Request cancellation. Idempotent: a pending task goes straight to canceled, a
    /// running task has its cancel flag set and transitions at the next phase
    /// boundary, a terminal task is left untouched.
    ///
    pub fn cancel(&self, task_id: Uuid) -> Result<TaskState, ServiceError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&task_id)
            .ok_or_else(|| ServiceError::TaskNotFound { task_id: task_id.to_string() })?;

        match task.state {
            TaskState::Pending => {
                task.state = TaskState::Canceled;
                task.finished_at = Some(Utc::now());
                task.handle.cancel();
                log::info!("Task {} canceled while pending", task_id);
            },
            TaskState::Running => {
                task.handle.cancel();
                log::info!("Task {} flagged for cancellation", task_id);
            },
            _ => {},
        }

        Ok(task.state)
    }

    pub fn status(&self, task_id: Uuid) -> Result<StatusView, ServiceError> {
        let tasks = self.tasks.read();
        let task = tasks.get(&task_id)
            .ok_or_else(|| ServiceError::TaskNotFound { task_id: task_id.to_string() })?;

        let progress = match task.state {
            TaskState::Running => Some(task.handle.phase().name().to_string()),
            _ => None,
        };

        Ok(StatusView {
            task_id: task_id.to_string(),
            status: task.state.as_str(),
            progress,
        })
    }

    pub fn result(&self, task_id: Uuid) -> Result<Arc<Artifact>, ServiceError> {
        let tasks = self.tasks.read();
        let task = tasks.get(&task_id)
            .ok_or_else(|| ServiceError::TaskNotFound { task_id: task_id.to_string() })?;

        task.artifact.clone()
            .ok_or_else(|| ServiceError::TaskIncomplete { task_id: task_id.to_string() })
    }

    pub fn list(&self) -> Vec<TaskBrief> {
        let tasks = self.tasks.read();

        let mut briefs: Vec<(DateTime<Utc>, TaskBrief)> = tasks.iter()
            .map(|(task_id, task)| (task.created_at, TaskBrief {
                task_id: task_id.to_string(),
                status: task.state.as_str(),
                created_at: task.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            }))
            .collect();

        briefs.sort_by(|(a, brief_a), (b, brief_b)| a.cmp(b).then_with(|| brief_a.task_id.cmp(&brief_b.task_id)));
        briefs.into_iter().map(|(_, brief)| brief).collect()
    }

    ///
    /// Remove a terminal task from the registry. The caller deletes the artifact file.
    ///
    pub fn remove(&self, task_id: Uuid) -> Result<(), ServiceError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get(&task_id)
            .ok_or_else(|| ServiceError::TaskNotFound { task_id: task_id.to_string() })?;

        if !task.state.is_terminal() {
            return Err(ServiceError::TaskNotTerminal {
                task_id: task_id.to_string(),
                state: task.state.as_str().to_string(),
            })
        }

        tasks.remove(&task_id);
        Ok(())
    }

    pub fn callback_view(&self, task_id: Uuid) -> Option<CallbackView> {
        let tasks = self.tasks.read();
        let task = tasks.get(&task_id)?;

        Some(CallbackView {
            callback_url: task.callback_url.clone(),
            status: task.state.as_str(),
            artifact: task.artifact.clone(),
            error: task.error.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::from_value(json!({
            "version": "1",
            "sides": {
                "business": { "file_pattern": "b*", "field_roles": { "order_id": "id" } },
                "finance": { "file_pattern": "f*", "field_roles": { "order_id": "id" } }
            },
            "key_role": "order_id"
        })).unwrap())
    }

    #[test]
    fn lifecycle_happy_path() {
        let registry = Registry::new();
        let task_id = registry.create(schema(), vec!(), None);

        assert_eq!(registry.status(task_id).unwrap().status, "pending");

        let claimed = registry.claim(task_id, Duration::from_secs(60));
        assert!(claimed.is_some());
        assert_eq!(registry.status(task_id).unwrap().status, "running");

        registry.fail(task_id, "boom".into());
        assert_eq!(registry.status(task_id).unwrap().status, "failed");
    }

    #[test]
    fn pending_cancel_is_immediate_and_claim_refuses() {
        let registry = Registry::new();
        let task_id = registry.create(schema(), vec!(), None);

        assert_eq!(registry.cancel(task_id).unwrap(), TaskState::Canceled);
        assert!(registry.claim(task_id, Duration::from_secs(60)).is_none());
    }

    #[test]
    fn running_cancel_sets_the_flag_only() {
        let registry = Registry::new();
        let task_id = registry.create(schema(), vec!(), None);
        let (_, _, handle) = registry.claim(task_id, Duration::from_secs(60)).unwrap();

        assert_eq!(registry.cancel(task_id).unwrap(), TaskState::Running);
        assert!(handle.is_canceled());

        // The worker observes the flag and finishes the transition.
        registry.mark_canceled(task_id, None);
        assert_eq!(registry.status(task_id).unwrap().status, "canceled");
    }

    #[test]
    fn terminal_states_are_immutable() {
        let registry = Registry::new();
        let task_id = registry.create(schema(), vec!(), None);
        registry.claim(task_id, Duration::from_secs(60)).unwrap();
        registry.mark_canceled(task_id, None);

        // A late fail or cancel cannot move the task out of canceled.
        registry.fail(task_id, "too late".into());
        assert_eq!(registry.cancel(task_id).unwrap(), TaskState::Canceled);
        assert_eq!(registry.status(task_id).unwrap().status, "canceled");
    }

    #[test]
    fn cancel_is_idempotent() {
        let registry = Registry::new();
        let task_id = registry.create(schema(), vec!(), None);

        assert_eq!(registry.cancel(task_id).unwrap(), TaskState::Canceled);
        assert_eq!(registry.cancel(task_id).unwrap(), TaskState::Canceled);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let registry = Registry::new();
        let missing = Uuid::new_v4();

        assert!(matches!(registry.status(missing), Err(ServiceError::TaskNotFound { .. })));
        assert!(matches!(registry.cancel(missing), Err(ServiceError::TaskNotFound { .. })));
        assert!(matches!(registry.result(missing), Err(ServiceError::TaskNotFound { .. })));
    }

    #[test]
    fn result_before_completion_is_incomplete() {
        let registry = Registry::new();
        let task_id = registry.create(schema(), vec!(), None);

        assert!(matches!(registry.result(task_id), Err(ServiceError::TaskIncomplete { .. })));
    }

    #[test]
    fn remove_refuses_non_terminal_tasks() {
        let registry = Registry::new();
        let task_id = registry.create(schema(), vec!(), None);

        assert!(matches!(registry.remove(task_id), Err(ServiceError::TaskNotTerminal { .. })));

        registry.cancel(task_id).unwrap();
        registry.remove(task_id).unwrap();
        assert!(matches!(registry.status(task_id), Err(ServiceError::TaskNotFound { .. })));
    }

    #[test]
    fn list_orders_by_creation() {
        let registry = Registry::new();
        let first = registry.create(schema(), vec!(), None);
        let second = registry.create(schema(), vec!(), None);

        let briefs = registry.list();
        assert_eq!(briefs.len(), 2);
        assert_eq!(briefs[0].task_id, first.to_string());
        assert_eq!(briefs[1].task_id, second.to_string());
    }
}
