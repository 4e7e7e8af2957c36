pub use anyhow::Error as TaskError;
use thiserror::Error;

use crate::core::{ResourceId, TaskId};

/// Result returned from a single task body.
pub type TaskResult = anyhow::Result<(), TaskError>;

/// Errors raised by the registries, trackers and the task graph.
///
/// Every variant describes a graph that was assembled incorrectly. None of
/// them are transient, so the graph never retries an operation that returned
/// one of these. Failures inside task bodies are not represented here, they
/// are recorded on the task as [`TaskStatus::RuntimeError`](crate::TaskStatus).
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task '{0}' is already registered with a different declaration")]
    DuplicateTask(String),

    #[error("Task '{0}' is not registered or not tracked")]
    UnknownTask(String),

    #[error("Resource '{0}' is not registered")]
    UnknownResource(String),

    #[error("Resource '{name}' is declared as {existing}, can't redeclare it as {requested}")]
    ConflictingResource {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("Resource '{name}' is declared as {expected}, got an instance of {found}")]
    ResourceType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Task {0} is already tracked")]
    DuplicateTaskTracking(TaskId),

    #[error("Resource {0} is already tracked")]
    DuplicateResourceTracking(ResourceId),

    #[error("Resource '{0}' has not been provisioned")]
    MissingResource(String),

    #[error("Task '{task}' provided '{resource}', which is not one of its declared outputs")]
    UndeclaredOutput { task: String, resource: String },

    #[error("Task graph stalled with unresolved tasks: {}", .0.join(", "))]
    Stalled(Vec<String>),
}
