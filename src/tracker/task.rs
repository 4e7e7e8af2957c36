use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde::Serialize;

use crate::core::{ArcStr, Dynamic, TaskId};
use crate::error::GraphError;
use crate::registry::TaskDeclaration;
use crate::tracker::{Index, Tracked};

/// Lifecycle of a provisioned task.
///
/// ```text
/// INITIALIZED -> BLOCKED <-> READY_FOR_ASSIGNMENT -> RUNNING -> COMPLETE
///                                                            -> RUNTIME_ERROR
///                                                            -> SKIPPED
/// ```
///
/// `BLOCKED` and `READY_FOR_ASSIGNMENT` are not terminal, a task may move
/// between them on every readiness pass until it is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Initialized,
    Blocked,
    ReadyForAssignment,
    Running,
    Complete,
    RuntimeError,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::RuntimeError | TaskStatus::Skipped
        )
    }

    /// Tasks in these states are evaluated by the readiness pass.
    pub fn is_unresolved(self) -> bool {
        matches!(self, TaskStatus::Initialized | TaskStatus::Blocked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Initialized => "INITIALIZED",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::ReadyForAssignment => "READY_FOR_ASSIGNMENT",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::RuntimeError => "RUNTIME_ERROR",
            TaskStatus::Skipped => "SKIPPED",
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a blocked task is still waiting for, as of the last readiness pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaitingOn {
    /// Before-tasks which are not `COMPLETE` yet.
    pub tasks: Vec<String>,
    /// Inputs which are not provisioned yet.
    pub inputs: Vec<String>,
}

impl WaitingOn {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.inputs.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.tasks.clear();
        self.inputs.clear();
    }
}

/// A runtime instance of a [`TaskDeclaration`].
pub struct ProvisionedTask {
    pub(crate) id: TaskId,
    pub(crate) name: ArcStr,
    pub(crate) declaration: Arc<TaskDeclaration>,
    /// Declared before-tasks merged with requirements added in the registry.
    pub(crate) required_before: Vec<ArcStr>,
    pub(crate) status: TaskStatus,
    pub(crate) waiting_on: WaitingOn,
    pub(crate) params: Option<Dynamic>,
}

impl ProvisionedTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn waiting_on(&self) -> &WaitingOn {
        &self.waiting_on
    }

    pub fn declaration(&self) -> &Arc<TaskDeclaration> {
        &self.declaration
    }

    pub fn required_before(&self) -> &[ArcStr] {
        &self.required_before
    }

    pub fn params(&self) -> Option<&Dynamic> {
        self.params.as_ref()
    }
}

impl Debug for ProvisionedTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("waiting_on", &self.waiting_on)
            .finish()
    }
}

impl Tracked for ProvisionedTask {
    type Id = TaskId;

    fn id(&self) -> TaskId {
        self.id
    }

    fn name(&self) -> &ArcStr {
        &self.name
    }
}

/// Indexed store of provisioned tasks.
#[derive(Default)]
pub struct TaskTracker {
    index: Index<ProvisionedTask>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, task: ProvisionedTask) -> Result<TaskId, GraphError> {
        self.index
            .insert(task)
            .map_err(|task| GraphError::DuplicateTaskTracking(task.id))
    }

    pub fn get(&self, id: TaskId) -> Option<&ProvisionedTask> {
        self.index.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut ProvisionedTask> {
        self.index.get_mut(id)
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.get(id).map(ProvisionedTask::status)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.get(id).is_some()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.index.contains_name(name)
    }

    /// Tasks whose status is in `statuses`, or with `inclusive` set to
    /// `false`, tasks whose status is not. Ordered by id.
    pub fn filter_by_status(
        &self,
        statuses: &[TaskStatus],
        inclusive: bool,
    ) -> Vec<&ProvisionedTask> {
        self.index
            .values()
            .into_iter()
            .filter(|task| statuses.contains(&task.status) == inclusive)
            .collect()
    }

    /// Tasks tracked under any of `names`. Names without a tracked task are
    /// skipped.
    pub fn filter_by_name<I>(&self, names: I) -> Vec<&ProvisionedTask>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        names
            .into_iter()
            .flat_map(|name| self.index.named(name.as_ref()).collect::<Vec<_>>())
            .collect()
    }

    /// Like [`filter_by_name`](Self::filter_by_name), but every name must
    /// have at least one tracked task.
    pub fn collect_by_name<I>(&self, names: I) -> Result<Vec<&ProvisionedTask>, GraphError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut tasks = Vec::new();

        for name in names {
            let name = name.as_ref();
            let len = tasks.len();
            tasks.extend(self.index.named(name));

            if tasks.len() == len {
                return Err(GraphError::UnknownTask(name.to_string()));
            }
        }

        Ok(tasks)
    }

    /// Removes the given tasks and returns how many were actually tracked.
    pub fn release<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = TaskId>,
    {
        ids.into_iter()
            .filter(|id| self.index.remove(*id).is_some())
            .count()
    }

    /// All tracked tasks ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &ProvisionedTask> {
        self.index.values().into_iter()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}

impl Debug for TaskTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ResourceRegistry, TaskRegistry};

    fn setup(names: &[&str]) -> (TaskRegistry, ResourceRegistry) {
        let mut tasks = TaskRegistry::new();
        for name in names {
            tasks
                .register(TaskDeclaration::builder(*name).run(|_| Ok(())))
                .unwrap();
        }
        (tasks, ResourceRegistry::new())
    }

    #[test]
    fn test_track_duplicate() {
        let (mut tasks, resources) = setup(&["a"]);
        let mut tracker = TaskTracker::new();

        let task = tasks.provision("a", &resources).unwrap();
        let id = task.id();
        let clone = ProvisionedTask {
            id,
            name: task.name.clone(),
            declaration: task.declaration.clone(),
            required_before: vec![],
            status: TaskStatus::Initialized,
            waiting_on: WaitingOn::default(),
            params: None,
        };

        tracker.track(task).unwrap();
        let err = tracker.track(clone).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTaskTracking(dup) if dup == id));
    }

    #[test]
    fn test_filter_by_status() {
        let (mut tasks, resources) = setup(&["a", "b", "c"]);
        let mut tracker = TaskTracker::new();

        let a = tracker.track(tasks.provision("a", &resources).unwrap()).unwrap();
        let b = tracker.track(tasks.provision("b", &resources).unwrap()).unwrap();
        tracker.track(tasks.provision("c", &resources).unwrap()).unwrap();

        tracker.get_mut(a).unwrap().status = TaskStatus::Complete;
        tracker.get_mut(b).unwrap().status = TaskStatus::Blocked;

        let done = tracker.filter_by_status(&[TaskStatus::Complete], true);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].name(), "a");

        let pending = tracker.filter_by_status(&[TaskStatus::Complete], false);
        let names: Vec<_> = pending.iter().map(|task| task.name()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_collect_vs_filter_by_name() {
        let (mut tasks, resources) = setup(&["a", "b"]);
        let mut tracker = TaskTracker::new();
        tracker.track(tasks.provision("a", &resources).unwrap()).unwrap();
        tracker.track(tasks.provision("a", &resources).unwrap()).unwrap();

        assert_eq!(tracker.collect_by_name(["a"]).unwrap().len(), 2);
        assert!(tracker.filter_by_name(["b"]).is_empty());
        assert!(matches!(
            tracker.collect_by_name(["a", "b"]),
            Err(GraphError::UnknownTask(name)) if name == "b"
        ));
    }

    #[test]
    fn test_release_counts_present() {
        let (mut tasks, resources) = setup(&["a", "b"]);
        let mut tracker = TaskTracker::new();
        let a = tracker.track(tasks.provision("a", &resources).unwrap()).unwrap();
        let b = tracker.track(tasks.provision("b", &resources).unwrap()).unwrap();

        assert_eq!(tracker.release([a, a]), 1);
        assert!(!tracker.contains(a));
        assert!(tracker.contains(b));

        // a released id can't reach the task that reuses its slot
        let c = tracker.track(tasks.provision("a", &resources).unwrap()).unwrap();
        assert!(tracker.get(a).is_none());
        assert_eq!(tracker.get(c).map(|task| task.name()), Some("a"));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_status_names() {
        assert_eq!(TaskStatus::ReadyForAssignment.to_string(), "READY_FOR_ASSIGNMENT");
        assert_eq!(
            serde_json::to_string(&TaskStatus::RuntimeError).unwrap(),
            r#""RUNTIME_ERROR""#
        );
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }
}
