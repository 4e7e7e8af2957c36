//! The orchestrator tying registries, trackers and the runner together.
//!
//! A [`TaskGraph`] owns one [`Registries`] context and the two trackers.
//! Every scheduling tick is one run pass followed by one readiness pass:
//!
//! 1. [`run_all_ready_tasks`](TaskGraph::run_all_ready_tasks) hands every
//!    `READY_FOR_ASSIGNMENT` task to the [`TaskRunner`] and applies the
//!    reported outcomes, provisioning the resources successful tasks
//!    provided.
//! 2. [`check_if_blocked_tasks_are_ready`](TaskGraph::check_if_blocked_tasks_are_ready)
//!    re-evaluates every `INITIALIZED` and `BLOCKED` task against the task
//!    and resource trackers.
//!
//! There is no topological sort. A task whose dependencies can never be
//! satisfied stays `BLOCKED`, and the loop in
//! [`run_until_done`](TaskGraph::run_until_done) ends as soon as a pass finds
//! nothing ready. What happens to such leftovers is decided by
//! [`StallPolicy`].

mod diagnostics;
mod runner;

use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{ArcStr, Dynamic, Phase, ResourceId, TaskId};
use crate::engine::{Outputs, ResolvedInputs};
use crate::error::GraphError;
use crate::registry::{Registries, Res, ResourceRegistry};
use crate::tracker::{ProvisionedResource, ResourceTracker, TaskStatus, TaskTracker, WaitingOn};

pub use crate::graph::diagnostics::{Edge, ResourceSnapshot, Snapshot, TaskSnapshot};
pub use crate::graph::runner::{Dispatch, ParallelRunner, RunResult, SequentialRunner, TaskRunner};

use crate::graph::runner::panic_message;

const TERMINAL: [TaskStatus; 3] = [
    TaskStatus::Complete,
    TaskStatus::RuntimeError,
    TaskStatus::Skipped,
];

const UNRESOLVED: [TaskStatus; 2] = [TaskStatus::Initialized, TaskStatus::Blocked];

/// Outcome of a `run_if` predicate.
enum Gate {
    Run,
    Skip,
    Panicked(String),
}

/// What [`TaskGraph::run_until_done`] does with tasks that are still
/// unresolved when the loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StallPolicy {
    /// Leave them be.
    Ignore,
    /// Log each of them together with what it is waiting on.
    #[default]
    Warn,
    /// Fail the run with [`GraphError::Stalled`].
    Fail,
}

/// Runtime options of a [`TaskGraph`].
#[derive(Debug, Clone, Default)]
pub struct GraphOptions {
    pub stall: StallPolicy,
    /// Hard cap on the number of ticks of a single run. Tasks that did not
    /// get to run are reported like stalled ones.
    pub max_ticks: Option<usize>,
}

impl GraphOptions {
    pub fn stall(mut self, policy: StallPolicy) -> Self {
        self.stall = policy;
        self
    }

    pub fn max_ticks(mut self, ticks: usize) -> Self {
        self.max_ticks = Some(ticks);
        self
    }
}

/// Outcome of a single [`TaskGraph::run_until_done`] call.
///
/// Only tasks that were pending when the run started are reported, names
/// are ordered by task id. Tasks still ready when
/// [`GraphOptions::max_ticks`] stopped the run count as unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ticks: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub unresolved: Vec<String>,
}

impl RunSummary {
    /// Returns `true` if every task of the run reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// A dependency-driven task and resource execution engine.
pub struct TaskGraph<R = SequentialRunner>
where
    R: TaskRunner,
{
    registries: Registries,
    tasks: TaskTracker,
    resources: ResourceTracker,
    runner: R,
    options: GraphOptions,
}

impl TaskGraph {
    /// Creates a graph that runs tasks sequentially on the calling thread.
    pub fn new(registries: Registries) -> Self {
        Self::with_runner(registries, SequentialRunner)
    }
}

impl<R> TaskGraph<R>
where
    R: TaskRunner,
{
    pub fn with_runner(registries: Registries, runner: R) -> Self {
        Self {
            registries,
            tasks: TaskTracker::new(),
            resources: ResourceTracker::new(),
            runner,
            options: GraphOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GraphOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn registries_mut(&mut self) -> &mut Registries {
        &mut self.registries
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.status(id)
    }

    // PROVISIONING

    /// Creates and tracks a new instance of the named task.
    pub fn provision_task(&mut self, name: &str) -> Result<TaskId, GraphError> {
        let task = self
            .registries
            .tasks
            .provision(name, &self.registries.resources)?;

        tracing::debug!(task = name, id = %task.id, "provisioned task");
        self.tasks.track(task)
    }

    /// Like [`provision_task`](Self::provision_task), binding `params` to the
    /// instance. The body reads them with
    /// [`TaskContext::params`](crate::TaskContext::params).
    pub fn provision_task_with<P>(&mut self, name: &str, params: P) -> Result<TaskId, GraphError>
    where
        P: Send + Sync + 'static,
    {
        let params: Dynamic = Arc::new(params);
        let task = self.registries.tasks.provision_with(
            name,
            &self.registries.resources,
            Some(params),
        )?;

        tracing::debug!(task = name, id = %task.id, "provisioned task with params");
        self.tasks.track(task)
    }

    /// Provisions every named task, stopping at the first failure.
    pub fn provision_tasks<I>(&mut self, names: I) -> Result<Vec<TaskId>, GraphError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| self.provision_task(name.as_ref()))
            .collect()
    }

    /// Provisions and tracks a resource instance. An instance already
    /// tracked under the same name is released.
    pub fn provision_resource<T>(
        &mut self,
        name: &str,
        instance: T,
    ) -> Result<ResourceId, GraphError>
    where
        T: Send + Sync + 'static,
    {
        let resource = self.registries.resources.provision(name, instance)?;
        self.track_resource(resource)
    }

    /// Like [`provision_resource`](Self::provision_resource), releasing the
    /// instance at `phase` regardless of the declared default.
    pub fn provision_resource_until<T>(
        &mut self,
        name: &str,
        instance: T,
        phase: Phase,
    ) -> Result<ResourceId, GraphError>
    where
        T: Send + Sync + 'static,
    {
        let resource = self
            .registries
            .resources
            .provision(name, instance)?
            .with_release_on(phase);

        self.track_resource(resource)
    }

    fn track_resource(&mut self, resource: ProvisionedResource) -> Result<ResourceId, GraphError> {
        tracing::debug!(resource = resource.name(), id = %resource.id, "provisioned resource");
        self.resources.replace(resource)
    }

    // SCHEDULING

    /// One readiness pass over every `INITIALIZED` and `BLOCKED` task.
    ///
    /// `run_if` predicates are evaluated for all candidates first, so a gated
    /// task already counts as `COMPLETE` for the rest of the pass. A panicking
    /// predicate sends its task to `RUNTIME_ERROR`. Returns the number of
    /// tasks in `READY_FOR_ASSIGNMENT` after the pass.
    ///
    /// Fails with [`GraphError::UnknownTask`] if a before-task has no tracked
    /// instance, in which case no task is changed.
    pub fn check_if_blocked_tasks_are_ready(&mut self) -> Result<usize, GraphError> {
        let mut ready = self
            .tasks
            .filter_by_status(&[TaskStatus::ReadyForAssignment], true)
            .len();

        let mut gates = Vec::new();
        for task in self.tasks.filter_by_status(&UNRESOLVED, true) {
            let declaration = &task.declaration;
            let gate = match catch_unwind(AssertUnwindSafe(|| declaration.should_run())) {
                Ok(true) => Gate::Run,
                Ok(false) => Gate::Skip,
                Err(panic) => Gate::Panicked(panic_message(panic)),
            };
            gates.push((task.id, gate));
        }

        for (id, gate) in &gates {
            if let (Gate::Run, Some(task)) = (gate, self.tasks.get(*id)) {
                self.tasks.collect_by_name(&task.required_before)?;
            }
        }

        let mut pending = Vec::with_capacity(gates.len());
        for (id, gate) in gates {
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };

            match gate {
                Gate::Run => pending.push(id),
                Gate::Skip => {
                    tracing::debug!(task = %task.name, %id, "run_if returned false, skipping");
                    task.status = TaskStatus::Complete;
                    task.waiting_on.clear();
                }
                Gate::Panicked(message) => {
                    tracing::warn!(task = %task.name, %id, error = %message, "run_if failed");
                    task.status = TaskStatus::RuntimeError;
                    task.waiting_on.clear();
                }
            }
        }

        for id in pending {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };

            let mut waiting = WaitingOn::default();

            for before in self.tasks.collect_by_name(&task.required_before)? {
                if before.status != TaskStatus::Complete
                    && !waiting.tasks.iter().any(|name| name == before.name())
                {
                    waiting.tasks.push(before.name().to_string());
                }
            }

            for input in task.declaration.inputs() {
                if !self.resources.contains(input) {
                    waiting.inputs.push(input.to_string());
                }
            }

            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };

            if waiting.is_empty() {
                tracing::debug!(task = %task.name, %id, "ready for assignment");
                task.status = TaskStatus::ReadyForAssignment;
                task.waiting_on.clear();
                ready += 1;
            } else {
                task.status = TaskStatus::Blocked;
                task.waiting_on = waiting;
            }
        }

        Ok(ready)
    }

    /// Dispatches every `READY_FOR_ASSIGNMENT` task to the runner and applies
    /// the outcomes. Returns the number of dispatched tasks.
    ///
    /// A ready task whose input disappeared since the readiness pass is sent
    /// back to `BLOCKED` instead of being dispatched.
    pub fn run_all_ready_tasks(&mut self) -> usize {
        let ready: Vec<TaskId> = self
            .tasks
            .filter_by_status(&[TaskStatus::ReadyForAssignment], true)
            .into_iter()
            .map(|task| task.id)
            .collect();

        let mut batch = Vec::with_capacity(ready.len());
        for id in ready {
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };

            match collect_inputs(&self.resources, task.declaration.inputs()) {
                Ok(inputs) => {
                    task.status = TaskStatus::Running;
                    batch.push(Dispatch {
                        id,
                        name: task.name.clone(),
                        declaration: task.declaration.clone(),
                        inputs,
                        params: task.params.clone(),
                    });
                }
                Err(err) => {
                    tracing::debug!(
                        task = %task.name,
                        %id,
                        error = %err,
                        "input vanished before dispatch"
                    );
                    task.status = TaskStatus::Blocked;
                    task.waiting_on.clear();
                    if let GraphError::MissingResource(name) = err {
                        task.waiting_on.inputs.push(name);
                    }
                }
            }
        }

        let dispatched = batch.len();
        if dispatched == 0 {
            return 0;
        }

        let Self {
            registries,
            tasks,
            resources,
            runner,
            ..
        } = self;

        runner.run(batch, &mut |id, result| {
            apply_result(tasks, resources, &mut registries.resources, id, result);
        });

        dispatched
    }

    /// Alternates readiness and run passes until a readiness pass leaves
    /// nothing ready.
    ///
    /// A tick is one run pass followed by one readiness pass. Every tick
    /// settles at least one task, so a run never takes more ticks than there
    /// are pending tasks. Reaching the end does not mean every task
    /// ran, check [`RunSummary::unresolved`] or set [`StallPolicy::Fail`].
    pub fn run_until_done(&mut self) -> Result<RunSummary, GraphError> {
        let watched: Vec<TaskId> = self
            .tasks
            .filter_by_status(&TERMINAL, false)
            .into_iter()
            .map(|task| task.id)
            .collect();

        let span = tracing::span!(Level::INFO, "run_until_done");
        span.pb_set_length(watched.len() as u64);
        if let Ok(style) = crate::utils::get_style_run() {
            span.pb_set_style(&style);
        }
        span.pb_set_message("Running tasks...");
        let _enter = span.enter();

        let mut ticks = 0;
        let mut finished = 0;
        let mut ready = self.check_if_blocked_tasks_are_ready()?;

        loop {
            let now = self.count_terminal(&watched);
            span.pb_inc(now.saturating_sub(finished) as u64);
            finished = now;

            if ready == 0 {
                break;
            }

            if self.options.max_ticks.is_some_and(|max| ticks >= max) {
                tracing::warn!(ticks, "tick limit reached, stopping");
                break;
            }

            self.run_all_ready_tasks();
            ticks += 1;
            ready = self.check_if_blocked_tasks_are_ready()?;
        }

        let summary = self.summarize(ticks, &watched);

        if !summary.unresolved.is_empty() {
            match self.options.stall {
                StallPolicy::Ignore => {}
                StallPolicy::Warn => {
                    let left = watched
                        .iter()
                        .filter_map(|id| self.tasks.get(*id))
                        .filter(|task| !task.status.is_terminal());

                    for task in left {
                        tracing::warn!(
                            task = task.name(),
                            id = %task.id,
                            status = %task.status,
                            tasks = ?task.waiting_on.tasks,
                            inputs = ?task.waiting_on.inputs,
                            "task left unresolved"
                        );
                    }
                }
                StallPolicy::Fail => return Err(GraphError::Stalled(summary.unresolved)),
            }
        }

        tracing::info!(
            ticks,
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            unresolved = summary.unresolved.len(),
            "run finished"
        );

        Ok(summary)
    }

    fn count_terminal(&self, ids: &[TaskId]) -> usize {
        ids.iter()
            .filter_map(|id| self.tasks.status(*id))
            .filter(|status| status.is_terminal())
            .count()
    }

    fn summarize(&self, ticks: usize, ids: &[TaskId]) -> RunSummary {
        let mut summary = RunSummary {
            ticks,
            ..RunSummary::default()
        };

        for task in ids.iter().filter_map(|id| self.tasks.get(*id)) {
            let name = task.name().to_string();
            match task.status {
                TaskStatus::Complete => summary.completed.push(name),
                TaskStatus::RuntimeError => summary.failed.push(name),
                TaskStatus::Skipped => summary.skipped.push(name),
                // ready tasks are only left over when the tick limit was hit
                TaskStatus::Initialized
                | TaskStatus::Blocked
                | TaskStatus::ReadyForAssignment
                | TaskStatus::Running => summary.unresolved.push(name),
            }
        }

        summary
    }

    // QUERIES

    /// The current instances of every input declared by the named task.
    pub fn collect_inputs_for(&self, name: &str) -> Result<ResolvedInputs, GraphError> {
        let declaration = self
            .registries
            .tasks
            .get(name)
            .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;

        collect_inputs(&self.resources, declaration.inputs())
    }

    /// Names of tasks still `INITIALIZED` or `BLOCKED`, ordered by id.
    pub fn unresolved_tasks(&self) -> Vec<String> {
        self.tasks
            .filter_by_status(&UNRESOLVED, true)
            .into_iter()
            .map(|task| task.name().to_string())
            .collect()
    }

    /// Reads a tracked resource through its typed handle.
    pub fn resource<T>(&self, res: &Res<T>) -> Result<&T, GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.resources.get_typed(res)
    }

    pub fn unwrap(&self, name: &str) -> Result<&Dynamic, GraphError> {
        self.resources.unwrap(name)
    }

    // CLEANUP

    /// Drops every task in a terminal state. Returns how many were dropped.
    pub fn release_completed_tasks(&mut self) -> usize {
        let ids: Vec<TaskId> = self
            .tasks
            .filter_by_status(&TERMINAL, true)
            .into_iter()
            .map(|task| task.id)
            .collect();

        let released = self.tasks.release(ids);
        tracing::debug!(released, "released finished tasks");
        released
    }

    /// Drops every resource tagged with `phase`. Returns how many were
    /// dropped.
    pub fn release_resources(&mut self, phase: &Phase) -> usize {
        let released = self.resources.release_phase(phase);
        tracing::debug!(released, %phase, "released resources");
        released
    }

    /// Full reset: trackers and registries alike.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.resources.clear();
        self.registries.clear();
    }
}

impl<R> Debug for TaskGraph<R>
where
    R: TaskRunner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.tasks)
            .field("resources", &self.resources)
            .field("options", &self.options)
            .finish()
    }
}

fn collect_inputs(
    resources: &ResourceTracker,
    names: &[ArcStr],
) -> Result<ResolvedInputs, GraphError> {
    names
        .iter()
        .map(|name| {
            resources
                .unwrap(name)
                .map(|instance| (name.clone(), instance.clone()))
        })
        .collect()
}

/// Applies one reported outcome. Reports for tasks which are not `RUNNING`
/// are dropped, so each task is settled at most once.
fn apply_result(
    tasks: &mut TaskTracker,
    resources: &mut ResourceTracker,
    registry: &mut ResourceRegistry,
    id: TaskId,
    result: RunResult,
) {
    let Some(task) = tasks.get_mut(id) else {
        tracing::warn!(%id, "result reported for an untracked task");
        return;
    };

    if task.status != TaskStatus::Running {
        tracing::warn!(
            task = %task.name,
            %id,
            status = %task.status,
            "result reported for a task that is not running"
        );
        return;
    }

    match result {
        RunResult::Success(outputs) => {
            for name in task.declaration.outputs() {
                if !outputs.contains(name) {
                    tracing::warn!(
                        task = %task.name,
                        %id,
                        output = %name,
                        "declared output was not provided"
                    );
                }
            }

            match provide_outputs(resources, registry, outputs) {
                Ok(()) => {
                    tracing::debug!(task = %task.name, %id, "task complete");
                    task.status = TaskStatus::Complete;
                }
                Err(err) => {
                    tracing::warn!(
                        task = %task.name,
                        %id,
                        error = %err,
                        "task provided an invalid output"
                    );
                    task.status = TaskStatus::RuntimeError;
                }
            }
        }
        RunResult::Failed(message) => {
            tracing::warn!(task = %task.name, %id, error = %message, "task failed");
            task.status = TaskStatus::RuntimeError;
        }
        RunResult::Skipped => {
            tracing::debug!(task = %task.name, %id, "task skipped");
            task.status = TaskStatus::Skipped;
        }
    }
}

/// Provisions every provided output. Nothing is tracked unless all of them
/// pass the type check.
fn provide_outputs(
    resources: &mut ResourceTracker,
    registry: &mut ResourceRegistry,
    outputs: Outputs,
) -> Result<(), GraphError> {
    let provisioned = outputs
        .items
        .into_iter()
        .map(|item| registry.provision_dynamic(&item.name, item.instance))
        .collect::<Result<Vec<_>, _>>()?;

    for resource in provisioned {
        tracing::debug!(resource = resource.name(), id = %resource.id, "provisioned output");
        resources.replace(resource)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::TaskDeclaration;
    use crate::engine::TaskAction;

    struct Device;
    struct Mesh(u32);

    fn noop(name: &str) -> TaskDeclaration {
        TaskDeclaration::builder(name).run(|_| Ok(()))
    }

    fn graph_with(declarations: Vec<TaskDeclaration>) -> TaskGraph {
        let mut registries = Registries::new();
        for declaration in declarations {
            registries.add_task(declaration).unwrap();
        }
        TaskGraph::new(registries)
    }

    #[test]
    fn test_unregistered_and_distinct_ids() {
        let mut graph = graph_with(vec![noop("a")]);

        assert!(matches!(
            graph.provision_task("nope"),
            Err(GraphError::UnknownTask(name)) if name == "nope"
        ));

        let first = graph.provision_task("a").unwrap();
        let second = graph.provision_task("a").unwrap();
        assert_ne!(first, second);
        assert_eq!(graph.tasks().len(), 2);
    }

    #[test]
    fn test_free_task_ready_on_first_pass() {
        let mut graph = graph_with(vec![noop("a")]);
        let id = graph.provision_task("a").unwrap();
        assert_eq!(graph.status(id), Some(TaskStatus::Initialized));

        assert_eq!(graph.check_if_blocked_tasks_are_ready().unwrap(), 1);
        assert_eq!(graph.status(id), Some(TaskStatus::ReadyForAssignment));
    }

    #[test]
    fn test_before_task_gates_readiness() {
        let mut graph = graph_with(vec![
            noop("a"),
            TaskDeclaration::builder("b").after(["a"]).run(|_| Ok(())),
        ]);
        let a = graph.provision_task("a").unwrap();
        let b = graph.provision_task("b").unwrap();

        graph.check_if_blocked_tasks_are_ready().unwrap();
        assert_eq!(graph.status(b), Some(TaskStatus::Blocked));
        assert_eq!(graph.tasks().get(b).unwrap().waiting_on().tasks, vec!["a"]);

        // b is only re-evaluated on the next readiness pass
        assert_eq!(graph.run_all_ready_tasks(), 1);
        assert_eq!(graph.status(a), Some(TaskStatus::Complete));
        assert_eq!(graph.status(b), Some(TaskStatus::Blocked));

        graph.check_if_blocked_tasks_are_ready().unwrap();
        assert_eq!(graph.status(b), Some(TaskStatus::ReadyForAssignment));
        assert!(graph.tasks().get(b).unwrap().waiting_on().is_empty());
    }

    #[test]
    fn test_input_gates_readiness() {
        let mut graph = graph_with(vec![
            noop("a"),
            TaskDeclaration::builder("b")
                .after(["a"])
                .reads(["r"])
                .run(|_| Ok(())),
        ]);
        graph.registries_mut().register_resource::<u32>("r").unwrap();
        graph.provision_tasks(["a", "b"]).unwrap();

        let summary = graph.run_until_done().unwrap();
        assert_eq!(summary.completed, vec!["a"]);
        assert_eq!(summary.unresolved, vec!["b"]);

        let b = graph.tasks().collect_by_name(["b"]).unwrap()[0];
        assert!(b.waiting_on().tasks.is_empty());
        assert_eq!(b.waiting_on().inputs, vec!["r"]);

        graph.provision_resource("r", 7u32).unwrap();
        let summary = graph.run_until_done().unwrap();
        assert_eq!(summary.completed, vec!["b"]);
        assert!(summary.is_done());
    }

    #[test]
    fn test_run_if_false_never_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut graph = graph_with(vec![
            TaskDeclaration::builder("dependent")
                .after(["gated"])
                .run(|_| Ok(())),
            TaskDeclaration::builder("gated")
                .run_if(|| false)
                .run(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        ]);
        // provisioned before its before-task, so it is evaluated first
        let dependent = graph.provision_task("dependent").unwrap();
        let gated = graph.provision_task("gated").unwrap();

        assert_eq!(graph.check_if_blocked_tasks_are_ready().unwrap(), 1);
        assert_eq!(graph.status(gated), Some(TaskStatus::Complete));
        assert_eq!(graph.status(dependent), Some(TaskStatus::ReadyForAssignment));

        graph.run_until_done().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dangling_dependency_terminates() {
        let mut graph = graph_with(vec![
            TaskDeclaration::builder("broken").run(|_| anyhow::bail!("no device")),
            TaskDeclaration::builder("after_broken")
                .after(["broken"])
                .run(|_| Ok(())),
            noop("x"),
            TaskDeclaration::builder("y").after(["x"]).run(|_| Ok(())),
        ]);
        graph
            .provision_tasks(["broken", "after_broken", "x", "y"])
            .unwrap();

        let summary = graph.run_until_done().unwrap();
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.failed, vec!["broken"]);
        assert_eq!(summary.completed, vec!["x", "y"]);
        assert_eq!(summary.unresolved, vec!["after_broken"]);
        assert_eq!(graph.unresolved_tasks(), vec!["after_broken"]);

        let waiting = graph.tasks().collect_by_name(["after_broken"]).unwrap()[0].waiting_on();
        assert_eq!(waiting.tasks, vec!["broken"]);
    }

    #[test]
    fn test_stall_policy_fail() {
        let mut graph = graph_with(vec![
            TaskDeclaration::builder("a")
                .reads(["never"])
                .run(|_| Ok(())),
        ])
        .with_options(GraphOptions::default().stall(StallPolicy::Fail));
        graph.registries_mut().resources.reserve("never");
        graph.provision_task("a").unwrap();

        assert!(matches!(
            graph.run_until_done(),
            Err(GraphError::Stalled(names)) if names == vec!["a".to_string()]
        ));
    }

    #[test]
    fn test_cycle_terminates() {
        let mut graph = graph_with(vec![
            TaskDeclaration::builder("a").after(["b"]).run(|_| Ok(())),
            TaskDeclaration::builder("b").after(["a"]).run(|_| Ok(())),
        ]);
        graph.provision_tasks(["a", "b"]).unwrap();

        let summary = graph.run_until_done().unwrap();
        assert_eq!(summary.ticks, 0);
        assert_eq!(summary.unresolved, vec!["a", "b"]);
    }

    #[test]
    fn test_render_scenario() {
        let mut registries = Registries::new();
        registries.register_resource::<Device>("device").unwrap();
        let mesh = registries.register_resource::<Mesh>("mesh").unwrap();

        let provide = mesh.clone();
        registries
            .register_task(
                "load_mesh",
                TaskAction::plain(move |ctx| {
                    ctx.provide(&provide, Mesh(3))?;
                    Ok(())
                }),
                Vec::<&str>::new(),
                Vec::<&str>::new(),
                ["mesh"],
            )
            .unwrap();
        registries
            .register_task(
                "render",
                TaskAction::plain(|ctx| {
                    ctx.input::<Device>("device")?;
                    ctx.input::<Mesh>("mesh")?;
                    Ok(())
                }),
                ["load_mesh"],
                ["device", "mesh"],
                Vec::<&str>::new(),
            )
            .unwrap();

        let mut graph = TaskGraph::new(registries);
        let ids = graph.provision_tasks(["load_mesh", "render"]).unwrap();
        let (load_mesh, render) = (ids[0], ids[1]);
        graph.provision_resource("device", Device).unwrap();

        graph.check_if_blocked_tasks_are_ready().unwrap();
        assert_eq!(graph.status(load_mesh), Some(TaskStatus::ReadyForAssignment));
        assert_eq!(graph.status(render), Some(TaskStatus::Blocked));

        let waiting = graph.tasks().get(render).unwrap().waiting_on().clone();
        assert_eq!(waiting.tasks, vec!["load_mesh"]);
        assert_eq!(waiting.inputs, vec!["mesh"]);

        graph.run_all_ready_tasks();
        assert_eq!(graph.status(load_mesh), Some(TaskStatus::Complete));
        assert_eq!(graph.resource(&mesh).unwrap().0, 3);

        graph.check_if_blocked_tasks_are_ready().unwrap();
        assert_eq!(graph.status(render), Some(TaskStatus::ReadyForAssignment));

        graph.run_all_ready_tasks();
        assert_eq!(graph.status(render), Some(TaskStatus::Complete));
    }

    #[test]
    fn test_release_resources_by_phase() {
        let mut registries = Registries::new();
        registries
            .resources
            .register_with_phase::<u32>("frame", Phase::EndOfFrame)
            .unwrap();
        registries
            .resources
            .register_with_phase::<u32>("device", Phase::OnShutdown)
            .unwrap();
        registries.register_resource::<u32>("scratch").unwrap();

        let mut graph = TaskGraph::new(registries);
        graph.provision_resource("frame", 1u32).unwrap();
        graph.provision_resource("device", 2u32).unwrap();
        graph
            .provision_resource_until("scratch", 3u32, Phase::EndOfFrame)
            .unwrap();

        assert_eq!(graph.release_resources(&Phase::EndOfFrame), 2);
        assert!(graph.unwrap("frame").is_err());
        assert!(graph.unwrap("scratch").is_err());
        assert!(graph.unwrap("device").is_ok());

        assert_eq!(graph.release_resources(&Phase::OnShutdown), 1);
        assert!(graph.resources().is_empty());
    }

    #[test]
    fn test_typed_inputs_and_params() {
        let mut registries = Registries::new();
        let base = registries.register_resource::<u32>("base").unwrap();
        let scaled = registries.register_resource::<u32>("scaled").unwrap();

        let out = scaled.clone();
        registries
            .add_task(
                TaskDeclaration::builder("scale")
                    .inputs(base)
                    .writes(["scaled"])
                    .run(move |ctx, base| {
                        let factor = ctx.params::<u32>().copied().unwrap_or(1);
                        ctx.provide(&out, base * factor)?;
                        Ok(())
                    }),
            )
            .unwrap();

        let mut graph = TaskGraph::new(registries);
        graph.provision_resource("base", 7u32).unwrap();
        graph.provision_task_with("scale", 3u32).unwrap();

        let summary = graph.run_until_done().unwrap();
        assert_eq!(summary.completed, vec!["scale"]);
        assert_eq!(graph.resource(&scaled).unwrap(), &21);
    }

    #[test]
    fn test_outputs_replace_previous_instance() {
        let mut registries = Registries::new();
        let value = registries.register_resource::<u32>("value").unwrap();
        registries
            .add_task(
                TaskDeclaration::builder("bump")
                    .writes(["value"])
                    .run(|ctx| {
                        let next = ctx.params::<u32>().copied().unwrap_or_default();
                        ctx.provide_named("value", next)?;
                        Ok(())
                    }),
            )
            .unwrap();

        let mut graph = TaskGraph::new(registries);
        graph.provision_resource("value", 0u32).unwrap();

        graph.provision_task_with("bump", 1u32).unwrap();
        graph.run_until_done().unwrap();
        graph.provision_task_with("bump", 2u32).unwrap();
        graph.run_until_done().unwrap();

        assert_eq!(graph.resource(&value).unwrap(), &2);
        assert_eq!(graph.resources().len(), 1);
    }

    #[test]
    fn test_wrongly_typed_output_fails_task() {
        let mut registries = Registries::new();
        registries.register_resource::<u32>("value").unwrap();
        registries
            .add_task(
                TaskDeclaration::builder("bad")
                    .writes(["value"])
                    .run(|ctx| {
                        ctx.provide_named("value", "not a number")?;
                        Ok(())
                    }),
            )
            .unwrap();
        registries
            .add_task(
                TaskDeclaration::builder("undeclared")
                    .run(|ctx| {
                        ctx.provide_named("value", 1u32)?;
                        Ok(())
                    }),
            )
            .unwrap();

        let mut graph = TaskGraph::new(registries);
        graph.provision_tasks(["bad", "undeclared"]).unwrap();

        let summary = graph.run_until_done().unwrap();
        assert_eq!(summary.failed, vec!["bad", "undeclared"]);
        assert!(!graph.resources().contains("value"));
    }

    #[test]
    fn test_collect_inputs_for() {
        let mut graph = graph_with(vec![
            TaskDeclaration::builder("render")
                .reads(["device"])
                .run(|_| Ok(())),
        ]);
        graph
            .registries_mut()
            .register_resource::<u8>("device")
            .unwrap();

        assert!(matches!(
            graph.collect_inputs_for("render"),
            Err(GraphError::MissingResource(name)) if name == "device"
        ));
        assert!(matches!(
            graph.collect_inputs_for("ghost"),
            Err(GraphError::UnknownTask(_))
        ));

        graph.provision_resource("device", 1u8).unwrap();
        let inputs = graph.collect_inputs_for("render").unwrap();
        assert_eq!(inputs.get::<u8>("device").unwrap(), &1);
    }

    #[test]
    fn test_missing_before_task_instance() {
        let mut graph = graph_with(vec![
            noop("a"),
            TaskDeclaration::builder("b").after(["a"]).run(|_| Ok(())),
        ]);
        graph.provision_task("b").unwrap();

        assert!(matches!(
            graph.check_if_blocked_tasks_are_ready(),
            Err(GraphError::UnknownTask(name)) if name == "a"
        ));
    }

    #[test]
    fn test_release_completed_tasks() {
        let mut graph = graph_with(vec![
            noop("a"),
            TaskDeclaration::builder("b").reads(["r"]).run(|_| Ok(())),
        ]);
        graph.registries_mut().resources.reserve("r");
        graph.provision_tasks(["a", "b"]).unwrap();
        graph.run_until_done().unwrap();

        assert_eq!(graph.release_completed_tasks(), 1);
        assert_eq!(graph.tasks().len(), 1);
        assert!(graph.tasks().filter_by_name(["a"]).is_empty());
        assert_eq!(graph.release_completed_tasks(), 0);
    }

    #[test]
    fn test_max_ticks() {
        let mut graph = graph_with(vec![
            noop("a"),
            TaskDeclaration::builder("b").after(["a"]).run(|_| Ok(())),
            TaskDeclaration::builder("c").after(["b"]).run(|_| Ok(())),
        ])
        .with_options(GraphOptions::default().max_ticks(2));
        graph.provision_tasks(["a", "b", "c"]).unwrap();

        let summary = graph.run_until_done().unwrap();
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.completed, vec!["a", "b"]);
        assert_eq!(summary.unresolved, vec!["c"]);
        assert!(!summary.is_done());

        // c was promoted on the last pass and is still waiting for a runner
        let c = graph.tasks().collect_by_name(["c"]).unwrap()[0];
        assert_eq!(c.status(), TaskStatus::ReadyForAssignment);
    }

    #[test]
    fn test_max_ticks_with_stall_policy_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut graph = graph_with(vec![
            noop("a"),
            TaskDeclaration::builder("b")
                .after(["a"])
                .run(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        ])
        .with_options(GraphOptions::default().max_ticks(1).stall(StallPolicy::Fail));
        graph.provision_tasks(["a", "b"]).unwrap();

        assert!(matches!(
            graph.run_until_done(),
            Err(GraphError::Stalled(names)) if names == vec!["b".to_string()]
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_run_if_fails_only_its_task() {
        let mut graph = graph_with(vec![
            TaskDeclaration::builder("a")
                .run_if(|| panic!("predicate failed"))
                .run(|_| Ok(())),
            noop("b"),
            TaskDeclaration::builder("c").after(["a"]).run(|_| Ok(())),
        ]);
        let ids = graph.provision_tasks(["a", "b", "c"]).unwrap();

        let summary = graph.run_until_done().unwrap();
        assert_eq!(graph.status(ids[0]), Some(TaskStatus::RuntimeError));
        assert_eq!(summary.failed, vec!["a"]);
        assert_eq!(summary.completed, vec!["b"]);
        assert_eq!(summary.unresolved, vec!["c"]);
    }

    #[test]
    fn test_unknown_before_task_leaves_tasks_untouched() {
        let mut graph = graph_with(vec![
            noop("a"),
            TaskDeclaration::builder("gated").run_if(|| false).run(|_| Ok(())),
            TaskDeclaration::builder("b").after(["a"]).run(|_| Ok(())),
        ]);
        let gated = graph.provision_task("gated").unwrap();
        let b = graph.provision_task("b").unwrap();

        assert!(matches!(
            graph.check_if_blocked_tasks_are_ready(),
            Err(GraphError::UnknownTask(name)) if name == "a"
        ));
        assert_eq!(graph.status(gated), Some(TaskStatus::Initialized));
        assert_eq!(graph.status(b), Some(TaskStatus::Initialized));
    }

    #[test]
    fn test_input_released_before_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut graph = graph_with(vec![
            TaskDeclaration::builder("a")
                .reads(["r"])
                .run(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        ]);
        graph
            .registries_mut()
            .resources
            .register_with_phase::<u8>("r", Phase::EndOfFrame)
            .unwrap();
        let a = graph.provision_task("a").unwrap();
        graph.provision_resource("r", 1u8).unwrap();

        assert_eq!(graph.check_if_blocked_tasks_are_ready().unwrap(), 1);
        assert_eq!(graph.release_resources(&Phase::EndOfFrame), 1);

        assert_eq!(graph.run_all_ready_tasks(), 0);
        assert_eq!(graph.status(a), Some(TaskStatus::Blocked));
        assert_eq!(graph.tasks().get(a).unwrap().waiting_on().inputs, vec!["r"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Skips `skip`, reports everything else twice.
    struct ScriptedRunner;

    impl TaskRunner for ScriptedRunner {
        fn run(&self, batch: Vec<Dispatch>, notify: &mut dyn FnMut(TaskId, RunResult)) {
            for dispatch in batch {
                if dispatch.name() == "skip" {
                    notify(dispatch.id(), RunResult::Skipped);
                } else {
                    notify(dispatch.id(), RunResult::Success(Outputs::default()));
                    notify(dispatch.id(), RunResult::Failed("late".to_string()));
                }
            }
        }
    }

    #[test]
    fn test_runner_reports() {
        let mut registries = Registries::new();
        registries.add_task(noop("skip")).unwrap();
        registries.add_task(noop("twice")).unwrap();

        let mut graph = TaskGraph::with_runner(registries, ScriptedRunner);
        let ids = graph.provision_tasks(["skip", "twice"]).unwrap();

        let summary = graph.run_until_done().unwrap();
        assert_eq!(graph.status(ids[0]), Some(TaskStatus::Skipped));
        assert_eq!(graph.status(ids[1]), Some(TaskStatus::Complete));
        assert_eq!(summary.skipped, vec!["skip"]);
        assert_eq!(summary.completed, vec!["twice"]);
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn test_parallel_runner_graph() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registries = Registries::new();

        for i in 0..8 {
            let order = order.clone();
            let name = format!("leaf{i}");
            registries
                .add_task(TaskDeclaration::builder(name.clone()).run(move |_| {
                    order.lock().unwrap().push(name.clone());
                    Ok(())
                }))
                .unwrap();
        }

        let order_root = order.clone();
        registries
            .add_task(
                TaskDeclaration::builder("root")
                    .after((0..8).map(|i| format!("leaf{i}")))
                    .run(move |_| {
                        order_root.lock().unwrap().push("root".to_string());
                        Ok(())
                    }),
            )
            .unwrap();

        let mut graph = TaskGraph::with_runner(registries, ParallelRunner::new(4).unwrap());
        graph.provision_task("root").unwrap();
        for i in 0..8 {
            graph.provision_task(&format!("leaf{i}")).unwrap();
        }

        let summary = graph.run_until_done().unwrap();
        assert_eq!(summary.completed.len(), 9);

        let order = order.lock().unwrap();
        assert_eq!(order.len(), 9);
        assert_eq!(order.last().map(String::as_str), Some("root"));
    }

    #[test]
    fn test_clear() {
        let mut graph = graph_with(vec![noop("a")]);
        graph.registries_mut().register_resource::<u8>("r").unwrap();
        graph.provision_task("a").unwrap();
        graph.provision_resource("r", 1u8).unwrap();

        graph.clear();
        assert!(graph.tasks().is_empty());
        assert!(graph.resources().is_empty());
        assert!(graph.registries().tasks.is_empty());
        assert!(graph.registries().resources.is_empty());
    }
}
