use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::{ArcStr, Dynamic, TaskId};
use crate::engine::{Bound, Inputs, TaskAction, TaskContext};
use crate::error::{GraphError, TaskResult};
use crate::registry::ResourceRegistry;
use crate::tracker::{ProvisionedTask, TaskStatus, WaitingOn};

/// Predicate deciding whether a task should run at all.
pub type RunIf = Arc<dyn Fn() -> bool + Send + Sync>;

/// Static description of a unit of work.
///
/// A declaration names the task, the work it performs, the tasks that must
/// complete before it, and the resources it reads and writes. Resources are
/// referenced by name only and resolved against the resource tracker when
/// the task is evaluated, so a consumer never holds on to a producer.
pub struct TaskDeclaration {
    name: ArcStr,
    action: TaskAction,
    required_before: Vec<ArcStr>,
    inputs: Vec<ArcStr>,
    outputs: Vec<ArcStr>,
    run_if: Option<RunIf>,
}

impl TaskDeclaration {
    /// The entry point for declaring a task.
    pub fn builder(name: impl Into<ArcStr>) -> TaskDef {
        TaskDef {
            name: name.into(),
            required_before: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            run_if: None,
        }
    }

    /// Declares a task from plain lists, mirroring the shape of the
    /// registration layer.
    pub fn new<B, I, O>(
        name: impl Into<ArcStr>,
        action: TaskAction,
        required_before: B,
        inputs: I,
        outputs: O,
    ) -> Self
    where
        B: IntoIterator,
        B::Item: Into<ArcStr>,
        I: IntoIterator,
        I::Item: Into<ArcStr>,
        O: IntoIterator,
        O::Item: Into<ArcStr>,
    {
        let mut def = Self::builder(name)
            .after(required_before)
            .reads(inputs)
            .writes(outputs);
        def.finish(action)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &TaskAction {
        &self.action
    }

    pub fn required_before(&self) -> &[ArcStr] {
        &self.required_before
    }

    pub fn inputs(&self) -> &[ArcStr] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ArcStr] {
        &self.outputs
    }

    pub fn run_if(&self) -> Option<&RunIf> {
        self.run_if.as_ref()
    }

    /// Evaluates the `run_if` predicate, a task without one always runs.
    pub(crate) fn should_run(&self) -> bool {
        self.run_if.as_ref().is_none_or(|predicate| predicate())
    }
}

impl Debug for TaskDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDeclaration")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("required_before", &self.required_before)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("run_if", &self.run_if.as_ref().map(|_| "*"))
            .finish()
    }
}

fn extend_unique<I>(target: &mut Vec<ArcStr>, names: I)
where
    I: IntoIterator,
    I::Item: Into<ArcStr>,
{
    for name in names {
        let name = name.into();
        if !target.contains(&name) {
            target.push(name);
        }
    }
}

/// Builder for a [`TaskDeclaration`] without typed inputs.
pub struct TaskDef {
    name: ArcStr,
    required_before: Vec<ArcStr>,
    inputs: Vec<ArcStr>,
    outputs: Vec<ArcStr>,
    run_if: Option<RunIf>,
}

impl TaskDef {
    /// Tasks that must be `COMPLETE` before this one can run.
    pub fn after<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ArcStr>,
    {
        extend_unique(&mut self.required_before, names);
        self
    }

    /// Resources that must be provisioned before this task can run. They can
    /// be read by name through [`TaskContext::input`].
    pub fn reads<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ArcStr>,
    {
        extend_unique(&mut self.inputs, names);
        self
    }

    /// Resources this task is expected to provide.
    pub fn writes<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ArcStr>,
    {
        extend_unique(&mut self.outputs, names);
        self
    }

    /// Gates the task on a predicate. When it returns `false` the task is
    /// marked complete without running.
    pub fn run_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.run_if = Some(Arc::new(predicate));
        self
    }

    /// Binds typed inputs. Their names are added to the declared inputs and
    /// the resolved values are passed to the task body.
    pub fn inputs<I>(mut self, inputs: I) -> TaskBinder<I>
    where
        I: Inputs + 'static,
    {
        extend_unique(&mut self.inputs, inputs.names());
        TaskBinder { def: self, inputs }
    }

    pub fn run<F>(mut self, callback: F) -> TaskDeclaration
    where
        F: Fn(&mut TaskContext<'_>) -> TaskResult + Send + Sync + 'static,
    {
        self.finish(TaskAction::Plain(Arc::new(callback)))
    }

    fn finish(&mut self, action: TaskAction) -> TaskDeclaration {
        TaskDeclaration {
            name: self.name.clone(),
            action,
            required_before: std::mem::take(&mut self.required_before),
            inputs: std::mem::take(&mut self.inputs),
            outputs: std::mem::take(&mut self.outputs),
            run_if: self.run_if.take(),
        }
    }
}

/// Builder for a [`TaskDeclaration`] with typed inputs bound.
pub struct TaskBinder<I> {
    def: TaskDef,
    inputs: I,
}

impl<I> TaskBinder<I>
where
    I: Inputs + 'static,
{
    pub fn after<N>(mut self, names: N) -> Self
    where
        N: IntoIterator,
        N::Item: Into<ArcStr>,
    {
        self.def = self.def.after(names);
        self
    }

    pub fn writes<N>(mut self, names: N) -> Self
    where
        N: IntoIterator,
        N::Item: Into<ArcStr>,
    {
        self.def = self.def.writes(names);
        self
    }

    pub fn run<F>(self, callback: F) -> TaskDeclaration
    where
        F: for<'a> Fn(&mut TaskContext<'a>, I::Output<'a>) -> TaskResult + Send + Sync + 'static,
    {
        let Self { mut def, inputs } = self;
        def.finish(TaskAction::Bound(Arc::new(Bound { inputs, callback })))
    }
}

struct Entry {
    declaration: Arc<TaskDeclaration>,
    /// Ordering edges wired after registration.
    requirements: Vec<ArcStr>,
}

/// Catalogue of task declarations.
#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<ArcStr, Entry>,
    next_id: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration under its own name.
    ///
    /// Registering the very same declaration object twice is a no-op, any
    /// other declaration under a taken name is rejected.
    pub fn register(
        &mut self,
        declaration: impl Into<Arc<TaskDeclaration>>,
    ) -> Result<Arc<TaskDeclaration>, GraphError> {
        let declaration = declaration.into();

        if let Some(entry) = self.entries.get(&declaration.name) {
            return if Arc::ptr_eq(&entry.declaration, &declaration) {
                Ok(declaration)
            } else {
                Err(GraphError::DuplicateTask(declaration.name.to_string()))
            };
        }

        tracing::debug!(task = %declaration.name, "registered task");
        self.entries.insert(
            declaration.name.clone(),
            Entry {
                declaration: declaration.clone(),
                requirements: Vec::new(),
            },
        );

        Ok(declaration)
    }

    /// Makes every task in `later` wait for every task in `before`.
    ///
    /// All names are validated before any edge is added, so a failed call
    /// leaves the registry untouched.
    pub fn add_requirement<B, L>(&mut self, before: B, later: L) -> Result<(), GraphError>
    where
        B: IntoIterator,
        B::Item: AsRef<str>,
        L: IntoIterator,
        L::Item: AsRef<str>,
    {
        let before = self.resolve_names(before)?;
        let later = self.resolve_names(later)?;

        for name in &later {
            if let Some(entry) = self.entries.get_mut(name) {
                extend_unique(&mut entry.requirements, before.iter().cloned());
            }
        }

        Ok(())
    }

    fn resolve_names<I>(&self, names: I) -> Result<Vec<ArcStr>, GraphError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                self.entries
                    .get_key_value(name)
                    .map(|(key, _)| key.clone())
                    .ok_or_else(|| GraphError::UnknownTask(name.to_string()))
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskDeclaration>> {
        self.entries.get(name).map(|entry| &entry.declaration)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All tasks `name` waits for, both declared and wired afterwards.
    pub fn required_before(&self, name: &str) -> Result<Vec<ArcStr>, GraphError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;

        let mut names = entry.declaration.required_before.clone();
        extend_unique(&mut names, entry.requirements.iter().cloned());
        Ok(names)
    }

    /// Creates a fresh, untracked instance of the named task.
    ///
    /// Every referenced task and resource must be registered at this point.
    pub fn provision(
        &mut self,
        name: &str,
        resources: &ResourceRegistry,
    ) -> Result<ProvisionedTask, GraphError> {
        self.provision_with(name, resources, None)
    }

    pub(crate) fn provision_with(
        &mut self,
        name: &str,
        resources: &ResourceRegistry,
        params: Option<Dynamic>,
    ) -> Result<ProvisionedTask, GraphError> {
        let required_before = self.required_before(name)?;
        let declaration = match self.entries.get(name) {
            Some(entry) => entry.declaration.clone(),
            None => return Err(GraphError::UnknownTask(name.to_string())),
        };

        if let Some(missing) = required_before.iter().find(|dep| !self.contains(dep)) {
            return Err(GraphError::UnknownTask(missing.to_string()));
        }

        if let Some(missing) = declaration
            .inputs
            .iter()
            .chain(&declaration.outputs)
            .find(|res| !resources.contains(res))
        {
            return Err(GraphError::UnknownResource(missing.to_string()));
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;

        Ok(ProvisionedTask {
            id,
            name: declaration.name.clone(),
            declaration,
            required_before,
            status: TaskStatus::Initialized,
            waiting_on: WaitingOn::default(),
            params,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every declaration and requirement. Ids keep increasing across
    /// clears, so instances from a previous run can never be confused with
    /// new ones.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
