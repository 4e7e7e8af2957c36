use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::{ArcStr, Dynamic, TaskId};
use crate::engine::Inputs;
use crate::error::{GraphError, TaskResult};
use crate::registry::Res;

/// The work a task performs.
///
/// A task body is either a plain closure that reads its inputs by name, or a
/// closure bound to a typed [`Inputs`] collection whose resolved values are
/// passed in as the second argument.
#[derive(Clone)]
pub enum TaskAction {
    Plain(Arc<dyn Fn(&mut TaskContext<'_>) -> TaskResult + Send + Sync>),
    Bound(Arc<dyn BoundAction>),
}

impl TaskAction {
    pub fn plain<F>(callback: F) -> Self
    where
        F: Fn(&mut TaskContext<'_>) -> TaskResult + Send + Sync + 'static,
    {
        TaskAction::Plain(Arc::new(callback))
    }

    pub(crate) fn call(&self, ctx: &mut TaskContext<'_>) -> TaskResult {
        match self {
            TaskAction::Plain(callback) => callback(ctx),
            TaskAction::Bound(action) => action.call(ctx),
        }
    }
}

impl Debug for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAction::Plain(_) => write!(f, "TaskAction::Plain(*)"),
            TaskAction::Bound(_) => write!(f, "TaskAction::Bound(*)"),
        }
    }
}

/// A task body with its typed input binding erased.
pub trait BoundAction: Send + Sync {
    fn call(&self, ctx: &mut TaskContext<'_>) -> TaskResult;
}

pub(crate) struct Bound<I, F> {
    pub(crate) inputs: I,
    pub(crate) callback: F,
}

// This is where the typed binding gets erased.
impl<I, F> BoundAction for Bound<I, F>
where
    I: Inputs,
    F: for<'a> Fn(&mut TaskContext<'a>, I::Output<'a>) -> TaskResult + Send + Sync,
{
    fn call(&self, ctx: &mut TaskContext<'_>) -> TaskResult {
        let inputs = ctx.inputs;
        let resolved = self.inputs.resolve(inputs)?;
        (self.callback)(ctx, resolved)
    }
}

/// Input instances gathered for a single task, keyed by resource name.
///
/// The instances are shared with the resource tracker, a task only ever
/// borrows them.
#[derive(Clone, Default)]
pub struct ResolvedInputs {
    map: HashMap<ArcStr, Dynamic>,
}

impl ResolvedInputs {
    pub fn insert(&mut self, name: ArcStr, instance: Dynamic) {
        self.map.insert(name, instance);
    }

    /// Retrieves the instance provisioned under `name` as a `T`.
    pub fn get<T>(&self, name: &str) -> Result<&T, GraphError>
    where
        T: Send + Sync + 'static,
    {
        let instance = self
            .map
            .get(name)
            .ok_or_else(|| GraphError::MissingResource(name.to_string()))?;

        instance
            .downcast_ref::<T>()
            .ok_or_else(|| GraphError::ResourceType {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
                found: "<dynamic>",
            })
    }

    pub fn get_dynamic(&self, name: &str) -> Option<&Dynamic> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FromIterator<(ArcStr, Dynamic)> for ResolvedInputs {
    fn from_iter<I: IntoIterator<Item = (ArcStr, Dynamic)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

impl Debug for ResolvedInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}

pub(crate) struct Produced {
    pub(crate) name: ArcStr,
    pub(crate) instance: Dynamic,
}

/// Resources provided by a task body, provisioned by the graph once the task
/// is reported successful.
#[derive(Default)]
pub struct Outputs {
    pub(crate) items: Vec<Produced>,
}

impl Outputs {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.name.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|item| &*item.name == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Debug for Outputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// The context passed to every task body.
///
/// Gives access to the resolved inputs and the parameters bound at
/// provisioning time, and collects the resources the task provides.
pub struct TaskContext<'a> {
    pub(crate) id: TaskId,
    pub(crate) name: &'a str,
    pub(crate) inputs: &'a ResolvedInputs,
    pub(crate) params: Option<&'a Dynamic>,
    pub(crate) declared_outputs: &'a [ArcStr],
    pub(crate) outputs: Outputs,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl<'a> TaskContext<'a> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn inputs(&self) -> &'a ResolvedInputs {
        self.inputs
    }

    /// Reads a declared input by name.
    pub fn input<T>(&self, name: &str) -> Result<&'a T, GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.inputs.get::<T>(name)
    }

    /// Reads a declared input through its typed handle.
    pub fn get<T>(&self, res: &Res<T>) -> Result<&'a T, GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.inputs.get::<T>(&res.name)
    }

    /// Parameters bound with
    /// [`TaskGraph::provision_task_with`](crate::TaskGraph::provision_task_with),
    /// `None` if there are none or they are not a `P`.
    pub fn params<P>(&self) -> Option<&'a P>
    where
        P: Send + Sync + 'static,
    {
        self.params.and_then(|params| params.downcast_ref::<P>())
    }

    /// Provides one of the declared outputs. Providing the same output twice
    /// keeps the latter instance.
    pub fn provide<T>(&mut self, res: &Res<T>, instance: T) -> Result<(), GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.push(&res.name, Arc::new(instance))
    }

    /// Provides a declared output by name, used for reserved resources that
    /// have no typed handle.
    pub fn provide_named<T>(&mut self, name: &str, instance: T) -> Result<(), GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.push(name, Arc::new(instance))
    }

    fn push(&mut self, name: &str, instance: Dynamic) -> Result<(), GraphError> {
        let Some(declared) = self
            .declared_outputs
            .iter()
            .find(|output| &***output == name)
        else {
            return Err(GraphError::UndeclaredOutput {
                task: self.name.to_string(),
                resource: name.to_string(),
            });
        };

        self.outputs.items.retain(|item| item.name != *declared);
        self.outputs.items.push(Produced {
            name: declared.clone(),
            instance,
        });

        Ok(())
    }
}
