//! Static catalogues of task and resource declarations.
//!
//! Both registries live inside a [`Registries`] context object which is
//! constructed once per simulation and owned by the
//! [`TaskGraph`](crate::TaskGraph). There is no process-wide default
//! registry: two graphs never share declarations unless the caller moves
//! them over explicitly.

mod resource;
mod task;

use std::sync::Arc;

pub use crate::registry::resource::{Res, ResourceDeclaration, ResourceRegistry};
pub use crate::registry::task::{RunIf, TaskBinder, TaskDeclaration, TaskDef, TaskRegistry};

use crate::core::ArcStr;
use crate::engine::TaskAction;
use crate::error::GraphError;

/// The declaration context of one simulation.
#[derive(Debug, Default)]
pub struct Registries {
    pub tasks: TaskRegistry,
    pub resources: ResourceRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a typed resource, see [`ResourceRegistry::register`].
    pub fn register_resource<T>(&mut self, name: impl Into<ArcStr>) -> Result<Res<T>, GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.resources.register::<T>(name)
    }

    /// Declares a task from plain lists of names.
    pub fn register_task<B, I, O>(
        &mut self,
        name: impl Into<ArcStr>,
        action: TaskAction,
        required_before: B,
        inputs: I,
        outputs: O,
    ) -> Result<Arc<TaskDeclaration>, GraphError>
    where
        B: IntoIterator,
        B::Item: Into<ArcStr>,
        I: IntoIterator,
        I::Item: Into<ArcStr>,
        O: IntoIterator,
        O::Item: Into<ArcStr>,
    {
        self.tasks.register(TaskDeclaration::new(
            name,
            action,
            required_before,
            inputs,
            outputs,
        ))
    }

    /// Registers a declaration built with [`TaskDeclaration::builder`].
    pub fn add_task(
        &mut self,
        declaration: impl Into<Arc<TaskDeclaration>>,
    ) -> Result<Arc<TaskDeclaration>, GraphError> {
        self.tasks.register(declaration)
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.resources.clear();
    }
}
