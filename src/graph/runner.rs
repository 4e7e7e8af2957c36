use std::any::Any;
use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{ArcStr, Dynamic, TaskId};
use crate::engine::{Outputs, ResolvedInputs, TaskContext};
use crate::registry::TaskDeclaration;

/// Outcome of a single dispatched task.
#[derive(Debug)]
pub enum RunResult {
    /// The body returned normally, carrying whatever it provided.
    Success(Outputs),
    /// The body returned an error or panicked.
    Failed(String),
    /// Never produced by the bundled runners.
    Skipped,
}

/// Everything a runner needs to execute one task, detached from the graph.
///
/// Input instances are shared with the resource tracker, so building a
/// dispatch never copies resource data.
pub struct Dispatch {
    pub(crate) id: TaskId,
    pub(crate) name: ArcStr,
    pub(crate) declaration: Arc<TaskDeclaration>,
    pub(crate) inputs: ResolvedInputs,
    pub(crate) params: Option<Dynamic>,
}

impl Dispatch {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &ResolvedInputs {
        &self.inputs
    }

    /// Runs the task body on the current thread.
    ///
    /// Errors and panics are both turned into [`RunResult::Failed`], nothing
    /// escapes this call.
    pub fn execute(&self) -> RunResult {
        let span = tracing::span!(Level::INFO, "task", name = %self.name, id = %self.id);
        if let Ok(style) = crate::utils::get_style_task() {
            span.pb_set_style(&style);
        }
        span.pb_set_message(&format!("Running {}", self.name));
        let _enter = span.enter();

        let mut ctx = TaskContext {
            id: self.id,
            name: &self.name,
            inputs: &self.inputs,
            params: self.params.as_ref(),
            declared_outputs: self.declaration.outputs(),
            outputs: Outputs::default(),
            span: span.clone(),
        };

        // A panicking body only ever sees its own context and shared,
        // immutable inputs, so nothing is left half-updated.
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.declaration.action().call(&mut ctx)
        }));

        match result {
            Ok(Ok(())) => RunResult::Success(ctx.outputs),
            Ok(Err(err)) => RunResult::Failed(format!("{err:#}")),
            Err(panic) => RunResult::Failed(panic_message(panic)),
        }
    }
}

impl Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .finish()
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    }
}

/// Executes a batch of ready tasks.
///
/// `notify` must be called exactly once per dispatched task, on the thread
/// that called `run`. The graph applies each outcome as soon as it is
/// notified and is not synchronized otherwise.
pub trait TaskRunner {
    fn run(&self, batch: Vec<Dispatch>, notify: &mut dyn FnMut(TaskId, RunResult));
}

/// Runs tasks one after another on the calling thread, in batch order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialRunner;

impl TaskRunner for SequentialRunner {
    fn run(&self, batch: Vec<Dispatch>, notify: &mut dyn FnMut(TaskId, RunResult)) {
        for dispatch in batch {
            let result = dispatch.execute();
            notify(dispatch.id, result);
        }
    }
}

/// Runs a whole batch on a rayon pool, then reports the outcomes serially in
/// batch order.
#[derive(Debug, Default)]
pub struct ParallelRunner {
    /// `None` runs on the global rayon pool.
    pool: Option<rayon::ThreadPool>,
}

impl ParallelRunner {
    /// Creates a runner with a dedicated pool of `threads` workers.
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("kumiki-worker-{i}"))
            .build()?;

        Ok(Self { pool: Some(pool) })
    }

    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

impl TaskRunner for ParallelRunner {
    fn run(&self, batch: Vec<Dispatch>, notify: &mut dyn FnMut(TaskId, RunResult)) {
        // Worker threads don't inherit the current span.
        let parent = tracing::Span::current();

        let execute = || -> Vec<(TaskId, RunResult)> {
            batch
                .into_par_iter()
                .map(|dispatch| (dispatch.id, parent.in_scope(|| dispatch.execute())))
                .collect()
        };

        let results = match &self.pool {
            Some(pool) => pool.install(execute),
            None => execute(),
        };

        for (id, result) in results {
            notify(id, result);
        }
    }
}
