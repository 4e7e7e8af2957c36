#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
mod engine;
mod error;
mod graph;
mod registry;
mod tracker;
mod utils;

pub use crate::core::{Dynamic, Phase, ResourceId, ResourceType, TaskId};
pub use crate::engine::{BoundAction, Inputs, Outputs, ResolvedInputs, TaskAction, TaskContext};
pub use crate::error::{GraphError, TaskError, TaskResult};
pub use crate::graph::{
    Dispatch, Edge, GraphOptions, ParallelRunner, ResourceSnapshot, RunResult, RunSummary,
    SequentialRunner, Snapshot, StallPolicy, TaskGraph, TaskRunner, TaskSnapshot,
};
pub use crate::registry::{
    Registries, Res, ResourceDeclaration, ResourceRegistry, RunIf, TaskBinder, TaskDeclaration,
    TaskDef, TaskRegistry,
};
pub use crate::tracker::{
    ProvisionedResource, ProvisionedTask, ResourceTracker, TaskStatus, TaskTracker, WaitingOn,
};

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
