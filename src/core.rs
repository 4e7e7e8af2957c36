use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::Serialize;

/// A type-erased, thread-safe container.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = Arc<str>;

/// Identifier of a provisioned task instance.
///
/// Ids are handed out by the [`TaskRegistry`](crate::TaskRegistry) in strictly
/// increasing order and are never reused, even after the registry is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(pub(crate) u64);

/// Identifier of a provisioned resource instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceId(pub(crate) u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl ResourceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A named point in the surrounding frame loop at which tracked resources
/// can be released.
///
/// Resources declare the phase they should be dropped at, and the frame
/// driver calls [`TaskGraph::release_resources`](crate::TaskGraph::release_resources)
/// when the phase is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Released after every frame, e.g. per-frame command buffers.
    EndOfFrame,
    /// Released when the simulation shuts down, e.g. device handles.
    OnShutdown,
    /// Any other lifecycle point defined by the driver.
    Custom(Cow<'static, str>),
}

impl Phase {
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        Phase::Custom(name.into())
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::EndOfFrame => f.write_str("end-of-frame"),
            Phase::OnShutdown => f.write_str("on-shutdown"),
            Phase::Custom(name) => f.write_str(name),
        }
    }
}

/// Runtime type tag attached to a typed resource declaration.
#[derive(Debug, Clone, Copy)]
pub struct ResourceType {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
}

impl ResourceType {
    pub(crate) fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified name of the Rust type behind the resource.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceType {}
