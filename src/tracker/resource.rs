use std::fmt::{Debug, Formatter};

use crate::core::{ArcStr, Dynamic, Phase, ResourceId, ResourceType};
use crate::error::GraphError;
use crate::registry::Res;
use crate::tracker::{Index, Tracked};

/// A concrete resource instance bound to a declared name.
#[derive(Clone)]
pub struct ProvisionedResource {
    pub(crate) id: ResourceId,
    pub(crate) name: ArcStr,
    pub(crate) ty: Option<ResourceType>,
    pub(crate) instance: Dynamic,
    pub(crate) release_on: Option<Phase>,
}

impl ProvisionedResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.ty.map(|ty| ty.name()).unwrap_or("<reserved>")
    }

    pub fn instance(&self) -> &Dynamic {
        &self.instance
    }

    pub fn release_on(&self) -> Option<&Phase> {
        self.release_on.as_ref()
    }

    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.instance.downcast_ref::<T>()
    }

    /// Overrides the release phase inherited from the declaration.
    pub fn with_release_on(mut self, phase: Phase) -> Self {
        self.release_on = Some(phase);
        self
    }
}

impl Debug for ProvisionedResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedResource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.type_name())
            .field("release_on", &self.release_on)
            .finish()
    }
}

impl Tracked for ProvisionedResource {
    type Id = ResourceId;

    fn id(&self) -> ResourceId {
        self.id
    }

    fn name(&self) -> &ArcStr {
        &self.name
    }
}

/// Indexed store of provisioned resources.
///
/// The tracker is the only owner of the records. Tasks get clones of the
/// shared instances when they are dispatched, so a released record may still
/// be alive inside a running task body until it returns.
#[derive(Default)]
pub struct ResourceTracker {
    index: Index<ProvisionedResource>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, resource: ProvisionedResource) -> Result<ResourceId, GraphError> {
        self.index
            .insert(resource)
            .map_err(|resource| GraphError::DuplicateResourceTracking(resource.id))
    }

    /// Tracks `resource` and releases every older instance under its name.
    pub(crate) fn replace(
        &mut self,
        resource: ProvisionedResource,
    ) -> Result<ResourceId, GraphError> {
        let stale = self.ids_named(resource.name());
        let id = self.track(resource)?;
        self.release(stale);
        Ok(id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&ProvisionedResource> {
        self.index.get(id)
    }

    /// Returns `true` if at least one instance is tracked under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_name(name)
    }

    /// The most recently tracked instance under `name`.
    pub fn latest(&self, name: &str) -> Option<&ProvisionedResource> {
        self.index.named(name).max_by_key(|resource| resource.id)
    }

    /// The instance tracked under `name`.
    pub fn unwrap(&self, name: &str) -> Result<&Dynamic, GraphError> {
        self.latest(name)
            .map(ProvisionedResource::instance)
            .ok_or_else(|| GraphError::MissingResource(name.to_string()))
    }

    /// Typed variant of [`unwrap`](Self::unwrap).
    pub fn unwrap_as<T>(&self, name: &str) -> Result<&T, GraphError>
    where
        T: Send + Sync + 'static,
    {
        let resource = self
            .latest(name)
            .ok_or_else(|| GraphError::MissingResource(name.to_string()))?;

        resource
            .downcast::<T>()
            .ok_or_else(|| GraphError::ResourceType {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
                found: resource.type_name(),
            })
    }

    pub fn get_typed<T>(&self, res: &Res<T>) -> Result<&T, GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.unwrap_as::<T>(&res.name)
    }

    pub fn filter_by_name<I>(&self, names: I) -> Vec<&ProvisionedResource>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        names
            .into_iter()
            .flat_map(|name| self.index.named(name.as_ref()).collect::<Vec<_>>())
            .collect()
    }

    pub(crate) fn ids_named(&self, name: &str) -> Vec<ResourceId> {
        self.index.named(name).map(|resource| resource.id).collect()
    }

    /// Removes the given resources and returns how many were actually tracked.
    pub fn release<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = ResourceId>,
    {
        ids.into_iter()
            .filter(|id| self.index.remove(*id).is_some())
            .count()
    }

    /// Removes every resource tagged with `phase`.
    pub fn release_phase(&mut self, phase: &Phase) -> usize {
        let ids: Vec<ResourceId> = self
            .index
            .values()
            .into_iter()
            .filter(|resource| resource.release_on.as_ref() == Some(phase))
            .map(|resource| resource.id)
            .collect();

        self.release(ids)
    }

    /// All tracked resources ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &ProvisionedResource> {
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

impl Debug for ResourceTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
