use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::{ArcStr, Dynamic, Phase, ResourceId, ResourceType};
use crate::error::GraphError;
use crate::tracker::ProvisionedResource;

/// Static description of a named resource.
///
/// A declaration is either *typed*, created through
/// [`ResourceRegistry::register`], or a bare *reservation* created through
/// [`ResourceRegistry::reserve`]. Reservations accept instances of any type.
#[derive(Debug, Clone)]
pub struct ResourceDeclaration {
    name: ArcStr,
    ty: Option<ResourceType>,
    release_on: Option<Phase>,
}

impl ResourceDeclaration {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the name is only reserved and carries no type yet.
    pub fn is_reserved(&self) -> bool {
        self.ty.is_none()
    }

    pub fn resource_type(&self) -> Option<ResourceType> {
        self.ty
    }

    pub fn type_name(&self) -> &'static str {
        self.ty.map(|ty| ty.name()).unwrap_or("<reserved>")
    }

    /// The phase at which instances of this resource are released by default.
    pub fn release_on(&self) -> Option<&Phase> {
        self.release_on.as_ref()
    }
}

/// A typed reference to a declared resource.
///
/// `Res<T>` carries no data other than the resource name, the type `T` lives
/// in `PhantomData`. Handles are only obtainable from
/// [`ResourceRegistry::register`], which records `T` on the declaration, so
/// every instance provisioned under this name is guaranteed to downcast to
/// `T`.
pub struct Res<T> {
    pub(crate) name: ArcStr,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Res<T> {
    pub(crate) fn new(name: ArcStr) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for Res<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T> PartialEq for Res<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for Res<T> {}

impl<T> Debug for Res<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Res<{}>({})", std::any::type_name::<T>(), self.name)
    }
}

/// Catalogue of resource declarations.
///
/// The registry never tracks instances itself. [`provision`](Self::provision)
/// wraps a concrete instance into a [`ProvisionedResource`] and hands it back,
/// so the same declaration can be provisioned once per frame and tracked by
/// the [`ResourceTracker`](crate::ResourceTracker).
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    declarations: HashMap<ArcStr, ResourceDeclaration>,
    next_id: u64,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a typed resource and returns a handle to it.
    ///
    /// Declaring the same name again with the same type is a no-op, this is
    /// the normal case for a resource declared by both its producer and its
    /// consumer. A reservation under the same name is upgraded to the type.
    pub fn register<T>(&mut self, name: impl Into<ArcStr>) -> Result<Res<T>, GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.declare::<T>(name.into(), None)
    }

    /// Like [`register`](Self::register), additionally tagging the declaration
    /// with the lifecycle phase its instances are released at.
    pub fn register_with_phase<T>(
        &mut self,
        name: impl Into<ArcStr>,
        phase: Phase,
    ) -> Result<Res<T>, GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.declare::<T>(name.into(), Some(phase))
    }

    fn declare<T>(&mut self, name: ArcStr, phase: Option<Phase>) -> Result<Res<T>, GraphError>
    where
        T: Send + Sync + 'static,
    {
        let requested = ResourceType::of::<T>();

        match self.declarations.get_mut(&name) {
            Some(existing) => match existing.ty {
                Some(ty) if ty != requested => {
                    return Err(GraphError::ConflictingResource {
                        name: name.to_string(),
                        existing: ty.name(),
                        requested: requested.name(),
                    });
                }
                _ => {
                    existing.ty = Some(requested);
                    if phase.is_some() {
                        existing.release_on = phase;
                    }
                }
            },
            None => {
                tracing::debug!(resource = %name, ty = requested.name(), "declared resource");
                self.declarations.insert(
                    name.clone(),
                    ResourceDeclaration {
                        name: name.clone(),
                        ty: Some(requested),
                        release_on: phase,
                    },
                );
            }
        }

        Ok(Res::new(name))
    }

    /// Reserves a name without committing to a type. Idempotent.
    pub fn reserve(&mut self, name: impl Into<ArcStr>) -> &ResourceDeclaration {
        let name = name.into();
        self.declarations
            .entry(name.clone())
            .or_insert_with(|| ResourceDeclaration {
                name,
                ty: None,
                release_on: None,
            })
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDeclaration> {
        self.declarations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.declarations.contains_key(name)
    }

    /// Builds a resource record around `instance`.
    ///
    /// The returned record is not tracked anywhere, it's up to the caller to
    /// hand it over to a tracker.
    pub fn provision<T>(
        &mut self,
        name: &str,
        instance: T,
    ) -> Result<ProvisionedResource, GraphError>
    where
        T: Send + Sync + 'static,
    {
        let found = ResourceType::of::<T>();
        let declaration = self.lookup(name)?;

        if let Some(expected) = declaration.ty
            && expected != found
        {
            return Err(GraphError::ResourceType {
                name: name.to_string(),
                expected: expected.name(),
                found: found.name(),
            });
        }

        self.build(name, Arc::new(instance), Some(found))
    }

    /// Type-erased variant of [`provision`](Self::provision).
    pub fn provision_dynamic(
        &mut self,
        name: &str,
        instance: Dynamic,
    ) -> Result<ProvisionedResource, GraphError> {
        let declaration = self.lookup(name)?;

        if let Some(expected) = declaration.ty
            && Any::type_id(&*instance) != expected.id
        {
            return Err(GraphError::ResourceType {
                name: name.to_string(),
                expected: expected.name(),
                found: "<dynamic>",
            });
        }

        self.build(name, instance, None)
    }

    fn lookup(&self, name: &str) -> Result<&ResourceDeclaration, GraphError> {
        self.declarations
            .get(name)
            .ok_or_else(|| GraphError::UnknownResource(name.to_string()))
    }

    fn build(
        &mut self,
        name: &str,
        instance: Dynamic,
        found: Option<ResourceType>,
    ) -> Result<ProvisionedResource, GraphError> {
        let declaration = self.lookup(name)?;
        let ty = declaration.ty.or(found);
        let release_on = declaration.release_on.clone();
        let name = declaration.name.clone();

        let id = ResourceId(self.next_id);
        self.next_id += 1;

        Ok(ProvisionedResource {
            id,
            name,
            ty,
            instance,
            release_on,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.declarations.keys().map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Drops every declaration. Ids keep increasing across clears.
    pub fn clear(&mut self) {
        self.declarations.clear();
    }
}
