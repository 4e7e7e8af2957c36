//! Task bodies and their typed input binding.
//!
//! Resource instances are stored type-erased as [`Dynamic`](crate::Dynamic). Typed access
//! goes through [`Res<T>`] handles:
//!
//! * **Registration time**: a handle is only handed out by
//!   [`ResourceRegistry::register`](crate::ResourceRegistry::register), which
//!   records `T` on the declaration. Binding a tuple of handles with
//!   [`TaskDef::inputs`](crate::TaskDef::inputs) fixes the signature of the
//!   task body once.
//! * **Run time**: the [`Inputs`] trait turns the tuple of handles into a
//!   tuple of references by downcasting the resolved instances. Provisioning
//!   rejects instances of the wrong type, so the downcast can't fail for a
//!   graph built through the registries.

mod action;

pub use crate::engine::action::{BoundAction, Outputs, ResolvedInputs, TaskAction, TaskContext};
pub(crate) use crate::engine::action::Bound;

use crate::core::ArcStr;
use crate::error::GraphError;
use crate::registry::Res;

/// A collection of [`Res<T>`] handles that can be bound as typed task inputs.
///
/// Implemented for a single handle, for `Vec`s of handles of the same type
/// and for tuples of up to twelve handles.
pub trait Inputs: Send + Sync {
    /// The resolved form, for a tuple of `Res<T>` this is a tuple of `&'a T`.
    type Output<'a>;

    /// Names of the resources this binding reads.
    fn names(&self) -> Vec<ArcStr>;

    /// Looks up and downcasts every bound resource.
    fn resolve<'a>(&self, inputs: &'a ResolvedInputs) -> Result<Self::Output<'a>, GraphError>;
}

impl Inputs for () {
    type Output<'a> = ();

    fn names(&self) -> Vec<ArcStr> {
        vec![]
    }

    fn resolve<'a>(&self, _: &'a ResolvedInputs) -> Result<Self::Output<'a>, GraphError> {
        Ok(())
    }
}

impl<T> Inputs for Res<T>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = &'a T;

    fn names(&self) -> Vec<ArcStr> {
        vec![self.name.clone()]
    }

    fn resolve<'a>(&self, inputs: &'a ResolvedInputs) -> Result<Self::Output<'a>, GraphError> {
        inputs.get::<T>(&self.name)
    }
}

impl<T> Inputs for Vec<Res<T>>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = Vec<&'a T>;

    fn names(&self) -> Vec<ArcStr> {
        self.iter().map(|res| res.name.clone()).collect()
    }

    fn resolve<'a>(&self, inputs: &'a ResolvedInputs) -> Result<Self::Output<'a>, GraphError> {
        self.iter().map(|res| inputs.get::<T>(&res.name)).collect()
    }
}

macro_rules! impl_inputs {
    ($($T:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($T),*> Inputs for ($(Res<$T>,)*)
        where
            $($T: Send + Sync + 'static),* {
            type Output<'a> = ($(&'a $T,)*);

            fn names(&self) -> Vec<ArcStr> {
                let ($($T,)*) = self;
                vec![$($T.name.clone(),)*]
            }

            fn resolve<'a>(
                &self,
                inputs: &'a ResolvedInputs,
            ) -> Result<Self::Output<'a>, GraphError> {
                let ($($T,)*) = self;
                Ok(($(inputs.get::<$T>(&$T.name)?,)*))
            }
        }
    };
}

impl_inputs!(A);
impl_inputs!(A, B);
impl_inputs!(A, B, C);
impl_inputs!(A, B, C, D);
impl_inputs!(A, B, C, D, E);
impl_inputs!(A, B, C, D, E, F);
impl_inputs!(A, B, C, D, E, F, G);
impl_inputs!(A, B, C, D, E, F, G, H);
impl_inputs!(A, B, C, D, E, F, G, H, I);
impl_inputs!(A, B, C, D, E, F, G, H, I, J);
impl_inputs!(A, B, C, D, E, F, G, H, I, J, K);
impl_inputs!(A, B, C, D, E, F, G, H, I, J, K, L);
