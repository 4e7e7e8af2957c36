//! Indexed stores of provisioned tasks and resources.
//!
//! Both trackers keep their records in a single [`Arena`] and index into it
//! twice, by id and by name. Removing a record frees its slot for reuse, and
//! every slot carries a generation counter which is bumped on removal. A key
//! issued for a removed record therefore never resolves to the record that
//! later takes over its slot.

mod resource;
mod task;

use std::collections::HashMap;
use std::hash::Hash;

pub use crate::tracker::resource::{ProvisionedResource, ResourceTracker};
pub use crate::tracker::task::{ProvisionedTask, TaskStatus, TaskTracker, WaitingOn};

use crate::core::ArcStr;

/// Generation-tagged index into an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with a free list.
#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Key {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });

        Key {
            index,
            generation: 0,
        }
    }

    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;

        Some(value)
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                let key = Key {
                    index: index as u32,
                    generation: slot.generation,
                };
                (key, value)
            })
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// A record that can be stored in an [`Index`].
pub(crate) trait Tracked {
    type Id: Copy + Eq + Hash + Ord;

    fn id(&self) -> Self::Id;
    fn name(&self) -> &ArcStr;
}

/// One backing arena indexed by id and by name.
///
/// Several records may share a name, the name index keeps them in insertion
/// order.
pub(crate) struct Index<T: Tracked> {
    arena: Arena<T>,
    by_id: HashMap<T::Id, Key>,
    by_name: HashMap<ArcStr, Vec<Key>>,
}

impl<T: Tracked> Default for Index<T> {
    fn default() -> Self {
        Self {
            arena: Arena::default(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<T: Tracked> Index<T> {
    /// Inserts `value`, handing it back if its id is already indexed.
    pub(crate) fn insert(&mut self, value: T) -> Result<T::Id, T> {
        let id = value.id();
        if self.by_id.contains_key(&id) {
            return Err(value);
        }

        let name = value.name().clone();
        let key = self.arena.insert(value);
        self.by_id.insert(id, key);
        self.by_name.entry(name).or_default().push(key);

        Ok(id)
    }

    pub(crate) fn get(&self, id: T::Id) -> Option<&T> {
        self.by_id.get(&id).and_then(|key| self.arena.get(*key))
    }

    pub(crate) fn get_mut(&mut self, id: T::Id) -> Option<&mut T> {
        let key = *self.by_id.get(&id)?;
        self.arena.get_mut(key)
    }

    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All records under `name`, oldest first.
    pub(crate) fn named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a T> + use<'a, T> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|key| self.arena.get(*key))
    }

    pub(crate) fn remove(&mut self, id: T::Id) -> Option<T> {
        let key = self.by_id.remove(&id)?;
        let value = self.arena.remove(key)?;

        if let Some(keys) = self.by_name.get_mut(value.name()) {
            keys.retain(|other| *other != key);
            if keys.is_empty() {
                self.by_name.remove(value.name());
            }
        }

        Some(value)
    }

    /// All records ordered by id.
    pub(crate) fn values(&self) -> Vec<&T> {
        let mut values: Vec<&T> = self.arena.iter().map(|(_, value)| value).collect();
        values.sort_by_key(|value| value.id());
        values
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn clear(&mut self) {
        let ids: Vec<T::Id> = self.by_id.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }
}
