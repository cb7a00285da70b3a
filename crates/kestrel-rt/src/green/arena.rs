// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Slot arena for task records.
//!
//! Deques hold `TaskKey`s instead of pointers. A key carries the slot's
//! generation, so a key that outlives its task (reclaimed while a steal
//! was in flight) resolves to `None` instead of a different task.

use std::fmt;

/// Stable, generation-checked index of a task in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    index: u32,
    generation: u32,
}

#[cfg(test)]
impl TaskKey {
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskKey({}:{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Insert a value built from its own key.
    pub fn insert_with(&mut self, f: impl FnOnce(TaskKey) -> T) -> (TaskKey, &T) {
        match self.free_head {
            Some(index) => {
                let (next_free, generation) = match self.slots[index as usize] {
                    Slot::Vacant {
                        next_free,
                        generation,
                    } => (next_free, generation),
                    Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
                };
                let key = TaskKey { index, generation };
                self.free_head = next_free;
                self.slots[index as usize] = Slot::Occupied {
                    value: f(key),
                    generation,
                };
                self.len += 1;
                (key, self.occupied(index))
            }
            None => {
                let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
                    crate::error::fatal(format_args!("task arena exhausted"))
                });
                let key = TaskKey {
                    index,
                    generation: 0,
                };
                self.slots.push(Slot::Occupied {
                    value: f(key),
                    generation: 0,
                });
                self.len += 1;
                (key, self.occupied(index))
            }
        }
    }

    fn occupied(&self, index: u32) -> &T {
        match &self.slots[index as usize] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => unreachable!("slot was just filled"),
        }
    }

    pub fn get(&self, key: TaskKey) -> Option<&T> {
        match self.slots.get(key.index as usize)? {
            Slot::Occupied { value, generation } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Remove the value; the slot's generation advances so stale keys miss.
    pub fn remove(&mut self, key: TaskKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {
                let next = Slot::Vacant {
                    next_free: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let Slot::Occupied { value, .. } = std::mem::replace(slot, next) else {
                    unreachable!()
                };
                self.free_head = Some(key.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Take every live value, leaving the arena empty.
    pub fn drain(&mut self) -> Vec<T> {
        let slots = std::mem::take(&mut self.slots);
        self.free_head = None;
        self.len = 0;
        slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Occupied { value, .. } => Some(value),
                Slot::Vacant { .. } => None,
            })
            .collect()
    }
}
