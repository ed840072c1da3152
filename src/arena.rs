//! Generation-checked slot storage for attached inputs.

use std::fmt;

/// Handle referencing an input attached to a [`MixStage`](crate::stage::MixStage).
///
/// A handle stays valid until its input is removed. Slots are reused afterwards with a new
/// generation, so an old handle never reaches a newer input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MixerHandle {
    index: u32,
    generation: u32,
}

impl MixerHandle {
    /// Slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at the time the handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for MixerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot arena keyed by [`MixerHandle`].
#[derive(Debug)]
pub struct Arena<T> {
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
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value`, built from the handle it will live under.
    pub fn insert_with(&mut self, build: impl FnOnce(MixerHandle) -> T) -> MixerHandle {
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                MixerHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                MixerHandle {
                    index,
                    generation: 0,
                }
            }
        };
        self.slots[handle.index as usize].value = Some(build(handle));
        self.len += 1;
        handle
    }

    /// Value behind `handle`, if it is still live.
    pub fn get(&self, handle: MixerHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Remove and return the value behind `handle`.
    pub fn remove(&mut self, handle: MixerHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }
}
