//! Retain counts for module heap objects held by the host.
//!
//! Each tracked pointer occupies a slot in an arena. Slots are recycled
//! through a free list; a generation counter invalidates handles that
//! outlive their slot.

use crate::error::VmError;
use std::collections::HashMap;

/// Handle to a retained pointer. Stale once the pointer is fully released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinHandle {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    ptr: u32,
    count: u32,
    generation: u32,
    occupied: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PointerTable {
    slots: Vec<Slot>,
    by_ptr: HashMap<u32, usize>,
    free: Vec<usize>,
}

impl PointerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track one more reference to `ptr`.
    ///
    /// Returns the handle and whether this was the first reference, in which
    /// case the caller must pin the object in the module.
    pub fn retain(&mut self, ptr: u32) -> (PinHandle, bool) {
        if let Some(&index) = self.by_ptr.get(&ptr) {
            let slot = &mut self.slots[index];
            slot.count += 1;
            return (
                PinHandle {
                    index,
                    generation: slot.generation,
                },
                false,
            );
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.ptr = ptr;
        slot.count = 1;
        slot.occupied = true;
        self.by_ptr.insert(ptr, index);
        (
            PinHandle {
                index,
                generation: slot.generation,
            },
            true,
        )
    }

    /// Drop one reference to `ptr`.
    ///
    /// Returns true when the last reference went away and the caller must
    /// unpin the object. Releasing an untracked pointer is a protocol error.
    pub fn release(&mut self, ptr: u32) -> Result<bool, VmError> {
        let index = *self
            .by_ptr
            .get(&ptr)
            .ok_or_else(|| VmError::Protocol(format!("release of untracked pointer {ptr:#x}")))?;
        Ok(self.release_slot(index))
    }

    /// Drop one reference through a handle, rejecting stale handles.
    pub fn release_handle(&mut self, handle: PinHandle) -> Result<(u32, bool), VmError> {
        let slot = self
            .slots
            .get(handle.index)
            .filter(|slot| slot.occupied && slot.generation == handle.generation)
            .ok_or_else(|| VmError::Protocol("release through a stale pin handle".to_string()))?;
        let ptr = slot.ptr;
        Ok((ptr, self.release_slot(handle.index)))
    }

    fn release_slot(&mut self, index: usize) -> bool {
        let slot = &mut self.slots[index];
        if slot.count > 1 {
            slot.count -= 1;
            return false;
        }
        let ptr = slot.ptr;
        slot.count = 0;
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.by_ptr.remove(&ptr);
        self.free.push(index);
        true
    }

    /// Current retain count of `ptr` (0 if untracked).
    pub fn count(&self, ptr: u32) -> u32 {
        self.by_ptr
            .get(&ptr)
            .map(|&index| self.slots[index].count)
            .unwrap_or(0)
    }

    pub fn contains(&self, ptr: u32) -> bool {
        self.by_ptr.contains_key(&ptr)
    }

    pub fn len(&self) -> usize {
        self.by_ptr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ptr.is_empty()
    }

    /// Forget every tracked pointer, returning them.
    pub fn clear(&mut self) -> Vec<u32> {
        let live: Vec<u32> = self.by_ptr.keys().copied().collect();
        for slot in &mut self.slots {
            if slot.occupied {
                slot.occupied = false;
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.by_ptr.clear();
        self.free = (0..self.slots.len()).collect();
        live
    }
}
