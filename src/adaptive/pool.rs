use std::mem;

use parking_lot::Mutex;

use super::call_site::CallSite;
use super::context::{CompletedLaunch, RegionContext};
use crate::backend::device::LaunchHandle;
use crate::error::{KernelError, KernelResult};

/// Index of a slot in an [`AsyncCompletionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
enum SlotState {
    Free,
    /// Handed out by `acquire`, launch not armed yet.
    Reserved,
    InFlight {
        context: RegionContext,
        handle: LaunchHandle,
    },
}

#[derive(Debug)]
struct PoolInner {
    slots: Vec<SlotState>,
    /// Free slot indices; popped from the back so the lowest index goes first.
    free: Vec<usize>,
}

/// Fixed-capacity set of slots tracking asynchronous launches for one region.
///
/// A slot moves `Free -> Reserved -> InFlight -> Free`. It only returns to the
/// free list once its launch has completed (or was never armed), so a slot is
/// never reused while its device work is outstanding.
#[derive(Debug)]
pub struct AsyncCompletionPool {
    call_site: CallSite,
    inner: Mutex<PoolInner>,
}

impl AsyncCompletionPool {
    pub fn with_capacity(call_site: CallSite, capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| SlotState::Free).collect();
        let free = (0..capacity).rev().collect();
        Self {
            call_site,
            inner: Mutex::new(PoolInner { slots, free }),
        }
    }

    /// Reserve a free slot. Never blocks.
    pub fn acquire(&self) -> KernelResult<SlotId> {
        let mut inner = self.inner.lock();
        let Some(index) = inner.free.pop() else {
            return Err(KernelError::PoolExhausted {
                call_site: self.call_site,
                capacity: inner.slots.len(),
            });
        };
        inner.slots[index] = SlotState::Reserved;
        Ok(SlotId(index))
    }

    /// Attach a launch to a reserved slot.
    pub fn arm(&self, slot: SlotId, context: RegionContext, handle: LaunchHandle) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        match inner.slots.get_mut(slot.0) {
            Some(state) if matches!(state, SlotState::Reserved) => {
                *state = SlotState::InFlight { context, handle };
                Ok(())
            }
            _ => Err(KernelError::SlotNotInFlight(slot.0)),
        }
    }

    /// Non-blocking check whether the slot's launch has finished.
    pub fn try_complete(&self, slot: SlotId) -> bool {
        let inner = self.inner.lock();
        matches!(
            inner.slots.get(slot.0),
            Some(SlotState::InFlight { handle, .. }) if handle.is_complete()
        )
    }

    /// Return a held slot to the free list.
    pub fn release(&self, slot: SlotId) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        match inner.slots.get(slot.0) {
            None | Some(SlotState::Free) => return Err(KernelError::SlotNotInFlight(slot.0)),
            Some(SlotState::InFlight { handle, .. }) if !handle.is_complete() => {
                return Err(KernelError::SlotBusy(slot.0));
            }
            Some(_) => {}
        }
        inner.slots[slot.0] = SlotState::Free;
        inner.free.push(slot.0);
        Ok(())
    }

    /// Free every slot whose launch has completed and hand back what each
    /// one was tracking. Each completion is returned exactly once.
    pub fn poll_completed(&self) -> Vec<CompletedLaunch> {
        let mut inner = self.inner.lock();
        let mut done = Vec::new();
        for index in 0..inner.slots.len() {
            let outcome = match &inner.slots[index] {
                SlotState::InFlight { handle, .. } => handle.outcome(),
                _ => None,
            };
            let Some(outcome) = outcome else { continue };
            if let SlotState::InFlight { context, .. } =
                mem::replace(&mut inner.slots[index], SlotState::Free)
            {
                inner.free.push(index);
                done.push(CompletedLaunch {
                    slot: index,
                    context,
                    outcome,
                });
            }
        }
        done
    }

    /// Armed launches per candidate index, for `candidates` candidates.
    pub fn pending_by_candidate(&self, candidates: usize) -> Vec<usize> {
        let inner = self.inner.lock();
        let mut pending = vec![0; candidates];
        for slot in &inner.slots {
            if let SlotState::InFlight { context, .. } = slot {
                if let Some(count) = pending.get_mut(context.policy_index) {
                    *count += 1;
                }
            }
        }
        pending
    }

    /// Slots currently held (reserved or in flight).
    pub fn in_flight(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.len() - inner.free.len()
    }

    pub fn free(&self) -> usize {
        self.inner.lock().free.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }
}
