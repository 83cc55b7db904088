//! # Resources
//!
//! Mutual-exclusion resources under the immediate priority ceiling protocol.
//!
//! Each resource carries a static ceiling: the priority of the most urgent
//! task that may ever take it. Whoever holds the resource runs at (at least)
//! that priority, so no other user of the resource can preempt the holder
//! and priority inversion cannot build up.
//!
//! ```text
//!   acquire (free)        acquire (owned)           release
//!   ─────────────        ────────────────         ──────────────────────
//!   owner = caller        waiters.push_back()      owner = waiters.pop_front()
//!   prio = min(prio,      caller -> WAITING        grant, waiter -> READY
//!              ceiling)                            recompute caller prio
//! ```
//!
//! A holder's priority is always the most urgent of its base priority and
//! the ceilings of everything it still holds, so nested resources may be
//! released in any order.
//!
//! Wait queues hold task ids in a fixed-capacity ring, served in FIFO order.

use heapless::{Deque, Vec};
use log::debug;

use crate::config::{IDLE_TASK, MAX_RESOURCES, MAX_TASKS};
use crate::error::KernelError;
use crate::scheduler::Scheduler;
use crate::task::{Priority, TaskId, TaskState};

/// Index of a resource in the resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub usize);

/// Boot-time description of a resource.
#[derive(Debug, Clone, Copy)]
pub struct ResourceConfig {
    pub ceiling: Priority,
}

/// Outcome of a successful [`ResourceTable::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The caller owns the resource now.
    Granted,
    /// The caller was queued. Ownership is handed over by a later release,
    /// before the caller runs again.
    Blocked,
}

#[derive(Debug)]
pub struct ResourceControlBlock {
    pub ceiling: Priority,
    owner: Option<TaskId>,
    waiters: Deque<TaskId, MAX_TASKS>,
}

impl ResourceControlBlock {
    pub const fn new(ceiling: Priority) -> Self {
        Self {
            ceiling,
            owner: None,
            waiters: Deque::new(),
        }
    }

    pub fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    /// Queued tasks, longest waiting first.
    pub fn waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.waiters.iter().copied()
    }

    /// Hand the resource to `task` and raise its priority.
    fn grant<C: Copy>(&mut self, sched: &mut Scheduler<C>, task: TaskId) -> Result<(), KernelError> {
        let tcb = sched.task_mut(task)?;
        self.owner = Some(task);
        tcb.priority = tcb.priority.min(self.ceiling);
        debug!("resource granted to {:?}, prio {}", task, tcb.priority);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resource table
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ResourceTable {
    blocks: Vec<ResourceControlBlock, MAX_RESOURCES>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    pub fn from_config(configs: &[ResourceConfig]) -> Result<Self, KernelError> {
        let mut table = Self::new();
        for cfg in configs {
            table
                .blocks
                .push(ResourceControlBlock::new(cfg.ceiling))
                .map_err(|_| KernelError::Exhausted)?;
        }
        Ok(table)
    }

    pub fn get(&self, id: ResourceId) -> Result<&ResourceControlBlock, KernelError> {
        self.blocks.get(id.0).ok_or(KernelError::Id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Take resource `id` on behalf of `task`, or queue `task` behind the
    /// current owner.
    ///
    /// `NoFunc` when `task` already owns the resource, when the ceiling is
    /// less urgent than the task's base priority, or when the idle task
    /// would have to block.
    pub fn acquire<C: Copy>(
        &mut self,
        id: ResourceId,
        sched: &mut Scheduler<C>,
        task: TaskId,
    ) -> Result<Acquire, KernelError> {
        let rcb = self.blocks.get_mut(id.0).ok_or(KernelError::Id)?;
        let base_priority = sched.task(task)?.base_priority;

        if rcb.owner == Some(task) || rcb.ceiling > base_priority {
            return Err(KernelError::NoFunc);
        }

        if rcb.owner.is_none() {
            rcb.grant(sched, task)?;
            return Ok(Acquire::Granted);
        }

        if task == IDLE_TASK {
            return Err(KernelError::NoFunc);
        }
        rcb.waiters
            .push_back(task)
            .map_err(|_| KernelError::Exhausted)?;
        sched.task_mut(task)?.state = TaskState::Waiting;
        debug!("{:?} blocked on resource {}", task, id.0);
        Ok(Acquire::Blocked)
    }

    /// Most urgent ceiling among the resources `task` holds.
    fn held_ceiling(&self, task: TaskId) -> Option<Priority> {
        self.blocks
            .iter()
            .filter(|rcb| rcb.owner == Some(task))
            .map(|rcb| rcb.ceiling)
            .min()
    }

    /// Give up resource `id`. The longest waiting task, if any, becomes the
    /// new owner and is returned.
    ///
    /// The caller drops back to its base priority, or to the most urgent
    /// ceiling of the resources it still holds.
    pub fn release<C: Copy>(
        &mut self,
        id: ResourceId,
        sched: &mut Scheduler<C>,
        task: TaskId,
    ) -> Result<Option<TaskId>, KernelError> {
        let rcb = self.blocks.get_mut(id.0).ok_or(KernelError::Id)?;
        if rcb.owner != Some(task) {
            return Err(KernelError::Ownership);
        }
        rcb.owner = None;
        let next = rcb.waiters.pop_front();

        let held = self.held_ceiling(task);
        let tcb = sched.task_mut(task)?;
        let base = tcb.base_priority;
        tcb.priority = held.map_or(base, |ceiling| ceiling.min(base));

        let Some(next) = next else {
            return Ok(None);
        };
        self.blocks[id.0].grant(sched, next)?;
        sched.task_mut(next)?.state = TaskState::Ready;
        Ok(Some(next))
    }

    /// Force-release everything `task` owns.
    pub fn release_all<C: Copy>(&mut self, sched: &mut Scheduler<C>, task: TaskId) {
        for idx in (0..self.blocks.len()).rev() {
            if self.blocks[idx].owner == Some(task) {
                // Ownership was just checked, the release cannot fail.
                let _ = self.release(ResourceId(idx), sched, task);
            }
        }
    }
}
