//! # Event Flags
//!
//! Every task owns a 32-bit word of event flags and a wait mask. Setting an
//! event ORs bits into the target's flags; a task blocked in
//! [`Scheduler::wait_event`] becomes READY as soon as any bit it waits for is
//! set. Flags stay set until the owner clears them, so a wait that finds its
//! bits already present returns immediately.
//!
//! These operations only change task states. The caller runs
//! [`Scheduler::reschedule`] afterwards and, because the kernel is always
//! entered inside a critical section, the check and the block in
//! `wait_event` cannot be split by an interrupt.

use crate::config::IDLE_TASK;
use crate::error::KernelError;
use crate::scheduler::Scheduler;
use crate::task::{TaskId, TaskState};

/// Bit set of events. Bits carry no ordering.
pub type EventMask = u32;

impl<C: Copy> Scheduler<C> {
    /// Deliver `mask` to `target`.
    ///
    /// Returns `true` if the target was waiting for one of the bits and has
    /// been made READY. A SUSPENDED or undeclared target is a state error.
    pub fn set_event(&mut self, target: TaskId, mask: EventMask) -> Result<bool, KernelError> {
        let tcb = self.slot_mut(target).ok_or(KernelError::Id)?;
        if matches!(tcb.state, TaskState::Suspended | TaskState::Free) {
            return Err(KernelError::State);
        }

        tcb.event_flags |= mask;
        if tcb.state == TaskState::Waiting && tcb.event_wait & tcb.event_flags != 0 {
            tcb.event_wait = 0;
            tcb.state = TaskState::Ready;
            return Ok(true);
        }
        Ok(false)
    }

    /// Clear bits of the calling task's own flags.
    pub fn clear_event(&mut self, mask: EventMask) {
        self.current_tcb_mut().event_flags &= !mask;
    }

    pub fn get_event(&self, target: TaskId) -> Result<EventMask, KernelError> {
        let tcb = self.slot(target)?;
        if matches!(tcb.state, TaskState::Suspended | TaskState::Free) {
            return Err(KernelError::State);
        }
        Ok(tcb.event_flags)
    }

    /// Block the calling task until one of `mask` is set.
    ///
    /// Returns `false` without blocking if a matching flag is already
    /// present. The idle task must never block and gets `NoFunc` instead.
    pub fn wait_event(&mut self, mask: EventMask) -> Result<bool, KernelError> {
        let is_idle = self.current() == IDLE_TASK;
        let tcb = self.current_tcb_mut();
        if tcb.event_flags & mask != 0 {
            return Ok(false);
        }
        if is_idle {
            return Err(KernelError::NoFunc);
        }
        tcb.event_wait = mask;
        tcb.state = TaskState::Waiting;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_TASKS, PRI_MAX};
    use crate::task::testing::{leak_stack, spin};
    use crate::task::{ExecContext, StackWord, TaskConfig, TaskEntry};

    fn prime(_: &mut [StackWord], _: TaskEntry, _: i32) -> usize {
        0
    }

    /// Idle plus one task, task 1 on the CPU.
    fn setup() -> Scheduler<usize> {
        let mut s = Scheduler::new();
        for (id, prio) in [(0, PRI_MAX), (1, 3)] {
            let tcb = s.slot_mut(TaskId(id)).unwrap();
            tcb.declare(TaskConfig::new(spin, prio, leak_stack(16)));
            tcb.activate(prime).unwrap();
        }
        s.task_mut(IDLE_TASK).unwrap().context = ExecContext::OnCpu;
        s.reschedule();
        s.switch_context(0);
        assert_eq!(s.current(), TaskId(1));
        s
    }

    #[test]
    fn test_wait_then_set_wakes() {
        let mut s = setup();
        assert_eq!(s.wait_event(0b10), Ok(true));
        assert_eq!(s.task(TaskId(1)).unwrap().state, TaskState::Waiting);

        // Unrelated bit: stays blocked but the flag is recorded.
        assert_eq!(s.set_event(TaskId(1), 0b01), Ok(false));
        assert_eq!(s.task(TaskId(1)).unwrap().state, TaskState::Waiting);

        assert_eq!(s.set_event(TaskId(1), 0b10), Ok(true));
        let tcb = s.task(TaskId(1)).unwrap();
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.event_wait, 0);
        assert_eq!(tcb.event_flags, 0b11);
    }

    #[test]
    fn test_wait_with_flag_already_set_does_not_block() {
        let mut s = setup();
        s.set_event(TaskId(1), 0b100).unwrap();
        assert_eq!(s.wait_event(0b110), Ok(false));
        assert_eq!(s.task(TaskId(1)).unwrap().state, TaskState::Running);
    }

    #[test]
    fn test_clear_and_get() {
        let mut s = setup();
        s.set_event(TaskId(1), 0b111).unwrap();
        s.clear_event(0b010);
        assert_eq!(s.get_event(TaskId(1)), Ok(0b101));
    }

    #[test]
    fn test_suspended_target_is_state_error() {
        let mut s = setup();
        s.task_mut(TaskId(1)).unwrap().terminate();
        assert_eq!(s.set_event(TaskId(1), 1), Err(KernelError::State));
        assert_eq!(s.get_event(TaskId(1)), Err(KernelError::State));
    }

    #[test]
    fn test_free_slot_is_state_error() {
        let mut s = setup();
        assert_eq!(s.set_event(TaskId(5), 1), Err(KernelError::State));
        assert_eq!(s.get_event(TaskId(5)), Err(KernelError::State));
        assert_eq!(s.slot(TaskId(5)).unwrap().event_flags, 0);

        assert_eq!(s.set_event(TaskId(MAX_TASKS), 1), Err(KernelError::Id));
        assert_eq!(s.get_event(TaskId(MAX_TASKS)), Err(KernelError::Id));
    }

    #[test]
    fn test_idle_cannot_block() {
        let mut s: Scheduler<usize> = Scheduler::new();
        let idle = s.slot_mut(IDLE_TASK).unwrap();
        idle.declare(TaskConfig::new(spin, PRI_MAX, leak_stack(16)));
        idle.activate(prime).unwrap();
        s.reschedule();

        assert_eq!(s.wait_event(1), Err(KernelError::NoFunc));
        assert_eq!(s.task(IDLE_TASK).unwrap().state, TaskState::Running);
    }
}
