//! # Scheduler
//!
//! Fixed-priority preemptive scheduling with round-robin among equals.
//!
//! ## Scheduling Algorithm
//!
//! Scheduling is a two-phase protocol:
//!
//! 1. **Decide** ([`Scheduler::reschedule`]): scan the task table circularly,
//!    starting at the slot after the task currently on the CPU, and pick the
//!    runnable task with the numerically smallest priority. The first task
//!    found wins a tie, so equal priorities rotate. The old RUNNING task is
//!    demoted to READY and the winner is marked RUNNING. No registers move.
//! 2. **Commit** ([`Scheduler::switch_context`]): called from the
//!    context-switch exception. Saves the outgoing task's context handle and
//!    returns the one to restore.
//!
//! A decision may be taken again before the previous one has been committed
//! (a tick interrupting a system call, several calls in one trap). The last
//! decision before the commit wins; the earlier pick simply goes back to
//! READY.
//!
//! The idle task in slot 0 never blocks, so a candidate always exists.

use log::{error, trace};

use crate::config::{IDLE_TASK, MAX_TASKS};
use crate::error::KernelError;
use crate::task::{ExecContext, Priority, TaskControlBlock, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The task table plus the scheduling cursor.
///
/// `C` is the port's context handle type.
pub struct Scheduler<C> {
    tasks: [TaskControlBlock<C>; MAX_TASKS],

    /// Task whose registers are on the CPU. System calls act on its behalf.
    current: TaskId,

    /// Task chosen by the latest decision; equals `current` once committed.
    selected: TaskId,
}

impl<C: Copy> Scheduler<C> {
    /// An empty table. The caller declares the idle task into slot 0.
    pub fn new() -> Self {
        Self {
            tasks: core::array::from_fn(|i| TaskControlBlock::free(TaskId(i))),
            current: IDLE_TASK,
            selected: IDLE_TASK,
        }
    }

    /// Look up a declared task. Out-of-range ids and free slots are
    /// identification errors.
    pub fn task(&self, id: TaskId) -> Result<&TaskControlBlock<C>, KernelError> {
        match self.tasks.get(id.0) {
            Some(tcb) if tcb.state != TaskState::Free => Ok(tcb),
            _ => Err(KernelError::Id),
        }
    }

    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskControlBlock<C>, KernelError> {
        match self.tasks.get_mut(id.0) {
            Some(tcb) if tcb.state != TaskState::Free => Ok(tcb),
            _ => Err(KernelError::Id),
        }
    }

    /// First FREE slot, for run-time declaration.
    pub fn free_slot(&mut self) -> Option<&mut TaskControlBlock<C>> {
        self.tasks.iter_mut().find(|t| t.state == TaskState::Free)
    }

    /// Any slot in range, FREE ones included. Only out-of-range ids are
    /// identification errors.
    pub fn slot(&self, id: TaskId) -> Result<&TaskControlBlock<C>, KernelError> {
        self.tasks.get(id.0).ok_or(KernelError::Id)
    }

    /// Raw slot access, declared or not.
    pub(crate) fn slot_mut(&mut self, id: TaskId) -> Option<&mut TaskControlBlock<C>> {
        self.tasks.get_mut(id.0)
    }

    pub fn tasks(&self) -> &[TaskControlBlock<C>] {
        &self.tasks
    }

    /// The task on the CPU.
    pub fn current(&self) -> TaskId {
        self.current
    }

    /// The task the latest decision picked.
    pub fn selected(&self) -> TaskId {
        self.selected
    }

    pub fn current_tcb(&self) -> &TaskControlBlock<C> {
        &self.tasks[self.current.0]
    }

    pub fn current_tcb_mut(&mut self) -> &mut TaskControlBlock<C> {
        &mut self.tasks[self.current.0]
    }

    /// Pick the next task without changing anything.
    ///
    /// Candidates are READY tasks plus whichever task is currently marked
    /// RUNNING. Returns `None` only if nothing at all is runnable.
    pub fn decide(&self) -> Option<TaskId> {
        let start = self.current.0;
        let mut best: Option<(TaskId, Priority)> = None;

        for step in 1..=MAX_TASKS {
            let tcb = &self.tasks[(start + step) % MAX_TASKS];
            if !tcb.is_runnable() {
                continue;
            }
            if best.map_or(true, |(_, prio)| tcb.priority < prio) {
                best = Some((tcb.id, tcb.priority));
            }
        }

        best.map(|(id, _)| id)
    }

    /// Decide and record the decision.
    ///
    /// Returns `true` when the port must request a context switch: the
    /// selected task is not the one on the CPU, or it is but its registers
    /// were discarded (the task terminated and was restarted).
    pub fn reschedule(&mut self) -> bool {
        let Some(next) = self.decide() else {
            // Only reachable before the idle task is declared.
            return false;
        };

        for id in [self.current, self.selected] {
            let tcb = &mut self.tasks[id.0];
            if id != next && tcb.state == TaskState::Running {
                tcb.state = TaskState::Ready;
            }
        }
        self.tasks[next.0].state = TaskState::Running;
        self.selected = next;

        trace!(
            "reschedule: {:?} -> {:?} (prio {})",
            self.current,
            next,
            self.tasks[next.0].priority
        );

        next != self.current || !matches!(self.tasks[next.0].context, ExecContext::OnCpu)
    }

    /// Commit the latest decision.
    ///
    /// `outgoing` is the context of the task on the CPU. It is stored only
    /// if that task really has live registers: a task that was terminated
    /// (or terminated and re-primed) since it was dispatched has nothing
    /// worth saving, and saving would clobber the primed frame. The same
    /// rule covers the very first dispatch, where the idle task is still
    /// primed and `outgoing` is meaningless.
    ///
    /// Returns the context to restore.
    pub fn switch_context(&mut self, outgoing: C) -> C {
        let out = &mut self.tasks[self.current.0];
        if matches!(out.context, ExecContext::OnCpu) {
            out.context = ExecContext::Saved(outgoing);
        }

        let next = self.selected;
        let incoming = &mut self.tasks[next.0];
        let restored = match incoming.context {
            ExecContext::Primed(ctx) | ExecContext::Saved(ctx) => ctx,
            ExecContext::OnCpu | ExecContext::Dormant => {
                error!("switch_context: {:?} has no context to restore", next);
                return outgoing;
            }
        };
        incoming.context = ExecContext::OnCpu;
        self.current = next;
        restored
    }
}

impl<C: Copy> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PRI_MAX;
    use crate::task::testing::{leak_stack, spin};
    use crate::task::{StackWord, TaskConfig, TaskEntry};

    /// Context handle = 0x100 + task argument, so restores are traceable.
    fn prime(_stack: &mut [StackWord], _entry: TaskEntry, arg: i32) -> usize {
        0x100 + arg as usize
    }

    /// Idle task on the CPU, plus one task per entry of `prios` (suspended).
    fn scheduler(prios: &[Priority]) -> Scheduler<usize> {
        let mut s = Scheduler::new();
        let idle = s.slot_mut(IDLE_TASK).unwrap();
        idle.declare(TaskConfig::new(spin, PRI_MAX, leak_stack(16)));
        idle.activate(prime).unwrap();
        idle.state = TaskState::Running;
        idle.context = ExecContext::OnCpu;

        for (i, &prio) in prios.iter().enumerate() {
            let id = TaskId(i + 1);
            s.slot_mut(id)
                .unwrap()
                .declare(TaskConfig::new(spin, prio, leak_stack(16)).argument(id.0 as i32));
        }
        s
    }

    fn activate(s: &mut Scheduler<usize>, id: usize) {
        s.task_mut(TaskId(id)).unwrap().activate(prime).unwrap();
    }

    fn running(s: &Scheduler<usize>) -> Vec<TaskId> {
        s.tasks()
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .map(|t| t.id)
            .collect()
    }

    #[test]
    fn test_most_urgent_wins() {
        let mut s = scheduler(&[5, 2, 7]);
        for id in 1..=3 {
            activate(&mut s, id);
        }

        assert!(s.reschedule());
        assert_eq!(s.selected(), TaskId(2));
        assert_eq!(running(&s), vec![TaskId(2)]);
        assert_eq!(s.task(IDLE_TASK).unwrap().state, TaskState::Ready);
    }

    #[test]
    fn test_nothing_ready_keeps_current() {
        let mut s = scheduler(&[1]);
        assert!(!s.reschedule());
        assert_eq!(s.selected(), IDLE_TASK);
        assert_eq!(running(&s), vec![IDLE_TASK]);
    }

    #[test]
    fn test_round_robin_among_equals() {
        let mut s = scheduler(&[3, 3, 3]);
        for id in 1..=3 {
            activate(&mut s, id);
        }

        let mut order = Vec::new();
        for _ in 0..6 {
            s.reschedule();
            s.switch_context(0xDEAD);
            order.push(s.current().0);
        }
        assert_eq!(order, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_repeated_decision_last_wins() {
        let mut s = scheduler(&[4, 2]);
        activate(&mut s, 1);
        assert!(s.reschedule());
        assert_eq!(s.selected(), TaskId(1));

        // A tick arrives before the switch and readies something better.
        activate(&mut s, 2);
        assert!(s.reschedule());
        assert_eq!(s.selected(), TaskId(2));
        assert_eq!(running(&s), vec![TaskId(2)]);
        assert_eq!(s.task(TaskId(1)).unwrap().state, TaskState::Ready);

        assert_eq!(s.switch_context(0xAAAA), 0x102);
        assert_eq!(s.current(), TaskId(2));
    }

    #[test]
    fn test_decide_is_pure() {
        let mut s = scheduler(&[1]);
        activate(&mut s, 1);
        assert_eq!(s.decide(), Some(TaskId(1)));
        assert_eq!(s.decide(), Some(TaskId(1)));
        assert_eq!(s.task(TaskId(1)).unwrap().state, TaskState::Ready);
        assert_eq!(s.selected(), IDLE_TASK);
    }

    #[test]
    fn test_switch_saves_live_context() {
        let mut s = scheduler(&[1]);
        activate(&mut s, 1);
        s.reschedule();

        let restored = s.switch_context(0xBEEF);
        assert_eq!(restored, 0x101);
        assert_eq!(
            s.task(IDLE_TASK).unwrap().context,
            ExecContext::Saved(0xBEEF)
        );
        assert_eq!(s.task(TaskId(1)).unwrap().context, ExecContext::OnCpu);
    }

    #[test]
    fn test_first_dispatch_skips_save() {
        let mut s = scheduler(&[1]);
        // Boot: idle primed but never executed.
        let idle = s.task_mut(IDLE_TASK).unwrap();
        idle.context = ExecContext::Primed(0x100);
        activate(&mut s, 1);
        s.reschedule();

        assert_eq!(s.switch_context(0), 0x101);
        assert_eq!(
            s.task(IDLE_TASK).unwrap().context,
            ExecContext::Primed(0x100)
        );
    }

    #[test]
    fn test_restart_of_current_task_restores_primed_frame() {
        let mut s = scheduler(&[1]);
        activate(&mut s, 1);
        s.reschedule();
        s.switch_context(0x1);

        // Task 1 terminates and is re-activated before the switch runs.
        s.task_mut(TaskId(1)).unwrap().terminate();
        activate(&mut s, 1);
        assert!(s.reschedule());
        assert_eq!(s.selected(), s.current());

        assert_eq!(s.switch_context(0x2222), 0x101);
        assert_eq!(s.task(TaskId(1)).unwrap().context, ExecContext::OnCpu);
    }

    #[test]
    fn test_lookup_errors() {
        let s = scheduler(&[1]);
        assert!(s.task(TaskId(1)).is_ok());
        assert_eq!(s.task(TaskId(2)).err(), Some(KernelError::Id));
        assert_eq!(s.task(TaskId(MAX_TASKS)).err(), Some(KernelError::Id));

        assert_eq!(s.slot(TaskId(2)).map(|t| t.state), Ok(TaskState::Free));
        assert_eq!(s.slot(TaskId(MAX_TASKS)).err(), Some(KernelError::Id));
    }
}
