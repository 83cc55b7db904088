//! # Task Control Block
//!
//! Defines the task model for Ceros. Tasks live in a fixed table and are
//! identified by their slot index. Each task owns its stack for its whole
//! lifetime and keeps two priorities: the static base priority from its
//! declaration and the current one, which the ceiling protocol raises while
//! resources are held.

use crate::config::PRI_MAX;
use crate::error::KernelError;
use crate::event::EventMask;

/// Task priority. Lower numbers are more urgent.
pub type Priority = u8;

/// One machine word of task stack.
pub type StackWord = usize;

/// Task entry point. Receives the argument from its configuration and must
/// finish with `terminate_task` or `chain_task`.
pub type TaskEntry = extern "C" fn(i32) -> !;

/// Index of a task in the task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Scheduling state of a task.
///
/// ```text
///               declare              activate
///   ┌──────┐ ──────────► ┌───────────┐ ──────────► ┌───────┐
///   │ Free │             │ Suspended │             │ Ready │ ◄──┐
///   └──────┘             └───────────┘ ◄──┐        └───────┘    │
///                              ▲          │  reschedule │  ▲     │ set_event /
///                    terminate │          │             ▼  │     │ resource granted
///                              │          │        ┌─────────┐   │
///                              └──────────┴─────── │ Running │   │
///                                                  └─────────┘   │
///                                      wait_event /     │        │
///                                      get_resource     ▼        │
///                                                  ┌─────────┐   │
///                                                  │ Waiting │ ──┘
///                                                  └─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is executing on the CPU (or has been selected to do so).
    Running,
    /// Task is blocked on a resource or on its event flags.
    Waiting,
    /// Task can run and competes by priority.
    Ready,
    /// Task exists but is not active.
    Suspended,
    /// Slot not declared.
    Free,
}

impl TaskState {
    /// Word used to report the state across the trap boundary.
    pub const fn as_word(self) -> usize {
        match self {
            TaskState::Running => 0,
            TaskState::Waiting => 1,
            TaskState::Ready => 2,
            TaskState::Suspended => 3,
            TaskState::Free => 4,
        }
    }

    pub const fn from_word(word: usize) -> Option<Self> {
        match word {
            0 => Some(TaskState::Running),
            1 => Some(TaskState::Waiting),
            2 => Some(TaskState::Ready),
            3 => Some(TaskState::Suspended),
            4 => Some(TaskState::Free),
            _ => None,
        }
    }
}

/// Where the task's register context currently lives.
///
/// `C` is the port's opaque context handle (the saved stack pointer on
/// Cortex-M). The kernel never looks inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext<C> {
    /// Never activated, or terminated: there is nothing to resume.
    Dormant,
    /// Stack primed by activation, never executed.
    Primed(C),
    /// Registers are live on the CPU.
    OnCpu,
    /// Preempted mid-execution; `C` restores it.
    Saved(C),
}

// ---------------------------------------------------------------------------
// Task configuration (immutable after creation)
// ---------------------------------------------------------------------------

/// Static description of a task, consumed at boot or by `declare`.
#[derive(Debug)]
pub struct TaskConfig {
    pub entry: TaskEntry,
    /// Base priority. Lower is more urgent.
    pub priority: Priority,
    /// Stack region, owned exclusively by this task.
    pub stack: &'static mut [StackWord],
    /// Activate during boot.
    pub autostart: bool,
    /// Value passed to `entry`.
    pub argument: i32,
}

impl TaskConfig {
    /// A task that is not started at boot and receives argument 0.
    pub fn new(entry: TaskEntry, priority: Priority, stack: &'static mut [StackWord]) -> Self {
        Self {
            entry,
            priority,
            stack,
            autostart: false,
            argument: 0,
        }
    }

    pub fn autostart(mut self) -> Self {
        self.autostart = true;
        self
    }

    pub fn argument(mut self, argument: i32) -> Self {
        self.argument = argument;
        self
    }
}

/// Source of stacks for tasks declared at run time.
pub trait StackAllocator: Send {
    /// Hand out `words` words of stack, or `None` when memory is exhausted.
    fn alloc(&mut self, words: usize) -> Option<&'static mut [StackWord]>;
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB), the per-task record in the scheduler table.
#[derive(Debug)]
pub struct TaskControlBlock<C> {
    /// Stable identity (index in the task table).
    pub id: TaskId,

    pub state: TaskState,

    /// Current priority, raised while resources are held.
    pub priority: Priority,

    /// Priority from the declaration.
    pub base_priority: Priority,

    /// Bits this task is blocked on; zero unless waiting for events.
    pub event_wait: EventMask,

    /// Events delivered to this task.
    pub event_flags: EventMask,

    /// Register context handle, see [`ExecContext`].
    pub context: ExecContext<C>,

    entry: Option<TaskEntry>,
    argument: i32,
    stack: Option<&'static mut [StackWord]>,
}

impl<C: Copy> TaskControlBlock<C> {
    /// An undeclared slot.
    pub const fn free(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Free,
            priority: PRI_MAX,
            base_priority: PRI_MAX,
            event_wait: 0,
            event_flags: 0,
            context: ExecContext::Dormant,
            entry: None,
            argument: 0,
            stack: None,
        }
    }

    /// Fill a slot from its configuration. The task starts SUSPENDED.
    pub fn declare(&mut self, config: TaskConfig) {
        self.state = TaskState::Suspended;
        self.priority = config.priority;
        self.base_priority = config.priority;
        self.event_wait = 0;
        self.event_flags = 0;
        self.context = ExecContext::Dormant;
        self.entry = Some(config.entry);
        self.argument = config.argument;
        self.stack = Some(config.stack);
    }

    /// SUSPENDED → READY. Restores the base priority, clears the event
    /// state and primes the stack with `prime`, which lays out an initial
    /// exception frame and returns the context that resumes into `entry`.
    ///
    /// Fails with `Limit` if the task is already active and `Id` on a free
    /// slot.
    pub fn activate<F>(&mut self, prime: F) -> Result<(), KernelError>
    where
        F: FnOnce(&mut [StackWord], TaskEntry, i32) -> C,
    {
        match self.state {
            TaskState::Suspended => {}
            TaskState::Free => return Err(KernelError::Id),
            _ => return Err(KernelError::Limit),
        }
        let (Some(entry), Some(stack)) = (self.entry, self.stack.as_deref_mut()) else {
            return Err(KernelError::Id);
        };

        self.context = ExecContext::Primed(prime(stack, entry, self.argument));
        self.state = TaskState::Ready;
        self.priority = self.base_priority;
        self.event_wait = 0;
        self.event_flags = 0;
        Ok(())
    }

    /// Any state → SUSPENDED. The register context is dropped even if it is
    /// still live on the CPU: nothing will ever resume it. Resource
    /// ownership is handled by the caller.
    pub fn terminate(&mut self) {
        self.state = TaskState::Suspended;
        self.priority = self.base_priority;
        self.event_wait = 0;
        self.event_flags = 0;
        self.context = ExecContext::Dormant;
    }

    /// Ready or Running: the scheduler may pick it.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    /// The task's stack, if it has been declared.
    pub fn stack(&self) -> Option<&[StackWord]> {
        self.stack.as_deref()
    }

    pub fn entry(&self) -> Option<TaskEntry> {
        self.entry
    }
}

/// Helpers shared by the unit tests of several modules.
#[cfg(test)]
pub(crate) mod testing {
    use super::StackWord;

    pub extern "C" fn spin(_arg: i32) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    pub fn leak_stack(words: usize) -> &'static mut [StackWord] {
        Box::leak(vec![0; words].into_boxed_slice())
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::testing::{leak_stack, spin};
    use super::*;

    fn prime_marker(stack: &mut [StackWord], _entry: TaskEntry, arg: i32) -> usize {
        stack[0] = arg as usize;
        0xC0
    }

    #[test]
    fn test_tcb_declaration() {
        let mut tcb: TaskControlBlock<usize> = TaskControlBlock::free(TaskId(2));
        assert_eq!(tcb.state, TaskState::Free);
        assert!(tcb.stack().is_none());

        tcb.declare(TaskConfig::new(spin, 5, leak_stack(16)).argument(7));

        assert_eq!(tcb.state, TaskState::Suspended);
        assert_eq!(tcb.priority, 5);
        assert_eq!(tcb.base_priority, 5);
        assert_eq!(tcb.stack().map(|s| s.len()), Some(16));
        assert_eq!(tcb.context, ExecContext::Dormant);
    }

    #[test]
    fn test_activation_primes_and_resets() {
        let mut tcb: TaskControlBlock<usize> = TaskControlBlock::free(TaskId(1));
        tcb.declare(TaskConfig::new(spin, 5, leak_stack(16)).argument(7));
        tcb.priority = 0;
        tcb.event_flags = 0b101;

        tcb.activate(prime_marker).unwrap();

        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.priority, 5);
        assert_eq!(tcb.event_flags, 0);
        assert_eq!(tcb.context, ExecContext::Primed(0xC0));
        assert_eq!(tcb.stack().unwrap()[0], 7);
    }

    #[test]
    fn test_activation_limits() {
        let mut tcb: TaskControlBlock<usize> = TaskControlBlock::free(TaskId(1));
        assert_eq!(tcb.activate(prime_marker), Err(KernelError::Id));

        tcb.declare(TaskConfig::new(spin, 5, leak_stack(16)));
        tcb.activate(prime_marker).unwrap();
        assert_eq!(tcb.activate(prime_marker), Err(KernelError::Limit));

        tcb.state = TaskState::Waiting;
        assert_eq!(tcb.activate(prime_marker), Err(KernelError::Limit));
    }

    #[test]
    fn test_terminate_discards_live_context() {
        let mut tcb: TaskControlBlock<usize> = TaskControlBlock::free(TaskId(1));
        tcb.declare(TaskConfig::new(spin, 5, leak_stack(16)));
        tcb.activate(prime_marker).unwrap();
        tcb.context = ExecContext::OnCpu;
        tcb.event_flags = 1;

        tcb.terminate();

        assert_eq!(tcb.state, TaskState::Suspended);
        assert_eq!(tcb.event_flags, 0);
        assert_eq!(tcb.context, ExecContext::Dormant);
    }

    #[test]
    fn test_state_words() {
        for state in [
            TaskState::Running,
            TaskState::Waiting,
            TaskState::Ready,
            TaskState::Suspended,
            TaskState::Free,
        ] {
            assert_eq!(TaskState::from_word(state.as_word()), Some(state));
        }
        assert_eq!(TaskState::from_word(99), None);
    }
}
