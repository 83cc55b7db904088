//! # Task-Side System Calls
//!
//! Thin wrappers that load R0-R3, execute `svc #N` and turn the returned
//! registers back into typed results. Only tasks running in Thread mode may
//! call these; from a handler the `svc` would escalate to a HardFault.

use core::arch::asm;

use crate::alarm::{AlarmBase, AlarmId, Tick};
use crate::error::{KernelError, E_BLOCKED};
use crate::event::EventMask;
use crate::resource::{Acquire, ResourceId};
use crate::syscall::{check, Sysnum};
use crate::task::{Priority, TaskEntry, TaskId, TaskState};

/// Execute `svc #$nr` with four argument words and return R0-R3.
///
/// The literal must match the named [`Sysnum`]; a const assertion keeps
/// the two in step.
macro_rules! trap {
    ($nr:literal = $sysnum:ident, $a0:expr, $a1:expr, $a2:expr, $a3:expr) => {{
        const _: () = assert!(Sysnum::$sysnum as usize == $nr);
        let (r0, r1, r2, r3): (usize, usize, usize, usize);
        unsafe {
            asm!(
                concat!("svc #", $nr),
                inout("r0") $a0 => r0,
                inout("r1") $a1 => r1,
                inout("r2") $a2 => r2,
                inout("r3") $a3 => r3,
            );
        }
        [r0, r1, r2, r3]
    }};
}

fn unit(words: [usize; 4]) -> Result<(), KernelError> {
    check(words[0]).map(|_| ())
}

/// Print `msg` on the kernel console.
pub fn debug(msg: &str) -> Result<(), KernelError> {
    unit(trap!(0 = Debug, msg.as_ptr() as usize, msg.len(), 0usize, 0usize))
}

/// Declare a new task with a stack of `stack_words` words from the kernel's
/// stack allocator. The task starts SUSPENDED.
pub fn declare(
    entry: TaskEntry,
    priority: Priority,
    stack_words: usize,
    argument: i32,
) -> Result<TaskId, KernelError> {
    let words = trap!(
        1 = Declare,
        entry as usize,
        priority as usize,
        stack_words,
        argument as usize
    );
    check(words[0]).map(|_| TaskId(words[1]))
}

pub fn activate_task(id: TaskId) -> Result<(), KernelError> {
    unit(trap!(2 = ActivateTask, id.0, 0usize, 0usize, 0usize))
}

/// End the calling task. Returns only on failure.
pub fn terminate_task() -> Result<(), KernelError> {
    unit(trap!(3 = TerminateTask, 0usize, 0usize, 0usize, 0usize))
}

/// End the calling task and activate `id`. Returns only on failure.
pub fn chain_task(id: TaskId) -> Result<(), KernelError> {
    unit(trap!(4 = ChainTask, id.0, 0usize, 0usize, 0usize))
}

pub fn get_task_id() -> Result<TaskId, KernelError> {
    let words = trap!(5 = GetTaskId, 0usize, 0usize, 0usize, 0usize);
    check(words[0]).map(|_| TaskId(words[1]))
}

pub fn get_task_state(id: TaskId) -> Result<TaskState, KernelError> {
    let words = trap!(6 = GetTaskState, id.0, 0usize, 0usize, 0usize);
    check(words[0])?;
    TaskState::from_word(words[1]).ok_or(KernelError::Value)
}

/// Take resource `id`. Returns `Blocked` if the caller had to wait; in
/// both cases the caller owns the resource when this returns.
pub fn get_resource(id: ResourceId) -> Result<Acquire, KernelError> {
    let words = trap!(7 = GetResource, id.0, 0usize, 0usize, 0usize);
    match check(words[0])? {
        E_BLOCKED => Ok(Acquire::Blocked),
        _ => Ok(Acquire::Granted),
    }
}

pub fn release_resource(id: ResourceId) -> Result<(), KernelError> {
    unit(trap!(8 = ReleaseResource, id.0, 0usize, 0usize, 0usize))
}

pub fn set_event(id: TaskId, mask: EventMask) -> Result<(), KernelError> {
    unit(trap!(9 = SetEvent, id.0, mask as usize, 0usize, 0usize))
}

pub fn clear_event(mask: EventMask) -> Result<(), KernelError> {
    unit(trap!(10 = ClearEvent, mask as usize, 0usize, 0usize, 0usize))
}

pub fn get_event(id: TaskId) -> Result<EventMask, KernelError> {
    let words = trap!(11 = GetEvent, id.0, 0usize, 0usize, 0usize);
    check(words[0]).map(|_| words[1] as EventMask)
}

/// Block until one of `mask` is set for the calling task.
pub fn wait_event(mask: EventMask) -> Result<(), KernelError> {
    unit(trap!(12 = WaitEvent, mask as usize, 0usize, 0usize, 0usize))
}

pub fn get_alarm_base(id: AlarmId) -> Result<AlarmBase, KernelError> {
    let words = trap!(13 = GetAlarmBase, id.0, 0usize, 0usize, 0usize);
    check(words[0])?;
    Ok(AlarmBase {
        max_allowed_value: words[1] as Tick,
        ticks_per_base: words[2] as Tick,
        min_cycle: words[3] as Tick,
    })
}

pub fn get_alarm(id: AlarmId) -> Result<Tick, KernelError> {
    let words = trap!(14 = GetAlarm, id.0, 0usize, 0usize, 0usize);
    check(words[0]).map(|_| words[1] as Tick)
}

pub fn set_rel_alarm(id: AlarmId, increment: Tick, cycle: Tick) -> Result<(), KernelError> {
    unit(trap!(
        15 = SetRelAlarm,
        id.0,
        increment as usize,
        cycle as usize,
        0usize
    ))
}

pub fn set_abs_alarm(id: AlarmId, start: Tick, cycle: Tick) -> Result<(), KernelError> {
    unit(trap!(
        16 = SetAbsAlarm,
        id.0,
        start as usize,
        cycle as usize,
        0usize
    ))
}

pub fn cancel_alarm(id: AlarmId) -> Result<(), KernelError> {
    unit(trap!(17 = CancelAlarm, id.0, 0usize, 0usize, 0usize))
}
