//! # System Call ABI
//!
//! The trap boundary between tasks and the kernel.
//!
//! A task places up to four argument words in R0-R3 and executes
//! `svc #N`, where `N` is a [`Sysnum`]. The SVCall handler turns the number
//! and the stacked argument words into a [`Syscall`], the kernel executes it
//! and the resulting [`Reply`] is written back over the stacked R0-R3:
//!
//! ```text
//!   R0   status: E_OK, E_BLOCKED or a KernelError code
//!   R1   first result word (task id, state, mask, ticks, max value)
//!   R2   ticks_per_base (get_alarm_base only)
//!   R3   min_cycle      (get_alarm_base only)
//! ```
//!
//! Everything above this module deals in typed values only.

use crate::alarm::{AlarmBase, AlarmId, Tick};
use crate::error::{KernelError, E_BLOCKED, E_OK};
use crate::event::EventMask;
use crate::resource::{Acquire, ResourceId};
use crate::task::{Priority, TaskEntry, TaskId, TaskState};

/// Trap numbers, encoded in the `svc` instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Sysnum {
    Debug = 0,
    Declare = 1,
    ActivateTask = 2,
    TerminateTask = 3,
    ChainTask = 4,
    GetTaskId = 5,
    GetTaskState = 6,
    GetResource = 7,
    ReleaseResource = 8,
    SetEvent = 9,
    ClearEvent = 10,
    GetEvent = 11,
    WaitEvent = 12,
    GetAlarmBase = 13,
    GetAlarm = 14,
    SetRelAlarm = 15,
    SetAbsAlarm = 16,
    CancelAlarm = 17,
}

impl core::convert::TryFrom<usize> for Sysnum {
    type Error = ();

    fn try_from(x: usize) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Debug),
            1 => Ok(Self::Declare),
            2 => Ok(Self::ActivateTask),
            3 => Ok(Self::TerminateTask),
            4 => Ok(Self::ChainTask),
            5 => Ok(Self::GetTaskId),
            6 => Ok(Self::GetTaskState),
            7 => Ok(Self::GetResource),
            8 => Ok(Self::ReleaseResource),
            9 => Ok(Self::SetEvent),
            10 => Ok(Self::ClearEvent),
            11 => Ok(Self::GetEvent),
            12 => Ok(Self::WaitEvent),
            13 => Ok(Self::GetAlarmBase),
            14 => Ok(Self::GetAlarm),
            15 => Ok(Self::SetRelAlarm),
            16 => Ok(Self::SetAbsAlarm),
            17 => Ok(Self::CancelAlarm),
            _ => Err(()),
        }
    }
}

/// A decoded kernel request.
#[derive(Debug, Clone, Copy)]
pub enum Syscall<'a> {
    Debug(&'a str),
    Declare {
        entry: TaskEntry,
        priority: Priority,
        stack_words: usize,
        argument: i32,
    },
    ActivateTask(TaskId),
    TerminateTask,
    ChainTask(TaskId),
    GetTaskId,
    GetTaskState(TaskId),
    GetResource(ResourceId),
    ReleaseResource(ResourceId),
    SetEvent(TaskId, EventMask),
    ClearEvent(EventMask),
    GetEvent(TaskId),
    WaitEvent(EventMask),
    GetAlarmBase(AlarmId),
    GetAlarm(AlarmId),
    SetRelAlarm {
        alarm: AlarmId,
        increment: Tick,
        cycle: Tick,
    },
    SetAbsAlarm {
        alarm: AlarmId,
        start: Tick,
        cycle: Tick,
    },
    CancelAlarm(AlarmId),
}

impl<'a> Syscall<'a> {
    /// Decode trap number `nr` with argument words `args`.
    ///
    /// Unknown numbers are `NoFunc`; malformed arguments are `Value`.
    ///
    /// # Safety
    /// For `Debug`, `args[0..2]` must describe a byte slice that is valid for
    /// `'a`. For `Declare`, a non-zero `args[0]` must be the address of a
    /// function with the [`TaskEntry`] signature.
    pub unsafe fn decode(nr: usize, args: &[usize; 4]) -> Result<Self, KernelError> {
        let sysnum = Sysnum::try_from(nr).map_err(|_| KernelError::NoFunc)?;
        let [a0, a1, a2, a3] = *args;

        let call = match sysnum {
            Sysnum::Debug => {
                if a0 == 0 {
                    return Err(KernelError::Value);
                }
                let bytes = core::slice::from_raw_parts(a0 as *const u8, a1);
                let msg = core::str::from_utf8(bytes).map_err(|_| KernelError::Value)?;
                Syscall::Debug(msg)
            }
            Sysnum::Declare => {
                if a0 == 0 {
                    return Err(KernelError::Value);
                }
                Syscall::Declare {
                    entry: core::mem::transmute::<usize, TaskEntry>(a0),
                    priority: Priority::try_from(a1).map_err(|_| KernelError::Value)?,
                    stack_words: a2,
                    argument: a3 as i32,
                }
            }
            Sysnum::ActivateTask => Syscall::ActivateTask(TaskId(a0)),
            Sysnum::TerminateTask => Syscall::TerminateTask,
            Sysnum::ChainTask => Syscall::ChainTask(TaskId(a0)),
            Sysnum::GetTaskId => Syscall::GetTaskId,
            Sysnum::GetTaskState => Syscall::GetTaskState(TaskId(a0)),
            Sysnum::GetResource => Syscall::GetResource(ResourceId(a0)),
            Sysnum::ReleaseResource => Syscall::ReleaseResource(ResourceId(a0)),
            Sysnum::SetEvent => Syscall::SetEvent(TaskId(a0), a1 as EventMask),
            Sysnum::ClearEvent => Syscall::ClearEvent(a0 as EventMask),
            Sysnum::GetEvent => Syscall::GetEvent(TaskId(a0)),
            Sysnum::WaitEvent => Syscall::WaitEvent(a0 as EventMask),
            Sysnum::GetAlarmBase => Syscall::GetAlarmBase(AlarmId(a0)),
            Sysnum::GetAlarm => Syscall::GetAlarm(AlarmId(a0)),
            Sysnum::SetRelAlarm => Syscall::SetRelAlarm {
                alarm: AlarmId(a0),
                increment: a1 as Tick,
                cycle: a2 as Tick,
            },
            Sysnum::SetAbsAlarm => Syscall::SetAbsAlarm {
                alarm: AlarmId(a0),
                start: a1 as Tick,
                cycle: a2 as Tick,
            },
            Sysnum::CancelAlarm => Syscall::CancelAlarm(AlarmId(a0)),
        };
        Ok(call)
    }
}

/// Result of a successful call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Unit,
    Acquired(Acquire),
    Task(TaskId),
    State(TaskState),
    Events(EventMask),
    Ticks(Tick),
    AlarmBase(AlarmBase),
}

impl Reply {
    /// Register image for R0-R3.
    pub fn encode(self) -> [usize; 4] {
        match self {
            Reply::Unit => [E_OK, 0, 0, 0],
            Reply::Acquired(Acquire::Granted) => [E_OK, 0, 0, 0],
            Reply::Acquired(Acquire::Blocked) => [E_BLOCKED, 0, 0, 0],
            Reply::Task(id) => [E_OK, id.0, 0, 0],
            Reply::State(state) => [E_OK, state.as_word(), 0, 0],
            Reply::Events(mask) => [E_OK, mask as usize, 0, 0],
            Reply::Ticks(ticks) => [E_OK, ticks as usize, 0, 0],
            Reply::AlarmBase(base) => [
                E_OK,
                base.max_allowed_value as usize,
                base.ticks_per_base as usize,
                base.min_cycle as usize,
            ],
        }
    }
}

/// Register image for a call's outcome.
pub fn encode_result(result: Result<Reply, KernelError>) -> [usize; 4] {
    match result {
        Ok(reply) => reply.encode(),
        Err(e) => [e.code(), 0, 0, 0],
    }
}

/// Task side: split a returned status word into success or error.
pub fn check(status: usize) -> Result<usize, KernelError> {
    match KernelError::from_code(status) {
        Some(e) => Err(e),
        None => Ok(status),
    }
}
