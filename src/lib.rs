//! # Ceros: a ceiling-protocol RTOS kernel
//!
//! A small preemptive real-time kernel for single-core ARM Cortex-M
//! microcontrollers, built around the classic OSEK primitives: statically
//! configured tasks scheduled by priority, mutual-exclusion resources that
//! follow the priority ceiling protocol, per-task event flags, and alarms
//! driven by tick counters.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! │           api.rs: `svc` stubs (bare metal only)         │
//! ├────────────────────────────────────────────────────────┤
//! │        Syscall trap & dispatch (syscall.rs)             │
//! │     Sysnum · Syscall::decode · Reply::encode            │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel (kernel.rs)                      │
//! │   activate · terminate · chain · tick · switch_context  │
//! ├──────────────┬──────────────┬─────────────┬────────────┤
//! │  Scheduler   │  Resources   │   Events    │   Alarms   │
//! │ scheduler.rs │ resource.rs  │  event.rs   │  alarm.rs  │
//! ├──────────────┴──────────────┴─────────────┴────────────┤
//! │              Task Model (task.rs)                       │
//! │        TCB · TaskState · ExecContext · TaskConfig       │
//! ├────────────────────────────────────────────────────────┤
//! │        Ports (arch/arm_m.rs · arch/hosted.rs)           │
//! │    PendSV · SVCall · SysTick · Stack priming            │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution Model
//!
//! Exactly one task runs at a time. Every privileged operation happens in
//! exception context (`SVCall` for system calls, `SysTick` for the tick)
//! while holding a critical section, so the kernel state is always accessed
//! through an exclusive `&mut Kernel`. Scheduling is split in two phases:
//! the scheduler *decides* which task runs next and pends `PendSV`; the
//! `PendSV` handler later *commits* that decision by swapping register
//! contexts. Several decisions taken in one trap therefore cost only one
//! register save/restore.
//!
//! ## Memory Model
//!
//! - **No heap**: every table is a fixed-capacity array sized in `config.rs`
//! - **Stacks**: each task owns a `&'static mut` slice, either handed over in
//!   the boot configuration or obtained from a [`task::StackAllocator`]
//! - **Wait queues**: task ids in `heapless::Deque`s, never raw links

#![cfg_attr(not(test), no_std)]

pub mod alarm;
pub mod arch;
pub mod config;
pub mod error;
pub mod event;
pub mod kernel;
pub mod resource;
pub mod scheduler;
pub mod sync;
pub mod syscall;
pub mod task;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod api;

pub use error::KernelError;
pub use kernel::Kernel;
