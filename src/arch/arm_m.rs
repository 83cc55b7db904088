//! # ARMv7-M Port Layer
//!
//! Hardware-specific code for Cortex-M3/M4 class processors (Thumb-2).
//! Implements the system call trap via SVCall, context switching via
//! PendSV, the SysTick tick source and the first-task launch.
//!
//! ## Context Switch Mechanism
//!
//! The core uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry the hardware stacks R0-R3, R12, LR, PC and xPSR onto
//! the process stack. PendSV pushes R4-R11 below that, hands the resulting
//! PSP to the kernel as the outgoing context and gets back the PSP of the
//! task to resume. A task's context is therefore just its saved PSP.
//!
//! ## Interrupt Priorities
//!
//! - SVCall: priority 0 (reset default), so a trap is never delayed
//! - SysTick: lowest, serialized with the switch
//! - PendSV: lowest, runs only once no other handler is active
//!
//! A system call that makes a new decision pends PendSV, which tail-chains
//! after SVCall returns. Several decisions in one trap cost one switch.

use core::arch::global_asm;

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use super::{prime_frame, Port};
use crate::config::{IDLE_TASK, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::sync::KernelCell;
use crate::syscall;
use crate::task::{ExecContext, StackWord, TaskEntry};

/// The kernel instance the exception handlers operate on.
pub static KERNEL: KernelCell<ArmM> = KernelCell::new();

/// Number of words PendSV pushes by software (R4-R11).
const SOFTWARE_FRAME_WORDS: usize = 8;

/// Port for ARMv7-M cores. Stateless; the hardware is the state.
#[derive(Debug, Default)]
pub struct ArmM {
    _private: (),
}

impl ArmM {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Port for ArmM {
    /// Saved PSP, pointing at the R4 slot of the task's frame.
    type Context = usize;

    fn prime(stack: &mut [StackWord], entry: TaskEntry, arg: i32) -> usize {
        let start = prime_frame(stack, entry, arg);
        stack.as_ptr() as usize + start * core::mem::size_of::<StackWord>()
    }

    fn request_switch(&mut self) {
        SCB::set_pendsv();
    }

    fn debug(&mut self, msg: &str) {
        #[cfg(feature = "rt")]
        cortex_m_semihosting::hprint!("{}", msg);
        #[cfg(not(feature = "rt"))]
        let _ = msg;
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the core clock. Each tick
/// enters [`SysTick`], which drives the kernel's counters and alarms.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Put PendSV and SysTick at the lowest priority so the switch never
/// preempts another handler and a trap is never preempted by the tick.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Install `kernel` and hand the CPU to its first task. **Does not return.**
///
/// PSP is pointed at the idle task's primed frame so that the first PendSV
/// has somewhere harmless to push R4-R11. The kernel sees the idle task as
/// still primed and skips the save, then restores whatever it selected at
/// boot.
pub fn start(kernel: Kernel<ArmM>, mut syst: SYST, mut scb: SCB) -> ! {
    cortex_m::interrupt::disable();

    let idle_sp = match kernel.scheduler().task(IDLE_TASK).map(|t| t.context) {
        Ok(ExecContext::Primed(sp)) => sp,
        _ => loop {
            cortex_m::asm::wfi();
        },
    };
    KERNEL.install(kernel);

    set_interrupt_priorities(&mut scb);
    configure_systick(&mut syst);

    unsafe {
        cortex_m::register::psp::write((idle_sp + SOFTWARE_FRAME_WORDS * 4) as u32);
    }
    SCB::set_pendsv();
    unsafe {
        cortex_m::interrupt::enable();
    }

    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// SVCall handler (system call trap)
// ---------------------------------------------------------------------------

// Pass the stacked frame of whichever stack the caller used to the Rust
// entry. LR still holds EXC_RETURN, so the tail call returns from the
// exception.
global_asm!(
    ".section .text.SVCall",
    ".globl SVCall",
    ".type SVCall,function",
    ".thumb_func",
    "SVCall:",
    "tst lr, #4",
    "ite eq",
    "mrseq r0, msp",
    "mrsne r0, psp",
    "b {entry}",
    entry = sym ceros_svc_entry,
);

/// Decode the trap from the caller's exception frame and write the reply
/// over its stacked R0-R3.
///
/// # Safety
/// Only called from `SVCall` with a pointer to a hardware-stacked frame.
#[no_mangle]
unsafe extern "C" fn ceros_svc_entry(frame: *mut usize) {
    // The stacked PC points past the `svc #imm` instruction; the immediate
    // is its low byte.
    let pc = *frame.add(6);
    let nr = *((pc - 2) as *const u8) as usize;

    let mut words = [*frame, *frame.add(1), *frame.add(2), *frame.add(3)];
    let handled = KERNEL.with(|k| k.handle_trap(nr, &mut words));
    if handled.is_none() {
        words = syscall::encode_result(Err(KernelError::NoFunc));
    }

    for (idx, word) in words.iter().enumerate() {
        *frame.add(idx) = *word;
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// 1. Push R4-R11 onto the outgoing task's stack
// 2. Let the kernel swap the saved PSP for the incoming one
// 3. Pop R4-R11 from the incoming stack and return to Thread mode on PSP
global_asm!(
    ".section .text.PendSV",
    ".globl PendSV",
    ".type PendSV,function",
    ".thumb_func",
    "PendSV:",
    "mrs r0, psp",
    "stmdb r0!, {{r4-r11}}",
    "bl {entry}",
    "ldmia r0!, {{r4-r11}}",
    "msr psp, r0",
    "movw lr, #0xfffd",
    "movt lr, #0xffff",
    "bx lr",
    entry = sym ceros_pendsv_entry,
);

/// Commit the pending scheduling decision. Returns the PSP to resume.
#[no_mangle]
extern "C" fn ceros_pendsv_entry(outgoing: usize) -> usize {
    KERNEL
        .with(|k| k.switch_context(outgoing))
        .unwrap_or(outgoing)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: the kernel tick.
#[no_mangle]
pub extern "C" fn SysTick() {
    KERNEL.with(|k| k.tick());
}
