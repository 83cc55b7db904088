//! # Architecture Abstraction Layer
//!
//! The kernel never touches registers. Everything machine specific sits
//! behind [`Port`]: how a fresh stack is primed, how a context switch is
//! requested, and where debug output goes. A context is an opaque handle
//! the port hands out when priming and gets back when switching.
//!
//! Two ports exist. `arm_m` drives ARMv7-M parts (PendSV, SVCall and
//! SysTick) and is only built for bare-metal ARM targets; `hosted` runs the
//! kernel in an ordinary process so the whole thing can be tested with
//! `cargo test`.

use crate::task::{StackWord, TaskEntry};

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        pub mod arm_m;
        pub use self::arm_m::ArmM as DefaultPort;
    } else {
        pub mod hosted;
        pub use self::hosted::HostPort as DefaultPort;
    }
}

/// Machine services used by the kernel.
pub trait Port {
    /// Saved execution context of a task that is not on the CPU.
    type Context: Copy + core::fmt::Debug;

    /// Lay out an initial exception frame in `stack` so that restoring the
    /// returned context starts `entry(arg)`.
    fn prime(stack: &mut [StackWord], entry: TaskEntry, arg: i32) -> Self::Context;

    /// Arrange for the context switch to run once the kernel is left.
    fn request_switch(&mut self);

    /// Emit a debug message on the port's console.
    fn debug(&mut self, msg: &str);
}

// ---------------------------------------------------------------------------
// Exception frame
// ---------------------------------------------------------------------------

/// Words in a full saved frame: R4-R11 pushed by the switch handler, then
/// R0-R3, R12, LR, PC and xPSR stacked by the hardware.
pub const FRAME_WORDS: usize = 16;

/// Frame slots, relative to the start of the frame.
pub const FRAME_R0: usize = 8;
pub const FRAME_LR: usize = 13;
pub const FRAME_PC: usize = 14;
pub const FRAME_XPSR: usize = 15;

/// Thread-mode xPSR with only the Thumb bit set.
pub const INITIAL_XPSR: StackWord = 0x0100_0000;

/// Smallest stack a task may be given: one frame plus room to run.
pub const MIN_STACK_WORDS: usize = 2 * FRAME_WORDS;

/// Landing pad for a task entry that returns despite its `!` signature.
extern "C" fn task_returned() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Write an initial frame at the 8-byte aligned top of `stack` and return
/// the index of its first word (the R4 slot).
///
/// R4-R12 are zeroed, R0 carries `arg`, PC is the entry point and LR traps a
/// task that returns. A stack shorter than a frame gets index 0 and a frame
/// clipped to the slice; configuration rejects such stacks beforehand.
pub fn prime_frame(stack: &mut [StackWord], entry: TaskEntry, arg: i32) -> usize {
    const WORD: usize = core::mem::size_of::<StackWord>();

    let base = stack.as_ptr() as usize;
    let top = base + stack.len() * WORD;
    let aligned_words = (top & !7).saturating_sub(base) / WORD;
    let start = aligned_words.saturating_sub(FRAME_WORDS);

    let mut frame = [0 as StackWord; FRAME_WORDS];
    frame[FRAME_R0] = arg as u32 as StackWord;
    frame[FRAME_LR] = task_returned as usize;
    frame[FRAME_PC] = entry as usize & !1;
    frame[FRAME_XPSR] = INITIAL_XPSR;

    for (slot, word) in stack[start..].iter_mut().zip(frame) {
        *slot = word;
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::spin;

    #[test]
    fn test_frame_layout() {
        let mut stack = vec![0xAAAA as StackWord; 64];
        let start = prime_frame(&mut stack, spin, -1);

        assert!(start + FRAME_WORDS <= stack.len());
        assert_eq!(stack.len() - (start + FRAME_WORDS), {
            let top = stack.as_ptr() as usize + stack.len() * core::mem::size_of::<StackWord>();
            (top % 8) / core::mem::size_of::<StackWord>()
        });

        let frame = &stack[start..start + FRAME_WORDS];
        assert!(frame[..FRAME_R0].iter().all(|&w| w == 0));
        assert_eq!(frame[FRAME_R0], 0xFFFF_FFFF);
        assert_eq!(frame[FRAME_PC], spin as usize & !1);
        assert_eq!(frame[FRAME_XPSR], INITIAL_XPSR);
        // Words below the frame are untouched.
        assert_eq!(stack[start - 1], 0xAAAA);
    }

    #[test]
    fn test_short_stack_does_not_panic() {
        let mut stack = vec![0 as StackWord; 4];
        assert_eq!(prime_frame(&mut stack, spin, 0), 0);
    }
}
