//! # Hosted Port
//!
//! Runs the kernel inside an ordinary process. There are no registers to
//! swap: a context is the index of the primed frame in the task's stack,
//! and a "context switch" is the call to [`Kernel::dispatch_pending`] that
//! a test makes where the hardware would take PendSV.

use heapless::String;

use super::{prime_frame, Port};
use crate::kernel::Kernel;
use crate::task::{StackWord, TaskEntry};

/// Bytes of debug output kept by [`HostPort`].
pub const CONSOLE_BYTES: usize = 256;

/// Stack-word index of a task's saved frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostContext(pub usize);

#[derive(Debug, Default)]
pub struct HostPort {
    pending: bool,
    switch_requests: usize,
    /// Context restored by the last switch, i.e. what is "on the CPU".
    on_cpu: Option<HostContext>,
    console: String<CONSOLE_BYTES>,
}

impl HostPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// A switch has been requested and not yet run.
    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn take_pending(&mut self) -> bool {
        core::mem::replace(&mut self.pending, false)
    }

    /// Total number of switch requests since creation.
    pub fn switch_requests(&self) -> usize {
        self.switch_requests
    }

    /// Debug output so far. Messages past the capacity are cut off.
    pub fn console(&self) -> &str {
        &self.console
    }
}

impl Port for HostPort {
    type Context = HostContext;

    fn prime(stack: &mut [StackWord], entry: TaskEntry, arg: i32) -> HostContext {
        HostContext(prime_frame(stack, entry, arg))
    }

    fn request_switch(&mut self) {
        self.pending = true;
        self.switch_requests += 1;
    }

    fn debug(&mut self, msg: &str) {
        for c in msg.chars() {
            if self.console.push(c).is_err() {
                break;
            }
        }
    }
}

impl Kernel<HostPort> {
    /// Dispatch the first task, as the target port does when it starts.
    pub fn launch(&mut self) {
        self.port_mut().request_switch();
        self.dispatch_pending();
    }

    /// Run the context switch if one is pending. Returns whether it ran.
    pub fn dispatch_pending(&mut self) -> bool {
        if !self.port_mut().take_pending() {
            return false;
        }
        let outgoing = self.port().on_cpu.unwrap_or(HostContext(usize::MAX));
        let restored = self.switch_context(outgoing);
        self.port_mut().on_cpu = Some(restored);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_truncates() {
        let mut port = HostPort::new();
        port.debug("abc");
        assert_eq!(port.console(), "abc");
        for _ in 0..100 {
            port.debug("0123456789");
        }
        assert_eq!(port.console().len(), CONSOLE_BYTES);
    }

    #[test]
    fn test_switch_requests_are_counted() {
        let mut port = HostPort::new();
        port.request_switch();
        port.request_switch();
        assert!(port.take_pending());
        assert!(!port.take_pending());
        assert_eq!(port.switch_requests(), 2);
    }
}
