//! # Kernel Errors
//!
//! Every kernel operation reports failure through [`KernelError`]; nothing in
//! the kernel panics on a malformed request. Ids are validated before any
//! state is touched, so a failed call leaves the kernel unchanged.
//!
//! On the trap boundary each error travels as a status word. The numbering
//! follows the OSEK `StatusType` values where OSEK defines one.

use thiserror::Error;

/// Status word of a successful call.
pub const E_OK: usize = 0;

/// Status word of a successful `get_resource` that had to wait for the
/// resource before ownership was granted.
pub const E_BLOCKED: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    /// Task, resource, counter or alarm id outside its table, or a task slot
    /// that was never declared.
    #[error("invalid object id")]
    Id,

    /// Activating a task that is already ready, running or waiting.
    #[error("task already activated")]
    Limit,

    /// Releasing a resource the caller does not own.
    #[error("resource not owned by caller")]
    Ownership,

    /// Operating on a suspended task's events, or on an alarm in the wrong
    /// state.
    #[error("object in wrong state")]
    State,

    /// The caller is not entitled to the operation.
    #[error("operation not permitted")]
    NoFunc,

    /// Alarm increment, start or cycle outside the counter's range.
    #[error("value out of range")]
    Value,

    /// A static table is full or no stack memory is left.
    #[error("kernel table or stack memory exhausted")]
    Exhausted,
}

impl KernelError {
    /// Status word written into the caller's trap frame.
    pub const fn code(self) -> usize {
        match self {
            KernelError::Id => 3,
            KernelError::Limit => 4,
            KernelError::NoFunc => 5,
            KernelError::Ownership => 6,
            KernelError::State => 7,
            KernelError::Value => 8,
            KernelError::Exhausted => 9,
        }
    }

    /// Inverse of [`KernelError::code`]. Success codes map to `None`.
    pub const fn from_code(code: usize) -> Option<Self> {
        match code {
            3 => Some(KernelError::Id),
            4 => Some(KernelError::Limit),
            5 => Some(KernelError::NoFunc),
            6 => Some(KernelError::Ownership),
            7 => Some(KernelError::State),
            8 => Some(KernelError::Value),
            9 => Some(KernelError::Exhausted),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_from_success() {
        let all = [
            KernelError::Id,
            KernelError::Limit,
            KernelError::Ownership,
            KernelError::State,
            KernelError::NoFunc,
            KernelError::Value,
            KernelError::Exhausted,
        ];
        for e in all {
            assert_ne!(e.code(), E_OK);
            assert_ne!(e.code(), E_BLOCKED);
            assert_eq!(KernelError::from_code(e.code()), Some(e));
        }
        assert_eq!(KernelError::from_code(E_OK), None);
        assert_eq!(KernelError::from_code(E_BLOCKED), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            KernelError::Ownership.to_string(),
            "resource not owned by caller"
        );
    }
}
