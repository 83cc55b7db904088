//! # Ceros Configuration
//!
//! Compile-time capacities and the boot-time object tables.
//! All limits are fixed at compile time; there is no dynamic allocation.

use heapless::Vec;

use crate::alarm::{AlarmAction, AlarmBase, AlarmConfig, CounterId, AlarmId, Tick};
use crate::error::KernelError;
use crate::resource::{ResourceConfig, ResourceId};
use crate::task::{Priority, TaskConfig, TaskId};

/// Maximum number of task slots, idle task included. Slots not filled by the
/// boot configuration stay FREE and can be claimed by `declare`.
pub const MAX_TASKS: usize = 8;

/// Maximum number of mutual-exclusion resources.
pub const MAX_RESOURCES: usize = 4;

/// Maximum number of counters fed by the tick source.
pub const MAX_COUNTERS: usize = 2;

/// Maximum number of alarms.
pub const MAX_ALARMS: usize = 8;

/// Least urgent priority. Lower numbers are more urgent; the idle task
/// normally runs at this level.
pub const PRI_MAX: Priority = 255;

/// The idle (bottom) task always occupies slot 0 and never blocks.
pub const IDLE_TASK: TaskId = TaskId(0);

/// Wrap point of the free-running tick counter.
pub const TICK_MAX: Tick = Tick::MAX;

/// Stack words given to the idle task by the demo firmware.
pub const IDLE_STACK_WORDS: usize = 128;

/// SysTick frequency in Hz.
pub const TICK_HZ: u32 = 100;

/// Core clock of the LM3S6965 running from its PLL.
pub const SYSTEM_CLOCK_HZ: u32 = 50_000_000;

/// Counter characteristics used when a board does not specify its own:
/// full tick range, one count every ten ticks.
pub const DEFAULT_ALARM_BASE: AlarmBase = AlarmBase {
    max_allowed_value: TICK_MAX,
    ticks_per_base: 10,
    min_cycle: 1,
};

/// Static object tables consumed by [`crate::Kernel::new`].
///
/// Built with checked methods so that every id handed out is valid and every
/// alarm refers to an existing counter and task.
///
/// ```ignore
/// let mut cfg = KernelConfig::new(TaskConfig::new(idle, PRI_MAX, idle_stack));
/// let worker = cfg.task(TaskConfig::new(worker_fn, 3, worker_stack))?;
/// let bus = cfg.resource(0)?;
/// let counter = cfg.counter(DEFAULT_ALARM_BASE)?;
/// let poll = cfg.alarm(counter, AlarmAction::ActivateTask(worker))?;
/// ```
#[derive(Debug)]
pub struct KernelConfig {
    pub(crate) tasks: Vec<TaskConfig, MAX_TASKS>,
    pub(crate) resources: Vec<ResourceConfig, MAX_RESOURCES>,
    pub(crate) counters: Vec<AlarmBase, MAX_COUNTERS>,
    pub(crate) alarms: Vec<AlarmConfig, MAX_ALARMS>,
}

impl KernelConfig {
    /// Start a configuration whose slot 0 is the idle task. The idle task is
    /// always started; its `autostart` flag is ignored.
    pub fn new(idle: TaskConfig) -> Self {
        let mut tasks = Vec::new();
        // Capacity is at least one, the push cannot fail.
        let _ = tasks.push(idle);
        Self {
            tasks,
            resources: Vec::new(),
            counters: Vec::new(),
            alarms: Vec::new(),
        }
    }

    /// Add a task. Fails with `Exhausted` once `MAX_TASKS` slots are taken.
    pub fn task(&mut self, task: TaskConfig) -> Result<TaskId, KernelError> {
        let id = TaskId(self.tasks.len());
        self.tasks.push(task).map_err(|_| KernelError::Exhausted)?;
        Ok(id)
    }

    /// Add a resource with the given ceiling priority.
    pub fn resource(&mut self, ceiling: Priority) -> Result<ResourceId, KernelError> {
        let id = ResourceId(self.resources.len());
        self.resources
            .push(ResourceConfig { ceiling })
            .map_err(|_| KernelError::Exhausted)?;
        Ok(id)
    }

    /// Add a counter. `ticks_per_base` must be non-zero and `min_cycle` must
    /// not exceed `max_allowed_value`.
    pub fn counter(&mut self, base: AlarmBase) -> Result<CounterId, KernelError> {
        if base.ticks_per_base == 0 || base.min_cycle > base.max_allowed_value {
            return Err(KernelError::Value);
        }
        let id = CounterId(self.counters.len());
        self.counters.push(base).map_err(|_| KernelError::Exhausted)?;
        Ok(id)
    }

    /// Add an alarm bound to `counter`. Task ids named by the action must
    /// already be configured.
    pub fn alarm(
        &mut self,
        counter: CounterId,
        action: AlarmAction,
    ) -> Result<AlarmId, KernelError> {
        if counter.0 >= self.counters.len() {
            return Err(KernelError::Id);
        }
        match action {
            AlarmAction::ActivateTask(task) | AlarmAction::SetEvent(task, _)
                if task.0 >= self.tasks.len() =>
            {
                return Err(KernelError::Id);
            }
            _ => {}
        }
        let id = AlarmId(self.alarms.len());
        self.alarms
            .push(AlarmConfig { counter, action })
            .map_err(|_| KernelError::Exhausted)?;
        Ok(id)
    }

    /// Number of configured tasks, idle task included.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::{leak_stack, spin};

    fn idle() -> TaskConfig {
        TaskConfig::new(spin, PRI_MAX, leak_stack(32))
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut cfg = KernelConfig::new(idle());
        assert_eq!(cfg.task(TaskConfig::new(spin, 1, leak_stack(32))), Ok(TaskId(1)));
        assert_eq!(cfg.task(TaskConfig::new(spin, 2, leak_stack(32))), Ok(TaskId(2)));
        assert_eq!(cfg.resource(0), Ok(ResourceId(0)));
        assert_eq!(cfg.counter(DEFAULT_ALARM_BASE), Ok(CounterId(0)));
        assert_eq!(cfg.task_count(), 3);
    }

    #[test]
    fn test_task_table_exhaustion() {
        let mut cfg = KernelConfig::new(idle());
        for _ in 1..MAX_TASKS {
            assert!(cfg.task(TaskConfig::new(spin, 1, leak_stack(32))).is_ok());
        }
        assert_eq!(
            cfg.task(TaskConfig::new(spin, 1, leak_stack(32))),
            Err(KernelError::Exhausted)
        );
    }

    #[test]
    fn test_alarm_binding_is_validated() {
        let mut cfg = KernelConfig::new(idle());
        assert_eq!(
            cfg.alarm(CounterId(0), AlarmAction::ActivateTask(TaskId(0))),
            Err(KernelError::Id)
        );
        let counter = cfg.counter(DEFAULT_ALARM_BASE).unwrap();
        assert_eq!(
            cfg.alarm(counter, AlarmAction::SetEvent(TaskId(5), 1)),
            Err(KernelError::Id)
        );
        assert_eq!(
            cfg.alarm(counter, AlarmAction::ActivateTask(TaskId(0))),
            Ok(AlarmId(0))
        );
    }

    #[test]
    fn test_counter_rejects_zero_ticks_per_base() {
        let mut cfg = KernelConfig::new(idle());
        let base = AlarmBase {
            max_allowed_value: 100,
            ticks_per_base: 0,
            min_cycle: 1,
        };
        assert_eq!(cfg.counter(base), Err(KernelError::Value));
    }
}
