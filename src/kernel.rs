//! # Kernel
//!
//! The single kernel-state object and every operation a task or interrupt
//! can request from it.
//!
//! A [`Kernel`] owns the task table (through the [`Scheduler`]), the
//! resources, the counters and alarms, and the [`Port`] it runs on. Every
//! operation takes `&mut self`; exclusive access is what the interrupt
//! masking in [`crate::sync::KernelCell`] buys, so nothing in here needs a
//! lock of its own. Operations act on behalf of the task on the CPU.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset (cortex-m-rt)
//!   └─► main()
//!         ├─► KernelConfig::new / task / resource / counter / alarm
//!         ├─► Kernel::new()        ← declare tasks, prime autostart tasks,
//!         │                          take the first scheduling decision
//!         └─► arch::arm_m::start()  ← SysTick, priorities, first PendSV
//!               └─► PendSV commits the decision (no return)
//! ```

use heapless::Vec;
use log::{debug, info, warn};

use crate::alarm::{AlarmAction, AlarmBase, AlarmId, AlarmTable, Tick};
use crate::arch::{Port, MIN_STACK_WORDS};
use crate::config::{KernelConfig, IDLE_TASK, MAX_TASKS};
use crate::error::KernelError;
use crate::event::EventMask;
use crate::resource::{Acquire, ResourceId, ResourceTable};
use crate::scheduler::Scheduler;
use crate::syscall::{self, Reply, Syscall};
use crate::task::{Priority, StackAllocator, TaskConfig, TaskEntry, TaskId, TaskState};

/// The subset of kernel services that interrupt handlers and alarm
/// callbacks may use. Neither call blocks.
pub trait IsrServices {
    fn activate_task(&mut self, id: TaskId) -> Result<(), KernelError>;
    fn set_event(&mut self, id: TaskId, mask: EventMask) -> Result<(), KernelError>;
}

pub struct Kernel<P: Port> {
    port: P,
    sched: Scheduler<P::Context>,
    resources: ResourceTable,
    alarms: AlarmTable,
    /// Stack source for `declare`. Without one, declaration is refused.
    heap: Option<&'static mut dyn StackAllocator>,
}

impl<P: Port> Kernel<P> {
    /// Build the kernel from its static configuration.
    ///
    /// The idle task and every autostart task are activated and the first
    /// scheduling decision is taken, but nothing runs until the port
    /// commits that decision. No switch is requested here: the port does
    /// that when it starts.
    pub fn new(config: KernelConfig, port: P) -> Result<Self, KernelError> {
        let KernelConfig {
            tasks,
            resources,
            counters,
            alarms,
        } = config;

        let mut kernel = Self {
            port,
            sched: Scheduler::new(),
            resources: ResourceTable::from_config(&resources)?,
            alarms: AlarmTable::from_config(&counters, &alarms)?,
            heap: None,
        };

        let task_count = tasks.len();
        let mut autostart: Vec<TaskId, MAX_TASKS> = Vec::new();
        for (idx, task) in tasks.into_iter().enumerate() {
            if task.stack.len() < MIN_STACK_WORDS {
                return Err(KernelError::Value);
            }
            let id = TaskId(idx);
            if id == IDLE_TASK || task.autostart {
                autostart.push(id).map_err(|_| KernelError::Exhausted)?;
            }
            kernel
                .sched
                .slot_mut(id)
                .ok_or(KernelError::Exhausted)?
                .declare(task);
        }

        for id in autostart {
            kernel.sched.task_mut(id)?.activate(P::prime)?;
        }
        kernel.sched.reschedule();

        info!(
            "ceros: {} tasks, {} resources, {} alarms, first task {:?}",
            task_count,
            resources.len(),
            alarms.len(),
            kernel.sched.selected()
        );
        Ok(kernel)
    }

    /// Install the stack source used by [`Kernel::declare`].
    pub fn set_stack_allocator(&mut self, heap: &'static mut dyn StackAllocator) {
        self.heap = Some(heap);
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn scheduler(&self) -> &Scheduler<P::Context> {
        &self.sched
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn alarms(&self) -> &AlarmTable {
        &self.alarms
    }

    /// Decide, and ask the port for a switch if the decision needs one.
    fn reschedule(&mut self) {
        if self.sched.reschedule() {
            self.port.request_switch();
        }
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Claim a FREE slot for a new SUSPENDED task with a freshly allocated
    /// stack.
    pub fn declare(
        &mut self,
        entry: TaskEntry,
        priority: Priority,
        stack_words: usize,
        argument: i32,
    ) -> Result<TaskId, KernelError> {
        let heap = self.heap.as_deref_mut().ok_or(KernelError::NoFunc)?;
        let slot = self.sched.free_slot().ok_or(KernelError::Exhausted)?;
        let stack = heap
            .alloc(stack_words.max(MIN_STACK_WORDS))
            .ok_or(KernelError::Exhausted)?;

        let id = slot.id;
        slot.declare(TaskConfig::new(entry, priority, stack).argument(argument));
        debug!("declared {:?} at prio {}", id, priority);
        Ok(id)
    }

    pub fn activate_task(&mut self, id: TaskId) -> Result<(), KernelError> {
        self.sched.task_mut(id)?.activate(P::prime)?;
        debug!("activated {:?}", id);
        self.reschedule();
        Ok(())
    }

    /// End the calling task. Everything it owns is released first.
    pub fn terminate_task(&mut self) -> Result<(), KernelError> {
        let caller = self.sched.current();
        if caller == IDLE_TASK {
            return Err(KernelError::NoFunc);
        }
        self.end(caller)?;
        self.reschedule();
        Ok(())
    }

    /// End the calling task and activate `id` in one step.
    ///
    /// The target may be the caller itself, which restarts it.
    pub fn chain_task(&mut self, id: TaskId) -> Result<(), KernelError> {
        let caller = self.sched.current();
        if caller == IDLE_TASK {
            return Err(KernelError::NoFunc);
        }
        let target = self.sched.task(id)?;
        if id != caller && target.state != TaskState::Suspended {
            return Err(KernelError::Limit);
        }

        self.end(caller)?;
        self.sched.task_mut(id)?.activate(P::prime)?;
        debug!("{:?} chained to {:?}", caller, id);
        self.reschedule();
        Ok(())
    }

    fn end(&mut self, task: TaskId) -> Result<(), KernelError> {
        self.resources.release_all(&mut self.sched, task);
        self.sched.task_mut(task)?.terminate();
        debug!("terminated {:?}", task);
        Ok(())
    }

    pub fn get_task_id(&self) -> TaskId {
        self.sched.current()
    }

    pub fn get_task_state(&self, id: TaskId) -> Result<TaskState, KernelError> {
        Ok(self.sched.slot(id)?.state)
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    pub fn get_resource(&mut self, id: ResourceId) -> Result<Acquire, KernelError> {
        let caller = self.sched.current();
        let outcome = self.resources.acquire(id, &mut self.sched, caller)?;
        self.reschedule();
        Ok(outcome)
    }

    pub fn release_resource(&mut self, id: ResourceId) -> Result<(), KernelError> {
        let caller = self.sched.current();
        self.resources.release(id, &mut self.sched, caller)?;
        self.reschedule();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn set_event(&mut self, id: TaskId, mask: EventMask) -> Result<(), KernelError> {
        if self.sched.set_event(id, mask)? {
            self.reschedule();
        }
        Ok(())
    }

    pub fn clear_event(&mut self, mask: EventMask) {
        self.sched.clear_event(mask);
    }

    pub fn get_event(&self, id: TaskId) -> Result<EventMask, KernelError> {
        self.sched.get_event(id)
    }

    pub fn wait_event(&mut self, mask: EventMask) -> Result<(), KernelError> {
        if self.sched.wait_event(mask)? {
            self.reschedule();
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Alarms
    // -----------------------------------------------------------------------

    pub fn get_alarm_base(&self, id: AlarmId) -> Result<AlarmBase, KernelError> {
        self.alarms.get_alarm_base(id)
    }

    pub fn get_alarm(&self, id: AlarmId) -> Result<Tick, KernelError> {
        self.alarms.get_alarm(id)
    }

    pub fn set_rel_alarm(&mut self, id: AlarmId, increment: Tick, cycle: Tick) -> Result<(), KernelError> {
        self.alarms.set_rel(id, increment, cycle)
    }

    pub fn set_abs_alarm(&mut self, id: AlarmId, start: Tick, cycle: Tick) -> Result<(), KernelError> {
        self.alarms.set_abs(id, start, cycle)
    }

    pub fn cancel_alarm(&mut self, id: AlarmId) -> Result<(), KernelError> {
        self.alarms.cancel(id)
    }

    /// Timer interrupt: expire alarms and run their actions, then advance
    /// the counters and the free-running tick.
    ///
    /// Action failures (activating an already active task, for instance)
    /// are logged and dropped; the tick itself never fails.
    pub fn tick(&mut self) {
        for action in self.alarms.expire() {
            if let Err(e) = self.run_action(action) {
                warn!("alarm action {:?} failed: {}", action, e);
            }
        }
        self.alarms.advance();
    }

    fn run_action(&mut self, action: AlarmAction) -> Result<(), KernelError> {
        match action {
            AlarmAction::ActivateTask(id) => self.activate_task(id),
            AlarmAction::SetEvent(id, mask) => self.set_event(id, mask),
            AlarmAction::Callback(callback) => {
                callback(self);
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Trap and switch entry points
    // -----------------------------------------------------------------------

    /// Print a task's debug message on the port console.
    pub fn debug(&mut self, msg: &str) {
        debug!("{:?}: {}", self.sched.current(), msg);
        self.port.debug(msg);
    }

    /// Commit the latest scheduling decision. Called by the port's
    /// context-switch handler with the outgoing context.
    pub fn switch_context(&mut self, outgoing: P::Context) -> P::Context {
        self.sched.switch_context(outgoing)
    }

    /// Execute one decoded system call.
    pub fn dispatch(&mut self, call: Syscall<'_>) -> Result<Reply, KernelError> {
        match call {
            Syscall::Debug(msg) => {
                self.debug(msg);
                Ok(Reply::Unit)
            }
            Syscall::Declare {
                entry,
                priority,
                stack_words,
                argument,
            } => self
                .declare(entry, priority, stack_words, argument)
                .map(Reply::Task),
            Syscall::ActivateTask(id) => self.activate_task(id).map(|()| Reply::Unit),
            Syscall::TerminateTask => self.terminate_task().map(|()| Reply::Unit),
            Syscall::ChainTask(id) => self.chain_task(id).map(|()| Reply::Unit),
            Syscall::GetTaskId => Ok(Reply::Task(self.get_task_id())),
            Syscall::GetTaskState(id) => self.get_task_state(id).map(Reply::State),
            Syscall::GetResource(id) => self.get_resource(id).map(Reply::Acquired),
            Syscall::ReleaseResource(id) => self.release_resource(id).map(|()| Reply::Unit),
            Syscall::SetEvent(id, mask) => self.set_event(id, mask).map(|()| Reply::Unit),
            Syscall::ClearEvent(mask) => {
                self.clear_event(mask);
                Ok(Reply::Unit)
            }
            Syscall::GetEvent(id) => self.get_event(id).map(Reply::Events),
            Syscall::WaitEvent(mask) => self.wait_event(mask).map(|()| Reply::Unit),
            Syscall::GetAlarmBase(id) => self.get_alarm_base(id).map(Reply::AlarmBase),
            Syscall::GetAlarm(id) => self.get_alarm(id).map(Reply::Ticks),
            Syscall::SetRelAlarm {
                alarm,
                increment,
                cycle,
            } => self
                .set_rel_alarm(alarm, increment, cycle)
                .map(|()| Reply::Unit),
            Syscall::SetAbsAlarm { alarm, start, cycle } => self
                .set_abs_alarm(alarm, start, cycle)
                .map(|()| Reply::Unit),
            Syscall::CancelAlarm(id) => self.cancel_alarm(id).map(|()| Reply::Unit),
        }
    }

    /// Raw trap entry: decode `nr` and `words`, run the call and overwrite
    /// `words` with the reply.
    ///
    /// # Safety
    /// `words` must come from the caller's trap frame; see
    /// [`Syscall::decode`] for the pointer arguments it may carry.
    pub unsafe fn handle_trap(&mut self, nr: usize, words: &mut [usize; 4]) {
        let result = match Syscall::decode(nr, words) {
            Ok(call) => self.dispatch(call),
            Err(e) => Err(e),
        };
        *words = syscall::encode_result(result);
    }
}

impl<P: Port> IsrServices for Kernel<P> {
    fn activate_task(&mut self, id: TaskId) -> Result<(), KernelError> {
        Kernel::activate_task(self, id)
    }

    fn set_event(&mut self, id: TaskId, mask: EventMask) -> Result<(), KernelError> {
        Kernel::set_event(self, id, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::HostPort;
    use crate::config::PRI_MAX;
    use crate::error::{E_BLOCKED, E_OK};
    use crate::syscall::Sysnum;
    use crate::task::testing::{leak_stack, spin};
    use crate::task::StackWord;

    const BASE: AlarmBase = AlarmBase {
        max_allowed_value: 1000,
        ticks_per_base: 1,
        min_cycle: 1,
    };

    /// idle, t1 (prio 3, autostart), t2 (prio 1), t3 (prio 3); one resource
    /// with ceiling 1; one alarm activating t2.
    fn kernel() -> Kernel<HostPort> {
        let mut cfg = KernelConfig::new(TaskConfig::new(spin, PRI_MAX, leak_stack(64)));
        cfg.task(TaskConfig::new(spin, 3, leak_stack(64)).autostart())
            .unwrap();
        cfg.task(TaskConfig::new(spin, 1, leak_stack(64))).unwrap();
        cfg.task(TaskConfig::new(spin, 3, leak_stack(64))).unwrap();
        cfg.resource(1).unwrap();
        let counter = cfg.counter(BASE).unwrap();
        cfg.alarm(counter, AlarmAction::ActivateTask(TaskId(2))).unwrap();

        let mut k = Kernel::new(cfg, HostPort::new()).unwrap();
        k.launch();
        k
    }

    fn state(k: &Kernel<HostPort>, id: usize) -> TaskState {
        k.get_task_state(TaskId(id)).unwrap()
    }

    #[test]
    fn test_boot_runs_autostart_task() {
        let k = kernel();
        assert_eq!(k.get_task_id(), TaskId(1));
        assert_eq!(state(&k, 0), TaskState::Ready);
        assert_eq!(state(&k, 1), TaskState::Running);
        assert_eq!(state(&k, 2), TaskState::Suspended);
    }

    #[test]
    fn test_free_slot_reports_state() {
        let mut k = kernel();
        assert_eq!(k.get_task_state(TaskId(5)), Ok(TaskState::Free));
        assert_eq!(k.set_event(TaskId(5), 1), Err(KernelError::State));
        assert_eq!(k.get_event(TaskId(5)), Err(KernelError::State));
        assert_eq!(k.get_task_state(TaskId(MAX_TASKS)), Err(KernelError::Id));

        let mut words = [5, 0, 0, 0];
        unsafe { k.handle_trap(Sysnum::GetTaskState as usize, &mut words) };
        assert_eq!(words, [E_OK, TaskState::Free.as_word(), 0, 0]);
    }

    #[test]
    fn test_short_stack_rejected() {
        let cfg = KernelConfig::new(TaskConfig::new(spin, PRI_MAX, leak_stack(8)));
        assert_eq!(
            Kernel::new(cfg, HostPort::new()).err(),
            Some(KernelError::Value)
        );
    }

    #[test]
    fn test_activation_preempts() {
        let mut k = kernel();
        k.activate_task(TaskId(2)).unwrap();
        assert!(k.dispatch_pending());
        assert_eq!(k.get_task_id(), TaskId(2));
        assert_eq!(state(&k, 1), TaskState::Ready);

        assert_eq!(k.activate_task(TaskId(1)), Err(KernelError::Limit));
        assert_eq!(k.activate_task(TaskId(7)), Err(KernelError::Id));
    }

    #[test]
    fn test_terminate_returns_cpu() {
        let mut k = kernel();
        k.terminate_task().unwrap();
        assert!(k.dispatch_pending());
        assert_eq!(k.get_task_id(), IDLE_TASK);
        assert_eq!(state(&k, 1), TaskState::Suspended);

        assert_eq!(k.terminate_task(), Err(KernelError::NoFunc));
        assert_eq!(k.chain_task(TaskId(1)), Err(KernelError::NoFunc));
    }

    #[test]
    fn test_terminate_releases_resources() {
        let mut k = kernel();
        k.activate_task(TaskId(3)).unwrap();
        assert_eq!(k.get_resource(ResourceId(0)), Ok(Acquire::Granted));
        assert_eq!(k.scheduler().task(TaskId(1)).unwrap().priority, 1);

        k.terminate_task().unwrap();
        assert_eq!(k.resources().get(ResourceId(0)).unwrap().owner(), None);
        assert_eq!(k.scheduler().task(TaskId(1)).unwrap().priority, 3);
        k.dispatch_pending();
        assert_eq!(k.get_task_id(), TaskId(3));
    }

    #[test]
    fn test_chain() {
        let mut k = kernel();
        k.activate_task(TaskId(3)).unwrap();
        assert_eq!(k.chain_task(TaskId(3)), Err(KernelError::Limit));

        k.chain_task(TaskId(2)).unwrap();
        assert_eq!(state(&k, 1), TaskState::Suspended);
        k.dispatch_pending();
        assert_eq!(k.get_task_id(), TaskId(2));
    }

    #[test]
    fn test_chain_to_self_restarts() {
        let mut k = kernel();
        k.port_mut().take_pending();
        k.chain_task(TaskId(1)).unwrap();
        assert!(k.port().pending());
        k.dispatch_pending();
        assert_eq!(k.get_task_id(), TaskId(1));
        assert_eq!(
            k.scheduler().task(TaskId(1)).unwrap().context,
            crate::task::ExecContext::OnCpu
        );
    }

    #[test]
    fn test_declare_needs_allocator() {
        struct Leaky;
        impl StackAllocator for Leaky {
            fn alloc(&mut self, words: usize) -> Option<&'static mut [StackWord]> {
                Some(leak_stack(words))
            }
        }

        let mut k = kernel();
        assert_eq!(k.declare(spin, 2, 64, 0), Err(KernelError::NoFunc));

        k.set_stack_allocator(Box::leak(Box::new(Leaky)));
        let id = k.declare(spin, 2, 8, 42).unwrap();
        assert_eq!(id, TaskId(4));
        assert_eq!(state(&k, 4), TaskState::Suspended);
        let stack_len = k.scheduler().task(id).unwrap().stack().map(|s| s.len());
        assert_eq!(stack_len, Some(MIN_STACK_WORDS));

        for _ in 5..MAX_TASKS {
            k.declare(spin, 2, 64, 0).unwrap();
        }
        assert_eq!(k.declare(spin, 2, 64, 0), Err(KernelError::Exhausted));
    }

    #[test]
    fn test_alarm_activates_task() {
        let mut k = kernel();
        k.set_rel_alarm(AlarmId(0), 2, 0).unwrap();
        for _ in 0..4 {
            k.tick();
        }
        assert_eq!(state(&k, 2), TaskState::Running);
        assert!(k.dispatch_pending());
        assert_eq!(k.get_task_id(), TaskId(2));
    }

    #[test]
    fn test_callback_uses_isr_services() {
        fn wake(services: &mut dyn IsrServices) {
            let _ = services.activate_task(TaskId(3));
            let _ = services.set_event(TaskId(3), 0b100);
        }

        let mut cfg = KernelConfig::new(TaskConfig::new(spin, PRI_MAX, leak_stack(64)));
        cfg.task(TaskConfig::new(spin, 3, leak_stack(64))).unwrap();
        cfg.task(TaskConfig::new(spin, 3, leak_stack(64))).unwrap();
        cfg.task(TaskConfig::new(spin, 2, leak_stack(64))).unwrap();
        let counter = cfg.counter(BASE).unwrap();
        cfg.alarm(counter, AlarmAction::Callback(wake)).unwrap();
        let mut k = Kernel::new(cfg, HostPort::new()).unwrap();
        k.launch();

        k.set_abs_alarm(AlarmId(0), 0, 0).unwrap();
        k.tick();
        assert_eq!(state(&k, 3), TaskState::Running);
        assert_eq!(k.get_event(TaskId(3)), Ok(0b100));
    }

    #[test]
    fn test_failed_alarm_action_is_dropped() {
        let mut k = kernel();
        k.activate_task(TaskId(2)).unwrap();
        k.set_rel_alarm(AlarmId(0), 0, 0).unwrap();
        // Task 2 is already active; the tick must shrug that off.
        k.tick();
        assert_eq!(k.alarms().free_tick(), 1);
        assert!(k.alarms().alarm(AlarmId(0)).unwrap().expired);
    }

    #[test]
    fn test_trap_round_trip() {
        let mut k = kernel();

        let mut words = [0; 4];
        unsafe { k.handle_trap(Sysnum::GetTaskId as usize, &mut words) };
        assert_eq!(words, [E_OK, 1, 0, 0]);

        let mut words = [9, 0, 0, 0];
        unsafe { k.handle_trap(Sysnum::GetTaskState as usize, &mut words) };
        assert_eq!(words[0], KernelError::Id.code());

        let mut words = [0, 0, 0, 0];
        unsafe { k.handle_trap(Sysnum::GetAlarmBase as usize, &mut words) };
        assert_eq!(words, [E_OK, 1000, 1, 1]);

        let msg = "hi";
        let mut words = [msg.as_ptr() as usize, msg.len(), 0, 0];
        unsafe { k.handle_trap(Sysnum::Debug as usize, &mut words) };
        assert_eq!(words[0], E_OK);
        assert_eq!(k.port().console(), "hi");

        let mut words = [0; 4];
        unsafe { k.handle_trap(42, &mut words) };
        assert_eq!(words[0], KernelError::NoFunc.code());
    }

    #[test]
    fn test_blocked_resource_status() {
        let mut k = kernel();
        k.activate_task(TaskId(3)).unwrap();

        let mut words = [0; 4];
        unsafe { k.handle_trap(Sysnum::GetResource as usize, &mut words) };
        assert_eq!(words[0], E_OK);

        // Hand the CPU to task 3 while task 1 holds the resource.
        k.wait_event(1).unwrap();
        k.dispatch_pending();
        assert_eq!(k.get_task_id(), TaskId(3));

        let mut words = [0; 4];
        unsafe { k.handle_trap(Sysnum::GetResource as usize, &mut words) };
        assert_eq!(words[0], E_BLOCKED);
        assert_eq!(state(&k, 3), TaskState::Waiting);
    }
}
