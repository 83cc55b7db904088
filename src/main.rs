//! # Ceros Demo Firmware
//!
//! Six tasks sharing one resource, driven by three alarms:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `default_task` | 255 (idle) | Arms the alarms, then spins |
//! | `main_task` | 1 | Starts the sub tasks, talks to `sub_task1` by event |
//! | `sub_task0` | 0 | Prints once and ends |
//! | `sub_task1` | 2 | Waits for `EVENT1` from `main_task` |
//! | `sub_task2` | 2 | Prints under `RESOURCE1`, restarted periodically |
//! | `sub_task3` | 1 | Declared at run time, restarts itself once via `chain_task` |
//!
//! Alarm 0 activates `main_task` after 30 counts and alarm 1 sets event 1 on
//! it after 60 counts; both are one-shot. Alarm 2 is cyclic: its callback
//! activates `sub_task2` after 90 counts and then every 100 counts. Output
//! goes to the semihosting console, so run it under QEMU with
//! `-semihosting-config enable=on`.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use log::{LevelFilter, Log, Metadata, Record};
use panic_halt as _;

use ceros::alarm::{AlarmAction, AlarmId};
use ceros::api;
use ceros::arch::arm_m::{self, ArmM};
use ceros::config::{KernelConfig, DEFAULT_ALARM_BASE, PRI_MAX};
use ceros::kernel::{IsrServices, Kernel};
use ceros::resource::ResourceId;
use ceros::task::{StackWord, TaskConfig, TaskId};

const MAIN_TASK: TaskId = TaskId(1);
const SUB_TASK0: TaskId = TaskId(2);
const SUB_TASK1: TaskId = TaskId(3);
const SUB_TASK2: TaskId = TaskId(4);

const RESOURCE1: ResourceId = ResourceId(0);
const EVENT1: u32 = 1 << 0;

const USER_STACK_WORDS: usize = 256;

/// Counts between two runs of `sub_task2`.
const SUB_TASK2_PERIOD: u32 = 100;

/// Restarts left for `sub_task3`.
static SUB3_ROUNDS: AtomicU32 = AtomicU32::new(1);

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Forwards kernel log records to the semihosting console.
struct SemihostingLogger;

impl Log for SemihostingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        cortex_m_semihosting::hprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SemihostingLogger = SemihostingLogger;

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

fn say(msg: &str) {
    let _ = api::debug(msg);
}

/// End the calling task. Only comes back if the kernel refused.
fn exit() -> ! {
    if let Err(err) = api::terminate_task() {
        log::error!("terminate_task failed: {}", err);
    }
    loop {
        cortex_m::asm::wfi();
    }
}

extern "C" fn default_task(_arg: i32) -> ! {
    say("[default_task]\n");
    for (alarm, delay, cycle) in [(0, 30, 0), (1, 60, 0), (2, 90, SUB_TASK2_PERIOD)] {
        if let Err(err) = api::set_rel_alarm(AlarmId(alarm), delay, cycle) {
            log::warn!("alarm {} not armed: {}", alarm, err);
        }
    }
    loop {
        cortex_m::asm::nop();
    }
}

extern "C" fn main_task(_arg: i32) -> ! {
    say("[main_task]: start\n");

    let _ = api::activate_task(SUB_TASK0);
    let _ = api::activate_task(SUB_TASK1);
    // Still active, so the kernel reports the limit.
    if api::activate_task(SUB_TASK1).is_err() {
        say("[main_task]: sub_task1 already active\n");
    }

    if api::get_resource(RESOURCE1).is_ok() {
        say("[main_task]: set_event\n");
        let _ = api::release_resource(RESOURCE1);
    }
    let _ = api::set_event(SUB_TASK1, EVENT1);

    match api::declare(sub_task3, 1, USER_STACK_WORDS, 3) {
        Ok(id) => {
            let _ = api::activate_task(id);
        }
        Err(err) => log::warn!("sub_task3 not declared: {}", err),
    }

    let _ = api::wait_event(1 << 1);
    say("[main_task]: woken by alarm\n");
    let _ = api::clear_event(u32::MAX);
    say("[main_task]: done\n");
    exit()
}

extern "C" fn sub_task0(_arg: i32) -> ! {
    say("[sub_task0]\n");
    exit()
}

extern "C" fn sub_task1(_arg: i32) -> ! {
    say("[sub_task1]: start\n");
    let _ = api::wait_event(EVENT1);
    match api::get_event(SUB_TASK1) {
        Ok(ev) if ev & EVENT1 != 0 => say("[sub_task1]: wake up by main_task\n"),
        _ => say("[sub_task1]: wake up by unknown\n"),
    }
    let _ = api::clear_event(u32::MAX);
    say("[sub_task1]: done\n");
    exit()
}

extern "C" fn sub_task2(_arg: i32) -> ! {
    let _ = api::get_resource(RESOURCE1);
    say("[sub_task2]: start\n");
    say("[sub_task2]: done\n");
    let _ = api::release_resource(RESOURCE1);
    exit()
}

extern "C" fn sub_task3(arg: i32) -> ! {
    say("[sub_task3]\n");
    let remaining = SUB3_ROUNDS.load(Ordering::Relaxed);
    if remaining > 0 {
        SUB3_ROUNDS.store(remaining - 1, Ordering::Relaxed);
        if let Ok(me) = api::get_task_id() {
            let _ = api::chain_task(me);
        }
    }
    log::info!("sub_task3 finished, argument {}", arg);
    exit()
}

/// Runs from the tick every time alarm 2 expires. `sub_task2` has ended by
/// then, so each expiry starts it again.
fn main_task_callback(kernel: &mut dyn IsrServices) {
    if let Err(err) = kernel.activate_task(SUB_TASK2) {
        log::warn!("callback could not activate sub_task2: {}", err);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

macro_rules! stack {
    ($words:expr) => {{
        let stack: &'static mut [StackWord] =
            cortex_m::singleton!(: [StackWord; $words] = [0; $words])
                .expect("stack already taken");
        stack
    }};
}

/// Stacks handed to tasks declared at run time.
struct DemoHeap {
    pool: Option<&'static mut [StackWord]>,
}

impl ceros::task::StackAllocator for DemoHeap {
    fn alloc(&mut self, words: usize) -> Option<&'static mut [StackWord]> {
        match self.pool.take() {
            Some(pool) if pool.len() >= words => Some(pool),
            other => {
                self.pool = other;
                None
            }
        }
    }
}

/// Firmware entry point. Builds the configuration, boots the kernel and
/// hands the CPU to the first task. Does not return.
#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().expect("peripherals already taken");

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }

    let mut cfg = KernelConfig::new(TaskConfig::new(default_task, PRI_MAX, stack!(128)));
    cfg.task(TaskConfig::new(main_task, 1, stack!(USER_STACK_WORDS)))
        .expect("main_task");
    cfg.task(TaskConfig::new(sub_task0, 0, stack!(USER_STACK_WORDS)))
        .expect("sub_task0");
    cfg.task(TaskConfig::new(sub_task1, 2, stack!(USER_STACK_WORDS)))
        .expect("sub_task1");
    cfg.task(TaskConfig::new(sub_task2, 2, stack!(USER_STACK_WORDS)))
        .expect("sub_task2");
    cfg.resource(0).expect("RESOURCE1");

    let counter = cfg.counter(DEFAULT_ALARM_BASE).expect("counter");
    cfg.alarm(counter, AlarmAction::ActivateTask(MAIN_TASK))
        .expect("alarm 0");
    cfg.alarm(counter, AlarmAction::SetEvent(MAIN_TASK, 1 << 1))
        .expect("alarm 1");
    cfg.alarm(counter, AlarmAction::Callback(main_task_callback))
        .expect("alarm 2");

    let mut kernel = Kernel::new(cfg, ArmM::new()).expect("kernel configuration");
    let pool = stack!(USER_STACK_WORDS);
    let heap: &'static mut DemoHeap =
        cortex_m::singleton!(: DemoHeap = DemoHeap { pool: Some(pool) })
            .expect("heap already taken");
    kernel.set_stack_allocator(heap);

    arm_m::start(kernel, cp.SYST, cp.SCB)
}
