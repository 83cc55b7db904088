//! # Counters and Alarms
//!
//! One hardware tick source feeds a free-running tick count and one or more
//! logical counters. A counter advances by one every `ticks_per_base` ticks
//! and wraps from `max_allowed_value` back to zero. Alarms are bound to a
//! counter and fire their action when the counter reaches `next_count`.
//!
//! ## Tick Processing
//!
//! ```text
//!   tick()
//!     1. expire:   every ACTIVE alarm whose counter == next_count
//!                  -> record last_count, step next_count by cycle,
//!                     mark expired, collect its action
//!     2. advance:  every counter whose next_tick == free_tick
//!                  -> value += 1 (wrapping), next_tick += ticks_per_base
//!     3. free_tick += 1
//! ```
//!
//! The table only collects due actions; running them (activating tasks,
//! setting events, calling callbacks) is the kernel's job, so this module
//! has no dependency on task state.

use heapless::Vec;
use log::debug;

use crate::config::{MAX_ALARMS, MAX_COUNTERS, TICK_MAX};
use crate::error::KernelError;
use crate::event::EventMask;
use crate::kernel::IsrServices;
use crate::task::TaskId;

/// Timer ticks and counter values.
pub type Tick = u32;

/// Characteristics of a counter, as reported by `get_alarm_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmBase {
    /// Largest counter value before it wraps to zero.
    pub max_allowed_value: Tick,
    /// Ticks per counter increment.
    pub ticks_per_base: Tick,
    /// Smallest non-zero cycle an alarm may use.
    pub min_cycle: Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmId(pub usize);

/// Alarm callback. Runs in tick-interrupt context and may only use the
/// interrupt-safe services.
pub type AlarmCallback = fn(&mut dyn IsrServices);

/// What an alarm does when it expires.
#[derive(Debug, Clone, Copy)]
pub enum AlarmAction {
    ActivateTask(TaskId),
    SetEvent(TaskId, EventMask),
    Callback(AlarmCallback),
}

/// Boot-time binding of an alarm.
#[derive(Debug, Clone, Copy)]
pub struct AlarmConfig {
    pub counter: CounterId,
    pub action: AlarmAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Free,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    Relative,
    Absolute,
}

/// Ticks from `last` to `now` on a clock that wraps after `max`.
///
/// `max` is the largest value the clock takes, so `elapsed(2, 254, 255)` is
/// 4: 254, 255, 0, 1, 2.
pub const fn elapsed(now: Tick, last: Tick, max: Tick) -> Tick {
    if now >= last {
        now - last
    } else {
        now.wrapping_add(max - last).wrapping_add(1)
    }
}

/// `value + step` modulo `max + 1`.
fn wrap_add(value: Tick, step: Tick, max: Tick) -> Tick {
    let modulus = u64::from(max) + 1;
    ((u64::from(value) + u64::from(step)) % modulus) as Tick
}

// ---------------------------------------------------------------------------
// Counter and alarm records
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Counter {
    pub base: AlarmBase,
    pub value: Tick,
    /// Free-running tick at which `value` advances next.
    pub next_tick: Tick,
    /// Free-running tick of the last advance.
    pub last_tick: Tick,
}

impl Counter {
    pub const fn new(base: AlarmBase) -> Self {
        Self {
            base,
            value: 0,
            next_tick: base.ticks_per_base,
            last_tick: 0,
        }
    }
}

#[derive(Debug)]
pub struct Alarm {
    pub counter: CounterId,
    pub action: AlarmAction,
    pub state: AlarmState,
    pub kind: AlarmKind,
    /// Zero for a one-shot alarm.
    pub cycle: Tick,
    pub next_count: Tick,
    /// Counter value at the last expiry, or at arming.
    pub last_count: Tick,
    /// Set on every expiry. Keeps a one-shot alarm from firing again.
    pub expired: bool,
}

impl Alarm {
    pub const fn new(config: AlarmConfig) -> Self {
        Self {
            counter: config.counter,
            action: config.action,
            state: AlarmState::Free,
            kind: AlarmKind::Relative,
            cycle: 0,
            next_count: 0,
            last_count: 0,
            expired: false,
        }
    }

    /// A one-shot alarm that has fired stays ACTIVE (so `get_alarm` keeps
    /// reporting the time since expiry) but is spent.
    fn is_spent(&self) -> bool {
        self.cycle == 0 && self.expired
    }
}

// ---------------------------------------------------------------------------
// Alarm table
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AlarmTable {
    free_tick: Tick,
    counters: Vec<Counter, MAX_COUNTERS>,
    alarms: Vec<Alarm, MAX_ALARMS>,
}

impl AlarmTable {
    pub fn new() -> Self {
        Self {
            free_tick: 0,
            counters: Vec::new(),
            alarms: Vec::new(),
        }
    }

    /// Build the tables. Alarm bindings must name existing counters.
    pub fn from_config(counters: &[AlarmBase], alarms: &[AlarmConfig]) -> Result<Self, KernelError> {
        let mut table = Self::new();
        for &base in counters {
            table
                .counters
                .push(Counter::new(base))
                .map_err(|_| KernelError::Exhausted)?;
        }
        for &cfg in alarms {
            if cfg.counter.0 >= table.counters.len() {
                return Err(KernelError::Id);
            }
            table
                .alarms
                .push(Alarm::new(cfg))
                .map_err(|_| KernelError::Exhausted)?;
        }
        Ok(table)
    }

    /// Ticks since boot, wrapping at `TICK_MAX`.
    pub fn free_tick(&self) -> Tick {
        self.free_tick
    }

    pub fn counter(&self, id: CounterId) -> Result<&Counter, KernelError> {
        self.counters.get(id.0).ok_or(KernelError::Id)
    }

    pub fn alarm(&self, id: AlarmId) -> Result<&Alarm, KernelError> {
        self.alarms.get(id.0).ok_or(KernelError::Id)
    }

    /// Alarm and the counter it is bound to.
    fn lookup_mut(&mut self, id: AlarmId) -> Result<(&mut Alarm, &Counter), KernelError> {
        let alarm = self.alarms.get_mut(id.0).ok_or(KernelError::Id)?;
        let counter = self.counters.get(alarm.counter.0).ok_or(KernelError::Id)?;
        Ok((alarm, counter))
    }

    /// Characteristics of the counter alarm `id` is bound to.
    pub fn get_alarm_base(&self, id: AlarmId) -> Result<AlarmBase, KernelError> {
        let alarm = self.alarm(id)?;
        Ok(self.counter(alarm.counter)?.base)
    }

    /// Ticks elapsed since the alarm last expired, or since it was armed if
    /// it has not expired yet. `NoFunc` on an alarm that is not armed.
    pub fn get_alarm(&self, id: AlarmId) -> Result<Tick, KernelError> {
        let alarm = self.alarm(id)?;
        if alarm.state == AlarmState::Free {
            return Err(KernelError::NoFunc);
        }
        let counter = self.counter(alarm.counter)?;
        let base = counter.base;

        let counts = elapsed(counter.value, alarm.last_count, base.max_allowed_value);
        let ticks = elapsed(self.free_tick, counter.last_tick, TICK_MAX);
        Ok(counts.wrapping_mul(base.ticks_per_base).wrapping_add(ticks))
    }

    /// Arm alarm `id` to expire `increment` counts from now, then every
    /// `cycle` counts (never again if `cycle` is zero).
    pub fn set_rel(&mut self, id: AlarmId, increment: Tick, cycle: Tick) -> Result<(), KernelError> {
        let (alarm, counter) = self.lookup_mut(id)?;
        let base = counter.base;
        check_armable(alarm)?;
        if increment > base.max_allowed_value {
            return Err(KernelError::Value);
        }
        check_cycle(cycle, base)?;

        let next = wrap_add(counter.value, increment, base.max_allowed_value);
        arm(alarm, AlarmKind::Relative, next, counter.value, cycle);
        Ok(())
    }

    /// Arm alarm `id` to expire when its counter reaches `start`.
    pub fn set_abs(&mut self, id: AlarmId, start: Tick, cycle: Tick) -> Result<(), KernelError> {
        let (alarm, counter) = self.lookup_mut(id)?;
        let base = counter.base;
        check_armable(alarm)?;
        if start > base.max_allowed_value {
            return Err(KernelError::Value);
        }
        check_cycle(cycle, base)?;

        arm(alarm, AlarmKind::Absolute, start, counter.value, cycle);
        Ok(())
    }

    /// Disarm alarm `id`. A pending expiry is discarded.
    pub fn cancel(&mut self, id: AlarmId) -> Result<(), KernelError> {
        let alarm = self.alarms.get_mut(id.0).ok_or(KernelError::Id)?;
        if alarm.state == AlarmState::Free {
            return Err(KernelError::State);
        }
        alarm.state = AlarmState::Free;
        alarm.expired = false;
        Ok(())
    }

    /// Tick phase 1: expire due alarms and return their actions in table
    /// order.
    pub fn expire(&mut self) -> Vec<AlarmAction, MAX_ALARMS> {
        let mut due = Vec::new();
        for (idx, alarm) in self.alarms.iter_mut().enumerate() {
            if alarm.state != AlarmState::Active || alarm.is_spent() {
                continue;
            }
            let Some(counter) = self.counters.get(alarm.counter.0) else {
                continue;
            };
            if counter.value != alarm.next_count {
                continue;
            }

            alarm.last_count = counter.value;
            if alarm.cycle != 0 {
                alarm.next_count =
                    wrap_add(alarm.next_count, alarm.cycle, counter.base.max_allowed_value);
            }
            alarm.expired = true;
            debug!("alarm {} expired at count {}", idx, counter.value);

            // One slot per alarm, cannot overflow.
            let _ = due.push(alarm.action);
        }
        due
    }

    /// Tick phases 2 and 3: advance counters, then the free-running tick.
    pub fn advance(&mut self) {
        let now = self.free_tick;
        for counter in self.counters.iter_mut() {
            if counter.next_tick != now {
                continue;
            }
            counter.value = if counter.value == counter.base.max_allowed_value {
                0
            } else {
                counter.value + 1
            };
            counter.next_tick = counter.next_tick.wrapping_add(counter.base.ticks_per_base);
            counter.last_tick = now;
        }
        self.free_tick = self.free_tick.wrapping_add(1);
    }
}

fn check_armable(alarm: &Alarm) -> Result<(), KernelError> {
    if alarm.state == AlarmState::Active && !alarm.is_spent() {
        return Err(KernelError::State);
    }
    Ok(())
}

fn check_cycle(cycle: Tick, base: AlarmBase) -> Result<(), KernelError> {
    if cycle != 0 && (cycle < base.min_cycle || cycle > base.max_allowed_value) {
        return Err(KernelError::Value);
    }
    Ok(())
}

fn arm(alarm: &mut Alarm, kind: AlarmKind, next_count: Tick, now: Tick, cycle: Tick) {
    alarm.kind = kind;
    alarm.next_count = next_count;
    alarm.last_count = now;
    alarm.cycle = cycle;
    alarm.expired = false;
    alarm.state = AlarmState::Active;
}
