/*!
 # Active-item arbitration

 Decides, once per control-loop tick, which single rule controls the light:
 a manual override when one is set, otherwise the scheduled rule currently
 marked active. Activation is edge-triggered and one-shot rules are consumed
 when their occurrence ends.

 When two stored rules could activate in the same tick (only possible for
 schedules loaded from storage that break the overlap invariant) the first in
 store order wins, and a rule is only activated while no other rule holds
 control.
*/

use std::time::Duration;

use chrono::{DateTime, Datelike, Local, Weekday};
use tracing::{debug, info, instrument, warn};

use crate::light::{LONG_POLL, MIN_FADE_POLL};
use crate::schedule::{ms_since_midnight, Mode, RuleId, RuleRecord, ScheduledRule};
use crate::store::{ScheduleStore, Snapshot};
use crate::Result;

/// What the arbiter wants done with the light this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Nothing holds control; leave the light machine to run its course
    Idle,
    /// Put the light at `level` now. `poll` is set while a ramp is running.
    Drive { level: f64, poll: Option<Duration> },
}

impl Decision {
    fn off() -> Self {
        Decision::Drive {
            level: 0.0,
            poll: None,
        }
    }
}

/// Outcome of removing a rule by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// No rule had that name
    Absent,
    /// Removed a rule that was not in control
    Removed,
    /// Removed the rule that held control
    RemovedActive,
}

/// Schedule store plus the manual override slot
#[derive(Debug, Default)]
pub struct Scheduler {
    store: ScheduleStore,
    manual_override: Option<ScheduledRule>,
}

impl Scheduler {
    pub fn new(store: ScheduleStore) -> Self {
        debug!("Scheduler started with {} rules", store.len());
        Self {
            store,
            manual_override: None,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// Records to persist if the schedule changed
    pub fn take_snapshot(&mut self) -> Option<Snapshot> {
        self.store.take_snapshot()
    }

    pub fn manual_override(&self) -> Option<&ScheduledRule> {
        self.manual_override.as_ref()
    }

    /// The rule in control: the override if set, else the active stored rule
    pub fn controller(&self) -> Option<&ScheduledRule> {
        self.manual_override.as_ref().or_else(|| self.store.active())
    }

    /// Validates `record` and adds it to the store
    pub fn add(&mut self, record: RuleRecord) -> Result<RuleId> {
        let rule = ScheduledRule::new(record)?;
        Ok(self.store.add(rule)?)
    }

    pub fn remove(&mut self, name: &str) -> Removal {
        let was_active = self.store.find(name).is_some_and(|r| r.active);
        match (self.store.remove(name), was_active) {
            (false, _) => Removal::Absent,
            (true, false) => Removal::Removed,
            (true, true) => Removal::RemovedActive,
        }
    }

    /// Installs a rule-shaped override that preempts the schedule
    #[instrument(skip(self, record), fields(name = %record.name))]
    pub fn set_manual_override(&mut self, record: RuleRecord) -> Result<()> {
        let mut rule = ScheduledRule::new(record)?;
        rule.active = true;
        info!("Manual override set: {}", rule);
        self.manual_override = Some(rule);
        Ok(())
    }

    /// Drops the override; returns whether one was set
    #[instrument(skip(self))]
    pub fn clear_manual_override(&mut self) -> bool {
        let cleared = self.manual_override.take().is_some();
        if cleared {
            info!("Manual override cleared");
        }
        cleared
    }

    /// Ends the active scheduled rule early.
    ///
    /// Repeating rules stay dismissed until their window lapses; one-shot
    /// rules are deleted.
    #[instrument(skip(self))]
    pub fn dismiss_active(&mut self) -> bool {
        let Some(id) = self.store.active().map(ScheduledRule::id) else {
            debug!("Nothing to dismiss");
            return false;
        };
        if let Some(rule) = self.store.get_mut(id) {
            info!("Dismissing {}", rule.name());
            rule.dismissed = true;
        }
        self.end_active();
        true
    }

    /// Runs one arbitration step for a wall-clock reading
    pub fn tick(&mut self, now: DateTime<Local>) -> Decision {
        self.evaluate(ms_since_midnight(&now.time()), now.weekday())
    }

    /// Runs one arbitration step at `now_ms` since midnight on `day`
    pub fn evaluate(&mut self, now_ms: u32, day: Weekday) -> Decision {
        self.scan(now_ms, day);

        if let Some(manual) = &self.manual_override {
            let manual_in_force = manual.is_active(now_ms, None);
            let decision = if manual_in_force {
                drive(manual, now_ms)
            } else {
                info!("Manual override {} lapsed", manual.name());
                self.manual_override = None;
                Decision::off()
            };
            // the schedule keeps its own bookkeeping while overridden
            if self.store.active().is_some_and(|r| !r.continues(now_ms, day)) {
                self.end_active();
            }
            return decision;
        }

        let Some(active) = self.store.active() else {
            return Decision::Idle;
        };
        if active.continues(now_ms, day) {
            return drive(active, now_ms);
        }
        self.end_active();
        Decision::off()
    }

    /// Re-arms dismissed rules and activates the first rule whose window opened
    fn scan(&mut self, now_ms: u32, day: Weekday) {
        let mut held = self.store.active().is_some();
        for rule in self.store.rules_mut() {
            if rule.active {
                continue;
            }
            let in_window = rule.is_active(now_ms, Some(day));
            if rule.dismissed {
                if !in_window {
                    debug!("Re-arming dismissed rule {}", rule.name());
                    rule.dismissed = false;
                }
            } else if in_window && !held {
                info!("Activating {}", rule);
                rule.active = true;
                held = true;
            } else if in_window {
                warn!("Rule {} is due but another rule holds control", rule.name());
            }
        }
    }

    /// Releases the active stored rule, consuming it if it does not repeat
    fn end_active(&mut self) {
        let Some(id) = self.store.active().map(ScheduledRule::id) else {
            return;
        };
        let repeat = self.store.get(id).is_some_and(ScheduledRule::repeat);
        if repeat {
            if let Some(rule) = self.store.get_mut(id) {
                debug!("Ending {}", rule.name());
                rule.active = false;
            }
        } else if let Some(rule) = self.store.remove_id(id) {
            info!("Consumed one-shot rule {}", rule.name());
        }
    }

    /// The rule that would take control at `now_ms` on `day`, with its level.
    ///
    /// Ignores transient flags; used for previews of a schedule.
    pub fn preview(&self, now_ms: u32, day: Weekday) -> Option<(&ScheduledRule, f64)> {
        self.store
            .list()
            .iter()
            .find(|r| r.is_active(now_ms, Some(day)))
            .map(|r| (r, r.target_level(now_ms)))
    }
}

fn drive(rule: &ScheduledRule, now_ms: u32) -> Decision {
    let poll = match (rule.mode(), rule.window()) {
        (Mode::Constant, _) | (_, None) => None,
        (_, Some(window)) => {
            // a ramp moves by 1.0 over the whole window
            let delay = Duration::from_millis(u64::from(window.span_ms()) / 100);
            Some(delay.clamp(MIN_FADE_POLL, LONG_POLL))
        }
    };
    Decision::Drive {
        level: rule.target_level(now_ms),
        poll,
    }
}
