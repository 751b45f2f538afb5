/*!
 # Control loop and service handle

 [`Runtime`] bundles the scheduler (rule store plus manual override) and the
 light state machine behind a single lock. The [`ControlLoop`] owns the output
 sink and ticks the runtime; [`LightService`] is the cloneable handle the API
 layer uses to issue commands and read status.

 Persistence and sink writes always happen after the lock is released, from
 snapshots taken under it.
*/

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, trace};

use crate::arbiter::{Decision, Removal, Scheduler};
use crate::config::PollingConfig;
use crate::light::{Advance, LightMachine, LightState, MIN_FADE_POLL};
use crate::schedule::{ms_since_midnight, RuleId, RuleRecord, ScheduledRule};
use crate::sink::OutputSink;
use crate::storage::Storage;
use crate::store::{ScheduleStore, Snapshot};
use crate::{Error, Result};

/// Source of wall-clock readings
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system's local time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Ok(delta) = TimeDelta::from_std(by) {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }
}

/// Point-in-time view of what the light is doing
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    /// Name of the rule in control, if any
    pub controller: Option<String>,
    /// Whether the controller is the manual override
    pub overridden: bool,
    pub level: f64,
    /// Time left in the controlling window, or in a running fade or timer
    pub remaining: Option<Duration>,
    pub state: LightState,
    /// Whether the output reported itself on after the last write
    pub on: bool,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remaining = self
            .remaining
            .map_or(-1, |r| i64::try_from(r.as_millis()).unwrap_or(i64::MAX));
        write!(
            f,
            "controller={} override={} level={:.3} remaining_ms={} state={} on={}",
            self.controller.as_deref().unwrap_or("none"),
            self.overridden,
            self.level,
            remaining,
            self.state,
            self.on
        )
    }
}

/// Everything one tick hands back to the loop once the lock is released
#[derive(Debug)]
struct TickOutcome {
    advance: Advance,
    output: Option<f64>,
    snapshot: Option<Snapshot>,
}

/// State shared between the control loop and the API layer
#[derive(Debug, Default)]
pub struct Runtime {
    scheduler: Scheduler,
    light: LightMachine,
    output_on: bool,
}

impl Runtime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            light: LightMachine::new(),
            output_on: false,
        }
    }

    fn tick(&mut self, now: DateTime<Local>) -> Result<TickOutcome> {
        let mut advance = match self.scheduler.tick(now) {
            Decision::Drive { level, poll } => {
                self.light.set(level)?;
                let advance = self.light.advance(now);
                match poll {
                    Some(poll) => Advance {
                        delay: advance.delay.min(poll),
                        settled: false,
                    },
                    None => advance,
                }
            }
            Decision::Idle => self.light.advance(now),
        };
        if advance.delay.is_zero() {
            advance.delay = MIN_FADE_POLL;
        }
        Ok(TickOutcome {
            advance,
            output: self.light.take_output(),
            snapshot: self.scheduler.take_snapshot(),
        })
    }

    fn status(&self, now: DateTime<Local>) -> Status {
        let controller = self.scheduler.controller();
        let window_remaining = controller
            .and_then(|rule| rule.remaining_ms(ms_since_midnight(&now.time())))
            .map(|ms| Duration::from_millis(u64::from(ms)));
        Status {
            controller: controller.map(|rule| rule.name().to_string()),
            overridden: self.scheduler.manual_override().is_some(),
            level: self.light.level(),
            remaining: window_remaining.or_else(|| self.light.remaining(now)),
            state: self.light.state(),
            on: self.output_on,
        }
    }
}

/// Cloneable handle for issuing commands to a running light
#[derive(Clone)]
pub struct LightService {
    runtime: Arc<Mutex<Runtime>>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
    /// Generation of the last snapshot handed to storage
    saved: Arc<Mutex<u64>>,
}

impl LightService {
    pub fn new(scheduler: Scheduler, storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runtime: Arc::new(Mutex::new(Runtime::new(scheduler))),
            storage,
            clock,
            wake: Arc::new(Notify::new()),
            saved: Arc::new(Mutex::new(0)),
        }
    }

    /// Loads the schedule from `storage` and builds a service around it
    #[instrument(skip_all)]
    pub fn open(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Result<Self> {
        let records = storage.load()?;
        let store = ScheduleStore::from_records(records);
        info!("Loaded schedule with {} rules", store.len());
        Ok(Self::new(Scheduler::new(store), storage, clock))
    }

    /// Builds the loop that drives `sink` from this service's state
    pub fn control_loop(&self, sink: Box<dyn OutputSink>, polling: PollingConfig) -> ControlLoop {
        ControlLoop {
            service: self.clone(),
            sink,
            backoff: Backoff::new(polling.min(), polling.max()),
        }
    }

    /// Runs `f` under the lock, then persists any schedule change and wakes the loop
    fn update<T>(&self, f: impl FnOnce(&mut Runtime, DateTime<Local>) -> T) -> T {
        let now = self.clock.now();
        let (out, snapshot) = {
            let mut runtime = self.runtime.lock();
            let out = f(&mut runtime, now);
            (out, runtime.scheduler.take_snapshot())
        };
        self.persist(snapshot);
        self.wake.notify_one();
        out
    }

    /// Best-effort save; failures never undo the in-memory change
    fn persist(&self, snapshot: Option<Snapshot>) {
        let Some(snapshot) = snapshot else {
            return;
        };
        let mut saved = self.saved.lock();
        if snapshot.generation <= *saved {
            debug!("Skipping stale snapshot {}", snapshot.generation);
            return;
        }
        *saved = snapshot.generation;
        match self.storage.save(&snapshot.records) {
            Ok(()) => debug!("Persisted {} rules", snapshot.records.len()),
            Err(e) => error!("Failed to persist schedule: {}", e),
        }
    }

    #[instrument(skip(self, record), fields(name = %record.name))]
    pub fn add_rule(&self, record: RuleRecord) -> Result<RuleId> {
        self.update(|rt, _| rt.scheduler.add(record))
    }

    #[instrument(skip(self))]
    pub fn remove_rule(&self, name: &str) -> bool {
        self.update(|rt, _| match rt.scheduler.remove(name) {
            Removal::Absent => false,
            Removal::Removed => true,
            Removal::RemovedActive => {
                rt.light.off();
                true
            }
        })
    }

    /// Rules in store order, with their transient flags
    pub fn list_rules(&self) -> Vec<ScheduledRule> {
        self.runtime.lock().scheduler.store().list().to_vec()
    }

    pub fn set_manual_override(&self, record: RuleRecord) -> Result<()> {
        self.update(|rt, _| rt.scheduler.set_manual_override(record))
    }

    /// Drops the override and turns the light off if one was set
    pub fn clear_manual_override(&self) -> bool {
        self.update(|rt, _| {
            let cleared = rt.scheduler.clear_manual_override();
            if cleared {
                rt.light.off();
            }
            cleared
        })
    }

    pub fn dismiss_active(&self) -> bool {
        self.update(|rt, _| {
            let dismissed = rt.scheduler.dismiss_active();
            if dismissed {
                rt.light.off();
            }
            dismissed
        })
    }

    /// Atomic snapshot of the current state
    pub fn status(&self) -> Status {
        let now = self.clock.now();
        self.runtime.lock().status(now)
    }

    pub fn set_now(&self, level: f64) -> Result<()> {
        self.update(|rt, _| rt.light.set(level))
    }

    pub fn fade(&self, period: Duration, level: f64) -> Result<()> {
        self.update(|rt, now| rt.light.fade(period, level, now))
    }

    pub fn timer(&self, period: Duration, level: f64) -> Result<()> {
        self.update(|rt, now| rt.light.timer(period, level, now))
    }

    pub fn flicker(&self) {
        self.update(|rt, _| rt.light.flicker())
    }
}

/// Exponential backoff between ticks while nothing changes
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay before the next tick.
    ///
    /// Settled ticks double the delay up to the cap; a transition in progress
    /// resets it and uses the machine's recommendation.
    pub fn next(&mut self, advance: Advance) -> Duration {
        if advance.settled {
            let delay = self.current;
            self.current = (self.current * 2).min(self.max);
            delay
        } else {
            self.current = self.min;
            advance.delay.min(self.max)
        }
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Runs `f`, reporting a panic as the error built by `on_panic`
fn guarded<T>(f: impl FnOnce() -> Result<T>, on_panic: fn(String) -> Error) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(on_panic(panic_message(payload.as_ref()).to_string())))
}

/// Drives the output from the shared runtime
pub struct ControlLoop {
    service: LightService,
    sink: Box<dyn OutputSink>,
    backoff: Backoff,
}

impl ControlLoop {
    /// Runs one tick and returns how long to sleep before the next.
    ///
    /// A failing or panicking tick is logged and retried later; it never
    /// ends the loop. The same holds for the sink write and the save that
    /// follow it.
    pub fn step(&mut self) -> Duration {
        self.step_with(Runtime::tick)
    }

    fn step_with(
        &mut self,
        tick: impl FnOnce(&mut Runtime, DateTime<Local>) -> Result<TickOutcome>,
    ) -> Duration {
        let now = self.service.clock.now();
        let runtime = Arc::clone(&self.service.runtime);
        let outcome = match guarded(|| tick(&mut *runtime.lock(), now), Error::Tick) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Retrying after failed tick: {}", e);
                return self.backoff.next(Advance {
                    delay: self.backoff.max,
                    settled: true,
                });
            }
        };

        if let Some(level) = outcome.output {
            self.write(level);
        }
        let service = &self.service;
        let saved = guarded(
            || {
                service.persist(outcome.snapshot);
                Ok(())
            },
            Error::Persistence,
        );
        if let Err(e) = saved {
            error!("Failed to persist schedule: {}", e);
        }
        self.backoff.next(outcome.advance)
    }

    fn write(&mut self, level: f64) {
        let sink = &mut self.sink;
        let written = guarded(
            || {
                sink.set_level(level)?;
                Ok(sink.is_on())
            },
            Error::Sink,
        );
        match written {
            Ok(on) => self.service.runtime.lock().output_on = on,
            Err(e) => {
                error!("Failed to drive output to {:.3}: {}", level, e);
                self.service.runtime.lock().light.output_failed();
            }
        }
    }

    /// Ticks forever, sleeping between ticks; commands from the service wake
    /// it early
    pub async fn run(mut self) {
        info!("Control loop running");
        loop {
            let delay = self.step();
            trace!("Sleeping for {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.service.wake.notified() => {
                    trace!("Woken by a command");
                    self.backoff.reset();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Mode;
    use crate::sink::RecordingSink;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    const HOUR: u32 = 60 * 60 * 1000;

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn load(&self) -> Result<Vec<RuleRecord>> {
            Ok(Vec::new())
        }

        fn save(&self, _: &[RuleRecord]) -> Result<()> {
            Err(Error::Persistence("disk full".to_string()))
        }
    }

    struct FlakySink {
        fail_next: bool,
        inner: RecordingSink,
    }

    impl OutputSink for FlakySink {
        fn set_level(&mut self, level: f64) -> Result<()> {
            if std::mem::take(&mut self.fail_next) {
                return Err(Error::Sink("bus error".to_string()));
            }
            self.inner.set_level(level)
        }

        fn is_on(&self) -> bool {
            self.inner.is_on()
        }
    }

    fn seven_am() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).single().unwrap()
    }

    fn service(storage: Arc<dyn Storage>) -> (LightService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(seven_am()));
        let service = LightService::new(Scheduler::default(), storage, clock.clone());
        (service, clock)
    }

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(2));
        let settled = Advance {
            delay: Duration::from_secs(2),
            settled: true,
        };
        let delays: Vec<u128> = (0..7).map(|_| backoff.next(settled).as_millis()).collect();
        assert_eq!(delays, [100, 200, 400, 800, 1600, 2000, 2000]);

        let busy = Advance {
            delay: Duration::from_millis(50),
            settled: false,
        };
        assert_eq!(backoff.next(busy), Duration::from_millis(50));
        assert_eq!(backoff.next(settled), Duration::from_millis(100));
    }

    #[test]
    fn persistence_failure_keeps_the_rule() {
        let (service, _) = service(Arc::new(FailingStorage));
        service
            .add_rule(RuleRecord::new("lamp", Mode::Constant).window(20 * HOUR, 21 * HOUR))
            .unwrap();
        assert_eq!(service.list_rules().len(), 1);
    }

    #[test]
    fn mutations_are_persisted() {
        let storage = Arc::new(MemoryStorage::default());
        let (service, _) = service(storage.clone());
        service
            .add_rule(RuleRecord::new("lamp", Mode::Constant).window(20 * HOUR, 21 * HOUR))
            .unwrap();
        assert_eq!(storage.records().len(), 1);
        assert!(service.remove_rule("lamp"));
        assert!(storage.records().is_empty());
        assert!(!service.remove_rule("lamp"));
    }

    #[test]
    fn sink_failure_is_retried_next_tick() {
        let recorded = RecordingSink::new();
        let sink = FlakySink {
            fail_next: true,
            inner: recorded.clone(),
        };
        let (service, _) = service(Arc::new(MemoryStorage::default()));
        let mut control = service.control_loop(Box::new(sink), PollingConfig::default());

        control.step();
        assert!(recorded.levels().is_empty());
        control.step();
        assert_eq!(recorded.levels(), vec![0.0]);
    }

    struct PanickingSink {
        panic_next: bool,
        inner: RecordingSink,
    }

    impl OutputSink for PanickingSink {
        fn set_level(&mut self, level: f64) -> Result<()> {
            if std::mem::take(&mut self.panic_next) {
                panic!("driver bug");
            }
            self.inner.set_level(level)
        }

        fn is_on(&self) -> bool {
            self.inner.is_on()
        }
    }

    #[test]
    fn failing_ticks_back_off_and_the_loop_recovers() {
        let recorded = RecordingSink::new();
        let (service, _) = service(Arc::new(MemoryStorage::default()));
        let mut control = service.control_loop(Box::new(recorded.clone()), PollingConfig::default());

        let delay = control.step_with(|_, _| panic!("corrupt state"));
        assert_eq!(delay, Duration::from_millis(100));
        let delay = control.step_with(|_, _| Err(Error::Tick("clock went backwards".to_string())));
        assert_eq!(delay, Duration::from_millis(200));
        assert!(recorded.levels().is_empty());

        // the panicking tick released the runtime lock
        service.set_now(0.6).unwrap();
        control.step();
        assert_eq!(recorded.levels(), vec![0.6]);
        assert!(service.status().on);
    }

    #[test]
    fn panicking_sink_is_retried_next_tick() {
        let recorded = RecordingSink::new();
        let sink = PanickingSink {
            panic_next: true,
            inner: recorded.clone(),
        };
        let (service, _) = service(Arc::new(MemoryStorage::default()));
        let mut control = service.control_loop(Box::new(sink), PollingConfig::default());

        control.step();
        assert!(recorded.levels().is_empty());
        assert!(!service.status().on);
        control.step();
        assert_eq!(recorded.levels(), vec![0.0]);
    }

    #[test]
    fn status_reports_remaining_window() {
        let (service, clock) = service(Arc::new(MemoryStorage::default()));
        let mut control = service.control_loop(Box::new(RecordingSink::new()), PollingConfig::default());
        service
            .add_rule(RuleRecord::new("wake", Mode::Increasing).window(7 * HOUR, 8 * HOUR))
            .unwrap();

        clock.advance(Duration::from_secs(15 * 60));
        control.step();

        let status = service.status();
        assert_eq!(status.controller.as_deref(), Some("wake"));
        assert!((status.level - 0.25).abs() < 1e-9);
        assert_eq!(status.remaining, Some(Duration::from_secs(45 * 60)));
        assert!(status.on);
        assert_eq!(
            status.to_string(),
            "controller=wake override=false level=0.250 remaining_ms=2700000 state=constant on=true"
        );
    }

    #[test]
    fn idle_status_has_no_remaining_time() {
        let (service, _) = service(Arc::new(MemoryStorage::default()));
        let status = service.status();
        assert_eq!(status.controller, None);
        assert_eq!(status.remaining, None);
        assert!(status.to_string().contains("remaining_ms=-1"));
    }
}
