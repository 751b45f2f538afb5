/*!
 # Easy Mornings Light Scheduler Library

 A Rust library for driving a single dimmable light from a schedule of
 time-windowed rules, with a manual override that always wins while set.

 ## Features

 * Named rules with constant, increasing or decreasing levels
 * Windows that may cross midnight, optionally filtered by weekday
 * Conflict checking on insert (unique names, no overlapping windows)
 * One-shot rules that are consumed after their occurrence
 * Fades, timers and flicker on top of the schedule
 * Adaptive control loop polling with exponential backoff
 * TOML persistence and configuration
 * Log-only and Linux sysfs PWM outputs

 ## Example

 ```rust,no_run
 use std::sync::Arc;

 use easy_mornings::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let storage = Arc::new(TomlFileStorage::new("schedule.toml"));
     let service = LightService::open(storage, Arc::new(SystemClock))?;

     // Ramp up from 06:30 to 07:00 on weekdays
     service.add_rule(
         RuleRecord::new("wake", Mode::Increasing)
             .window(parse_time_of_day("06:30")?, parse_time_of_day("07:00")?)
             .repeating(true)
             .on_days(DaySet::WEEK_DAYS),
     )?;

     let control = service.control_loop(Box::new(LogSink::new()), PollingConfig::default());
     control.run().await;
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the light scheduler library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed rule, level, period or time of day
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Rule rejected by the schedule store
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Schedule could not be loaded or saved
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The output refused a level
    #[error("Output error: {0}")]
    Sink(String),

    /// A control loop tick failed unexpectedly
    #[error("Tick failed: {0}")]
    Tick(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod arbiter;
pub mod command;
pub mod config;
pub mod light;
pub mod runtime;
pub mod schedule;
pub mod sink;
pub mod storage;
pub mod store;

// Re-export key types
pub use arbiter::{Decision, Removal, Scheduler};
pub use command::{execute, respond, Request};
pub use config::{Config, PollingConfig, SinkConfig};
pub use light::{Advance, LightMachine, LightState};
pub use runtime::{Backoff, Clock, ControlLoop, LightService, ManualClock, Status, SystemClock};
pub use schedule::{
    format_time_of_day, ms_since_midnight, parse_time_of_day, DaySet, Mode, RuleId, RuleRecord,
    ScheduledRule, Window, MS_IN_DAY,
};
pub use sink::{LogSink, OutputSink, RecordingSink, SysfsPwmSink};
pub use storage::{MemoryStorage, Storage, TomlFileStorage};
pub use store::{ConflictError, ScheduleStore, Snapshot};
