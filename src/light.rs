/*!
 # Light level state machine

 Tracks what the output is doing right now (resting at a level, fading,
 waiting on a timer or flickering), computes the instantaneous level on every
 tick and recommends how long the control loop may sleep before the next
 decision matters.
*/

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use tracing::{debug, instrument, trace};

use crate::{Error, Result};

/// Poll delay when nothing is changing
pub const LONG_POLL: Duration = Duration::from_secs(2);
/// Poll delay that keeps a flicker visibly stepping
pub const FLICKER_POLL: Duration = Duration::from_millis(100);
/// Lower bound for the adaptive fade delay
pub const MIN_FADE_POLL: Duration = Duration::from_millis(10);

/// Flicker steps per second
const FLICKER_RATE: i64 = 5;

/// The currently applied control mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightState {
    /// Resting at a fixed level
    Constant { level: f64 },
    /// Linear transition from `start_level` at `start` to `end_level` at `end`
    Fading {
        start: DateTime<Local>,
        start_level: f64,
        end: DateTime<Local>,
        end_level: f64,
    },
    /// Holds the current level until `end`, then snaps to `end_level`
    Timed { end: DateTime<Local>, end_level: f64 },
    /// Square wave between off and full
    Flicker,
}

impl LightState {
    pub fn name(&self) -> &'static str {
        match self {
            LightState::Constant { .. } => "constant",
            LightState::Fading { .. } => "fading",
            LightState::Timed { .. } => "timed",
            LightState::Flicker => "flicker",
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one `advance` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advance {
    /// Recommended delay before the next tick
    pub delay: Duration,
    /// True when nothing is in motion and the loop may back off
    pub settled: bool,
}

impl Advance {
    fn settled() -> Self {
        Self {
            delay: LONG_POLL,
            settled: true,
        }
    }

    fn busy(delay: Duration) -> Self {
        Self {
            delay,
            settled: false,
        }
    }
}

/// Interpolating state machine with a cached level.
///
/// The machine never talks to hardware itself: `take_output` hands out the
/// level once per observed change so the caller can push it to a sink.
#[derive(Debug, Clone)]
pub struct LightMachine {
    state: LightState,
    level: f64,
    written: Option<f64>,
}

impl Default for LightMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_level(level: f64) -> Result<f64> {
    if level.is_finite() {
        Ok(level.clamp(0.0, 1.0))
    } else {
        Err(Error::Validation(format!("level must be a number, got {level}")))
    }
}

fn after(now: DateTime<Local>, period: Duration) -> Result<DateTime<Local>> {
    TimeDelta::from_std(period)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| Error::Validation(format!("period out of range: {period:?}")))
}

fn millis_between(from: DateTime<Local>, to: DateTime<Local>) -> f64 {
    (to - from).num_milliseconds() as f64
}

impl LightMachine {
    /// Starts dark, with the dark level pending for the output
    pub fn new() -> Self {
        Self {
            state: LightState::Constant { level: 0.0 },
            level: 0.0,
            written: None,
        }
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    fn write_level(&mut self, level: f64) {
        let level = level.clamp(0.0, 1.0);
        if level != self.level {
            trace!("Level {:.3} -> {:.3}", self.level, level);
        }
        self.level = level;
    }

    fn settle(&mut self, level: f64) {
        self.write_level(level);
        self.state = LightState::Constant { level: self.level };
    }

    /// Jumps to `level` and rests there
    #[instrument(skip(self))]
    pub fn set(&mut self, level: f64) -> Result<()> {
        let level = checked_level(level)?;
        self.settle(level);
        Ok(())
    }

    /// Goes dark and rests there
    pub fn off(&mut self) {
        self.settle(0.0);
    }

    /// Fades linearly from the current level to `level` over `period`
    #[instrument(skip(self, now))]
    pub fn fade(&mut self, period: Duration, level: f64, now: DateTime<Local>) -> Result<()> {
        let level = checked_level(level)?;
        if period.is_zero() {
            self.settle(level);
            return Ok(());
        }
        let end = after(now, period)?;
        debug!("Fading from {:.3} to {:.3} over {:?}", self.level, level, period);
        self.state = LightState::Fading {
            start: now,
            start_level: self.level,
            end,
            end_level: level,
        };
        Ok(())
    }

    /// Keeps the current level for `period`, then switches to `level`
    #[instrument(skip(self, now))]
    pub fn timer(&mut self, period: Duration, level: f64, now: DateTime<Local>) -> Result<()> {
        let level = checked_level(level)?;
        if period.is_zero() {
            self.settle(level);
            return Ok(());
        }
        let end = after(now, period)?;
        self.state = LightState::Timed { end, end_level: level };
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn flicker(&mut self) {
        self.state = LightState::Flicker;
    }

    /// Computes the level for `now` and the recommended delay until the next tick
    pub fn advance(&mut self, now: DateTime<Local>) -> Advance {
        match self.state {
            LightState::Constant { .. } => Advance::settled(),
            LightState::Flicker => {
                let step = now.timestamp_millis().div_euclid(1000 / FLICKER_RATE);
                self.write_level(step.rem_euclid(2) as f64);
                Advance::busy(FLICKER_POLL)
            }
            LightState::Timed { end, end_level } => {
                if now > end {
                    debug!("Timer elapsed, switching to {:.3}", end_level);
                    self.settle(end_level);
                    Advance::settled()
                } else {
                    let remaining = (end - now).to_std().unwrap_or_default();
                    Advance::busy(remaining.clamp(MIN_FADE_POLL, LONG_POLL))
                }
            }
            LightState::Fading {
                start,
                start_level,
                end,
                end_level,
            } => {
                if now > end {
                    debug!("Fade complete at {:.3}", end_level);
                    self.settle(end_level);
                    return Advance::settled();
                }
                let amplitude = end_level - start_level;
                let duration = millis_between(start, end);
                if amplitude == 0.0 || duration <= 0.0 {
                    self.write_level(start_level);
                    return Advance::busy(LONG_POLL);
                }
                let progress = (millis_between(start, now) / duration).clamp(0.0, 1.0);
                self.write_level(start_level + progress * amplitude);

                let delay = Duration::from_secs_f64(0.01 * duration / 1000.0 / amplitude.abs());
                Advance::busy(delay.clamp(MIN_FADE_POLL, LONG_POLL))
            }
        }
    }

    /// Time until a fade or timer finishes
    pub fn remaining(&self, now: DateTime<Local>) -> Option<Duration> {
        match self.state {
            LightState::Fading { end, .. } | LightState::Timed { end, .. } => {
                Some((end - now).to_std().unwrap_or_default())
            }
            _ => None,
        }
    }

    /// The level to push to the output, once per change
    pub fn take_output(&mut self) -> Option<f64> {
        if self.written == Some(self.level) {
            return None;
        }
        self.written = Some(self.level);
        Some(self.level)
    }

    /// Forgets the last written level so the next `take_output` retries it
    pub fn output_failed(&mut self) {
        self.written = None;
    }
}
