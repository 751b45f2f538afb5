/*!
 # Scheduled lighting rules

 This module defines the rules a schedule is made of: the weekday filter,
 the lighting mode, the time-of-day window and the time window evaluator
 answering "is this rule active right now".

 Times of day are expressed in milliseconds since local midnight. A window
 whose end lies before its start crosses midnight (e.g. 23:00 to 01:00).
*/

use std::fmt;
use std::str::FromStr;

use chrono::{Timelike, Weekday};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::{Error, Result};

/// Milliseconds in one day
pub const MS_IN_DAY: u32 = 24 * 60 * 60 * 1000;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// A set of weekdays stored as a bitmask (Monday = 0x01 ... Sunday = 0x40)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DaySet(u8);

impl DaySet {
    /// Monday (0x01)
    pub const MONDAY: DaySet = DaySet(0x01);
    /// Tuesday (0x02)
    pub const TUESDAY: DaySet = DaySet(0x02);
    /// Wednesday (0x04)
    pub const WEDNESDAY: DaySet = DaySet(0x04);
    /// Thursday (0x08)
    pub const THURSDAY: DaySet = DaySet(0x08);
    /// Friday (0x10)
    pub const FRIDAY: DaySet = DaySet(0x10);
    /// Saturday (0x20)
    pub const SATURDAY: DaySet = DaySet(0x20);
    /// Sunday (0x40)
    pub const SUNDAY: DaySet = DaySet(0x40);
    /// All days (0x7F)
    pub const ALL: DaySet = DaySet(0x7F);
    /// Week days (Monday-Friday, 0x1F)
    pub const WEEK_DAYS: DaySet = DaySet(0x1F);
    /// Weekend days (Saturday-Sunday, 0x60)
    pub const WEEKEND: DaySet = DaySet(0x60);
    /// No days (0x00)
    pub const NONE: DaySet = DaySet(0x00);

    /// Raw bitmask
    pub fn bits(self) -> u8 {
        self.0
    }

    /// The set holding a single weekday
    pub fn from_weekday(day: Weekday) -> Self {
        DaySet(1 << day.num_days_from_monday())
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & Self::from_weekday(day).0 != 0
    }

    pub fn intersects(self, other: DaySet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: DaySet) -> Self {
        DaySet((self.0 | other.0) & Self::ALL.0)
    }

    /// Weekdays in the set, Monday first
    pub fn days(self) -> impl Iterator<Item = Weekday> {
        WEEK.into_iter().filter(move |day| self.contains(*day))
    }

    fn parse_single(day: &str) -> Option<DaySet> {
        let set = match day.trim().to_lowercase().as_str() {
            "mon" | "monday" => Self::MONDAY,
            "tue" | "tuesday" => Self::TUESDAY,
            "wed" | "wednesday" => Self::WEDNESDAY,
            "thu" | "thursday" => Self::THURSDAY,
            "fri" | "friday" => Self::FRIDAY,
            "sat" | "saturday" => Self::SATURDAY,
            "sun" | "sunday" => Self::SUNDAY,
            "all" => Self::ALL,
            "weekdays" => Self::WEEK_DAYS,
            "weekend" => Self::WEEKEND,
            "none" => Self::NONE,
            _ => return None,
        };
        Some(set)
    }
}

/// Parses day names, groups (`all`, `weekdays`, `weekend`) and
/// comma-separated combinations of both
impl FromStr for DaySet {
    type Err = Error;

    fn from_str(days: &str) -> Result<Self> {
        let mut combined = DaySet::NONE;
        for day in days.split(',').filter(|d| !d.trim().is_empty()) {
            let value = DaySet::parse_single(day)
                .ok_or_else(|| Error::Validation(format!("unknown day of week: {}", day.trim())))?;
            combined = combined.union(value);
        }
        trace!("Days '{}' parsed to bitmask: {:#04x}", days, combined.0);
        Ok(combined)
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DaySet::ALL => write!(f, "all"),
            DaySet::WEEK_DAYS => write!(f, "weekdays"),
            DaySet::WEEKEND => write!(f, "weekend"),
            DaySet::NONE => write!(f, "none"),
            days => {
                let names: Vec<String> = days.days().map(|d| d.to_string().to_lowercase()).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

impl TryFrom<Vec<String>> for DaySet {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        names.iter().try_fold(DaySet::NONE, |acc, name| {
            DaySet::parse_single(name)
                .map(|d| acc.union(d))
                .ok_or_else(|| Error::Validation(format!("unknown day of week: {name}")))
        })
    }
}

impl From<DaySet> for Vec<String> {
    fn from(days: DaySet) -> Self {
        days.days().map(|d| format!("{d:?}")).collect()
    }
}

/// How the level evolves while a rule is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Full brightness for the whole window
    Constant,
    /// Linear ramp from 0 to 1 across the window
    Increasing,
    /// Linear ramp from 1 to 0 across the window
    Decreasing,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self> {
        match mode.trim().to_lowercase().as_str() {
            "constant" => Ok(Mode::Constant),
            "increasing" => Ok(Mode::Increasing),
            "decreasing" => Ok(Mode::Decreasing),
            other => Err(Error::Validation(format!(
                "mode must be one of constant, increasing, decreasing. Not: {other}"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Constant => write!(f, "constant"),
            Mode::Increasing => write!(f, "increasing"),
            Mode::Decreasing => write!(f, "decreasing"),
        }
    }
}

/// A time-of-day window, half-open: `[start_ms, end_ms)`.
///
/// When `end_ms < start_ms` the window crosses midnight and covers
/// `[start_ms, MS_IN_DAY) ∪ [0, end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    start_ms: u32,
    end_ms: u32,
}

impl Window {
    /// Validates bounds and rejects empty windows
    pub fn new(start_ms: u32, end_ms: u32) -> Result<Self> {
        if start_ms > MS_IN_DAY || end_ms > MS_IN_DAY {
            return Err(Error::Validation(format!(
                "start and end time must be within 0 and {MS_IN_DAY}"
            )));
        }
        let window = Self { start_ms, end_ms };
        // 24:00 to 00:00 is as empty as start == end
        if window.span_ms() == 0 {
            return Err(Error::Validation(
                "start and end time must differ".to_string(),
            ));
        }
        Ok(window)
    }

    pub fn start_ms(&self) -> u32 {
        self.start_ms
    }

    pub fn end_ms(&self) -> u32 {
        self.end_ms
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end_ms < self.start_ms
    }

    /// Whether `now_ms` falls inside the window.
    ///
    /// At most one of the three branches can hold for any triple.
    pub fn contains(&self, now_ms: u32) -> bool {
        let (start, end) = (self.start_ms, self.end_ms);
        (start <= now_ms && now_ms < end) || (end < start && start <= now_ms) || (now_ms < end && end < start)
    }

    /// Length of the window in milliseconds
    pub fn span_ms(&self) -> u32 {
        if self.wraps_midnight() {
            MS_IN_DAY - self.start_ms + self.end_ms
        } else {
            self.end_ms - self.start_ms
        }
    }

    /// Milliseconds since the window opened, assuming `now_ms` is inside it
    pub fn elapsed_ms(&self, now_ms: u32) -> u32 {
        if now_ms >= self.start_ms {
            now_ms - self.start_ms
        } else {
            MS_IN_DAY - self.start_ms + now_ms
        }
    }

    /// Linear segments within a single day, at most two
    fn segments(&self) -> impl Iterator<Item = (u32, u32)> {
        let parts = if self.wraps_midnight() {
            [(self.start_ms, MS_IN_DAY), (0, self.end_ms)]
        } else {
            [(self.start_ms, self.end_ms), (0, 0)]
        };
        parts.into_iter().filter(|(s, e)| s < e)
    }

    /// Half-open overlap test that understands midnight wraparound
    pub fn overlaps(&self, other: &Window) -> bool {
        self.segments()
            .any(|(s1, e1)| other.segments().any(|(s2, e2)| s1 < e2 && s2 < e1))
    }
}

/// Unique internal identifier assigned to a rule when it enters a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(Uuid);

impl RuleId {
    pub fn new() -> Self {
        RuleId(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The persisted/parameter shape of a rule, as written to the schedule file
/// and accepted by the API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub name: String,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u32>,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<DaySet>,
}

impl RuleRecord {
    /// A record with no window, no repeat and no day filter
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            start_time: None,
            end_time: None,
            repeat: false,
            days_of_week: None,
        }
    }

    pub fn window(mut self, start_ms: u32, end_ms: u32) -> Self {
        self.start_time = Some(start_ms);
        self.end_time = Some(end_ms);
        self
    }

    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn on_days(mut self, days: DaySet) -> Self {
        self.days_of_week = Some(days);
        self
    }
}

/// A named, time-windowed lighting instruction
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRule {
    id: RuleId,
    name: String,
    mode: Mode,
    window: Option<Window>,
    repeat: bool,
    days: Option<DaySet>,
    /// Currently holds control of the light
    pub(crate) active: bool,
    /// Manually ended; suppresses re-triggering until the window lapses
    pub(crate) dismissed: bool,
}

impl ScheduledRule {
    /// Validates a record and builds a rule from it
    pub fn new(record: RuleRecord) -> Result<Self> {
        let RuleRecord {
            name,
            mode,
            start_time,
            end_time,
            repeat,
            days_of_week,
        } = record;

        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::Validation(format!(
                "rule name must be non-empty and contain no whitespace: {name:?}"
            )));
        }

        let window = match (start_time, end_time) {
            (Some(start), Some(end)) => Some(Window::new(start, end)?),
            (None, None) if mode == Mode::Constant => None,
            (None, None) => {
                return Err(Error::Validation(format!(
                    "{mode} rules need both a start and an end time"
                )))
            }
            _ => {
                return Err(Error::Validation(
                    "start and end time must be given together".to_string(),
                ))
            }
        };

        if repeat && days_of_week.is_some_and(DaySet::is_empty) {
            return Err(Error::Validation(
                "select at least one day when repeat is enabled".to_string(),
            ));
        }

        Ok(Self {
            id: RuleId::new(),
            name,
            mode,
            window,
            repeat,
            days: days_of_week,
            active: false,
            dismissed: false,
        })
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn window(&self) -> Option<Window> {
        self.window
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn days(&self) -> Option<DaySet> {
        self.days
    }

    pub fn is_active_flag(&self) -> bool {
        self.active
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }

    /// Whether the rule applies at `now_ms` on `day`.
    ///
    /// Passing `None` as the day skips the weekday filter.
    pub fn is_active(&self, now_ms: u32, day: Option<Weekday>) -> bool {
        if let (Some(day), Some(days)) = (day, self.days) {
            if !days.contains(day) {
                return false;
            }
        }
        match self.window {
            None => true,
            Some(window) => window.contains(now_ms),
        }
    }

    /// Whether a rule that already holds control keeps it at `now_ms` on `day`.
    ///
    /// The weekday filter is skipped only in the after-midnight part of a
    /// window that crosses midnight, so an occurrence started on an allowed
    /// day runs to its end.
    pub fn continues(&self, now_ms: u32, day: Weekday) -> bool {
        match self.window {
            Some(window) if window.wraps_midnight() && now_ms < window.end_ms => true,
            _ => self.is_active(now_ms, Some(day)),
        }
    }

    /// Level this rule asks for at `now_ms`, assuming it is active
    pub fn target_level(&self, now_ms: u32) -> f64 {
        let progress = || match self.window {
            Some(window) => window.elapsed_ms(now_ms) as f64 / window.span_ms() as f64,
            None => 1.0,
        };
        let level = match self.mode {
            Mode::Constant => 1.0,
            Mode::Increasing => progress(),
            Mode::Decreasing => 1.0 - progress(),
        };
        level.clamp(0.0, 1.0)
    }

    /// Time left in the current window, if the rule has one and is inside it
    pub fn remaining_ms(&self, now_ms: u32) -> Option<u32> {
        self.window
            .filter(|w| w.contains(now_ms))
            .map(|w| w.span_ms() - w.elapsed_ms(now_ms))
    }

    /// Whether two rules may both be in force at the same moment.
    ///
    /// Day sets intersect when either is unrestricted; a rule without a
    /// window occupies the whole day.
    pub fn conflicts_with(&self, other: &ScheduledRule) -> bool {
        let days_intersect = match (self.days, other.days) {
            (Some(a), Some(b)) => a.intersects(b),
            _ => true,
        };
        if !days_intersect {
            return false;
        }
        match (self.window, other.window) {
            (Some(a), Some(b)) => a.overlaps(&b),
            _ => true,
        }
    }

    pub fn record(&self) -> RuleRecord {
        RuleRecord {
            name: self.name.clone(),
            mode: self.mode,
            start_time: self.window.map(|w| w.start_ms),
            end_time: self.window.map(|w| w.end_ms),
            repeat: self.repeat,
            days_of_week: self.days,
        }
    }
}

impl fmt::Display for ScheduledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.mode)?;
        match self.window {
            Some(w) => write!(
                f,
                " from {} to {}",
                format_time_of_day(w.start_ms),
                format_time_of_day(w.end_ms)
            )?,
            None => write!(f, " forever")?,
        }
        write!(f, ", {}", if self.repeat { "repeating" } else { "once" })?;
        match self.days {
            Some(days) => write!(f, " on {days}"),
            None => write!(f, " any day"),
        }
    }
}

/// Milliseconds since midnight for a wall-clock time
pub fn ms_since_midnight<T: Timelike>(time: &T) -> u32 {
    // leap seconds report nanosecond >= 1e9
    let millis = (time.nanosecond() / 1_000_000).min(999);
    time.num_seconds_from_midnight() * 1000 + millis
}

/// Parses `HH:MM`, `HH:MM:SS` or a raw millisecond count
pub fn parse_time_of_day(input: &str) -> Result<u32> {
    let input = input.trim();
    let invalid = || Error::Validation(format!("invalid time of day: {input}"));

    if !input.contains(':') {
        let ms: u32 = input.parse().map_err(|_| invalid())?;
        return if ms <= MS_IN_DAY { Ok(ms) } else { Err(invalid()) };
    }

    let parts: Vec<u32> = input
        .split(':')
        .map(|p| p.parse().map_err(|_| invalid()))
        .collect::<Result<_>>()?;
    let (hours, minutes, seconds) = match parts[..] {
        [h, m] => (h, m, 0),
        [h, m, s] => (h, m, s),
        _ => return Err(invalid()),
    };
    if minutes > 59 || seconds > 59 || hours > 24 || (hours == 24 && (minutes, seconds) != (0, 0)) {
        return Err(invalid());
    }
    Ok(((hours * 60 + minutes) * 60 + seconds) * 1000)
}

/// Formats milliseconds since midnight as `HH:MM` (or `HH:MM:SS` when needed)
pub fn format_time_of_day(ms: u32) -> String {
    let seconds = ms / 1000;
    let (h, m, s) = (seconds / 3600, (seconds / 60) % 60, seconds % 60);
    if s == 0 {
        format!("{h:02}:{m:02}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u32 = 60 * 60 * 1000;

    fn windowed(name: &str, start: u32, end: u32) -> ScheduledRule {
        ScheduledRule::new(RuleRecord::new(name, Mode::Constant).window(start, end)).unwrap()
    }

    #[test]
    fn plain_window_is_half_open() {
        let rule = windowed("a", 7 * HOUR, 8 * HOUR);
        assert!(!rule.is_active(7 * HOUR - 1, None));
        assert!(rule.is_active(7 * HOUR, None));
        assert!(rule.is_active(8 * HOUR - 1, None));
        assert!(!rule.is_active(8 * HOUR, None));
    }

    #[test]
    fn window_across_midnight() {
        let rule = windowed("late", 23 * HOUR, HOUR);
        assert!(rule.is_active(23 * HOUR, None));
        assert!(rule.is_active(23 * HOUR + 30 * 60 * 1000, None));
        assert!(rule.is_active(0, None));
        assert!(rule.is_active(HOUR - 1, None));
        assert!(!rule.is_active(HOUR, None));
        assert!(!rule.is_active(12 * HOUR, None));
    }

    #[test]
    fn day_filter_applies_only_when_day_given() {
        let rule = ScheduledRule::new(
            RuleRecord::new("weekday", Mode::Constant)
                .window(7 * HOUR, 8 * HOUR)
                .on_days(DaySet::WEEK_DAYS),
        )
        .unwrap();
        assert!(rule.is_active(7 * HOUR, Some(Weekday::Mon)));
        assert!(!rule.is_active(7 * HOUR, Some(Weekday::Sat)));
        assert!(rule.is_active(7 * HOUR, None));
    }

    #[test]
    fn held_rule_keeps_its_day_filter_outside_the_midnight_tail() {
        let monday = ScheduledRule::new(
            RuleRecord::new("monday", Mode::Constant)
                .repeating(true)
                .on_days(DaySet::MONDAY),
        )
        .unwrap();
        assert!(monday.continues(12 * HOUR, Weekday::Mon));
        assert!(!monday.continues(0, Weekday::Tue));
        assert!(!monday.continues(12 * HOUR, Weekday::Sat));

        let late = ScheduledRule::new(
            RuleRecord::new("late", Mode::Constant)
                .window(23 * HOUR, HOUR)
                .repeating(true)
                .on_days(DaySet::MONDAY),
        )
        .unwrap();
        assert!(late.continues(23 * HOUR, Weekday::Mon));
        // Monday's occurrence runs on into Tuesday
        assert!(late.continues(HOUR / 2, Weekday::Tue));
        assert!(!late.continues(HOUR, Weekday::Tue));
        assert!(!late.continues(23 * HOUR, Weekday::Tue));
    }

    #[test]
    fn constant_without_window_is_always_active() {
        let rule = ScheduledRule::new(RuleRecord::new("always", Mode::Constant)).unwrap();
        assert!(rule.is_active(0, Some(Weekday::Sun)));
        assert!(rule.is_active(MS_IN_DAY - 1, None));
        assert_eq!(rule.target_level(12345), 1.0);
        assert_eq!(rule.remaining_ms(12345), None);
    }

    #[test]
    fn validation_rejects_malformed_rules() {
        let missing = ScheduledRule::new(RuleRecord::new("ramp", Mode::Increasing));
        assert!(matches!(missing, Err(Error::Validation(_))));

        let mut half = RuleRecord::new("half", Mode::Constant);
        half.start_time = Some(HOUR);
        assert!(matches!(ScheduledRule::new(half), Err(Error::Validation(_))));

        let out_of_range = RuleRecord::new("late", Mode::Constant).window(0, MS_IN_DAY + 1);
        assert!(matches!(ScheduledRule::new(out_of_range), Err(Error::Validation(_))));

        let empty = RuleRecord::new("empty", Mode::Constant).window(HOUR, HOUR);
        assert!(matches!(ScheduledRule::new(empty), Err(Error::Validation(_))));
        let midnight = RuleRecord::new("midnight", Mode::Increasing).window(MS_IN_DAY, 0);
        assert!(matches!(ScheduledRule::new(midnight), Err(Error::Validation(_))));
        let whole_day = RuleRecord::new("whole", Mode::Increasing).window(0, MS_IN_DAY);
        assert!(ScheduledRule::new(whole_day).is_ok());

        let no_days = RuleRecord::new("never", Mode::Constant)
            .window(HOUR, 2 * HOUR)
            .repeating(true)
            .on_days(DaySet::NONE);
        assert!(matches!(ScheduledRule::new(no_days), Err(Error::Validation(_))));

        let spaced = RuleRecord::new("two words", Mode::Constant);
        assert!(matches!(ScheduledRule::new(spaced), Err(Error::Validation(_))));
    }

    #[test]
    fn ramps_interpolate_across_window() {
        let up = ScheduledRule::new(RuleRecord::new("up", Mode::Increasing).window(6 * HOUR, 7 * HOUR)).unwrap();
        assert_eq!(up.target_level(6 * HOUR), 0.0);
        assert!((up.target_level(6 * HOUR + HOUR / 2) - 0.5).abs() < 1e-9);

        let down = ScheduledRule::new(RuleRecord::new("down", Mode::Decreasing).window(22 * HOUR, 2 * HOUR)).unwrap();
        assert_eq!(down.target_level(22 * HOUR), 1.0);
        // midnight is halfway through a 22:00-02:00 window
        assert!((down.target_level(0) - 0.5).abs() < 1e-9);
        assert_eq!(down.remaining_ms(0), Some(2 * HOUR));
    }

    #[test]
    fn overlap_understands_wraparound() {
        let late = Window::new(23 * HOUR, HOUR).unwrap();
        let early = Window::new(30 * 60 * 1000, 2 * HOUR).unwrap();
        let noon = Window::new(12 * HOUR, 13 * HOUR).unwrap();
        let adjacent = Window::new(HOUR, 3 * HOUR).unwrap();
        assert!(late.overlaps(&early));
        assert!(early.overlaps(&late));
        assert!(!late.overlaps(&noon));
        assert!(!late.overlaps(&adjacent));
    }

    #[test]
    fn day_sets_parse_like_the_cli() {
        assert_eq!("mon".parse::<DaySet>().unwrap(), DaySet::MONDAY);
        assert_eq!("weekdays".parse::<DaySet>().unwrap(), DaySet::WEEK_DAYS);
        assert_eq!(
            "sat,Sunday".parse::<DaySet>().unwrap(),
            DaySet::WEEKEND
        );
        assert!("funday".parse::<DaySet>().is_err());
        assert_eq!(DaySet::MONDAY.union(DaySet::FRIDAY).to_string(), "mon,fri");
    }

    #[test]
    fn time_of_day_parsing() {
        assert_eq!(parse_time_of_day("07:30").unwrap(), (7 * 60 + 30) * 60 * 1000);
        assert_eq!(parse_time_of_day("00:00:01").unwrap(), 1000);
        assert_eq!(parse_time_of_day("24:00").unwrap(), MS_IN_DAY);
        assert_eq!(parse_time_of_day("5000").unwrap(), 5000);
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("7:75").is_err());
        assert_eq!(format_time_of_day(7 * HOUR + 1000), "07:00:01");
    }

    #[test]
    fn record_round_trip_keeps_fields() {
        let record = RuleRecord::new("wake", Mode::Increasing)
            .window(6 * HOUR, 7 * HOUR)
            .repeating(true)
            .on_days(DaySet::WEEK_DAYS);
        let rule = ScheduledRule::new(record.clone()).unwrap();
        assert_eq!(rule.record(), record);
        assert_eq!(
            rule.to_string(),
            "wake: increasing from 06:00 to 07:00, repeating on weekdays"
        );
    }
}
