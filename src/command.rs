/*!
 # Line protocol

 One command per line, whitespace separated, with rule fields given as
 `key=value` pairs:

 ```text
 add name=wake mode=increasing start=06:30 end=07:00 repeat=true days=weekdays
 remove wake
 list
 override mode=constant start=20:00 end=21:00
 clear-override
 dismiss
 status
 set 0.4
 fade 30 1.0
 timer 600 0
 flicker
 ```

 The daemon answers each command with zero or more reply lines followed by
 `OK`, or a single `ERR <message>` line.
*/

use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::runtime::LightService;
use crate::schedule::{parse_time_of_day, DaySet, Mode, RuleRecord};
use crate::{Error, Result};

/// Name given to an override when the command does not set one
pub const MANUAL_OVERRIDE_NAME: &str = "manual";

/// A parsed protocol command
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Add(RuleRecord),
    Remove(String),
    List,
    Override(RuleRecord),
    ClearOverride,
    Dismiss,
    Status,
    Set(f64),
    Fade { period: Duration, level: f64 },
    Timer { period: Duration, level: f64 },
    Flicker,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(message.into())
}

fn parse_level(input: Option<&str>) -> Result<f64> {
    let input = input.ok_or_else(|| invalid("missing level"))?;
    input
        .parse()
        .map_err(|_| invalid(format!("invalid level: {input}")))
}

fn parse_period(input: Option<&str>) -> Result<Duration> {
    let input = input.ok_or_else(|| invalid("missing period in seconds"))?;
    input
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| invalid(format!("invalid period: {input}")))
}

/// Builds a rule record from `key=value` tokens
fn parse_rule<'a>(
    tokens: impl Iterator<Item = &'a str>,
    default_name: Option<&str>,
) -> Result<RuleRecord> {
    let mut name = default_name.map(str::to_string);
    let mut mode = None;
    let mut start = None;
    let mut end = None;
    let mut repeat = false;
    let mut days = None;

    for token in tokens {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| invalid(format!("expected key=value, got {token}")))?;
        match key {
            "name" => name = Some(value.to_string()),
            "mode" => mode = Some(value.parse::<Mode>()?),
            "start" => start = Some(parse_time_of_day(value)?),
            "end" => end = Some(parse_time_of_day(value)?),
            "repeat" => {
                repeat = value
                    .parse()
                    .map_err(|_| invalid(format!("repeat must be true or false, got {value}")))?
            }
            "days" => days = Some(value.parse::<DaySet>()?),
            other => return Err(invalid(format!("unknown field: {other}"))),
        }
    }

    let name = name.ok_or_else(|| invalid("missing name"))?;
    let mode = mode.ok_or_else(|| invalid("missing mode"))?;
    Ok(RuleRecord {
        name,
        mode,
        start_time: start,
        end_time: end,
        repeat,
        days_of_week: days,
    })
}

impl FromStr for Request {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next().ok_or_else(|| invalid("no command given"))?;
        let request = match command {
            "add" => Request::Add(parse_rule(&mut tokens, None)?),
            "remove" => {
                let name = tokens.next().ok_or_else(|| invalid("missing rule name"))?;
                Request::Remove(name.to_string())
            }
            "list" => Request::List,
            "override" => Request::Override(parse_rule(&mut tokens, Some(MANUAL_OVERRIDE_NAME))?),
            "clear-override" => Request::ClearOverride,
            "dismiss" => Request::Dismiss,
            "status" => Request::Status,
            "set" => Request::Set(parse_level(tokens.next())?),
            "fade" => Request::Fade {
                period: parse_period(tokens.next())?,
                level: parse_level(tokens.next())?,
            },
            "timer" => Request::Timer {
                period: parse_period(tokens.next())?,
                level: parse_level(tokens.next())?,
            },
            "flicker" => Request::Flicker,
            other => return Err(invalid(format!("unknown command: {other}"))),
        };
        if let Some(extra) = tokens.next() {
            return Err(invalid(format!("unexpected argument: {extra}")));
        }
        Ok(request)
    }
}

/// Runs `request` against `service` and returns the reply lines
#[instrument(skip(service))]
pub fn execute(service: &LightService, request: Request) -> Result<Vec<String>> {
    let replies = match request {
        Request::Add(record) => {
            let name = record.name.clone();
            let id = service.add_rule(record)?;
            vec![format!("added {name} id={id}")]
        }
        Request::Remove(name) => {
            if service.remove_rule(&name) {
                vec![format!("removed {name}")]
            } else {
                vec![format!("no rule named {name}")]
            }
        }
        Request::List => service
            .list_rules()
            .iter()
            .map(|rule| {
                let mut line = rule.to_string();
                if rule.is_active_flag() {
                    line.push_str(" [active]");
                }
                if rule.is_dismissed() {
                    line.push_str(" [dismissed]");
                }
                line
            })
            .collect(),
        Request::Override(record) => {
            service.set_manual_override(record)?;
            vec!["override set".to_string()]
        }
        Request::ClearOverride => {
            if service.clear_manual_override() {
                vec!["override cleared".to_string()]
            } else {
                vec!["no override".to_string()]
            }
        }
        Request::Dismiss => {
            if service.dismiss_active() {
                vec!["dismissed".to_string()]
            } else {
                vec!["nothing to dismiss".to_string()]
            }
        }
        Request::Status => vec![service.status().to_string()],
        Request::Set(level) => {
            service.set_now(level)?;
            Vec::new()
        }
        Request::Fade { period, level } => {
            service.fade(period, level)?;
            Vec::new()
        }
        Request::Timer { period, level } => {
            service.timer(period, level)?;
            Vec::new()
        }
        Request::Flicker => {
            service.flicker();
            Vec::new()
        }
    };
    debug!("Replying with {} lines", replies.len());
    Ok(replies)
}

/// Parses and executes one protocol line, rendering the full response
pub fn respond(service: &LightService, line: &str) -> Vec<String> {
    match line.parse().and_then(|request| execute(service, request)) {
        Ok(mut replies) => {
            replies.push("OK".to_string());
            replies
        }
        Err(e) => vec![format!("ERR {e}")],
    }
}
