/*!
 # Daemon configuration

 Settings come from an optional TOML file; every field has a default so an
 empty or missing file yields a working log-only daemon:

 ```toml
 schedule_file = "/var/lib/easy-mornings/schedule.toml"

 [polling]
 min_ms = 100
 max_ms = 2000

 [sink]
 kind = "sysfs-pwm"
 chip = "/sys/class/pwm/pwmchip0"
 channel = 0
 period_ns = 1000000
 ```
*/

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::sink::{LogSink, OutputSink, SysfsPwmSink};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where the schedule is persisted; in-memory only when unset
    pub schedule_file: Option<PathBuf>,
    pub polling: PollingConfig,
    pub sink: SinkConfig,
}

/// Control loop backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    /// Fast polling delay, used while something is changing
    pub min_ms: u64,
    /// Backoff cap while nothing is changing
    pub max_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            min_ms: 100,
            max_ms: 2000,
        }
    }
}

impl PollingConfig {
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

fn default_period_ns() -> u64 {
    1_000_000
}

/// Output driver selection
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SinkConfig {
    /// Report levels in the log only
    #[default]
    Log,
    /// Linux sysfs PWM channel
    SysfsPwm {
        chip: PathBuf,
        #[serde(default)]
        channel: u32,
        #[serde(default = "default_period_ns")]
        period_ns: u64,
    },
}

impl SinkConfig {
    /// Opens the configured output
    pub fn open(&self) -> Result<Box<dyn OutputSink>> {
        match self {
            SinkConfig::Log => Ok(Box::new(LogSink::new())),
            SinkConfig::SysfsPwm {
                chip,
                channel,
                period_ns,
            } => Ok(Box::new(SysfsPwmSink::open(chip, *channel, *period_ns)?)),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file
    #[instrument]
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        let config = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let PollingConfig { min_ms, max_ms } = self.polling;
        if min_ms == 0 {
            return Err(Error::Config("polling.min_ms must be positive".to_string()));
        }
        if min_ms > max_ms {
            return Err(Error::Config(format!(
                "polling.min_ms ({min_ms}) exceeds polling.max_ms ({max_ms})"
            )));
        }
        if let SinkConfig::SysfsPwm { period_ns: 0, .. } = self.sink {
            return Err(Error::Config("sink.period_ns must be positive".to_string()));
        }
        Ok(())
    }
}
