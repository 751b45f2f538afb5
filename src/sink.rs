/*!
 # Light outputs

 The control loop pushes levels in `[0, 1]` to an [`OutputSink`]. A sink that
 returns an error or panics is retried with the same level on the next tick.
*/

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{Error, Result};

/// PWM resolution used by the perceptual duty curve
pub const PWM_RANGE: u32 = 255;

/// Something that can be driven to a light level
pub trait OutputSink: Send {
    /// Applies a level in `[0, 1]`
    fn set_level(&mut self, level: f64) -> Result<()>;

    /// Whether the light is currently emitting
    fn is_on(&self) -> bool;
}

/// Sink that only reports levels through the log
#[derive(Debug, Default)]
pub struct LogSink {
    level: f64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for LogSink {
    fn set_level(&mut self, level: f64) -> Result<()> {
        if self.level != level {
            info!("Light level is {}%", (level * 100.0).round());
        }
        self.level = level;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.level > 0.0
    }
}

/// Maps a level onto a duty value in `0..=PWM_RANGE`.
///
/// Eyes perceive brightness roughly quadratically, and the lowest duty
/// values do not light most LEDs, so partial levels start at 2.
pub fn perceptual_duty(level: f64) -> u32 {
    let level = level.clamp(0.0, 1.0);
    if level >= 1.0 {
        PWM_RANGE
    } else if level <= 0.0 {
        0
    } else {
        2 + (level * level * f64::from(PWM_RANGE - 2)).round() as u32
    }
}

/// Drives a Linux sysfs PWM channel (`/sys/class/pwm/pwmchipN/pwmM`)
#[derive(Debug)]
pub struct SysfsPwmSink {
    channel_dir: PathBuf,
    period_ns: u64,
    duty: u32,
    enabled: bool,
}

impl SysfsPwmSink {
    /// Opens channel `channel` of `chip`, exporting it if needed, and
    /// programs the period
    #[instrument]
    pub fn open(chip: &Path, channel: u32, period_ns: u64) -> Result<Self> {
        if period_ns == 0 {
            return Err(Error::Sink("PWM period must be positive".to_string()));
        }
        let channel_dir = chip.join(format!("pwm{channel}"));
        if !channel_dir.exists() {
            debug!("Exporting PWM channel {}", channel);
            write_attr(&chip.join("export"), &channel.to_string())?;
        }
        write_attr(&channel_dir.join("period"), &period_ns.to_string())?;
        info!("Using PWM channel {}", channel_dir.display());
        Ok(Self {
            channel_dir,
            period_ns,
            duty: 0,
            enabled: false,
        })
    }

    fn duty_ns(&self, duty: u32) -> u64 {
        self.period_ns * u64::from(duty) / u64::from(PWM_RANGE)
    }
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value)
        .map_err(|e| Error::Sink(format!("writing {} to {}: {}", value, path.display(), e)))
}

impl OutputSink for SysfsPwmSink {
    fn set_level(&mut self, level: f64) -> Result<()> {
        let duty = perceptual_duty(level);
        if duty == self.duty && self.enabled {
            return Ok(());
        }
        write_attr(&self.channel_dir.join("duty_cycle"), &self.duty_ns(duty).to_string())?;
        if !self.enabled {
            write_attr(&self.channel_dir.join("enable"), "1")?;
            self.enabled = true;
        }
        debug!("PWM duty {}/{} for level {:.3}", duty, PWM_RANGE, level);
        self.duty = duty;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.enabled && self.duty > 0
    }
}

impl Drop for SysfsPwmSink {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = write_attr(&self.channel_dir.join("enable"), "0") {
                warn!("Failed to disable PWM channel: {}", e);
            }
        }
    }
}

/// Sink that records every level it receives; the history stays readable
/// through a cloned handle after the sink has been moved into a control loop
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    levels: Arc<Mutex<Vec<f64>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> Vec<f64> {
        self.levels.lock().clone()
    }

    pub fn last(&self) -> Option<f64> {
        self.levels.lock().last().copied()
    }
}

impl OutputSink for RecordingSink {
    fn set_level(&mut self, level: f64) -> Result<()> {
        self.levels.lock().push(level);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.last().is_some_and(|l| l > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duty_curve_endpoints_and_shape() {
        assert_eq!(perceptual_duty(0.0), 0);
        assert_eq!(perceptual_duty(1.0), PWM_RANGE);
        assert_eq!(perceptual_duty(0.001), 2);
        assert_eq!(perceptual_duty(0.5), 2 + 63);
        assert_eq!(perceptual_duty(7.0), PWM_RANGE);
    }

    #[test]
    fn log_sink_tracks_on_state() {
        let mut sink = LogSink::new();
        assert!(!sink.is_on());
        sink.set_level(0.3).unwrap();
        assert!(sink.is_on());
        sink.set_level(0.0).unwrap();
        assert!(!sink.is_on());
    }

    #[test]
    fn sysfs_sink_writes_channel_attributes() {
        let chip = tempfile::tempdir().unwrap();
        fs::create_dir(chip.path().join("pwm0")).unwrap();

        let mut sink = SysfsPwmSink::open(chip.path(), 0, 1_000_000).unwrap();
        let read = |name: &str| fs::read_to_string(chip.path().join("pwm0").join(name)).unwrap();
        assert_eq!(read("period"), "1000000");

        sink.set_level(1.0).unwrap();
        assert_eq!(read("duty_cycle"), "1000000");
        assert_eq!(read("enable"), "1");
        assert!(sink.is_on());

        sink.set_level(0.0).unwrap();
        assert_eq!(read("duty_cycle"), "0");
        assert!(!sink.is_on());

        drop(sink);
        assert_eq!(read("enable"), "0");
    }

    #[test]
    fn sysfs_sink_rejects_zero_period() {
        let chip = tempfile::tempdir().unwrap();
        assert!(matches!(
            SysfsPwmSink::open(chip.path(), 0, 0),
            Err(Error::Sink(_))
        ));
    }

    #[test]
    fn recording_sink_shares_history() {
        let sink = RecordingSink::new();
        let mut moved = sink.clone();
        moved.set_level(0.25).unwrap();
        assert_eq!(sink.levels(), vec![0.25]);
        assert!(sink.is_on());
    }
}
