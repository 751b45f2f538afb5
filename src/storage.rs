/*!
 # Schedule persistence

 The schedule file is TOML with one `[[rule]]` table per rule:

 ```toml
 [[rule]]
 name = "wake"
 mode = "INCREASING"
 start_time = 23400000
 end_time = 25200000
 repeat = true
 days_of_week = ["Mon", "Tue", "Wed", "Thu", "Fri"]
 ```
*/

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::schedule::RuleRecord;
use crate::{Error, Result};

/// Where rule records are loaded from and saved to
pub trait Storage: Send + Sync {
    fn load(&self) -> Result<Vec<RuleRecord>>;

    fn save(&self, records: &[RuleRecord]) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleFile<T> {
    #[serde(default = "Vec::new", rename = "rule")]
    rules: Vec<T>,
}

/// Parses the contents of a schedule file.
///
/// Only a file that is not TOML at all is an error. Each `[[rule]]` table is
/// decoded on its own and tables that do not decode are skipped.
pub fn parse_schedule(content: &str) -> Result<Vec<RuleRecord>> {
    let file: ScheduleFile<toml::Value> = toml::from_str(content)?;
    let records = file
        .rules
        .into_iter()
        .enumerate()
        .filter_map(|(index, table)| match RuleRecord::deserialize(table) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable rule #{}: {}", index + 1, e);
                None
            }
        })
        .collect();
    Ok(records)
}

/// Renders records as the contents of a schedule file
pub fn render_schedule(records: &[RuleRecord]) -> Result<String> {
    let file = ScheduleFile {
        rules: records.to_vec(),
    };
    Ok(toml::to_string_pretty(&file)?)
}

/// TOML schedule file on disk
#[derive(Debug, Clone)]
pub struct TomlFileStorage {
    path: PathBuf,
}

impl TomlFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for TomlFileStorage {
    /// A missing file is an empty schedule
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<Vec<RuleRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No schedule file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let records = parse_schedule(&content)?;
        debug!("Read {} rules", records.len());
        Ok(records)
    }

    /// Writes to a temporary file next to the target, then renames it over
    #[instrument(skip(self, records), fields(path = %self.path.display(), count = records.len()))]
    fn save(&self, records: &[RuleRecord]) -> Result<()> {
        let content = render_schedule(records)?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Persistence(format!("{}: {}", self.path.display(), e)))?;
        debug!("Schedule saved");
        Ok(())
    }
}

/// Keeps records in memory; used when no schedule file is configured
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<RuleRecord>>,
}

impl MemoryStorage {
    pub fn new(records: Vec<RuleRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn records(&self) -> Vec<RuleRecord> {
        self.records.lock().clone()
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Vec<RuleRecord>> {
        Ok(self.records())
    }

    fn save(&self, records: &[RuleRecord]) -> Result<()> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{DaySet, Mode};

    fn sample() -> Vec<RuleRecord> {
        vec![
            RuleRecord::new("wake", Mode::Increasing)
                .window(23_400_000, 25_200_000)
                .repeating(true)
                .on_days(DaySet::WEEK_DAYS),
            RuleRecord::new("lamp", Mode::Constant),
        ]
    }

    #[test]
    fn missing_file_is_empty_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TomlFileStorage::new(dir.path().join("schedule.toml"));
        assert!(storage.load().unwrap().is_empty());
    }

    #[test]
    fn saved_schedule_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TomlFileStorage::new(dir.path().join("schedule.toml"));
        storage.save(&sample()).unwrap();
        assert_eq!(storage.load().unwrap(), sample());
    }

    #[test]
    fn parses_hand_written_file() {
        let content = r#"
            [[rule]]
            name = "wake"
            mode = "INCREASING"
            start_time = 23400000
            end_time = 25200000
            repeat = true
            days_of_week = ["Mon", "tuesday", "wed"]

            [[rule]]
            name = "lamp"
            mode = "CONSTANT"
        "#;
        let records = parse_schedule(content).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].days_of_week,
            Some(DaySet::MONDAY.union(DaySet::TUESDAY).union(DaySet::WEDNESDAY))
        );
        assert!(!records[1].repeat);
        assert_eq!(records[1].start_time, None);
    }

    #[test]
    fn skips_rules_with_unknown_days_and_modes() {
        let content = r#"
            [[rule]]
            name = "wake"
            mode = "INCREASING"
            start_time = 23400000
            end_time = 25200000

            [[rule]]
            name = "typo"
            mode = "CONSTANT"
            days_of_week = ["Mnday"]

            [[rule]]
            name = "strobe"
            mode = "STROBE"
        "#;
        let records = parse_schedule(content).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["wake"]);
    }

    #[test]
    fn unreadable_rule_does_not_block_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.toml");
        fs::write(
            &path,
            "[[rule]]\nname = \"lamp\"\nmode = \"CONSTANT\"\n\n[[rule]]\nname = \"x\"\nmode = \"CONSTANT\"\ndays_of_week = [\"Funday\"]\n",
        )
        .unwrap();
        let records = TomlFileStorage::new(&path).load().unwrap();
        assert_eq!(records, vec![RuleRecord::new("lamp", Mode::Constant)]);
    }

    #[test]
    fn malformed_toml_is_still_an_error() {
        assert!(parse_schedule("[[rule]\nname = ").is_err());
    }

    #[test]
    fn empty_file_is_empty_schedule() {
        assert!(parse_schedule("").unwrap().is_empty());
    }
}
