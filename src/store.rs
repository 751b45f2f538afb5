/*!
 # Schedule store

 Owns the ordered set of scheduled rules and enforces the two store
 invariants on insert: unique names and no overlapping windows on
 intersecting days.

 The store never performs I/O. Mutations bump a generation counter and the
 owner takes a snapshot to persist once it has released any lock around the
 store.
*/

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::schedule::{RuleId, RuleRecord, ScheduledRule};

/// Rejection reasons for a rule that would break a store invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// Another rule already uses this name
    #[error("Two rules with the same name: {0}")]
    DuplicateName(String),

    /// The windows of two rules overlap on a shared day
    #[error("Rules {candidate} and {existing} overlap")]
    OverlapConflict {
        /// Name of the rule being added
        candidate: String,
        /// Name of the rule already in the store
        existing: String,
    },
}

/// Records captured after a mutation, tagged with the store generation so
/// an older snapshot never overwrites a newer one
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub generation: u64,
    pub records: Vec<RuleRecord>,
}

#[derive(Debug, Default)]
pub struct ScheduleStore {
    rules: Vec<ScheduledRule>,
    generation: u64,
    snapshotted: u64,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from persisted records.
    ///
    /// Invalid records and repeated names are skipped. Overlapping records
    /// are kept; the arbiter resolves them by store order.
    #[instrument(skip(records), fields(count = records.len()))]
    pub fn from_records(records: Vec<RuleRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            let name = record.name.clone();
            let rule = match ScheduledRule::new(record) {
                Ok(rule) => rule,
                Err(e) => {
                    warn!("Skipping invalid rule {}: {}", name, e);
                    continue;
                }
            };
            match store.check_conflict(&rule) {
                Err(ConflictError::DuplicateName(_)) => {
                    warn!("Skipping rule with duplicate name: {}", name);
                    continue;
                }
                Err(e) => warn!("Loaded schedule breaks the overlap invariant: {}", e),
                Ok(()) => {}
            }
            store.rules.push(rule);
        }
        debug!("Loaded {} rules", store.rules.len());
        store
    }

    /// Checks `rule` against every stored rule
    pub fn check_conflict(&self, rule: &ScheduledRule) -> Result<(), ConflictError> {
        if self.rules.iter().any(|r| r.name() == rule.name()) {
            return Err(ConflictError::DuplicateName(rule.name().to_string()));
        }
        match self.rules.iter().find(|other| other.conflicts_with(rule)) {
            Some(other) => Err(ConflictError::OverlapConflict {
                candidate: rule.name().to_string(),
                existing: other.name().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Appends a rule after checking it against the store invariants
    #[instrument(skip(self, rule), fields(name = rule.name()))]
    pub fn add(&mut self, rule: ScheduledRule) -> Result<RuleId, ConflictError> {
        self.check_conflict(&rule)?;
        let id = rule.id();
        info!("Added rule {}", rule);
        self.rules.push(rule);
        self.generation += 1;
        Ok(id)
    }

    /// Removes the rule called `name`; absent names are not an error
    #[instrument(skip(self))]
    pub fn remove(&mut self, name: &str) -> bool {
        match self.rules.iter().position(|r| r.name() == name) {
            Some(index) => {
                self.rules.remove(index);
                self.generation += 1;
                info!("Removed rule {}", name);
                true
            }
            None => {
                debug!("No rule named {} to remove", name);
                false
            }
        }
    }

    pub(crate) fn remove_id(&mut self, id: RuleId) -> Option<ScheduledRule> {
        let index = self.rules.iter().position(|r| r.id() == id)?;
        self.generation += 1;
        Some(self.rules.remove(index))
    }

    /// Rules in insertion order
    pub fn list(&self) -> &[ScheduledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&ScheduledRule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    pub(crate) fn get(&self, id: RuleId) -> Option<&ScheduledRule> {
        self.rules.iter().find(|r| r.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: RuleId) -> Option<&mut ScheduledRule> {
        self.rules.iter_mut().find(|r| r.id() == id)
    }

    pub(crate) fn rules_mut(&mut self) -> impl Iterator<Item = &mut ScheduledRule> {
        self.rules.iter_mut()
    }

    /// The rule currently holding control, if any
    pub fn active(&self) -> Option<&ScheduledRule> {
        self.rules.iter().find(|r| r.active)
    }

    /// Every pair of stored rules that conflicts, in store order
    pub fn overlaps(&self) -> Vec<(&ScheduledRule, &ScheduledRule)> {
        let mut pairs = Vec::new();
        for (i, a) in self.rules.iter().enumerate() {
            for b in &self.rules[i + 1..] {
                if a.conflicts_with(b) {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    pub fn records(&self) -> Vec<RuleRecord> {
        self.rules.iter().map(ScheduledRule::record).collect()
    }

    /// Records to persist if the store changed since the last snapshot
    pub fn take_snapshot(&mut self) -> Option<Snapshot> {
        if self.generation == self.snapshotted {
            return None;
        }
        self.snapshotted = self.generation;
        Some(Snapshot {
            generation: self.generation,
            records: self.records(),
        })
    }
}
