//! Conflict resolution strategies.
//!
//! One strategy is chosen per import run and applied to every conflict:
//!
//! | strategy        | resolution      | effect                                      |
//! |-----------------|-----------------|---------------------------------------------|
//! | `use_mine`      | `kept_existing` | persisted value stays                       |
//! | `use_theirs`    | `used_import`   | import value is written                     |
//! | `manual_review` | `flagged`       | the whole entity is deferred, nothing written |
//! | `merge`         | either          | newer `last_modified` wins, see below       |
//!
//! `merge` compares the `last_modified` of the persisted and the incoming
//! entity. The import wins only when it is strictly newer; equal timestamps
//! keep the persisted value. When either side has no timestamp the strategy
//! falls back to `use_theirs` and leaves a warning per field, so the
//! assumption is visible in the report.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::conflict::differs;
use crate::error::{Result, SyncError};
use crate::model::{ConflictRecord, Entity, FieldValue, LAST_MODIFIED, Resolution};

/// Run-wide conflict resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    UseMine,
    UseTheirs,
    ManualReview,
    Merge,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UseMine => "use_mine",
            Self::UseTheirs => "use_theirs",
            Self::ManualReview => "manual_review",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "use_mine" => Ok(Self::UseMine),
            "use_theirs" => Ok(Self::UseTheirs),
            "manual_review" => Ok(Self::ManualReview),
            "merge" => Ok(Self::Merge),
            other => Err(SyncError::Validation(format!(
                "unknown conflict strategy '{other}'"
            ))),
        }
    }
}

/// Outcome of reconciling one incoming entity with its persisted twin.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Entity to persist. Equal to the persisted entity when deferred.
    pub entity: Entity,
    /// Conflicts with their resolution set.
    pub conflicts: Vec<ConflictRecord>,
    /// The write is postponed for a human decision.
    pub deferred: bool,
    /// Persisting `entity` would change stored data.
    pub changed: bool,
    /// Assumptions worth surfacing as report warnings.
    pub notes: Vec<String>,
}

/// Applies one [`Strategy`] to conflicts.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionEngine {
    strategy: Strategy,
}

impl ResolutionEngine {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Resolves `conflicts` between `existing` and `incoming` and builds the
    /// entity to persist.
    ///
    /// Fields the persisted entity lacks are filled from the import whatever
    /// the strategy; only co-present differing fields are subject to it.
    pub fn resolve(
        &self,
        existing: &Entity,
        incoming: &Entity,
        mut conflicts: Vec<ConflictRecord>,
    ) -> Result<Resolved> {
        let mut notes = Vec::new();

        if self.strategy == Strategy::ManualReview && !conflicts.is_empty() {
            for conflict in &mut conflicts {
                conflict.resolution = Some(Resolution::Flagged);
            }
            return Ok(Resolved {
                entity: existing.clone(),
                conflicts,
                deferred: true,
                changed: false,
                notes,
            });
        }

        if !conflicts.is_empty() {
            let (resolution, fallback) = self.decide(existing, incoming);
            for conflict in &mut conflicts {
                conflict.resolution = Some(resolution);
                if let Some(stamped) = fallback {
                    notes.push(format!(
                        "merge: {} {} field '{}': last_modified {stamped}; used the import value",
                        conflict.entity_type, conflict.entity_key, conflict.field_name
                    ));
                }
            }
        }

        let existing_fields = existing.fields();
        let mut merged = existing.clone();
        for (name, value) in incoming.fields() {
            if name == LAST_MODIFIED {
                continue;
            }
            let apply = match conflicts.iter().find(|conflict| conflict.field_name == name) {
                Some(conflict) => conflict.resolution == Some(Resolution::UsedImport),
                None => !existing_fields.contains_key(name),
            };
            if apply && differs(existing_fields.get(name), &value) {
                merged.set_field(name, value)?;
            }
        }

        let mut changed = merged != *existing;
        if changed {
            if let Some(stamp) = incoming.last_modified() {
                merged.set_field(LAST_MODIFIED, FieldValue::Timestamp(stamp))?;
            }
            changed = merged != *existing;
        }

        Ok(Resolved {
            entity: merged,
            conflicts,
            deferred: false,
            changed,
            notes,
        })
    }

    /// Resolution for every conflict of one entity, plus a description of
    /// the missing timestamp when `merge` had to fall back.
    fn decide(&self, existing: &Entity, incoming: &Entity) -> (Resolution, Option<&'static str>) {
        match self.strategy {
            Strategy::UseMine => (Resolution::KeptExisting, None),
            Strategy::UseTheirs => (Resolution::UsedImport, None),
            Strategy::ManualReview => (Resolution::Flagged, None),
            Strategy::Merge => match (existing.last_modified(), incoming.last_modified()) {
                (Some(current), Some(candidate)) if candidate > current => {
                    (Resolution::UsedImport, None)
                }
                (Some(_), Some(_)) => (Resolution::KeptExisting, None),
                (Some(_), None) => (Resolution::UsedImport, Some("only on the persisted side")),
                (None, Some(_)) => (Resolution::UsedImport, Some("only on the import side")),
                (None, None) => (Resolution::UsedImport, Some("on neither side")),
            },
        }
    }
}
