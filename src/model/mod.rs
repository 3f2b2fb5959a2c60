//! Normalised in-memory representation of the records exchanged with the
//! central store.

mod entities;
pub mod report;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub use entities::{Course, Instructor, Offering, Outcome, Section, Term};
pub use report::{
    AdapterDescriptor, CompatibilityResult, ConflictRecord, FileFormat, ImportReport,
    ImportStatistics, Resolution,
};

/// The kinds of record an adapter can populate. Ordering follows the
/// dependency order used when persisting a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Course,
    Instructor,
    Term,
    Offering,
    Section,
    Outcome,
}

impl EntityType {
    /// Every entity type in dependency order.
    pub const ALL: [EntityType; 6] = [
        EntityType::Course,
        EntityType::Instructor,
        EntityType::Term,
        EntityType::Offering,
        EntityType::Section,
        EntityType::Outcome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Instructor => "instructor",
            Self::Term => "term",
            Self::Offering => "offering",
            Self::Section => "section",
            Self::Outcome => "outcome",
        }
    }

    /// Plural name used for export tables and JSON collections.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Course => "courses",
            Self::Instructor => "instructors",
            Self::Term => "terms",
            Self::Offering => "offerings",
            Self::Section => "sections",
            Self::Outcome => "outcomes",
        }
    }

    /// Parses a plural table name. Returns `None` for unknown collections.
    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|entity_type| entity_type.table_name() == name.trim().to_lowercase())
    }

    /// Field layout for this entity type, natural key parts first.
    pub fn schema(&self) -> &'static [FieldSpec] {
        match self {
            Self::Course => Course::SCHEMA,
            Self::Instructor => Instructor::SCHEMA,
            Self::Term => Term::SCHEMA,
            Self::Offering => Offering::SCHEMA,
            Self::Section => Section::SCHEMA,
            Self::Outcome => Outcome::SCHEMA,
        }
    }

    /// Looks up a field definition by canonical name.
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.schema().iter().find(|spec| spec.name == name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive shape of a field, used to parse raw cell text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Timestamp,
}

/// Static description of one entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Part of the natural key.
    pub key: bool,
}

impl FieldSpec {
    pub(crate) const fn key(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
            key: true,
        }
    }

    pub(crate) const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
            key: false,
        }
    }

    pub(crate) const fn number(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Number,
            key: false,
        }
    }

    pub(crate) const fn timestamp(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Timestamp,
            key: false,
        }
    }
}

/// Attribute holding bookkeeping metadata rather than business data.
pub const LAST_MODIFIED: &str = "last_modified";

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Parses raw cell text according to the declared field kind.
    pub fn parse(spec: &FieldSpec, raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        match spec.kind {
            FieldKind::Text => Ok(FieldValue::Text(trimmed.to_string())),
            FieldKind::Number => trimmed.parse::<f64>().map(FieldValue::Number).map_err(|_| {
                SyncError::Validation(format!(
                    "field '{}' expects a number, found '{trimmed}'",
                    spec.name
                ))
            }),
            FieldKind::Timestamp => DateTime::parse_from_rfc3339(trimmed)
                .map(|value| FieldValue::Timestamp(value.with_timezone(&Utc)))
                .map_err(|_| {
                    SyncError::Validation(format!(
                        "field '{}' expects an RFC 3339 timestamp, found '{trimmed}'",
                        spec.name
                    ))
                }),
        }
    }

    /// Compares values after trimming and case-folding text and using numeric
    /// equality for numbers, so formatting noise alone never differs.
    pub fn normalized_eq(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Text(lhs), FieldValue::Text(rhs)) => {
                lhs.trim().to_lowercase() == rhs.trim().to_lowercase()
            }
            (FieldValue::Number(lhs), FieldValue::Number(rhs)) => (lhs - rhs).abs() < f64::EPSILON,
            (FieldValue::Timestamp(lhs), FieldValue::Timestamp(rhs)) => lhs == rhs,
            _ => false,
        }
    }

    /// Converts the value into the JSON representation used in reports.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(value) => serde_json::Value::String(value.clone()),
            FieldValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Timestamp(value) => serde_json::Value::String(value.to_rfc3339()),
        }
    }

    /// Renders the value as a spreadsheet cell.
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Text(value) => value.clone(),
            FieldValue::Number(value) => value.to_string(),
            FieldValue::Timestamp(value) => value.to_rfc3339(),
        }
    }

    pub(crate) fn into_text(self) -> String {
        match self {
            FieldValue::Text(value) => value,
            other => other.to_cell(),
        }
    }

    pub(crate) fn as_number(&self, field: &str) -> Result<f64> {
        match self {
            FieldValue::Number(value) => Ok(*value),
            FieldValue::Text(value) => value.trim().parse::<f64>().map_err(|_| {
                SyncError::Validation(format!("field '{field}' expects a number, found '{value}'"))
            }),
            FieldValue::Timestamp(_) => Err(SyncError::Validation(format!(
                "field '{field}' expects a number, found a timestamp"
            ))),
        }
    }

    pub(crate) fn as_count(&self, field: &str) -> Result<u32> {
        let value = self.as_number(field)?;
        if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
            return Err(SyncError::Validation(format!(
                "field '{field}' expects a whole, non-negative number, found {value}"
            )));
        }
        Ok(value as u32)
    }

    pub(crate) fn as_timestamp(&self, field: &str) -> Result<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(value) => Ok(*value),
            FieldValue::Text(value) => DateTime::parse_from_rfc3339(value.trim())
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|_| {
                    SyncError::Validation(format!(
                        "field '{field}' expects an RFC 3339 timestamp, found '{value}'"
                    ))
                }),
            FieldValue::Number(_) => Err(SyncError::Validation(format!(
                "field '{field}' expects a timestamp, found a number"
            ))),
        }
    }
}

/// Business identifier used to match an incoming entity with a persisted one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub entity_type: EntityType,
    pub institution_id: String,
    pub parts: Vec<String>,
}

impl NaturalKey {
    /// Key value without the institution prefix, as shown in reports.
    pub fn value(&self) -> String {
        self.parts.join("|")
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.value())
    }
}

/// Tagged union of every normalised record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum Entity {
    Course(Course),
    Instructor(Instructor),
    Term(Term),
    Offering(Offering),
    Section(Section),
    Outcome(Outcome),
}

macro_rules! dispatch {
    ($entity:expr, $inner:ident => $body:expr) => {
        match $entity {
            Entity::Course($inner) => $body,
            Entity::Instructor($inner) => $body,
            Entity::Term($inner) => $body,
            Entity::Offering($inner) => $body,
            Entity::Section($inner) => $body,
            Entity::Outcome($inner) => $body,
        }
    };
}

impl Entity {
    /// Creates an entity of the given type with empty key parts, ready to be
    /// filled through [`Entity::set_field`].
    pub fn blank(entity_type: EntityType, institution_id: &str) -> Self {
        let institution_id = institution_id.to_string();
        match entity_type {
            EntityType::Course => Entity::Course(Course::new(institution_id, String::new())),
            EntityType::Instructor => {
                Entity::Instructor(Instructor::new(institution_id, String::new()))
            }
            EntityType::Term => Entity::Term(Term::new(institution_id, String::new())),
            EntityType::Offering => {
                Entity::Offering(Offering::new(institution_id, String::new(), String::new()))
            }
            EntityType::Section => Entity::Section(Section::new(
                institution_id,
                String::new(),
                String::new(),
                String::new(),
            )),
            EntityType::Outcome => {
                Entity::Outcome(Outcome::new(institution_id, String::new(), String::new()))
            }
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Course(_) => EntityType::Course,
            Entity::Instructor(_) => EntityType::Instructor,
            Entity::Term(_) => EntityType::Term,
            Entity::Offering(_) => EntityType::Offering,
            Entity::Section(_) => EntityType::Section,
            Entity::Outcome(_) => EntityType::Outcome,
        }
    }

    pub fn institution_id(&self) -> &str {
        dispatch!(self, inner => &inner.institution_id)
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            entity_type: self.entity_type(),
            institution_id: self.institution_id().to_string(),
            parts: dispatch!(self, inner => inner.key_parts()),
        }
    }

    /// Present attributes keyed by canonical field name. Absent optional
    /// attributes are omitted.
    pub fn fields(&self) -> BTreeMap<&'static str, FieldValue> {
        dispatch!(self, inner => inner.fields())
    }

    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields().remove(name)
    }

    /// Assigns an attribute by canonical name.
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let entity_type = self.entity_type();
        let handled = dispatch!(self, inner => inner.set_field(name, value)?);
        if handled {
            Ok(())
        } else {
            Err(SyncError::Validation(format!(
                "{entity_type} has no field named '{name}'"
            )))
        }
    }

    /// Parses raw text for a named field and assigns it.
    pub fn set_raw(&mut self, name: &str, raw: &str) -> Result<()> {
        let spec = self.entity_type().field(name).ok_or_else(|| {
            SyncError::Validation(format!(
                "{} has no field named '{name}'",
                self.entity_type()
            ))
        })?;
        let value = FieldValue::parse(spec, raw)?;
        self.set_field(name, value)
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        dispatch!(self, inner => inner.last_modified)
    }

    /// Copies every attribute present on `later` onto this entity, so
    /// repeated rows for one key amend rather than duplicate.
    pub fn amend(&mut self, later: &Entity) -> Result<()> {
        for (name, value) in later.fields() {
            self.set_field(name, value)?;
        }
        Ok(())
    }

    /// Ensures every natural key part is populated.
    pub fn ensure_key(&self) -> Result<()> {
        let key = self.natural_key();
        let schema = self.entity_type().schema();
        for (spec, part) in schema.iter().filter(|spec| spec.key).zip(&key.parts) {
            if part.trim().is_empty() {
                return Err(SyncError::Validation(format!(
                    "{} is missing required field '{}'",
                    key.entity_type, spec.name
                )));
            }
        }
        if key.institution_id.trim().is_empty() {
            return Err(SyncError::Validation(format!(
                "{} has no institution scope",
                key.entity_type
            )));
        }
        Ok(())
    }
}
