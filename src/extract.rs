//! Adapter-agnostic helpers that turn institution spellings into normalised
//! entity attributes.
//!
//! All functions here are deterministic. The [`ExtractionContext`] carries the
//! state that must stay stable for the length of one import run: the
//! instructor cache that makes name-based synthesis idempotent, the defaults
//! inferred for fields a file leaves empty, and the warnings raised along the
//! way.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::{Entity, FieldValue, Instructor, NaturalKey, Term};

/// Department assigned when a course prefix has no mapping.
pub const UNCLASSIFIED_DEPARTMENT: &str = "Unclassified";

/// Canonical season codes, in calendar order.
pub const SEASON_CODES: [&str; 4] = ["WI", "SP", "SU", "FA"];

/// The caller's acting scope. Authorisation happens before the core is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionScope {
    pub institution_id: String,
    /// Domain used when synthesising instructor email addresses.
    pub email_domain: String,
}

impl InstitutionScope {
    pub fn new(institution_id: impl Into<String>, email_domain: impl Into<String>) -> Self {
        Self {
            institution_id: institution_id.into(),
            email_domain: email_domain.into(),
        }
    }
}

/// Lookup tables an adapter supplies to the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorTables {
    /// Course prefix → department name.
    pub departments: BTreeMap<String, String>,
    /// Institution season spelling → canonical season code.
    pub seasons: BTreeMap<String, String>,
}

impl Default for ExtractorTables {
    fn default() -> Self {
        let seasons = [
            ("FALL", "FA"),
            ("AUTUMN", "FA"),
            ("FA", "FA"),
            ("SPRING", "SP"),
            ("SP", "SP"),
            ("SUMMER", "SU"),
            ("SUM", "SU"),
            ("SU", "SU"),
            ("WINTER", "WI"),
            ("WI", "WI"),
        ]
        .into_iter()
        .map(|(spelling, code)| (spelling.to_string(), code.to_string()))
        .collect();

        Self {
            departments: BTreeMap::new(),
            seasons,
        }
    }
}

/// Normalises a course number: whitespace removed, letters upper-cased, and a
/// single hyphen between the alphabetic prefix and the numeric suffix.
///
/// `"acc201"` and `"ACC 201"` both become `"ACC-201"`.
pub fn normalize_course_number(raw: &str) -> Result<String> {
    let compact: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();

    let prefix: String = compact
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    let rest = compact[prefix.len()..].trim_start_matches(['-', '_']);

    if prefix.is_empty() || rest.is_empty() || !rest.starts_with(|ch: char| ch.is_ascii_digit()) {
        return Err(SyncError::Validation(format!(
            "course number '{}' must be a letter prefix followed by a number",
            raw.trim()
        )));
    }

    Ok(format!("{prefix}-{rest}"))
}

/// Returns the alphabetic prefix of a normalised course number.
pub fn course_prefix(course_number: &str) -> &str {
    course_number
        .split('-')
        .next()
        .unwrap_or(course_number)
}

/// Maps a course prefix onto a department name, if the adapter knows it.
pub fn infer_department<'a>(prefix: &str, tables: &'a ExtractorTables) -> Option<&'a str> {
    tables
        .departments
        .get(&prefix.to_uppercase())
        .map(String::as_str)
}

/// A term name broken into its canonical parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTerm {
    pub season: String,
    pub year: i32,
}

impl CanonicalTerm {
    /// Canonical `{SEASON}{YYYY}` token, e.g. `FA2024`.
    pub fn name(&self) -> String {
        format!("{}{:04}", self.season, self.year)
    }
}

/// Maps an institution-local term spelling onto the canonical form.
///
/// Accepts one alphabetic season token and one numeric year token in either
/// order, optionally separated by spaces, hyphens, underscores or slashes:
/// `"2024 Fall"`, `"Fall 2024"`, `"FA24"`, `"2024FA"` and `"FA2024"` all
/// become `FA2024`. Two-digit years are read as 20YY. Anything else is a
/// validation error.
pub fn canonicalize_term(raw: &str, tables: &ExtractorTables) -> Result<CanonicalTerm> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '-' | '_' | '/' | '.'))
        .flat_map(char::to_uppercase)
        .collect();

    let invalid = || SyncError::Validation(format!("unrecognised term format '{}'", raw.trim()));

    let split = compact
        .find(|ch: char| ch.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (alpha, digits) = if split == 0 {
        let boundary = compact
            .find(|ch: char| !ch.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (digits, alpha) = compact.split_at(boundary);
        (alpha, digits)
    } else {
        compact.split_at(split)
    };

    if !alpha.chars().all(|ch| ch.is_ascii_alphabetic())
        || !digits.chars().all(|ch| ch.is_ascii_digit())
    {
        return Err(invalid());
    }

    let season = tables
        .seasons
        .get(alpha)
        .filter(|code| SEASON_CODES.contains(&code.as_str()))
        .ok_or_else(invalid)?;

    let year = match digits.len() {
        2 => 2000 + digits.parse::<i32>().map_err(|_| invalid())?,
        4 => digits.parse::<i32>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    Ok(CanonicalTerm {
        season: season.clone(),
        year,
    })
}

/// Zero-pads purely numeric section numbers to three digits.
pub fn normalize_section_number(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    // Spreadsheet cells sometimes carry integral floats such as "1.0".
    let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(SyncError::Validation("section number is empty".into()));
    }
    if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        Ok(format!("{trimmed:0>3}"))
    } else {
        Ok(trimmed.to_uppercase())
    }
}

/// Splits a free-text display name into first and last name.
///
/// Supports `"First Last"`, `"First Middle Last"` and `"Last, First"`.
pub fn split_display_name(display_name: &str) -> Result<(String, Option<String>)> {
    let cleaned = display_name.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return Err(SyncError::Validation("instructor name is empty".into()));
    }

    if let Some((last, first)) = cleaned.split_once(',') {
        let first = first.trim();
        let last = last.trim();
        if !first.is_empty() && !last.is_empty() {
            let first = first.split(' ').next().unwrap_or(first);
            return Ok((first.to_string(), Some(last.to_string())));
        }
    }

    let parts: Vec<&str> = cleaned.split(' ').collect();
    match parts.as_slice() {
        [single] => Ok((single.trim_matches(',').to_string(), None)),
        [first, .., last] => Ok((first.to_string(), Some(last.to_string()))),
        [] => Err(SyncError::Validation("instructor name is empty".into())),
    }
}

fn email_token(value: &str) -> String {
    value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

/// Builds `firstname.lastname@domain` for a display name.
pub fn synthesize_email(display_name: &str, domain: &str) -> Result<String> {
    let (first, last) = split_display_name(display_name)?;
    let first = email_token(&first);
    let local = match last.map(|last| email_token(&last)) {
        Some(last) if !last.is_empty() && !first.is_empty() => format!("{first}.{last}"),
        Some(last) if first.is_empty() => last,
        _ => first,
    };
    if local.is_empty() {
        return Err(SyncError::Validation(format!(
            "cannot derive an email address from instructor name '{}'",
            display_name.trim()
        )));
    }
    Ok(format!("{local}@{}", domain.trim().trim_start_matches('@').to_lowercase()))
}

fn normalized_name(display_name: &str) -> String {
    display_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A value derived by the extractor rather than read from the file.
#[derive(Debug, Clone, PartialEq)]
pub struct InferredValue {
    pub value: FieldValue,
    /// Warning raised only when the value is actually used.
    pub note: Option<String>,
}

/// Inferred defaults of one run, by entity and field.
pub type InferredFields = BTreeMap<NaturalKey, BTreeMap<&'static str, InferredValue>>;

fn is_blank(value: &FieldValue) -> bool {
    matches!(value, FieldValue::Text(text) if text.trim().is_empty())
}

/// Fills the fields that neither `entity` nor the `existing` record carries
/// from `defaults`. Returns the notes of the defaults that were used.
///
/// Inferred values never replace data, so they take no part in coalescing or
/// conflict detection.
pub fn apply_inferred(
    entity: &mut Entity,
    defaults: Option<&BTreeMap<&'static str, InferredValue>>,
    existing: Option<&Entity>,
) -> Result<Vec<String>> {
    let carries = |record: &Entity, field: &str| {
        record
            .field(field)
            .is_some_and(|value| !is_blank(&value))
    };

    let mut notes = Vec::new();
    for (&field, inferred) in defaults.into_iter().flatten() {
        if carries(&*entity, field) || existing.is_some_and(|record| carries(record, field)) {
            continue;
        }
        entity.set_field(field, inferred.value.clone())?;
        notes.extend(inferred.note.clone());
    }
    Ok(notes)
}

/// Per-run extraction state shared by every row of one file.
#[derive(Debug)]
pub struct ExtractionContext<'a> {
    scope: &'a InstitutionScope,
    tables: &'a ExtractorTables,
    instructors: HashMap<String, Instructor>,
    inferred: InferredFields,
    warnings: BTreeSet<String>,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(scope: &'a InstitutionScope, tables: &'a ExtractorTables) -> Self {
        Self {
            scope,
            tables,
            instructors: HashMap::new(),
            inferred: BTreeMap::new(),
            warnings: BTreeSet::new(),
        }
    }

    pub fn institution_id(&self) -> &str {
        &self.scope.institution_id
    }

    pub fn tables(&self) -> &ExtractorTables {
        self.tables
    }

    /// Department for a normalised course number. Unmapped prefixes yield
    /// [`UNCLASSIFIED_DEPARTMENT`] with a note explaining the fallback.
    pub fn department_for(&self, course_number: &str) -> InferredValue {
        let prefix = course_prefix(course_number);
        match infer_department(prefix, self.tables) {
            Some(department) => InferredValue {
                value: FieldValue::Text(department.to_string()),
                note: None,
            },
            None => InferredValue {
                value: FieldValue::Text(UNCLASSIFIED_DEPARTMENT.to_string()),
                note: Some(format!(
                    "course prefix '{prefix}' has no department mapping; \
                     assigned '{UNCLASSIFIED_DEPARTMENT}'"
                )),
            },
        }
    }

    /// Records a default for `field` of the entity under `key`. The first
    /// default recorded for a field wins.
    pub fn infer(&mut self, key: NaturalKey, field: &'static str, value: InferredValue) {
        self.inferred
            .entry(key)
            .or_default()
            .entry(field)
            .or_insert(value);
    }

    /// Records the prefix-derived department of `course_number` as the
    /// default department of the entity under `key`.
    pub fn infer_department_of(&mut self, key: NaturalKey, course_number: &str) {
        let department = self.department_for(course_number);
        self.infer(key, "department", department);
    }

    /// Drains the inferred defaults collected so far.
    pub fn take_inferred(&mut self) -> InferredFields {
        std::mem::take(&mut self.inferred)
    }

    /// Builds the term entity for a raw term spelling.
    pub fn term(&self, raw: &str) -> Result<Term> {
        let canonical = canonicalize_term(raw, self.tables)?;
        let mut term = Term::new(self.scope.institution_id.clone(), canonical.name());
        term.season = Some(canonical.season);
        term.year = Some(canonical.year);
        Ok(term)
    }

    /// Returns the instructor for a display name, synthesising it on first
    /// sight. Later rows naming the same person get the same entity back.
    pub fn instructor(
        &mut self,
        display_name: &str,
        department: Option<&str>,
        email: Option<&str>,
    ) -> Result<Instructor> {
        let name_key = normalized_name(display_name);
        if let Some(existing) = self.instructors.get(&name_key) {
            return Ok(existing.clone());
        }

        let (first, last) = split_display_name(display_name)?;
        let email = match email.map(str::trim).filter(|email| !email.is_empty()) {
            Some(email) if email.contains('@') => email.to_lowercase(),
            Some(email) => {
                return Err(SyncError::Validation(format!(
                    "instructor email '{email}' is not an email address"
                )));
            }
            None => synthesize_email(display_name, &self.scope.email_domain)?,
        };

        let mut instructor = Instructor::new(self.scope.institution_id.clone(), email);
        instructor.first_name = Some(first);
        instructor.last_name = last;
        instructor.display_name = Some(
            display_name
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        );
        instructor.department = department.map(str::to_string);

        self.instructors.insert(name_key, instructor.clone());
        Ok(instructor)
    }

    /// Makes an instructor read with an explicit email the one later rows
    /// get back for the same display name.
    pub fn register_instructor(&mut self, instructor: &Instructor) {
        let Some(display_name) = instructor.display_name.as_deref() else {
            return;
        };
        let name_key = normalized_name(display_name);
        if name_key.is_empty() {
            return;
        }
        self.instructors
            .entry(name_key)
            .or_insert_with(|| instructor.clone());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.insert(message.into());
    }

    /// Drains the warnings collected so far, in sorted order.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings).into_iter().collect()
    }
}
