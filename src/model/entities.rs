use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::{FieldSpec, FieldValue};

type Fields = BTreeMap<&'static str, FieldValue>;

fn push_text(fields: &mut Fields, name: &'static str, value: &Option<String>) {
    if let Some(value) = value {
        fields.insert(name, FieldValue::Text(value.clone()));
    }
}

fn push_number(fields: &mut Fields, name: &'static str, value: Option<f64>) {
    if let Some(value) = value {
        fields.insert(name, FieldValue::Number(value));
    }
}

fn push_timestamp(fields: &mut Fields, name: &'static str, value: Option<DateTime<Utc>>) {
    if let Some(value) = value {
        fields.insert(name, FieldValue::Timestamp(value));
    }
}

/// A catalogue course, keyed by course number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub institution_id: String,
    pub course_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Course {
    pub const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::key("course_number"),
        FieldSpec::text("course_title"),
        FieldSpec::text("department"),
        FieldSpec::number("credit_hours"),
        FieldSpec::timestamp("last_modified"),
    ];

    pub fn new(institution_id: String, course_number: String) -> Self {
        Self {
            institution_id,
            course_number,
            course_title: None,
            department: None,
            credit_hours: None,
            last_modified: None,
        }
    }

    pub(crate) fn key_parts(&self) -> Vec<String> {
        vec![self.course_number.clone()]
    }

    pub(crate) fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("course_number", FieldValue::Text(self.course_number.clone()));
        push_text(&mut fields, "course_title", &self.course_title);
        push_text(&mut fields, "department", &self.department);
        push_number(&mut fields, "credit_hours", self.credit_hours);
        push_timestamp(&mut fields, "last_modified", self.last_modified);
        fields
    }

    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        match name {
            "course_number" => self.course_number = value.into_text(),
            "course_title" => self.course_title = Some(value.into_text()),
            "department" => self.department = Some(value.into_text()),
            "credit_hours" => self.credit_hours = Some(value.as_number(name)?),
            "last_modified" => self.last_modified = Some(value.as_timestamp(name)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// A faculty member, keyed by email address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructor {
    pub institution_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Credential material owned by the account system. Never exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Instructor {
    pub const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::key("email"),
        FieldSpec::text("first_name"),
        FieldSpec::text("last_name"),
        FieldSpec::text("display_name"),
        FieldSpec::text("department"),
        FieldSpec::text("role"),
        FieldSpec::text("password_hash"),
        FieldSpec::timestamp("last_modified"),
    ];

    pub fn new(institution_id: String, email: String) -> Self {
        Self {
            institution_id,
            email,
            first_name: None,
            last_name: None,
            display_name: None,
            department: None,
            role: None,
            password_hash: None,
            last_modified: None,
        }
    }

    pub(crate) fn key_parts(&self) -> Vec<String> {
        vec![self.email.to_lowercase()]
    }

    pub(crate) fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("email", FieldValue::Text(self.email.clone()));
        push_text(&mut fields, "first_name", &self.first_name);
        push_text(&mut fields, "last_name", &self.last_name);
        push_text(&mut fields, "display_name", &self.display_name);
        push_text(&mut fields, "department", &self.department);
        push_text(&mut fields, "role", &self.role);
        push_text(&mut fields, "password_hash", &self.password_hash);
        push_timestamp(&mut fields, "last_modified", self.last_modified);
        fields
    }

    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        match name {
            "email" => self.email = value.into_text().to_lowercase(),
            "first_name" => self.first_name = Some(value.into_text()),
            "last_name" => self.last_name = Some(value.into_text()),
            "display_name" => self.display_name = Some(value.into_text()),
            "department" => self.department = Some(value.into_text()),
            "role" => self.role = Some(value.into_text()),
            "password_hash" => self.password_hash = Some(value.into_text()),
            "last_modified" => self.last_modified = Some(value.as_timestamp(name)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// An academic term, keyed by its canonical `{SEASON}{YYYY}` name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub institution_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Term {
    pub const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::key("name"),
        FieldSpec::text("season"),
        FieldSpec::number("year"),
        FieldSpec::timestamp("last_modified"),
    ];

    pub fn new(institution_id: String, name: String) -> Self {
        Self {
            institution_id,
            name,
            season: None,
            year: None,
            last_modified: None,
        }
    }

    pub(crate) fn key_parts(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    pub(crate) fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name", FieldValue::Text(self.name.clone()));
        push_text(&mut fields, "season", &self.season);
        push_number(&mut fields, "year", self.year.map(f64::from));
        push_timestamp(&mut fields, "last_modified", self.last_modified);
        fields
    }

    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        match name {
            "name" => self.name = value.into_text(),
            "season" => self.season = Some(value.into_text()),
            "year" => {
                let year = value.as_count(name)?;
                self.year = Some(i32::try_from(year).map_err(|_| {
                    SyncError::Validation(format!("field '{name}' is out of range: {year}"))
                })?);
            }
            "last_modified" => self.last_modified = Some(value.as_timestamp(name)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// A course scheduled in a term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offering {
    pub institution_id: String,
    pub course_number: String,
    pub term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Offering {
    pub const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::key("course_number"),
        FieldSpec::key("term"),
        FieldSpec::text("status"),
        FieldSpec::timestamp("last_modified"),
    ];

    pub fn new(institution_id: String, course_number: String, term: String) -> Self {
        Self {
            institution_id,
            course_number,
            term,
            status: None,
            last_modified: None,
        }
    }

    pub(crate) fn key_parts(&self) -> Vec<String> {
        vec![self.course_number.clone(), self.term.clone()]
    }

    pub(crate) fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("course_number", FieldValue::Text(self.course_number.clone()));
        fields.insert("term", FieldValue::Text(self.term.clone()));
        push_text(&mut fields, "status", &self.status);
        push_timestamp(&mut fields, "last_modified", self.last_modified);
        fields
    }

    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        match name {
            "course_number" => self.course_number = value.into_text(),
            "term" => self.term = value.into_text(),
            "status" => self.status = Some(value.into_text()),
            "last_modified" => self.last_modified = Some(value.as_timestamp(name)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// One taught section of an offering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub institution_id: String,
    pub course_number: String,
    pub term: String,
    pub section_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructor_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Section {
    pub const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::key("course_number"),
        FieldSpec::key("term"),
        FieldSpec::key("section_number"),
        FieldSpec::text("instructor_email"),
        FieldSpec::number("enrollment"),
        FieldSpec::text("status"),
        FieldSpec::timestamp("last_modified"),
    ];

    pub fn new(
        institution_id: String,
        course_number: String,
        term: String,
        section_number: String,
    ) -> Self {
        Self {
            institution_id,
            course_number,
            term,
            section_number,
            instructor_email: None,
            enrollment: None,
            status: None,
            last_modified: None,
        }
    }

    pub(crate) fn key_parts(&self) -> Vec<String> {
        vec![
            self.course_number.clone(),
            self.term.clone(),
            self.section_number.clone(),
        ]
    }

    pub(crate) fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("course_number", FieldValue::Text(self.course_number.clone()));
        fields.insert("term", FieldValue::Text(self.term.clone()));
        fields.insert(
            "section_number",
            FieldValue::Text(self.section_number.clone()),
        );
        push_text(&mut fields, "instructor_email", &self.instructor_email);
        push_number(&mut fields, "enrollment", self.enrollment.map(f64::from));
        push_text(&mut fields, "status", &self.status);
        push_timestamp(&mut fields, "last_modified", self.last_modified);
        fields
    }

    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        match name {
            "course_number" => self.course_number = value.into_text(),
            "term" => self.term = value.into_text(),
            "section_number" => self.section_number = value.into_text(),
            "instructor_email" => self.instructor_email = Some(value.into_text().to_lowercase()),
            "enrollment" => self.enrollment = Some(value.as_count(name)?),
            "status" => self.status = Some(value.into_text()),
            "last_modified" => self.last_modified = Some(value.as_timestamp(name)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// A course learning outcome (CLO).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub institution_id: String,
    pub course_number: String,
    pub clo_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Outcome {
    pub const SCHEMA: &'static [FieldSpec] = &[
        FieldSpec::key("course_number"),
        FieldSpec::key("clo_number"),
        FieldSpec::text("description"),
        FieldSpec::text("assessment_method"),
        FieldSpec::timestamp("last_modified"),
    ];

    pub fn new(institution_id: String, course_number: String, clo_number: String) -> Self {
        Self {
            institution_id,
            course_number,
            clo_number,
            description: None,
            assessment_method: None,
            last_modified: None,
        }
    }

    pub(crate) fn key_parts(&self) -> Vec<String> {
        vec![self.course_number.clone(), self.clo_number.clone()]
    }

    pub(crate) fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("course_number", FieldValue::Text(self.course_number.clone()));
        fields.insert("clo_number", FieldValue::Text(self.clo_number.clone()));
        push_text(&mut fields, "description", &self.description);
        push_text(&mut fields, "assessment_method", &self.assessment_method);
        push_timestamp(&mut fields, "last_modified", self.last_modified);
        fields
    }

    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        match name {
            "course_number" => self.course_number = value.into_text(),
            "clo_number" => self.clo_number = value.into_text(),
            "description" => self.description = Some(value.into_text()),
            "assessment_method" => self.assessment_method = Some(value.into_text()),
            "last_modified" => self.last_modified = Some(value.as_timestamp(name)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}
