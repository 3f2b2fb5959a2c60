//! Field-level conflict detection between incoming and persisted entities.

use crate::model::{ConflictRecord, Entity, FieldValue, LAST_MODIFIED};

/// Fields that never count as conflicts: they are bookkeeping, not data.
pub const IGNORED_FIELDS: &[&str] = &[LAST_MODIFIED];

/// Detects field-level conflicts between an incoming entity and the persisted
/// entity sharing its natural key.
///
/// Only fields present on the incoming entity are considered, so partial rows
/// never blank out persisted data. Values are compared with
/// [`FieldValue::normalized_eq`]. Each differing field yields one record with
/// no resolution yet.
pub fn detect_conflicts(incoming: &Entity, existing: &Entity) -> Vec<ConflictRecord> {
    let existing_fields = existing.fields();
    let entity_type = incoming.entity_type();
    let entity_key = incoming.natural_key().value();

    incoming
        .fields()
        .into_iter()
        .filter(|(name, _)| !IGNORED_FIELDS.contains(name))
        .filter(|(name, _)| !entity_type.field(name).is_some_and(|spec| spec.key))
        .filter_map(|(name, import_value)| {
            let existing_value = existing_fields.get(name)?;
            if existing_value.normalized_eq(&import_value) {
                return None;
            }
            Some(ConflictRecord {
                entity_type,
                entity_key: entity_key.clone(),
                field_name: name.to_string(),
                existing_value: existing_value.to_json(),
                import_value: import_value.to_json(),
                resolution: None,
            })
        })
        .collect()
}

/// Whether writing `incoming` would change the stored value.
pub(crate) fn differs(existing: Option<&FieldValue>, incoming: &FieldValue) -> bool {
    existing.is_none_or(|current| !current.normalized_eq(incoming))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Course, Resolution};
    use serde_json::json;

    fn course(title: Option<&str>, credits: Option<f64>) -> Entity {
        let mut course = Course::new("MOCKU".into(), "ACC-201".into());
        course.course_title = title.map(str::to_string);
        course.credit_hours = credits;
        Entity::Course(course)
    }

    #[test]
    fn no_conflicts_when_same() {
        let existing = course(Some("Accounting Principles"), Some(3.0));
        let incoming = course(Some("accounting principles "), Some(3.0));
        assert!(detect_conflicts(&incoming, &existing).is_empty());
    }

    #[test]
    fn detects_conflict() {
        let existing = course(Some("Accounting Principles"), Some(3.0));
        let incoming = course(Some("Principles of Accounting"), Some(3.0));
        let conflicts = detect_conflicts(&incoming, &existing);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field_name, "course_title");
        assert_eq!(conflicts[0].entity_key, "ACC-201");
        assert_eq!(conflicts[0].existing_value, json!("Accounting Principles"));
        assert_eq!(conflicts[0].import_value, json!("Principles of Accounting"));
        assert_eq!(conflicts[0].resolution, None::<Resolution>);
    }

    #[test]
    fn absent_import_fields_never_conflict() {
        let existing = course(Some("Accounting Principles"), Some(3.0));
        let incoming = course(None, None);
        assert!(detect_conflicts(&incoming, &existing).is_empty());
    }

    #[test]
    fn fields_missing_on_existing_side_are_not_conflicts() {
        let existing = course(None, None);
        let incoming = course(Some("Accounting Principles"), Some(4.0));
        assert!(detect_conflicts(&incoming, &existing).is_empty());
    }

    #[test]
    fn counts_every_differing_field() {
        let existing = course(Some("Accounting Principles"), Some(3.0));
        let incoming = course(Some("Managerial Accounting"), Some(4.0));
        let conflicts = detect_conflicts(&incoming, &existing);
        let fields: Vec<&str> = conflicts.iter().map(|c| c.field_name.as_str()).collect();
        assert_eq!(fields, vec!["course_title", "credit_hours"]);
    }

    #[test]
    fn last_modified_is_not_a_conflict() {
        let mut existing = Course::new("MOCKU".into(), "ACC-201".into());
        existing.last_modified = Some("2024-01-01T00:00:00Z".parse().unwrap());
        let mut incoming = existing.clone();
        incoming.last_modified = Some("2024-06-01T00:00:00Z".parse().unwrap());
        assert!(detect_conflicts(&Entity::Course(incoming), &Entity::Course(existing)).is_empty());
    }
}
