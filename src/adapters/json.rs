//! JSON bundle format: one array of records per entity collection.
//!
//! ```json
//! {
//!   "courses": [{"course_number": "ACC-201", "course_title": "..."}],
//!   "sections": [{"course_number": "ACC-201", "term": "FA2024",
//!                 "section_number": "001", "instructor": "John Smith"}]
//! }
//! ```
//!
//! Field names are the canonical entity field names. Sections may name their
//! instructor by display name (`instructor`) instead of email.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::adapters::{
    AdapterConfig, Compatibility, FormatAdapter, ImportFile, RawRow, RowStream, ViewSpec,
    entities_of, lookup_view,
};
use crate::error::{Result, SyncError};
use crate::extract::{
    ExtractionContext, ExtractorTables, normalize_course_number, normalize_section_number,
    split_display_name,
};
use crate::io::{self, SheetTable};
use crate::model::{AdapterDescriptor, Entity, EntityType, FieldValue, Offering};

/// Cell naming a section's instructor by display name.
const INSTRUCTOR_NAME_CELL: &str = "instructor";

/// Adapter for JSON bundles keyed by entity collection.
#[derive(Debug)]
pub struct JsonBundleAdapter {
    descriptor: AdapterDescriptor,
    tables: ExtractorTables,
    views: BTreeMap<String, ViewSpec>,
}

impl JsonBundleAdapter {
    pub fn new(
        descriptor: AdapterDescriptor,
        config: &AdapterConfig,
        views: BTreeMap<String, ViewSpec>,
    ) -> Self {
        Self {
            descriptor,
            tables: config.extractor_tables(),
            views,
        }
    }

    fn collections(&self, file: &ImportFile) -> Result<BTreeSet<EntityType>> {
        let document = io::json::read_document(&file.bytes)?;
        Ok(document
            .iter()
            .filter(|(_, value)| value.is_array())
            .filter_map(|(key, _)| EntityType::from_table_name(key))
            .collect())
    }

    /// Applies normalisation that the extractor owns for key fields.
    fn normalise(
        &self,
        entity: &mut Entity,
        context: &mut ExtractionContext<'_>,
    ) -> Result<()> {
        let fields = entity.fields();
        if let Some(FieldValue::Text(number)) = fields.get("course_number") {
            entity.set_field("course_number", FieldValue::Text(normalize_course_number(number)?))?;
        }
        if let Some(FieldValue::Text(term)) = fields.get("term") {
            let canonical = context.term(term)?;
            entity.set_field("term", FieldValue::Text(canonical.name))?;
        }
        if let Some(FieldValue::Text(section)) = fields.get("section_number") {
            entity.set_field(
                "section_number",
                FieldValue::Text(normalize_section_number(section)?),
            )?;
        }

        if let Entity::Course(course) = &*entity {
            if course.department.is_none() {
                let number = course.course_number.clone();
                context.infer_department_of(entity.natural_key(), &number);
            }
        }

        match entity {
            Entity::Instructor(instructor) if instructor.first_name.is_none() => {
                if let Some(display_name) = instructor.display_name.as_deref() {
                    let (first, last) = split_display_name(display_name)?;
                    instructor.first_name = Some(first);
                    if instructor.last_name.is_none() {
                        instructor.last_name = last;
                    }
                }
            }
            Entity::Term(term) => {
                let canonical = context.term(&term.name)?;
                term.name = canonical.name;
                if term.season.is_none() {
                    term.season = canonical.season;
                }
                if term.year.is_none() {
                    term.year = canonical.year;
                }
            }
            Entity::Outcome(outcome) => {
                outcome.clo_number = outcome.clo_number.trim().to_string();
            }
            _ => {}
        }
        Ok(())
    }
}

impl FormatAdapter for JsonBundleAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn tables(&self) -> &ExtractorTables {
        &self.tables
    }

    fn validate_compatibility(&self, file: &ImportFile) -> Compatibility {
        match self.collections(file) {
            Ok(found) if !found.is_empty() => Compatibility::Compatible,
            Ok(_) => Compatibility::Incompatible(format!(
                "'{}' has none of the collections {}",
                file.name,
                EntityType::ALL
                    .iter()
                    .map(|entity_type| format!("'{}'", entity_type.table_name()))
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Err(err) => Compatibility::Incompatible(format!(
                "'{}' could not be read as a JSON bundle: {err}",
                file.name
            )),
        }
    }

    fn detect_entity_types(&self, file: &ImportFile) -> BTreeSet<EntityType> {
        let mut detected = self.collections(file).unwrap_or_default();
        if detected.contains(&EntityType::Section) {
            detected.insert(EntityType::Offering);
        }
        detected
    }

    fn parse_rows<'a>(&'a self, file: &'a ImportFile) -> Result<RowStream<'a>> {
        let document = io::json::read_document(&file.bytes)?;
        let mut rows = Vec::new();

        // Collections are read in dependency order so referenced records are
        // seen before the records that point at them.
        for entity_type in EntityType::ALL {
            let Some(Value::Array(records)) = document.get(entity_type.table_name()) else {
                continue;
            };
            for (index, record) in records.iter().enumerate() {
                let row = match record {
                    Value::Object(map) => Ok(RawRow {
                        table: entity_type.table_name().to_string(),
                        line: index + 1,
                        cells: map
                            .iter()
                            .map(|(key, value)| (key.clone(), io::json::value_to_cell(value)))
                            .collect(),
                    }),
                    other => Err(SyncError::Validation(format!(
                        "{} record {} is not an object: {other}",
                        entity_type.table_name(),
                        index + 1
                    ))),
                };
                rows.push(row);
            }
        }

        Ok(Box::new(rows.into_iter()))
    }

    fn extract_entities(
        &self,
        row: &RawRow,
        context: &mut ExtractionContext<'_>,
    ) -> Result<Vec<Entity>> {
        let entity_type = EntityType::from_table_name(&row.table).ok_or_else(|| {
            SyncError::Validation(format!("unknown collection '{}'", row.table))
        })?;
        let mut extracted = Vec::new();

        if entity_type == EntityType::Instructor && row.get("email").is_none() {
            let name = row
                .get("display_name")
                .or_else(|| row.get(INSTRUCTOR_NAME_CELL))
                .ok_or_else(|| {
                    SyncError::Validation("instructor needs an email or a display_name".into())
                })?;
            let synthesized = context.instructor(name, row.get("department"), None)?;
            let mut entity = Entity::Instructor(synthesized);
            for (field, value) in &row.cells {
                if entity_type.field(field).is_some() && !value.trim().is_empty() {
                    entity.set_raw(field, value)?;
                }
            }
            return Ok(vec![entity]);
        }

        let mut entity = Entity::blank(entity_type, context.institution_id());
        for (field, value) in &row.cells {
            if value.trim().is_empty() {
                continue;
            }
            if entity_type.field(field).is_some() {
                entity.set_raw(field, value)?;
            } else if !(entity_type == EntityType::Section && field == INSTRUCTOR_NAME_CELL) {
                context.warn(format!(
                    "{} field '{field}' is not recognised and was ignored",
                    entity_type.table_name()
                ));
            }
        }
        self.normalise(&mut entity, context)?;

        if let Entity::Instructor(instructor) = &entity {
            context.register_instructor(instructor);
        }
        if let Entity::Section(section) = &mut entity {
            if let Some(name) = row.get(INSTRUCTOR_NAME_CELL) {
                let instructor =
                    context.instructor(name, None, section.instructor_email.as_deref())?;
                section.instructor_email = Some(instructor.email.clone());
                extracted.push(Entity::Instructor(instructor));
            }
            extracted.push(Entity::Offering(Offering::new(
                section.institution_id.clone(),
                section.course_number.clone(),
                section.term.clone(),
            )));
        }

        entity.ensure_key()?;
        extracted.insert(0, entity);
        Ok(extracted)
    }

    fn format_for_export(&self, entities: &[Entity], view: &str) -> Result<Vec<SheetTable>> {
        let spec = lookup_view(&self.descriptor.id, &self.views, view)?;
        let mut tables = Vec::with_capacity(spec.len());

        for table_spec in spec {
            let mut table = SheetTable::new(
                table_spec.entity_type.table_name(),
                table_spec.columns.clone(),
            );
            for entity in entities_of(entities, table_spec.entity_type) {
                let fields = entity.fields();
                table.rows.push(
                    table_spec
                        .columns
                        .iter()
                        .map(|column| {
                            fields
                                .get(column.as_str())
                                .map(FieldValue::to_cell)
                                .unwrap_or_default()
                        })
                        .collect(),
                );
            }
            tables.push(table);
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::builtin::json_bundle;
    use crate::extract::InstitutionScope;
    use serde_json::json;

    fn extract(bundle: Value) -> (Vec<Entity>, Vec<String>) {
        let adapter = json_bundle(&AdapterConfig::default());
        let file = ImportFile::new("bundle.json", serde_json::to_vec(&bundle).unwrap());
        let scope = InstitutionScope::new("MOCKU", "mocku.test");
        let mut context = ExtractionContext::new(&scope, adapter.tables());
        let mut entities = Vec::new();
        for row in adapter.parse_rows(&file).unwrap() {
            entities.extend(adapter.extract_entities(&row.unwrap(), &mut context).unwrap());
        }
        (entities, context.take_warnings())
    }

    #[test]
    fn requires_a_known_collection() {
        let adapter = json_bundle(&AdapterConfig::default());
        let empty = ImportFile::new("bundle.json", b"{\"widgets\": []}".to_vec());
        assert!(!adapter.validate_compatibility(&empty).is_compatible());
        let not_json = ImportFile::new("bundle.json", b"course,title".to_vec());
        assert!(!adapter.validate_compatibility(&not_json).is_compatible());
        let sections = ImportFile::new("bundle.json", b"{\"sections\": []}".to_vec());
        assert_eq!(
            adapter.detect_entity_types(&sections),
            BTreeSet::from([EntityType::Offering, EntityType::Section])
        );
    }

    #[test]
    fn section_names_instructor_by_display_name() {
        let (entities, warnings) = extract(json!({
            "sections": [{
                "course_number": "acc201",
                "term": "Fall 2024",
                "section_number": "2",
                "instructor": "Mary Major"
            }]
        }));
        let Entity::Section(section) = &entities[0] else {
            panic!("expected a section first");
        };
        assert_eq!(section.course_number, "ACC-201");
        assert_eq!(section.term, "FA2024");
        assert_eq!(section.section_number, "002");
        assert_eq!(section.instructor_email.as_deref(), Some("mary.major@mocku.test"));
        assert_eq!(entities[1].entity_type(), EntityType::Instructor);
        assert_eq!(entities[2].entity_type(), EntityType::Offering);
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn listed_instructor_email_wins_over_synthesis() {
        let (entities, warnings) = extract(json!({
            "instructors": [{"email": "jdoe@mocku.test", "display_name": "Jane Doe"}],
            "sections": [{
                "course_number": "ACC-201",
                "term": "FA2024",
                "section_number": "1",
                "instructor": "Jane Doe"
            }]
        }));
        assert!(warnings.is_empty(), "{warnings:?}");

        let instructors: BTreeSet<_> = entities
            .iter()
            .filter(|entity| entity.entity_type() == EntityType::Instructor)
            .map(Entity::natural_key)
            .collect();
        assert_eq!(instructors.len(), 1);

        let Entity::Instructor(listed) = &entities[0] else {
            panic!("expected the listed instructor first");
        };
        assert_eq!(listed.first_name.as_deref(), Some("Jane"));
        assert_eq!(listed.last_name.as_deref(), Some("Doe"));

        let section = entities
            .iter()
            .find_map(|entity| match entity {
                Entity::Section(section) => Some(section),
                _ => None,
            })
            .expect("a section");
        assert_eq!(section.instructor_email.as_deref(), Some("jdoe@mocku.test"));
    }

    #[test]
    fn unknown_fields_warn_and_terms_gain_season() {
        let (entities, warnings) = extract(json!({
            "terms": [{"name": "spring 2025", "colour": "green"}]
        }));
        let Entity::Term(term) = &entities[0] else {
            panic!("expected a term");
        };
        assert_eq!(term.name, "SP2025");
        assert_eq!(term.season.as_deref(), Some("SP"));
        assert_eq!(term.year, Some(2025));
        assert_eq!(
            warnings,
            vec!["terms field 'colour' is not recognised and was ignored"]
        );
    }

    #[test]
    fn non_object_records_fail_their_row_only() {
        let adapter = json_bundle(&AdapterConfig::default());
        let file = ImportFile::new(
            "bundle.json",
            br#"{"courses": [42, {"course_number": "ACC-201"}]}"#.to_vec(),
        );
        let rows: Vec<_> = adapter.parse_rows(&file).unwrap().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_err());
        assert_eq!(rows[1].as_ref().unwrap().line, 2);
    }
}
