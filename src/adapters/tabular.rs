//! Row-per-section spreadsheet formats.
//!
//! Institutions that send one wide row per taught section differ only in
//! their header spellings, which headers are mandatory, and whether the
//! file is a workbook or delimited text. [`TabularAdapter`] implements the
//! adapter contract once, driven by a [`TabularLayout`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::adapters::{
    AdapterConfig, Compatibility, FormatAdapter, ImportFile, RawRow, RowStream, ViewSpec,
    entities_of, lookup_view,
};
use crate::error::{Result, SyncError};
use crate::extract::{
    ExtractionContext, ExtractorTables, normalize_course_number, normalize_section_number,
};
use crate::io::excel_read::NumberedSheet;
use crate::io::{self, SheetTable};
use crate::model::{
    AdapterDescriptor, Course, Entity, EntityType, FieldSpec, FieldValue, LAST_MODIFIED,
    Offering, Outcome, Section,
};

/// Logical columns a section row can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Course,
    Title,
    Department,
    Credits,
    Instructor,
    Email,
    Term,
    Section,
    Enrollment,
    OutcomeNumber,
    OutcomeText,
    LastModified,
}

impl Column {
    /// Column that carries `field` of `entity_type`, if the row format has one.
    pub fn for_field(entity_type: EntityType, field: &str) -> Option<Column> {
        let column = match (entity_type, field) {
            (_, "course_number") => Column::Course,
            (EntityType::Course, "course_title") => Column::Title,
            (EntityType::Course | EntityType::Instructor, "department") => Column::Department,
            (EntityType::Course, "credit_hours") => Column::Credits,
            (EntityType::Instructor, "display_name") => Column::Instructor,
            (EntityType::Instructor, "email") | (EntityType::Section, "instructor_email") => {
                Column::Email
            }
            (EntityType::Term, "name") | (_, "term") => Column::Term,
            (EntityType::Section, "section_number") => Column::Section,
            (EntityType::Section, "enrollment") => Column::Enrollment,
            (EntityType::Outcome, "clo_number") => Column::OutcomeNumber,
            (EntityType::Outcome, "description") => Column::OutcomeText,
            (_, LAST_MODIFIED) => Column::LastModified,
            _ => return None,
        };
        Some(column)
    }
}

/// Physical container of the rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabularSource {
    /// An `.xlsx` workbook; `sheet` names the worksheet, default first.
    Xlsx { sheet: Option<String> },
    /// Delimited text with a header row.
    Csv { delimiter: u8 },
}

/// Header spellings and requirements of one institution's row format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularLayout {
    pub headers: BTreeMap<Column, String>,
    pub required: Vec<Column>,
}

impl TabularLayout {
    pub fn header(&self, column: Column) -> Option<&str> {
        self.headers.get(&column).map(String::as_str)
    }

    fn present_columns(&self, headers: &[String]) -> BTreeSet<Column> {
        self.headers
            .iter()
            .filter(|(_, expected)| {
                headers
                    .iter()
                    .any(|header| header.trim().eq_ignore_ascii_case(expected))
            })
            .map(|(column, _)| *column)
            .collect()
    }

    fn label(&self, entity_type: EntityType, field: &str) -> String {
        Column::for_field(entity_type, field)
            .and_then(|column| self.header(column))
            .unwrap_or(field)
            .to_string()
    }
}

/// Adapter for a row-per-section spreadsheet or CSV format.
#[derive(Debug)]
pub struct TabularAdapter {
    descriptor: AdapterDescriptor,
    source: TabularSource,
    layout: TabularLayout,
    tables: ExtractorTables,
    views: BTreeMap<String, ViewSpec>,
}

impl TabularAdapter {
    pub fn new(
        descriptor: AdapterDescriptor,
        source: TabularSource,
        layout: TabularLayout,
        config: &AdapterConfig,
        views: BTreeMap<String, ViewSpec>,
    ) -> Self {
        Self {
            descriptor,
            source,
            layout,
            tables: config.extractor_tables(),
            views,
        }
    }

    pub fn layout(&self) -> &TabularLayout {
        &self.layout
    }

    fn read_headers(&self, file: &ImportFile) -> Result<Vec<String>> {
        match &self.source {
            TabularSource::Xlsx { sheet } => io::excel_read::read_headers(&file.bytes, sheet.as_deref()),
            TabularSource::Csv { delimiter } => {
                io::csv::open(&file.bytes, *delimiter).map(|(headers, _)| headers)
            }
        }
    }

    fn cell<'r>(&self, row: &'r RawRow, column: Column) -> Option<&'r str> {
        self.layout.header(column).and_then(|header| row.get(header))
    }

    fn project(&self, entity: &Entity, columns: &[String]) -> Vec<String> {
        let fields = entity.fields();
        columns
            .iter()
            .map(|column| {
                fields
                    .get(column.as_str())
                    .map(FieldValue::to_cell)
                    .unwrap_or_default()
            })
            .collect()
    }
}

fn to_raw_row(table: &str, line: usize, headers: &[String], cells: Vec<String>) -> RawRow {
    RawRow {
        table: table.to_string(),
        line,
        cells: headers
            .iter()
            .cloned()
            .zip(cells)
            .filter(|(header, _)| !header.is_empty())
            .collect(),
    }
}

fn parse_field(spec: FieldSpec, raw: &str) -> Result<FieldValue> {
    FieldValue::parse(&spec, raw)
}

impl FormatAdapter for TabularAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn tables(&self) -> &ExtractorTables {
        &self.tables
    }

    fn validate_compatibility(&self, file: &ImportFile) -> Compatibility {
        let headers = match self.read_headers(file) {
            Ok(headers) => headers,
            Err(err) => {
                return Compatibility::Incompatible(format!(
                    "'{}' could not be read as {} input: {err}",
                    file.name,
                    self.descriptor.id
                ));
            }
        };

        let present = self.layout.present_columns(&headers);
        let missing: Vec<String> = self
            .layout
            .required
            .iter()
            .filter(|column| !present.contains(column))
            .filter_map(|column| self.layout.header(*column))
            .map(|header| format!("'{header}'"))
            .collect();

        if missing.is_empty() {
            Compatibility::Compatible
        } else {
            Compatibility::Incompatible(format!(
                "'{}' is missing required column(s) {} for adapter {}; found: {}",
                file.name,
                missing.join(", "),
                self.descriptor.id,
                headers
                    .iter()
                    .filter(|header| !header.is_empty())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        }
    }

    fn detect_entity_types(&self, file: &ImportFile) -> BTreeSet<EntityType> {
        let Ok(headers) = self.read_headers(file) else {
            return BTreeSet::new();
        };
        let present = self.layout.present_columns(&headers);
        let has = |column: Column| present.contains(&column);

        let mut detected = BTreeSet::new();
        if has(Column::Course) {
            detected.insert(EntityType::Course);
        }
        if has(Column::Instructor) {
            detected.insert(EntityType::Instructor);
        }
        if has(Column::Term) {
            detected.insert(EntityType::Term);
        }
        if has(Column::Course) && has(Column::Term) {
            detected.insert(EntityType::Offering);
            if has(Column::Section) {
                detected.insert(EntityType::Section);
            }
        }
        if has(Column::Course) && has(Column::OutcomeNumber) {
            detected.insert(EntityType::Outcome);
        }
        detected
    }

    fn parse_rows<'a>(&'a self, file: &'a ImportFile) -> Result<RowStream<'a>> {
        match &self.source {
            TabularSource::Xlsx { sheet } => {
                let NumberedSheet {
                    sheet_name,
                    columns,
                    rows,
                } = io::excel_read::read_numbered(&file.bytes, sheet.as_deref())?;
                Ok(Box::new(rows.into_iter().map(move |(line, cells)| {
                    Ok(to_raw_row(&sheet_name, line, &columns, cells))
                })))
            }
            TabularSource::Csv { delimiter } => {
                let (headers, records) = io::csv::open(&file.bytes, *delimiter)?;
                let name = file.name.clone();
                Ok(Box::new(records.enumerate().map(move |(index, record)| {
                    let record = record?;
                    let cells = record.iter().map(str::to_string).collect();
                    Ok(to_raw_row(&name, index + 2, &headers, cells))
                })))
            }
        }
    }

    fn extract_entities(
        &self,
        row: &RawRow,
        context: &mut ExtractionContext<'_>,
    ) -> Result<Vec<Entity>> {
        let institution = context.institution_id().to_string();
        let mut entities = Vec::new();

        let course_number = self
            .cell(row, Column::Course)
            .map(normalize_course_number)
            .transpose()?;
        let term = self
            .cell(row, Column::Term)
            .map(|raw| context.term(raw))
            .transpose()?;
        let last_modified = self
            .cell(row, Column::LastModified)
            .map(|raw| parse_field(FieldSpec::timestamp(LAST_MODIFIED), raw))
            .transpose()?;

        let department = self.cell(row, Column::Department).map(str::to_string);
        // Without a department cell the prefix mapping only supplies a default.
        let inferred_from = course_number.as_deref().filter(|_| department.is_none());

        if let Some(number) = &course_number {
            let mut course = Course::new(institution.clone(), number.clone());
            course.course_title = self.cell(row, Column::Title).map(str::to_string);
            course.department = department.clone();
            course.credit_hours = self
                .cell(row, Column::Credits)
                .map(|raw| parse_field(FieldSpec::number("credit_hours"), raw)?.as_number("credit_hours"))
                .transpose()?;
            let course = Entity::Course(course);
            if let Some(number) = inferred_from {
                context.infer_department_of(course.natural_key(), number);
            }
            entities.push(course);
        }

        let email_cell = self.cell(row, Column::Email);
        let instructor = self
            .cell(row, Column::Instructor)
            .map(|name| context.instructor(name, department.as_deref(), email_cell))
            .transpose()?;
        let instructor_email = instructor
            .as_ref()
            .map(|instructor| instructor.email.clone())
            .or_else(|| email_cell.map(str::to_lowercase));
        if let Some(instructor) = instructor {
            let instructor = Entity::Instructor(instructor);
            if let Some(number) = inferred_from {
                context.infer_department_of(instructor.natural_key(), number);
            }
            entities.push(instructor);
        }

        if let Some(term) = &term {
            entities.push(Entity::Term(term.clone()));
        }

        if let (Some(number), Some(term)) = (&course_number, &term) {
            entities.push(Entity::Offering(Offering::new(
                institution.clone(),
                number.clone(),
                term.name.clone(),
            )));

            if let Some(raw_section) = self.cell(row, Column::Section) {
                let mut section = Section::new(
                    institution.clone(),
                    number.clone(),
                    term.name.clone(),
                    normalize_section_number(raw_section)?,
                );
                section.instructor_email = instructor_email;
                section.enrollment = self
                    .cell(row, Column::Enrollment)
                    .map(|raw| parse_field(FieldSpec::number("enrollment"), raw)?.as_count("enrollment"))
                    .transpose()?;
                entities.push(Entity::Section(section));
            }
        }

        if let (Some(number), Some(clo)) = (&course_number, self.cell(row, Column::OutcomeNumber)) {
            let mut outcome = Outcome::new(
                institution.clone(),
                number.clone(),
                clo.trim_end_matches(".0").to_string(),
            );
            outcome.description = self.cell(row, Column::OutcomeText).map(str::to_string);
            entities.push(Entity::Outcome(outcome));
        }

        if entities.is_empty() {
            return Err(SyncError::Validation(
                "row carries no course, instructor, or term".into(),
            ));
        }

        if let Some(stamp) = last_modified {
            for entity in &mut entities {
                entity.set_field(LAST_MODIFIED, stamp.clone())?;
            }
        }

        debug!(
            line = row.line,
            entity_count = entities.len(),
            "extracted entities from row"
        );
        Ok(entities)
    }

    fn format_for_export(&self, entities: &[Entity], view: &str) -> Result<Vec<SheetTable>> {
        let spec = lookup_view(&self.descriptor.id, &self.views, view)?;

        let mut tables = Vec::with_capacity(spec.len());
        for table_spec in spec {
            for column in &table_spec.columns {
                if table_spec.entity_type.field(column).is_none() {
                    return Err(SyncError::Adapter(format!(
                        "view '{view}' names unknown {} column '{column}'",
                        table_spec.entity_type
                    )));
                }
            }

            let headers = table_spec
                .columns
                .iter()
                .map(|column| self.layout.label(table_spec.entity_type, column))
                .collect();
            let mut table = SheetTable::new(table_spec.entity_type.table_name(), headers);
            for entity in entities_of(entities, table_spec.entity_type) {
                table.rows.push(self.project(entity, &table_spec.columns));
            }
            tables.push(table);
        }
        Ok(tables)
    }
}
