//! Shape reconciliation: wide year grids to long rows, feed records to flat
//! records.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::clean::coerce_year;
use crate::error::ExtractError;
use crate::extract::{FeedRecord, RawRecord, RawTable, RawValue};

/// One `(entity, year, value)` cell of a melted grid. The year stays the
/// header text until conformance coerces it.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRow {
    pub entity: RawValue,
    pub year: String,
    pub value: RawValue,
}

/// Wide-to-long: one row per (entity row, year column). Columns that are
/// neither the entity column nor a year are ignored.
pub fn melt(table: &RawTable, id_column: &str, origin: &str) -> Result<Vec<LongRow>, ExtractError> {
    if !table.has_column(id_column) {
        return Err(ExtractError::layout(
            origin,
            format!("entity column '{id_column}' not found"),
        ));
    }

    let mut year_columns = Vec::new();
    let mut ignored = Vec::new();
    for column in table.columns.iter().filter(|c| c.as_str() != id_column) {
        if coerce_year(column).is_some() {
            year_columns.push(column.as_str());
        } else {
            ignored.push(column.as_str());
        }
    }

    if year_columns.is_empty() {
        return Err(ExtractError::layout(origin, "no year columns"));
    }
    if !ignored.is_empty() {
        info!(origin, columns = ?ignored, "ignoring non-year columns");
    }

    let mut rows = Vec::with_capacity(table.len() * year_columns.len());
    for record in &table.records {
        let entity = record.get(id_column).cloned().unwrap_or(RawValue::Missing);
        for year in &year_columns {
            rows.push(LongRow {
                entity: entity.clone(),
                year: (*year).to_string(),
                value: record.get(*year).cloned().unwrap_or(RawValue::Missing),
            });
        }
    }

    debug!(
        origin,
        entities = table.len(),
        years = year_columns.len(),
        rows = rows.len(),
        "melted wide grid"
    );
    Ok(rows)
}

/// How to flatten one kind of feed record.
#[derive(Debug, Clone, Copy)]
pub struct FeedLayout {
    /// Field carrying the entity name as text.
    pub name_field: &'static str,
    /// Attribute on the name field carrying the entity code.
    pub code_attribute: &'static str,
    /// Output column for the extracted code.
    pub code_column: &'static str,
    /// Metadata fields dropped from the output.
    pub discard: &'static [&'static str],
}

/// World Bank indicator feed (`SP.POP.TOTL`).
pub const POPULATION_FEED: FeedLayout = FeedLayout {
    name_field: "Country or Area",
    code_attribute: "key",
    code_column: "Country Code",
    discard: &["Item"],
};

/// Flatten feed records into a table. Fields are looked up by name, so their
/// order inside a record does not matter.
pub fn flatten_feed(records: &[FeedRecord], layout: &FeedLayout) -> RawTable {
    let mut columns = vec![layout.name_field.to_string(), layout.code_column.to_string()];
    let mut seen: BTreeSet<String> = columns.iter().cloned().collect();
    let mut out = Vec::with_capacity(records.len());

    for record in records {
        let mut row = RawRecord::new();
        row.insert(layout.name_field.to_string(), RawValue::Missing);
        row.insert(layout.code_column.to_string(), RawValue::Missing);

        for field in record {
            if layout.discard.contains(&field.name.as_str()) {
                continue;
            }
            let text = field
                .text
                .as_deref()
                .map(RawValue::from_text)
                .unwrap_or(RawValue::Missing);

            if field.name == layout.name_field {
                let code = field
                    .attributes
                    .get(layout.code_attribute)
                    .map(|c| RawValue::from_text(c))
                    .unwrap_or(RawValue::Missing);
                row.insert(layout.code_column.to_string(), code);
                row.insert(field.name.clone(), text);
                continue;
            }

            if seen.insert(field.name.clone()) {
                columns.push(field.name.clone());
            }
            row.insert(field.name.clone(), text);
        }
        out.push(row);
    }

    // Records that lack a late-discovered column see it as missing.
    for row in &mut out {
        for column in &columns {
            row.entry(column.clone()).or_insert(RawValue::Missing);
        }
    }

    RawTable {
        columns,
        records: out,
    }
}
