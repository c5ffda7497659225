//! Conformance: raw source shapes to typed, cleaned observations keyed by
//! canonical country key.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::clean::{clean_category, coerce_year, coerce_year_value, try_clean_numeric, NumericFault};
use crate::error::ExtractError;
use crate::extract::{RawRecord, RawTable, RawValue};
use crate::model::{QualityMetric, QualityScore, QualityScores};
use crate::normalize::{fold, normalize};
use crate::reshape::{FeedLayout, LongRow};

/// Survey headers accepted for the entity column.
const SURVEY_COUNTRY_COLUMNS: &[&str] = &["country", "country name", "country or area"];
const FEED_YEAR_FIELD: &str = "Year";
const FEED_VALUE_FIELD: &str = "Value";

#[derive(Debug, Clone, PartialEq)]
pub struct PopulationObservation {
    pub key: String,
    pub code: Option<String>,
    pub year: i32,
    pub population: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GdpObservation {
    pub key: String,
    pub year: i32,
    pub gdp_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveyObservation {
    pub key: String,
    pub scores: QualityScores,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FaultCount {
    pub missing: usize,
    pub unparseable: usize,
}

/// What conformance had to recover from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConformReport {
    /// Numeric fallbacks per `source.column`.
    pub numeric_faults: BTreeMap<String, FaultCount>,
    /// Rows skipped per source because the entity or year was unusable.
    pub skipped_rows: BTreeMap<String, usize>,
    /// Expected survey columns the export did not carry.
    pub missing_columns: Vec<String>,
}

impl ConformReport {
    fn clean(&mut self, source: &str, column: &str, value: &RawValue) -> f64 {
        match try_clean_numeric(value) {
            Ok(n) => n,
            Err(fault) => {
                let count = self
                    .numeric_faults
                    .entry(format!("{source}.{column}"))
                    .or_default();
                match fault {
                    NumericFault::Missing => count.missing += 1,
                    NumericFault::Unparseable => count.unparseable += 1,
                }
                0.0
            }
        }
    }

    fn skip(&mut self, source: &str) {
        *self.skipped_rows.entry(source.to_string()).or_default() += 1;
    }

    pub fn log(&self) {
        for (column, count) in &self.numeric_faults {
            if count.unparseable > 0 {
                warn!(
                    column = %column,
                    missing = count.missing,
                    unparseable = count.unparseable,
                    "numeric values fell back to 0"
                );
            } else {
                info!(column = %column, missing = count.missing, "missing numeric values set to 0");
            }
        }
        for (source, skipped) in &self.skipped_rows {
            warn!(source = %source, skipped, "rows without a usable entity or year");
        }
    }
}

fn entity_key(value: &RawValue) -> Option<String> {
    let text = value.as_text()?;
    let key = normalize(&text);
    (!key.is_empty()).then_some(key)
}

// =============================================================================
// Population feed
// =============================================================================

pub fn conform_population(
    table: &RawTable,
    layout: &FeedLayout,
    origin: &str,
    report: &mut ConformReport,
) -> Result<Vec<PopulationObservation>, ExtractError> {
    for required in [FEED_YEAR_FIELD, FEED_VALUE_FIELD] {
        if !table.has_column(required) {
            return Err(ExtractError::layout(
                origin,
                format!("feed records carry no '{required}' field"),
            ));
        }
    }

    let mut observations = Vec::with_capacity(table.len());
    for record in &table.records {
        let field = |name: &str| record.get(name).unwrap_or(&RawValue::Missing);

        let (Some(key), Some(year)) = (
            entity_key(field(layout.name_field)),
            coerce_year_value(field(FEED_YEAR_FIELD)),
        ) else {
            report.skip("population");
            continue;
        };

        let code = field(layout.code_column).as_text().map(|c| c.into_owned());
        let population = report.clean("population", FEED_VALUE_FIELD, field(FEED_VALUE_FIELD));
        observations.push(PopulationObservation {
            key,
            code,
            year,
            population,
        });
    }

    Ok(observations)
}

// =============================================================================
// GDP spreadsheet
// =============================================================================

pub fn conform_gdp(rows: &[LongRow], report: &mut ConformReport) -> Vec<GdpObservation> {
    let mut observations = Vec::with_capacity(rows.len());
    for row in rows {
        let (Some(key), Some(year)) = (entity_key(&row.entity), coerce_year(&row.year)) else {
            report.skip("gdp");
            continue;
        };
        let gdp_usd = report.clean("gdp", &row.year, &row.value);
        observations.push(GdpObservation { key, year, gdp_usd });
    }
    observations
}

// =============================================================================
// Survey
// =============================================================================

/// Where each expected survey column sits in the export.
#[derive(Debug, Clone)]
struct SurveyColumns {
    country: String,
    values: Vec<Option<String>>,
    categories: Vec<Option<String>>,
}

impl SurveyColumns {
    fn locate(headers: &[String], origin: &str, report: &mut ConformReport) -> Result<Self, ExtractError> {
        let country = find_column(headers, SURVEY_COUNTRY_COLUMNS).ok_or_else(|| {
            ExtractError::layout(
                origin,
                format!("no country column (expected one of {SURVEY_COUNTRY_COLUMNS:?})"),
            )
        })?;

        let mut values = Vec::with_capacity(QualityMetric::ALL.len());
        let mut categories = Vec::with_capacity(QualityMetric::ALL.len());
        for metric in QualityMetric::ALL {
            for (suffix, slot, target) in [
                ("value", &mut values, metric.value_column()),
                ("category", &mut categories, metric.category_column()),
            ] {
                let candidates: Vec<String> = metric
                    .source_labels()
                    .iter()
                    .map(|label| format!("{label} {suffix}"))
                    .collect();
                let candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();
                let found = find_column(headers, &candidates);
                if found.is_none() {
                    warn!(origin, column = target, "survey column absent, filling defaults");
                    report.missing_columns.push(target.to_string());
                }
                slot.push(found);
            }
        }

        Ok(Self {
            country,
            values,
            categories,
        })
    }
}

/// Header whose folded text equals one of the candidates.
fn find_column(headers: &[String], candidates: &[&str]) -> Option<String> {
    headers
        .iter()
        .find(|header| {
            let folded = fold(header);
            candidates.iter().any(|c| folded == *c)
        })
        .cloned()
}

pub fn conform_survey(
    table: &RawTable,
    origin: &str,
    report: &mut ConformReport,
) -> Result<Vec<SurveyObservation>, ExtractError> {
    let columns = SurveyColumns::locate(&table.columns, origin, report)?;

    let mut observations = Vec::with_capacity(table.len());
    for record in &table.records {
        let Some(key) = record.get(&columns.country).and_then(entity_key) else {
            report.skip("survey");
            continue;
        };

        let scores = QualityScores::from_fn(|metric| {
            let value = lookup(record, columns.values[metric.index()].as_deref());
            let category = lookup(record, columns.categories[metric.index()].as_deref());
            QualityScore {
                value: report.clean("survey", metric.value_column(), value),
                category: clean_category(category),
            }
        });
        observations.push(SurveyObservation { key, scores });
    }

    Ok(observations)
}

fn lookup<'a>(record: &'a RawRecord, column: Option<&str>) -> &'a RawValue {
    column
        .and_then(|c| record.get(c))
        .unwrap_or(&RawValue::Missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::parse_delimited;
    use crate::reshape::{melt, POPULATION_FEED};

    const SURVEY: &str = "\
country,Purchasing Power Value,Purchasing Power Category,Safety Value,Safety Category,Health Care Value,Health Care Category,Climate Value,Climate Category,Costs of Living Value,Costs of Living Category,Property Price to Income Value,Property Price to Income Category,Traffic Commute Time Value,Traffic Commute Time Category,Pollution Value,Pollution Category,Quality of Life Value,Quality of Life Category
Germany,': 110.5,High,65.2,Moderate,73.4,High,': 81.3,Very High,65.8,Moderate,8.5,Low,': 31.2,Low,28.9,Low,': 172.3,Very High
Russia,': 40.1,Low,,,,,,,,,,,,,,,,
";

    // -------------------------------------------------------------------------
    // SURVEY
    // -------------------------------------------------------------------------

    #[test]
    fn test_survey_cleans_values_and_categories() {
        let table = parse_delimited(SURVEY.as_bytes(), "survey").unwrap();
        let mut report = ConformReport::default();
        let rows = conform_survey(&table, "survey", &mut report).unwrap();

        assert_eq!(rows.len(), 2);
        let germany = &rows[0];
        assert_eq!(germany.key, "germany");
        assert_eq!(germany.scores.get(QualityMetric::PurchasingPower).value, 110.5);
        assert_eq!(germany.scores.get(QualityMetric::Climate).category, "Very High");
        assert_eq!(germany.scores.get(QualityMetric::CostOfLiving).value, 65.8);
        assert_eq!(germany.scores.get(QualityMetric::TrafficCommute).value, 31.2);
        assert!(report.missing_columns.is_empty());
    }

    #[test]
    fn test_survey_blank_cells_become_sentinels() {
        let table = parse_delimited(SURVEY.as_bytes(), "survey").unwrap();
        let mut report = ConformReport::default();
        let rows = conform_survey(&table, "survey", &mut report).unwrap();

        let russia = &rows[1];
        assert_eq!(russia.key, "russian federation");
        assert_eq!(russia.scores.get(QualityMetric::Safety).value, 0.0);
        assert_eq!(russia.scores.get(QualityMetric::Safety).category, "None");
        assert_eq!(report.numeric_faults["survey.safety_value"].missing, 1);
    }

    #[test]
    fn test_survey_headers_match_alternate_spellings() {
        let csv = "Country Name,cost of living value,Cost Of Living Category\nPeru,40,Low\n";
        let table = parse_delimited(csv.as_bytes(), "survey").unwrap();
        let mut report = ConformReport::default();
        let rows = conform_survey(&table, "survey", &mut report).unwrap();

        assert_eq!(rows[0].scores.get(QualityMetric::CostOfLiving).value, 40.0);
        assert_eq!(rows[0].scores.get(QualityMetric::CostOfLiving).category, "Low");
        assert_eq!(report.missing_columns.len(), 16);
        assert!(report.missing_columns.contains(&"safety_value".to_string()));
    }

    #[test]
    fn test_survey_without_country_column_fails() {
        let table = parse_delimited(b"Nation,Safety Value\nPeru,1\n", "survey").unwrap();
        let mut report = ConformReport::default();
        let err = conform_survey(&table, "survey", &mut report).unwrap_err();
        assert!(err.to_string().contains("no country column"));
    }

    // -------------------------------------------------------------------------
    // GDP
    // -------------------------------------------------------------------------

    #[test]
    fn test_gdp_coerces_years_and_counts_faults() {
        let csv = "Country,2020,2021.0\nSouth Korea,\"1,644,312.5\",no data\n,1,2\n";
        let table = parse_delimited(csv.as_bytes(), "gdp").unwrap();
        let rows = melt(&table, "Country", "gdp").unwrap();
        let mut report = ConformReport::default();
        let gdp = conform_gdp(&rows, &mut report);

        assert_eq!(
            gdp,
            vec![
                GdpObservation { key: "korea, rep.".into(), year: 2020, gdp_usd: 1_644_312.5 },
                GdpObservation { key: "korea, rep.".into(), year: 2021, gdp_usd: 0.0 },
            ]
        );
        assert_eq!(report.numeric_faults["gdp.2021.0"].unparseable, 1);
        assert_eq!(report.skipped_rows["gdp"], 2);
    }

    // -------------------------------------------------------------------------
    // POPULATION
    // -------------------------------------------------------------------------

    fn population_table(rows: &[(&str, &str, &str, &str)]) -> RawTable {
        let records = rows
            .iter()
            .map(|(name, code, year, value)| {
                RawRecord::from([
                    ("Country or Area".to_string(), RawValue::from_text(name)),
                    ("Country Code".to_string(), RawValue::from_text(code)),
                    ("Year".to_string(), RawValue::from_text(year)),
                    ("Value".to_string(), RawValue::from_text(value)),
                ])
            })
            .collect();
        RawTable {
            columns: vec![
                "Country or Area".into(),
                "Country Code".into(),
                "Year".into(),
                "Value".into(),
            ],
            records,
        }
    }

    #[test]
    fn test_population_keeps_code_and_cleans_value() {
        let table = population_table(&[
            ("Germany", "DEU", "2023", "84482267"),
            ("Chad", "", "2023", ""),
            ("Nowhere", "XXX", "not a year", "1"),
        ]);
        let mut report = ConformReport::default();
        let rows = conform_population(&table, &POPULATION_FEED, "pop", &mut report).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code.as_deref(), Some("DEU"));
        assert_eq!(rows[0].population, 84_482_267.0);
        assert_eq!(rows[1].code, None);
        assert_eq!(rows[1].population, 0.0);
        assert_eq!(report.skipped_rows["population"], 1);
    }

    #[test]
    fn test_population_requires_value_field() {
        let table = RawTable {
            columns: vec!["Country or Area".into(), "Country Code".into(), "Year".into()],
            records: vec![RawRecord::new()],
        };
        let mut report = ConformReport::default();
        assert!(conform_population(&table, &POPULATION_FEED, "pop", &mut report).is_err());
    }
}
