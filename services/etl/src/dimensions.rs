//! Dimension builders: country, time and quality of life.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::conform::{PopulationObservation, SurveyObservation};
use crate::config::Calendar;
use crate::diagnostics::{JoinKind, JoinReport};
use crate::model::{CountryRow, QualityOfLifeRow, TimeRow, PERIOD_ANNUAL};
use crate::regions::RegionTable;

/// A territory the warehouse always carries, under a reserved key, even when
/// no source mentions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedTerritory {
    pub key: &'static str,
    pub code: &'static str,
    pub surrogate: i32,
}

pub const PINNED_TERRITORIES: &[PinnedTerritory] = &[PinnedTerritory {
    key: "taiwan",
    code: "TWN",
    surrogate: 9999,
}];

// =============================================================================
// Country
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CountryDimension {
    rows: Vec<CountryRow>,
    by_key: BTreeMap<String, i32>,
}

impl CountryDimension {
    /// One row per canonical key in `keys`, plus pinned territories that are
    /// absent. Surrogates enumerate the sorted keys from 1 and skip reserved
    /// values, so identical inputs always produce identical keys.
    pub fn build(
        keys: &BTreeSet<String>,
        codes: &BTreeMap<String, String>,
        regions: &RegionTable,
    ) -> Self {
        let reserved: BTreeSet<i32> = PINNED_TERRITORIES.iter().map(|p| p.surrogate).collect();
        let mut by_key = BTreeMap::new();
        let mut next = 1;
        for key in keys {
            while reserved.contains(&next) {
                next += 1;
            }
            by_key.insert(key.clone(), next);
            next += 1;
        }

        for pinned in PINNED_TERRITORIES {
            if !by_key.contains_key(pinned.key) {
                info!(key = pinned.key, surrogate = pinned.surrogate, "inserting pinned territory");
                by_key.insert(pinned.key.to_string(), pinned.surrogate);
            }
        }

        let mut rows: Vec<CountryRow> = by_key
            .iter()
            .map(|(key, surrogate)| {
                let code = codes.get(key).cloned().or_else(|| {
                    PINNED_TERRITORIES
                        .iter()
                        .find(|p| p.key == key)
                        .map(|p| p.code.to_string())
                });
                let class = code.as_deref().and_then(|c| regions.classify(c));
                CountryRow {
                    country_key: *surrogate,
                    country_name: display_name(key),
                    country_code: code.clone(),
                    region: class.map(|c| c.region.clone()),
                    continent: class.map(|c| c.continent.clone()),
                }
            })
            .collect();
        rows.sort_by_key(|r| r.country_key);

        let unclassified = rows.iter().filter(|r| r.region.is_none()).count();
        if unclassified > 0 {
            debug!(unclassified, "countries without a region");
        }

        Self { rows, by_key }
    }

    pub fn key_for(&self, canonical: &str) -> Option<i32> {
        self.by_key.get(canonical).copied()
    }

    pub fn rows(&self) -> &[CountryRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<CountryRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// First non-empty code reported for each canonical key.
pub fn country_codes(population: &[PopulationObservation]) -> BTreeMap<String, String> {
    let mut codes = BTreeMap::new();
    for obs in population {
        if let Some(code) = obs.code.as_deref().filter(|c| !c.is_empty()) {
            codes.entry(obs.key.clone()).or_insert_with(|| code.to_string());
        }
    }
    codes
}

/// Display casing: uppercase the first letter after any non-letter.
pub fn display_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut after_letter = false;
    for ch in key.chars() {
        if ch.is_alphabetic() {
            if after_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            after_letter = true;
        } else {
            out.push(ch);
            after_letter = false;
        }
    }
    out
}

// =============================================================================
// Time
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct TimeDimension {
    rows: Vec<TimeRow>,
}

impl TimeDimension {
    /// Observed years plus the reporting year; the year is its own key.
    pub fn build(observed: &BTreeSet<i32>, calendar: &Calendar) -> Self {
        let mut years = observed.clone();
        years.insert(calendar.reporting_year);
        let rows = years
            .into_iter()
            .map(|year| TimeRow {
                time_key: year,
                year_value: year,
                is_historical: year < calendar.reference_year,
                period_type: PERIOD_ANNUAL,
            })
            .collect();
        Self { rows }
    }

    pub fn key_for(&self, year: i32) -> Option<i32> {
        self.rows
            .binary_search_by_key(&year, |r| r.year_value)
            .ok()
            .map(|idx| self.rows[idx].time_key)
    }

    pub fn rows(&self) -> &[TimeRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<TimeRow> {
        self.rows
    }
}

// =============================================================================
// Quality of life
// =============================================================================

/// Inner join of survey rows onto the country dimension. One row per country;
/// the first survey row wins.
pub fn build_quality_dimension(
    survey: &[SurveyObservation],
    countries: &CountryDimension,
) -> (Vec<QualityOfLifeRow>, JoinReport) {
    let mut report = JoinReport::new("quality_of_life_country", JoinKind::Inner);
    report.input_rows = survey.len();

    let mut seen = BTreeSet::new();
    let mut rows = Vec::with_capacity(survey.len());
    for obs in survey {
        let Some(country_key) = countries.key_for(&obs.key) else {
            warn!(key = %obs.key, "survey row has no country; dropped");
            report.dropped_rows += 1;
            continue;
        };
        if !seen.insert(country_key) {
            debug!(key = %obs.key, "duplicate survey row ignored");
            report.duplicate_rows += 1;
            continue;
        }
        rows.push(QualityOfLifeRow {
            country_key,
            scores: obs.scores.clone(),
        });
    }

    rows.sort_by_key(|r| r.country_key);
    report.output_rows = rows.len();
    (rows, report)
}
