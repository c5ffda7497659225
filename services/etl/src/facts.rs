//! Fact construction at country × year grain.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::conform::{GdpObservation, PopulationObservation};
use crate::diagnostics::{JoinKind, JoinReport};
use crate::dimensions::{CountryDimension, TimeDimension};
use crate::model::{gdp_per_capita, FactRow};

#[derive(Debug, Clone)]
pub struct FactReports {
    pub population_index: JoinReport,
    pub gdp_population: JoinReport,
    pub country: JoinReport,
    pub time: JoinReport,
}

impl FactReports {
    pub fn all(&self) -> [&JoinReport; 4] {
        [&self.population_index, &self.gdp_population, &self.country, &self.time]
    }
}

/// GDP-anchored join of GDP and population at (canonical key, year), then
/// surrogate resolution against both dimensions.
///
/// Every GDP observation is a candidate; a missing population becomes `0`
/// and so does the per-capita figure. Population without GDP produces no
/// fact. Candidates whose key or year has no dimension row are dropped.
pub fn build_facts(
    gdp: &[GdpObservation],
    population: &[PopulationObservation],
    countries: &CountryDimension,
    times: &TimeDimension,
) -> (Vec<FactRow>, FactReports) {
    let mut reports = FactReports {
        population_index: JoinReport::new("population_index", JoinKind::Inner),
        gdp_population: JoinReport::new("gdp_population", JoinKind::Anchored),
        country: JoinReport::new("fact_country", JoinKind::Left),
        time: JoinReport::new("fact_time", JoinKind::Left),
    };

    let mut pop_index: BTreeMap<(&str, i32), f64> = BTreeMap::new();
    reports.population_index.input_rows = population.len();
    for obs in population {
        if pop_index.contains_key(&(obs.key.as_str(), obs.year)) {
            reports.population_index.duplicate_rows += 1;
            continue;
        }
        pop_index.insert((obs.key.as_str(), obs.year), obs.population);
    }
    reports.population_index.output_rows = pop_index.len();

    // (key, year) -> (gdp, population), first GDP observation wins.
    let mut candidates: BTreeMap<(&str, i32), (f64, f64)> = BTreeMap::new();
    reports.gdp_population.input_rows = gdp.len();
    for obs in gdp {
        let at = (obs.key.as_str(), obs.year);
        if candidates.contains_key(&at) {
            reports.gdp_population.duplicate_rows += 1;
            continue;
        }
        let population = pop_index.get(&at).copied().unwrap_or(0.0);
        candidates.insert(at, (obs.gdp_usd, population));
    }
    reports.gdp_population.output_rows = candidates.len();

    let without_population = candidates.values().filter(|(_, p)| *p == 0.0).count();
    if without_population > 0 {
        debug!(without_population, "GDP rows without population use 0");
    }

    reports.country.input_rows = candidates.len();
    let mut facts = Vec::with_capacity(candidates.len());
    for ((key, year), (gdp_usd, population)) in candidates {
        let Some(country_key) = countries.key_for(key) else {
            warn!(key, year, "fact has no country dimension row; dropped");
            reports.country.dropped_rows += 1;
            continue;
        };
        reports.time.input_rows += 1;
        let Some(time_key) = times.key_for(year) else {
            warn!(key, year, "fact has no time dimension row; dropped");
            reports.time.dropped_rows += 1;
            continue;
        };
        facts.push(FactRow {
            country_key,
            time_key,
            gdp_usd,
            population,
            gdp_per_capita: gdp_per_capita(gdp_usd, population),
        });
    }
    reports.country.output_rows = reports.time.input_rows;
    reports.time.output_rows = facts.len();

    facts.sort_by_key(|f| (f.country_key, f.time_key));
    (facts, reports)
}
