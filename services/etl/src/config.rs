//! Run configuration, built once by the binary and passed to each stage.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{EtlError, Result};

pub const DEFAULT_REFERENCE_YEAR: i32 = 2025;
pub const DEFAULT_REPORTING_YEAR: i32 = 2025;

#[derive(Debug, Clone, Serialize)]
pub struct SourcePaths {
    /// Quality-of-life survey export (CSV).
    pub survey: PathBuf,
    /// GDP grid, one column per year (workbook or CSV).
    pub gdp: PathBuf,
    /// Population indicator feed (XML).
    pub population: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Calendar {
    /// Years before this one are historical.
    pub reference_year: i32,
    /// Always present in the time dimension.
    pub reporting_year: i32,
}

impl Default for Calendar {
    fn default() -> Self {
        Self {
            reference_year: DEFAULT_REFERENCE_YEAR,
            reporting_year: DEFAULT_REPORTING_YEAR,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildSettings {
    /// Workbook sheet holding the GDP grid; first sheet when unset.
    pub gdp_sheet: Option<String>,
    /// Entity column of the GDP grid; first column when unset.
    pub gdp_entity_column: Option<String>,
    /// Region classification replacing the bundled one.
    pub regions: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EtlConfig {
    pub sources: SourcePaths,
    pub calendar: Calendar,
    pub settings: BuildSettings,
}

impl EtlConfig {
    pub fn new(sources: SourcePaths) -> Self {
        Self {
            sources,
            calendar: Calendar::default(),
            settings: BuildSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, year) in [
            ("reference year", self.calendar.reference_year),
            ("reporting year", self.calendar.reporting_year),
        ] {
            if !(1000..=9999).contains(&year) {
                return Err(EtlError::Config(format!("{name} {year} is not a four-digit year")));
            }
        }

        for (name, path) in [
            ("survey", &self.sources.survey),
            ("gdp", &self.sources.gdp),
            ("population", &self.sources.population),
        ] {
            if path.as_os_str().is_empty() {
                return Err(EtlError::Config(format!("{name} path is empty")));
            }
        }

        if let Some(column) = &self.settings.gdp_entity_column {
            if column.trim().is_empty() {
                return Err(EtlError::Config("gdp entity column is blank".into()));
            }
        }
        Ok(())
    }
}
