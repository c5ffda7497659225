//! Static country → region classification keyed by country code.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::ExtractError;

const BUNDLED: &str = include_str!("../data/country_regions.csv");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Classification {
    pub region: String,
    pub continent: String,
}

#[derive(Debug, Deserialize)]
struct ClassificationRecord {
    country_code: String,
    region: String,
    continent: String,
}

#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    by_code: BTreeMap<String, Classification>,
}

impl RegionTable {
    /// Classification shipped with the crate (World Bank regions).
    pub fn bundled() -> Result<Self, ExtractError> {
        Self::from_csv(BUNDLED.as_bytes(), "bundled country_regions.csv")
    }

    pub fn load(path: &Path) -> Result<Self, ExtractError> {
        info!(path = %path.display(), "reading region classification");
        let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
            origin: path.display().to_string(),
            source,
        })?;
        Self::from_csv(&bytes, &path.display().to_string())
    }

    pub fn from_csv(bytes: &[u8], origin: &str) -> Result<Self, ExtractError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let mut by_code = BTreeMap::new();
        for result in reader.deserialize::<ClassificationRecord>() {
            let record = result.map_err(|source| ExtractError::Csv {
                origin: origin.to_string(),
                source,
            })?;
            by_code
                .entry(record.country_code.to_uppercase())
                .or_insert(Classification {
                    region: record.region,
                    continent: record.continent,
                });
        }

        if by_code.is_empty() {
            return Err(ExtractError::layout(origin, "no classifications"));
        }
        Ok(Self { by_code })
    }

    pub fn classify(&self, code: &str) -> Option<&Classification> {
        self.by_code.get(&code.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}
