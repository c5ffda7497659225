//! The run: extract → reshape → conform → dimensions → facts → load.
//!
//! Every stage materializes its output before the next begins, and only the
//! final load touches the database.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::conform::{conform_gdp, conform_population, conform_survey, ConformReport};
use crate::config::{Calendar, EtlConfig};
use crate::diagnostics::{JoinReport, KeyCoverage};
use crate::dimensions::{build_quality_dimension, country_codes, CountryDimension, TimeDimension};
use crate::error::{EtlError, ExtractError, Result};
use crate::extract::{read_delimited, read_feed, read_spreadsheet, RawTable};
use crate::facts::build_facts;
use crate::model::StarSchema;
use crate::regions::RegionTable;
use crate::reshape::{flatten_feed, melt, LongRow, POPULATION_FEED};
use crate::warehouse::{LoadReport, Warehouse};

/// Raw source shapes, after reshaping but before any interpretation.
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub survey: RawTable,
    pub gdp: Vec<LongRow>,
    pub population: RawTable,
}

pub fn extract_sources(config: &EtlConfig) -> Result<SourceTables> {
    let sources = &config.sources;

    let survey = read_delimited(&sources.survey)?;

    let gdp_origin = sources.gdp.display().to_string();
    let grid = read_spreadsheet(&sources.gdp, config.settings.gdp_sheet.as_deref())?;
    let id_column = match &config.settings.gdp_entity_column {
        Some(column) => column.clone(),
        None => grid
            .columns
            .first()
            .cloned()
            .ok_or_else(|| ExtractError::layout(&gdp_origin, "grid has no columns"))?,
    };
    let gdp = melt(&grid, &id_column, &gdp_origin)?;

    let feed = read_feed(&sources.population)?;
    let population = flatten_feed(&feed, &POPULATION_FEED);

    info!(
        survey_rows = survey.len(),
        gdp_rows = gdp.len(),
        population_rows = population.len(),
        "sources extracted"
    );
    Ok(SourceTables {
        survey,
        gdp,
        population,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildDiagnostics {
    pub conform: ConformReport,
    pub coverage: KeyCoverage,
    pub joins: Vec<JoinReport>,
}

#[derive(Debug, Clone)]
pub struct Build {
    pub schema: StarSchema,
    pub diagnostics: BuildDiagnostics,
}

/// Pure transformation from source tables to the star schema.
pub fn build(tables: &SourceTables, regions: &RegionTable, calendar: &Calendar) -> Result<Build> {
    let mut diagnostics = BuildDiagnostics::default();

    let population = conform_population(
        &tables.population,
        &POPULATION_FEED,
        "population feed",
        &mut diagnostics.conform,
    )?;
    let gdp = conform_gdp(&tables.gdp, &mut diagnostics.conform);
    let survey = conform_survey(&tables.survey, "survey", &mut diagnostics.conform)?;
    diagnostics.conform.log();

    let coverage = &mut diagnostics.coverage;
    coverage.record("population", population.iter().map(|o| o.key.as_str()));
    coverage.record("gdp", gdp.iter().map(|o| o.key.as_str()));
    coverage.record("survey", survey.iter().map(|o| o.key.as_str()));
    coverage.log();

    let keys: BTreeSet<String> = coverage.union().into_iter().map(str::to_string).collect();
    let countries = CountryDimension::build(&keys, &country_codes(&population), regions);

    let years: BTreeSet<i32> = population
        .iter()
        .map(|o| o.year)
        .chain(gdp.iter().map(|o| o.year))
        .collect();
    let times = TimeDimension::build(&years, calendar);

    let (quality, quality_join) = build_quality_dimension(&survey, &countries);
    let (facts, fact_joins) = build_facts(&gdp, &population, &countries, &times);

    diagnostics.joins.push(quality_join);
    diagnostics.joins.extend(fact_joins.all().into_iter().cloned());
    for join in &diagnostics.joins {
        join.log();
    }

    let schema = StarSchema {
        countries: countries.into_rows(),
        times: times.into_rows(),
        quality,
        facts,
    };
    info!(
        countries = schema.countries.len(),
        years = schema.times.len(),
        quality = schema.quality.len(),
        facts = schema.facts.len(),
        "star schema built"
    );
    Ok(Build {
        schema,
        diagnostics,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Rows the run built.
    pub built: LoadReport,
    /// Rows the run wrote; absent on a dry run.
    pub loaded: Option<LoadReport>,
    pub diagnostics: BuildDiagnostics,
}

fn built_counts(schema: &StarSchema) -> LoadReport {
    LoadReport {
        countries: schema.countries.len() as u64,
        times: schema.times.len() as u64,
        quality: schema.quality.len() as u64,
        facts: schema.facts.len() as u64,
    }
}

/// Run the pipeline end to end. Without a warehouse this is a dry run that
/// builds and reports but writes nothing.
pub async fn run(config: &EtlConfig, warehouse: Option<&Warehouse>) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("etl_run", run_id = %run_id);

    async move {
        let started_at = Utc::now();
        config.validate()?;

        let regions = match &config.settings.regions {
            Some(path) => RegionTable::load(path)?,
            None => RegionTable::bundled()?,
        };
        let tables = extract_sources(config)?;
        let Build {
            schema,
            diagnostics,
        } = build(&tables, &regions, &config.calendar)?;

        let loaded = match warehouse {
            Some(warehouse) => Some(warehouse.replace(&schema).await?),
            None => {
                info!("dry run, warehouse untouched");
                None
            }
        };

        Ok::<_, EtlError>(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: warehouse.is_none(),
            built: built_counts(&schema),
            loaded,
            diagnostics,
        })
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcePaths;
    use crate::model::QualityMetric;
    use crate::warehouse::{Dialect, TABLE_FACTS, TABLE_QUALITY};
    use sqlx::any::AnyPoolOptions;
    use sqlx::{AnyPool, Row};
    use std::io::Write;
    use tempfile::TempDir;

    const SURVEY: &str = "\
country,Safety Value,Safety Category,Costs of Living Value,Costs of Living Category
Germany,': 65.2,Moderate,65.8,Moderate
Atlantis,': 99.0,Very High,,
South Korea,': 70.1,High,': 80.0,High
";

    const GDP: &str = "\
Country,2022,2023
Germany,4.5,5.0
\"Korea, Republic of\",1644.3,no data
Peru,250.0,260.0
";

    const POPULATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Root xmlns:wb="http://www.worldbank.org">
  <data>
    <record>
      <field name="Country or Area" key="DEU">Germany</field>
      <field name="Item" key="SP.POP.TOTL">Population, total</field>
      <field name="Year">2023</field>
      <field name="Value">1000</field>
    </record>
    <record>
      <field name="Value">51700000</field>
      <field name="Year">2022</field>
      <field name="Country or Area" key="KOR">Korea, Rep.</field>
    </record>
    <record>
      <field name="Country or Area" key="PER">Peru</field>
      <field name="Year">2023</field>
      <field name="Value" />
    </record>
  </data>
</Root>"#;

    fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn fixture() -> (TempDir, EtlConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = EtlConfig::new(SourcePaths {
            survey: write(&dir, "survey.csv", SURVEY),
            gdp: write(&dir, "gdp.csv", GDP),
            population: write(&dir, "population.xml", POPULATION),
        });
        (dir, config)
    }

    fn built(config: &EtlConfig) -> Build {
        let tables = extract_sources(config).unwrap();
        build(&tables, &RegionTable::bundled().unwrap(), &config.calendar).unwrap()
    }

    fn key_of(build: &Build, name: &str) -> i32 {
        build
            .schema
            .countries
            .iter()
            .find(|c| c.country_name == name)
            .map(|c| c.country_key)
            .unwrap_or_else(|| panic!("{name} not in dim_country"))
    }

    async fn memory_warehouse() -> Warehouse {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let warehouse = Warehouse::from_pool(pool, Dialect::Sqlite);
        warehouse.ensure_schema().await.unwrap();
        warehouse
    }

    // -------------------------------------------------------------------------
    // BUILD
    // -------------------------------------------------------------------------

    #[test]
    fn test_germany_gdp_per_capita() {
        let (_dir, config) = fixture();
        let build = built(&config);
        let germany = key_of(&build, "Germany");

        let fact = build
            .schema
            .facts
            .iter()
            .find(|f| f.country_key == germany && f.time_key == 2023)
            .unwrap();
        assert_eq!(fact.population, 1000.0);
        assert_eq!(fact.gdp_usd, 5.0);
        assert_eq!(fact.gdp_per_capita, 5000.0);

        let row = build.schema.countries.iter().find(|c| c.country_key == germany).unwrap();
        assert_eq!(row.country_code.as_deref(), Some("DEU"));
        assert_eq!(row.region.as_deref(), Some("Europe & Central Asia"));
    }

    #[test]
    fn test_survey_only_country_has_quality_but_no_facts() {
        let (_dir, config) = fixture();
        let build = built(&config);
        let atlantis = key_of(&build, "Atlantis");

        let quality = build
            .schema
            .quality
            .iter()
            .find(|q| q.country_key == atlantis)
            .unwrap();
        assert_eq!(quality.scores.get(QualityMetric::Safety).value, 99.0);
        assert_eq!(quality.scores.get(QualityMetric::CostOfLiving).category, "None");
        assert!(build.schema.facts.iter().all(|f| f.country_key != atlantis));
    }

    #[test]
    fn test_aliases_join_across_sources() {
        let (_dir, config) = fixture();
        let build = built(&config);
        let korea = key_of(&build, "Korea, Rep.");

        assert!(build.schema.quality.iter().any(|q| q.country_key == korea));
        let fact = build
            .schema
            .facts
            .iter()
            .find(|f| f.country_key == korea && f.time_key == 2022)
            .unwrap();
        assert_eq!(fact.population, 51_700_000.0);
        assert!(!build.diagnostics.coverage.single_source_keys().contains_key("south korea"));
    }

    #[test]
    fn test_missing_population_and_gdp_use_zero() {
        let (_dir, config) = fixture();
        let build = built(&config);
        let peru = key_of(&build, "Peru");
        let korea = key_of(&build, "Korea, Rep.");

        let peru_2022 = build
            .schema
            .facts
            .iter()
            .find(|f| f.country_key == peru && f.time_key == 2022)
            .unwrap();
        assert_eq!(peru_2022.population, 0.0);
        assert_eq!(peru_2022.gdp_per_capita, 0.0);

        let korea_2023 = build
            .schema
            .facts
            .iter()
            .find(|f| f.country_key == korea && f.time_key == 2023)
            .unwrap();
        assert_eq!(korea_2023.gdp_usd, 0.0);
    }

    #[test]
    fn test_dimensions_cover_union_and_pinned_territory() {
        let (_dir, config) = fixture();
        let build = built(&config);

        // germany, atlantis, korea, peru + pinned taiwan
        assert_eq!(build.schema.countries.len(), 5);
        assert!(build.schema.countries.iter().any(|c| c.country_key == 9999));

        let years: Vec<i32> = build.schema.times.iter().map(|t| t.time_key).collect();
        assert_eq!(years, vec![2022, 2023, 2025]);
    }

    #[test]
    fn test_missing_source_fails_the_run() {
        let (_dir, mut config) = fixture();
        config.sources.population = "/nonexistent/population.xml".into();
        assert!(extract_sources(&config).is_err());
    }

    // -------------------------------------------------------------------------
    // RUN
    // -------------------------------------------------------------------------

    #[derive(Debug, PartialEq)]
    struct Snapshot {
        facts: Vec<(i64, i64, f64, f64, f64)>,
        countries: Vec<(i64, String, Option<String>, Option<String>, Option<String>)>,
        times: Vec<(i64, i64, String)>,
        quality: Vec<(i64, Vec<(f64, String)>)>,
    }

    async fn read_back(pool: &AnyPool) -> Snapshot {
        let facts = sqlx::query_as(
            "SELECT country_key, time_key, gdp_usd, population, gdp_per_capita
             FROM fact_country_metrics ORDER BY country_key, time_key",
        )
        .fetch_all(pool)
        .await
        .unwrap();
        let countries = sqlx::query_as(
            "SELECT country_key, country_name, country_code, region, continent
             FROM dim_country ORDER BY country_key",
        )
        .fetch_all(pool)
        .await
        .unwrap();
        let times =
            sqlx::query_as("SELECT time_key, year_value, period_type FROM dim_time ORDER BY time_key")
                .fetch_all(pool)
                .await
                .unwrap();

        let columns: Vec<String> = QualityMetric::ALL
            .iter()
            .flat_map(|m| [m.value_column(), m.category_column()])
            .map(str::to_string)
            .collect();
        let sql = format!(
            "SELECT country_key, {} FROM dim_quality_of_life ORDER BY country_key",
            columns.join(", ")
        );
        let quality = sqlx::query(&sql)
            .fetch_all(pool)
            .await
            .unwrap()
            .iter()
            .map(|row| {
                let scores = QualityMetric::ALL
                    .iter()
                    .map(|m| {
                        (
                            row.get::<f64, _>(m.value_column()),
                            row.get::<String, _>(m.category_column()),
                        )
                    })
                    .collect();
                (row.get::<i64, _>("country_key"), scores)
            })
            .collect();

        Snapshot {
            facts,
            countries,
            times,
            quality,
        }
    }

    async fn count(pool: &AnyPool, sql: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(sql).fetch_one(pool).await.unwrap();
        n
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (_dir, config) = fixture();
        let summary = run(&config, None).await.unwrap();

        assert!(summary.dry_run);
        assert!(summary.loaded.is_none());
        assert_eq!(summary.built.countries, 5);
    }

    #[tokio::test]
    async fn test_two_runs_produce_identical_warehouse() {
        let (_dir, config) = fixture();
        let warehouse = memory_warehouse().await;

        let first = run(&config, Some(&warehouse)).await.unwrap();
        let before = read_back(warehouse.pool()).await;
        let second = run(&config, Some(&warehouse)).await.unwrap();
        let after = read_back(warehouse.pool()).await;

        assert_eq!(before, after);
        assert_eq!(before.times.len(), 3);
        assert_eq!(before.times[0], (2022, 2022, "Annual".to_string()));
        assert_eq!(before.quality.len(), 3);
        assert!(before
            .quality
            .iter()
            .any(|(_, scores)| scores.contains(&(99.0, "Very High".to_string()))));
        assert_eq!(first.loaded, second.loaded);
        assert_ne!(first.run_id, second.run_id);

        let counts = warehouse.row_counts().await.unwrap();
        assert_eq!(counts[TABLE_FACTS] as u64, first.built.facts);
        assert_eq!(counts[TABLE_QUALITY], 3);
    }

    #[tokio::test]
    async fn test_loaded_keys_resolve_to_dimensions() {
        let (_dir, config) = fixture();
        let warehouse = memory_warehouse().await;
        let summary = run(&config, Some(&warehouse)).await.unwrap();
        let pool = warehouse.pool();

        assert!(summary.built.facts > 0);
        assert_eq!(
            count(
                pool,
                "SELECT COUNT(*) FROM fact_country_metrics f
                 LEFT JOIN dim_country c ON c.country_key = f.country_key
                 WHERE c.country_key IS NULL",
            )
            .await,
            0
        );
        assert_eq!(
            count(
                pool,
                "SELECT COUNT(*) FROM fact_country_metrics f
                 LEFT JOIN dim_time t ON t.time_key = f.time_key
                 WHERE t.time_key IS NULL",
            )
            .await,
            0
        );
        assert_eq!(
            count(
                pool,
                "SELECT COUNT(*) FROM dim_quality_of_life q
                 LEFT JOIN dim_country c ON c.country_key = q.country_key
                 WHERE c.country_key IS NULL",
            )
            .await,
            0
        );
        assert_eq!(
            count(pool, "SELECT COUNT(DISTINCT country_key) FROM dim_country").await,
            count(pool, "SELECT COUNT(*) FROM dim_country").await
        );
    }
}
