//! Read-only report queries over the warehouse.
//!
//! The SQL stays within what PostgreSQL, MySQL and SQLite all accept; the
//! derived ratios, the category ordering and the rollup subtotals are done
//! here rather than in dialect-specific SQL.

use std::cmp::Ordering;

use serde::Serialize;

use country_etl::clean::MISSING_CATEGORY;
use country_etl::Warehouse;

/// Latest year with both a population and a GDP figure.
const LATEST_YEAR: &str =
    "(SELECT MAX(time_key) FROM fact_country_metrics WHERE population > 0 AND gdp_usd > 0)";

/// Tier labels in reporting order; anything else follows, `None` goes last.
const TIER_ORDER: [&str; 5] = ["Very Low", "Low", "Moderate", "High", "Very High"];

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct GdpPopulationRow {
    pub country_name: String,
    pub population: f64,
    pub gdp_usd: f64,
    pub time_key: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CostOfLivingRow {
    pub region: String,
    pub avg_cost_of_living: f64,
    pub avg_purchasing_power: f64,
    pub avg_inflation_pressure_ratio: f64,
    pub country_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateDevelopmentRow {
    pub country_name: String,
    pub year_value: i32,
    pub climate_quality_2025: f64,
    pub total_gdp_usd: f64,
    pub development_efficiency_ratio: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct ClimateRecord {
    country_name: String,
    year_value: i32,
    climate_value: f64,
    total_gdp_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TrafficCommuteRow {
    pub traffic_commute_category: String,
    pub avg_gdp_per_capita: Option<f64>,
    pub total_population: f64,
    pub country_count: i64,
}

/// One line of a year/country rollup. Subtotal lines have no country, the
/// grand total has neither year nor country.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupRow {
    pub year_value: Option<i32>,
    pub country_name: Option<String>,
    pub gdp_usd: f64,
}

#[derive(sqlx::FromRow)]
struct RollupRecord {
    year_value: i32,
    country_name: String,
    gdp_usd: f64,
}

pub async fn gdp_population(warehouse: &Warehouse) -> Result<Vec<GdpPopulationRow>, sqlx::Error> {
    let sql = format!(
        "SELECT c.country_name, f.population, f.gdp_usd, f.time_key
         FROM fact_country_metrics f
         JOIN dim_country c ON f.country_key = c.country_key
         WHERE f.time_key = {LATEST_YEAR}
           AND f.population > 0 AND f.gdp_usd > 0
         ORDER BY c.country_name"
    );
    sqlx::query_as(&sql).fetch_all(warehouse.pool()).await
}

pub async fn cost_of_living(warehouse: &Warehouse) -> Result<Vec<CostOfLivingRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT COALESCE(c.region, 'Unclassified') AS region,
                AVG(q.cost_of_living_value) AS avg_cost_of_living,
                AVG(q.purchasing_power_value) AS avg_purchasing_power,
                AVG(q.cost_of_living_value / q.purchasing_power_value) AS avg_inflation_pressure_ratio,
                COUNT(*) AS country_count
         FROM dim_quality_of_life q
         JOIN dim_country c ON c.country_key = q.country_key
         WHERE q.purchasing_power_value > 0 AND q.cost_of_living_value > 0
         GROUP BY COALESCE(c.region, 'Unclassified')
         ORDER BY region",
    )
    .fetch_all(warehouse.pool())
    .await
}

pub async fn climate_development(
    warehouse: &Warehouse,
    from: i32,
    to: i32,
) -> Result<Vec<ClimateDevelopmentRow>, sqlx::Error> {
    let dialect = warehouse.dialect();
    let sql = format!(
        "SELECT c.country_name, t.year_value, q.climate_value, SUM(f.gdp_usd) AS total_gdp_usd
         FROM fact_country_metrics f
         JOIN dim_country c ON c.country_key = f.country_key
         JOIN dim_time t ON t.time_key = f.time_key
         JOIN dim_quality_of_life q ON q.country_key = f.country_key
         WHERE t.year_value BETWEEN {} AND {} AND f.gdp_usd > 0
         GROUP BY c.country_name, t.year_value, q.climate_value
         ORDER BY c.country_name, t.year_value",
        dialect.placeholder(1),
        dialect.placeholder(2)
    );
    let records: Vec<ClimateRecord> = sqlx::query_as(&sql)
        .bind(from)
        .bind(to)
        .fetch_all(warehouse.pool())
        .await?;

    Ok(records
        .into_iter()
        .map(|r| ClimateDevelopmentRow {
            development_efficiency_ratio: (r.climate_value > 0.0)
                .then(|| r.total_gdp_usd / r.climate_value),
            country_name: r.country_name,
            year_value: r.year_value,
            climate_quality_2025: r.climate_value,
            total_gdp_usd: r.total_gdp_usd,
        })
        .collect())
}

pub async fn traffic_commute(warehouse: &Warehouse) -> Result<Vec<TrafficCommuteRow>, sqlx::Error> {
    let sql = format!(
        "SELECT q.traffic_commute_category,
                AVG(CASE WHEN f.gdp_per_capita > 0 THEN f.gdp_per_capita END) AS avg_gdp_per_capita,
                SUM(f.population) AS total_population,
                COUNT(*) AS country_count
         FROM fact_country_metrics f
         JOIN dim_quality_of_life q ON q.country_key = f.country_key
         WHERE f.time_key = {LATEST_YEAR}
         GROUP BY q.traffic_commute_category"
    );
    let mut rows: Vec<TrafficCommuteRow> = sqlx::query_as(&sql).fetch_all(warehouse.pool()).await?;
    rows.sort_by(|a, b| tier_order(&a.traffic_commute_category, &b.traffic_commute_category));
    Ok(rows)
}

pub async fn rollup(warehouse: &Warehouse) -> Result<Vec<RollupRow>, sqlx::Error> {
    let records: Vec<RollupRecord> = sqlx::query_as(
        "SELECT t.year_value, c.country_name, SUM(f.gdp_usd) AS gdp_usd
         FROM fact_country_metrics f
         JOIN dim_country c ON c.country_key = f.country_key
         JOIN dim_time t ON t.time_key = f.time_key
         GROUP BY t.year_value, c.country_name
         ORDER BY t.year_value, c.country_name",
    )
    .fetch_all(warehouse.pool())
    .await?;
    Ok(with_subtotals(records))
}

fn with_subtotals(records: Vec<RollupRecord>) -> Vec<RollupRow> {
    let mut rows = Vec::with_capacity(records.len() + 8);
    let mut grand_total = 0.0;
    let mut current: Option<(i32, f64)> = None;

    for record in records {
        if let Some((year, subtotal)) = current {
            if year != record.year_value {
                rows.push(RollupRow {
                    year_value: Some(year),
                    country_name: None,
                    gdp_usd: subtotal,
                });
                current = None;
            }
        }
        let (_, subtotal) = current.get_or_insert((record.year_value, 0.0));
        *subtotal += record.gdp_usd;
        grand_total += record.gdp_usd;
        rows.push(RollupRow {
            year_value: Some(record.year_value),
            country_name: Some(record.country_name),
            gdp_usd: record.gdp_usd,
        });
    }

    if let Some((year, subtotal)) = current {
        rows.push(RollupRow {
            year_value: Some(year),
            country_name: None,
            gdp_usd: subtotal,
        });
    }
    rows.push(RollupRow {
        year_value: None,
        country_name: None,
        gdp_usd: grand_total,
    });
    rows
}

fn tier_rank(category: &str) -> (u8, usize) {
    if category == MISSING_CATEGORY {
        return (2, 0);
    }
    match TIER_ORDER.iter().position(|t| t.eq_ignore_ascii_case(category)) {
        Some(idx) => (0, idx),
        None => (1, 0),
    }
}

fn tier_order(a: &str, b: &str) -> Ordering {
    tier_rank(a).cmp(&tier_rank(b)).then_with(|| a.cmp(b))
}
