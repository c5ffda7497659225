//! Warehouse schema and the full-refresh loader.
//!
//! A load replaces all four tables inside one transaction. Referential
//! checks are relaxed while the old rows are deleted (facts first, country
//! last), restored, and then the new rows are inserted parents first. Any
//! failure rolls the whole unit back and the previous warehouse stays intact.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use sqlx::Any;
use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};
use crate::model::{QualityMetric, StarSchema};

pub const TABLE_COUNTRY: &str = "dim_country";
pub const TABLE_TIME: &str = "dim_time";
pub const TABLE_QUALITY: &str = "dim_quality_of_life";
pub const TABLE_FACTS: &str = "fact_country_metrics";

/// Child tables first.
const DELETE_ORDER: [&str; 4] = [TABLE_FACTS, TABLE_QUALITY, TABLE_TIME, TABLE_COUNTRY];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(EtlError::Config(format!(
                "unsupported database scheme '{other}' (expected postgres, mysql or sqlite)"
            ))),
        }
    }

    /// Bind placeholder for the 1-based parameter `idx`.
    pub fn placeholder(self, idx: usize) -> String {
        match self {
            Dialect::Postgres => format!("${idx}"),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    pub fn placeholders(self, count: usize) -> String {
        (1..=count)
            .map(|idx| self.placeholder(idx))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn disable_constraints(self) -> &'static str {
        match self {
            Dialect::Postgres => "SET CONSTRAINTS ALL DEFERRED",
            Dialect::MySql => "SET FOREIGN_KEY_CHECKS = 0",
            Dialect::Sqlite => "PRAGMA defer_foreign_keys = ON",
        }
    }

    fn enable_constraints(self) -> &'static str {
        match self {
            Dialect::Postgres => "SET CONSTRAINTS ALL IMMEDIATE",
            Dialect::MySql => "SET FOREIGN_KEY_CHECKS = 1",
            Dialect::Sqlite => "PRAGMA defer_foreign_keys = OFF",
        }
    }

    /// Suffix on foreign keys so the constraint toggle has something to act on.
    fn deferrable(self) -> &'static str {
        match self {
            Dialect::Postgres => " DEFERRABLE INITIALLY IMMEDIATE",
            Dialect::MySql | Dialect::Sqlite => "",
        }
    }

    fn create_statements(self) -> Vec<String> {
        let deferrable = self.deferrable();

        let mut quality_columns = String::new();
        for metric in QualityMetric::ALL {
            quality_columns.push_str(&format!(
                "    {} DOUBLE PRECISION NOT NULL,\n    {} VARCHAR(32) NOT NULL,\n",
                metric.value_column(),
                metric.category_column()
            ));
        }

        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_COUNTRY} (
    country_key INTEGER PRIMARY KEY,
    country_name VARCHAR(255) NOT NULL,
    country_code VARCHAR(8),
    region VARCHAR(64),
    continent VARCHAR(32)
)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_TIME} (
    time_key INTEGER PRIMARY KEY,
    year_value INTEGER NOT NULL,
    is_historical BOOLEAN NOT NULL,
    period_type VARCHAR(16) NOT NULL
)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_QUALITY} (
    country_key INTEGER PRIMARY KEY,
{quality_columns}    FOREIGN KEY (country_key) REFERENCES {TABLE_COUNTRY} (country_key){deferrable}
)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_FACTS} (
    country_key INTEGER NOT NULL,
    time_key INTEGER NOT NULL,
    gdp_usd DOUBLE PRECISION NOT NULL,
    population DOUBLE PRECISION NOT NULL,
    gdp_per_capita DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (country_key, time_key),
    FOREIGN KEY (country_key) REFERENCES {TABLE_COUNTRY} (country_key){deferrable},
    FOREIGN KEY (time_key) REFERENCES {TABLE_TIME} (time_key){deferrable}
)"
            ),
        ]
    }
}

/// Rows written per table by one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub countries: u64,
    pub times: u64,
    pub quality: u64,
    pub facts: u64,
}

#[derive(Debug, Clone)]
pub struct Warehouse {
    pool: AnyPool,
    dialect: Dialect,
}

impl Warehouse {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(url)?;
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(dialect = ?dialect, "connected to warehouse");
        Ok(Self { pool, dialect })
    }

    pub fn from_pool(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create the four tables when missing. Existing tables are left alone.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in self.dialect.create_statements() {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        info!("warehouse schema ensured");
        Ok(())
    }

    /// Replace the warehouse contents with `schema` atomically.
    pub async fn replace(&self, schema: &StarSchema) -> Result<LoadReport> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = sqlx::Connection::begin(&mut *conn).await?;

        match self.write_all(&mut tx, schema).await {
            Ok(report) => {
                tx.commit().await?;
                info!(
                    countries = report.countries,
                    times = report.times,
                    quality = report.quality,
                    facts = report.facts,
                    "warehouse replaced"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "load failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                // MySQL keeps the foreign-key switch on the session, not the transaction.
                if self.dialect == Dialect::MySql {
                    if let Err(reset) = sqlx::query(self.dialect.enable_constraints())
                        .execute(&mut *conn)
                        .await
                    {
                        warn!(error = %reset, "could not re-enable foreign key checks");
                    }
                }
                Err(err.into())
            }
        }
    }

    async fn write_all(
        &self,
        tx: &mut sqlx::Transaction<'_, Any>,
        schema: &StarSchema,
    ) -> std::result::Result<LoadReport, sqlx::Error> {
        sqlx::query(self.dialect.disable_constraints())
            .execute(&mut **tx)
            .await?;
        for table in DELETE_ORDER {
            let deleted = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut **tx)
                .await?
                .rows_affected();
            debug!(table, deleted, "cleared table");
        }
        sqlx::query(self.dialect.enable_constraints())
            .execute(&mut **tx)
            .await?;

        let mut report = LoadReport::default();

        let sql = self.insert_sql(
            TABLE_COUNTRY,
            &["country_key", "country_name", "country_code", "region", "continent"],
        );
        for row in &schema.countries {
            report.countries += sqlx::query(&sql)
                .bind(row.country_key)
                .bind(row.country_name.as_str())
                .bind(row.country_code.as_deref())
                .bind(row.region.as_deref())
                .bind(row.continent.as_deref())
                .execute(&mut **tx)
                .await?
                .rows_affected();
        }

        let sql = self.insert_sql(
            TABLE_TIME,
            &["time_key", "year_value", "is_historical", "period_type"],
        );
        for row in &schema.times {
            report.times += sqlx::query(&sql)
                .bind(row.time_key)
                .bind(row.year_value)
                .bind(row.is_historical)
                .bind(row.period_type)
                .execute(&mut **tx)
                .await?
                .rows_affected();
        }

        let sql = self.insert_sql(TABLE_QUALITY, &quality_columns());
        for row in &schema.quality {
            let mut query = sqlx::query(&sql).bind(row.country_key);
            for (_, score) in row.scores.iter() {
                query = query.bind(score.value).bind(score.category.as_str());
            }
            report.quality += query.execute(&mut **tx).await?.rows_affected();
        }

        let sql = self.insert_sql(
            TABLE_FACTS,
            &["country_key", "time_key", "gdp_usd", "population", "gdp_per_capita"],
        );
        for row in &schema.facts {
            report.facts += sqlx::query(&sql)
                .bind(row.country_key)
                .bind(row.time_key)
                .bind(row.gdp_usd)
                .bind(row.population)
                .bind(row.gdp_per_capita)
                .execute(&mut **tx)
                .await?
                .rows_affected();
        }

        Ok(report)
    }

    fn insert_sql(&self, table: &str, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            self.dialect.placeholders(columns.len())
        )
    }

    /// Current row count of each warehouse table.
    pub async fn row_counts(&self) -> Result<BTreeMap<&'static str, i64>> {
        let mut counts = BTreeMap::new();
        for table in DELETE_ORDER {
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            counts.insert(table, count);
        }
        Ok(counts)
    }
}

/// Quality-of-life insert columns in binding order.
fn quality_columns() -> Vec<&'static str> {
    let mut columns = vec!["country_key"];
    for metric in QualityMetric::ALL {
        columns.push(metric.value_column());
        columns.push(metric.category_column());
    }
    columns
}
