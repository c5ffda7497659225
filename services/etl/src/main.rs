//! country-etl - Builds the country metrics warehouse
//!
//! Reads the survey, GDP and population sources, builds the star schema and
//! replaces the warehouse contents in one transaction. With `--dry-run` the
//! run stops after the build and only prints the summary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use country_etl::{BuildSettings, Calendar, EtlConfig, SourcePaths, Warehouse};

#[derive(Parser, Debug)]
#[command(name = "country-etl", about = "Loads the country metrics star schema")]
struct Args {
    /// Quality-of-life survey export (CSV)
    #[arg(long)]
    survey: PathBuf,

    /// GDP grid with one column per year (xlsx/xls/ods or CSV)
    #[arg(long)]
    gdp: PathBuf,

    /// Population indicator feed (XML)
    #[arg(long)]
    population: PathBuf,

    /// Sheet holding the GDP grid (default: first sheet)
    #[arg(long)]
    gdp_sheet: Option<String>,

    /// Entity column of the GDP grid (default: first column)
    #[arg(long)]
    gdp_entity_column: Option<String>,

    /// Region classification CSV replacing the bundled one
    #[arg(long)]
    regions: Option<PathBuf>,

    /// Years before this one are historical
    #[arg(long, default_value_t = country_etl::config::DEFAULT_REFERENCE_YEAR)]
    reference_year: i32,

    /// Year always present in the time dimension
    #[arg(long, default_value_t = country_etl::config::DEFAULT_REPORTING_YEAR)]
    reporting_year: i32,

    /// Build and report without touching the warehouse
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Create the warehouse tables if they do not exist
    #[arg(long, default_value = "false")]
    init_schema: bool,

    /// Maximum database connections
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

impl Args {
    fn config(&self) -> EtlConfig {
        EtlConfig {
            sources: SourcePaths {
                survey: self.survey.clone(),
                gdp: self.gdp.clone(),
                population: self.population.clone(),
            },
            calendar: Calendar {
                reference_year: self.reference_year,
                reporting_year: self.reporting_year,
            },
            settings: BuildSettings {
                gdp_sheet: self.gdp_sheet.clone(),
                gdp_entity_column: self.gdp_entity_column.clone(),
                regions: self.regions.clone(),
            },
        }
    }
}

fn database_url() -> Result<String> {
    std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("DB_URL"))
        .context("DATABASE_URL env var missing")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.config();
    config.validate().context("Invalid configuration")?;

    info!(mode = if args.dry_run { "dry-run" } else { "live" }, "starting country-etl");

    let warehouse = if args.dry_run {
        None
    } else {
        let url = database_url()?;
        let warehouse = Warehouse::connect(&url, args.max_connections)
            .await
            .context("Failed to connect to warehouse")?;
        if args.init_schema {
            warehouse
                .ensure_schema()
                .await
                .context("Failed to create warehouse schema")?;
        }
        Some(warehouse)
    };

    let summary = country_etl::run(&config, warehouse.as_ref())
        .await
        .context("ETL run failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to render run summary")?
    );
    Ok(())
}
