//! Country metrics ETL.
//!
//! Reads a quality-of-life survey (CSV), a GDP grid (workbook) and a
//! population indicator feed (XML), reconciles country identities across
//! them, and loads a star schema:
//!
//! - `dim_country`, `dim_time`, `dim_quality_of_life`
//! - `fact_country_metrics` at country × year grain
//!
//! Each run is a full refresh inside one transaction.

pub mod clean;
pub mod config;
pub mod conform;
pub mod diagnostics;
pub mod dimensions;
pub mod error;
pub mod extract;
pub mod facts;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod regions;
pub mod reshape;
pub mod warehouse;

pub use config::{BuildSettings, Calendar, EtlConfig, SourcePaths};
pub use error::{EtlError, ExtractError};
pub use normalize::{normalize, normalize_opt};
pub use pipeline::{run, RunSummary};
pub use warehouse::{Dialect, LoadReport, Warehouse};
