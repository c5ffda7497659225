//! Star-schema row types shared by the builders, the loader and the reports
//! service.

use serde::Serialize;

/// `period_type` of every time row.
pub const PERIOD_ANNUAL: &str = "Annual";

/// The survey's metric columns. Each one lands in the quality-of-life
/// dimension as a cleaned value plus its tier label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMetric {
    PurchasingPower,
    Safety,
    HealthCare,
    Climate,
    CostOfLiving,
    PropertyPriceToIncome,
    TrafficCommute,
    Pollution,
    QualityOfLife,
}

impl QualityMetric {
    pub const ALL: [QualityMetric; 9] = [
        QualityMetric::PurchasingPower,
        QualityMetric::Safety,
        QualityMetric::HealthCare,
        QualityMetric::Climate,
        QualityMetric::CostOfLiving,
        QualityMetric::PropertyPriceToIncome,
        QualityMetric::TrafficCommute,
        QualityMetric::Pollution,
        QualityMetric::QualityOfLife,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn value_column(self) -> &'static str {
        match self {
            QualityMetric::PurchasingPower => "purchasing_power_value",
            QualityMetric::Safety => "safety_value",
            QualityMetric::HealthCare => "health_care_value",
            QualityMetric::Climate => "climate_value",
            QualityMetric::CostOfLiving => "cost_of_living_value",
            QualityMetric::PropertyPriceToIncome => "property_price_to_income_value",
            QualityMetric::TrafficCommute => "traffic_commute_value",
            QualityMetric::Pollution => "pollution_value",
            QualityMetric::QualityOfLife => "quality_of_life_value",
        }
    }

    pub fn category_column(self) -> &'static str {
        match self {
            QualityMetric::PurchasingPower => "purchasing_power_category",
            QualityMetric::Safety => "safety_category",
            QualityMetric::HealthCare => "health_care_category",
            QualityMetric::Climate => "climate_category",
            QualityMetric::CostOfLiving => "cost_of_living_category",
            QualityMetric::PropertyPriceToIncome => "property_price_to_income_category",
            QualityMetric::TrafficCommute => "traffic_commute_category",
            QualityMetric::Pollution => "pollution_category",
            QualityMetric::QualityOfLife => "quality_of_life_category",
        }
    }

    /// Lowercase labels the survey export has used for this metric. Headers
    /// are `"<label> Value"` and `"<label> Category"`.
    pub fn source_labels(self) -> &'static [&'static str] {
        match self {
            QualityMetric::PurchasingPower => &["purchasing power"],
            QualityMetric::Safety => &["safety"],
            QualityMetric::HealthCare => &["health care", "healthcare"],
            QualityMetric::Climate => &["climate"],
            QualityMetric::CostOfLiving => &["costs of living", "cost of living"],
            QualityMetric::PropertyPriceToIncome => {
                &["property price to income", "property price to income ratio"]
            }
            QualityMetric::TrafficCommute => &["traffic commute time", "traffic commute"],
            QualityMetric::Pollution => &["pollution"],
            QualityMetric::QualityOfLife => &["quality of life"],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityScore {
    pub value: f64,
    pub category: String,
}

/// One score per [`QualityMetric`], indexed in `ALL` order.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityScores([QualityScore; 9]);

impl QualityScores {
    pub fn from_fn(mut f: impl FnMut(QualityMetric) -> QualityScore) -> Self {
        Self(std::array::from_fn(|idx| f(QualityMetric::ALL[idx])))
    }

    pub fn get(&self, metric: QualityMetric) -> &QualityScore {
        &self.0[metric.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (QualityMetric, &QualityScore)> {
        QualityMetric::ALL.into_iter().zip(self.0.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryRow {
    pub country_key: i32,
    pub country_name: String,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub continent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRow {
    pub time_key: i32,
    pub year_value: i32,
    pub is_historical: bool,
    pub period_type: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityOfLifeRow {
    pub country_key: i32,
    pub scores: QualityScores,
}

/// Grain: country × year.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub country_key: i32,
    pub time_key: i32,
    pub gdp_usd: f64,
    pub population: f64,
    pub gdp_per_capita: f64,
}

/// Everything one run loads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarSchema {
    pub countries: Vec<CountryRow>,
    pub times: Vec<TimeRow>,
    pub quality: Vec<QualityOfLifeRow>,
    pub facts: Vec<FactRow>,
}

/// GDP is in millions of USD; zero population yields the zero sentinel.
pub fn gdp_per_capita(gdp_usd: f64, population: f64) -> f64 {
    if population > 0.0 {
        gdp_usd * 1_000_000.0 / population
    } else {
        0.0
    }
}
