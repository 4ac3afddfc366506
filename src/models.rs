//! Normalized point model shared by the pipeline, cache and HTTP layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Maximum length of a point label, in characters.
pub const MAX_LABEL_CHARS: usize = 200;

/// Indicator category of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Emissions,
    Temperature,
    Deforestation,
    SeaLevel,
    OceanHeat,
}

/// Display intensity tier, derived from a point's magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    High,
    Medium,
    Low,
}

impl Intensity {
    /// Thresholds are inclusive on the lower bound of each tier.
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude >= 1.0 {
            Intensity::High
        } else if magnitude >= 0.01 {
            Intensity::Medium
        } else {
            Intensity::Low
        }
    }
}

/// Marker for the kind of layer a point belongs to on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    #[default]
    Threat,
}

/// The canonical output unit delivered to the map client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NormalizedPoint {
    /// Latitude in degrees, [-90, 90]
    #[serde(rename = "lat")]
    pub latitude: f64,
    /// Longitude in degrees, [-180, 180]
    #[serde(rename = "lng")]
    pub longitude: f64,
    /// Display magnitude (Gt when the raw quantity is ≥ 1e9 t, Mt otherwise)
    #[serde(rename = "value")]
    pub magnitude: f64,
    #[serde(rename = "type", default)]
    pub kind: PointKind,
    pub category: Category,
    pub intensity: Intensity,
    /// Display name, at most 200 characters
    pub label: String,
    /// Formatted summary, e.g. "power • 1,234,567 t CO2e 100yr"
    pub description: String,
    /// Provider sector tag (e.g. "oil-and-gas-production")
    pub sector: Option<String>,
}

/// Global-warming-potential horizon used to express CO2-equivalent quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GwpHorizon {
    Twenty,
    #[default]
    Hundred,
}

impl GwpHorizon {
    /// Coerce a requested horizon in years. Anything other than 20 is 100.
    pub fn from_years(years: i64) -> Self {
        match years {
            20 => GwpHorizon::Twenty,
            _ => GwpHorizon::Hundred,
        }
    }

    pub fn years(self) -> u32 {
        match self {
            GwpHorizon::Twenty => 20,
            GwpHorizon::Hundred => 100,
        }
    }

    /// Gas identifier used by the provider's emissions summaries.
    pub fn gas_key(self) -> &'static str {
        match self {
            GwpHorizon::Twenty => "co2e_20yr",
            GwpHorizon::Hundred => "co2e_100yr",
        }
    }

    pub fn other(self) -> Self {
        match self {
            GwpHorizon::Twenty => GwpHorizon::Hundred,
            GwpHorizon::Hundred => GwpHorizon::Twenty,
        }
    }
}

/// The full set of request parameters that determines a bulk result.
/// Used verbatim as the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchParameters {
    pub max_points: usize,
    pub year: Option<i32>,
    pub horizon: GwpHorizon,
}
