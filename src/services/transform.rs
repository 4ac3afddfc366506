//! Maps raw Climate TRACE asset records to normalized map points.

use serde::{Deserialize, Deserializer};

use crate::helpers::{format_thousands, scale_quantity, truncate_chars};
use crate::models::{
    Category, GwpHorizon, Intensity, NormalizedPoint, PointKind, MAX_LABEL_CHARS,
};

/// Why a single record was discarded.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record does not match the asset shape: {0}")]
    Malformed(String),

    #[error("record has no usable centroid geometry")]
    MissingGeometry,

    #[error("centroid out of range: lat={lat}, lng={lng}")]
    CoordinatesOutOfRange { lat: f64, lng: f64 },
}

// --- Climate TRACE asset JSON types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TraceAsset {
    name: Option<String>,
    sector: Option<String>,
    centroid: Option<TraceCentroid>,
    emissions_summary: Option<Vec<TraceEmissionsSummary>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TraceCentroid {
    geometry: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TraceEmissionsSummary {
    gas: Option<String>,
    #[serde(default, deserialize_with = "lenient_quantity")]
    emissions_quantity: Option<f64>,
}

/// The provider occasionally sends quantities as numeric strings.
fn lenient_quantity<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid emissions quantity '{}'", s))),
    }
}

/// Converts raw asset records into [`NormalizedPoint`]s for one GWP horizon.
#[derive(Debug, Clone, Copy)]
pub struct RecordTransformer {
    horizon: GwpHorizon,
}

impl RecordTransformer {
    pub fn new(horizon: GwpHorizon) -> Self {
        Self { horizon }
    }

    /// Transform one raw record, or report why it must be discarded.
    pub fn transform(&self, raw: &serde_json::Value) -> Result<NormalizedPoint, RecordError> {
        let asset = TraceAsset::deserialize(raw).map_err(|e| RecordError::Malformed(e.to_string()))?;

        let (lng, lat) = match asset
            .centroid
            .as_ref()
            .and_then(|c| c.geometry.as_deref())
        {
            Some([lng, lat, ..]) => (*lng, *lat),
            _ => return Err(RecordError::MissingGeometry),
        };
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(RecordError::CoordinatesOutOfRange { lat, lng });
        }

        let quantity = self.emissions_quantity(&asset);
        let magnitude = scale_quantity(quantity);

        let sector = asset
            .sector
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("other");
        let sector_display = sector.replace(['-', '_'], " ");

        let name = asset.name.as_deref().unwrap_or("Asset").trim();
        let label = if name.is_empty() {
            format!("Source ({})", sector_display)
        } else {
            name.to_string()
        };

        Ok(NormalizedPoint {
            latitude: lat,
            longitude: lng,
            magnitude,
            kind: PointKind::Threat,
            category: Category::Emissions,
            intensity: Intensity::from_magnitude(magnitude),
            label: truncate_chars(&label, MAX_LABEL_CHARS),
            description: format!(
                "{} • {} t CO2e {}yr",
                sector_display,
                format_thousands(quantity),
                self.horizon.years()
            ),
            sector: Some(sector.to_string()),
        })
    }

    /// CO2e quantity in tonnes for the requested horizon, falling back to
    /// the other horizon, then to zero.
    fn emissions_quantity(&self, asset: &TraceAsset) -> f64 {
        let summaries = asset.emissions_summary.as_deref().unwrap_or(&[]);
        let find = |horizon: GwpHorizon| {
            summaries
                .iter()
                .find(|s| s.gas.as_deref() == Some(horizon.gas_key()))
                .map(|s| s.emissions_quantity.unwrap_or(0.0))
        };

        find(self.horizon)
            .or_else(|| find(self.horizon.other()))
            .unwrap_or(0.0)
    }
}
