//! Shared feature encoding for the baseline and recent fits.
//!
//! The encoding is fit once on the union of both periods and then injected
//! into both model fits, so the two coefficient vectors always describe the
//! same feature space.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::features::{Column, ColumnKind, EnrichedDeal};

/// One numeric input column of the design matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedFeature {
    /// `column=level` for one-hot levels, the column name for numeric columns.
    pub name: String,
    pub column: Column,
    pub level: Option<String>,
    pub mean: f64,
    /// Standard deviation used for scaling; 1.0 when the raw value never varies.
    pub scale: f64,
}

impl EncodedFeature {
    fn raw_value(&self, deal: &EnrichedDeal) -> f64 {
        match &self.level {
            Some(level) => {
                if deal.category(self.column) == *level {
                    1.0
                } else {
                    0.0
                }
            }
            // Missing numeric values are imputed with the mean.
            None => deal.numeric(self.column).unwrap_or(self.mean),
        }
    }

    pub fn value(&self, deal: &EnrichedDeal) -> f64 {
        (self.raw_value(deal) - self.mean) / self.scale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoding {
    pub drivers: Vec<Column>,
    pub features: Vec<EncodedFeature>,
}

impl FeatureEncoding {
    /// Fit levels and scaling on `deals`, usually both periods' closed deals together.
    pub fn fit<'a, I>(drivers: &[Column], deals: I) -> Self
    where
        I: IntoIterator<Item = &'a EnrichedDeal>,
    {
        let rows: Vec<&EnrichedDeal> = deals.into_iter().collect();
        let mut features = Vec::new();

        for &column in drivers {
            match column.kind() {
                ColumnKind::Categorical => {
                    let levels: BTreeSet<String> =
                        rows.iter().map(|d| d.category(column)).collect();
                    for level in levels {
                        let mut feature = EncodedFeature {
                            name: format!("{}={}", column.name(), level),
                            column,
                            level: Some(level),
                            mean: 0.0,
                            scale: 1.0,
                        };
                        let raw: Vec<f64> = rows.iter().map(|d| feature.raw_value(d)).collect();
                        (feature.mean, feature.scale) = moments(&raw);
                        features.push(feature);
                    }
                }
                ColumnKind::Numeric => {
                    let observed: Vec<f64> =
                        rows.iter().filter_map(|d| d.numeric(column)).collect();
                    let (mean, scale) = moments(&observed);
                    features.push(EncodedFeature {
                        name: column.name().to_string(),
                        column,
                        level: None,
                        mean,
                        scale,
                    });
                }
            }
        }

        Self {
            drivers: drivers.to_vec(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    /// Indices of the encoded features that belong to `driver`.
    pub fn indices_for(&self, driver: Column) -> Vec<usize> {
        self.features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.column == driver)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn encode(&self, deal: &EnrichedDeal) -> Vec<f64> {
        self.features.iter().map(|f| f.value(deal)).collect()
    }

    /// Same drivers and the same feature names in the same order.
    pub fn is_compatible_with(&self, other: &FeatureEncoding) -> bool {
        self.drivers == other.drivers && self.feature_names().eq(other.feature_names())
    }
}

/// Population mean and standard deviation, with the deviation floored to 1.0 when zero.
fn moments(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    (mean, if std > 1e-12 { std } else { 1.0 })
}
