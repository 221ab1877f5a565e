use std::fmt;

use serde::{Deserialize, Serialize};

use crate::features::{Column, ColumnKind, EnrichedDeal};
use crate::fitter::DriverModel;
use crate::metrics::{self, headline_deltas};
use crate::period::PeriodSplit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Worsening,
    Improving,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worsening => "worsening",
            Self::Improving => "improving",
            Self::Stable => "stable",
        }
    }

    /// Classify a recent-minus-baseline coefficient change against a symmetric band.
    pub fn classify(change: f64, tolerance: f64) -> Self {
        if change < -tolerance {
            Self::Worsening
        } else if change > tolerance {
            Self::Improving
        } else {
            Self::Stable
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// Encoded feature the trend was read from.
    pub feature: String,
    pub baseline_coefficient: f64,
    pub recent_coefficient: f64,
    /// Recent minus baseline.
    pub change: f64,
    pub direction: TrendDirection,
}

/// Fraction of the recent period's closed ACV whose `driver` value is known.
///
/// Numeric drivers are always populated and report 1.0. `None` when the
/// period has no ACV at all.
pub fn revenue_exposure<'a, I>(recent_closed: I, driver: Column) -> Option<f64>
where
    I: IntoIterator<Item = &'a EnrichedDeal>,
{
    if driver.kind() == ColumnKind::Numeric {
        return Some(1.0);
    }
    let mut known = 0.0;
    let mut total = 0.0;
    for deal in recent_closed {
        let acv = deal.acv();
        if deal.is_known(driver) {
            known += acv;
        }
        total += acv;
    }
    if total > 0.0 {
        Some(known / total)
    } else {
        None
    }
}

/// Index of the encoded feature of `driver` with the largest absolute coefficient.
///
/// Ties keep the first feature in encoding order.
pub fn dominant_feature(model: &DriverModel, driver: Column) -> Option<usize> {
    let magnitude = |index: usize| model.coefficients[index].value.abs();
    model
        .encoding
        .indices_for(driver)
        .into_iter()
        .fold(None, |best, index| match best {
            Some(current) if magnitude(current) >= magnitude(index) => Some(current),
            _ => Some(index),
        })
}

/// Coefficient trend of the driver's dominant recent feature.
///
/// Both models must share one encoding (see [`crate::fitter::ensure_comparable`]).
pub fn coefficient_trend(
    baseline: &DriverModel,
    recent: &DriverModel,
    driver: Column,
    tolerance: f64,
) -> Option<Trend> {
    let index = dominant_feature(recent, driver)?;
    let before = baseline.coefficients.get(index)?;
    let after = &recent.coefficients[index];
    let change = after.value - before.value;
    Some(Trend {
        feature: after.feature.clone(),
        baseline_coefficient: before.value,
        recent_coefficient: after.value,
        change,
        direction: TrendDirection::classify(change, tolerance),
    })
}

/// Mean win-rate delta across the driver's confident segments.
pub fn segment_win_rate_shift(
    split: &PeriodSplit,
    driver: Column,
    min_sample: usize,
) -> Option<f64> {
    if driver.kind() != ColumnKind::Categorical {
        return None;
    }
    let deltas = metrics::win_rate_delta_by_segment(split, driver, min_sample);
    let confident: Vec<f64> = headline_deltas(&deltas)
        .iter()
        .filter_map(|d| d.delta)
        .collect();
    if confident.is_empty() {
        None
    } else {
        Some(confident.iter().sum::<f64>() / confident.len() as f64)
    }
}
