use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PeriodConfig;
use crate::error::EngineError;
use crate::features::{EnrichedDeal, Quarter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodName {
    Baseline,
    Recent,
}

impl PeriodName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Recent => "recent",
        }
    }
}

impl fmt::Display for PeriodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of creation quarters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub name: PeriodName,
    pub first: Quarter,
    pub last: Quarter,
}

impl Period {
    pub fn contains(&self, quarter: Quarter) -> bool {
        quarter >= self.first && quarter <= self.last
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.first.first_day()
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.last.last_day()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{} ({})", self.name, self.first)
        } else {
            write!(f, "{} ({}..{})", self.name, self.first, self.last)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSlice {
    pub period: Period,
    pub deals: Vec<EnrichedDeal>,
}

impl PeriodSlice {
    pub fn closed(&self) -> impl Iterator<Item = &EnrichedDeal> {
        self.deals.iter().filter(|d| d.deal.is_closed())
    }

    pub fn closed_count(&self) -> usize {
        self.closed().count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSplit {
    pub baseline: PeriodSlice,
    pub recent: PeriodSlice,
    /// Rows outside both windows or without a creation date.
    pub excluded: usize,
}

/// Quarter windows for both periods: recent ends at the reference quarter,
/// baseline ends right before recent starts.
pub fn windows(config: &PeriodConfig, reference_end: NaiveDate) -> (Period, Period) {
    let end = Quarter::from_date(reference_end);
    let recent_first = end.offset(-(config.recent_quarters.max(1) as i64 - 1));
    let baseline_last = recent_first.offset(-1);
    let baseline_first = baseline_last.offset(-(config.baseline_quarters.max(1) as i64 - 1));
    (
        Period {
            name: PeriodName::Baseline,
            first: baseline_first,
            last: baseline_last,
        },
        Period {
            name: PeriodName::Recent,
            first: recent_first,
            last: end,
        },
    )
}

/// Assign every deal to at most one period without any size checks.
///
/// Returns `None` when no deal has a creation date and no reference end is configured.
pub fn partition(deals: &[EnrichedDeal], config: &PeriodConfig) -> Option<PeriodSplit> {
    let reference_end = config
        .reference_end
        .or_else(|| deals.iter().filter_map(|d| d.deal.created_date).max())?;
    let (baseline_period, recent_period) = windows(config, reference_end);

    let mut baseline = Vec::new();
    let mut recent = Vec::new();
    let mut excluded = 0usize;
    for deal in deals {
        match deal.created_quarter {
            Some(q) if recent_period.contains(q) => recent.push(deal.clone()),
            Some(q) if baseline_period.contains(q) => baseline.push(deal.clone()),
            _ => excluded += 1,
        }
    }

    Some(PeriodSplit {
        baseline: PeriodSlice {
            period: baseline_period,
            deals: baseline,
        },
        recent: PeriodSlice {
            period: recent_period,
            deals: recent,
        },
        excluded,
    })
}

/// Partition and require `min_closed_deals` closed deals in each period.
pub fn split(deals: &[EnrichedDeal], config: &PeriodConfig) -> Result<PeriodSplit, EngineError> {
    let split = partition(deals, config).ok_or_else(|| EngineError::DataInsufficient {
        scope: "deal table (no creation dates)".to_string(),
        found: 0,
        required: config.min_closed_deals,
    })?;

    let baseline_closed = split.baseline.closed_count();
    let recent_closed = split.recent.closed_count();
    debug!(
        event_name = "period.split",
        baseline = %split.baseline.period,
        recent = %split.recent.period,
        baseline_closed,
        recent_closed,
        excluded = split.excluded,
        "partitioned deals into periods"
    );

    let required = config.min_closed_deals;
    if baseline_closed < required {
        return Err(EngineError::insufficient(PeriodName::Baseline, baseline_closed, required));
    }
    if recent_closed < required {
        return Err(EngineError::insufficient(PeriodName::Recent, recent_closed, required));
    }
    Ok(split)
}
