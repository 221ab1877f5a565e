use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::features::{Column, EnrichedDeal};
use crate::period::{self, PeriodSplit};

/// Closed-deal tallies for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Tally {
    won: usize,
    lost: usize,
}

impl Tally {
    fn add(&mut self, deal: &EnrichedDeal) {
        if deal.deal.is_won() {
            self.won += 1;
        } else if deal.deal.is_lost() {
            self.lost += 1;
        }
    }

    fn closed(&self) -> usize {
        self.won + self.lost
    }

    fn win_rate(&self) -> Option<f64> {
        match self.closed() {
            0 => None,
            n => Some(self.won as f64 / n as f64),
        }
    }
}

fn tally_by<'a>(
    deals: impl IntoIterator<Item = &'a EnrichedDeal>,
    column: Column,
) -> BTreeMap<String, Tally> {
    let mut groups: BTreeMap<String, Tally> = BTreeMap::new();
    for deal in deals.into_iter().filter(|d| d.deal.is_closed()) {
        groups.entry(deal.category(column)).or_default().add(deal);
    }
    groups
}

/// Running totals over closed deals, enough to derive every per-group metric.
#[derive(Debug, Clone, Default)]
struct Totals {
    tally: Tally,
    won_acv: f64,
    closed_acv: f64,
    won_cycles: Vec<f64>,
    lost_cycles: Vec<f64>,
}

impl Totals {
    fn of<'a>(deals: impl IntoIterator<Item = &'a EnrichedDeal>) -> Self {
        let mut totals = Self::default();
        for deal in deals {
            totals.add(deal);
        }
        totals
    }

    fn add(&mut self, deal: &EnrichedDeal) {
        if !deal.deal.is_closed() {
            return;
        }
        self.tally.add(deal);
        let acv = deal.acv();
        self.closed_acv += acv;
        let cycle = deal.cycle_days.filter(|c| *c >= 0).map(|c| c as f64);
        if deal.deal.is_won() {
            self.won_acv += acv;
            self.won_cycles.extend(cycle);
        } else {
            self.lost_cycles.extend(cycle);
        }
    }

    fn revenue_weighted_win_rate(&self) -> Option<f64> {
        if self.closed_acv > 0.0 {
            Some(self.won_acv / self.closed_acv)
        } else {
            None
        }
    }

    fn median_cycle(&self, won: bool) -> Option<f64> {
        let cycles = if won { &self.won_cycles } else { &self.lost_cycles };
        median(&mut cycles.clone())
    }

    fn deal_friction_index(&self) -> Option<f64> {
        let lost = self.median_cycle(false)?;
        let won = self.median_cycle(true)?;
        if won > 0.0 {
            Some(lost / won)
        } else {
            None
        }
    }

    fn overall_median_cycle(&self) -> Option<f64> {
        let mut cycles: Vec<f64> = self
            .won_cycles
            .iter()
            .chain(&self.lost_cycles)
            .copied()
            .collect();
        median(&mut cycles)
    }
}

/// Count-based win rate over closed deals.
pub fn win_rate(deals: &[EnrichedDeal]) -> Option<f64> {
    Totals::of(deals).tally.win_rate()
}

/// Revenue-weighted win rate: won ACV over closed ACV.
pub fn revenue_weighted_win_rate(deals: &[EnrichedDeal]) -> Option<f64> {
    Totals::of(deals).revenue_weighted_win_rate()
}

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

pub fn median_cycle(deals: &[EnrichedDeal], won: bool) -> Option<f64> {
    Totals::of(deals).median_cycle(won)
}

/// Deal friction index: median lost cycle over median won cycle.
pub fn deal_friction_index(deals: &[EnrichedDeal]) -> Option<f64> {
    Totals::of(deals).deal_friction_index()
}

/// Win rate, RWWR and DFI for one group of a column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentMetrics {
    pub segment: String,
    pub closed: usize,
    pub win_rate: Option<f64>,
    pub revenue_weighted_win_rate: Option<f64>,
    pub deal_friction_index: Option<f64>,
    /// Median cycle over won and lost deals together.
    pub median_cycle: Option<f64>,
}

/// Per-group metrics over closed deals, sorted by segment name.
pub fn segment_metrics(deals: &[EnrichedDeal], column: Column) -> Vec<SegmentMetrics> {
    let mut groups: BTreeMap<String, Totals> = BTreeMap::new();
    for deal in deals.iter().filter(|d| d.deal.is_closed()) {
        groups.entry(deal.category(column)).or_default().add(deal);
    }
    groups
        .into_iter()
        .map(|(segment, totals)| SegmentMetrics {
            closed: totals.tally.closed(),
            win_rate: totals.tally.win_rate(),
            revenue_weighted_win_rate: totals.revenue_weighted_win_rate(),
            deal_friction_index: totals.deal_friction_index(),
            median_cycle: totals.overall_median_cycle(),
            segment,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentDelta {
    pub segment: String,
    pub baseline_win_rate: Option<f64>,
    pub recent_win_rate: Option<f64>,
    /// Recent minus baseline; `None` when either side has no closed deals.
    pub delta: Option<f64>,
    pub baseline_closed: usize,
    pub recent_closed: usize,
    pub low_confidence: bool,
}

/// Win rate delta per group of `column`, sorted by segment name.
pub fn win_rate_delta_by_segment(
    split: &PeriodSplit,
    column: Column,
    min_sample: usize,
) -> Vec<SegmentDelta> {
    let baseline = tally_by(&split.baseline.deals, column);
    let recent = tally_by(&split.recent.deals, column);

    let mut segments: Vec<&String> = baseline.keys().chain(recent.keys()).collect();
    segments.sort();
    segments.dedup();

    segments
        .into_iter()
        .map(|segment| {
            let b = baseline.get(segment).copied().unwrap_or_default();
            let r = recent.get(segment).copied().unwrap_or_default();
            let delta = match (b.win_rate(), r.win_rate()) {
                (Some(before), Some(after)) => Some(after - before),
                _ => None,
            };
            SegmentDelta {
                segment: segment.clone(),
                baseline_win_rate: b.win_rate(),
                recent_win_rate: r.win_rate(),
                delta,
                baseline_closed: b.closed(),
                recent_closed: r.closed(),
                low_confidence: b.closed() < min_sample || r.closed() < min_sample,
            }
        })
        .collect()
}

/// Confident segments only, worst decline first.
pub fn headline_deltas(deltas: &[SegmentDelta]) -> Vec<&SegmentDelta> {
    let mut headline: Vec<&SegmentDelta> = deltas
        .iter()
        .filter(|d| !d.low_confidence && d.delta.is_some())
        .collect();
    headline.sort_by(|a, b| {
        a.delta
            .unwrap_or(0.0)
            .total_cmp(&b.delta.unwrap_or(0.0))
            .then_with(|| a.segment.cmp(&b.segment))
    });
    headline
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossConcentration {
    pub top_segments: Vec<String>,
    /// Share of all losses in `top_segments`; `None` when nothing was lost.
    pub ratio: Option<f64>,
    /// Every segment's share of losses, largest first.
    pub segment_loss_share: Vec<(String, f64)>,
}

pub fn loss_concentration_ratio(
    deals: &[EnrichedDeal],
    column: Column,
    top_n: usize,
) -> LossConcentration {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for deal in deals.iter().filter(|d| d.deal.is_lost()) {
        *counts.entry(deal.category(column)).or_default() += 1;
    }
    let total: usize = counts.values().sum();

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    if total == 0 {
        return LossConcentration {
            top_segments: Vec::new(),
            ratio: None,
            segment_loss_share: Vec::new(),
        };
    }

    let top: Vec<&(String, usize)> = ranked.iter().take(top_n).collect();
    let top_losses: usize = top.iter().map(|(_, c)| c).sum();
    let share = |count: usize| count as f64 / total as f64;
    LossConcentration {
        top_segments: top.iter().map(|(s, _)| s.clone()).collect(),
        ratio: Some(share(top_losses)),
        segment_loss_share: ranked.iter().map(|(s, c)| (s.clone(), share(*c))).collect(),
    }
}

/// Population standard deviation of per-rep win rate over reps with enough closed deals.
pub fn sales_rep_win_rate_variance(deals: &[EnrichedDeal], min_sample: usize) -> Option<f64> {
    let rates: Vec<f64> = tally_by(deals, Column::SalesRepId)
        .values()
        .filter(|t| t.closed() >= min_sample.max(1))
        .filter_map(Tally::win_rate)
        .collect();
    if rates.len() < 2 {
        return None;
    }
    let n = rates.len() as f64;
    let mean = rates.iter().sum::<f64>() / n;
    let variance = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

/// Reading of the rep win-rate spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepVarianceBand {
    /// Spread above 15 points.
    Process,
    Mixed,
    /// Spread below 10 points.
    Coaching,
}

impl RepVarianceBand {
    pub const PROCESS_ABOVE: f64 = 0.15;
    pub const COACHING_BELOW: f64 = 0.10;

    pub fn classify(std_dev: f64) -> Self {
        if std_dev > Self::PROCESS_ABOVE {
            Self::Process
        } else if std_dev < Self::COACHING_BELOW {
            Self::Coaching
        } else {
            Self::Mixed
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Process => "high variance: a process problem, not just people",
            Self::Mixed => "moderate variance: a mix of process and individual factors",
            Self::Coaching => "low variance: consistent process, individual coaching needed",
        }
    }
}

impl fmt::Display for RepVarianceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub total_deals: usize,
    pub closed_deals: usize,
    pub open_deals: usize,
    pub win_rate: Option<f64>,
    pub revenue_weighted_win_rate: Option<f64>,
    pub deal_friction_index: Option<f64>,
    pub segment_column: Column,
    pub win_rate_delta: Vec<SegmentDelta>,
    /// Win rate, RWWR and DFI per group of the segment column.
    pub segment_breakdown: Vec<SegmentMetrics>,
    pub loss_concentration: LossConcentration,
    pub rep_win_rate_std_dev: Option<f64>,
    pub rep_variance_band: Option<RepVarianceBand>,
}

/// All five metrics over one deal table. Each is computed independently.
pub fn compute(deals: &[EnrichedDeal], config: &EngineConfig) -> MetricsReport {
    let thresholds = &config.thresholds;
    let column = thresholds.segment_column;
    let win_rate_delta = period::partition(deals, &config.periods)
        .map(|split| win_rate_delta_by_segment(&split, column, thresholds.min_segment_deals))
        .unwrap_or_default();
    let totals = Totals::of(deals);
    let rep_win_rate_std_dev = sales_rep_win_rate_variance(deals, thresholds.min_segment_deals);

    MetricsReport {
        total_deals: deals.len(),
        closed_deals: totals.tally.closed(),
        open_deals: deals.iter().filter(|d| d.deal.is_open()).count(),
        win_rate: totals.tally.win_rate(),
        revenue_weighted_win_rate: totals.revenue_weighted_win_rate(),
        deal_friction_index: totals.deal_friction_index(),
        segment_column: column,
        win_rate_delta,
        segment_breakdown: segment_metrics(deals, column),
        loss_concentration: loss_concentration_ratio(
            deals,
            column,
            thresholds.loss_concentration_top_n,
        ),
        rep_win_rate_std_dev,
        rep_variance_band: rep_win_rate_std_dev.map(RepVarianceBand::classify),
    }
}
