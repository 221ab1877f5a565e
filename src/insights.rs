//! Narrative findings built on the metrics: where win rate fell hardest,
//! which lead source underperforms and which rep carries slow losses.

use serde::Serialize;

use crate::features::{Column, EnrichedDeal};
use crate::metrics::{headline_deltas, median, segment_metrics, MetricsReport, SegmentMetrics};

/// Lost deals taking 20% longer than won deals count as friction.
pub const REP_FRICTION_DFI: f64 = 1.2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    SegmentDecline {
        column: Column,
        segment: String,
        baseline_win_rate: f64,
        recent_win_rate: f64,
    },
    LeadSourceQuality {
        lead_source: String,
        win_rate: f64,
        median_cycle: f64,
        revenue_weighted_win_rate: Option<f64>,
    },
    RepFriction {
        sales_rep_id: String,
        closed_deals: usize,
        deal_friction_index: f64,
        win_rate: Option<f64>,
    },
}

impl Finding {
    pub fn what(&self) -> String {
        match self {
            Self::SegmentDecline {
                column,
                segment,
                baseline_win_rate,
                recent_win_rate,
            } => format!(
                "Win rate dropped most in {column}={segment}: {:.1}% to {:.1}%",
                baseline_win_rate * 100.0,
                recent_win_rate * 100.0
            ),
            Self::LeadSourceQuality {
                lead_source,
                win_rate,
                median_cycle,
                ..
            } => format!(
                "Deals from {lead_source} win {:.1}% of the time and take {median_cycle:.0} days, \
                 worse than the median source on both",
                win_rate * 100.0
            ),
            Self::RepFriction {
                sales_rep_id,
                closed_deals,
                deal_friction_index,
                ..
            } => format!(
                "Rep {sales_rep_id} carries normal volume ({closed_deals} closed deals) \
                 but a deal friction index of {deal_friction_index:.2}"
            ),
        }
    }

    pub fn why_it_matters(&self) -> String {
        match self {
            Self::SegmentDecline { .. } => {
                "Recovering this segment moves overall win rate the most".to_string()
            }
            Self::LeadSourceQuality { lead_source, .. } => format!(
                "Spend on {lead_source} inflates pipeline volume without quality \
                 and absorbs selling time"
            ),
            Self::RepFriction { .. } => {
                "Activity looks healthy but lost deals drag on, which points at qualification"
                    .to_string()
            }
        }
    }

    pub fn action(&self) -> String {
        match self {
            Self::SegmentDecline { segment, .. } => format!(
                "Review pricing and competitive pressure on {segment} deals \
                 and plan targeted enablement"
            ),
            Self::LeadSourceQuality { lead_source, .. } => format!(
                "Rebalance marketing spend toward higher-intent sources \
                 and tighten MQL to SQL qualification for {lead_source} leads"
            ),
            Self::RepFriction { sales_rep_id, .. } => format!(
                "Coach {sales_rep_id} on qualification and exit discipline \
                 and review their early-stage discovery"
            ),
        }
    }
}

/// A finding with its business reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub finding: Finding,
    pub what: String,
    pub why_it_matters: String,
    pub action: String,
}

impl From<Finding> for Insight {
    fn from(finding: Finding) -> Self {
        Self {
            what: finding.what(),
            why_it_matters: finding.why_it_matters(),
            action: finding.action(),
            finding,
        }
    }
}

/// The confident segment with the largest win-rate drop, if any segment fell.
pub fn segment_decline(metrics: &MetricsReport) -> Option<Insight> {
    let worst = headline_deltas(&metrics.win_rate_delta).into_iter().next()?;
    let before = worst.baseline_win_rate?;
    let after = worst.recent_win_rate?;
    if after >= before {
        return None;
    }
    let finding = Finding::SegmentDecline {
        column: metrics.segment_column,
        segment: worst.segment.clone(),
        baseline_win_rate: before,
        recent_win_rate: after,
    };
    Some(finding.into())
}

/// A lead source below the median win rate and above the median cycle.
///
/// The lowest win rate wins when several qualify; ties go to the first name.
pub fn lead_source_quality(deals: &[EnrichedDeal], min_sample: usize) -> Option<Insight> {
    let sources = segment_metrics(deals, Column::LeadSource);
    let rated: Vec<(&SegmentMetrics, f64, f64)> = sources
        .iter()
        .filter_map(|s| Some((s, s.win_rate?, s.median_cycle?)))
        .collect();
    let mut rates: Vec<f64> = rated.iter().map(|(_, rate, _)| *rate).collect();
    let mut cycles: Vec<f64> = rated.iter().map(|(_, _, cycle)| *cycle).collect();
    let median_rate = median(&mut rates)?;
    let median_cycle = median(&mut cycles)?;

    let (source, win_rate, cycle) = rated
        .into_iter()
        .filter(|(s, rate, cycle)| {
            s.closed >= min_sample && *rate < median_rate && *cycle > median_cycle
        })
        .min_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| a.0.segment.cmp(&b.0.segment))
        })?;

    let finding = Finding::LeadSourceQuality {
        lead_source: source.segment.clone(),
        win_rate,
        median_cycle: cycle,
        revenue_weighted_win_rate: source.revenue_weighted_win_rate,
    };
    Some(finding.into())
}

/// A rep at or above median closed volume whose DFI exceeds [`REP_FRICTION_DFI`].
///
/// The highest DFI wins when several qualify; ties go to the first name.
pub fn rep_friction(deals: &[EnrichedDeal], min_sample: usize) -> Option<Insight> {
    let reps = segment_metrics(deals, Column::SalesRepId);
    let mut volumes: Vec<f64> = reps.iter().map(|r| r.closed as f64).collect();
    let median_volume = median(&mut volumes)?;

    let (rep, dfi) = reps
        .iter()
        .filter(|r| r.closed >= min_sample && r.closed as f64 >= median_volume)
        .filter_map(|r| {
            let dfi = r.deal_friction_index.filter(|dfi| *dfi > REP_FRICTION_DFI)?;
            Some((r, dfi))
        })
        .max_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| b.0.segment.cmp(&a.0.segment))
        })?;

    let finding = Finding::RepFriction {
        sales_rep_id: rep.segment.clone(),
        closed_deals: rep.closed,
        deal_friction_index: dfi,
        win_rate: rep.win_rate,
    };
    Some(finding.into())
}

/// Every insight the data supports, in a fixed order.
pub fn generate(
    deals: &[EnrichedDeal],
    metrics: &MetricsReport,
    min_sample: usize,
) -> Vec<Insight> {
    [
        segment_decline(metrics),
        lead_source_quality(deals, min_sample),
        rep_friction(deals, min_sample),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::fixtures as runs;
    use crate::features::derive_features;
    use crate::metrics;
    use crate::models::{fixtures, Deal, Outcome};

    fn deal(id: usize, won: bool, days: i64) -> Deal {
        let outcome = if won { Outcome::Won } else { Outcome::Lost };
        let mut deal = fixtures::deal(&format!("d{id}"), outcome, 10_000.0);
        deal.sales_cycle_days = Some(days);
        deal
    }

    /// `won` wins of `won_days` each, then `lost` losses of `lost_days` each.
    fn group(
        deals: &mut Vec<Deal>,
        set: impl Fn(&mut Deal),
        won: usize,
        won_days: i64,
        lost: usize,
        lost_days: i64,
    ) {
        let rows = std::iter::repeat((true, won_days))
            .take(won)
            .chain(std::iter::repeat((false, lost_days)).take(lost));
        for (is_won, days) in rows {
            let mut row = deal(deals.len(), is_won, days);
            set(&mut row);
            deals.push(row);
        }
    }

    /// Webinar wins 1 of 5 on 90-day cycles; the other sources are healthier.
    fn lead_sources() -> Vec<EnrichedDeal> {
        let mut deals = Vec::new();
        let source = |name: &'static str| move |d: &mut Deal| d.lead_source = name.to_string();
        group(&mut deals, source("Inbound"), 4, 20, 1, 30);
        group(&mut deals, source("Partner"), 3, 40, 2, 40);
        group(&mut deals, source("Webinar"), 1, 90, 4, 90);
        derive_features(&deals)
    }

    /// rep_a has slow losses, rep_b does not, rep_c has too few deals to count.
    fn reps() -> Vec<EnrichedDeal> {
        let mut deals = Vec::new();
        let rep = |name: &'static str| move |d: &mut Deal| d.sales_rep_id = name.to_string();
        group(&mut deals, rep("rep_a"), 3, 30, 3, 60);
        group(&mut deals, rep("rep_b"), 3, 30, 3, 30);
        group(&mut deals, rep("rep_c"), 1, 10, 1, 40);
        derive_features(&deals)
    }

    #[test]
    fn worst_declining_segment_is_reported() {
        let mut config = runs::config();
        config.thresholds.segment_column = Column::Region;
        let deals = derive_features(&runs::declining_apac());
        let report = metrics::compute(&deals, &config);

        let insight = segment_decline(&report).expect("APAC fell");
        assert_eq!(insight.what, "Win rate dropped most in region=APAC: 40.0% to 10.0%");
        match insight.finding {
            Finding::SegmentDecline { segment, .. } => assert_eq!(segment, "APAC"),
            other => panic!("unexpected finding {other:?}"),
        }
        assert!(insight.action.contains("APAC deals"));
    }

    #[test]
    fn no_decline_without_confident_segments() {
        let report = metrics::compute(&[], &runs::config());
        assert_eq!(segment_decline(&report), None);
    }

    #[test]
    fn slow_low_converting_lead_source_is_flagged() {
        let insight = lead_source_quality(&lead_sources(), 5)
            .expect("webinar qualifies");
        match &insight.finding {
            Finding::LeadSourceQuality {
                lead_source,
                win_rate,
                median_cycle,
                ..
            } => {
                assert_eq!(lead_source, "Webinar");
                assert!((win_rate - 0.2).abs() < 1e-12);
                assert_eq!(*median_cycle, 90.0);
            }
            other => panic!("unexpected finding {other:?}"),
        }
        assert!(insight.what.starts_with("Deals from Webinar win 20.0%"));
        assert!(insight.action.contains("Webinar leads"));
    }

    #[test]
    fn lead_sources_below_the_sample_floor_are_ignored() {
        assert_eq!(lead_source_quality(&lead_sources(), 6), None);
    }

    #[test]
    fn high_volume_rep_with_slow_losses_is_flagged() {
        let insight = rep_friction(&reps(), 1).expect("rep_a qualifies");
        match &insight.finding {
            Finding::RepFriction {
                sales_rep_id,
                closed_deals,
                deal_friction_index,
                ..
            } => {
                assert_eq!(sales_rep_id, "rep_a");
                assert_eq!(*closed_deals, 6);
                assert!((deal_friction_index - 2.0).abs() < 1e-12);
            }
            other => panic!("unexpected finding {other:?}"),
        }
        assert!(insight.why_it_matters.contains("qualification"));
    }

    #[test]
    fn reps_without_friction_produce_no_insight() {
        let deals: Vec<EnrichedDeal> = reps()
            .into_iter()
            .filter(|d| d.deal.sales_rep_id != "rep_a")
            .collect();
        assert_eq!(rep_friction(&deals, 1), None);
    }

    #[test]
    fn generate_keeps_a_fixed_order() {
        let mut deals = lead_sources();
        deals.extend(reps());
        let report = metrics::compute(&deals, &EngineConfig::default());
        let kinds: Vec<&str> = generate(&deals, &report, 1)
            .iter()
            .map(|insight| match insight.finding {
                Finding::SegmentDecline { .. } => "segment",
                Finding::LeadSourceQuality { .. } => "lead_source",
                Finding::RepFriction { .. } => "rep",
            })
            .collect();
        assert_eq!(kinds, vec!["lead_source", "rep"]);
    }

    #[test]
    fn insights_serialise_with_their_kind() {
        let insight = rep_friction(&reps(), 1).expect("rep_a qualifies");
        let json = serde_json::to_value(&insight).expect("serialise");
        assert_eq!(json["finding"]["kind"], "rep_friction");
        assert_eq!(json["finding"]["sales_rep_id"], "rep_a");
    }
}
