use std::fmt::Write;

use crate::engine::DriverAnalysis;
use crate::insights::Insight;
use crate::metrics::{headline_deltas, MetricsReport};
use crate::ranker::DriverScore;
use crate::risk::{self, OpenDealRisk};

fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v * 100.0),
        None => "n/a".to_string(),
    }
}

fn points(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:+.1} pts", v * 100.0),
        None => "n/a".to_string(),
    }
}

fn ratio(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Plain-text block of the headline metrics, shared by the CLI and the report.
pub fn metrics_summary(metrics: &MetricsReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "- Deals: {} ({} closed, {} open)",
        metrics.total_deals, metrics.closed_deals, metrics.open_deals
    );
    let _ = writeln!(output, "- Win rate: {}", percent(metrics.win_rate));
    let _ = writeln!(
        output,
        "- Revenue-weighted win rate: {}",
        percent(metrics.revenue_weighted_win_rate)
    );
    let _ = writeln!(
        output,
        "- Deal friction index: {}",
        ratio(metrics.deal_friction_index)
    );
    let concentration = &metrics.loss_concentration;
    let _ = writeln!(
        output,
        "- Loss concentration ({}): {} of losses in {}",
        metrics.segment_column,
        percent(concentration.ratio),
        if concentration.top_segments.is_empty() {
            "no segments".to_string()
        } else {
            concentration.top_segments.join(", ")
        }
    );
    let _ = writeln!(
        output,
        "- Sales rep win rate std dev: {}",
        match (metrics.rep_win_rate_std_dev, metrics.rep_variance_band) {
            (Some(v), Some(band)) => format!("{:.1} pts ({band})", v * 100.0),
            (Some(v), None) => format!("{:.1} pts", v * 100.0),
            (None, _) => "n/a".to_string(),
        }
    );
    output
}

/// Per-segment table of win rate, RWWR and DFI.
pub fn segment_summary(metrics: &MetricsReport) -> String {
    let mut output = String::new();
    for segment in &metrics.segment_breakdown {
        let _ = writeln!(
            output,
            "- {}: {} closed, win rate {}, RWWR {}, DFI {}",
            segment.segment,
            segment.closed,
            percent(segment.win_rate),
            percent(segment.revenue_weighted_win_rate),
            ratio(segment.deal_friction_index)
        );
    }
    output
}

/// Numbered insights with their reading and recommended action.
pub fn insights_summary(insights: &[Insight]) -> String {
    let mut output = String::new();
    for (index, insight) in insights.iter().enumerate() {
        let _ = writeln!(output, "{}. **What:** {}", index + 1, insight.what);
        let _ = writeln!(output, "   - Why it matters: {}", insight.why_it_matters);
        let _ = writeln!(output, "   - Recommended action: {}", insight.action);
    }
    output
}

fn write_driver(output: &mut String, rank: usize, score: &DriverScore) {
    let _ = writeln!(
        output,
        "{}. **{}** {} `{}` {:+.3} ({}), WRDS {:.3}",
        rank,
        score.driver,
        score.impact.arrow,
        score.impact.feature,
        score.impact.coefficient,
        score.impact.interpretation,
        score.wrds
    );
    let _ = writeln!(
        output,
        "   - Exposure {}, trend {} ({:+.3}, x{:.2})",
        percent(Some(score.revenue_exposure)),
        score.trend.direction,
        score.trend.change,
        score.trend_multiplier
    );
    if let Some(shift) = score.segment_win_rate_shift {
        let _ = writeln!(output, "   - Segment win rate shift: {}", points(Some(shift)));
    }
    if score.is_flagged() {
        let _ = writeln!(output, "   - Unstable: {}", score.unstable.join("; "));
    }
    let _ = writeln!(output, "   - Likely issues: {}", score.likely_issues.join(", "));
    let _ = writeln!(
        output,
        "   - Suggested actions: {}",
        score.suggested_actions.join(", ")
    );
}

pub fn build_report(analysis: &DriverAnalysis, top_n: usize, risks: &[OpenDealRisk]) -> String {
    let mut output = String::new();
    let segment_column = analysis.metrics.segment_column;

    let _ = writeln!(output, "# Win Rate Driver Report");
    let _ = writeln!(
        output,
        "Run {} generated {} comparing {} ({} closed) with {} ({} closed)",
        analysis.run_id,
        analysis.generated_at.format("%Y-%m-%d %H:%M UTC"),
        analysis.baseline_period,
        analysis.baseline_closed,
        analysis.recent_period,
        analysis.recent_closed
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Headline Metrics");
    output.push_str(&metrics_summary(&analysis.metrics));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Insights");
    if analysis.insights.is_empty() {
        let _ = writeln!(output, "No segment, lead source or rep stands out.");
    } else {
        output.push_str(&insights_summary(&analysis.insights));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Win Rate Change by {segment_column}");
    let headline = headline_deltas(&analysis.metrics.win_rate_delta);
    if headline.is_empty() {
        let _ = writeln!(output, "No segment has enough closed deals in both periods.");
    } else {
        for delta in headline {
            let _ = writeln!(
                output,
                "- {}: {} -> {} ({})",
                delta.segment,
                percent(delta.baseline_win_rate),
                percent(delta.recent_win_rate),
                points(delta.delta)
            );
        }
    }

    if !analysis.metrics.segment_breakdown.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Segment Breakdown by {segment_column}");
        output.push_str(&segment_summary(&analysis.metrics));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Drivers Hurting Win Rate");
    if analysis.ranking.negative.is_empty() {
        let _ = writeln!(output, "No negative drivers detected.");
    } else {
        for (index, score) in analysis.ranking.negative.iter().take(top_n).enumerate() {
            write_driver(&mut output, index + 1, score);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Drivers Helping Win Rate");
    if analysis.ranking.positive.is_empty() {
        let _ = writeln!(output, "No positive drivers detected.");
    } else {
        for (index, score) in analysis.ranking.positive.iter().take(top_n).enumerate() {
            write_driver(&mut output, index + 1, score);
        }
    }

    let changed = analysis.changed_drivers();
    let _ = writeln!(output);
    let _ = writeln!(output, "## What Changed");
    if changed.is_empty() {
        let _ = writeln!(output, "All driver coefficients are stable between periods.");
    } else {
        for score in changed {
            let _ = writeln!(
                output,
                "- {} `{}`: {:+.3} -> {:+.3} ({})",
                score.driver,
                score.trend.feature,
                score.trend.baseline_coefficient,
                score.trend.recent_coefficient,
                score.trend.direction
            );
        }
    }

    if !analysis.ranking.unscored.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Unscored Drivers");
        for unscored in &analysis.ranking.unscored {
            let _ = writeln!(output, "- {}: {}", unscored.driver, unscored.reason);
        }
    }

    if !risks.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Open Deals at Risk");
        let _ = writeln!(
            output,
            "{} open deals, ${:.0} expected ACV at risk",
            risks.len(),
            risk::total_revenue_at_risk(risks)
        );
        for deal in risks.iter().take(top_n) {
            let _ = writeln!(
                output,
                "- {} ({}): ${:.0} at {} win probability, ${:.0} at risk",
                deal.deal_id,
                deal.sales_rep_id,
                deal.amount,
                percent(Some(deal.win_probability)),
                deal.revenue_at_risk
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Warnings");
    if analysis.warnings.is_empty() {
        let _ = writeln!(output, "None.");
    } else {
        for warning in &analysis.warnings {
            let _ = writeln!(output, "- {warning}");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures;
    use crate::features::Column;
    use crate::insights::Finding;
    use crate::metrics::RepVarianceBand;

    #[test]
    fn report_lists_drivers_and_actions() {
        let analysis = fixtures::analysis();
        let report = build_report(&analysis, 5, &[]);
        assert!(report.starts_with("# Win Rate Driver Report"));
        assert!(report.contains("## Drivers Hurting Win Rate"));
        assert!(report.contains("**region** ↓ `region=APAC`"));
        assert!(report.contains("Local market analysis"));
        assert!(report.contains("## What Changed"));
        assert!(report.contains("industry: `industry=SaaS` is unusable in the recent period"));
        assert!(report.contains("## Segment Breakdown by acv_bucket"));
        assert!(!report.contains("## Open Deals at Risk"));
    }

    #[test]
    fn undefined_metrics_render_as_not_available() {
        let analysis = fixtures::analysis();
        let mut metrics = analysis.metrics.clone();
        metrics.deal_friction_index = None;
        metrics.loss_concentration.ratio = None;
        metrics.rep_win_rate_std_dev = None;
        let summary = metrics_summary(&metrics);
        assert!(summary.contains("Deal friction index: n/a"));
        assert!(summary.contains("- Win rate: 45.0%"));
        assert!(summary.contains("std dev: n/a"));
    }

    #[test]
    fn rep_variance_band_is_spelled_out() {
        let mut metrics = fixtures::analysis().metrics;
        metrics.rep_win_rate_std_dev = Some(0.2);
        metrics.rep_variance_band = Some(RepVarianceBand::Process);
        let summary = metrics_summary(&metrics);
        assert!(summary.contains(
            "std dev: 20.0 pts (high variance: a process problem, not just people)"
        ));
    }

    #[test]
    fn insights_render_as_numbered_findings() {
        let mut config = fixtures::config();
        config.thresholds.segment_column = Column::Region;
        let analysis = crate::engine::run(&fixtures::declining_apac(), &config)
            .expect("enough data");
        assert!(matches!(
            analysis.insights[0].finding,
            Finding::SegmentDecline { .. }
        ));

        let report = build_report(&analysis, 5, &[]);
        assert!(report.contains("## Insights"));
        assert!(report.contains("1. **What:** Win rate dropped most in region=APAC"));
        assert!(report.contains("   - Why it matters: "));
        assert!(report.contains("   - Recommended action: "));
        assert!(report.contains("- APAC: 40 closed, win rate 25.0%"));
    }

    #[test]
    fn report_says_so_when_nothing_stands_out() {
        let mut analysis = fixtures::analysis();
        analysis.insights.clear();
        let report = build_report(&analysis, 5, &[]);
        assert!(report.contains("No segment, lead source or rep stands out."));
    }

    #[test]
    fn open_deal_section_appears_with_risks() {
        let analysis = fixtures::analysis();
        let risks = vec![OpenDealRisk {
            deal_id: "OPEN-7".to_string(),
            sales_rep_id: "rep_2".to_string(),
            amount: 20_000.0,
            win_probability: 0.25,
            revenue_at_risk: 15_000.0,
        }];
        let report = build_report(&analysis, 5, &risks);
        assert!(report.contains("## Open Deals at Risk"));
        assert!(report.contains(
            "- OPEN-7 (rep_2): $20000 at 25.0% win probability, $15000 at risk"
        ));
    }
}
