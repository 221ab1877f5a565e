use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::encoding::FeatureEncoding;
use crate::error::{EngineError, EngineWarning};
use crate::features::{derive_features, Column, EnrichedDeal};
use crate::fitter::{self, DriverModel};
use crate::insights::{self, Insight};
use crate::metrics::{self, MetricsReport};
use crate::models::Deal;
use crate::period::{self, Period, PeriodSplit};
use crate::ranker::{self, DriverCandidate, DriverRanking, DriverScore, UnscoredDriver};
use crate::trend::{self, TrendDirection};

/// Output of one full run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverAnalysis {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub metrics: MetricsReport,
    pub insights: Vec<Insight>,
    pub baseline_period: Period,
    pub recent_period: Period,
    pub baseline_closed: usize,
    pub recent_closed: usize,
    pub ranking: DriverRanking,
    pub baseline_model: DriverModel,
    pub recent_model: DriverModel,
    pub warnings: Vec<EngineWarning>,
}

impl DriverAnalysis {
    /// Ranked drivers whose coefficient trend left the stable band, largest change first.
    pub fn changed_drivers(&self) -> Vec<&DriverScore> {
        let mut changed: Vec<&DriverScore> = self
            .ranking
            .negative
            .iter()
            .chain(&self.ranking.positive)
            .filter(|s| s.trend.direction != TrendDirection::Stable)
            .collect();
        changed.sort_by(|a, b| {
            b.trend
                .change
                .abs()
                .total_cmp(&a.trend.change.abs())
                .then_with(|| a.driver.cmp(&b.driver))
        });
        changed
    }
}

/// Derive features and run the full pipeline.
pub fn run(deals: &[Deal], config: &EngineConfig) -> Result<DriverAnalysis, EngineError> {
    analyze(&derive_features(deals), config)
}

/// Run the pipeline over an already enriched table. The table is only read.
pub fn analyze(
    deals: &[EnrichedDeal],
    config: &EngineConfig,
) -> Result<DriverAnalysis, EngineError> {
    if config.drivers.is_empty() {
        return Err(EngineError::NoDrivers);
    }
    config
        .validate()
        .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

    let metrics = metrics::compute(deals, config);
    let insights = insights::generate(deals, &metrics, config.thresholds.min_segment_deals);
    let split = period::split(deals, &config.periods)?;

    let closed = split.baseline.closed().chain(split.recent.closed());
    let encoding = FeatureEncoding::fit(&config.drivers, closed);
    let baseline_model = fitter::fit(&split.baseline, &encoding, &config.model);
    let recent_model = fitter::fit(&split.recent, &encoding, &config.model);
    fitter::ensure_comparable(&baseline_model, &recent_model)?;

    let warnings = collect_warnings(&metrics, &baseline_model, &recent_model);
    for warning in &warnings {
        warn!(event_name = "engine.warning", "{warning}");
    }

    let mut unscored = Vec::new();
    let mut candidates = Vec::new();
    for &driver in &config.drivers {
        match candidate(driver, &split, &baseline_model, &recent_model, config) {
            Ok(candidate) => candidates.push(candidate),
            Err(skipped) => unscored.push(skipped),
        }
    }

    let mut ranking = ranker::rank(candidates, &config.trend);
    ranking.unscored.extend(unscored);
    ranking.unscored.sort_by(|a, b| a.driver.cmp(&b.driver));

    info!(
        event_name = "engine.ranked",
        baseline = %split.baseline.period,
        recent = %split.recent.period,
        features = encoding.len(),
        negative = ranking.negative.len(),
        positive = ranking.positive.len(),
        unscored = ranking.unscored.len(),
        insights = insights.len(),
        warnings = warnings.len(),
        "driver ranking complete"
    );

    Ok(DriverAnalysis {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        metrics,
        insights,
        baseline_period: split.baseline.period,
        recent_period: split.recent.period,
        baseline_closed: split.baseline.closed_count(),
        recent_closed: split.recent.closed_count(),
        ranking,
        baseline_model,
        recent_model,
        warnings,
    })
}

fn unscored(driver: Column, reason: String) -> UnscoredDriver {
    UnscoredDriver {
        driver: driver.name().to_string(),
        reason,
    }
}

/// Candidate for the ranker, or the reason the driver cannot be scored.
///
/// A driver whose dominant recent feature is constant or comes from a
/// single-class period has no signal to rank, whatever its fitted value.
fn candidate(
    driver: Column,
    split: &PeriodSplit,
    baseline: &DriverModel,
    recent: &DriverModel,
    config: &EngineConfig,
) -> Result<DriverCandidate, UnscoredDriver> {
    let Some(trend) = trend::coefficient_trend(baseline, recent, driver, config.trend.tolerance)
    else {
        return Err(unscored(driver, "driver has no encoded features".to_string()));
    };
    let degenerate = recent
        .coefficient(&trend.feature)
        .and_then(|c| c.unstable)
        .filter(|r| r.is_degenerate());
    if let Some(reason) = degenerate {
        let reason = format!(
            "`{}` is unusable in the recent period: {}",
            trend.feature,
            reason.describe()
        );
        return Err(unscored(driver, reason));
    }

    let unstable = [baseline, recent]
        .into_iter()
        .flat_map(|model| {
            model
                .unstable()
                .filter(|(c, _)| c.column == driver)
                .map(move |(c, reason)| {
                    format!("{}: {} ({})", model.period, c.feature, reason.describe())
                })
        })
        .collect();
    let min_sample = config.thresholds.min_segment_deals;

    Ok(DriverCandidate {
        name: driver.name().to_string(),
        feature: trend.feature.clone(),
        impact: trend.recent_coefficient,
        revenue_exposure: trend::revenue_exposure(split.recent.closed(), driver),
        segment_win_rate_shift: trend::segment_win_rate_shift(split, driver, min_sample),
        unstable,
        trend,
    })
}

fn collect_warnings(
    metrics: &MetricsReport,
    baseline: &DriverModel,
    recent: &DriverModel,
) -> Vec<EngineWarning> {
    let mut warnings = Vec::new();
    for model in [baseline, recent] {
        if !model.converged {
            warnings.push(EngineWarning::NotConverged {
                period: model.period,
                iterations: model.iterations,
            });
        }
        for (coefficient, reason) in model.unstable() {
            warnings.push(EngineWarning::UnstableCoefficient {
                period: model.period,
                feature: coefficient.feature.clone(),
                reason,
            });
        }
    }
    for delta in metrics.win_rate_delta.iter().filter(|d| d.low_confidence) {
        warnings.push(EngineWarning::LowConfidenceSegment {
            column: metrics.segment_column.name().to_string(),
            segment: delta.segment.clone(),
            baseline_closed: delta.baseline_closed,
            recent_closed: delta.recent_closed,
        });
    }
    warnings
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, NaiveDate};

    use super::DriverAnalysis;
    use crate::config::EngineConfig;
    use crate::features::Column;
    use crate::models::{Deal, Outcome};

    /// 60 closed deals per period across three regions. APAC wins 8/20 in the
    /// baseline and 2/20 recently; EMEA and NA hold at 10/20 and 12/20.
    pub fn declining_apac() -> Vec<Deal> {
        let mut deals = Vec::new();
        let periods = [
            (NaiveDate::from_ymd_opt(2023, 8, 1), [8, 10, 12]),
            (NaiveDate::from_ymd_opt(2024, 2, 1), [2, 10, 12]),
        ];
        for (start, wins) in periods {
            let Some(start) = start else { continue };
            for (region, won_count) in ["APAC", "EMEA", "NA"].into_iter().zip(wins) {
                for i in 0..20usize {
                    let created = start + Duration::days(i as i64);
                    let cycle = 20 + ((i * 13) % 80) as i64;
                    let source = if i % 2 == 0 { "Inbound" } else { "Partner" };
                    let outcome = if i < won_count {
                        Outcome::Won
                    } else {
                        Outcome::Lost
                    };
                    deals.push(Deal {
                        deal_id: format!("{created}-{region}-{i}"),
                        created_date: Some(created),
                        closed_date: Some(created + Duration::days(cycle)),
                        deal_stage: "Closed".to_string(),
                        deal_amount: Some(5_000.0 + 3_000.0 * ((i * 7) % 20) as f64),
                        sales_rep_id: format!("rep_{}", i % 4),
                        industry: "SaaS".to_string(),
                        region: region.to_string(),
                        product_type: "Core".to_string(),
                        lead_source: source.to_string(),
                        outcome: Some(outcome),
                        sales_cycle_days: Some(cycle),
                    });
                }
            }
        }
        deals
    }

    pub fn config() -> EngineConfig {
        let mut config = EngineConfig {
            drivers: vec![
                Column::Region,
                Column::LeadSource,
                Column::Industry,
                Column::DealAmount,
            ],
            ..EngineConfig::default()
        };
        config.periods.reference_end = NaiveDate::from_ymd_opt(2024, 6, 30);
        config
    }

    pub fn analysis() -> DriverAnalysis {
        let deals = declining_apac();
        super::run(&deals, &config()).expect("enough data")
    }
}
