use std::cmp::Ordering;

use serde::Serialize;

use crate::actions;
use crate::config::TrendConfig;
use crate::trend::{Trend, TrendDirection};

/// Coefficients at or below this magnitude are solver noise, not an effect.
pub const IMPACT_EPSILON: f64 = 1e-9;

/// Everything the ranker needs to know about one driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverCandidate {
    pub name: String,
    /// Encoded feature the impact was read from.
    pub feature: String,
    /// Signed recent-period coefficient of that feature.
    pub impact: f64,
    pub revenue_exposure: Option<f64>,
    pub trend: Trend,
    pub segment_win_rate_shift: Option<f64>,
    pub unstable: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactDescriptor {
    pub feature: String,
    pub coefficient: f64,
    pub arrow: &'static str,
    pub interpretation: String,
}

impl ImpactDescriptor {
    pub fn new(feature: &str, coefficient: f64) -> Self {
        let magnitude = coefficient.abs();
        let strength = if magnitude < 0.1 {
            "slightly"
        } else if magnitude < 0.5 {
            "moderately"
        } else {
            "strongly"
        };
        let (arrow, direction) = if coefficient < 0.0 {
            ("↓", "decreases")
        } else {
            ("↑", "increases")
        };
        Self {
            feature: feature.to_string(),
            coefficient,
            arrow,
            interpretation: format!("{strength} {direction} win probability"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverScore {
    pub driver: String,
    pub impact: ImpactDescriptor,
    pub revenue_exposure: f64,
    pub trend: Trend,
    pub trend_multiplier: f64,
    pub wrds: f64,
    pub segment_win_rate_shift: Option<f64>,
    pub unstable: Vec<String>,
    pub likely_issues: Vec<String>,
    pub suggested_actions: Vec<String>,
}

impl DriverScore {
    pub fn is_flagged(&self) -> bool {
        !self.unstable.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnscoredDriver {
    pub driver: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverRanking {
    /// Drivers that lower win probability, highest WRDS first.
    pub negative: Vec<DriverScore>,
    /// Drivers that raise win probability, highest WRDS first.
    pub positive: Vec<DriverScore>,
    pub unscored: Vec<UnscoredDriver>,
}

/// Amplify when the coefficient moved further in the direction of its sign,
/// dampen when it moved back toward zero or past it.
pub fn trend_multiplier(impact: f64, trend: &Trend, config: &TrendConfig) -> f64 {
    if trend.direction == TrendDirection::Stable {
        return 1.0;
    }
    let strengthening =
        (impact < 0.0 && trend.change < 0.0) || (impact > 0.0 && trend.change > 0.0);
    if strengthening {
        config.amplify
    } else {
        config.dampen
    }
}

fn by_score(a: &DriverScore, b: &DriverScore) -> Ordering {
    b.wrds.total_cmp(&a.wrds).then_with(|| a.driver.cmp(&b.driver))
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Score every candidate and split by sign into two stably ordered lists.
pub fn rank(candidates: Vec<DriverCandidate>, config: &TrendConfig) -> DriverRanking {
    let mut ranking = DriverRanking::default();

    for candidate in candidates {
        let Some(exposure) = candidate.revenue_exposure else {
            ranking.unscored.push(UnscoredDriver {
                driver: candidate.name,
                reason: "revenue exposure undefined (no ACV in recent period)".to_string(),
            });
            continue;
        };
        if !candidate.impact.is_finite() || candidate.impact.abs() <= IMPACT_EPSILON {
            ranking.unscored.push(UnscoredDriver {
                driver: candidate.name,
                reason: "no measurable impact in recent period".to_string(),
            });
            continue;
        }

        let multiplier = trend_multiplier(candidate.impact, &candidate.trend, config);
        let entry = actions::lookup(&candidate.name);
        let score = DriverScore {
            impact: ImpactDescriptor::new(&candidate.feature, candidate.impact),
            revenue_exposure: exposure,
            wrds: candidate.impact.abs() * exposure * multiplier,
            trend_multiplier: multiplier,
            trend: candidate.trend,
            segment_win_rate_shift: candidate.segment_win_rate_shift,
            unstable: candidate.unstable,
            likely_issues: owned(entry.likely_issues),
            suggested_actions: owned(entry.suggested_actions),
            driver: candidate.name,
        };
        if score.impact.coefficient < 0.0 {
            ranking.negative.push(score);
        } else {
            ranking.positive.push(score);
        }
    }

    ranking.negative.sort_by(by_score);
    ranking.positive.sort_by(by_score);
    ranking.unscored.sort_by(|a, b| a.driver.cmp(&b.driver));
    ranking
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn trend(change: f64) -> Trend {
        Trend {
            feature: "f".to_string(),
            baseline_coefficient: 0.0,
            recent_coefficient: change,
            change,
            direction: TrendDirection::classify(change, 0.02),
        }
    }

    fn candidate(name: &str, impact: f64, exposure: f64, change: f64) -> DriverCandidate {
        DriverCandidate {
            name: name.to_string(),
            feature: format!("{name}=x"),
            impact,
            revenue_exposure: Some(exposure),
            trend: trend(change),
            segment_win_rate_shift: None,
            unstable: Vec::new(),
        }
    }

    fn arbitrary_candidates() -> impl Strategy<Value = Vec<DriverCandidate>> {
        let row = (-2.0f64..2.0, 0.0f64..=1.0, -0.5f64..0.5);
        prop::collection::vec(row, 1..10).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (impact, exposure, change))| {
                    candidate(&format!("driver_{i}"), impact, exposure, change)
                })
                .collect()
        })
    }

    #[test]
    fn worsening_negative_driver_is_amplified() {
        let t = Trend {
            feature: "region=APAC".to_string(),
            baseline_coefficient: -0.10,
            recent_coefficient: -0.35,
            change: -0.25,
            direction: TrendDirection::Worsening,
        };
        let multiplier = trend_multiplier(-0.35, &t, &TrendConfig::default());
        assert!(multiplier > 1.0);

        let ranking = rank(
            vec![DriverCandidate {
                name: "region".to_string(),
                feature: "region=APAC".to_string(),
                impact: -0.35,
                revenue_exposure: Some(0.8),
                trend: t,
                segment_win_rate_shift: None,
                unstable: Vec::new(),
            }],
            &TrendConfig::default(),
        );
        let score = &ranking.negative[0];
        assert!((score.wrds - 0.35 * 0.8 * 1.5).abs() < 1e-12);
        assert_eq!(score.impact.interpretation, "moderately decreases win probability");
        assert_eq!(score.likely_issues[0], "Local competition");
    }

    #[test]
    fn multipliers_follow_the_driver_sign() {
        let config = TrendConfig::default();
        assert_eq!(trend_multiplier(0.4, &trend(0.3), &config), 1.5);
        assert_eq!(trend_multiplier(0.4, &trend(-0.3), &config), 0.8);
        assert_eq!(trend_multiplier(-0.4, &trend(0.3), &config), 0.8);
        assert_eq!(trend_multiplier(-0.4, &trend(0.01), &config), 1.0);
    }

    #[test]
    fn signs_never_mix() {
        let ranking = rank(
            vec![
                candidate("region", -0.2, 1.0, 0.0),
                candidate("lead_source", 3.0, 1.0, 0.0),
                candidate("industry", -0.5, 0.5, 0.0),
                candidate("product_type", 0.1, 1.0, 0.0),
            ],
            &TrendConfig::default(),
        );
        assert!(ranking.negative.iter().all(|s| s.impact.coefficient < 0.0));
        assert!(ranking.positive.iter().all(|s| s.impact.coefficient > 0.0));
        assert_eq!(ranking.negative.len(), 2);
        assert_eq!(ranking.positive[0].driver, "lead_source");
    }

    #[test]
    fn ties_break_by_name() {
        let ranking = rank(
            vec![
                candidate("region", -0.2, 1.0, 0.0),
                candidate("industry", -0.4, 0.5, 0.0),
                candidate("deal_stage", -0.9, 1.0, 0.0),
            ],
            &TrendConfig::default(),
        );
        let order: Vec<&str> = ranking.negative.iter().map(|s| s.driver.as_str()).collect();
        assert_eq!(order, vec!["deal_stage", "industry", "region"]);
    }

    #[test]
    fn zero_impact_and_undefined_exposure_are_unscored() {
        let mut no_revenue = candidate("region", -0.3, 1.0, 0.0);
        no_revenue.revenue_exposure = None;
        let candidates = vec![no_revenue, candidate("industry", 0.0, 1.0, 0.0)];
        let ranking = rank(candidates, &TrendConfig::default());
        assert!(ranking.negative.is_empty());
        assert!(ranking.positive.is_empty());
        let names: Vec<&str> = ranking.unscored.iter().map(|u| u.driver.as_str()).collect();
        assert_eq!(names, vec!["industry", "region"]);
    }

    #[test]
    fn solver_noise_coefficients_are_unscored() {
        let candidates = vec![
            candidate("lead_source", 1.2e-15, 1.0, 0.0),
            candidate("industry", -3.0e-16, 1.0, 0.0),
            candidate("region", -0.3, 1.0, 0.0),
        ];
        let ranking = rank(candidates, &TrendConfig::default());
        assert_eq!(ranking.negative.len(), 1);
        assert!(ranking.positive.is_empty());
        let names: Vec<&str> = ranking.unscored.iter().map(|u| u.driver.as_str()).collect();
        assert_eq!(names, vec!["industry", "lead_source"]);
        assert_eq!(ranking.unscored[0].reason, "no measurable impact in recent period");
    }

    #[test]
    fn unstable_drivers_are_still_ranked() {
        let mut flagged = candidate("region", -0.3, 1.0, 0.0);
        let note = "baseline: region=LATAM (perfectly separates outcomes)".to_string();
        flagged.unstable.push(note);
        let ranking = rank(vec![flagged], &TrendConfig::default());
        assert!(ranking.negative[0].is_flagged());
    }

    proptest! {
        #[test]
        fn every_candidate_lands_in_exactly_one_list(candidates in arbitrary_candidates()) {
            let total = candidates.len();
            let ranking = rank(candidates, &TrendConfig::default());

            prop_assert!(ranking.negative.iter().all(|s| s.impact.coefficient < 0.0));
            prop_assert!(ranking.positive.iter().all(|s| s.impact.coefficient > 0.0));
            for score in &ranking.negative {
                prop_assert!(ranking.positive.iter().all(|p| p.driver != score.driver));
            }
            let placed = ranking.negative.len() + ranking.positive.len() + ranking.unscored.len();
            prop_assert_eq!(placed, total);
        }

        #[test]
        fn lists_are_ordered_by_descending_wrds(candidates in arbitrary_candidates()) {
            let ranking = rank(candidates, &TrendConfig::default());
            for list in [&ranking.negative, &ranking.positive] {
                for pair in list.windows(2) {
                    prop_assert!(pair[0].wrds >= pair[1].wrds);
                    prop_assert!(pair[0].wrds >= 0.0);
                }
            }
        }

        #[test]
        fn reranking_is_byte_identical(candidates in arbitrary_candidates()) {
            let config = TrendConfig::default();
            let first = serde_json::to_string(&rank(candidates.clone(), &config));
            let second = serde_json::to_string(&rank(candidates, &config));
            prop_assert_eq!(first.ok(), second.ok());
        }
    }
}
