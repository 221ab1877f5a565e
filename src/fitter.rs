//! Per-period logistic regression over the shared encoding.
//!
//! Fits minimise mean binary cross-entropy plus `l2_penalty / 2 * ||w||²`
//! (intercept unpenalised) with damped Newton steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelConfig;
use crate::encoding::FeatureEncoding;
use crate::error::{EngineError, UnstableReason};
use crate::features::{Column, EnrichedDeal};
use crate::period::{PeriodName, PeriodSlice};

/// Every fifth deal of each outcome class is held out, giving an 80/20 split.
const HOLDOUT_STRIDE: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub feature: String,
    pub column: Column,
    pub value: f64,
    pub unstable: Option<UnstableReason>,
}

/// A fitted model for one period. Immutable once returned by [`fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverModel {
    pub period: PeriodName,
    pub encoding: FeatureEncoding,
    pub intercept: f64,
    pub coefficients: Vec<Coefficient>,
    pub training_rows: usize,
    pub fitted_at: DateTime<Utc>,
    pub iterations: usize,
    pub converged: bool,
    pub training_accuracy: f64,
    /// Deals scored by the held-out refit.
    #[serde(default)]
    pub holdout_rows: usize,
    /// Accuracy of a refit on the stratified 80% against the other 20%.
    #[serde(default)]
    pub holdout_accuracy: Option<f64>,
}

impl DriverModel {
    pub fn coefficient(&self, feature: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.feature == feature)
    }

    pub fn predict_win_probability(&self, deal: &EnrichedDeal) -> f64 {
        let x = self.encoding.encode(deal);
        sigmoid(self.intercept + dot(&self.coefficients_vec(), &x))
    }

    fn coefficients_vec(&self) -> Vec<f64> {
        self.coefficients.iter().map(|c| c.value).collect()
    }

    pub fn unstable(&self) -> impl Iterator<Item = (&Coefficient, UnstableReason)> {
        self.coefficients
            .iter()
            .filter_map(|c| c.unstable.map(|reason| (c, reason)))
    }
}

/// Both models must share one feature space before their coefficients are compared.
pub fn ensure_comparable(baseline: &DriverModel, recent: &DriverModel) -> Result<(), EngineError> {
    let same_space = baseline.encoding.is_compatible_with(&recent.encoding);
    if same_space && baseline.coefficients.len() == recent.coefficients.len() {
        Ok(())
    } else {
        Err(EngineError::EncodingMismatch {
            baseline: baseline.coefficients.len(),
            recent: recent.coefficients.len(),
        })
    }
}

fn sigmoid(z: f64) -> f64 {
    let z = z.clamp(-500.0, 500.0);
    1.0 / (1.0 + (-z).exp())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

struct Design {
    rows: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl Design {
    fn build(deals: &[&EnrichedDeal], encoding: &FeatureEncoding) -> Self {
        Self {
            rows: deals.iter().map(|d| encoding.encode(d)).collect(),
            targets: deals
                .iter()
                .map(|d| if d.deal.is_won() { 1.0 } else { 0.0 })
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn won(&self) -> usize {
        self.targets.iter().filter(|y| **y >= 0.5).count()
    }

    fn is_single_class(&self) -> bool {
        let won = self.won();
        won == 0 || won == self.len()
    }

    /// Penalised mean cross-entropy.
    fn loss(&self, weights: &[f64], intercept: f64, penalty: f64) -> f64 {
        let n = self.len().max(1) as f64;
        let data: f64 = self
            .rows
            .iter()
            .zip(&self.targets)
            .map(|(x, y)| {
                let p = sigmoid(intercept + dot(weights, x))
                    .clamp(1e-15, 1.0 - 1e-15);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum();
        data / n + 0.5 * penalty * weights.iter().map(|w| w * w).sum::<f64>()
    }

    fn accuracy(&self, weights: &[f64], intercept: f64) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let correct = self
            .rows
            .iter()
            .zip(&self.targets)
            .filter(|(x, y)| (sigmoid(intercept + dot(weights, x)) >= 0.5) == (**y >= 0.5))
            .count();
        correct as f64 / self.len() as f64
    }
}

struct Solution {
    weights: Vec<f64>,
    intercept: f64,
    iterations: usize,
    converged: bool,
}

/// Damped Newton-Raphson from the log-odds of the base rate.
fn optimise(design: &Design, features: usize, config: &ModelConfig) -> Solution {
    let mut solution = Solution {
        weights: vec![0.0; features],
        intercept: 0.0,
        iterations: 0,
        converged: false,
    };
    if design.is_single_class() {
        return solution;
    }

    let rate = design.won() as f64 / design.len() as f64;
    solution.intercept = (rate / (1.0 - rate)).ln();
    let mut loss = design.loss(&solution.weights, solution.intercept, config.l2_penalty);

    while solution.iterations < config.max_iterations {
        solution.iterations += 1;
        let (gradient, hessian) =
            gradient_and_hessian(design, &solution.weights, solution.intercept, config.l2_penalty);
        if gradient.iter().all(|g| g.abs() < config.tolerance) {
            solution.converged = true;
            break;
        }
        let Some(step) = solve(hessian, gradient) else {
            break;
        };

        // Halve the step until the objective stops increasing.
        let mut scale = 1.0;
        let mut accepted = false;
        for _ in 0..30 {
            let trial_intercept = solution.intercept - scale * step[0];
            let trial: Vec<f64> = solution
                .weights
                .iter()
                .zip(&step[1..])
                .map(|(w, s)| w - scale * s)
                .collect();
            let trial_loss = design.loss(&trial, trial_intercept, config.l2_penalty);
            if trial_loss <= loss + 1e-12 {
                solution.weights = trial;
                solution.intercept = trial_intercept;
                loss = trial_loss;
                accepted = true;
                break;
            }
            scale *= 0.5;
        }
        if !accepted {
            break;
        }
    }
    solution
}

/// Stratified split: within each outcome class, ordered by deal id, every
/// fifth deal goes to the holdout.
fn holdout_split<'a>(deals: &[&'a EnrichedDeal]) -> (Vec<&'a EnrichedDeal>, Vec<&'a EnrichedDeal>) {
    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for won in [true, false] {
        let mut class: Vec<&EnrichedDeal> = deals
            .iter()
            .copied()
            .filter(|d| d.deal.is_won() == won)
            .collect();
        class.sort_by(|a, b| a.deal.deal_id.cmp(&b.deal.deal_id));
        for (index, deal) in class.into_iter().enumerate() {
            if index % HOLDOUT_STRIDE == HOLDOUT_STRIDE - 1 {
                holdout.push(deal);
            } else {
                train.push(deal);
            }
        }
    }
    (train, holdout)
}

fn holdout_accuracy(
    deals: &[&EnrichedDeal],
    encoding: &FeatureEncoding,
    config: &ModelConfig,
) -> (usize, Option<f64>) {
    let (train, holdout) = holdout_split(deals);
    let train = Design::build(&train, encoding);
    let holdout = Design::build(&holdout, encoding);
    if holdout.rows.is_empty() || train.is_single_class() {
        return (holdout.len(), None);
    }
    let solution = optimise(&train, encoding.len(), config);
    let accuracy = holdout.accuracy(&solution.weights, solution.intercept);
    (holdout.len(), Some(accuracy))
}

/// Fit one model on the closed deals of `slice` using the shared `encoding`.
pub fn fit(slice: &PeriodSlice, encoding: &FeatureEncoding, config: &ModelConfig) -> DriverModel {
    let deals: Vec<&EnrichedDeal> = slice.closed().collect();
    let design = Design::build(&deals, encoding);
    let single_class = design.is_single_class();
    let solution = optimise(&design, encoding.len(), config);
    let (holdout_rows, holdout_accuracy) = holdout_accuracy(&deals, encoding, config);

    let training_accuracy = design.accuracy(&solution.weights, solution.intercept);
    let coefficients = encoding
        .features
        .iter()
        .enumerate()
        .map(|(j, feature)| Coefficient {
            feature: feature.name.clone(),
            column: feature.column,
            value: solution.weights[j],
            unstable: instability(
                &design,
                j,
                feature.level.is_some(),
                single_class,
                solution.converged,
                training_accuracy,
            ),
        })
        .collect();

    debug!(
        event_name = "model.fit",
        period = %slice.period.name,
        rows = design.len(),
        features = encoding.len(),
        iterations = solution.iterations,
        converged = solution.converged,
        training_accuracy,
        holdout_accuracy = ?holdout_accuracy,
        "fitted driver model"
    );

    DriverModel {
        period: slice.period.name,
        encoding: encoding.clone(),
        intercept: solution.intercept,
        coefficients,
        training_rows: design.len(),
        fitted_at: Utc::now(),
        iterations: solution.iterations,
        converged: solution.converged,
        training_accuracy,
        holdout_rows,
        holdout_accuracy,
    }
}

fn instability(
    design: &Design,
    j: usize,
    one_hot: bool,
    single_class: bool,
    converged: bool,
    training_accuracy: f64,
) -> Option<UnstableReason> {
    if single_class {
        return Some(UnstableReason::SingleClass);
    }
    let column: Vec<f64> = design.rows.iter().map(|row| row[j]).collect();
    let first = column.first().copied().unwrap_or(0.0);
    if column.iter().all(|v| (v - first).abs() < 1e-12) {
        return Some(UnstableReason::ConstantInPeriod);
    }
    if one_hot {
        // Encoded one-hot values are shifted and scaled, so "present" is the larger value.
        let max = column.iter().copied().fold(f64::MIN, f64::max);
        let outcomes: Vec<f64> = column
            .iter()
            .zip(&design.targets)
            .filter(|(v, _)| (**v - max).abs() < 1e-12)
            .map(|(_, y)| *y)
            .collect();
        if outcomes.iter().all(|y| *y >= 0.5) || outcomes.iter().all(|y| *y < 0.5) {
            return Some(UnstableReason::Separation);
        }
    }
    if training_accuracy >= 1.0 {
        return Some(UnstableReason::Separation);
    }
    if !converged {
        return Some(UnstableReason::NotConverged);
    }
    None
}

/// Gradient and Hessian over `[intercept, weights...]`.
fn gradient_and_hessian(
    design: &Design,
    weights: &[f64],
    intercept: f64,
    penalty: f64,
) -> (Vec<f64>, Vec<Vec<f64>>) {
    let dim = weights.len() + 1;
    let n = design.len() as f64;
    let mut gradient = vec![0.0; dim];
    let mut hessian = vec![vec![0.0; dim]; dim];
    let mut augmented = vec![1.0; dim];

    for (x, y) in design.rows.iter().zip(&design.targets) {
        augmented[1..].copy_from_slice(x);
        let p = sigmoid(intercept + dot(weights, x));
        let error = p - y;
        let curvature = p * (1.0 - p);
        for a in 0..dim {
            gradient[a] += error * augmented[a];
            for b in a..dim {
                hessian[a][b] += curvature * augmented[a] * augmented[b];
            }
        }
    }

    for a in 0..dim {
        gradient[a] /= n;
        for b in a..dim {
            hessian[a][b] /= n;
            hessian[b][a] = hessian[a][b];
        }
        if a > 0 {
            gradient[a] += penalty * weights[a - 1];
            hessian[a][a] += penalty;
        }
        hessian[a][a] += 1e-10;
    }
    (gradient, hessian)
}

/// Gaussian elimination with partial pivoting; `None` for a singular system.
fn solve(mut matrix: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Option<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|a, b| matrix[*a][col].abs().total_cmp(&matrix[*b][col].abs()))?;
        if matrix[pivot][col].abs() < 1e-14 {
            return None;
        }
        matrix.swap(col, pivot);
        rhs.swap(col, pivot);
        for row in col + 1..n {
            let factor = matrix[row][col] / matrix[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                matrix[row][k] -= factor * matrix[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| matrix[row][k] * solution[k]).sum();
        solution[row] = (rhs[row] - tail) / matrix[row][row];
    }
    Some(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{derive_features, Quarter};
    use crate::models::{fixtures, Deal, Outcome};
    use crate::period::Period;

    fn slice(deals: Vec<Deal>) -> PeriodSlice {
        let q = Quarter {
            year: 2024,
            quarter: 1,
        };
        PeriodSlice {
            period: Period {
                name: PeriodName::Recent,
                first: q,
                last: q,
            },
            deals: derive_features(&deals),
        }
    }

    fn deal(id: usize, region: &str, source: &str, won: bool) -> Deal {
        let outcome = if won { Outcome::Won } else { Outcome::Lost };
        let mut deal = fixtures::deal(&format!("d{id}"), outcome, 20_000.0);
        deal.region = region.to_string();
        deal.lead_source = source.to_string();
        deal
    }

    /// APAC wins 2 of 10, EMEA wins 8 of 10; lead source is uninformative.
    fn regional_mix() -> Vec<Deal> {
        let mut deals = Vec::new();
        for i in 0..10 {
            let source = if i % 2 == 0 { "Inbound" } else { "Partner" };
            deals.push(deal(i, "APAC", source, i < 2));
            deals.push(deal(100 + i, "EMEA", source, i < 8));
        }
        deals
    }

    #[test]
    fn solve_handles_small_systems() {
        let system = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let solution = solve(system, vec![3.0, 5.0]).expect("non-singular");
        assert!((solution[0] - 0.8).abs() < 1e-12);
        assert!((solution[1] - 1.4).abs() < 1e-12);
        let singular = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(solve(singular, vec![1.0, 2.0]).is_none());
    }

    #[test]
    fn coefficients_point_in_the_direction_of_win_rate() {
        let period = slice(regional_mix());
        let drivers = [Column::Region, Column::LeadSource];
        let encoding = FeatureEncoding::fit(&drivers, period.closed());
        let model = fit(&period, &encoding, &ModelConfig::default());

        assert!(model.converged);
        assert_eq!(model.training_rows, 20);
        let apac = model.coefficient("region=APAC").expect("encoded").value;
        let emea = model.coefficient("region=EMEA").expect("encoded").value;
        assert!(apac < 0.0);
        assert!(emea > 0.0);
        assert!((apac + emea).abs() < 1e-6);
        let inbound = model
            .coefficient("lead_source=Inbound")
            .expect("encoded")
            .value;
        assert!(inbound.abs() < apac.abs());
        assert!(model.unstable().next().is_none());
    }

    #[test]
    fn fitting_twice_gives_identical_coefficients() {
        let period = slice(regional_mix());
        let encoding = FeatureEncoding::fit(&[Column::Region], period.closed());
        let a = fit(&period, &encoding, &ModelConfig::default());
        let b = fit(&period, &encoding, &ModelConfig::default());
        assert_eq!(a.coefficients, b.coefficients);
        assert_eq!(a.intercept, b.intercept);
        assert_eq!(a.holdout_accuracy, b.holdout_accuracy);
    }

    #[test]
    fn separating_levels_are_flagged_not_fatal() {
        let mut deals = regional_mix();
        deals.push(deal(200, "LATAM", "Inbound", false));
        deals.push(deal(201, "LATAM", "Partner", false));
        let period = slice(deals);
        let encoding = FeatureEncoding::fit(&[Column::Region], period.closed());
        let model = fit(&period, &encoding, &ModelConfig::default());

        let latam = model.coefficient("region=LATAM").expect("encoded");
        assert_eq!(latam.unstable, Some(UnstableReason::Separation));
        assert!(latam.value < 0.0);
        let apac = model.coefficient("region=APAC").expect("encoded");
        assert!(apac.unstable.is_none());
    }

    #[test]
    fn levels_absent_from_a_period_are_constant() {
        let period = slice(regional_mix());
        let mut union = period.deals.clone();
        let mut extra = fixtures::deal("x", Outcome::Won, 1.0);
        extra.region = "LATAM".to_string();
        union.extend(derive_features(&[extra]));

        let encoding = FeatureEncoding::fit(&[Column::Region], &union);
        let model = fit(&period, &encoding, &ModelConfig::default());
        let latam = model.coefficient("region=LATAM").expect("encoded");
        assert_eq!(latam.unstable, Some(UnstableReason::ConstantInPeriod));
    }

    #[test]
    fn single_class_period_flags_everything() {
        let deals: Vec<Deal> = (0..5)
            .map(|i| {
                let region = if i % 2 == 0 { "APAC" } else { "EMEA" };
                deal(i, region, "Inbound", true)
            })
            .collect();
        let period = slice(deals);
        let encoding = FeatureEncoding::fit(&[Column::Region], period.closed());
        let model = fit(&period, &encoding, &ModelConfig::default());
        let single = Some(UnstableReason::SingleClass);
        assert!(!model.converged);
        assert!(model.coefficients.iter().all(|c| c.unstable == single));
        assert!(model.coefficients.iter().all(|c| c.value == 0.0));
        assert_eq!(model.holdout_accuracy, None);
    }

    #[test]
    fn holdout_is_a_stratified_fifth_of_each_class() {
        let period = slice(regional_mix());
        let encoding = FeatureEncoding::fit(&[Column::Region], period.closed());
        let model = fit(&period, &encoding, &ModelConfig::default());

        assert_eq!(model.holdout_rows, 4);
        let accuracy = model.holdout_accuracy.expect("both classes in training split");
        assert!((0.0..=1.0).contains(&accuracy));

        let deals: Vec<&EnrichedDeal> = period.closed().collect();
        let (train, holdout) = holdout_split(&deals);
        assert_eq!(train.len(), 16);
        assert_eq!(holdout.iter().filter(|d| d.deal.is_won()).count(), 2);
        for held in &holdout {
            assert!(train.iter().all(|t| t.deal.deal_id != held.deal.deal_id));
        }
    }

    #[test]
    fn tiny_periods_have_no_holdout_score() {
        let deals = vec![deal(0, "APAC", "Inbound", true), deal(1, "EMEA", "Inbound", false)];
        let period = slice(deals);
        let encoding = FeatureEncoding::fit(&[Column::Region], period.closed());
        let model = fit(&period, &encoding, &ModelConfig::default());
        assert_eq!(model.holdout_rows, 0);
        assert_eq!(model.holdout_accuracy, None);
    }

    #[test]
    fn open_deals_are_not_training_rows() {
        let mut deals = regional_mix();
        let mut open = deal(300, "APAC", "Inbound", true);
        open.outcome = Some(Outcome::Open);
        deals.push(open);
        let period = slice(deals);
        let encoding = FeatureEncoding::fit(&[Column::Region], period.closed());
        let model = fit(&period, &encoding, &ModelConfig::default());
        assert_eq!(model.training_rows, 20);
    }

    #[test]
    fn predictions_follow_segment_win_rates() {
        let period = slice(regional_mix());
        let encoding = FeatureEncoding::fit(&[Column::Region], period.closed());
        let model = fit(&period, &encoding, &ModelConfig::default());
        let apac = &period.deals[0];
        let emea = &period.deals[1];
        assert!(model.predict_win_probability(apac) < 0.35);
        assert!(model.predict_win_probability(emea) > 0.65);
    }

    #[test]
    fn mismatched_encodings_are_rejected() {
        let period = slice(regional_mix());
        let region = FeatureEncoding::fit(&[Column::Region], period.closed());
        let source = FeatureEncoding::fit(&[Column::LeadSource], period.closed());
        let a = fit(&period, &region, &ModelConfig::default());
        let b = fit(&period, &source, &ModelConfig::default());
        assert!(ensure_comparable(&a, &a.clone()).is_ok());
        let mismatch = ensure_comparable(&a, &b);
        assert!(matches!(mismatch, Err(EngineError::EncodingMismatch { .. })));
    }

    #[test]
    fn model_serialises_for_persistence() {
        let period = slice(regional_mix());
        let encoding = FeatureEncoding::fit(&[Column::Region], period.closed());
        let model = fit(&period, &encoding, &ModelConfig::default());
        let json = serde_json::to_string(&model).expect("serialise");
        let restored: DriverModel = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(restored.encoding, model.encoding);
        assert_eq!(restored.coefficients.len(), model.coefficients.len());
        assert_eq!(restored.holdout_accuracy, model.holdout_accuracy);
    }
}
