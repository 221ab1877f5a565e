use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::period::PeriodName;

/// Failures that abort a run. Anything recoverable is an [`EngineWarning`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("not enough closed deals in {scope}: found {found}, need at least {required}")]
    DataInsufficient {
        scope: String,
        found: usize,
        required: usize,
    },
    #[error("period models use different feature spaces ({baseline} vs {recent} features)")]
    EncodingMismatch { baseline: usize, recent: usize },
    #[error("no candidate drivers configured")]
    NoDrivers,
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub fn insufficient(period: PeriodName, found: usize, required: usize) -> Self {
        Self::DataInsufficient {
            scope: format!("{period} period"),
            found,
            required,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnstableReason {
    /// The encoded feature does not vary within the period.
    ConstantInPeriod,
    /// Every deal carrying this level has the same outcome.
    Separation,
    /// The period holds only Won or only Lost deals.
    SingleClass,
    NotConverged,
}

impl UnstableReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::ConstantInPeriod => "constant within period",
            Self::Separation => "perfectly separates outcomes",
            Self::SingleClass => "period has a single outcome class",
            Self::NotConverged => "fit did not converge",
        }
    }

    /// The coefficient carries no information about the period at all.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::ConstantInPeriod | Self::SingleClass)
    }
}

/// Problems that are flagged on the result and logged, never fatal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineWarning {
    UnstableCoefficient {
        period: PeriodName,
        feature: String,
        reason: UnstableReason,
    },
    NotConverged {
        period: PeriodName,
        iterations: usize,
    },
    LowConfidenceSegment {
        column: String,
        segment: String,
        baseline_closed: usize,
        recent_closed: usize,
    },
}

impl std::fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnstableCoefficient {
                period,
                feature,
                reason,
            } => {
                let reason = reason.describe();
                write!(f, "{period}: coefficient for `{feature}` is unstable ({reason})")
            }
            Self::NotConverged { period, iterations } => {
                write!(f, "{period}: model did not converge after {iterations} iterations")
            }
            Self::LowConfidenceSegment {
                column,
                segment,
                baseline_closed,
                recent_closed,
            } => write!(
                f,
                "{column}={segment}: low confidence \
                 ({baseline_closed} baseline / {recent_closed} recent closed deals)"
            ),
        }
    }
}
