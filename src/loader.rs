use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Deal, Outcome};

const DATE_FORMAT: &str = "%Y-%m-%d";
const LONG_CYCLE_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open deal file `{path}`: {source}")]
    Open { path: PathBuf, source: csv::Error },
    #[error("malformed deal row {row}: {source}")]
    Row { row: usize, source: csv::Error },
}

/// Data-quality findings. Rows are kept; the findings travel with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingValues { column: &'static str, count: usize },
    UnparseableValues { column: &'static str, count: usize },
    InvalidOutcomes { values: Vec<String> },
    NegativeAmounts { count: usize },
    ClosedBeforeCreated { count: usize },
    NegativeCycles { count: usize },
    VeryLongCycles { count: usize },
}

impl ValidationIssue {
    /// Number of rows behind the finding.
    pub fn count(&self) -> usize {
        match self {
            Self::InvalidOutcomes { values } => values.len(),
            Self::MissingValues { count, .. }
            | Self::UnparseableValues { count, .. }
            | Self::NegativeAmounts { count }
            | Self::ClosedBeforeCreated { count }
            | Self::NegativeCycles { count }
            | Self::VeryLongCycles { count } => *count,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingValues { column, count } => {
                write!(f, "missing values in {column}: {count}")
            }
            Self::UnparseableValues { column, count } => {
                write!(f, "unparseable values in {column}: {count}")
            }
            Self::InvalidOutcomes { values } => {
                write!(f, "invalid outcome values: {}", values.join(", "))
            }
            Self::NegativeAmounts { count } => write!(f, "negative deal amounts: {count} deals"),
            Self::ClosedBeforeCreated { count } => {
                write!(f, "deals with closed_date before created_date: {count}")
            }
            Self::NegativeCycles { count } => write!(f, "negative sales cycle days: {count} deals"),
            Self::VeryLongCycles { count } => {
                write!(f, "sales cycles > {LONG_CYCLE_DAYS} days: {count} deals")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDeals {
    pub deals: Vec<Deal>,
    pub issues: Vec<ValidationIssue>,
}

impl LoadedDeals {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Deserialize)]
struct CsvRow {
    deal_id: Option<String>,
    created_date: Option<String>,
    closed_date: Option<String>,
    deal_stage: Option<String>,
    deal_amount: Option<String>,
    sales_rep_id: Option<String>,
    industry: Option<String>,
    region: Option<String>,
    product_type: Option<String>,
    lead_source: Option<String>,
    outcome: Option<String>,
    sales_cycle_days: Option<String>,
}

#[derive(Default)]
struct IssueTally {
    missing: Vec<(&'static str, usize)>,
    unparseable: Vec<(&'static str, usize)>,
    invalid_outcomes: BTreeSet<String>,
    negative_amounts: usize,
    closed_before_created: usize,
    negative_cycles: usize,
    very_long_cycles: usize,
}

impl IssueTally {
    fn bump(counts: &mut Vec<(&'static str, usize)>, column: &'static str) {
        match counts.iter_mut().find(|(c, _)| *c == column) {
            Some((_, count)) => *count += 1,
            None => counts.push((column, 1)),
        }
    }

    fn text(&mut self, column: &'static str, value: Option<String>) -> Option<String> {
        match value {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                Self::bump(&mut self.missing, column);
                None
            }
        }
    }

    fn parsed<T: std::str::FromStr>(
        &mut self,
        column: &'static str,
        value: Option<String>,
    ) -> Option<T> {
        let raw = self.text(column, value)?;
        let parsed = raw.parse().ok();
        if parsed.is_none() {
            Self::bump(&mut self.unparseable, column);
        }
        parsed
    }

    fn date(&mut self, column: &'static str, value: Option<String>) -> Option<NaiveDate> {
        let raw = self.text(column, value)?;
        let parsed = NaiveDate::parse_from_str(&raw, DATE_FORMAT).ok();
        if parsed.is_none() {
            Self::bump(&mut self.unparseable, column);
        }
        parsed
    }

    fn into_issues(self) -> Vec<ValidationIssue> {
        let mut issues: Vec<ValidationIssue> = self
            .missing
            .into_iter()
            .map(|(column, count)| ValidationIssue::MissingValues { column, count })
            .chain(
                self.unparseable
                    .into_iter()
                    .map(|(column, count)| ValidationIssue::UnparseableValues { column, count }),
            )
            .collect();
        if !self.invalid_outcomes.is_empty() {
            issues.push(ValidationIssue::InvalidOutcomes {
                values: self.invalid_outcomes.into_iter().collect(),
            });
        }
        let counted = [
            ValidationIssue::NegativeAmounts {
                count: self.negative_amounts,
            },
            ValidationIssue::ClosedBeforeCreated {
                count: self.closed_before_created,
            },
            ValidationIssue::NegativeCycles {
                count: self.negative_cycles,
            },
            ValidationIssue::VeryLongCycles {
                count: self.very_long_cycles,
            },
        ];
        issues.extend(counted.into_iter().filter(|issue| issue.count() > 0));
        issues
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

fn to_deal(row: CsvRow, tally: &mut IssueTally) -> Deal {
    let outcome = match tally.text("outcome", row.outcome) {
        Some(raw) => match raw.parse::<Outcome>() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tally.invalid_outcomes.insert(raw);
                None
            }
        },
        None => None,
    };
    let closed = matches!(outcome, Some(Outcome::Won | Outcome::Lost));

    let created_date = tally.date("created_date", row.created_date);
    // Open deals legitimately have no close date or final cycle length.
    let closed_date = if closed || present(&row.closed_date) {
        tally.date("closed_date", row.closed_date)
    } else {
        None
    };
    let sales_cycle_days: Option<i64> = if closed || present(&row.sales_cycle_days) {
        tally.parsed("sales_cycle_days", row.sales_cycle_days)
    } else {
        None
    };
    let deal_amount: Option<f64> = tally.parsed("deal_amount", row.deal_amount);

    if deal_amount.is_some_and(|a| a < 0.0) {
        tally.negative_amounts += 1;
    }
    if let (Some(created), Some(closed)) = (created_date, closed_date) {
        if closed < created {
            tally.closed_before_created += 1;
        }
    }
    match sales_cycle_days {
        Some(days) if days < 0 => tally.negative_cycles += 1,
        Some(days) if days > LONG_CYCLE_DAYS => tally.very_long_cycles += 1,
        _ => {}
    }

    Deal {
        deal_id: tally.text("deal_id", row.deal_id).unwrap_or_default(),
        created_date,
        closed_date,
        deal_stage: row.deal_stage.unwrap_or_default(),
        deal_amount,
        sales_rep_id: row.sales_rep_id.unwrap_or_default(),
        industry: row.industry.unwrap_or_default(),
        region: row.region.unwrap_or_default(),
        product_type: row.product_type.unwrap_or_default(),
        lead_source: row.lead_source.unwrap_or_default(),
        outcome,
        sales_cycle_days,
    }
}

/// Read deals from any CSV source with the fixed column header.
pub fn read_deals<R: Read>(source: R) -> Result<LoadedDeals, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(source);
    let mut tally = IssueTally::default();
    let mut deals = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.map_err(|source| LoadError::Row {
            row: index + 1,
            source,
        })?;
        deals.push(to_deal(row, &mut tally));
    }

    let issues = tally.into_issues();
    for issue in &issues {
        warn!(event_name = "loader.validation_issue", "{issue}");
    }
    info!(
        event_name = "loader.loaded",
        rows = deals.len(),
        issues = issues.len(),
        "deal table loaded"
    );
    Ok(LoadedDeals { deals, issues })
}

pub fn load_deals(path: &Path) -> Result<LoadedDeals, LoadError> {
    let file = std::fs::File::open(path).map_err(|e| LoadError::Open {
        path: path.to_path_buf(),
        source: csv::Error::from(e),
    })?;
    read_deals(file)
}
