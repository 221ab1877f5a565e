use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Won,
    Lost,
    Open,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Won => "Won",
            Self::Lost => "Lost",
            Self::Open => "Open",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            "open" => Ok(Self::Open),
            other => Err(format!("unknown outcome `{other}`")),
        }
    }
}

/// One sales opportunity as handed over by the loader.
///
/// Text attributes keep whatever the source had; blank values become
/// `Unknown` only when features are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub deal_id: String,
    pub created_date: Option<NaiveDate>,
    pub closed_date: Option<NaiveDate>,
    pub deal_stage: String,
    pub deal_amount: Option<f64>,
    pub sales_rep_id: String,
    pub industry: String,
    pub region: String,
    pub product_type: String,
    pub lead_source: String,
    /// `None` when the source row had no outcome at all.
    pub outcome: Option<Outcome>,
    pub sales_cycle_days: Option<i64>,
}

impl Deal {
    pub fn is_closed(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Won | Outcome::Lost))
    }

    pub fn is_won(&self) -> bool {
        self.outcome == Some(Outcome::Won)
    }

    pub fn is_lost(&self) -> bool {
        self.outcome == Some(Outcome::Lost)
    }

    pub fn is_open(&self) -> bool {
        self.outcome == Some(Outcome::Open)
    }

    /// Cycle length as given, or closed minus created for closed deals.
    pub fn cycle_days(&self) -> Option<i64> {
        if self.sales_cycle_days.is_some() {
            return self.sales_cycle_days;
        }
        if !self.is_closed() {
            return None;
        }
        match (self.created_date, self.closed_date) {
            (Some(created), Some(closed)) => Some((closed - created).num_days()),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn deal(id: &str, outcome: Outcome, amount: f64) -> Deal {
        Deal {
            deal_id: id.to_string(),
            created_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            closed_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            deal_stage: "Closed".to_string(),
            deal_amount: Some(amount),
            sales_rep_id: "rep_1".to_string(),
            industry: "SaaS".to_string(),
            region: "North America".to_string(),
            product_type: "Core".to_string(),
            lead_source: "Inbound".to_string(),
            outcome: Some(outcome),
            sales_cycle_days: Some(45),
        }
    }
}
