use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::Deal;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AcvBucket {
    Smb,
    MidMarket,
    Enterprise,
    LargeEnterprise,
    Unknown,
}

impl AcvBucket {
    /// Buckets are left-open from zero, so a zero amount is `Unknown`.
    pub fn from_amount(amount: Option<f64>) -> Self {
        match amount {
            Some(value) if value.is_finite() && value > 0.0 => {
                if value <= 10_000.0 {
                    Self::Smb
                } else if value <= 30_000.0 {
                    Self::MidMarket
                } else if value <= 50_000.0 {
                    Self::Enterprise
                } else {
                    Self::LargeEnterprise
                }
            }
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Smb => "SMB (<$10k)",
            Self::MidMarket => "Mid-Market ($10k-$30k)",
            Self::Enterprise => "Enterprise ($30k-$50k)",
            Self::LargeEnterprise => "Large Enterprise (>$50k)",
            Self::Unknown => UNKNOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CycleBucket {
    Fast,
    Medium,
    Slow,
    VerySlow,
    Unknown,
}

impl CycleBucket {
    pub fn from_days(days: Option<i64>) -> Self {
        match days {
            Some(d) if d <= 0 => Self::Unknown,
            Some(d) if d <= 30 => Self::Fast,
            Some(d) if d <= 60 => Self::Medium,
            Some(d) if d <= 90 => Self::Slow,
            Some(_) => Self::VerySlow,
            None => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fast => "Fast (<30d)",
            Self::Medium => "Medium (30-60d)",
            Self::Slow => "Slow (60-90d)",
            Self::VerySlow => "Very Slow (>90d)",
            Self::Unknown => UNKNOWN,
        }
    }
}

/// Calendar quarter, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quarter {
    pub year: i32,
    pub quarter: u8,
}

impl Quarter {
    pub const fn new(year: i32, quarter: u8) -> Self {
        Self { year, quarter }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self::new(date.year(), (date.month0() / 3 + 1) as u8)
    }

    fn index(&self) -> i64 {
        self.year as i64 * 4 + (self.quarter as i64 - 1)
    }

    fn from_index(index: i64) -> Self {
        Self::new(index.div_euclid(4) as i32, (index.rem_euclid(4) + 1) as u8)
    }

    /// Shift by `quarters` (negative moves back in time).
    pub fn offset(&self, quarters: i64) -> Self {
        Self::from_index(self.index() + quarters)
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, (self.quarter as u32 - 1) * 3 + 1, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.offset(1).first_day().and_then(|d| d.pred_opt())
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Categorical,
    Numeric,
}

/// Columns of the enriched deal table that can be grouped on or used as drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    DealStage,
    SalesRepId,
    Industry,
    Region,
    ProductType,
    LeadSource,
    AcvBucket,
    CycleBucket,
    CreatedQuarter,
    DealAmount,
    SalesCycleDays,
}

impl Column {
    pub const ALL: [Column; 11] = [
        Column::DealStage,
        Column::SalesRepId,
        Column::Industry,
        Column::Region,
        Column::ProductType,
        Column::LeadSource,
        Column::AcvBucket,
        Column::CycleBucket,
        Column::CreatedQuarter,
        Column::DealAmount,
        Column::SalesCycleDays,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DealStage => "deal_stage",
            Self::SalesRepId => "sales_rep_id",
            Self::Industry => "industry",
            Self::Region => "region",
            Self::ProductType => "product_type",
            Self::LeadSource => "lead_source",
            Self::AcvBucket => "acv_bucket",
            Self::CycleBucket => "cycle_bucket",
            Self::CreatedQuarter => "created_quarter",
            Self::DealAmount => "deal_amount",
            Self::SalesCycleDays => "sales_cycle_days",
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::DealAmount | Self::SalesCycleDays => ColumnKind::Numeric,
            _ => ColumnKind::Categorical,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .iter()
            .copied()
            .find(|column| column.name() == value.trim())
            .ok_or_else(|| format!("unknown column `{value}`"))
    }
}

/// A deal plus its derived columns. Built once per load; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedDeal {
    pub deal: Deal,
    pub acv_bucket: AcvBucket,
    pub cycle_bucket: CycleBucket,
    pub cycle_days: Option<i64>,
    pub created_quarter: Option<Quarter>,
}

impl EnrichedDeal {
    pub fn from_deal(deal: &Deal) -> Self {
        let cycle_days = deal.cycle_days();
        Self {
            acv_bucket: AcvBucket::from_amount(deal.deal_amount),
            cycle_bucket: CycleBucket::from_days(cycle_days),
            cycle_days,
            created_quarter: deal.created_date.map(Quarter::from_date),
            deal: deal.clone(),
        }
    }

    /// ACV used in revenue sums; a missing amount contributes nothing.
    pub fn acv(&self) -> f64 {
        self.deal
            .deal_amount
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(0.0)
    }

    /// Category label for `column`, with [`UNKNOWN`] standing in for missing values.
    pub fn category(&self, column: Column) -> String {
        let raw = match column {
            Column::DealStage => &self.deal.deal_stage,
            Column::SalesRepId => &self.deal.sales_rep_id,
            Column::Industry => &self.deal.industry,
            Column::Region => &self.deal.region,
            Column::ProductType => &self.deal.product_type,
            Column::LeadSource => &self.deal.lead_source,
            Column::AcvBucket => return self.acv_bucket.label().to_string(),
            Column::CycleBucket => return self.cycle_bucket.label().to_string(),
            Column::CreatedQuarter => {
                return self
                    .created_quarter
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string())
            }
            Column::DealAmount => {
                return self
                    .deal
                    .deal_amount
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string())
            }
            Column::SalesCycleDays => {
                return self
                    .cycle_days
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string())
            }
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            UNKNOWN.to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn numeric(&self, column: Column) -> Option<f64> {
        match column {
            Column::DealAmount => self.deal.deal_amount.filter(|v| v.is_finite()),
            Column::SalesCycleDays => self.cycle_days.map(|d| d as f64),
            _ => None,
        }
    }

    /// Whether the driver value is populated for this deal.
    pub fn is_known(&self, column: Column) -> bool {
        match column.kind() {
            ColumnKind::Numeric => self.numeric(column).is_some(),
            ColumnKind::Categorical => self.category(column) != UNKNOWN,
        }
    }
}

/// Derive features for every row. Pure: the same input always yields the same output.
pub fn derive_features(deals: &[Deal]) -> Vec<EnrichedDeal> {
    deals.iter().map(EnrichedDeal::from_deal).collect()
}
