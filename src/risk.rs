use serde::Serialize;

use crate::features::EnrichedDeal;
use crate::fitter::DriverModel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenDealRisk {
    pub deal_id: String,
    pub sales_rep_id: String,
    pub amount: f64,
    pub win_probability: f64,
    /// ACV expected to be lost: amount × (1 − win probability).
    pub revenue_at_risk: f64,
}

/// Score every open deal with the recent-period model, riskiest revenue first.
pub fn score_open_deals(deals: &[EnrichedDeal], model: &DriverModel) -> Vec<OpenDealRisk> {
    let mut scores: Vec<OpenDealRisk> = deals
        .iter()
        .filter(|d| d.deal.is_open())
        .map(|d| {
            let win_probability = model.predict_win_probability(d);
            let amount = d.acv();
            OpenDealRisk {
                deal_id: d.deal.deal_id.clone(),
                sales_rep_id: d.deal.sales_rep_id.clone(),
                amount,
                win_probability,
                revenue_at_risk: amount * (1.0 - win_probability),
            }
        })
        .collect();

    scores.sort_by(|a, b| {
        b.revenue_at_risk
            .total_cmp(&a.revenue_at_risk)
            .then_with(|| a.deal_id.cmp(&b.deal_id))
    });
    scores
}

pub fn total_revenue_at_risk(scores: &[OpenDealRisk]) -> f64 {
    scores.iter().map(|s| s.revenue_at_risk).sum()
}
