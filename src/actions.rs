use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionEntry {
    pub driver: &'static str,
    pub likely_issues: &'static [&'static str],
    pub suggested_actions: &'static [&'static str],
}

pub const FALLBACK: ActionEntry = ActionEntry {
    driver: "*",
    likely_issues: &[
        "Process inefficiencies",
        "Resource constraints",
        "Competitive pressure",
    ],
    suggested_actions: &[
        "Review segment performance manually",
        "Review sales process",
        "Enablement and training",
        "Competitive analysis",
    ],
};

pub const TAXONOMY: &[ActionEntry] = &[
    ActionEntry {
        driver: "acv_bucket",
        likely_issues: &[
            "Pricing objections",
            "Competitive pressure",
            "Longer procurement cycles",
            "Budget constraints",
        ],
        suggested_actions: &[
            "Exec sponsorship on top 20 deals",
            "Pricing review and competitive analysis",
            "Deal desk involvement earlier",
            "ROI calculator and case studies",
        ],
    },
    ActionEntry {
        driver: "deal_amount",
        likely_issues: &[
            "Pricing objections",
            "Budget constraints",
            "Larger buying committees",
        ],
        suggested_actions: &[
            "Deal desk involvement earlier",
            "Multi-threading into the buying committee",
            "ROI calculator and case studies",
        ],
    },
    ActionEntry {
        driver: "industry",
        likely_issues: &[
            "Industry-specific requirements",
            "Compliance concerns",
            "Budget cycles",
            "Competitive landscape",
        ],
        suggested_actions: &[
            "Industry-specific enablement",
            "Compliance documentation",
            "Timing alignment with budget cycles",
            "Competitive battle cards",
        ],
    },
    ActionEntry {
        driver: "region",
        likely_issues: &[
            "Local competition",
            "Market maturity",
            "Language/cultural barriers",
            "Time zone challenges",
        ],
        suggested_actions: &[
            "Local market analysis",
            "Regional sales support",
            "Localized content and demos",
            "Time zone-aligned coverage",
        ],
    },
    ActionEntry {
        driver: "lead_source",
        likely_issues: &[
            "Lead quality",
            "Intent mismatch",
            "Timing issues",
            "Qualification gaps",
        ],
        suggested_actions: &[
            "Rebalance marketing spend",
            "Tighten MQL→SQL qualification",
            "Improve lead scoring",
            "Better handoff process",
        ],
    },
    ActionEntry {
        driver: "product_type",
        likely_issues: &[
            "Product-market fit",
            "Feature gaps",
            "Integration complexity",
            "Support requirements",
        ],
        suggested_actions: &[
            "Product roadmap alignment",
            "Integration support",
            "Technical enablement",
            "Customer success involvement",
        ],
    },
    ActionEntry {
        driver: "cycle_bucket",
        likely_issues: &[
            "Qualification issues",
            "Chasing bad deals too long",
            "Pricing friction",
            "Process inefficiencies",
        ],
        suggested_actions: &[
            "Improve early-stage disqualification",
            "Tighten MEDDICC / ICP enforcement",
            "Pricing transparency",
            "Streamline approval processes",
        ],
    },
    ActionEntry {
        driver: "sales_cycle_days",
        likely_issues: &[
            "Qualification issues",
            "Chasing bad deals too long",
            "Slow approvals",
        ],
        suggested_actions: &[
            "Improve early-stage disqualification",
            "Set stage exit criteria with time limits",
            "Streamline approval processes",
        ],
    },
    ActionEntry {
        driver: "deal_stage",
        likely_issues: &[
            "Stalled opportunities",
            "Weak discovery",
            "Late-stage competitive displacement",
        ],
        suggested_actions: &[
            "Stage-by-stage conversion review",
            "Deal reviews for late-stage opportunities",
            "Mutual action plans with buyers",
        ],
    },
    ActionEntry {
        driver: "sales_rep_id",
        likely_issues: &[
            "Inconsistent sales execution",
            "Uneven territory quality",
            "Coaching gaps",
        ],
        suggested_actions: &[
            "Targeted rep coaching on qualification",
            "Territory and pipeline rebalancing",
            "Share winning playbooks across the team",
        ],
    },
];

/// Taxonomy entry for `driver`, or [`FALLBACK`] for names the table does not know.
pub fn lookup(driver: &str) -> &'static ActionEntry {
    TAXONOMY
        .iter()
        .find(|entry| entry.driver == driver)
        .unwrap_or(&FALLBACK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Column;

    #[test]
    fn known_drivers_map_to_their_entry() {
        let entry = lookup("lead_source");
        assert_eq!(entry.likely_issues[0], "Lead quality");
        assert_eq!(entry.suggested_actions[0], "Rebalance marketing spend");
    }

    #[test]
    fn unknown_drivers_fall_back_to_manual_review() {
        let entry = lookup("customer_mood");
        assert_eq!(entry.driver, "*");
        assert_eq!(entry.suggested_actions[0], "Review segment performance manually");
    }

    #[test]
    fn lookup_is_exact_not_fuzzy() {
        assert_eq!(lookup("region_code").driver, "*");
    }

    #[test]
    fn every_driver_column_has_a_dedicated_entry() {
        for column in Column::ALL.iter().filter(|c| **c != Column::CreatedQuarter) {
            assert_eq!(lookup(column.name()).driver, column.name());
        }
    }

    #[test]
    fn taxonomy_has_no_duplicate_drivers() {
        let mut names: Vec<&str> = TAXONOMY.iter().map(|e| e.driver).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TAXONOMY.len());
    }
}
