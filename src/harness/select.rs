//! Deterministic candidate selection.

use crate::types::{Candidate, Review};

const WEIGHTS: [(&str, f64); 5] = [
    ("correctness", 0.45),
    ("constraint_adherence", 0.25),
    ("completeness", 0.15),
    ("clarity", 0.10),
    ("safety", 0.05),
];

const MAJOR_ISSUE_PENALTY: f64 = 1.5;

/// Weighted score for one review. Missing subscores count as zero; each
/// major issue subtracts a flat penalty.
pub fn weighted_score(review: &Review) -> f64 {
    let weighted: f64 = WEIGHTS
        .iter()
        .map(|(dim, w)| review.subscores.get(*dim).copied().unwrap_or(0.0) * w)
        .sum();
    weighted - MAJOR_ISSUE_PENALTY * review.major_issues.len() as f64
}

/// Index of the best-scoring pair. Ties resolve to the earliest candidate
/// in generation order.
pub fn select_best(scored: &[(Candidate, Review)]) -> usize {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (idx, (_, review)) in scored.iter().enumerate() {
        let score = weighted_score(review);
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn candidate(id: &str) -> Candidate {
        Candidate { id: id.into(), draft_text: format!("draft {id}"), citations: vec![] }
    }

    fn review(all: f64, major_issues: usize) -> Review {
        let subscores: BTreeMap<String, f64> = WEIGHTS
            .iter()
            .map(|(dim, _)| (dim.to_string(), all))
            .collect();
        Review {
            overall_score: all,
            subscores,
            major_issues: (0..major_issues).map(|i| format!("issue {i}")).collect(),
            minor_issues: vec![],
            recommended_repairs: vec![],
            verification_targets: vec![],
            tool_requests: vec![],
        }
    }

    #[test]
    fn one_major_issue_costs_exactly_one_point_five() {
        let clean = weighted_score(&review(9.0, 0));
        let flawed = weighted_score(&review(9.0, 1));
        assert!((clean - 9.0).abs() < 1e-9);
        assert!((clean - flawed - 1.5).abs() < 1e-9);
    }

    #[test]
    fn selection_is_deterministic() {
        let scored = vec![
            (candidate("C1"), review(6.0, 0)),
            (candidate("C2"), review(9.0, 0)),
            (candidate("C3"), review(8.0, 0)),
        ];
        for _ in 0..10 {
            assert_eq!(select_best(&scored), 1);
        }
    }

    #[test]
    fn ties_resolve_to_generation_order() {
        let scored = vec![
            (candidate("C1"), review(8.0, 0)),
            (candidate("C2"), review(8.0, 0)),
        ];
        assert_eq!(select_best(&scored), 0);
    }

    #[test]
    fn missing_subscores_count_as_zero() {
        let sparse = Review {
            overall_score: 5.0,
            subscores: BTreeMap::from([("correctness".to_string(), 10.0)]),
            major_issues: vec![],
            minor_issues: vec![],
            recommended_repairs: vec![],
            verification_targets: vec![],
            tool_requests: vec![],
        };
        assert!((weighted_score(&sparse) - 4.5).abs() < 1e-9);
    }
}
