//! Plain-English recommendation text.
//!
//! One template per decision status, filled only with numbers already
//! present in the decision record — the recommender never invents figures,
//! and the wording stays factual rather than confident.  Percentages are
//! conversion-rate points rendered with three decimals.

use crate::decision::{Decision, DecisionStatus, RopeAnalysis};
use crate::proxy::EngagementComparison;

/// Everything the templates may reference.
#[derive(Debug, Clone)]
pub struct RecommendationInputs<'a> {
    pub decision: &'a Decision,
    pub rope: Option<&'a RopeAnalysis>,
    /// Variant keys in snapshot order.
    pub variants: &'a [String],
    /// Index of the leading (minimum expected loss) variant.
    pub leader_index: usize,
    pub probability_best: &'a [f64],
    pub total_visitors: u64,
    pub total_conversions: u64,
    pub hdi_mass: f64,
    pub min_total_n: u64,
    /// Present when engagement scores exist for at least two variants.
    pub engagement: Option<&'a EngagementComparison>,
}

fn pct(rate: f64) -> String {
    format!("{:.3}%", rate * 100.0)
}

fn engagement_sentence(cmp: &EngagementComparison) -> String {
    format!(
        " Engagement favors {} over {} ({:.3} vs {:.3}), which usually predicts better conversion.",
        cmp.best, cmp.worst, cmp.best_mean, cmp.worst_mean
    )
}

/// Render the recommendation for a decision.
pub fn recommendation_text(inputs: &RecommendationInputs<'_>) -> String {
    let d = inputs.decision;
    let leader = &inputs.variants[inputs.leader_index];
    let mass_pct = inputs.hdi_mass * 100.0;

    match d.decision_status {
        DecisionStatus::CollectingData => {
            if inputs.total_visitors == 0 {
                return format!(
                    "No visitors recorded yet. Traffic is split evenly across {} variants; \
                     check back once visitors start arriving.",
                    inputs.variants.len()
                );
            }
            let mut text = format!(
                "Collecting data: {} visitors and {} conversions so far. \
                 More data is needed before any comparison is meaningful (minimum {} visitors).",
                inputs.total_visitors, inputs.total_conversions, inputs.min_total_n
            );
            if let Some(cmp) = inputs.engagement {
                text.push_str(&engagement_sentence(cmp));
            }
            if let Some(days) = d.estimated_days {
                text.push_str(&format!(" Roughly {days} more day(s) at the recent traffic rate."));
            }
            text
        }

        DecisionStatus::KeepTesting => {
            let p_best = inputs.probability_best[inputs.leader_index] * 100.0;
            let mut text = format!(
                "Keep testing: {} leads with a {:.0}% chance of being best, but the result is \
                 not conclusive yet (expected regret {} vs the {} threshold). \
                 More data is needed after {} visitors.",
                leader,
                p_best,
                pct(d.leading_variant_loss),
                pct(d.epsilon_threshold),
                inputs.total_visitors
            );
            if inputs.total_conversions <= 2 {
                if let Some(cmp) = inputs.engagement {
                    text.push_str(&engagement_sentence(cmp));
                }
            }
            if let Some(days) = d.estimated_days {
                text.push_str(&format!(" Roughly {days} more day(s) at the recent traffic rate."));
            }
            text
        }

        DecisionStatus::ReadyToShip => {
            format!(
                "Ship {}: expected regret if wrong is {}, below the {} threshold, and the \
                 {:.0}% HDI of the difference excludes zero. Based on {} visitors and {} \
                 conversions.",
                leader,
                pct(d.leading_variant_loss),
                pct(d.epsilon_threshold),
                mass_pct,
                inputs.total_visitors,
                inputs.total_conversions
            )
        }

        DecisionStatus::PracticallyEquivalent => {
            let hdi = inputs.rope.map(|r| r.hdi).unwrap_or((0.0, 0.0));
            let rope = inputs.rope.map(|r| r.rope.1).unwrap_or(0.0);
            format!(
                "The variants are practically equivalent: after {} visitors, the {:.0}% HDI of \
                 the difference [{}, {}] sits inside the ±{} region of practical equivalence. \
                 Pick on other grounds (cost, simplicity, preference).",
                inputs.total_visitors,
                mass_pct,
                pct(hdi.0),
                pct(hdi.1),
                pct(rope)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::RopeOutcome;

    fn decision(status: DecisionStatus) -> Decision {
        Decision {
            decision_status: status,
            winning_variant: match status {
                DecisionStatus::ReadyToShip => Some("b".to_string()),
                _ => None,
            },
            leading_variant_loss: 0.0012,
            epsilon_threshold: 0.005,
            confidence_pct: 100.0,
            estimated_days: None,
        }
    }

    fn base_inputs<'a>(
        d: &'a Decision,
        variants: &'a [String],
        probability_best: &'a [f64],
    ) -> RecommendationInputs<'a> {
        RecommendationInputs {
            decision: d,
            rope: None,
            variants,
            leader_index: 1,
            probability_best,
            total_visitors: 2_000,
            total_conversions: 130,
            hdi_mass: 0.95,
            min_total_n: 30,
            engagement: None,
        }
    }

    #[test]
    fn ship_template_names_the_winner_and_numbers() {
        let variants = vec!["a".to_string(), "b".to_string()];
        let d = decision(DecisionStatus::ReadyToShip);
        let text = recommendation_text(&base_inputs(&d, &variants, &[0.02, 0.98]));
        assert!(text.starts_with("Ship b:"), "{text}");
        assert!(text.contains("0.120%"), "{text}");
        assert!(text.contains("0.500% threshold"), "{text}");
        assert!(text.contains("95% HDI"), "{text}");
        assert!(text.contains("2000 visitors"), "{text}");
    }

    #[test]
    fn keep_testing_mentions_more_data() {
        let variants = vec!["a".to_string(), "b".to_string()];
        let d = decision(DecisionStatus::KeepTesting);
        let text = recommendation_text(&base_inputs(&d, &variants, &[0.25, 0.75]));
        assert!(text.contains("More data"), "{text}");
        assert!(text.contains("b leads"), "{text}");
        assert!(text.contains("75% chance"), "{text}");
    }

    #[test]
    fn collecting_data_with_zero_visitors_explains_the_lack_of_data() {
        let variants = vec!["a".to_string(), "b".to_string()];
        let d = decision(DecisionStatus::CollectingData);
        let mut inputs = base_inputs(&d, &variants, &[0.5, 0.5]);
        inputs.total_visitors = 0;
        inputs.total_conversions = 0;
        let text = recommendation_text(&inputs);
        assert!(text.contains("No visitors"), "{text}");
    }

    #[test]
    fn sparse_conversions_surface_engagement() {
        let variants = vec!["a".to_string(), "b".to_string()];
        let d = decision(DecisionStatus::KeepTesting);
        let cmp = EngagementComparison {
            best: "b".to_string(),
            worst: "a".to_string(),
            best_mean: 0.40,
            worst_mean: 0.10,
        };
        let mut inputs = base_inputs(&d, &variants, &[0.2, 0.8]);
        inputs.total_conversions = 0;
        inputs.engagement = Some(&cmp);
        let text = recommendation_text(&inputs);
        assert!(text.contains("Engagement favors b"), "{text}");
    }

    #[test]
    fn equivalence_template_quotes_rope_and_hdi() {
        let variants = vec!["a".to_string(), "b".to_string()];
        let d = decision(DecisionStatus::PracticallyEquivalent);
        let rope = RopeAnalysis {
            rope: (-0.005, 0.005),
            hdi: (-0.003, 0.004),
            decision: RopeOutcome::Equivalent,
        };
        let mut inputs = base_inputs(&d, &variants, &[0.5, 0.5]);
        inputs.rope = Some(&rope);
        let text = recommendation_text(&inputs);
        assert!(text.contains("practically equivalent"), "{text}");
        assert!(text.contains("-0.300%"), "{text}");
        assert!(text.contains("0.400%"), "{text}");
        assert!(text.contains("±0.500%"), "{text}");
    }

    #[test]
    fn estimated_days_are_quoted_when_present() {
        let variants = vec!["a".to_string(), "b".to_string()];
        let mut d = decision(DecisionStatus::KeepTesting);
        d.estimated_days = Some(12);
        let text = recommendation_text(&base_inputs(&d, &variants, &[0.3, 0.7]));
        assert!(text.contains("12 more day(s)"), "{text}");
    }
}
