//! Policy-quality scoring against a fixed 4 × 5 rubric.
//!
//! The rubric's structure (sections, item names, thresholds) is owned here.
//! Per-item values come from the LLM and are only validated. Anything that
//! fails validation yields [`default_evaluation`], so [`score`] never fails.

use serde_json::Value;

use crate::errors::AppError;
use crate::json_extract::parse_json_object;
use crate::models::{EvaluationSection, EvaluationSections, PolicyEvaluation, RubricItemScore};

pub const ITEMS_PER_SECTION: usize = 5;
pub const MAX_TOTAL_SCORE: f64 = 20.0;

pub struct RubricSection {
    pub key: &'static str,
    pub title: &'static str,
    pub items: [&'static str; ITEMS_PER_SECTION],
}

pub const RUBRIC: [RubricSection; 4] = [
    RubricSection {
        key: "content",
        title: "Coverage content",
        items: [
            "Coverage breadth",
            "Benefit amounts",
            "Exclusion clarity",
            "Waiting period",
            "Renewability",
        ],
    },
    RubricSection {
        key: "pricing",
        title: "Pricing",
        items: [
            "Premium level",
            "Premium stability",
            "Cost per unit of coverage",
            "Payment options",
            "Hidden costs",
        ],
    },
    RubricSection {
        key: "company",
        title: "Insurer",
        items: [
            "Financial strength",
            "Claims reputation",
            "Customer service",
            "Market presence",
            "Regulatory record",
        ],
    },
    RubricSection {
        key: "flexibility",
        title: "Flexibility",
        items: [
            "Available riders",
            "Coverage adjustment",
            "Beneficiary changes",
            "Cancellation terms",
            "Conversion options",
        ],
    },
];

const DEFAULT_TOTAL_SCORE: f64 = 12.0;
const DEFAULT_ITEM_SCORES: [f64; ITEMS_PER_SECTION] = [1.0, 0.5, 0.5, 0.5, 0.5];
const DEFAULT_REASON: &str = "Automatic evaluation unavailable; neutral default score applied.";

/// Scores raw LLM output. Never fails: unusable output gives the default.
pub fn score(raw_llm_output: &str) -> PolicyEvaluation {
    match try_score(raw_llm_output) {
        Ok(evaluation) => evaluation,
        Err(e) => {
            tracing::warn!("Policy evaluation fell back to default: {}", e);
            default_evaluation()
        }
    }
}

/// Same as [`score`] but reports why the output was rejected.
pub fn try_score(raw_llm_output: &str) -> Result<PolicyEvaluation, AppError> {
    let value = parse_json_object(raw_llm_output)?;
    evaluation_from_value(&value)
}

pub fn evaluation_from_value(value: &Value) -> Result<PolicyEvaluation, AppError> {
    let reported_total = value
        .get("totalScore")
        .and_then(Value::as_f64)
        .ok_or_else(|| AppError::Validation("missing numeric totalScore".to_string()))?;

    let sections_value = value.get("sections").unwrap_or(value);
    let [content, pricing, company, flexibility] = [0, 1, 2, 3].map(|idx| {
        let rubric = &RUBRIC[idx];
        validate_section(rubric, sections_value.get(rubric.key))
    });
    let sections = EvaluationSections {
        content: content?,
        pricing: pricing?,
        company: company?,
        flexibility: flexibility?,
    };

    let total_score: f64 = sections.iter().map(|s| s.score).sum();
    if (total_score - reported_total).abs() > f64::EPSILON {
        tracing::debug!(
            "LLM reported totalScore {} but items sum to {}; using item sum",
            reported_total,
            total_score
        );
    }
    let star_rating = star_rating(total_score);

    let recommendation = value
        .get("recommendation")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_recommendation(star_rating).to_string());

    Ok(PolicyEvaluation {
        total_score,
        star_rating,
        recommendation,
        sections,
        strengths: string_list(value.get("strengths")),
        weaknesses: string_list(value.get("weaknesses")),
        suggestions: string_list(value.get("suggestions")),
    })
}

fn validate_section(
    rubric: &RubricSection,
    section: Option<&Value>,
) -> Result<EvaluationSection, AppError> {
    let items = section
        .and_then(|s| s.get("items"))
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Validation(format!("section '{}' missing items", rubric.key)))?;

    if items.len() != ITEMS_PER_SECTION {
        return Err(AppError::Validation(format!(
            "section '{}' has {} items, expected {}",
            rubric.key,
            items.len(),
            ITEMS_PER_SECTION
        )));
    }

    let mut scored = Vec::with_capacity(ITEMS_PER_SECTION);
    for (name, item) in rubric.items.iter().zip(items) {
        let item_score = item
            .get("score")
            .and_then(Value::as_f64)
            .filter(|s| is_allowed_item_score(*s))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "item '{}' in section '{}' has a score outside {{0, 0.5, 1}}",
                    name, rubric.key
                ))
            })?;
        let reason = item
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        scored.push(RubricItemScore {
            name: name.to_string(),
            score: item_score,
            reason,
        });
    }

    Ok(EvaluationSection {
        score: scored.iter().map(|i| i.score).sum(),
        items: scored,
    })
}

fn is_allowed_item_score(score: f64) -> bool {
    score == 0.0 || score == 0.5 || score == 1.0
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Star rating for a total score.
///
/// `>=16 → 5`, `[13,16) → 4`, `[8,13) → 3`, `[6,8) → 2`, otherwise 1.
pub fn star_rating(total_score: f64) -> u8 {
    if total_score >= 16.0 {
        5
    } else if total_score >= 13.0 {
        4
    } else if total_score >= 8.0 {
        3
    } else if total_score >= 6.0 {
        2
    } else {
        1
    }
}

fn default_recommendation(stars: u8) -> &'static str {
    match stars {
        5 => "Excellent policy; worth keeping.",
        4 => "Good policy with minor gaps.",
        3 => "Average policy; compare alternatives before renewing.",
        2 => "Below average; review coverage gaps with an advisor.",
        _ => "Weak policy; consider replacing it.",
    }
}

/// The fixed fallback evaluation: total 12, three stars.
pub fn default_evaluation() -> PolicyEvaluation {
    let section = |rubric: &RubricSection| EvaluationSection {
        score: DEFAULT_ITEM_SCORES.iter().sum(),
        items: rubric
            .items
            .iter()
            .zip(DEFAULT_ITEM_SCORES)
            .map(|(name, score)| RubricItemScore {
                name: name.to_string(),
                score,
                reason: DEFAULT_REASON.to_string(),
            })
            .collect(),
    };

    PolicyEvaluation {
        total_score: DEFAULT_TOTAL_SCORE,
        star_rating: star_rating(DEFAULT_TOTAL_SCORE),
        recommendation: default_recommendation(3).to_string(),
        sections: EvaluationSections {
            content: section(&RUBRIC[0]),
            pricing: section(&RUBRIC[1]),
            company: section(&RUBRIC[2]),
            flexibility: section(&RUBRIC[3]),
        },
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        suggestions: vec![
            "Re-run the evaluation or review the policy terms manually.".to_string(),
        ],
    }
}

/// Rubric description embedded in the evaluation prompt.
pub fn rubric_instructions() -> String {
    let mut out = String::new();
    for section in &RUBRIC {
        out.push_str(&format!("\"{}\" ({}):\n", section.key, section.title));
        for (idx, item) in section.items.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", idx + 1, item));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn section_json(scores: [f64; 5]) -> Value {
        json!({
            "items": scores
                .iter()
                .map(|s| json!({"name": "ignored", "score": s, "reason": "because"}))
                .collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_default_evaluation_is_consistent() {
        let d = default_evaluation();
        assert_eq!(d.total_score, 12.0);
        assert_eq!(d.star_rating, 3);
        let sum: f64 = d.sections.iter().map(|s| s.score).sum();
        assert_eq!(sum, d.total_score);
        assert!(d.sections.iter().all(|s| s.items.len() == 5));
        assert_eq!(d, default_evaluation());
    }

    #[test]
    fn test_star_thresholds() {
        assert_eq!(star_rating(20.0), 5);
        assert_eq!(star_rating(16.0), 5);
        assert_eq!(star_rating(15.5), 4);
        assert_eq!(star_rating(15.0), 4);
        assert_eq!(star_rating(13.0), 4);
        assert_eq!(star_rating(12.5), 3);
        assert_eq!(star_rating(8.0), 3);
        assert_eq!(star_rating(7.5), 2);
        assert_eq!(star_rating(7.0), 2);
        assert_eq!(star_rating(6.0), 2);
        assert_eq!(star_rating(5.5), 1);
        assert_eq!(star_rating(0.0), 1);
    }

    #[test]
    fn test_section_scores_recomputed_from_items() {
        let value = json!({
            "totalScore": 99,
            "sections": {
                "content": section_json([1.0, 1.0, 1.0, 0.5, 0.0]),
                "pricing": section_json([0.5; 5]),
                "company": section_json([1.0; 5]),
                "flexibility": section_json([0.0; 5]),
            }
        });
        let eval = evaluation_from_value(&value).unwrap();
        assert_eq!(eval.sections.content.score, 3.5);
        assert_eq!(eval.sections.pricing.score, 2.5);
        assert_eq!(eval.total_score, 11.0);
        assert_eq!(eval.star_rating, 3);
        assert_eq!(eval.sections.content.items[0].name, "Coverage breadth");
    }

    #[test]
    fn test_top_level_sections_accepted() {
        let value = json!({
            "totalScore": 20,
            "content": section_json([1.0; 5]),
            "pricing": section_json([1.0; 5]),
            "company": section_json([1.0; 5]),
            "flexibility": section_json([1.0; 5]),
        });
        assert_eq!(evaluation_from_value(&value).unwrap().star_rating, 5);
    }

    #[test]
    fn test_invalid_item_score_rejected() {
        let value = json!({
            "totalScore": 10,
            "sections": {
                "content": section_json([1.0, 0.7, 1.0, 1.0, 1.0]),
                "pricing": section_json([0.5; 5]),
                "company": section_json([0.5; 5]),
                "flexibility": section_json([0.5; 5]),
            }
        });
        let err = evaluation_from_value(&value).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_wrong_item_count_falls_back() {
        let raw = json!({
            "totalScore": 4,
            "sections": {
                "content": {"items": [{"score": 1}]},
                "pricing": section_json([1.0; 5]),
                "company": section_json([1.0; 5]),
                "flexibility": section_json([1.0; 5]),
            }
        })
        .to_string();
        assert_eq!(score(&raw), default_evaluation());
    }

    #[test]
    fn test_missing_total_score_falls_back() {
        let raw = json!({
            "sections": {
                "content": section_json([1.0; 5]),
                "pricing": section_json([1.0; 5]),
                "company": section_json([1.0; 5]),
                "flexibility": section_json([1.0; 5]),
            }
        })
        .to_string();
        assert!(matches!(try_score(&raw), Err(AppError::Validation(_))));
        assert_eq!(score(&raw).total_score, 12.0);
    }

    #[test]
    fn test_rubric_instructions_list_every_item() {
        let text = rubric_instructions();
        for section in &RUBRIC {
            assert!(text.contains(section.key));
            for item in section.items {
                assert!(text.contains(item));
            }
        }
    }
}
