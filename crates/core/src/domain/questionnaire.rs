use crate::domain::risk::{classify_score, RiskTier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum obtainable score per question. The question bank is validated at
/// authoring time so option scores stay within 1..=MAX_SCORE_PER_QUESTION,
/// which keeps `max_score = question_count * 3` honest.
pub const MAX_SCORE_PER_QUESTION: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub question_text: String,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub question_id: i64,
    pub value: String,
    pub label: String,
    pub score: i32,
}

/// One raw answer as submitted: a question plus either an option id or the
/// option's short code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAnswer {
    pub question_id: i64,
    #[serde(default)]
    pub selected_option_id: Option<i64>,
    #[serde(default)]
    pub selected_value: Option<String>,
}

/// Outcome of the ordered resolution chain for a single answer.
///
/// Unresolved answers score 0 by policy; keeping that case explicit here is
/// what makes the silent-zero rule visible and testable.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerResolution {
    Resolved {
        option_id: i64,
        value: String,
        score: i32,
    },
    Unresolved {
        raw_value: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredAnswer {
    pub question_id: i64,
    pub option_id: Option<i64>,
    pub selected_value: String,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreOutcome {
    pub total_score: i32,
    pub max_score: i32,
    pub risk_tier: RiskTier,
    pub answers: Vec<ScoredAnswer>,
}

/// Resolve one answer against the question bank.
///
/// Order: option id lookup, then (question id, value) lookup, then
/// unresolved with the raw value (empty string when none was given).
pub fn resolve_answer(questions: &[Question], answer: &RawAnswer) -> AnswerResolution {
    if let Some(opt_id) = answer.selected_option_id {
        for q in questions {
            if let Some(opt) = q.options.iter().find(|o| o.id == opt_id) {
                return AnswerResolution::Resolved {
                    option_id: opt.id,
                    value: opt.value.clone(),
                    score: opt.score,
                };
            }
        }
    }

    if let Some(value) = answer.selected_value.as_deref() {
        if let Some(q) = questions.iter().find(|q| q.id == answer.question_id) {
            if let Some(opt) = q.options.iter().find(|o| o.value == value) {
                return AnswerResolution::Resolved {
                    option_id: opt.id,
                    value: opt.value.clone(),
                    score: opt.score,
                };
            }
        }
    }

    AnswerResolution::Unresolved {
        raw_value: answer.selected_value.clone().unwrap_or_default(),
    }
}

/// Score a full questionnaire against the current question bank.
///
/// Pure: persistence and profile updates happen in the storage layer.
/// `max_score` is always derived from the bank passed in, so re-scoring a
/// submission after the bank changed yields the new maximum.
pub fn score_questionnaire(questions: &[Question], answers: &[RawAnswer]) -> ScoreOutcome {
    let max_score = questions.len() as i32 * MAX_SCORE_PER_QUESTION;

    let mut total_score = 0;
    let mut scored = Vec::with_capacity(answers.len());
    for answer in answers {
        let (option_id, selected_value, score) = match resolve_answer(questions, answer) {
            AnswerResolution::Resolved {
                option_id,
                value,
                score,
            } => (Some(option_id), value, score),
            AnswerResolution::Unresolved { raw_value } => (None, raw_value, 0),
        };
        total_score += score;
        scored.push(ScoredAnswer {
            question_id: answer.question_id,
            option_id,
            selected_value,
            score,
        });
    }

    ScoreOutcome {
        total_score,
        max_score,
        risk_tier: classify_score(total_score, max_score),
        answers: scored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> Vec<Question> {
        (1..=5)
            .map(|qid| Question {
                id: qid,
                question_text: format!("Question {qid}"),
                options: (1..=3)
                    .map(|s| QuestionOption {
                        id: qid * 10 + s,
                        question_id: qid,
                        value: format!("opt{s}"),
                        label: format!("Option {s}"),
                        score: s as i32,
                    })
                    .collect(),
            })
            .collect()
    }

    fn answer_by_value(qid: i64, value: &str) -> RawAnswer {
        RawAnswer {
            question_id: qid,
            selected_option_id: None,
            selected_value: Some(value.to_string()),
        }
    }

    #[test]
    fn resolves_by_option_id_first() {
        let bank = bank();
        let ans = RawAnswer {
            question_id: 1,
            selected_option_id: Some(13),
            // A stale value that would resolve to score 1; the id wins.
            selected_value: Some("opt1".to_string()),
        };
        match resolve_answer(&bank, &ans) {
            AnswerResolution::Resolved {
                option_id, score, ..
            } => {
                assert_eq!(option_id, 13);
                assert_eq!(score, 3);
            }
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_question_and_value_lookup() {
        let bank = bank();
        let ans = answer_by_value(2, "opt2");
        match resolve_answer(&bank, &ans) {
            AnswerResolution::Resolved { option_id, score, .. } => {
                assert_eq!(option_id, 22);
                assert_eq!(score, 2);
            }
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn unknown_question_scores_zero_with_raw_value() {
        let bank = bank();
        let ans = answer_by_value(999, "opt3");
        assert_eq!(
            resolve_answer(&bank, &ans),
            AnswerResolution::Unresolved {
                raw_value: "opt3".to_string()
            }
        );

        let outcome = score_questionnaire(&bank, &[ans]);
        assert_eq!(outcome.total_score, 0);
        assert_eq!(outcome.max_score, 15);
        assert_eq!(outcome.answers[0].option_id, None);
        assert_eq!(outcome.answers[0].selected_value, "opt3");
    }

    #[test]
    fn answer_with_neither_id_nor_value_stores_empty_string() {
        let bank = bank();
        let ans = RawAnswer {
            question_id: 1,
            selected_option_id: None,
            selected_value: None,
        };
        let outcome = score_questionnaire(&bank, &[ans]);
        assert_eq!(outcome.answers[0].score, 0);
        assert_eq!(outcome.answers[0].selected_value, "");
    }

    #[test]
    fn five_questions_all_score_two_is_moderate() {
        // total=10, max=15, pct=0.667 -> moderate.
        let bank = bank();
        let answers: Vec<RawAnswer> = (1..=5).map(|qid| answer_by_value(qid, "opt2")).collect();
        let outcome = score_questionnaire(&bank, &answers);
        assert_eq!(outcome.total_score, 10);
        assert_eq!(outcome.max_score, 15);
        assert_eq!(outcome.risk_tier, RiskTier::Moderate);
    }

    #[test]
    fn total_stays_within_bounds_for_valid_banks() {
        let bank = bank();
        let answers: Vec<RawAnswer> = (1..=5).map(|qid| answer_by_value(qid, "opt3")).collect();
        let outcome = score_questionnaire(&bank, &answers);
        assert!(outcome.total_score >= 0);
        assert!(outcome.total_score <= outcome.max_score);
        assert_eq!(outcome.max_score, bank.len() as i32 * MAX_SCORE_PER_QUESTION);
        assert_eq!(outcome.risk_tier, RiskTier::High);
    }

    #[test]
    fn rescoring_against_a_changed_bank_recomputes_max_score() {
        // Replacing a submission re-scores against the live bank: answers
        // for removed questions drop to unresolved score 0 and max_score
        // follows the new question count.
        let answers: Vec<RawAnswer> = (1..=5).map(|qid| answer_by_value(qid, "opt3")).collect();

        let original = score_questionnaire(&bank(), &answers);
        assert_eq!(original.total_score, 15);
        assert_eq!(original.max_score, 15);

        let mut shrunk = bank();
        shrunk.retain(|q| q.id != 5);
        let rescored = score_questionnaire(&shrunk, &answers);
        assert_eq!(rescored.max_score, 12);
        assert_eq!(rescored.total_score, 12);
        let orphan = &rescored.answers[4];
        assert_eq!(orphan.question_id, 5);
        assert_eq!(orphan.option_id, None);
        assert_eq!(orphan.score, 0);

        let mut grown = bank();
        grown.push(Question {
            id: 6,
            question_text: "Question 6".to_string(),
            options: Vec::new(),
        });
        assert_eq!(score_questionnaire(&grown, &answers).max_score, 18);
    }

    #[test]
    fn empty_bank_defaults_to_low() {
        let outcome = score_questionnaire(&[], &[answer_by_value(1, "opt1")]);
        assert_eq!(outcome.max_score, 0);
        assert_eq!(outcome.total_score, 0);
        assert_eq!(outcome.risk_tier, RiskTier::Low);
    }
}
