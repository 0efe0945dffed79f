use std::collections::BTreeMap;

use crate::models::{AnswerRecord, Question, QuestionBreakdown, ScoreReport, Selection};

/// Scores a frozen answer set. Questions without a record count as unanswered.
///
/// Panics if `answers` holds an index outside `questions`; sessions never
/// produce such a map.
pub fn score(
    questions: &[Question],
    answers: &BTreeMap<usize, AnswerRecord>,
    pass_threshold: usize,
) -> ScoreReport {
    assert!(
        answers.keys().all(|&index| index < questions.len()),
        "answer recorded for a question outside the session"
    );

    let breakdown: Vec<QuestionBreakdown> = questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            let selected = answers
                .get(&index)
                .map_or(Selection::Unanswered, |record| record.selected);
            QuestionBreakdown {
                question_index: index,
                selected,
                correct_index: question.correct_index,
                is_correct: selected == Selection::Option(question.correct_index),
            }
        })
        .collect();

    let score = breakdown.iter().filter(|b| b.is_correct).count();
    let total = questions.len();
    let percentage = if total == 0 {
        0.0
    } else {
        score as f64 / total as f64 * 100.0
    };

    ScoreReport {
        score,
        total,
        percentage,
        passed: score >= pass_threshold,
        breakdown,
    }
}
