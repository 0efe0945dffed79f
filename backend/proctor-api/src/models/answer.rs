use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// What the candidate chose for one question. Serialized as the option index
/// or `null` for "unanswered".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<usize>", into = "Option<usize>")]
pub enum Selection {
    Option(usize),
    Unanswered,
}

impl Selection {
    pub fn index(self) -> Option<usize> {
        match self {
            Selection::Option(index) => Some(index),
            Selection::Unanswered => None,
        }
    }

    pub fn is_answered(self) -> bool {
        matches!(self, Selection::Option(_))
    }
}

impl From<Option<usize>> for Selection {
    fn from(value: Option<usize>) -> Self {
        value.map_or(Selection::Unanswered, Selection::Option)
    }
}

impl From<Selection> for Option<usize> {
    fn from(value: Selection) -> Self {
        value.index()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_index: usize,
    pub selected: Selection,
    pub correct_index: usize,
    pub recorded_at: DateTime<Utc>,
}

impl AnswerRecord {
    pub fn is_correct(&self) -> bool {
        self.selected == Selection::Option(self.correct_index)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SelectOptionRequest {
    #[validate(range(max = 1000, message = "question_index out of range"))]
    pub question_index: usize,
    /// `null` withdraws a previous selection.
    #[validate(range(max = 64, message = "option_index out of range"))]
    pub option_index: Option<usize>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdvanceRequest {
    #[validate(range(max = 1000, message = "question_index out of range"))]
    pub question_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_serializes_as_nullable_index() {
        assert_eq!(serde_json::to_string(&Selection::Option(2)).unwrap(), "2");
        assert_eq!(serde_json::to_string(&Selection::Unanswered).unwrap(), "null");
        let parsed: Selection = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Selection::Unanswered);
    }

    #[test]
    fn unanswered_is_never_correct() {
        let record = AnswerRecord {
            question_index: 0,
            selected: Selection::Unanswered,
            correct_index: 0,
            recorded_at: Utc::now(),
        };
        assert!(!record.is_correct());
    }
}
