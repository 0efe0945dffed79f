use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "question")]
    pub text: String,
    pub options: Vec<String>,
    #[serde(alias = "correct")]
    pub correct_index: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionError {
    #[error("question {text:?} has {count} options, at least 2 are required")]
    TooFewOptions { text: String, count: usize },

    #[error("question {text:?} repeats option {option:?}")]
    DuplicateOption { text: String, option: String },

    #[error("question {text:?} marks option {index} correct but has {count} options")]
    CorrectIndexOutOfRange {
        text: String,
        index: usize,
        count: usize,
    },

    #[error("question bank is empty")]
    EmptyBank,

    #[error("requested {0} questions, at least one is required")]
    InvalidCount(usize),

    #[error("failed to load question bank: {0}")]
    Load(String),
}

impl Question {
    pub fn new(
        text: impl Into<String>,
        options: Vec<String>,
        correct_index: usize,
    ) -> Result<Self, QuestionError> {
        let question = Self {
            text: text.into(),
            options,
            correct_index,
        };
        question.validate()?;
        Ok(question)
    }

    pub fn validate(&self) -> Result<(), QuestionError> {
        if self.options.len() < 2 {
            return Err(QuestionError::TooFewOptions {
                text: self.text.clone(),
                count: self.options.len(),
            });
        }

        let mut seen = HashSet::with_capacity(self.options.len());
        for option in &self.options {
            if !seen.insert(option.as_str()) {
                return Err(QuestionError::DuplicateOption {
                    text: self.text.clone(),
                    option: option.clone(),
                });
            }
        }

        if self.correct_index >= self.options.len() {
            return Err(QuestionError::CorrectIndexOutOfRange {
                text: self.text.clone(),
                index: self.correct_index,
                count: self.options.len(),
            });
        }

        Ok(())
    }

    pub fn option_count(&self) -> usize {
        self.options.len()
    }
}
