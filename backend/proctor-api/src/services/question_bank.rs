use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use serde::Deserialize;
use std::path::Path;

use crate::models::{Question, QuestionError};

const EMBEDDED_BANK: &str = include_str!("../../data/question_bank.json");

/// Source of the question set for a new attempt.
pub trait QuestionBank: Send + Sync {
    fn generate(&self, skills: &[String], count: usize) -> Result<Vec<Question>, QuestionError>;
}

#[derive(Debug, Clone, Deserialize)]
struct Topic {
    skill: String,
    questions: Vec<Question>,
}

#[derive(Debug, Clone, Deserialize)]
struct BankFile {
    topics: Vec<Topic>,
    generic: Vec<Question>,
}

/// Skill-keyed knowledge base with a generic fallback pool.
#[derive(Debug, Clone)]
pub struct StaticQuestionBank {
    topics: Vec<Topic>,
    generic: Vec<Question>,
}

impl StaticQuestionBank {
    pub fn embedded() -> Result<Self, QuestionError> {
        Self::from_json(EMBEDDED_BANK)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, QuestionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| QuestionError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, QuestionError> {
        let file: BankFile =
            serde_json::from_str(raw).map_err(|e| QuestionError::Load(e.to_string()))?;
        Self::new(
            file.topics
                .into_iter()
                .map(|topic| (topic.skill, topic.questions))
                .collect(),
            file.generic,
        )
    }

    /// Topic order is kept; it decides which key wins a partial match.
    pub fn new(
        topics: Vec<(String, Vec<Question>)>,
        generic: Vec<Question>,
    ) -> Result<Self, QuestionError> {
        if generic.is_empty() {
            return Err(QuestionError::EmptyBank);
        }
        let topics: Vec<Topic> = topics
            .into_iter()
            .map(|(skill, questions)| Topic {
                skill: normalize_skill(&skill),
                questions,
            })
            .collect();

        for question in topics
            .iter()
            .flat_map(|topic| topic.questions.iter())
            .chain(generic.iter())
        {
            question.validate()?;
        }

        tracing::debug!(
            topics = topics.len(),
            generic = generic.len(),
            "question bank loaded"
        );
        Ok(Self { topics, generic })
    }

    fn topic_for(&self, skill: &str) -> Option<&Topic> {
        if skill.is_empty() {
            return None;
        }
        self.topics
            .iter()
            .find(|topic| topic.skill == skill)
            .or_else(|| {
                self.topics
                    .iter()
                    .find(|topic| topic.skill.contains(skill) || skill.contains(&topic.skill))
            })
    }

    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        skills: &[String],
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Question>, QuestionError> {
        if count == 0 {
            return Err(QuestionError::InvalidCount(count));
        }

        let matched: Vec<&Question> = skills
            .iter()
            .map(|skill| normalize_skill(skill))
            .filter_map(|skill| self.topic_for(&skill))
            .flat_map(|topic| topic.questions.iter())
            .collect();

        let mut selected: Vec<&Question> = if matched.len() >= count {
            matched.choose_multiple(rng, count).copied().collect()
        } else {
            let mut selected = matched;
            while selected.len() < count {
                let needed = (count - selected.len()).min(self.generic.len());
                selected.extend(self.generic.choose_multiple(rng, needed));
            }
            selected
        };
        selected.shuffle(rng);

        Ok(selected
            .into_iter()
            .map(|question| shuffle_options(question, rng))
            .collect())
    }
}

impl QuestionBank for StaticQuestionBank {
    fn generate(&self, skills: &[String], count: usize) -> Result<Vec<Question>, QuestionError> {
        self.generate_with(skills, count, &mut rand::rng())
    }
}

fn normalize_skill(skill: &str) -> String {
    skill.trim().to_lowercase()
}

fn shuffle_options<R: Rng + ?Sized>(question: &Question, rng: &mut R) -> Question {
    let mut order: Vec<usize> = (0..question.options.len()).collect();
    order.shuffle(rng);

    let correct_index = order
        .iter()
        .position(|&original| original == question.correct_index)
        .unwrap_or(question.correct_index);

    Question {
        text: question.text.clone(),
        options: order
            .iter()
            .map(|&original| question.options[original].clone())
            .collect(),
        correct_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn q(text: &str, correct: usize) -> Question {
        Question::new(
            text,
            vec!["w".into(), "x".into(), "y".into(), "z".into()],
            correct,
        )
        .unwrap()
    }

    fn correct_text(question: &Question) -> &str {
        &question.options[question.correct_index]
    }

    fn small_bank() -> StaticQuestionBank {
        StaticQuestionBank::new(
            vec![
                ("Rust".into(), vec![q("r1", 0), q("r2", 1), q("r3", 2)]),
                ("machine learning".into(), vec![q("ml1", 3)]),
            ],
            vec![q("g1", 0), q("g2", 1)],
        )
        .unwrap()
    }

    #[test]
    fn embedded_bank_is_valid() {
        let bank = StaticQuestionBank::embedded().unwrap();
        let questions = bank
            .generate(&["Python".to_string(), " SQL ".to_string()], 10)
            .unwrap();
        assert_eq!(questions.len(), 10);
        for question in &questions {
            question.validate().unwrap();
        }
    }

    #[test]
    fn enough_skill_questions_are_sampled_without_replacement() {
        let bank = small_bank();
        let mut rng = StdRng::seed_from_u64(7);

        let questions = bank
            .generate_with(&["rust".to_string()], 3, &mut rng)
            .unwrap();

        let texts: HashSet<_> = questions.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, HashSet::from(["r1", "r2", "r3"]));
    }

    #[test]
    fn partial_match_and_generic_top_up() {
        let bank = small_bank();
        let mut rng = StdRng::seed_from_u64(11);

        let questions = bank
            .generate_with(&["Machine".to_string()], 6, &mut rng)
            .unwrap();

        assert_eq!(questions.len(), 6);
        assert!(questions.iter().any(|q| q.text == "ml1"));
        // Generic pool has two questions, so they repeat to fill the set.
        let generic = questions.iter().filter(|q| q.text.starts_with('g')).count();
        assert_eq!(generic, 5);
    }

    #[test]
    fn unknown_skills_fall_back_to_generic_pool() {
        let bank = small_bank();
        let mut rng = StdRng::seed_from_u64(3);

        let questions = bank
            .generate_with(&["cobol".to_string(), "".to_string()], 2, &mut rng)
            .unwrap();

        assert!(questions.iter().all(|q| q.text.starts_with('g')));
    }

    #[test]
    fn option_shuffle_keeps_the_correct_answer() {
        let bank = small_bank();
        let mut rng = StdRng::seed_from_u64(42);

        for question in bank
            .generate_with(&["rust".to_string()], 3, &mut rng)
            .unwrap()
        {
            let original = ["r1", "r2", "r3"]
                .iter()
                .position(|t| *t == question.text)
                .unwrap();
            let expected = ["w", "x", "y"][original];
            assert_eq!(correct_text(&question), expected);
        }
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            small_bank().generate(&[], 0),
            Err(QuestionError::InvalidCount(0))
        );
        assert!(matches!(
            StaticQuestionBank::new(vec![], vec![]),
            Err(QuestionError::EmptyBank)
        ));
        assert!(matches!(
            StaticQuestionBank::from_json("{ not json"),
            Err(QuestionError::Load(_))
        ));

        let duplicate = Question {
            text: "dup".into(),
            options: vec!["a".into(), "a".into()],
            correct_index: 0,
        };
        assert!(matches!(
            StaticQuestionBank::new(vec![], vec![duplicate]),
            Err(QuestionError::DuplicateOption { .. })
        ));
    }
}
