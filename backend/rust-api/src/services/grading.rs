//! Deterministic scoring of a submitted answer set.
//!
//! Grading has no side effects: the same definition and answers always give
//! the same report, which is what lets the arbiter grade before it commits.

use std::collections::HashSet;
use thiserror::Error;

use crate::models::{
    AnswerValue, Answers, GradeReport, Question, QuestionScore, QuestionType, QuizDefinition,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradingError {
    #[error("Question {question_id} has invalid marks: {marks}")]
    InvalidMarks { question_id: String, marks: f64 },
    #[error("Question {question_id} must have exactly one correct option, found {found}")]
    AmbiguousKey { question_id: String, found: usize },
    #[error("Multi-choice question {0} has no correct options")]
    NoCorrectOptions(String),
}

pub fn grade(quiz: &QuizDefinition, answers: &Answers) -> Result<GradeReport, GradingError> {
    let mut questions = Vec::with_capacity(quiz.questions.len());
    let mut total_score = 0.0;
    let mut max_score = 0.0;

    for question in &quiz.questions {
        let answer = answers.get(&question.id).filter(|a| !a.is_blank());
        let score = grade_question(question, answer)?;

        total_score += score;
        max_score += question.marks;
        questions.push(QuestionScore {
            question_id: question.id.clone(),
            score,
            max_score: question.marks,
            answered: answer.is_some(),
        });
    }

    Ok(GradeReport {
        total_score,
        max_score,
        questions,
    })
}

fn grade_question(question: &Question, answer: Option<&AnswerValue>) -> Result<f64, GradingError> {
    if !question.marks.is_finite() || question.marks < 0.0 {
        return Err(GradingError::InvalidMarks {
            question_id: question.id.clone(),
            marks: question.marks,
        });
    }

    match question.question_type {
        QuestionType::SingleChoice | QuestionType::YesNo => grade_single(question, answer),
        QuestionType::MultiChoice => grade_multi(question, answer),
    }
}

fn grade_single(question: &Question, answer: Option<&AnswerValue>) -> Result<f64, GradingError> {
    let correct: Vec<&str> = question.correct_option_ids().collect();
    if correct.len() != 1 {
        return Err(GradingError::AmbiguousKey {
            question_id: question.id.clone(),
            found: correct.len(),
        });
    }

    let Some(answer) = answer else {
        return Ok(0.0);
    };
    let selected = answer.selected_ids();
    if selected.len() != 1 {
        return Ok(0.0);
    }

    let matches = match question.question_type {
        QuestionType::YesNo => selected[0].trim().eq_ignore_ascii_case(correct[0]),
        _ => selected[0] == correct[0],
    };

    Ok(if matches { question.marks } else { 0.0 })
}

/// `marks * (correct_selected - incorrect_selected) / total_correct`, clamped to `[0, marks]`.
fn grade_multi(question: &Question, answer: Option<&AnswerValue>) -> Result<f64, GradingError> {
    let correct: HashSet<&str> = question.correct_option_ids().collect();
    if correct.is_empty() {
        return Err(GradingError::NoCorrectOptions(question.id.clone()));
    }

    let Some(answer) = answer else {
        return Ok(0.0);
    };

    let incorrect: HashSet<&str> = question
        .options
        .iter()
        .filter(|o| !o.is_correct)
        .map(|o| o.id.as_str())
        .collect();

    let selected = answer.selected_ids();
    let selected: HashSet<&str> = selected.iter().map(String::as_str).collect();

    let correct_selected = selected.iter().filter(|id| correct.contains(*id)).count() as f64;
    let incorrect_selected = selected.iter().filter(|id| incorrect.contains(*id)).count() as f64;

    let raw = question.marks * (correct_selected - incorrect_selected) / correct.len() as f64;
    Ok(raw.clamp(0.0, question.marks))
}
