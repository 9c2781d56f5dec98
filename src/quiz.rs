//! Quiz engine.
//!
//! A [`QuizSession`] walks `Loading -> Presenting(i) -> Submitted`, or ends in
//! `NotAvailable` when the module has no quiz. Scoring is
//! `round(100 * correct / total)`; an unanswered question is simply wrong.
//! A score of [`PASS_THRESHOLD`] or more earns a certificate.
//!
//! Learners either drive a [`QuizRuns`] entry question by question, or post a
//! complete answer sheet to [`submit_attempt`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::catalog;
use crate::certificate;
use crate::error::ApiError;
use crate::models::{Certificate, Question, Quiz, QuizSubmission};
use crate::progress;
use crate::session::Session;
use crate::store::Store;

pub const PASS_THRESHOLD: i32 = 70;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuizError {
    #[error("no quiz is available for this module")]
    NotAvailable,
    #[error("the quiz is not accepting answers")]
    NotPresenting,
    #[error("unknown question `{0}`")]
    UnknownQuestion(String),
    #[error("question `{question}` has no option `{option}`")]
    UnknownOption { question: String, option: String },
    #[error("question index {0} is out of range")]
    OutOfRange(usize),
    #[error("submit from the last question")]
    NotOnLastQuestion,
    #[error("{0} question(s) still unanswered")]
    Unanswered(usize),
    #[error("only a failed attempt can be retaken")]
    RetakeNotAllowed,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QuestionReview {
    pub question_id: String,
    pub selected: Option<String>,
    pub correct_option: Option<String>,
    pub is_correct: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QuizResult {
    pub score: i32,
    pub correct: usize,
    pub total: usize,
    pub passed: bool,
    pub review: Vec<QuestionReview>,
}

/// Grades `answers` (question id -> option id) against `quiz`.
pub fn grade(quiz: &Quiz, answers: &HashMap<String, String>) -> QuizResult {
    let review: Vec<QuestionReview> = quiz
        .questions
        .iter()
        .map(|q| {
            let selected = answers.get(&q.id).cloned();
            let correct_option = q.correct_option().map(|o| o.id.clone());
            let is_correct = matches!((&selected, &correct_option), (Some(s), Some(c)) if s == c);
            QuestionReview {
                question_id: q.id.clone(),
                selected,
                correct_option,
                is_correct,
            }
        })
        .collect();
    let correct = review.iter().filter(|r| r.is_correct).count();
    let total = quiz.questions.len();
    let score = score(correct, total);
    QuizResult {
        score,
        correct,
        total,
        passed: score >= PASS_THRESHOLD,
        review,
    }
}

pub fn score(correct: usize, total: usize) -> i32 {
    if total == 0 {
        return 0;
    }
    (100.0 * correct as f64 / total as f64).round() as i32
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuizState {
    Loading,
    NotAvailable,
    Presenting { index: usize },
    Submitted(QuizResult),
}

#[derive(Debug, Clone)]
pub struct QuizSession {
    quiz: Option<Quiz>,
    answers: HashMap<String, String>,
    state: QuizState,
}

impl Default for QuizSession {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizSession {
    pub fn new() -> Self {
        Self {
            quiz: None,
            answers: HashMap::new(),
            state: QuizState::Loading,
        }
    }

    pub fn load(&mut self, quiz: Option<Quiz>) {
        self.answers.clear();
        self.state = match &quiz {
            Some(q) if !q.questions.is_empty() => QuizState::Presenting { index: 0 },
            _ => QuizState::NotAvailable,
        };
        self.quiz = quiz;
    }

    pub fn state(&self) -> &QuizState {
        &self.state
    }

    pub fn answers(&self) -> &HashMap<String, String> {
        &self.answers
    }

    fn presenting(&self) -> Result<(&Quiz, usize), QuizError> {
        match (&self.state, &self.quiz) {
            (QuizState::Presenting { index }, Some(q)) => Ok((q, *index)),
            (QuizState::NotAvailable, _) => Err(QuizError::NotAvailable),
            _ => Err(QuizError::NotPresenting),
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        let (quiz, index) = self.presenting().ok()?;
        quiz.questions.get(index)
    }

    pub fn select(&mut self, question_id: &str, option_id: &str) -> Result<(), QuizError> {
        let (quiz, _) = self.presenting()?;
        let question = quiz
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| QuizError::UnknownQuestion(question_id.to_string()))?;
        if !question.options.iter().any(|o| o.id == option_id) {
            return Err(QuizError::UnknownOption {
                question: question_id.to_string(),
                option: option_id.to_string(),
            });
        }
        self.answers.insert(question_id.to_string(), option_id.to_string());
        Ok(())
    }

    /// Moves forward, stopping at the last question.
    pub fn next(&mut self) -> Result<usize, QuizError> {
        let (quiz, index) = self.presenting()?;
        let index = (index + 1).min(quiz.questions.len() - 1);
        self.state = QuizState::Presenting { index };
        Ok(index)
    }

    /// Moves back, stopping at the first question.
    pub fn previous(&mut self) -> Result<usize, QuizError> {
        let (_, index) = self.presenting()?;
        let index = index.saturating_sub(1);
        self.state = QuizState::Presenting { index };
        Ok(index)
    }

    pub fn jump(&mut self, index: usize) -> Result<(), QuizError> {
        let (quiz, _) = self.presenting()?;
        if index >= quiz.questions.len() {
            return Err(QuizError::OutOfRange(index));
        }
        self.state = QuizState::Presenting { index };
        Ok(())
    }

    pub fn unanswered(&self) -> usize {
        self.quiz.as_ref().map_or(0, |q| {
            q.questions
                .iter()
                .filter(|question| !self.answers.contains_key(&question.id))
                .count()
        })
    }

    pub fn submit(&mut self) -> Result<QuizResult, QuizError> {
        let (quiz, index) = self.presenting()?;
        if index + 1 != quiz.questions.len() {
            return Err(QuizError::NotOnLastQuestion);
        }
        let missing = self.unanswered();
        if missing > 0 {
            return Err(QuizError::Unanswered(missing));
        }
        let result = grade(quiz, &self.answers);
        self.state = QuizState::Submitted(result.clone());
        Ok(result)
    }

    /// Full retake after a failed attempt: answers are dropped, back to question 0.
    pub fn retake(&mut self) -> Result<(), QuizError> {
        match &self.state {
            QuizState::Submitted(r) if !r.passed => {
                self.answers.clear();
                self.state = QuizState::Presenting { index: 0 };
                Ok(())
            }
            _ => Err(QuizError::RetakeNotAllowed),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LearnerOption {
    pub id: String,
    pub text: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LearnerQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<LearnerOption>,
}

/// A quiz as shown to learners: the correct flags are not sent.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LearnerQuiz {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub pass_threshold: i32,
    pub questions: Vec<LearnerQuestion>,
}

fn learner_question(q: &Question) -> LearnerQuestion {
    LearnerQuestion {
        id: q.id.clone(),
        text: q.text.clone(),
        options: q
            .options
            .iter()
            .map(|o| LearnerOption { id: o.id.clone(), text: o.text.clone() })
            .collect(),
    }
}

pub fn learner_view(quiz: &Quiz) -> LearnerQuiz {
    LearnerQuiz {
        id: quiz.id,
        module_id: quiz.module_id,
        title: quiz.title.clone(),
        pass_threshold: PASS_THRESHOLD,
        questions: quiz.questions.iter().map(learner_question).collect(),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuizAvailability {
    Available { quiz: LearnerQuiz },
    NotAvailable,
}

async fn unlocked(store: &dyn Store, session: &Session, module_id: Uuid) -> Result<(), ApiError> {
    let module = catalog::module_for_learner(store, session, module_id).await?;
    if !progress::is_module_finished(store, session, &module).await? {
        return Err(ApiError::Locked("complete every section before taking the quiz".into()));
    }
    Ok(())
}

pub async fn quiz_for_learner(
    store: &dyn Store,
    session: &Session,
    module_id: Uuid,
) -> Result<QuizAvailability, ApiError> {
    unlocked(store, session, module_id).await?;
    Ok(match store.quiz_for_module(module_id).await? {
        Some(q) if !q.questions.is_empty() => QuizAvailability::Available { quiz: learner_view(&q) },
        _ => QuizAvailability::NotAvailable,
    })
}

#[derive(Serialize, Debug, Clone)]
pub struct AttemptOutcome {
    #[serde(flatten)]
    pub result: QuizResult,
    pub certificate: Option<Certificate>,
}

async fn settle(
    store: &dyn Store,
    session: &Session,
    module_id: Uuid,
    result: QuizResult,
    now: DateTime<Utc>,
) -> Result<AttemptOutcome, ApiError> {
    let certificate = if result.passed {
        Some(certificate::issue(store, session.user_id, module_id, result.score, now).await?)
    } else {
        None
    };
    tracing::info!(
        user = %session.user_id,
        module = %module_id,
        score = result.score,
        passed = result.passed,
        "quiz submitted"
    );
    Ok(AttemptOutcome { result, certificate })
}

fn not_available() -> ApiError {
    ApiError::not_found("quiz for this module")
}

/// Grades a full answer sheet and, on a pass, issues the certificate.
///
/// Every call is a fresh attempt: nothing from an earlier submission is kept,
/// so posting again after a fail is the retake.
///
/// Grading writes nothing, so the certificate upsert is the only write. If it
/// fails the whole attempt fails and the learner is not told they passed; a
/// resubmission is safe because the upsert is keyed on (learner, module).
pub async fn submit_attempt(
    store: &dyn Store,
    session: &Session,
    module_id: Uuid,
    submission: &QuizSubmission,
    now: DateTime<Utc>,
) -> Result<AttemptOutcome, ApiError> {
    unlocked(store, session, module_id).await?;

    let mut run = QuizSession::new();
    run.load(store.quiz_for_module(module_id).await?);
    if run.state() == &QuizState::NotAvailable {
        return Err(not_available());
    }
    for (question, option) in &submission.answers {
        run.select(question, option)?;
    }
    let last = run.quiz.as_ref().map(|q| q.questions.len().saturating_sub(1));
    if let Some(last) = last {
        run.jump(last)?;
    }
    let result = run.submit()?;
    settle(store, session, module_id, result, now).await
}

/// What a learner sees of their in-flight quiz run.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunView {
    NotAvailable,
    Presenting {
        index: usize,
        total: usize,
        question: LearnerQuestion,
        selected: Option<String>,
        unanswered: usize,
    },
    Submitted {
        result: QuizResult,
    },
}

fn run_view(run: &QuizSession) -> RunView {
    match (run.state(), run.current_question()) {
        (QuizState::Presenting { index }, Some(q)) => RunView::Presenting {
            index: *index,
            total: run.quiz.as_ref().map_or(0, |quiz| quiz.questions.len()),
            question: learner_question(q),
            selected: run.answers().get(&q.id).cloned(),
            unanswered: run.unanswered(),
        },
        (QuizState::Submitted(result), _) => RunView::Submitted { result: result.clone() },
        _ => RunView::NotAvailable,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Next,
    Previous,
    To(usize),
}

/// In-flight quiz runs, one per (learner, module). Held in process memory;
/// a restart drops unfinished runs, which only costs the learner their
/// unsubmitted answers.
#[derive(Default)]
pub struct QuizRuns {
    runs: Mutex<HashMap<(Uuid, Uuid), QuizSession>>,
}

impl QuizRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the module's quiz and starts at the first question, replacing any
    /// earlier run.
    pub async fn start(&self, store: &dyn Store, session: &Session, module_id: Uuid) -> Result<RunView, ApiError> {
        unlocked(store, session, module_id).await?;
        let mut run = QuizSession::new();
        run.load(store.quiz_for_module(module_id).await?);
        let view = run_view(&run);
        self.runs.lock().await.insert((session.user_id, module_id), run);
        Ok(view)
    }

    pub async fn view(&self, session: &Session, module_id: Uuid) -> Result<RunView, ApiError> {
        let runs = self.runs.lock().await;
        let run = runs.get(&(session.user_id, module_id)).ok_or_else(no_run)?;
        Ok(run_view(run))
    }

    pub async fn answer(
        &self,
        session: &Session,
        module_id: Uuid,
        question_id: &str,
        option_id: &str,
    ) -> Result<RunView, ApiError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&(session.user_id, module_id)).ok_or_else(no_run)?;
        run.select(question_id, option_id)?;
        Ok(run_view(run))
    }

    pub async fn step(&self, session: &Session, module_id: Uuid, step: Step) -> Result<RunView, ApiError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&(session.user_id, module_id)).ok_or_else(no_run)?;
        match step {
            Step::Next => {
                run.next()?;
            }
            Step::Previous => {
                run.previous()?;
            }
            Step::To(index) => run.jump(index)?,
        }
        Ok(run_view(run))
    }

    /// Grades the run and, on a pass, issues the certificate. A failed
    /// certificate write puts the run back so the learner can submit again.
    pub async fn submit(
        &self,
        store: &dyn Store,
        session: &Session,
        module_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome, ApiError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&(session.user_id, module_id)).ok_or_else(no_run)?;
        if run.state() == &QuizState::NotAvailable {
            return Err(not_available());
        }
        let before = run.clone();
        let result = run.submit()?;
        match settle(store, session, module_id, result, now).await {
            Ok(out) => Ok(out),
            Err(e) => {
                *run = before;
                Err(e)
            }
        }
    }

    /// Restarts a failed run at the first question with no answers.
    pub async fn retake(&self, session: &Session, module_id: Uuid) -> Result<RunView, ApiError> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&(session.user_id, module_id)).ok_or_else(no_run)?;
        run.retake()?;
        Ok(run_view(run))
    }
}

fn no_run() -> ApiError {
    ApiError::not_found("quiz run (start the quiz first)")
}
