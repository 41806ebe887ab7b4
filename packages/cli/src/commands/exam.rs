use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use shuati_store::{
    is_correct, score_exam, Answer, ExamScore, ExamSnapshot, NewWrongQuestion, Question,
    QuestionType, SavedProgress,
};

use super::print_json;
use super::wrong::parse_answer;
use crate::app::App;
use crate::OutputFormat;

/// Parse QUESTION_ID=LABELS pairs against the exam's questions
fn parse_answers(questions: &[Question], raw_answers: &[String]) -> Result<HashMap<String, Answer>> {
    let types: HashMap<&str, QuestionType> = questions
        .iter()
        .map(|q| (q.id.as_str(), q.question_type))
        .collect();

    let mut answers = HashMap::new();
    for raw in raw_answers {
        let Some((id, labels)) = raw.split_once('=') else {
            bail!("Invalid answer '{}', expected QUESTION_ID=LABELS", raw);
        };
        let id = id.trim();
        answers.insert(id.to_string(), parse_answer(labels, types.get(id).copied()));
    }
    Ok(answers)
}

/// Update practice counters and add wrong answers to the default notebook
fn record_results(app: &App, questions: &[Question], answers: &HashMap<String, Answer>) -> Result<()> {
    let notebook = app.default_notebook()?;
    let settings = app.storage.settings();
    for question in questions.iter().filter(|q| q.question_type != QuestionType::FreeText) {
        let Some(answer) = answers.get(&question.id) else {
            continue;
        };
        let correct = is_correct(question, answer);
        settings.record_answer(correct)?;
        if !correct {
            app.storage.wrong_questions().save(&NewWrongQuestion {
                question_id: question.id.clone(),
                notebook_id: notebook.id.clone(),
                user_answer: Some(answer.clone()),
                ..Default::default()
            })?;
        }
    }
    Ok(())
}

fn print_score(score: &ExamScore, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(score)?,
        OutputFormat::Plain => {
            println!(
                "Score: {} / {} ({}%)",
                score.earned, score.total, score.percentage
            );
            println!(
                "Correct: {} of {} questions",
                score.correct_count, score.question_count
            );
        }
    }
    Ok(())
}

pub fn run_score(
    app: &App,
    banks: &[String],
    raw_answers: &[String],
    record: bool,
    format: &OutputFormat,
) -> Result<()> {
    for bank_id in banks {
        if !app.registry.contains(bank_id) {
            bail!("Bank '{}' is not imported", bank_id);
        }
    }

    let questions = app.registry.questions(banks, None, false);
    let answers = parse_answers(&questions, raw_answers)?;
    let score = score_exam(&questions, &answers);

    if record {
        record_results(app, &questions, &answers)?;
    }
    print_score(&score, format)
}

fn saved_exam(app: &App) -> Result<ExamSnapshot> {
    match app.storage.progress().load_manual()? {
        Some(SavedProgress::Exam(exam)) => Ok(exam),
        Some(SavedProgress::Practice(_)) => {
            bail!("The saved progress is a practice session, not an exam")
        }
        None => bail!("No saved exam, start one with `shuati exam start`"),
    }
}

fn print_exam_status(exam: &ExamSnapshot, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(exam)?,
        OutputFormat::Plain => {
            println!(
                "Exam {}: {} of {} answered, {}:{:02} left",
                exam.selected_paper,
                exam.exam_answers.len(),
                exam.exam_questions.len(),
                exam.time_left.max(0) / 60,
                exam.time_left.max(0) % 60
            );
            if exam.is_timed_out() {
                println!("Time is up, run `shuati exam submit`");
            }
        }
    }
    Ok(())
}

/// Start an exam on one bank and keep it as the saved progress
pub fn run_start(
    app: &App,
    bank_id: &str,
    minutes: Option<i64>,
    format: &OutputFormat,
) -> Result<()> {
    let info = app
        .registry
        .info(bank_id)
        .cloned()
        .with_context(|| format!("Bank '{}' is not imported", bank_id))?;
    let questions = app.registry.bank_questions(bank_id)?;
    if questions.is_empty() {
        bail!("Bank '{}' has no questions", bank_id);
    }

    let exam = ExamSnapshot {
        exam_questions: questions,
        exam_answers: Default::default(),
        current_question_index: 0,
        selected_paper: info.id.clone(),
        time_left: minutes.unwrap_or(info.time_limit).max(1) * 60,
        selected_paper_info: Some(info),
        saved_at: Utc::now(),
        exam_started: true,
    };
    app.storage.progress().save_manual(&SavedProgress::Exam(exam.clone()))?;
    print_exam_status(&exam, format)
}

/// Record answers into the saved exam and deduct the elapsed time
pub fn run_answer(
    app: &App,
    raw_answers: &[String],
    elapsed: Option<i64>,
    format: &OutputFormat,
) -> Result<()> {
    let mut exam = saved_exam(app)?;
    if exam.is_timed_out() {
        bail!("Time is up, run `shuati exam submit`");
    }

    let answers = parse_answers(&exam.exam_questions, raw_answers)?;
    for (id, answer) in answers {
        let index = exam
            .exam_questions
            .iter()
            .position(|q| q.id == id)
            .with_context(|| format!("Question '{}' is not in this exam", id))?;
        exam.answer(index, answer);
        exam.current_question_index = index;
    }
    if let Some(seconds) = elapsed {
        exam.time_left -= seconds.max(0);
    }
    exam.saved_at = Utc::now();

    app.storage.progress().save_manual(&SavedProgress::Exam(exam.clone()))?;
    print_exam_status(&exam, format)
}

/// Score the saved exam and discard it
pub fn run_submit(app: &App, record: bool, format: &OutputFormat) -> Result<()> {
    let exam = saved_exam(app)?;
    let answers = exam.answers_by_question();
    let score = score_exam(&exam.exam_questions, &answers);

    if record {
        record_results(app, &exam.exam_questions, &answers)?;
    }
    app.storage.progress().clear_manual()?;
    print_score(&score, format)
}
