use anyhow::{bail, Result};

use shuati_store::{Answer, NewWrongQuestion, QuestionType, WrongQuestionUpdate};

use crate::app::{parse_mastery, App};

pub fn run_add(
    app: &App,
    question_id: &str,
    notebook: Option<&str>,
    answer: Option<&str>,
    remark: Option<String>,
    mastery: Option<&str>,
) -> Result<()> {
    let notebook = match notebook {
        Some(key) => app.find_notebook(key)?,
        None => app.default_notebook()?,
    };

    let question_type = app
        .registry
        .find_questions(&[question_id.to_string()])
        .first()
        .map(|q| q.question_type);

    let input = NewWrongQuestion {
        question_id: question_id.to_string(),
        notebook_id: notebook.id.clone(),
        user_answer: answer.map(|raw| parse_answer(raw, question_type)),
        mastery_level: parse_mastery(mastery)?,
        remark,
    };
    let id = app.storage.wrong_questions().save(&input)?;
    println!("Saved {} to {} (record #{})", question_id, notebook.name, id);
    Ok(())
}

pub fn run_remove(app: &App, id: i64) -> Result<()> {
    if !app.storage.wrong_questions().remove(id)? {
        bail!("Record #{} not found", id);
    }
    println!("Removed record #{}", id);
    Ok(())
}

pub fn run_remark(
    app: &App,
    id: i64,
    text: Option<String>,
    reason: Option<String>,
    mastery: Option<&str>,
) -> Result<()> {
    let update = WrongQuestionUpdate {
        remark: text,
        error_reason: reason,
        mastery_level: parse_mastery(mastery)?,
    };
    app.storage.wrong_questions().update(id, &update)?;
    println!("Updated record #{}", id);
    Ok(())
}

/// Multi-answer questions (or comma separated input) become a label list
pub(crate) fn parse_answer(raw: &str, question_type: Option<QuestionType>) -> Answer {
    let labels: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    match question_type {
        Some(QuestionType::Multi) => Answer::Labels(labels),
        Some(_) => Answer::Label(raw.trim().to_string()),
        None if labels.len() > 1 => Answer::Labels(labels),
        None => Answer::Label(raw.trim().to_string()),
    }
}
