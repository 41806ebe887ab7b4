use anyhow::{bail, Result};

use shuati_store::SavedProgress;

use super::print_json;
use crate::app::{confirm, App};
use crate::OutputFormat;

pub fn run_show(app: &App, format: &OutputFormat) -> Result<()> {
    let progress = app.storage.progress();
    let snapshot = progress.load_resumable()?;
    let saved = progress.load_manual()?;
    let stats = app.storage.settings().practice_stats()?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "progress": snapshot,
            "saved": saved,
            "stats": stats,
        }))?,
        OutputFormat::Plain => {
            match &snapshot {
                Some(s) => println!(
                    "Practice in progress: question {} of {} ({} remaining), saved {}",
                    s.current_question_index + 1,
                    s.practice_questions.len(),
                    s.remaining(),
                    s.saved_at.format("%Y-%m-%d %H:%M")
                ),
                None => println!("No saved practice"),
            }
            match &saved {
                Some(SavedProgress::Practice(s)) => println!(
                    "Manually saved practice: question {} of {}, saved {}",
                    s.current_question_index + 1,
                    s.practice_questions.len(),
                    s.saved_at.format("%Y-%m-%d %H:%M")
                ),
                Some(SavedProgress::Exam(e)) => println!(
                    "Manually saved exam {}: {} of {} answered, {}s left, saved {}",
                    e.selected_paper,
                    e.exam_answers.len(),
                    e.exam_questions.len(),
                    e.time_left.max(0),
                    e.saved_at.format("%Y-%m-%d %H:%M")
                ),
                None => {}
            }
            println!(
                "Answered {}, wrong {}, accuracy {}%",
                stats.practice_count, stats.wrong_count, stats.accuracy
            );
        }
    }
    Ok(())
}

pub fn run_clear(app: &App) -> Result<()> {
    app.storage.progress().clear()?;
    println!("Saved progress cleared");
    Ok(())
}

/// Keep the current practice session as the manually saved progress
pub fn run_save(app: &App) -> Result<()> {
    let progress = app.storage.progress();
    let Some(snapshot) = progress.load_resumable()? else {
        bail!("No practice in progress");
    };
    progress.save_manual(&SavedProgress::Practice(snapshot))?;
    println!("Progress saved");
    Ok(())
}

/// Restore the manually saved practice as the current session
pub fn run_load(app: &App, yes: bool) -> Result<()> {
    let progress = app.storage.progress();
    let saved = match progress.load_manual()? {
        Some(saved) => saved,
        None => bail!("No saved progress"),
    };

    match saved {
        SavedProgress::Practice(snapshot) => {
            let prompt = format!(
                "Load practice saved {}? The current session is replaced.",
                snapshot.saved_at.format("%Y-%m-%d %H:%M")
            );
            if !confirm(&prompt, yes) {
                println!("Load cancelled");
                return Ok(());
            }
            progress.save(&snapshot)?;
            println!(
                "Practice restored at question {} of {}",
                snapshot.current_question_index + 1,
                snapshot.practice_questions.len()
            );
        }
        SavedProgress::Exam(exam) => {
            println!(
                "Saved exam {} is resumed with `shuati exam answer` or `shuati exam submit`",
                exam.selected_paper
            );
        }
    }
    Ok(())
}

pub fn run_discard(app: &App) -> Result<()> {
    if app.storage.progress().clear_manual()? {
        println!("Manually saved progress discarded");
    } else {
        println!("No saved progress");
    }
    Ok(())
}
