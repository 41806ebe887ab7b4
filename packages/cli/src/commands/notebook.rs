use anyhow::Result;

use super::print_json;
use crate::app::App;
use crate::OutputFormat;

pub fn run_list(app: &App, format: &OutputFormat) -> Result<()> {
    let notebooks = app.storage.notebooks().list()?;
    let default_id = app.storage.settings().default_notebook()?;

    match format {
        OutputFormat::Json => print_json(&notebooks)?,
        OutputFormat::Plain => {
            if notebooks.is_empty() {
                println!("(no notebooks)");
            }
            for nb in &notebooks {
                let marker = if default_id.as_deref() == Some(nb.id.as_str()) { "* " } else { "  " };
                println!("{}{}  {} ({} questions)", marker, nb.id, nb.name, nb.question_count);
            }
        }
    }
    Ok(())
}

pub fn run_create(app: &App, name: &str, description: &str, format: &OutputFormat) -> Result<()> {
    let notebook = app.storage.notebooks().create(name, description)?;
    match format {
        OutputFormat::Json => print_json(&notebook)?,
        OutputFormat::Plain => println!("Created notebook {} ({})", notebook.name, notebook.id),
    }
    Ok(())
}

pub fn run_show(app: &App, key: &str, format: &OutputFormat) -> Result<()> {
    let notebook = app.find_notebook(key)?;
    let records = app.storage.wrong_questions().list_by_notebook(&notebook.id)?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "notebook": notebook,
            "records": records,
        }))?,
        OutputFormat::Plain => {
            println!("{} ({} questions)", notebook.name, records.len());
            let ids: Vec<String> = records.iter().map(|r| r.question_id.clone()).collect();
            let questions = app.registry.find_questions(&ids);
            for record in &records {
                let loaded = questions.iter().any(|q| q.id == record.question_id);
                let missing = if loaded { "" } else { " [bank not loaded]" };
                println!(
                    "  #{} {} x{} {}{}",
                    record.id,
                    record.question_id,
                    record.error_count,
                    record.mastery_level.as_str(),
                    missing
                );
                if !record.user_remark.is_empty() {
                    println!("      {}", record.user_remark);
                }
            }
        }
    }
    Ok(())
}

pub fn run_delete(app: &App, key: &str) -> Result<()> {
    let notebook = app.find_notebook(key)?;
    let removed = app.storage.notebooks().delete(&notebook.id)?;
    println!("Deleted notebook {} and {} records", notebook.name, removed);
    Ok(())
}
