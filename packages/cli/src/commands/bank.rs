use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use shuati_store::importer;

use super::print_json;
use crate::app::App;
use crate::OutputFormat;

pub fn run_import(app: &mut App, files: &[PathBuf], format: &OutputFormat) -> Result<()> {
    let mut outcomes = Vec::new();
    for file in files {
        let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let results = importer::import_banks(&app.storage, &mut app.registry, &bytes, &filename)
            .with_context(|| format!("Failed to import {}", file.display()))?;
        outcomes.extend(results);
    }

    match format {
        OutputFormat::Json => print_json(&outcomes)?,
        OutputFormat::Plain => {
            for outcome in &outcomes {
                match (&outcome.info, &outcome.error) {
                    (Some(info), _) => println!(
                        "ok    {} -> {} ({} questions)",
                        outcome.filename, info.name, info.question_count
                    ),
                    (None, error) => println!(
                        "fail  {}: {}",
                        outcome.filename,
                        error.as_deref().unwrap_or("unknown error")
                    ),
                }
            }
            let ok = outcomes.iter().filter(|o| o.success).count();
            println!("{} of {} banks imported", ok, outcomes.len());
        }
    }
    Ok(())
}

pub fn run_list(app: &App, format: &OutputFormat) -> Result<()> {
    let banks = app.registry.bank_infos();

    match format {
        OutputFormat::Json => print_json(&banks)?,
        OutputFormat::Plain => {
            if banks.is_empty() {
                println!("(no banks)");
            }
            for bank in &banks {
                let mode = if bank.is_exam_mode {
                    format!(" [exam, {} min]", bank.time_limit)
                } else {
                    String::new()
                };
                println!(
                    "{}  {} ({} questions, {} images){}",
                    bank.id,
                    bank.name,
                    bank.question_count,
                    app.registry.bank_images(&bank.id).len(),
                    mode
                );
            }
        }
    }
    Ok(())
}

pub fn run_delete(app: &mut App, bank_id: &str) -> Result<()> {
    importer::delete_bank(&app.storage, &mut app.registry, bank_id)?;
    println!("Deleted bank {}", bank_id);
    Ok(())
}

pub fn run_export(app: &App, bank_id: &str, output: Option<PathBuf>) -> Result<()> {
    let bytes = importer::export_bank(&app.storage, bank_id)?;
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.zip", bank_id)));
    write_output(&output, &bytes)?;
    println!("Exported {} to {}", bank_id, output.display());
    Ok(())
}

pub(crate) fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
