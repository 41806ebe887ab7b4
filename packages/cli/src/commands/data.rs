use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use shuati_store::archive::{self, ExportOptions};
use shuati_store::StorageError;

use super::bank::write_output;
use super::print_json;
use crate::app::{confirm, App};
use crate::OutputFormat;

const OVERWRITE_PROMPT: &str = "Importing replaces all local notebooks, records, progress and settings. Continue?";

pub fn run_export(app: &App, output: Option<PathBuf>, include_banks: bool) -> Result<()> {
    let bytes = archive::export_complete(&app.storage, ExportOptions { include_banks })?;
    let output = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "quiz_data_{}.zip",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ))
    });
    write_output(&output, &bytes)?;
    println!("Exported {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

pub fn run_import(app: &mut App, file: &Path, yes: bool, format: &OutputFormat) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let is_db = file
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("db"));

    let result = if is_db {
        archive::import_user_data(&app.storage, &bytes, || confirm(OVERWRITE_PROMPT, yes)).map(|report| {
            archive::CompleteImportReport {
                user_data: Some(report),
                banks: Vec::new(),
            }
        })
    } else {
        archive::import_complete(&app.storage, &mut app.registry, &bytes, || {
            confirm(OVERWRITE_PROMPT, yes)
        })
    };

    let report = match result {
        Ok(report) => report,
        Err(StorageError::Cancelled) => {
            println!("Import cancelled, local data unchanged");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    print_import_report(&report, format)
}

pub(crate) fn print_import_report(
    report: &archive::CompleteImportReport,
    format: &OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Plain => {
            if let Some(user) = &report.user_data {
                println!(
                    "Imported {} notebooks, {} wrong questions, {} progress, {} settings",
                    user.notebooks, user.wrong_questions, user.progress, user.settings
                );
                if user.merged_notebooks > 0 {
                    println!("Merged {} notebooks into same-name notebooks", user.merged_notebooks);
                }
                if !user.missing_tables.is_empty() {
                    println!("Not in archive: {}", user.missing_tables.join(", "));
                }
            }
            for outcome in &report.banks {
                match &outcome.error {
                    None => println!("bank ok    {}", outcome.filename),
                    Some(err) => println!("bank fail  {}: {}", outcome.filename, err),
                }
            }
        }
    }
    Ok(())
}

pub fn run_clear(app: &mut App, yes: bool) -> Result<()> {
    if !confirm("Delete all banks, notebooks, records, progress and settings?", yes) {
        bail!("Aborted");
    }
    archive::clear_all_data(&app.storage, &mut app.registry)?;
    println!("All data cleared");
    Ok(())
}
