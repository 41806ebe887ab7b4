use anyhow::{Context, Result};

use super::print_json;
use crate::app::App;
use crate::OutputFormat;

pub fn run_get(app: &App, key: &str) -> Result<()> {
    let value = app
        .storage
        .settings()
        .get_value(key)?
        .with_context(|| format!("Setting '{}' is not set", key))?;
    println!("{}", value);
    Ok(())
}

pub fn run_set(app: &App, key: &str, raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    app.storage.settings().set(key, &value)?;
    println!("{} = {}", key, value);
    Ok(())
}

pub fn run_list(app: &App, format: &OutputFormat) -> Result<()> {
    let all = app.storage.settings().all()?;
    match format {
        OutputFormat::Json => print_json(&all)?,
        OutputFormat::Plain => {
            for (key, value) in &all {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}
