use anyhow::{Context, Result};

use shuati_store::{CloudSyncClient, CloudSyncConfig, StorageError};

use super::data::print_import_report;
use super::print_json;
use crate::app::{confirm, App};
use crate::OutputFormat;

pub fn run_configure(app: &App, url: &str, api_key: &str) -> Result<()> {
    let config = CloudSyncConfig::new(url, api_key)?;
    config.save(&app.storage.settings())?;
    println!("Cloud backup server set to {}", config.base_url);
    Ok(())
}

fn client(app: &App) -> Result<CloudSyncClient> {
    let config = CloudSyncConfig::from_settings(&app.storage.settings())?
        .context("Cloud backup is not configured, run `shuati sync configure` first")?;
    Ok(CloudSyncClient::new(config)?)
}

pub async fn run_push(app: &App, format: &OutputFormat) -> Result<()> {
    let receipt = client(app)?.push(&app.storage).await?;
    match format {
        OutputFormat::Json => print_json(&receipt)?,
        OutputFormat::Plain => println!(
            "{} ({} bytes)",
            receipt.message,
            receipt.size.map(|s| s.to_string()).unwrap_or_else(|| "?".into())
        ),
    }
    Ok(())
}

pub async fn run_pull(app: &mut App, yes: bool, format: &OutputFormat) -> Result<()> {
    let client = client(app)?;
    let result = client
        .pull(&app.storage, &mut app.registry, || {
            confirm("Replace local data with the cloud backup?", yes)
        })
        .await;

    match result {
        Ok(report) => print_import_report(&report, format),
        Err(StorageError::Cancelled) => {
            println!("Pull cancelled, local data unchanged");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
