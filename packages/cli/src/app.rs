use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use shuati_store::{BankRegistry, MasteryLevel, Notebook, Storage, StoreConfig};

/// Shared state for CLI commands
pub struct App {
    pub storage: Storage,
    pub registry: BankRegistry,
}

impl App {
    pub fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .context("Failed to get data directory")?
                .join("shuati"),
        };

        let (storage, registry) = StoreConfig::new(&data_dir)
            .open()
            .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;

        Ok(Self {
            storage,
            registry,
        })
    }

    /// Resolve a notebook by id, then by exact name
    pub fn find_notebook(&self, key: &str) -> Result<Notebook> {
        let notebooks = self.storage.notebooks();
        if let Some(notebook) = notebooks.get(key)? {
            return Ok(notebook);
        }
        notebooks
            .find_by_name(key)?
            .with_context(|| format!("Notebook '{}' not found", key))
    }

    /// The configured default notebook, created on first use
    pub fn default_notebook(&self) -> Result<Notebook> {
        let settings = self.storage.settings();
        if let Some(id) = settings.default_notebook()? {
            if let Some(notebook) = self.storage.notebooks().get(&id)? {
                return Ok(notebook);
            }
        }
        let notebook = self.storage.notebooks().ensure_default()?;
        settings.set_default_notebook(&notebook.id)?;
        Ok(notebook)
    }
}

pub fn parse_mastery(value: Option<&str>) -> Result<Option<MasteryLevel>> {
    match value {
        None => Ok(None),
        Some(raw) => match MasteryLevel::from_str(raw.trim()) {
            Some(level) => Ok(Some(level)),
            None => bail!("Unknown mastery level '{}' (expected unknown, vague or mastered)", raw),
        },
    }
}

/// Ask for a y/N confirmation on stdin
pub fn confirm(prompt: &str, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    print!("{} [y/N] ", prompt);
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
