use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::archive_store::ArchiveStore;
use crate::config::Config;
use crate::ledger::{LedgerError, TokenLedger};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to prepare upload directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    ledger: TokenLedger,
    archives: ArchiveStore,
    started_at: Instant,
}

impl AppState {
    /// 打开台账、准备上传目录，并导入旧版 CSV 台账（如已配置）
    pub async fn initialize(config: Config) -> Result<Self, StartupError> {
        let ledger = TokenLedger::open(&config.ledger_db).await?;
        let archives = ArchiveStore::new(&config.upload_dir).await?;

        if let Some(csv_path) = config.legacy_ledger_csv.as_deref() {
            if csv_path.exists() {
                let imported = ledger.import_legacy_csv(csv_path).await?;
                tracing::info!(path = %csv_path.display(), imported, "legacy ledger imported");
            } else {
                tracing::warn!(path = %csv_path.display(), "legacy ledger not found, skipping");
            }
        }

        Ok(Self {
            config: Arc::new(config),
            ledger,
            archives,
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn archives(&self) -> &ArchiveStore {
        &self.archives
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
