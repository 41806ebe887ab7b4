//! API 密钥台账
//!
//! 每个密钥一行，校验与最后使用时间的更新在同一条 UPDATE 中完成。

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_REVOKED: &str = "revoked";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown api key")]
    UnknownToken,
    #[error("api key is not active")]
    InactiveToken,
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("legacy ledger import failed: {0}")]
    LegacyImport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub created_at: String,
    pub last_used: Option<String>,
    pub status: String,
}

impl TokenRecord {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            token: row.try_get("token")?,
            created_at: row.try_get("created_at")?,
            last_used: row.try_get("last_used")?,
            status: row.try_get("status")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TokenLedger {
    pool: SqlitePool,
}

impl TokenLedger {
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::Database(sqlx::Error::Io(e)))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_tokens (
                token TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                last_used TEXT,
                status TEXT NOT NULL DEFAULT 'active'
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// 生成新的密钥并记为 active
    pub async fn create(&self) -> Result<TokenRecord, LedgerError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = now_string();

        sqlx::query(
            "INSERT INTO api_tokens (token, created_at, last_used, status) VALUES (?, ?, ?, ?)",
        )
        .bind(&token)
        .bind(&now)
        .bind(&now)
        .bind(STATUS_ACTIVE)
        .execute(&self.pool)
        .await?;

        Ok(TokenRecord {
            token,
            created_at: now.clone(),
            last_used: Some(now),
            status: STATUS_ACTIVE.to_string(),
        })
    }

    /// 校验密钥，成功时更新最后使用时间
    pub async fn validate(&self, token: &str) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            "UPDATE api_tokens SET last_used = ? WHERE token = ? AND status = ?",
        )
        .bind(now_string())
        .bind(token)
        .bind(STATUS_ACTIVE)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            return Ok(());
        }

        match self.get(token).await? {
            Some(_) => Err(LedgerError::InactiveToken),
            None => Err(LedgerError::UnknownToken),
        }
    }

    pub async fn get(&self, token: &str) -> Result<Option<TokenRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT token, created_at, last_used, status FROM api_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(TokenRecord::from_row).transpose()?)
    }

    /// 停用密钥
    pub async fn revoke(&self, token: &str) -> Result<(), LedgerError> {
        let updated = sqlx::query("UPDATE api_tokens SET status = ? WHERE token = ?")
            .bind(STATUS_REVOKED)
            .bind(token)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(LedgerError::UnknownToken);
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<TokenRecord>, LedgerError> {
        let rows = sqlx::query(
            "SELECT token, created_at, last_used, status FROM api_tokens ORDER BY created_at, token",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| TokenRecord::from_row(row).map_err(LedgerError::from))
            .collect()
    }

    /// 导入旧版 CSV 台账（`uuid,created_at,last_used,status`），已有的密钥保持不变
    pub async fn import_legacy_csv(&self, path: &Path) -> Result<usize, LedgerError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| LedgerError::LegacyImport(e.to_string()))?;

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| LedgerError::LegacyImport(e.to_string()))?;
            if record.len() < 4 {
                tracing::warn!(line = ?record.position().map(|p| p.line()), "skipping short ledger row");
                continue;
            }
            let token = record[0].to_string();
            if token.is_empty() {
                continue;
            }
            let last_used = Some(record[2].to_string()).filter(|v| !v.is_empty());
            records.push(TokenRecord {
                token,
                created_at: record[1].to_string(),
                last_used,
                status: record[3].to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;
        let mut imported = 0;
        for record in &records {
            imported += sqlx::query(
                "INSERT OR IGNORE INTO api_tokens (token, created_at, last_used, status) VALUES (?, ?, ?, ?)",
            )
            .bind(&record.token)
            .bind(&record.created_at)
            .bind(&record.last_used)
            .bind(&record.status)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;
        }
        tx.commit().await?;

        Ok(imported)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now_string() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}
