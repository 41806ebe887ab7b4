//! 设置存储
//!
//! 键值对存储，值统一以 JSON 文本保存。练习统计计数与云同步配置也保存在这里。

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::models::PracticeStats;
use crate::{StorageError, StorageResult};

pub const PRACTICE_COUNT_KEY: &str = "practiceCount";
pub const WRONG_COUNT_KEY: &str = "wrongCount";
pub const DEFAULT_NOTEBOOK_KEY: &str = "defaultNotebook";
pub const CLOUD_SYNC_URL_KEY: &str = "cloudSyncUploadUrl";
pub const CLOUD_SYNC_API_KEY: &str = "cloudSyncApiKey";

/// 设置仓库
pub struct SettingsRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SettingsRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_connection(&self) -> StorageResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// 读取原始 JSON 值
    pub fn get_value(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
        let conn = self.get_connection()?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        // 非 JSON 的旧值按字符串处理
        Ok(raw.map(|text| {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        }))
    }

    /// 读取并反序列化，不存在或类型不符时返回默认值
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> StorageResult<T> {
        Ok(self
            .get_value(key)?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default))
    }

    /// 写入设置
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let text = serde_json::to_string(value)?;
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, text],
        )?;
        Ok(())
    }

    /// 删除设置
    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let affected = conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    /// 获取全部设置
    pub fn all(&self) -> StorageResult<BTreeMap<String, serde_json::Value>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let settings = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .map(|row| {
                row.map(|(key, text)| {
                    let value =
                        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
                    (key, value)
                })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(settings)
    }

    // ========== 默认错题本 ==========

    pub fn default_notebook(&self) -> StorageResult<Option<String>> {
        self.get_or(DEFAULT_NOTEBOOK_KEY, None)
    }

    pub fn set_default_notebook(&self, notebook_id: &str) -> StorageResult<()> {
        self.set(DEFAULT_NOTEBOOK_KEY, notebook_id)
    }

    // ========== 练习统计 ==========

    /// 当前练习统计
    pub fn practice_stats(&self) -> StorageResult<PracticeStats> {
        let practice = self.get_or(PRACTICE_COUNT_KEY, 0i64)?;
        let wrong = self.get_or(WRONG_COUNT_KEY, 0i64)?;
        Ok(PracticeStats::with_accuracy(practice, wrong))
    }

    /// 记录一次作答，原子地更新两个计数
    pub fn record_answer(&self, correct: bool) -> StorageResult<PracticeStats> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        let read = |key: &str| -> StorageResult<i64> {
            let raw: Option<String> = tx
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(raw.and_then(|v| v.trim().parse().ok()).unwrap_or(0))
        };

        let practice = read(PRACTICE_COUNT_KEY)? + 1;
        let wrong = read(WRONG_COUNT_KEY)? + if correct { 0 } else { 1 };

        tx.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![PRACTICE_COUNT_KEY, practice.to_string()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![WRONG_COUNT_KEY, wrong.to_string()],
        )?;
        tx.commit()?;

        Ok(PracticeStats::with_accuracy(practice, wrong))
    }

    /// 重置练习统计
    pub fn reset_practice_stats(&self) -> StorageResult<()> {
        self.set(PRACTICE_COUNT_KEY, &0)?;
        self.set(WRONG_COUNT_KEY, &0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Storage;

    #[test]
    fn test_typed_get_set_delete() {
        let storage = Storage::in_memory().unwrap();
        let repo = storage.settings();

        repo.set("autoNext", &true).unwrap();
        repo.set("examLimit", &50).unwrap();

        assert!(repo.get_or("autoNext", false).unwrap());
        assert_eq!(repo.get_or("examLimit", 0).unwrap(), 50);
        assert_eq!(repo.get_or("missing", 7).unwrap(), 7);
        // 类型不符时回退默认值
        assert_eq!(repo.get_or("autoNext", 3).unwrap(), 3);

        assert!(repo.delete("autoNext").unwrap());
        assert!(repo.get_value("autoNext").unwrap().is_none());
        assert_eq!(repo.all().unwrap().len(), 1);
    }

    #[test]
    fn test_record_answer_updates_counters() {
        let storage = Storage::in_memory().unwrap();
        let repo = storage.settings();

        repo.record_answer(true).unwrap();
        repo.record_answer(false).unwrap();
        let stats = repo.record_answer(true).unwrap();

        assert_eq!(stats.practice_count, 3);
        assert_eq!(stats.wrong_count, 1);
        assert_eq!(stats.accuracy, 67);
        assert_eq!(repo.practice_stats().unwrap(), stats);

        repo.reset_practice_stats().unwrap();
        assert_eq!(repo.practice_stats().unwrap().practice_count, 0);
    }

    #[test]
    fn test_default_notebook_round_trip() {
        let storage = Storage::in_memory().unwrap();
        let repo = storage.settings();

        assert_eq!(repo.default_notebook().unwrap(), None);
        repo.set_default_notebook("notebook_1").unwrap();
        assert_eq!(repo.default_notebook().unwrap().as_deref(), Some("notebook_1"));
    }
}
