//! 题库持久化
//!
//! 导入的题库（元信息、原始数据库文件、图片）保存在用户数据库中，重启后重新加载。

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::models::QuestionBankInfo;
use crate::{StorageError, StorageResult};

/// 题库图片
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBankImage {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// 完整的已持久化题库
#[derive(Debug, Clone)]
pub struct StoredBank {
    pub info: QuestionBankInfo,
    pub db_data: Vec<u8>,
    pub images: Vec<StoredBankImage>,
}

impl StoredBank {
    /// 写入（覆盖）同 ID 题库的全部数据，调用方负责事务
    pub fn persist(&self, conn: &Connection) -> StorageResult<()> {
        self.info.upsert(conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO question_bank_data (bank_id, db_data) VALUES (?1, ?2)",
            params![self.info.id, self.db_data],
        )?;
        conn.execute(
            "DELETE FROM question_bank_images WHERE bank_id = ?1",
            [&self.info.id],
        )?;
        for image in &self.images {
            conn.execute(
                "INSERT INTO question_bank_images (bank_id, filename, mime_type, data) VALUES (?1, ?2, ?3, ?4)",
                params![self.info.id, image.filename, image.mime_type, image.data],
            )?;
        }
        Ok(())
    }
}

/// 删除题库的全部持久化数据，调用方负责事务
pub(crate) fn delete_bank_rows(conn: &Connection, bank_id: &str) -> StorageResult<bool> {
    conn.execute("DELETE FROM question_bank_images WHERE bank_id = ?1", [bank_id])?;
    conn.execute("DELETE FROM question_bank_data WHERE bank_id = ?1", [bank_id])?;
    let removed = conn.execute("DELETE FROM question_bank_meta WHERE id = ?1", [bank_id])?;
    Ok(removed > 0)
}

/// 题库持久化仓库
pub struct BankStoreRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BankStoreRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_connection(&self) -> StorageResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// 在单个事务中保存题库
    pub fn save(&self, bank: &StoredBank) -> StorageResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        bank.persist(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// 所有题库的元信息，按导入时间排序
    pub fn list_infos(&self) -> StorageResult<Vec<QuestionBankInfo>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare("SELECT * FROM question_bank_meta ORDER BY imported_at, id")?;
        let infos = stmt
            .query_map([], |row| QuestionBankInfo::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(infos)
    }

    /// 读取单个题库
    pub fn load(&self, bank_id: &str) -> StorageResult<Option<StoredBank>> {
        let conn = self.get_connection()?;

        let info = conn
            .query_row(
                "SELECT * FROM question_bank_meta WHERE id = ?1",
                [bank_id],
                |row| QuestionBankInfo::from_row(row),
            )
            .optional()?;
        let Some(info) = info else {
            return Ok(None);
        };

        let db_data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT db_data FROM question_bank_data WHERE bank_id = ?1",
                [bank_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(db_data) = db_data else {
            return Err(StorageError::NotFound(format!("题库数据缺失: {}", bank_id)));
        };

        let mut stmt = conn.prepare(
            "SELECT filename, mime_type, data FROM question_bank_images WHERE bank_id = ?1 ORDER BY filename",
        )?;
        let images = stmt
            .query_map([bank_id], |row| {
                Ok(StoredBankImage {
                    filename: row.get(0)?,
                    mime_type: row.get(1)?,
                    data: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(StoredBank {
            info,
            db_data,
            images,
        }))
    }

    /// 删除题库，返回是否存在
    pub fn delete(&self, bank_id: &str) -> StorageResult<bool> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let removed = delete_bank_rows(&tx, bank_id)?;
        tx.commit()?;
        Ok(removed)
    }
}
