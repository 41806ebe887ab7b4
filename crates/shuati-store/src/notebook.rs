//! 错题本数据库操作模块
//!
//! 提供 Notebook 的持久化操作，删除错题本时在同一事务中级联删除其错题记录。

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::models::Notebook;
use crate::settings::DEFAULT_NOTEBOOK_KEY;
use crate::{StorageError, StorageResult};

/// 默认错题本名称
pub const DEFAULT_NOTEBOOK_NAME: &str = "默认错题本";

const SELECT_WITH_COUNT: &str = r#"
    SELECT n.id, n.name, n.description, n.created_time,
           (SELECT COUNT(*) FROM wrong_questions w WHERE w.notebook_id = n.id) AS question_count
    FROM notebooks n
"#;

/// 错题本仓库
pub struct NotebookRepository {
    conn: Arc<Mutex<Connection>>,
}

impl NotebookRepository {
    /// 创建新的仓库实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_connection(&self) -> StorageResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// 创建错题本，名称重复时返回 Conflict
    pub fn create(&self, name: &str, description: &str) -> StorageResult<Notebook> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::Conflict("错题本名称不能为空".to_string()));
        }

        let conn = self.get_connection()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM notebooks WHERE name = ?1)",
            [name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::Conflict(format!("错题本已存在: {}", name)));
        }

        let notebook = Notebook::new(name, description);
        notebook.insert(&conn)?;
        log::info!("创建错题本: {} ({})", notebook.name, notebook.id);
        Ok(notebook)
    }

    /// 获取所有错题本（含错题数量），按创建时间排序
    pub fn list(&self) -> StorageResult<Vec<Notebook>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY n.created_time, n.name", SELECT_WITH_COUNT))?;
        let notebooks = stmt
            .query_map([], |row| Notebook::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notebooks)
    }

    /// 按 ID 获取错题本
    pub fn get(&self, id: &str) -> StorageResult<Option<Notebook>> {
        let conn = self.get_connection()?;
        let notebook = conn
            .query_row(
                &format!("{} WHERE n.id = ?1", SELECT_WITH_COUNT),
                [id],
                |row| Notebook::from_row(row),
            )
            .optional()?;
        Ok(notebook)
    }

    /// 按名称获取错题本
    pub fn find_by_name(&self, name: &str) -> StorageResult<Option<Notebook>> {
        let conn = self.get_connection()?;
        let notebook = conn
            .query_row(
                &format!("{} WHERE n.name = ?1", SELECT_WITH_COUNT),
                [name],
                |row| Notebook::from_row(row),
            )
            .optional()?;
        Ok(notebook)
    }

    /// 确保默认错题本存在并返回它
    pub fn ensure_default(&self) -> StorageResult<Notebook> {
        if let Some(notebook) = self.find_by_name(DEFAULT_NOTEBOOK_NAME)? {
            return Ok(notebook);
        }
        self.create(DEFAULT_NOTEBOOK_NAME, "系统自动创建的默认错题本")
    }

    /// 删除错题本
    ///
    /// 在同一事务中删除其下所有错题记录，并清除指向它的默认错题本设置。
    /// 返回被删除的错题记录数。
    pub fn delete(&self, id: &str) -> StorageResult<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        let removed_records = tx.execute("DELETE FROM wrong_questions WHERE notebook_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM notebooks WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(StorageError::NotFound(format!("错题本不存在: {}", id)));
        }

        let default_value = serde_json::to_string(id)?;
        tx.execute(
            "DELETE FROM settings WHERE key = ?1 AND value = ?2",
            params![DEFAULT_NOTEBOOK_KEY, default_value],
        )?;

        tx.commit()?;
        log::info!("删除错题本 {}，级联删除 {} 条错题", id, removed_records);
        Ok(removed_records)
    }
}
