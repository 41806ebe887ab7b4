//! 刷题本地数据层
//!
//! 提供刷题应用的本地持久化功能，支持：
//! - 题库 ZIP 导入、导出与会话内加载（题库注册表）
//! - 错题本与错题记录的增删改查
//! - 练习进度的单槽保存与恢复
//! - 设置与练习统计
//! - 用户数据的完整导出/导入打包
//! - 与同步服务器之间的云端备份

// ============================================================
// 子模块声明
// ============================================================

pub mod archive;
pub mod bank_store;
pub mod cloud_sync;
pub mod importer;
pub mod migrations;
pub mod models;
pub mod notebook;
pub mod progress;
pub mod registry;
pub mod scoring;
pub mod settings;
pub mod wrong_question;

#[cfg(test)]
pub(crate) mod fixtures;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use archive::{ExportOptions, ImportReport};
pub use bank_store::BankStoreRepository;
pub use cloud_sync::{CloudSyncClient, CloudSyncConfig};
pub use importer::BankImportOutcome;
pub use migrations::run_migrations;
pub use models::*;
pub use notebook::NotebookRepository;
pub use progress::ProgressRepository;
pub use registry::{BankRegistry, ImageHandle};
pub use scoring::{is_correct, score_exam, ExamScore};
pub use settings::SettingsRepository;
pub use wrong_question::WrongQuestionRepository;

// ============================================================
// 依赖导入
// ============================================================

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

// ============================================================
// 错误类型定义
// ============================================================

/// 存储模块错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("迁移错误: {0}")]
    Migration(String),

    #[error("压缩包格式错误: {0}")]
    MalformedArchive(String),

    #[error("题库结构不匹配: {0}")]
    SchemaMismatch(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("压缩包读写错误: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("同步错误: {0}")]
    Sync(String),

    #[error("凭证无效: {0}")]
    InvalidCredential(String),

    #[error("数据未找到: {0}")]
    NotFound(String),

    #[error("数据冲突: {0}")]
    Conflict(String),

    #[error("操作已取消")]
    Cancelled,

    #[error("锁获取失败: {0}")]
    LockError(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================
// StoreConfig - 数据目录布局
// ============================================================

/// 本地数据目录配置
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// 数据根目录
    pub data_dir: PathBuf,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// 用户数据库路径
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("quiz.db")
    }

    /// 题库文件与图片句柄的缓存目录
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// 创建目录并打开存储与题库注册表
    ///
    /// 已持久化的题库会被重新加载到注册表中，单个题库加载失败只记录日志。
    pub fn open(&self) -> StorageResult<(Storage, BankRegistry)> {
        std::fs::create_dir_all(&self.data_dir)?;
        let storage = Storage::new(self.database_path())?;
        let mut registry = BankRegistry::new(self.cache_dir())?;
        importer::load_banks_from_storage(&storage, &mut registry)?;
        Ok((storage, registry))
    }
}

// ============================================================
// Storage - 用户数据存储
// ============================================================

/// 用户数据存储
///
/// 持有单个 SQLite 连接，各仓库共享该连接，按调用加锁。
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Storage {
    /// 创建新的 Storage 实例
    ///
    /// # Arguments
    /// * `db_path` - 数据库文件路径
    pub fn new<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let connection = Connection::open(&db_path)?;

        // 启用 WAL 模式以提高并发性能
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-64000;",
        )?;

        Self::with_connection(
            connection,
            db_path.as_ref().to_string_lossy().to_string(),
        )
    }

    /// 创建内存数据库（用于测试）
    pub fn in_memory() -> StorageResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::with_connection(connection, ":memory:".to_string())
    }

    fn with_connection(connection: Connection, db_path: String) -> StorageResult<Self> {
        let conn = Arc::new(Mutex::new(connection));

        // 运行迁移
        {
            let guard = conn
                .lock()
                .map_err(|e| StorageError::LockError(e.to_string()))?;
            migrations::run_migrations(&guard)?;
        }

        Ok(Self { conn, db_path })
    }

    /// 获取数据库连接
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// 获取数据库路径
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// 获取错题本仓库
    pub fn notebooks(&self) -> NotebookRepository {
        NotebookRepository::new(Arc::clone(&self.conn))
    }

    /// 获取错题记录仓库
    pub fn wrong_questions(&self) -> WrongQuestionRepository {
        WrongQuestionRepository::new(Arc::clone(&self.conn))
    }

    /// 获取练习进度仓库
    pub fn progress(&self) -> ProgressRepository {
        ProgressRepository::new(Arc::clone(&self.conn))
    }

    /// 获取设置仓库
    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(Arc::clone(&self.conn))
    }

    /// 获取题库持久化仓库
    pub fn banks(&self) -> BankStoreRepository {
        BankStoreRepository::new(Arc::clone(&self.conn))
    }

    /// 执行事务
    ///
    /// 闭包返回错误时事务自动回滚。
    ///
    /// # Example
    /// ```ignore
    /// let result = storage.transaction(|conn| {
    ///     conn.execute("DELETE FROM settings", [])?;
    ///     Ok(42)
    /// })?;
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))?;

        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;

        Ok(result)
    }

    /// 清空全部用户数据与已持久化的题库
    pub fn clear_all(&self) -> StorageResult<()> {
        self.transaction(|conn| {
            conn.execute_batch(
                "DELETE FROM wrong_questions;
                 DELETE FROM notebooks;
                 DELETE FROM progress;
                 DELETE FROM settings;
                 DELETE FROM question_bank_images;
                 DELETE FROM question_bank_data;
                 DELETE FROM question_bank_meta;",
            )?;
            Ok(())
        })
    }
}
