//! 用户数据导出/导入
//!
//! 导出格式：
//! - `user_data.db`：SQLite 文件，包含 wrong_questions、notebooks、progress、settings 四张表
//! - 完整备份为 ZIP：`user_data.db` 加上 `question_banks/<名称>.zip`（每个题库一个子压缩包）
//!
//! 导入会清空现有用户数据，调用方必须通过确认回调同意覆盖；清空与回放在同一事务中完成。

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::importer::{self, read_entry, write_bank_archive, BankImportOutcome};
use crate::models::format_datetime;
use crate::registry::{sanitize_file_name, BankRegistry};
use crate::{Storage, StorageError, StorageResult};

/// 完整备份中的用户数据文件名
pub const USER_DATA_FILE: &str = "user_data.db";
/// 完整备份中的题库目录
pub const BANKS_DIR: &str = "question_banks/";

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

const USER_DATA_SCHEMA: &str = r#"
    CREATE TABLE wrong_questions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        question_id_fk TEXT,
        notebook_id TEXT,
        error_count INTEGER,
        last_user_answer TEXT,
        user_remark TEXT,
        user_error_reason TEXT,
        user_mastery_level TEXT,
        created_time TEXT,
        updated_time TEXT
    );

    CREATE TABLE notebooks (
        id TEXT PRIMARY KEY,
        name TEXT,
        description TEXT,
        created_time TEXT,
        question_count INTEGER
    );

    CREATE TABLE progress (
        id TEXT PRIMARY KEY,
        data TEXT,
        updated_time TEXT
    );

    CREATE TABLE settings (
        key TEXT PRIMARY KEY,
        value TEXT
    );
"#;

const NOW_SQL: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// 完整导出选项
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    /// 是否打包题库
    pub include_banks: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_banks: true,
        }
    }
}

/// 用户数据导入结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub wrong_questions: usize,
    pub notebooks: usize,
    pub progress: usize,
    pub settings: usize,
    /// 与同名错题本合并的错题本数量
    pub merged_notebooks: usize,
    /// 导入文件中不存在的表（旧版导出格式）
    pub missing_tables: Vec<String>,
}

/// 完整备份导入结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteImportReport {
    pub user_data: Option<ImportReport>,
    pub banks: Vec<BankImportOutcome>,
}

// ============================================================
// 导出
// ============================================================

/// 导出用户数据为 SQLite 文件内容
pub fn export_user_data_db(storage: &Storage) -> StorageResult<Vec<u8>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(USER_DATA_FILE);

    {
        let export = Connection::open(&path)?;
        export.execute_batch(USER_DATA_SCHEMA)?;

        for record in storage.wrong_questions().all()? {
            export.execute(
                "INSERT INTO wrong_questions VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.question_id,
                    record.notebook_id,
                    record.error_count,
                    record.last_user_answer.as_ref().map(|a| a.to_column()),
                    record.user_remark,
                    record.user_error_reason,
                    record.mastery_level.as_str(),
                    format_datetime(record.created_time),
                    format_datetime(record.updated_time),
                ],
            )?;
        }

        for notebook in storage.notebooks().list()? {
            export.execute(
                "INSERT INTO notebooks VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    notebook.id,
                    notebook.name,
                    notebook.description,
                    format_datetime(notebook.created_time),
                    notebook.question_count,
                ],
            )?;
        }

        {
            let conn = storage.connection();
            let conn = conn
                .lock()
                .map_err(|e| StorageError::LockError(e.to_string()))?;
            let mut stmt = conn.prepare("SELECT id, data, updated_time FROM progress")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (id, data, updated) in rows {
                export.execute(
                    "INSERT INTO progress VALUES (?1, ?2, ?3)",
                    params![id, data, updated],
                )?;
            }
        }

        for (key, value) in storage.settings().all()? {
            export.execute(
                "INSERT INTO settings VALUES (?1, ?2)",
                params![key, serde_json::to_string(&value)?],
            )?;
        }

        // 收缩为单文件，不依赖 WAL
        export.execute_batch("VACUUM;")?;
    }

    Ok(std::fs::read(&path)?)
}

/// 完整导出：用户数据 + 题库
pub fn export_complete(storage: &Storage, options: ExportOptions) -> StorageResult<Vec<u8>> {
    let user_data = export_user_data_db(storage)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let file_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(USER_DATA_FILE, file_options)?;
    zip.write_all(&user_data)?;

    let mut exported_banks = 0;
    if options.include_banks {
        let repo = storage.banks();
        let mut used_names = HashSet::new();
        for info in repo.list_infos()? {
            let archive = repo.load(&info.id).and_then(|bank| match bank {
                Some(bank) => write_bank_archive(&bank),
                None => Err(StorageError::NotFound(info.id.clone())),
            });
            let archive = match archive {
                Ok(archive) => archive,
                Err(e) => {
                    log::warn!("导出题库 {} 失败，已跳过: {}", info.id, e);
                    continue;
                }
            };

            let name = unique_bank_file_name(&info.name, &info.id, &mut used_names);
            zip.start_file(format!("{}{}.zip", BANKS_DIR, name), file_options)?;
            zip.write_all(&archive)?;
            exported_banks += 1;
        }
    }

    let bytes = zip.finish()?.into_inner();
    log::info!(
        "导出完成: {} 字节, {} 个题库",
        bytes.len(),
        exported_banks
    );
    Ok(bytes)
}

fn unique_bank_file_name(name: &str, id: &str, used: &mut HashSet<String>) -> String {
    let by_name = sanitize_file_name(name);
    let candidate = if name.trim().is_empty() || used.contains(&by_name) {
        sanitize_file_name(id)
    } else {
        by_name
    };

    let mut unique = candidate.clone();
    let mut n = 2;
    while used.contains(&unique) {
        unique = format!("{}_{}", candidate, n);
        n += 1;
    }
    used.insert(unique.clone());
    unique
}

// ============================================================
// 导入
// ============================================================

/// 导入用户数据（SQLite 文件内容）
///
/// 文件不是 SQLite 数据库时返回 `MalformedArchive`；`confirm` 返回 false 时返回
/// `Cancelled` 且不做任何修改。导入文件中缺失的表会被跳过并记录在结果中。
pub fn import_user_data<F>(storage: &Storage, bytes: &[u8], confirm: F) -> StorageResult<ImportReport>
where
    F: FnOnce() -> bool,
{
    if !bytes.starts_with(SQLITE_MAGIC) {
        return Err(StorageError::MalformedArchive(
            "用户数据文件不是 SQLite 数据库".to_string(),
        ));
    }

    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;
    let src = Connection::open_with_flags(file.path(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let tables = ["wrong_questions", "notebooks", "progress", "settings"];
    let mut present = Vec::new();
    for table in tables {
        if table_columns(&src, table)?.is_some() {
            present.push(table);
        }
    }
    if present.is_empty() {
        return Err(StorageError::MalformedArchive(
            "文件中没有可导入的用户数据表".to_string(),
        ));
    }

    if !confirm() {
        log::info!("用户取消了数据导入");
        return Err(StorageError::Cancelled);
    }

    let report = storage.transaction(|dst| {
        dst.execute_batch(
            "DELETE FROM wrong_questions;
             DELETE FROM notebooks;
             DELETE FROM progress;
             DELETE FROM settings;",
        )?;

        let mut report = ImportReport::default();
        let now = NOW_SQL;

        match copy_table(
            &src,
            dst,
            "notebooks",
            Conflict::Ignore,
            &[
                ("id", "NULL"),
                ("name", "id"),
                ("description", "''"),
                ("created_time", now),
            ],
        )? {
            Some(n) => report.notebooks = n,
            None => report.missing_tables.push("notebooks".to_string()),
        }

        match copy_table(
            &src,
            dst,
            "wrong_questions",
            Conflict::Replace,
            &[
                ("id", "NULL"),
                ("question_id_fk", "''"),
                ("notebook_id", "''"),
                ("error_count", "1"),
                ("last_user_answer", "NULL"),
                ("user_remark", "''"),
                ("user_error_reason", "''"),
                ("user_mastery_level", "'vague'"),
                ("created_time", now),
                ("updated_time", now),
            ],
        )? {
            Some(n) => report.wrong_questions = n,
            None => report.missing_tables.push("wrong_questions".to_string()),
        }
        report.merged_notebooks = merge_duplicate_notebooks(&src, dst)?;

        match copy_table(
            &src,
            dst,
            "progress",
            Conflict::Replace,
            &[("id", "NULL"), ("data", "'{}'"), ("updated_time", now)],
        )? {
            Some(n) => report.progress = n,
            None => report.missing_tables.push("progress".to_string()),
        }

        match copy_settings(&src, dst)? {
            Some(n) => report.settings = n,
            None => report.missing_tables.push("settings".to_string()),
        }

        Ok(report)
    })?;

    log::info!(
        "用户数据导入完成: {} 个错题本, {} 条错题, {} 项设置",
        report.notebooks,
        report.wrong_questions,
        report.settings
    );
    Ok(report)
}

/// 导入完整备份
///
/// 先导入 `user_data.db`（失败则中止），再逐个导入 `question_banks/` 下的题库，
/// 题库之间互不影响。
pub fn import_complete<F>(
    storage: &Storage,
    registry: &mut BankRegistry,
    bytes: &[u8],
    confirm: F,
) -> StorageResult<CompleteImportReport>
where
    F: FnOnce() -> bool,
{
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| StorageError::MalformedArchive(format!("无法读取备份文件: {}", e)))?;

    let mut user_data_index = None;
    let mut bank_entries = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if name == USER_DATA_FILE {
            user_data_index = Some(i);
        } else if name.starts_with(BANKS_DIR) && name.to_ascii_lowercase().ends_with(".zip") {
            bank_entries.push((i, name[BANKS_DIR.len()..].to_string()));
        }
    }

    if user_data_index.is_none() && bank_entries.is_empty() {
        return Err(StorageError::MalformedArchive(
            "备份文件中既没有用户数据也没有题库".to_string(),
        ));
    }

    let mut report = CompleteImportReport::default();
    if let Some(index) = user_data_index {
        let data = read_entry(&mut archive, index)?;
        report.user_data = Some(import_user_data(storage, &data, confirm)?);
    }

    for (index, name) in bank_entries {
        let result = read_entry(&mut archive, index)
            .and_then(|data| importer::import_bank(storage, registry, &data));
        let outcome = match result {
            Ok(info) => BankImportOutcome {
                filename: name,
                success: true,
                bank_id: Some(info.id.clone()),
                info: Some(info),
                error: None,
            },
            Err(e) => {
                log::warn!("导入备份中的题库 {} 失败: {}", name, e);
                BankImportOutcome {
                    filename: name,
                    success: false,
                    bank_id: None,
                    info: None,
                    error: Some(e.to_string()),
                }
            }
        };
        report.banks.push(outcome);
    }

    Ok(report)
}

/// 清空全部数据（用户数据、已持久化题库、会话中的题库）
pub fn clear_all_data(storage: &Storage, registry: &mut BankRegistry) -> StorageResult<()> {
    storage.clear_all()?;
    registry.clear();
    log::info!("所有数据已清空");
    Ok(())
}

// ============================================================
// 辅助函数
// ============================================================

/// 表的列集合，表不存在时返回 None
fn table_columns(conn: &Connection, table: &str) -> StorageResult<Option<HashSet<String>>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{}\")", table))
        .map_err(|e| StorageError::MalformedArchive(format!("无法读取用户数据文件: {}", e)))?;
    let columns: HashSet<String> = stmt
        .query_map([], |row| row.get::<_, String>("name"))
        .map_err(|e| StorageError::MalformedArchive(format!("无法读取用户数据文件: {}", e)))?
        .collect::<Result<_, _>>()
        .map_err(|e| StorageError::MalformedArchive(format!("无法读取用户数据文件: {}", e)))?;
    Ok(if columns.is_empty() { None } else { Some(columns) })
}

/// 目标表主键或唯一键冲突时的处理方式
#[derive(Debug, Clone, Copy)]
enum Conflict {
    /// 保留先写入的行
    Ignore,
    /// 用后写入的行覆盖
    Replace,
}

impl Conflict {
    fn insert_verb(self) -> &'static str {
        match self {
            Conflict::Ignore => "INSERT OR IGNORE",
            Conflict::Replace => "INSERT OR REPLACE",
        }
    }
}

/// 把源表复制到目标表
///
/// `columns` 为 (列名, 缺失或为 NULL 时的 SQL 默认表达式)。源表不存在时返回 None。
fn copy_table(
    src: &Connection,
    dst: &Connection,
    table: &str,
    conflict: Conflict,
    columns: &[(&str, &str)],
) -> StorageResult<Option<usize>> {
    let Some(present) = table_columns(src, table)? else {
        return Ok(None);
    };

    let select: Vec<String> = columns
        .iter()
        .map(|(col, fallback)| {
            if present.contains(*col) {
                format!("COALESCE(\"{}\", {})", col, fallback)
            } else {
                fallback.to_string()
            }
        })
        .collect();
    let names: Vec<&str> = columns.iter().map(|(col, _)| *col).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();

    let mut read = src.prepare(&format!("SELECT {} FROM \"{}\"", select.join(", "), table))?;
    let mut insert = dst.prepare(&format!(
        "{} INTO {} ({}) VALUES ({})",
        conflict.insert_verb(),
        table,
        names.join(", "),
        placeholders.join(", ")
    ))?;

    let mut rows = read.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|i| row.get::<_, Value>(i))
            .collect::<Result<Vec<_>, _>>()?;
        count += insert.execute(params_from_iter(values))?;
    }
    Ok(Some(count))
}

/// 合并导入文件中重名的错题本
///
/// 错题本名称唯一，同名的后续错题本不会写入；其下的错题改挂到已写入的同名错题本。
/// 返回被合并的错题本数量。
fn merge_duplicate_notebooks(src: &Connection, dst: &Connection) -> StorageResult<usize> {
    let Some(present) = table_columns(src, "notebooks")? else {
        return Ok(0);
    };
    if !present.contains("id") {
        return Ok(0);
    }
    let name = if present.contains("name") {
        "COALESCE(name, id)"
    } else {
        "id"
    };

    let mut read = src.prepare(&format!(
        "SELECT id, {} FROM notebooks WHERE id IS NOT NULL",
        name
    ))?;
    let notebooks = read
        .query_map([], |row| Ok((row.get::<_, Value>(0)?, row.get::<_, Value>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut merged = 0;
    for (id, name) in notebooks {
        let kept: Option<Value> = dst
            .query_row(
                "SELECT id FROM notebooks WHERE id = ?1",
                [&id],
                |row| row.get(0),
            )
            .optional()?;
        if kept.is_some() {
            continue;
        }
        let existing: Option<String> = dst
            .query_row(
                "SELECT id FROM notebooks WHERE name = ?1",
                [&name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = existing {
            let moved = dst.execute(
                "UPDATE wrong_questions SET notebook_id = ?1 WHERE notebook_id = ?2",
                params![existing, id],
            )?;
            log::warn!(
                "错题本 {:?} 与 {} 同名，已合并 {} 条错题",
                id,
                existing,
                moved
            );
            merged += 1;
        }
    }
    Ok(merged)
}

/// 复制设置，非 JSON 的值按字符串保存
fn copy_settings(src: &Connection, dst: &Connection) -> StorageResult<Option<usize>> {
    let Some(present) = table_columns(src, "settings")? else {
        return Ok(None);
    };
    if !present.contains("key") || !present.contains("value") {
        return Ok(Some(0));
    }

    let mut read = src.prepare("SELECT key, value FROM settings WHERE key IS NOT NULL")?;
    let mut insert = dst.prepare("INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)")?;

    let mut rows = read.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let key: String = match row.get::<_, Value>(0)? {
            Value::Text(t) => t,
            Value::Integer(i) => i.to_string(),
            _ => continue,
        };
        let value = match row.get::<_, Value>(1)? {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(i),
            Value::Real(f) => serde_json::Value::from(f),
            Value::Text(t) => serde_json::from_str(&t).unwrap_or(serde_json::Value::String(t)),
            Value::Blob(b) => serde_json::Value::String(String::from_utf8_lossy(&b).to_string()),
        };
        insert.execute(params![key, serde_json::to_string(&value)?])?;
        count += 1;
    }
    Ok(Some(count))
}
