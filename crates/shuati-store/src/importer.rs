//! 题库导入
//!
//! 支持两种压缩包：
//! - 单个题库：直接包含 `.db` 文件（以及可选的图片）
//! - 批量导入：包含多个 `*.zip` 子压缩包，每个子压缩包是一个题库
//!
//! 批量导入时每个子压缩包独立处理，单个失败不影响其余题库。

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::bank_store::{StoredBank, StoredBankImage};
use crate::models::{QuestionBankInfo, DEFAULT_TIME_LIMIT};
use crate::registry::{open_bank_db, question_columns, BankRegistry};
use crate::{Storage, StorageError, StorageResult};

/// 支持的图片扩展名
const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];

/// 单个题库的导入结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankImportOutcome {
    pub filename: String,
    pub success: bool,
    pub bank_id: Option<String>,
    pub info: Option<QuestionBankInfo>,
    pub error: Option<String>,
}

impl BankImportOutcome {
    fn from_result(filename: &str, result: StorageResult<QuestionBankInfo>) -> Self {
        match result {
            Ok(info) => Self {
                filename: filename.to_string(),
                success: true,
                bank_id: Some(info.id.clone()),
                info: Some(info),
                error: None,
            },
            Err(e) => {
                log::warn!("导入题库 {} 失败: {}", filename, e);
                Self {
                    filename: filename.to_string(),
                    success: false,
                    bank_id: None,
                    info: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

// ============================================================
// 压缩包工具
// ============================================================

fn open_archive(bytes: &[u8]) -> StorageResult<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| StorageError::MalformedArchive(format!("无法读取压缩包: {}", e)))
}

fn is_ignored_entry(name: &str) -> bool {
    name.ends_with('/') || name.starts_with("__MACOSX/") || base_name(name).starts_with("._")
}

pub(crate) fn base_name(name: &str) -> &str {
    name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name)
}

fn extension(name: &str) -> String {
    base_name(name)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

pub(crate) fn is_image_name(name: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&extension(name).as_str())
}

/// 读取条目内容；不按条目头声明的大小预分配
pub(crate) fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    index: usize,
) -> StorageResult<Vec<u8>> {
    let mut entry = archive.by_index(index)?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}

// ============================================================
// 导入
// ============================================================

/// 导入压缩包中的一个或多个题库
///
/// 压缩包本身无法读取时返回 `MalformedArchive`；否则返回每个题库的导入结果。
pub fn import_banks(
    storage: &Storage,
    registry: &mut BankRegistry,
    bytes: &[u8],
    filename: &str,
) -> StorageResult<Vec<BankImportOutcome>> {
    let mut archive = open_archive(bytes)?;

    let mut sub_archives = Vec::new();
    let mut has_bank_files = false;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if is_ignored_entry(&name) {
            continue;
        }
        match extension(&name).as_str() {
            "zip" => sub_archives.push((i, base_name(&name).to_string())),
            "db" => has_bank_files = true,
            _ if is_image_name(&name) => has_bank_files = true,
            _ => {}
        }
    }

    if has_bank_files || sub_archives.is_empty() {
        let result = import_bank(storage, registry, bytes);
        return Ok(vec![BankImportOutcome::from_result(filename, result)]);
    }

    log::info!("批量导入 {}：{} 个题库", filename, sub_archives.len());
    let mut outcomes = Vec::with_capacity(sub_archives.len());
    for (index, name) in sub_archives {
        let result = read_entry(&mut archive, index)
            .and_then(|data| import_bank(storage, registry, &data));
        outcomes.push(BankImportOutcome::from_result(&name, result));
    }
    Ok(outcomes)
}

/// 导入单个题库压缩包
///
/// 缺少 `.db` 文件返回 `MalformedArchive`，缺少 `questions` 表返回 `SchemaMismatch`。
/// 题库先持久化到用户数据库，再加载到注册表；同 ID 题库被替换。
pub fn import_bank(
    storage: &Storage,
    registry: &mut BankRegistry,
    bytes: &[u8],
) -> StorageResult<QuestionBankInfo> {
    let bank = read_bank_archive(bytes)?;
    storage.banks().save(&bank)?;
    let info = registry.install(&bank)?;
    log::info!(
        "题库导入成功: {} ({}), {} 道题, {} 张图片",
        info.name,
        info.id,
        info.question_count,
        bank.images.len()
    );
    Ok(info)
}

/// 解析单个题库压缩包
pub(crate) fn read_bank_archive(bytes: &[u8]) -> StorageResult<StoredBank> {
    let mut archive = open_archive(bytes)?;

    let mut db_data = None;
    let mut images = Vec::new();
    let mut seen_images = HashSet::new();
    for i in 0..archive.len() {
        let name = archive.by_index(i)?.name().replace('\\', "/");
        if is_ignored_entry(&name) {
            continue;
        }
        if extension(&name) == "db" {
            if db_data.is_none() {
                db_data = Some(read_entry(&mut archive, i)?);
            }
        } else if is_image_name(&name) {
            if !seen_images.insert(name.clone()) {
                log::warn!("压缩包中有重复的图片条目，已跳过: {}", name);
                continue;
            }
            let filename = name.trim_start_matches('/').to_string();
            let mime_type = mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            images.push(StoredBankImage {
                filename,
                mime_type,
                data: read_entry(&mut archive, i)?,
            });
        }
    }

    let db_data = db_data.ok_or_else(|| {
        StorageError::MalformedArchive("压缩包中没有找到 .db 文件".to_string())
    })?;

    let info = inspect_bank_db(&db_data)?;
    Ok(StoredBank {
        info,
        db_data,
        images,
    })
}

/// 落地到临时文件并读取题库元信息
fn inspect_bank_db(db_data: &[u8]) -> StorageResult<QuestionBankInfo> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(db_data)?;
    file.flush()?;

    let conn = open_bank_db(file.path())?;
    let info = extract_bank_info(&conn)?;
    drop(conn);
    Ok(info)
}

/// 读取题库元信息
///
/// 优先使用 `question_bank_config` 表的第一行；没有 ID 时取第一道题的
/// `question_bank_id`，仍没有则生成 `bank_<uuid>`。
pub(crate) fn extract_bank_info(conn: &Connection) -> StorageResult<QuestionBankInfo> {
    let question_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;

    let config = read_config_row(conn)?;
    let text = |key: &str| -> Option<String> {
        match config.get(key) {
            Some(Value::Text(t)) if !t.trim().is_empty() => Some(t.trim().to_string()),
            Some(Value::Integer(i)) => Some(i.to_string()),
            _ => None,
        }
    };
    let number = |key: &str| -> Option<i64> {
        match config.get(key) {
            Some(Value::Integer(i)) => Some(*i),
            Some(Value::Real(f)) => Some(*f as i64),
            Some(Value::Text(t)) => t.trim().parse().ok(),
            _ => None,
        }
    };

    let mut id = text("id");
    let mut name = text("name");
    if id.is_none() && question_columns(conn)?.contains("question_bank_id") {
        id = conn
            .query_row(
                "SELECT question_bank_id FROM questions WHERE question_bank_id IS NOT NULL LIMIT 1",
                [],
                |row| row.get::<_, Value>(0),
            )
            .optional()?
            .and_then(|v| match v {
                Value::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
                Value::Integer(i) => Some(i.to_string()),
                _ => None,
            });
    }
    let id = id.unwrap_or_else(|| format!("bank_{}", uuid::Uuid::new_v4().simple()));
    if name.is_none() {
        name = Some(id.clone());
    }

    Ok(QuestionBankInfo {
        name: name.unwrap_or_default(),
        description: text("description").unwrap_or_default(),
        question_count,
        is_exam_mode: number("is_exam_mode").map(|v| v != 0).unwrap_or(false),
        time_limit: number("time_limit")
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_TIME_LIMIT),
        imported_at: Utc::now(),
        id,
    })
}

fn read_config_row(conn: &Connection) -> StorageResult<HashMap<String, Value>> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'question_bank_config'",
        [],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Ok(HashMap::new());
    }

    let mut stmt = conn.prepare("SELECT * FROM question_bank_config LIMIT 1")?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let row = stmt
        .query_row([], |row| {
            let mut map = HashMap::new();
            for (i, name) in names.iter().enumerate() {
                map.insert(name.clone(), row.get::<_, Value>(i)?);
            }
            Ok(map)
        })
        .optional()?;
    Ok(row.unwrap_or_default())
}

// ============================================================
// 加载、删除与导出
// ============================================================

/// 把已持久化的题库重新加载到注册表，返回成功加载的数量
pub fn load_banks_from_storage(
    storage: &Storage,
    registry: &mut BankRegistry,
) -> StorageResult<usize> {
    let repo = storage.banks();
    let mut loaded = 0;
    for info in repo.list_infos()? {
        let result = repo.load(&info.id).and_then(|bank| match bank {
            Some(bank) => registry.install(&bank),
            None => Err(StorageError::NotFound(info.id.clone())),
        });
        match result {
            Ok(_) => loaded += 1,
            Err(e) => log::warn!("加载题库 {} 失败，已跳过: {}", info.id, e),
        }
    }
    log::info!("已加载 {} 个题库", loaded);
    Ok(loaded)
}

/// 删除题库：从注册表释放并删除持久化数据
pub fn delete_bank(
    storage: &Storage,
    registry: &mut BankRegistry,
    bank_id: &str,
) -> StorageResult<()> {
    let released = registry.release(bank_id);
    let removed = storage.banks().delete(bank_id)?;
    if !released && !removed {
        return Err(StorageError::NotFound(format!("题库不存在: {}", bank_id)));
    }
    log::info!("已删除题库 {}", bank_id);
    Ok(())
}

/// 把已持久化的题库导出为 ZIP（`<id>.db` + 图片）
pub fn export_bank(storage: &Storage, bank_id: &str) -> StorageResult<Vec<u8>> {
    let bank = storage
        .banks()
        .load(bank_id)?
        .ok_or_else(|| StorageError::NotFound(format!("题库不存在: {}", bank_id)))?;
    write_bank_archive(&bank)
}

pub(crate) fn write_bank_archive(bank: &StoredBank) -> StorageResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(format!("{}.db", bank.info.id), options)?;
    zip.write_all(&bank.db_data)?;

    for image in &bank.images {
        zip.start_file(image.filename.as_str(), options)?;
        zip.write_all(&image.data)?;
    }

    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn setup() -> (Storage, BankRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::in_memory().expect("Failed to create in-memory storage");
        let registry = BankRegistry::new(dir.path()).unwrap();
        (storage, registry, dir)
    }

    #[test]
    fn test_import_single_bank_with_images() {
        let (storage, mut registry, _dir) = setup();
        let bytes = fixtures::bank_zip("math", "高数", &["fig1.png", "img/fig2.JPG"]);

        let outcomes = import_banks(&storage, &mut registry, &bytes, "math.zip").unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success, "{:?}", outcomes[0].error);
        assert_eq!(outcomes[0].bank_id.as_deref(), Some("math"));

        let info = registry.info("math").unwrap();
        assert_eq!(info.name, "高数");
        assert_eq!(info.question_count, 3);
        assert_eq!(info.time_limit, 90);
        assert_eq!(registry.live_image_count(), 2);

        let jpg = registry.resolve_image("fig2.JPG").unwrap();
        assert_eq!(jpg.mime_type, "image/jpeg");

        let stored = storage.banks().load("math").unwrap().unwrap();
        assert_eq!(stored.images.len(), 2);
    }

    #[test]
    fn test_batch_isolates_corrupt_sub_archive() {
        let (storage, mut registry, _dir) = setup();
        let good = fixtures::bank_zip("good", "好题库", &[]);
        let corrupt = b"PK\x03\x04 this is not really a zip".to_vec();
        let batch = fixtures::zip_entries(&[("good.zip", &good), ("broken.zip", &corrupt)]);

        let outcomes = import_banks(&storage, &mut registry, &batch, "batch.zip").unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes.iter().filter(|o| o.success).count(), 1);

        let failed = outcomes.iter().find(|o| !o.success).unwrap();
        assert_eq!(failed.filename, "broken.zip");
        assert!(failed.error.is_some());
        assert!(registry.contains("good"));
    }

    #[test]
    fn test_same_image_name_in_different_folders() {
        let (storage, mut registry, dir) = setup();
        let bytes = fixtures::bank_zip("dup", "重名图片", &["a/fig1.png", "b/fig1.png"]);

        let outcomes = import_banks(&storage, &mut registry, &bytes, "dup.zip").unwrap();
        assert!(outcomes[0].success, "{:?}", outcomes[0].error);
        assert_eq!(registry.live_image_count(), 2);
        assert_eq!(
            registry.resolve_image("b/fig1.png").unwrap().filename,
            "b/fig1.png"
        );

        let stored = storage.banks().load("dup").unwrap().unwrap();
        let names: Vec<&str> = stored.images.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["a/fig1.png", "b/fig1.png"]);

        let mut fresh = BankRegistry::new(dir.path()).unwrap();
        assert_eq!(load_banks_from_storage(&storage, &mut fresh).unwrap(), 1);
        assert_eq!(fresh.live_image_count(), 2);
        assert!(fresh.resolve_image("fig1.png").is_some());
    }

    /// 改写中央目录里的未压缩大小
    fn with_declared_size(mut bytes: Vec<u8>, size: u32) -> Vec<u8> {
        let positions: Vec<usize> = bytes
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == b"PK\x01\x02")
            .map(|(i, _)| i)
            .collect();
        for pos in positions {
            bytes[pos + 24..pos + 28].copy_from_slice(&size.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_declared_entry_size_is_not_trusted() {
        let (storage, mut registry, _dir) = setup();
        let good = fixtures::bank_zip("good", "好题库", &[]);
        let huge = with_declared_size(fixtures::bank_zip("huge", "大题库", &[]), 0xFFFF_FFF0);
        let batch = fixtures::zip_entries(&[("good.zip", &good), ("huge.zip", &huge)]);

        let outcomes = import_banks(&storage, &mut registry, &batch, "batch.zip").unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].success, "{:?}", outcomes[0].error);
        assert_eq!(outcomes[1].filename, "huge.zip");
        assert!(registry.contains("good"));
    }

    #[test]
    fn test_missing_db_is_malformed() {
        let (storage, mut registry, _dir) = setup();
        let bytes = fixtures::zip_entries(&[("readme.txt", b"hello")]);

        let result = import_bank(&storage, &mut registry, &bytes);
        assert!(matches!(result, Err(StorageError::MalformedArchive(_))));

        let outcomes = import_banks(&storage, &mut registry, &bytes, "x.zip").unwrap();
        assert!(!outcomes[0].success);
    }

    #[test]
    fn test_missing_questions_table_is_schema_mismatch() {
        let (storage, mut registry, _dir) = setup();
        let db = fixtures::db_without_questions();
        let bytes = fixtures::zip_entries(&[("bank.db", &db)]);

        let result = import_bank(&storage, &mut registry, &bytes);
        assert!(matches!(result, Err(StorageError::SchemaMismatch(_))));
        assert!(storage.banks().list_infos().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_archive_is_malformed() {
        let (storage, mut registry, _dir) = setup();
        let result = import_banks(&storage, &mut registry, b"garbage", "g.zip");
        assert!(matches!(result, Err(StorageError::MalformedArchive(_))));
    }

    #[test]
    fn test_bank_id_falls_back_to_question_bank_id() {
        let (storage, mut registry, _dir) = setup();
        let db = fixtures::legacy_bank_db("legacy_bank");
        let bytes = fixtures::zip_entries(&[("old.db", &db)]);

        let info = import_bank(&storage, &mut registry, &bytes).unwrap();
        assert_eq!(info.id, "legacy_bank");
        assert_eq!(info.name, "legacy_bank");
        assert_eq!(info.time_limit, DEFAULT_TIME_LIMIT);
        assert!(!info.is_exam_mode);
    }

    #[test]
    fn test_reimport_replaces_and_reload_from_storage() {
        let (storage, mut registry, dir) = setup();
        import_bank(
            &storage,
            &mut registry,
            &fixtures::bank_zip("math", "v1", &["a.png", "b.png"]),
        )
        .unwrap();
        import_bank(
            &storage,
            &mut registry,
            &fixtures::bank_zip("math", "v2", &["a.png"]),
        )
        .unwrap();

        assert_eq!(registry.bank_infos().len(), 1);
        assert_eq!(registry.live_image_count(), 1);

        let mut fresh = BankRegistry::new(dir.path()).unwrap();
        let loaded = load_banks_from_storage(&storage, &mut fresh).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(fresh.info("math").unwrap().name, "v2");
        assert_eq!(fresh.live_image_count(), 1);
    }

    #[test]
    fn test_delete_and_export_bank() {
        let (storage, mut registry, _dir) = setup();
        import_bank(
            &storage,
            &mut registry,
            &fixtures::bank_zip("math", "高数", &["a.png"]),
        )
        .unwrap();

        let exported = export_bank(&storage, "math").unwrap();
        let mut archive = ZipArchive::new(Cursor::new(exported.as_slice())).unwrap();
        assert!(archive.index_for_name("math.db").is_some());
        assert!(archive.index_for_name("a.png").is_some());
        assert_eq!(archive.len(), 2);
        drop(archive);

        delete_bank(&storage, &mut registry, "math").unwrap();
        assert!(!registry.contains("math"));
        assert!(matches!(
            delete_bank(&storage, &mut registry, "math"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            export_bank(&storage, "math"),
            Err(StorageError::NotFound(_))
        ));
    }
}
