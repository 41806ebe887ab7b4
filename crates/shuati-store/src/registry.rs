//! 题库注册表
//!
//! 管理本次会话中已加载的题库：每个题库对应缓存目录中的一个只读 SQLite 文件，
//! 题库图片被落地为临时文件并以图片句柄的形式提供给调用方。
//!
//! 注册表由调用方持有并按引用传递。同 ID 题库重新加载时，旧题库的数据库连接会被关闭、
//! 图片句柄会被回收（临时文件删除），不会遗留任何资源。
//!
//! 图片按压缩包内的完整路径登记，也可以只用文件名查找；多个题库含同名图片时，
//! 后加载的题库优先，释放后回落到仍在注册表中的题库。

use rand::seq::SliceRandom;
use regex::Regex;
use rusqlite::{Connection, OpenFlags};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;

use crate::bank_store::StoredBank;
use crate::importer::base_name;
use crate::models::{Question, QuestionBankInfo};
use crate::{StorageError, StorageResult};

/// 题目查询所需的列，缺失的可选列以 NULL 占位
const QUESTION_COLUMNS: [&str; 6] = [
    "type",
    "content_html",
    "options_html",
    "correct_option_keys",
    "reference_answer_html",
    "score_value",
];

// ============================================================
// ImageHandle - 图片句柄
// ============================================================

/// 题库图片句柄
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHandle {
    /// 压缩包中的原始文件名
    pub filename: String,
    pub bank_id: String,
    /// 落地后的临时文件路径
    pub path: PathBuf,
    pub mime_type: String,
}

impl ImageHandle {
    /// 可直接用于 `<img src>` 的地址
    pub fn uri(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn revoke(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("回收图片句柄失败 {}: {}", self.path.display(), e);
            }
        }
    }
}

struct LoadedBank {
    info: QuestionBankInfo,
    conn: Connection,
    db_path: PathBuf,
    /// 完整路径 -> 句柄
    images: HashMap<String, ImageHandle>,
    /// 文件名 -> 完整路径（同名时取第一个）
    by_name: HashMap<String, String>,
}

impl LoadedBank {
    fn image_by_path(&self, path: &str) -> Option<&ImageHandle> {
        self.images.get(path)
    }

    fn image_by_name(&self, path: &str) -> Option<&ImageHandle> {
        self.by_name
            .get(base_name(path))
            .and_then(|full| self.images.get(full))
    }
}

// ============================================================
// BankRegistry - 题库注册表
// ============================================================

/// 会话内已加载题库的注册表
pub struct BankRegistry {
    session_dir: TempDir,
    banks: HashMap<String, LoadedBank>,
    /// 题库 ID，按加载顺序
    load_order: Vec<String>,
}

impl BankRegistry {
    /// 在缓存目录下创建会话目录，注册表释放时整体删除
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> StorageResult<Self> {
        std::fs::create_dir_all(cache_dir.as_ref())?;
        let session_dir = tempfile::Builder::new()
            .prefix("session-")
            .tempdir_in(cache_dir.as_ref())?;
        std::fs::create_dir_all(session_dir.path().join("banks"))?;
        std::fs::create_dir_all(session_dir.path().join("images"))?;

        Ok(Self {
            session_dir,
            banks: HashMap::new(),
            load_order: Vec::new(),
        })
    }

    /// 安装题库
    ///
    /// 先落地数据库与图片并校验 `questions` 表，再释放同 ID 的旧题库，最后登记新题库。
    pub fn install(&mut self, bank: &StoredBank) -> StorageResult<QuestionBankInfo> {
        let db_path = self
            .session_dir
            .path()
            .join("banks")
            .join(format!("{}.db", uuid::Uuid::new_v4().simple()));
        std::fs::write(&db_path, &bank.db_data)?;

        let conn = match open_bank_db(&db_path) {
            Ok(conn) => conn,
            Err(e) => {
                std::fs::remove_file(&db_path).ok();
                return Err(e);
            }
        };

        let mut images: HashMap<String, ImageHandle> = HashMap::new();
        let mut by_name = HashMap::new();
        for image in &bank.images {
            let path = self.session_dir.path().join("images").join(format!(
                "{}-{}",
                uuid::Uuid::new_v4().simple(),
                sanitize_file_name(&image.filename)
            ));
            if let Err(e) = std::fs::write(&path, &image.data) {
                images.values().for_each(ImageHandle::revoke);
                std::fs::remove_file(&db_path).ok();
                return Err(e.into());
            }
            let handle = ImageHandle {
                filename: image.filename.clone(),
                bank_id: bank.info.id.clone(),
                path,
                mime_type: image.mime_type.clone(),
            };
            if let Some(previous) = images.insert(image.filename.clone(), handle) {
                previous.revoke();
            }
            by_name
                .entry(base_name(&image.filename).to_string())
                .or_insert_with(|| image.filename.clone());
        }

        if self.release(&bank.info.id) {
            log::info!("题库 {} 已存在，旧资源已释放", bank.info.id);
        }

        self.load_order.push(bank.info.id.clone());
        self.banks.insert(
            bank.info.id.clone(),
            LoadedBank {
                info: bank.info.clone(),
                conn,
                db_path,
                images,
                by_name,
            },
        );

        Ok(bank.info.clone())
    }

    /// 释放题库：回收图片句柄、关闭连接、删除缓存文件
    ///
    /// 返回题库是否存在。
    pub fn release(&mut self, bank_id: &str) -> bool {
        let Some(bank) = self.banks.remove(bank_id) else {
            return false;
        };

        self.load_order.retain(|id| id != bank_id);
        bank.images.values().for_each(ImageHandle::revoke);

        if let Err((_, e)) = bank.conn.close() {
            log::warn!("关闭题库 {} 连接失败: {}", bank_id, e);
        }
        if let Err(e) = std::fs::remove_file(&bank.db_path) {
            log::warn!("删除题库缓存 {} 失败: {}", bank.db_path.display(), e);
        }
        true
    }

    /// 释放所有题库
    pub fn clear(&mut self) {
        let ids: Vec<String> = self.banks.keys().cloned().collect();
        for id in ids {
            self.release(&id);
        }
    }

    pub fn contains(&self, bank_id: &str) -> bool {
        self.banks.contains_key(bank_id)
    }

    pub fn info(&self, bank_id: &str) -> Option<&QuestionBankInfo> {
        self.banks.get(bank_id).map(|b| &b.info)
    }

    /// 已加载题库的元信息，按导入时间排序
    pub fn bank_infos(&self) -> Vec<QuestionBankInfo> {
        let mut infos: Vec<QuestionBankInfo> =
            self.banks.values().map(|b| b.info.clone()).collect();
        infos.sort_by(|a, b| a.imported_at.cmp(&b.imported_at).then(a.id.cmp(&b.id)));
        infos
    }

    // ========== 题目查询 ==========

    /// 读取单个题库的全部题目（按文件中的顺序）
    pub fn bank_questions(&self, bank_id: &str) -> StorageResult<Vec<Question>> {
        let bank = self
            .banks
            .get(bank_id)
            .ok_or_else(|| StorageError::NotFound(format!("题库未加载: {}", bank_id)))?;
        load_questions(&bank.conn, bank_id)
    }

    /// 从多个题库取题
    ///
    /// 单个题库读取失败只记录日志；`shuffle` 时随机打乱，`limit` 限制数量。
    pub fn questions(
        &self,
        bank_ids: &[String],
        limit: Option<usize>,
        shuffle: bool,
    ) -> Vec<Question> {
        let mut all = Vec::new();
        for bank_id in bank_ids {
            match self.bank_questions(bank_id) {
                Ok(questions) => all.extend(questions),
                Err(e) => log::warn!("从题库 {} 获取题目失败: {}", bank_id, e),
            }
        }

        if shuffle {
            all.shuffle(&mut rand::rng());
        }
        if let Some(limit) = limit.filter(|l| *l > 0) {
            all.truncate(limit);
        }
        all
    }

    /// 按题目 ID 在所有已加载题库中查找，按传入顺序返回，找不到的 ID 被跳过
    pub fn find_questions(&self, ids: &[String]) -> Vec<Question> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut found: HashMap<String, Question> = HashMap::new();

        for bank_id in self.banks.keys() {
            match self.bank_questions(bank_id) {
                Ok(questions) => {
                    for q in questions {
                        if wanted.contains(q.id.as_str()) && !found.contains_key(&q.id) {
                            found.insert(q.id.clone(), q);
                        }
                    }
                }
                Err(e) => log::warn!("从题库 {} 查找题目失败: {}", bank_id, e),
            }
        }

        ids.iter().filter_map(|id| found.remove(id)).collect()
    }

    // ========== 图片 ==========

    /// 解析图片句柄：先按完整路径，再按文件名，后加载的题库优先
    pub fn resolve_image(&self, filename: &str) -> Option<&ImageHandle> {
        let filename = filename.replace('\\', "/");
        self.banks_newest_first()
            .find_map(|bank| bank.image_by_path(&filename))
            .or_else(|| {
                self.banks_newest_first()
                    .find_map(|bank| bank.image_by_name(&filename))
            })
    }

    fn banks_newest_first(&self) -> impl Iterator<Item = &LoadedBank> + '_ {
        self.load_order
            .iter()
            .rev()
            .filter_map(move |id| self.banks.get(id))
    }

    /// 在指定题库中解析图片句柄
    pub fn resolve_bank_image(&self, bank_id: &str, filename: &str) -> Option<&ImageHandle> {
        let bank = self.banks.get(bank_id)?;
        let filename = filename.replace('\\', "/");
        bank.image_by_path(&filename)
            .or_else(|| bank.image_by_name(&filename))
    }

    /// 把题目 HTML 中能解析的 `src="..."` 替换为图片句柄地址
    pub fn rewrite_image_sources(&self, html: &str) -> String {
        static IMAGE_SRC: OnceLock<Regex> = OnceLock::new();
        let re = IMAGE_SRC.get_or_init(|| {
            Regex::new(r#"src\s*=\s*"([^"]+)""#).expect("image src pattern is valid")
        });

        re.replace_all(html, |caps: &regex::Captures| match self.resolve_image(&caps[1]) {
            Some(handle) => format!("src=\"{}\"", handle.uri()),
            None => caps[0].to_string(),
        })
        .into_owned()
    }

    /// 当前存活的图片句柄数量
    pub fn live_image_count(&self) -> usize {
        self.banks.values().map(|b| b.images.len()).sum()
    }

    /// 某个题库的图片句柄
    pub fn bank_images(&self, bank_id: &str) -> Vec<&ImageHandle> {
        let mut handles: Vec<&ImageHandle> = self
            .banks
            .get(bank_id)
            .map(|b| b.images.values().collect())
            .unwrap_or_default();
        handles.sort_by(|a, b| a.filename.cmp(&b.filename));
        handles
    }
}

impl Drop for BankRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

// ============================================================
// 题库数据库读取
// ============================================================

/// 以只读方式打开题库并校验 `questions` 表
pub(crate) fn open_bank_db(path: &Path) -> StorageResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    // 非 SQLite 文件在首次查询时才会报错
    let has_questions = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'questions'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|e| StorageError::MalformedArchive(format!("不是有效的 SQLite 数据库: {}", e)))?;

    if has_questions == 0 {
        return Err(StorageError::SchemaMismatch(
            "题库缺少 questions 表".to_string(),
        ));
    }
    Ok(conn)
}

/// 查询 `questions` 表实际存在的列
pub(crate) fn question_columns(conn: &Connection) -> StorageResult<HashSet<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(questions)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(columns)
}

fn load_questions(conn: &Connection, bank_id: &str) -> StorageResult<Vec<Question>> {
    let columns = question_columns(conn)?;
    if !columns.contains("id") {
        return Err(StorageError::SchemaMismatch(
            "questions 表缺少 id 列".to_string(),
        ));
    }

    let select: Vec<String> = std::iter::once("id".to_string())
        .chain(QUESTION_COLUMNS.iter().map(|col| {
            if columns.contains(*col) {
                format!("\"{}\"", col)
            } else {
                format!("NULL AS \"{}\"", col)
            }
        }))
        .collect();
    let sql = format!("SELECT {} FROM questions ORDER BY rowid", select.join(", "));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Question::from_bank_row(row, bank_id))?;

    let mut questions = Vec::new();
    for row in rows {
        match row {
            Ok(q) => questions.push(q),
            Err(e) => log::warn!("题库 {} 中有无法解析的题目: {}", bank_id, e),
        }
    }
    Ok(questions)
}

/// 生成可作为文件名的字符串
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
