//! 数据模型定义
//!
//! 定义题库、题目、错题本、错题记录、练习进度等数据结构，以及与数据库交互的方法。

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::StorageResult;

// ============================================================
// QuestionType - 题型
// ============================================================

/// 题型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// 单选题
    Single,
    /// 多选题
    Multi,
    /// 主观题（不自动判分）
    #[serde(rename = "essay", alias = "free_text")]
    FreeText,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
            Self::FreeText => "essay",
        }
    }

    /// 从题库中的 `type` 列解析，未知取值一律视为主观题
    pub fn from_column(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            Some("single") => Self::Single,
            Some("multi") => Self::Multi,
            _ => Self::FreeText,
        }
    }
}

// ============================================================
// Question - 题目
// ============================================================

/// 题目
///
/// 字段名与练习进度快照中保存的题目格式保持一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(rename = "bankId")]
    pub bank_id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub content_html: String,
    /// 选项标签 -> 选项内容
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(rename = "correctKeys", default)]
    pub correct_keys: Vec<String>,
    #[serde(default)]
    pub reference_answer_html: Option<String>,
    #[serde(default)]
    pub score_value: Option<f64>,
}

impl Question {
    /// 从题库 `questions` 表解析一行
    ///
    /// 查询必须提供 id, type, content_html, options_html, correct_option_keys,
    /// reference_answer_html, score_value 七列（缺失的可选列以 NULL 占位）。
    pub fn from_bank_row(row: &Row, bank_id: &str) -> SqliteResult<Self> {
        let id = match row.get::<_, Value>("id")? {
            Value::Null => {
                return Err(rusqlite::Error::InvalidColumnType(
                    0,
                    "id".to_string(),
                    rusqlite::types::Type::Null,
                ))
            }
            other => value_to_string(other),
        };

        let question_type: Option<String> = row.get::<_, Value>("type").map(value_to_opt_string)?;
        let options_html = row.get::<_, Value>("options_html").map(value_to_opt_string)?;
        let correct_keys = row
            .get::<_, Value>("correct_option_keys")
            .map(value_to_opt_string)?
            .map(|keys| parse_correct_keys(&keys))
            .unwrap_or_default();

        let score_value = match row.get::<_, Value>("score_value")? {
            Value::Integer(i) => Some(i as f64),
            Value::Real(f) => Some(f),
            Value::Text(t) => t.trim().parse().ok(),
            _ => None,
        };

        Ok(Self {
            id,
            bank_id: bank_id.to_string(),
            question_type: QuestionType::from_column(question_type.as_deref()),
            content_html: row
                .get::<_, Value>("content_html")
                .map(value_to_opt_string)?
                .unwrap_or_default(),
            options: options_html
                .map(|text| parse_options(&text))
                .unwrap_or_default(),
            correct_keys,
            reference_answer_html: row
                .get::<_, Value>("reference_answer_html")
                .map(value_to_opt_string)?,
            score_value,
        })
    }

    /// 题目分值，缺失或为 0 时按 1 分计
    pub fn weight(&self) -> f64 {
        match self.score_value {
            Some(v) if v > 0.0 => v,
            _ => 1.0,
        }
    }
}

/// 解析选项：优先按 JSON 对象解析，失败时按 "A. 内容" 逐行解析
pub fn parse_options(text: &str) -> BTreeMap<String, String> {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) {
        return map
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();
    }

    let mut options = BTreeMap::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut chars = line.chars();
        let Some(label) = chars.next().filter(|c| c.is_ascii_uppercase()) else {
            continue;
        };
        let rest = chars.as_str();
        let rest = rest
            .strip_prefix('.')
            .or_else(|| rest.strip_prefix('、'))
            .or_else(|| rest.strip_prefix(':'))
            .unwrap_or(rest)
            .trim();
        if !rest.is_empty() {
            options.insert(label.to_string(), rest.to_string());
        }
    }
    options
}

/// 解析逗号分隔的正确答案标签
pub fn parse_correct_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(t) => t,
        Value::Blob(b) => String::from_utf8_lossy(&b).to_string(),
    }
}

fn value_to_opt_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(value_to_string(other)),
    }
}

// ============================================================
// QuestionBankInfo - 题库元信息
// ============================================================

/// 题库元信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionBankInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub question_count: i64,
    /// 是否为试卷（考试模式）
    pub is_exam_mode: bool,
    /// 考试时长（分钟）
    pub time_limit: i64,
    pub imported_at: DateTime<Utc>,
}

/// 默认考试时长（分钟）
pub const DEFAULT_TIME_LIMIT: i64 = 120;

impl QuestionBankInfo {
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            question_count: row.get("question_count")?,
            is_exam_mode: row.get::<_, i32>("is_exam_mode")? != 0,
            time_limit: row.get("time_limit")?,
            imported_at: parse_datetime(row.get::<_, String>("imported_at")?),
        })
    }

    /// 插入或覆盖到 question_bank_meta
    pub fn upsert(&self, conn: &Connection) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT OR REPLACE INTO question_bank_meta (
                id, name, description, question_count, is_exam_mode, time_limit, imported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                self.id,
                self.name,
                self.description,
                self.question_count,
                self.is_exam_mode as i32,
                self.time_limit,
                format_datetime(self.imported_at),
            ],
        )?;
        Ok(())
    }
}

// ============================================================
// Notebook - 错题本
// ============================================================

/// 错题本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_time: DateTime<Utc>,
    /// 错题数量（查询时统计）
    pub question_count: i64,
}

impl Notebook {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!(
                "notebook_{}_{}",
                now.timestamp_millis(),
                &uuid::Uuid::new_v4().simple().to_string()[..6]
            ),
            name: name.into(),
            description: description.into(),
            created_time: now,
            question_count: 0,
        }
    }

    /// 从查询结果解析，查询需带 question_count 列
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            created_time: parse_datetime(row.get::<_, String>("created_time")?),
            question_count: row.get("question_count")?,
        })
    }

    pub fn insert(&self, conn: &Connection) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO notebooks (id, name, description, created_time) VALUES (?1, ?2, ?3, ?4)",
            params![
                self.id,
                self.name,
                self.description,
                format_datetime(self.created_time)
            ],
        )?;
        Ok(())
    }
}

// ============================================================
// MasteryLevel - 掌握程度
// ============================================================

/// 用户自评的掌握程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryLevel {
    Unknown,
    #[default]
    Vague,
    Mastered,
}

impl MasteryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Vague => "vague",
            Self::Mastered => "mastered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Self::Unknown),
            "vague" => Some(Self::Vague),
            "mastered" => Some(Self::Mastered),
            _ => None,
        }
    }
}

// ============================================================
// Answer - 用户作答
// ============================================================

/// 用户作答：单选/主观题为单个字符串，多选题为标签列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Label(String),
    Labels(Vec<String>),
}

impl Answer {
    /// 写入数据库的文本形式（JSON）
    pub fn to_column(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// 从数据库文本解析，非 JSON 文本视为单个字符串作答
    pub fn from_column(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|_| Answer::Label(text.to_string()))
    }
}

// ============================================================
// WrongQuestionRecord - 错题记录
// ============================================================

/// 错题记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongQuestionRecord {
    pub id: i64,
    /// 题目 ID（可能指向未加载的题库）
    pub question_id: String,
    pub notebook_id: String,
    pub error_count: i64,
    pub last_user_answer: Option<Answer>,
    pub user_remark: String,
    pub user_error_reason: String,
    pub mastery_level: MasteryLevel,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl WrongQuestionRecord {
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            question_id: row.get("question_id_fk")?,
            notebook_id: row.get("notebook_id")?,
            error_count: row.get("error_count")?,
            last_user_answer: row
                .get::<_, Option<String>>("last_user_answer")?
                .map(|s| Answer::from_column(&s)),
            user_remark: row.get("user_remark")?,
            user_error_reason: row.get("user_error_reason")?,
            mastery_level: MasteryLevel::from_str(&row.get::<_, String>("user_mastery_level")?)
                .unwrap_or_default(),
            created_time: parse_datetime(row.get::<_, String>("created_time")?),
            updated_time: parse_datetime(row.get::<_, String>("updated_time")?),
        })
    }
}

/// 新增错题时的输入
#[derive(Debug, Clone, Default)]
pub struct NewWrongQuestion {
    pub question_id: String,
    pub notebook_id: String,
    pub user_answer: Option<Answer>,
    pub mastery_level: Option<MasteryLevel>,
    pub remark: Option<String>,
}

/// 错题记录可编辑字段
#[derive(Debug, Clone, Default)]
pub struct WrongQuestionUpdate {
    pub remark: Option<String>,
    pub error_reason: Option<String>,
    pub mastery_level: Option<MasteryLevel>,
}

// ============================================================
// ProgressSnapshot - 练习进度快照
// ============================================================

/// 当前题目的作答状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionState {
    pub user_answer: Option<Answer>,
    pub show_answer: bool,
    pub question_answered: bool,
    pub can_proceed: bool,
    pub show_mastery_level: bool,
}

/// 练习统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PracticeStats {
    pub practice_count: i64,
    pub wrong_count: i64,
    pub accuracy: i64,
}

impl PracticeStats {
    /// 按当前计数重新计算正确率（百分比，四舍五入）
    pub fn with_accuracy(practice_count: i64, wrong_count: i64) -> Self {
        let accuracy = if practice_count > 0 {
            (((practice_count - wrong_count) as f64 / practice_count as f64) * 100.0).round()
                as i64
        } else {
            0
        };
        Self {
            practice_count,
            wrong_count,
            accuracy,
        }
    }
}

/// 练习进度快照，每次作答后整体覆盖保存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub practice_questions: Vec<Question>,
    pub current_question_index: usize,
    #[serde(default)]
    pub selected_banks: Vec<String>,
    #[serde(default)]
    pub current_question_state: QuestionState,
    #[serde(default)]
    pub session_stats: PracticeStats,
    pub saved_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub practice_started: bool,
}

fn default_true() -> bool {
    true
}

impl ProgressSnapshot {
    /// 是否有可恢复的练习
    pub fn is_resumable(&self) -> bool {
        !self.practice_questions.is_empty()
    }

    /// 剩余题数
    pub fn remaining(&self) -> usize {
        self.practice_questions
            .len()
            .saturating_sub(self.current_question_index)
    }
}

/// 考试进度快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSnapshot {
    pub exam_questions: Vec<Question>,
    /// 题目序号 -> 作答
    #[serde(default)]
    pub exam_answers: BTreeMap<usize, Answer>,
    #[serde(default)]
    pub current_question_index: usize,
    /// 试卷（题库）ID
    pub selected_paper: String,
    #[serde(default)]
    pub selected_paper_info: Option<QuestionBankInfo>,
    /// 剩余时间（秒）
    pub time_left: i64,
    pub saved_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub exam_started: bool,
}

impl ExamSnapshot {
    pub fn is_resumable(&self) -> bool {
        !self.exam_questions.is_empty()
    }

    /// 剩余时间耗尽后恢复的考试只能交卷
    pub fn is_timed_out(&self) -> bool {
        self.time_left <= 0
    }

    /// 按题目序号记录作答，越界的序号被忽略
    pub fn answer(&mut self, index: usize, answer: Answer) -> bool {
        if index >= self.exam_questions.len() {
            return false;
        }
        self.exam_answers.insert(index, answer);
        true
    }

    /// 转换为 题目 ID -> 作答，用于评分
    pub fn answers_by_question(&self) -> HashMap<String, Answer> {
        self.exam_answers
            .iter()
            .filter_map(|(index, answer)| {
                self.exam_questions
                    .get(*index)
                    .map(|q| (q.id.clone(), answer.clone()))
            })
            .collect()
    }
}

/// 手动保存的进度：练习或考试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SavedProgress {
    Practice(ProgressSnapshot),
    Exam(ExamSnapshot),
}

impl SavedProgress {
    pub fn saved_at(&self) -> DateTime<Utc> {
        match self {
            SavedProgress::Practice(s) => s.saved_at,
            SavedProgress::Exam(s) => s.saved_at,
        }
    }

    pub fn is_resumable(&self) -> bool {
        match self {
            SavedProgress::Practice(s) => s.is_resumable(),
            SavedProgress::Exam(s) => s.is_resumable(),
        }
    }
}

// ============================================================
// 时间格式工具
// ============================================================

/// 解析时间字符串
pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return dt.with_timezone(&Utc);
    }

    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
        return DateTime::from_naive_utc_and_offset(dt, Utc);
    }

    // 默认返回当前时间
    Utc::now()
}

/// 格式化为 RFC 3339（毫秒精度）
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
