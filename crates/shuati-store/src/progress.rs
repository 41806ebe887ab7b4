//! 练习进度持久化
//!
//! - 自动进度：只有一个槽位 `current_practice`，每次保存整体覆盖，用于异常退出后恢复练习
//! - 手动进度：用户主动保存的练习或考试，存放在设置项 `manualSavedProgress`，
//!   随用户数据一起导出

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::models::{format_datetime, ProgressSnapshot, SavedProgress};
use crate::{StorageError, StorageResult};

/// 进度槽位 ID
pub const CURRENT_PRACTICE_SLOT: &str = "current_practice";
/// 手动保存进度的设置项
pub const MANUAL_PROGRESS_KEY: &str = "manualSavedProgress";

/// 练习进度仓库
pub struct ProgressRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProgressRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_connection(&self) -> StorageResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// 保存进度（覆盖）
    pub fn save(&self, snapshot: &ProgressSnapshot) -> StorageResult<()> {
        let data = serde_json::to_string(snapshot)?;
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO progress (id, data, updated_time) VALUES (?1, ?2, ?3)",
            params![CURRENT_PRACTICE_SLOT, data, format_datetime(Utc::now())],
        )?;
        Ok(())
    }

    /// 读取进度
    ///
    /// 槽位内容无法解析时视为没有进度并记录警告。
    pub fn load(&self) -> StorageResult<Option<ProgressSnapshot>> {
        let conn = self.get_connection()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM progress WHERE id = ?1",
                [CURRENT_PRACTICE_SLOT],
                |row| row.get(0),
            )
            .optional()?;

        let Some(data) = data else {
            return Ok(None);
        };

        match serde_json::from_str::<ProgressSnapshot>(&data) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                log::warn!("练习进度无法解析，忽略: {}", e);
                Ok(None)
            }
        }
    }

    /// 读取可恢复的进度（至少包含一道题）
    pub fn load_resumable(&self) -> StorageResult<Option<ProgressSnapshot>> {
        Ok(self.load()?.filter(|s| s.is_resumable()))
    }

    /// 清空进度
    pub fn clear(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.execute("DELETE FROM progress WHERE id = ?1", [CURRENT_PRACTICE_SLOT])?;
        Ok(())
    }

    // ========== 手动保存 ==========

    /// 手动保存练习或考试进度（覆盖上一次手动保存）
    pub fn save_manual(&self, progress: &SavedProgress) -> StorageResult<()> {
        if !progress.is_resumable() {
            return Err(StorageError::NotFound(
                "当前没有进行中的练习或考试".to_string(),
            ));
        }
        let data = serde_json::to_string(progress)?;
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![MANUAL_PROGRESS_KEY, data],
        )?;
        log::info!("已手动保存进度 ({} 字节)", data.len());
        Ok(())
    }

    /// 读取手动保存的进度，内容无法解析时视为没有
    pub fn load_manual(&self) -> StorageResult<Option<SavedProgress>> {
        let conn = self.get_connection()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [MANUAL_PROGRESS_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let Some(data) = data else {
            return Ok(None);
        };
        match serde_json::from_str::<SavedProgress>(&data) {
            Ok(progress) => Ok(Some(progress)),
            Err(e) => {
                log::warn!("手动保存的进度无法解析，忽略: {}", e);
                Ok(None)
            }
        }
    }

    /// 删除手动保存的进度
    pub fn clear_manual(&self) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let removed = conn.execute("DELETE FROM settings WHERE key = ?1", [MANUAL_PROGRESS_KEY])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Answer, ExamSnapshot, PracticeStats, Question, QuestionState, QuestionType,
    };
    use crate::Storage;
    use std::collections::BTreeMap;

    fn snapshot(index: usize) -> ProgressSnapshot {
        let question = Question {
            id: "q1".into(),
            bank_id: "bank_1".into(),
            question_type: QuestionType::Single,
            content_html: "<p>?</p>".into(),
            options: BTreeMap::from([("A".to_string(), "是".to_string())]),
            correct_keys: vec!["A".into()],
            reference_answer_html: None,
            score_value: Some(1.0),
        };
        ProgressSnapshot {
            practice_questions: vec![question.clone(), question],
            current_question_index: index,
            selected_banks: vec!["bank_1".into()],
            current_question_state: QuestionState {
                show_answer: true,
                ..Default::default()
            },
            session_stats: PracticeStats::with_accuracy(2, 1),
            saved_at: Utc::now(),
            practice_started: true,
        }
    }

    #[test]
    fn test_save_overwrites_single_slot() {
        let storage = Storage::in_memory().unwrap();
        let repo = storage.progress();

        repo.save(&snapshot(0)).unwrap();
        repo.save(&snapshot(1)).unwrap();

        let loaded = repo.load().unwrap().unwrap();
        assert_eq!(loaded.current_question_index, 1);
        assert_eq!(loaded.remaining(), 1);
        assert!(loaded.current_question_state.show_answer);

        let conn = storage.connection();
        let rows: i64 = conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM progress", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_clear_and_load_empty() {
        let storage = Storage::in_memory().unwrap();
        let repo = storage.progress();

        assert!(repo.load().unwrap().is_none());
        repo.save(&snapshot(0)).unwrap();
        repo.clear().unwrap();
        assert!(repo.load().unwrap().is_none());
    }

    #[test]
    fn test_empty_question_list_not_resumable() {
        let storage = Storage::in_memory().unwrap();
        let repo = storage.progress();

        let mut empty = snapshot(0);
        empty.practice_questions.clear();
        repo.save(&empty).unwrap();

        assert!(repo.load().unwrap().is_some());
        assert!(repo.load_resumable().unwrap().is_none());
    }

    fn exam(time_left: i64) -> ExamSnapshot {
        let questions = snapshot(0).practice_questions;
        ExamSnapshot {
            exam_questions: questions,
            exam_answers: BTreeMap::new(),
            current_question_index: 0,
            selected_paper: "bank_1".into(),
            selected_paper_info: None,
            time_left,
            saved_at: Utc::now(),
            exam_started: true,
        }
    }

    #[test]
    fn test_manual_exam_progress_round_trip() {
        let storage = Storage::in_memory().unwrap();
        let repo = storage.progress();
        assert!(repo.load_manual().unwrap().is_none());

        let mut saved = exam(1800);
        assert!(saved.answer(1, Answer::Label("A".into())));
        assert!(!saved.answer(5, Answer::Label("A".into())));
        saved.current_question_index = 1;
        repo.save_manual(&SavedProgress::Exam(saved.clone())).unwrap();

        let Some(SavedProgress::Exam(loaded)) = repo.load_manual().unwrap() else {
            panic!("expected a saved exam");
        };
        assert_eq!(loaded, saved);
        assert_eq!(loaded.answers_by_question().len(), 1);
        assert!(!loaded.is_timed_out());

        // 与自动进度互不影响
        assert!(repo.load().unwrap().is_none());

        let raw = storage.settings().get_value(MANUAL_PROGRESS_KEY).unwrap().unwrap();
        assert_eq!(raw["type"], "exam");
        assert_eq!(raw["timeLeft"], 1800);
        assert_eq!(raw["examAnswers"]["1"], "A");
    }

    #[test]
    fn test_manual_practice_replaces_exam() {
        let storage = Storage::in_memory().unwrap();
        let repo = storage.progress();

        repo.save_manual(&SavedProgress::Exam(exam(60))).unwrap();
        repo.save_manual(&SavedProgress::Practice(snapshot(1))).unwrap();

        let loaded = repo.load_manual().unwrap().unwrap();
        assert!(matches!(loaded, SavedProgress::Practice(ref s) if s.current_question_index == 1));

        assert!(repo.clear_manual().unwrap());
        assert!(!repo.clear_manual().unwrap());
        assert!(repo.load_manual().unwrap().is_none());
    }

    #[test]
    fn test_manual_save_requires_questions() {
        let storage = Storage::in_memory().unwrap();
        let mut empty = exam(60);
        empty.exam_questions.clear();

        let result = storage.progress().save_manual(&SavedProgress::Exam(empty));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(storage.progress().load_manual().unwrap().is_none());
    }
}
