//! 错题记录数据库操作模块
//!
//! 同一道题只保留一条错题记录，重复答错时累加错误次数。

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::models::{
    format_datetime, MasteryLevel, NewWrongQuestion, WrongQuestionRecord, WrongQuestionUpdate,
};
use crate::{StorageError, StorageResult};

/// 错题记录仓库
pub struct WrongQuestionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WrongQuestionRepository {
    /// 创建新的仓库实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_connection(&self) -> StorageResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    // ========== 基本操作 ==========

    /// 保存错题
    ///
    /// 已存在该题的记录时：错误次数 +1，刷新最近作答、掌握程度和更新时间，
    /// 备注仅在提供时覆盖。否则新建一条错误次数为 1 的记录。
    /// 返回记录 ID。
    pub fn save(&self, input: &NewWrongQuestion) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let now = format_datetime(Utc::now());
        let mastery = input.mastery_level.unwrap_or_default();
        let answer = input.user_answer.as_ref().map(|a| a.to_column());

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM wrong_questions WHERE question_id_fk = ?1 ORDER BY id LIMIT 1",
                [&input.question_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            conn.execute(
                r#"
                UPDATE wrong_questions
                SET error_count = error_count + 1,
                    last_user_answer = ?2,
                    user_mastery_level = ?3,
                    user_remark = COALESCE(?4, user_remark),
                    updated_time = ?5
                WHERE id = ?1
                "#,
                params![
                    id,
                    answer,
                    mastery.as_str(),
                    input.remark.as_deref().filter(|r| !r.is_empty()),
                    now
                ],
            )?;
            log::debug!("错题 {} 再次答错", input.question_id);
            return Ok(id);
        }

        conn.execute(
            r#"
            INSERT INTO wrong_questions (
                question_id_fk, notebook_id, error_count, last_user_answer,
                user_remark, user_error_reason, user_mastery_level, created_time, updated_time
            ) VALUES (?1, ?2, 1, ?3, ?4, '', ?5, ?6, ?6)
            "#,
            params![
                input.question_id,
                input.notebook_id,
                answer,
                input.remark.clone().unwrap_or_default(),
                mastery.as_str(),
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 更新错题的备注、错误原因或掌握程度
    pub fn update(&self, id: i64, update: &WrongQuestionUpdate) -> StorageResult<()> {
        let conn = self.get_connection()?;
        let affected = conn.execute(
            r#"
            UPDATE wrong_questions
            SET user_remark = COALESCE(?2, user_remark),
                user_error_reason = COALESCE(?3, user_error_reason),
                user_mastery_level = COALESCE(?4, user_mastery_level),
                updated_time = ?5
            WHERE id = ?1
            "#,
            params![
                id,
                update.remark,
                update.error_reason,
                update.mastery_level.map(|m| m.as_str()),
                format_datetime(Utc::now())
            ],
        )?;

        if affected == 0 {
            return Err(StorageError::NotFound(format!("错题不存在: {}", id)));
        }
        Ok(())
    }

    /// 删除错题记录
    pub fn remove(&self, id: i64) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let affected = conn.execute("DELETE FROM wrong_questions WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    // ========== 查询 ==========

    /// 按 ID 获取
    pub fn get(&self, id: i64) -> StorageResult<Option<WrongQuestionRecord>> {
        let conn = self.get_connection()?;
        let record = conn
            .query_row("SELECT * FROM wrong_questions WHERE id = ?1", [id], |row| {
                WrongQuestionRecord::from_row(row)
            })
            .optional()?;
        Ok(record)
    }

    /// 按题目 ID 获取
    pub fn find_by_question(&self, question_id: &str) -> StorageResult<Option<WrongQuestionRecord>> {
        let conn = self.get_connection()?;
        let record = conn
            .query_row(
                "SELECT * FROM wrong_questions WHERE question_id_fk = ?1 ORDER BY id LIMIT 1",
                [question_id],
                |row| WrongQuestionRecord::from_row(row),
            )
            .optional()?;
        Ok(record)
    }

    /// 获取错题本下的所有错题，最近更新的在前
    pub fn list_by_notebook(&self, notebook_id: &str) -> StorageResult<Vec<WrongQuestionRecord>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM wrong_questions WHERE notebook_id = ?1 ORDER BY updated_time DESC, id DESC",
        )?;
        let records = stmt
            .query_map([notebook_id], |row| WrongQuestionRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// 获取所有错题
    pub fn all(&self) -> StorageResult<Vec<WrongQuestionRecord>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare("SELECT * FROM wrong_questions ORDER BY id")?;
        let records = stmt
            .query_map([], |row| WrongQuestionRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// 按掌握程度统计错题本中的错题数
    pub fn count_by_mastery(
        &self,
        notebook_id: &str,
        level: MasteryLevel,
    ) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM wrong_questions WHERE notebook_id = ?1 AND user_mastery_level = ?2",
            params![notebook_id, level.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Answer;
    use crate::Storage;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let storage = Storage::in_memory().expect("Failed to create in-memory storage");
        storage.connection()
    }

    fn wrong(question_id: &str, answer: &str) -> NewWrongQuestion {
        NewWrongQuestion {
            question_id: question_id.to_string(),
            notebook_id: "nb-1".to_string(),
            user_answer: Some(Answer::Label(answer.to_string())),
            mastery_level: None,
            remark: None,
        }
    }

    #[test]
    fn test_save_same_question_twice_increments() {
        let repo = WrongQuestionRepository::new(setup_test_db());

        let first = repo.save(&wrong("q1", "A")).unwrap();
        let second = repo.save(&wrong("q1", "B")).unwrap();
        assert_eq!(first, second);

        let all = repo.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].error_count, 2);
        assert_eq!(all[0].last_user_answer, Some(Answer::Label("B".into())));
        assert_eq!(all[0].mastery_level, MasteryLevel::Vague);
    }

    #[test]
    fn test_remark_only_overwritten_when_given() {
        let repo = WrongQuestionRepository::new(setup_test_db());

        let mut input = wrong("q1", "A");
        input.remark = Some("看错题干".into());
        repo.save(&input).unwrap();

        repo.save(&wrong("q1", "C")).unwrap();
        let record = repo.find_by_question("q1").unwrap().unwrap();
        assert_eq!(record.user_remark, "看错题干");

        let mut input = wrong("q1", "D");
        input.remark = Some("概念不清".into());
        input.mastery_level = Some(MasteryLevel::Unknown);
        repo.save(&input).unwrap();
        let record = repo.find_by_question("q1").unwrap().unwrap();
        assert_eq!(record.user_remark, "概念不清");
        assert_eq!(record.mastery_level, MasteryLevel::Unknown);
        assert_eq!(record.error_count, 3);
    }

    #[test]
    fn test_update_and_remove() {
        let repo = WrongQuestionRepository::new(setup_test_db());
        let id = repo.save(&wrong("q1", "A")).unwrap();

        repo.update(
            id,
            &WrongQuestionUpdate {
                error_reason: Some("计算失误".into()),
                mastery_level: Some(MasteryLevel::Mastered),
                ..Default::default()
            },
        )
        .unwrap();

        let record = repo.get(id).unwrap().unwrap();
        assert_eq!(record.user_error_reason, "计算失误");
        assert_eq!(record.mastery_level, MasteryLevel::Mastered);
        assert_eq!(repo.count_by_mastery("nb-1", MasteryLevel::Mastered).unwrap(), 1);

        assert!(repo.remove(id).unwrap());
        assert!(!repo.remove(id).unwrap());
        assert!(matches!(
            repo.update(id, &WrongQuestionUpdate::default()),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_multi_answer_persisted() {
        let repo = WrongQuestionRepository::new(setup_test_db());
        let mut input = wrong("q2", "");
        input.user_answer = Some(Answer::Labels(vec!["A".into(), "B".into()]));
        repo.save(&input).unwrap();

        let records = repo.list_by_notebook("nb-1").unwrap();
        assert_eq!(
            records[0].last_user_answer,
            Some(Answer::Labels(vec!["A".into(), "B".into()]))
        );
    }
}
