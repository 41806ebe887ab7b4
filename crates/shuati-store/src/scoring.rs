//! 判分
//!
//! 单选题：作答标签在正确答案集合中即得分。
//! 多选题：作答标签集合与正确答案集合完全相同才得分。
//! 主观题不自动判分。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::models::{Answer, Question, QuestionType};

/// 判断作答是否正确
pub fn is_correct(question: &Question, answer: &Answer) -> bool {
    if question.correct_keys.is_empty() {
        return false;
    }

    match (question.question_type, answer) {
        (QuestionType::Single, Answer::Label(label)) => {
            question.correct_keys.iter().any(|k| k == label.trim())
        }
        (QuestionType::Multi, Answer::Labels(labels)) => {
            let submitted: BTreeSet<&str> = labels.iter().map(|l| l.trim()).collect();
            let correct: BTreeSet<&str> = question.correct_keys.iter().map(String::as_str).collect();
            submitted == correct
        }
        _ => false,
    }
}

/// 考试得分
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamScore {
    pub earned: f64,
    pub total: f64,
    /// 百分比（四舍五入）
    pub percentage: i64,
    pub correct_count: usize,
    pub question_count: usize,
}

/// 计算试卷得分
///
/// `answers` 以题目 ID 为键；未作答的题目不得分。
pub fn score_exam(questions: &[Question], answers: &HashMap<String, Answer>) -> ExamScore {
    let mut earned = 0.0;
    let mut total = 0.0;
    let mut correct_count = 0;

    for question in questions {
        let weight = question.weight();
        total += weight;
        if answers
            .get(&question.id)
            .is_some_and(|answer| is_correct(question, answer))
        {
            earned += weight;
            correct_count += 1;
        }
    }

    let percentage = if total > 0.0 {
        (earned / total * 100.0).round() as i64
    } else {
        0
    };

    ExamScore {
        earned,
        total,
        percentage,
        correct_count,
        question_count: questions.len(),
    }
}
