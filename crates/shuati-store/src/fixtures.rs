//! 测试用题库与压缩包构造工具

use rusqlite::{params, Connection};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// 1x1 PNG
pub(crate) const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
];

fn write_db(setup: impl FnOnce(&Connection)) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bank.db");
    {
        let conn = Connection::open(&path).unwrap();
        setup(&conn);
    }
    std::fs::read(&path).unwrap()
}

/// 构造带配置表的题库数据库：单选、多选、主观题各一道
pub(crate) fn bank_db(bank_id: &str, name: &str) -> Vec<u8> {
    write_db(|conn| {
        conn.execute_batch(
            "CREATE TABLE question_bank_config (
                id TEXT, name TEXT, description TEXT, is_exam_mode INTEGER, time_limit INTEGER
             );
             CREATE TABLE questions (
                id TEXT PRIMARY KEY,
                question_bank_id TEXT,
                type TEXT,
                content_html TEXT,
                options_html TEXT,
                correct_option_keys TEXT,
                reference_answer_html TEXT,
                score_value REAL
             );",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO question_bank_config VALUES (?1, ?2, '测试题库', 0, 90)",
            params![bank_id, name],
        )
        .unwrap();
        let rows = [
            ("q1", "single", "<p>1 + 1 = ?</p><img src=\"fig1.png\">", r#"{"A":"2","B":"3"}"#, "A", None),
            ("q2", "multi", "<p>偶数有</p>", "A. 2\nB. 3\nC. 4", "A,C", Some(2.0)),
            ("q3", "essay", "<p>简述</p>", "", "", Some(5.0)),
        ];
        for (suffix, kind, content, options, keys, score) in rows {
            conn.execute(
                "INSERT INTO questions VALUES (?1, ?2, ?3, ?4, ?5, ?6, '<p>参考</p>', ?7)",
                params![
                    format!("{}_{}", bank_id, suffix),
                    bank_id,
                    kind,
                    content,
                    options,
                    keys,
                    score
                ],
            )
            .unwrap();
        }
    })
}

/// 构造没有配置表、列也不完整的旧格式题库
pub(crate) fn legacy_bank_db(bank_id: &str) -> Vec<u8> {
    write_db(|conn| {
        conn.execute_batch(
            "CREATE TABLE questions (
                id INTEGER PRIMARY KEY,
                question_bank_id TEXT,
                type TEXT,
                content_html TEXT,
                correct_option_keys TEXT
             );",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO questions VALUES (1, ?1, 'single', '<p>旧题</p>', 'B')",
            [bank_id],
        )
        .unwrap();
    })
}

/// 构造缺少 questions 表的数据库
pub(crate) fn db_without_questions() -> Vec<u8> {
    write_db(|conn| {
        conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);")
            .unwrap();
    })
}

/// 按给定条目打包 ZIP
pub(crate) fn zip_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// 单个题库的 ZIP：数据库 + 指定图片
pub(crate) fn bank_zip(bank_id: &str, name: &str, images: &[&str]) -> Vec<u8> {
    let db = bank_db(bank_id, name);
    let mut entries: Vec<(&str, &[u8])> = vec![("questions.db", &db)];
    for image in images {
        entries.push((*image, PNG_BYTES));
    }
    zip_entries(&entries)
}
