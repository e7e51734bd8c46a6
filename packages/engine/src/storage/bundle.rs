//! 内容包数据库操作模块
//!
//! 内容包以完整 JSON 文档存储，题目池展开到带索引的 question 表，
//! 以便按知识点快速查询。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use zhangwo_algo::{Question, SubjectBundle};

use crate::storage::models::{format_datetime, parse_datetime};
use crate::storage::{StorageError, StorageResult};

/// 本地缓存的内容包
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBundle {
    pub bundle: SubjectBundle,
    pub content_hash: String,
    /// 下载时远端版本索引的时间戳，V3 之前缓存的行为空
    pub index_stamp: Option<String>,
    pub cached_at: DateTime<Utc>,
}

impl StoredBundle {
    /// 内容包文档自带的时间戳
    pub fn last_updated(&self) -> &str {
        &self.bundle.last_updated
    }

    /// 与远端版本索引比较的时间戳
    pub fn index_stamp(&self) -> Option<&str> {
        self.index_stamp.as_deref()
    }

    fn from_row(row: &Row) -> SqliteResult<Self> {
        let document: String = row.get("document")?;
        let bundle = serde_json::from_str(&document).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            bundle,
            content_hash: row.get("content_hash")?,
            index_stamp: row.get("index_stamp")?,
            cached_at: parse_datetime(row.get::<_, String>("cached_at")?),
        })
    }
}

type SqliteResult<T> = rusqlite::Result<T>;

/// 内容包仓储
pub struct BundleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BundleRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn get(&self, bundle_id: &str) -> StorageResult<Option<StoredBundle>> {
        let conn = self.get_connection()?;

        let stored = conn
            .query_row(
                "SELECT * FROM subject_bundle WHERE id = ?1",
                [bundle_id],
                StoredBundle::from_row,
            )
            .optional()?;

        Ok(stored)
    }

    pub fn get_all(&self) -> StorageResult<Vec<StoredBundle>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare("SELECT * FROM subject_bundle ORDER BY id")?;
        let bundles = stmt
            .query_map([], StoredBundle::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(bundles)
    }

    /// 保存内容包并重建其题目索引 (单一事务)
    ///
    /// `index_stamp` 是下载时远端版本索引的时间戳，可能与文档自带的不同。
    pub fn put(&self, bundle: &SubjectBundle, content_hash: &str, index_stamp: &str) -> StorageResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        upsert_bundle_row(&tx, bundle, content_hash, index_stamp)?;

        tx.execute("DELETE FROM question WHERE bundle_id = ?1", [&bundle.id])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO question (bundle_id, id, atom_id, fact_id, template_id, version, document)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for question in &bundle.questions {
                stmt.execute(params![
                    bundle.id,
                    question.id,
                    question.atom_id,
                    question.fact_id,
                    template_key(question)?,
                    question.version,
                    serde_json::to_string(question)?,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// 仅刷新版本戳与文档，不重建题目索引
    ///
    /// 用于内容哈希未变化、只有版本号/时间戳更新的情况。
    pub fn refresh_stamp(
        &self,
        bundle: &SubjectBundle,
        content_hash: &str,
        index_stamp: &str,
    ) -> StorageResult<()> {
        let conn = self.get_connection()?;
        upsert_bundle_row(&conn, bundle, content_hash, index_stamp)
    }

    /// 删除内容包 (题目级联删除)
    pub fn delete(&self, bundle_id: &str) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let affected = conn.execute("DELETE FROM subject_bundle WHERE id = ?1", [bundle_id])?;
        Ok(affected > 0)
    }

    // ========== 二级索引查询 ==========

    /// 按知识点查询题目 (idx_question_atom)
    pub fn questions_for_atom(&self, bundle_id: &str, atom_id: &str) -> StorageResult<Vec<Question>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            "SELECT document FROM question WHERE atom_id = ?1 AND bundle_id = ?2 ORDER BY id",
        )?;
        let documents = stmt
            .query_map(params![atom_id, bundle_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        documents
            .iter()
            .map(|doc| serde_json::from_str(doc).map_err(StorageError::from))
            .collect()
    }

    /// 内容包的题目数量 (idx_question_bundle)
    pub fn question_count(&self, bundle_id: &str) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM question WHERE bundle_id = ?1",
            [bundle_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 按内容哈希查询 (idx_bundle_content_hash)
    pub fn find_by_hash(&self, content_hash: &str) -> StorageResult<Vec<String>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare("SELECT id FROM subject_bundle WHERE content_hash = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map([content_hash], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    fn get_connection(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }
}

fn upsert_bundle_row(
    conn: &Connection,
    bundle: &SubjectBundle,
    content_hash: &str,
    index_stamp: &str,
) -> StorageResult<()> {
    conn.execute(
        r#"
        INSERT INTO subject_bundle (
            id, title, version, last_updated, is_dynamic, content_hash, document, cached_at, index_stamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            version = excluded.version,
            last_updated = excluded.last_updated,
            is_dynamic = excluded.is_dynamic,
            content_hash = excluded.content_hash,
            document = excluded.document,
            cached_at = excluded.cached_at,
            index_stamp = excluded.index_stamp
        "#,
        params![
            bundle.id,
            bundle.title,
            bundle.version,
            bundle.last_updated,
            bundle.is_dynamic as i32,
            content_hash,
            serde_json::to_string(bundle)?,
            format_datetime(Utc::now()),
            index_stamp,
        ],
    )?;
    Ok(())
}

/// 模板 ID 的序列化形式 (如 "two-tier")
fn template_key(question: &Question) -> StorageResult<String> {
    let value = serde_json::to_value(question.template_id())?;
    Ok(value.as_str().unwrap_or_default().to_string())
}
