//! 掌握度数据库操作模块
//!
//! 每个 (user_id, skill_key) 一行；技能键可以是知识点 ID 或事实 ID。

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use zhangwo_algo::MasteryMap;

use crate::storage::models::format_datetime;
use crate::storage::{StorageError, StorageResult};

/// 掌握度仓储
pub struct MasteryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MasteryRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn get(&self, user_id: &str, skill_key: &str) -> StorageResult<Option<f64>> {
        let conn = self.get_connection()?;

        let value = conn
            .query_row(
                "SELECT value FROM mastery WHERE user_id = ?1 AND skill_key = ?2",
                params![user_id, skill_key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 用户的完整掌握度映射
    pub fn get_map(&self, user_id: &str) -> StorageResult<MasteryMap> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare("SELECT skill_key, value FROM mastery WHERE user_id = ?1")?;
        let map: MasteryMap = stmt
            .query_map([user_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<Result<_, _>>()?;

        Ok(map)
    }

    pub fn put(&self, user_id: &str, skill_key: &str, value: f64) -> StorageResult<()> {
        let mut entry = MasteryMap::new();
        entry.insert(skill_key.to_string(), value);
        self.put_many(user_id, &entry)
    }

    /// 批量写入 (单一事务)
    pub fn put_many(&self, user_id: &str, entries: &MasteryMap) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        upsert_entries(&tx, user_id, entries)?;
        tx.commit()?;

        Ok(())
    }

    pub fn delete(&self, user_id: &str, skill_key: &str) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let affected = conn.execute(
            "DELETE FROM mastery WHERE user_id = ?1 AND skill_key = ?2",
            params![user_id, skill_key],
        )?;
        Ok(affected > 0)
    }

    fn get_connection(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }
}

/// 在调用方的连接/事务中写入掌握度条目
pub(crate) fn upsert_entries(conn: &Connection, user_id: &str, entries: &MasteryMap) -> StorageResult<()> {
    let now = format_datetime(Utc::now());
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO mastery (user_id, skill_key, value, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(user_id, skill_key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )?;

    for (skill_key, value) in entries {
        stmt.execute(params![user_id, skill_key, value, now])?;
    }

    Ok(())
}
