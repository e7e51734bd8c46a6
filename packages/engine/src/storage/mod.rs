//! SQLite 离线存储模块
//!
//! 提供本地 SQLite 数据库存储功能，支持：
//! - 内容包与题目的本地缓存
//! - 练习会话的逐步写入 (崩溃恢复)
//! - 掌握度与学生统计的持久化
//! - 同步元数据

// ============================================================
// 子模块声明
// ============================================================

pub mod bundle;
pub mod mastery;
pub mod migrations;
pub mod models;
pub mod session;
pub mod stats;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use bundle::{BundleRepository, StoredBundle};
pub use mastery::MasteryRepository;
pub use migrations::{migration_history, run_migrations, schema_version};
pub use models::*;
pub use session::SessionRepository;
pub use stats::StatsRepository;

// ============================================================
// 依赖导入
// ============================================================

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use zhangwo_algo::MasteryMap;

// ============================================================
// 错误类型定义
// ============================================================

/// 存储模块错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("迁移错误: {0}")]
    Migration(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("数据未找到: {0}")]
    NotFound(String),

    #[error("锁获取失败: {0}")]
    LockError(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// sync_metadata 中记录上次同步时间的键
pub const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

// ============================================================
// Storage - 统一存储结构体
// ============================================================

/// 统一存储结构体
///
/// 克隆开销很小 (共享同一个连接)，可在会话缓冲、同步引擎与后台任务之间传递。
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Storage {
    /// 打开 (或创建) 数据库文件并运行迁移
    ///
    /// 自动启用 WAL 模式和外键约束。
    pub fn new<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        let connection = Connection::open(&db_path)?;

        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA cache_size=-64000;",
        )?;

        Self::from_connection(connection, path_str)
    }

    /// 创建内存数据库（用于测试）
    pub fn in_memory() -> StorageResult<Self> {
        let connection = Connection::open_in_memory()?;
        connection.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::from_connection(connection, ":memory:".to_string())
    }

    fn from_connection(connection: Connection, db_path: String) -> StorageResult<Self> {
        migrations::run_migrations(&connection)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(connection)),
            db_path,
        })
    }

    /// 获取数据库路径
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// 获取共享连接 (供仓储使用)
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// 获取数据库连接的锁
    pub fn get_connection(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    // ========== 仓储访问 ==========

    pub fn bundles(&self) -> BundleRepository {
        BundleRepository::new(self.connection())
    }

    pub fn sessions(&self) -> SessionRepository {
        SessionRepository::new(self.connection())
    }

    pub fn mastery(&self) -> MasteryRepository {
        MasteryRepository::new(self.connection())
    }

    pub fn stats(&self) -> StatsRepository {
        StatsRepository::new(self.connection())
    }

    /// 执行事务
    ///
    /// 闭包返回错误时整个事务回滚。
    pub fn transaction<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let mut conn = self.get_connection()?;

        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;

        Ok(result)
    }

    /// 原子写入一次答题产生的全部状态
    ///
    /// 会话记录、变化的掌握度条目与学生统计在同一事务中落盘：
    /// 要么全部成功，要么全部不变。
    pub fn commit_answer(
        &self,
        session: &AssessmentSession,
        mastery_changes: &MasteryMap,
        stats: &StudentStats,
    ) -> StorageResult<()> {
        self.transaction(|conn| {
            session.upsert(conn)?;
            mastery::upsert_entries(conn, &session.user_id, mastery_changes)?;
            stats.upsert(conn)?;
            Ok(())
        })
    }

    // ========== 同步元数据操作 ==========

    /// 获取同步元数据
    pub fn get_sync_metadata(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.get_connection()?;

        let value = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 设置同步元数据
    pub fn set_sync_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.get_connection()?;

        conn.execute(
            "INSERT OR REPLACE INTO sync_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, format_datetime(Utc::now())],
        )?;

        Ok(())
    }

    /// 删除同步元数据
    pub fn delete_sync_metadata(&self, key: &str) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let affected = conn.execute("DELETE FROM sync_metadata WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    /// 统计用户待上传的会话数 (COMPLETED)
    pub fn pending_session_count(&self, user_id: &str) -> StorageResult<i64> {
        let conn = self.get_connection()?;

        let count = conn.query_row(
            "SELECT COUNT(*) FROM assessment_session WHERE user_id = ?1 AND status = 'COMPLETED'",
            [user_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}

// ============================================================
// 单元测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_storage_runs_migrations() {
        let storage = Storage::in_memory().expect("open storage");
        let conn = storage.get_connection().unwrap();
        let version = migrations::schema_version(&conn).unwrap();
        assert_eq!(version, migrations::CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_sync_metadata_round_trip() {
        let storage = Storage::in_memory().unwrap();

        assert_eq!(storage.get_sync_metadata(LAST_SYNC_TIME_KEY).unwrap(), None);
        storage
            .set_sync_metadata(LAST_SYNC_TIME_KEY, "2026-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(
            storage.get_sync_metadata(LAST_SYNC_TIME_KEY).unwrap().as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
        assert!(storage.delete_sync_metadata(LAST_SYNC_TIME_KEY).unwrap());
        assert!(!storage.delete_sync_metadata(LAST_SYNC_TIME_KEY).unwrap());
    }

    #[test]
    fn test_commit_answer_is_atomic() {
        let storage = Storage::in_memory().unwrap();
        let session = AssessmentSession::new("user-1", SessionType::Practice, "fractions");
        let stats = StudentStats::new("user-1");
        let mut changes = MasteryMap::new();
        changes.insert("atom-a".to_string(), 0.66);

        storage.commit_answer(&session, &changes, &stats).unwrap();
        assert!(storage.sessions().get(&session.id).unwrap().is_some());
        assert_eq!(storage.mastery().get_map("user-1").unwrap().get("atom-a"), Some(&0.66));

        // Out-of-range mastery violates the CHECK constraint; nothing else lands
        let mut other = AssessmentSession::new("user-2", SessionType::Practice, "fractions");
        other.points_gained = 5;
        let mut bad = MasteryMap::new();
        bad.insert("atom-a".to_string(), 1.5);
        assert!(storage
            .commit_answer(&other, &bad, &StudentStats::new("user-2"))
            .is_err());
        assert!(storage.sessions().get(&other.id).unwrap().is_none());
        assert!(storage.stats().get("user-2").unwrap().is_none());
    }
}
