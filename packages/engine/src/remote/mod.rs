//! 远端文档存储
//!
//! 引擎只通过 [`RemoteStore`] 访问远端：版本索引、内容包、学生快照的读取，
//! 以及原子批量提交。实现：
//! - [`HttpRemoteStore`] - reqwest + Bearer token 的 JSON 文档接口
//! - [`MemoryRemoteStore`] - 进程内实现 (离线开发与测试)

pub mod http;
pub mod memory;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zhangwo_algo::{MasteryMap, SubjectBundle};

use crate::storage::{AssessmentSession, StudentStats};

// ============================================================
// 错误类型定义
// ============================================================

/// 远端访问错误
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("网络错误: {0}")]
    Network(String),

    #[error("HTTP 状态错误: {0}")]
    Status(u16),

    #[error("响应解析失败: {0}")]
    Decode(String),

    #[error("批量提交被拒绝: {0}")]
    Rejected(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

// ============================================================
// 远端文档
// ============================================================

/// 版本索引条目 (每次访问内容包都会读取的小对象)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentVersionEntry {
    pub bundle_id: String,
    pub version: String,
    pub last_updated: String,
}

impl ContentVersionEntry {
    pub fn for_bundle(bundle: &SubjectBundle) -> Self {
        Self {
            bundle_id: bundle.id.clone(),
            version: bundle.version.clone(),
            last_updated: bundle.last_updated.clone(),
        }
    }
}

/// 加载时读取的远端学生快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStudentSnapshot {
    pub stats: Option<StudentStats>,
    #[serde(default)]
    pub mastery: MasteryMap,
    pub updated_at: DateTime<Utc>,
}

/// 批量提交中的单个写入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchWrite {
    /// 合并写入学生统计
    MergeStats { stats: StudentStats },
    /// 合并写入掌握度 (按键覆盖)
    MergeMastery { user_id: String, mastery: MasteryMap },
    /// 写入一条会话
    PutSession { session: AssessmentSession },
    /// 写入完整内容包
    PutBundle { bundle: SubjectBundle },
    /// 写入版本索引
    PutVersion { entry: ContentVersionEntry },
}

/// 原子批量写入：全部成功或全部失败，文档之间无顺序保证
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub writes: Vec<BatchWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: BatchWrite) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// 批次中的会话 ID
    pub fn session_ids(&self) -> Vec<String> {
        self.writes
            .iter()
            .filter_map(|write| match write {
                BatchWrite::PutSession { session } => Some(session.id.clone()),
                _ => None,
            })
            .collect()
    }
}

// ============================================================
// RemoteStore trait
// ============================================================

/// 远端文档存储接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 读取版本索引条目，不存在返回 None
    async fn version_entry(&self, bundle_id: &str) -> RemoteResult<Option<ContentVersionEntry>>;

    /// 读取完整内容包，不存在返回 None
    async fn fetch_bundle(&self, bundle_id: &str) -> RemoteResult<Option<SubjectBundle>>;

    /// 读取学生快照，不存在返回 None
    async fn fetch_student(&self, user_id: &str) -> RemoteResult<Option<RemoteStudentSnapshot>>;

    /// 原子提交批量写入
    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SessionType;

    #[test]
    fn test_batch_collects_session_ids() {
        let mut batch = WriteBatch::new();
        batch.push(BatchWrite::MergeStats {
            stats: StudentStats::new("user-1"),
        });
        let session = AssessmentSession::new("user-1", SessionType::Practice, "b1");
        batch.push(BatchWrite::PutSession {
            session: session.clone(),
        });

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.session_ids(), vec![session.id]);
    }

    #[test]
    fn test_batch_write_is_tagged() {
        let write = BatchWrite::PutVersion {
            entry: ContentVersionEntry {
                bundle_id: "b1".to_string(),
                version: "1.0.1".to_string(),
                last_updated: "2026-01-01T00:00:00Z".to_string(),
            },
        };
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["op"], "put_version");
        assert_eq!(json["entry"]["bundle_id"], "b1");
    }
}
