//! # zhangwo-engine - 离线优先的掌握度与同步引擎
//!
//! - [`storage`] - SQLite 本地存储 (内容包、会话、掌握度、学生统计)
//! - [`remote`] - 远端文档存储接口与实现
//! - [`cache`] - 版本校验的内容缓存
//! - [`session`] - 会话缓冲 (逐步落盘、崩溃恢复、放弃会话清理)
//! - [`progression`] / [`achievements`] - XP、等级、连续天数与成就
//! - [`sync`] - 原子批量同步与去抖调度
//! - [`engine`] - 表现层调用的 [`LearningEngine`]
//! - [`seed`] - 演示内容

pub mod achievements;
pub mod cache;
pub mod config;
pub mod engine;
pub mod logging;
pub mod progression;
pub mod remote;
pub mod seed;
pub mod session;
pub mod storage;
pub mod sync;

pub use cache::{BundleSource, CacheError, ContentCache};
pub use config::EngineConfig;
pub use engine::{AnswerOutcome, EngineError, EngineResult, LearningEngine, LoadReport};
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteError, RemoteStore};
pub use session::{AbandonOutcome, SessionBuffer, SessionError};
pub use storage::{SessionStatus, SessionType, Storage, StorageError, StorageResult};
pub use sync::{PullOutcome, SyncEngine, SyncReport, SyncScheduler};

use std::sync::Arc;

/// 打开配置中的数据库文件 (必要时创建目录)
pub fn open_storage(config: &EngineConfig) -> StorageResult<Storage> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Storage::new(&config.db_path)
}

/// 按配置选择远端：设置了 API 地址时使用 HTTP，否则使用进程内存储
pub fn open_remote(config: &EngineConfig) -> Result<Arc<dyn RemoteStore>, RemoteError> {
    match &config.api_base_url {
        Some(url) => {
            tracing::info!(base_url = %url, "using HTTP remote store");
            Ok(Arc::new(HttpRemoteStore::new(url.clone(), config.auth_token.clone())?))
        }
        None => {
            tracing::info!("no API base URL configured, using in-process remote store");
            Ok(Arc::new(MemoryRemoteStore::new()))
        }
    }
}
