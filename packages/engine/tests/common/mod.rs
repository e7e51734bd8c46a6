#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use zhangwo_algo::{Atom, AtomStatus, Chapter, Question, QuestionPayload, SubjectBundle, TemplateId};
use zhangwo_engine::{seed, EngineConfig, LearningEngine, MemoryRemoteStore, RemoteStore, Storage};

pub const USER: &str = "student-1";
pub const ARITHMETIC_BUNDLE_ID: &str = "arithmetic";

/// 固定种子、较长去抖窗口 (测试中只通过 sync_now 触发同步)
pub fn test_config() -> EngineConfig {
    EngineConfig {
        sync_debounce: Duration::from_secs(3600),
        selection_seed: Some(42),
        ..EngineConfig::default()
    }
}

/// 单章节、单知识点、`count` 道选择题的静态内容包
pub fn arithmetic_bundle(count: usize) -> SubjectBundle {
    let questions = (0..count)
        .map(|i| Question {
            id: format!("add-{i}"),
            atom_id: "addition".to_string(),
            version: "1.0.0".to_string(),
            fact_id: None,
            payload: QuestionPayload::Mcq {
                prompt: format!("What is {i} + 1?"),
                options: vec![(i + 1).to_string(), i.to_string()],
                answer_index: 0,
            },
        })
        .collect();

    SubjectBundle {
        id: ARITHMETIC_BUNDLE_ID.to_string(),
        title: "Arithmetic".to_string(),
        curriculum: vec![Chapter {
            id: "basics".to_string(),
            title: "Basics".to_string(),
            atoms: vec![Atom {
                id: "addition".to_string(),
                title: "Addition".to_string(),
                prerequisites: vec![],
                status: AtomStatus::Live,
                templates: vec![TemplateId::Mcq],
                drill: None,
            }],
        }],
        questions,
        version: "1.0.0".to_string(),
        last_updated: "2026-01-01T00:00:00.000Z".to_string(),
        is_dynamic: false,
    }
}

/// 已发布算术包与演示内容的进程内远端
pub fn seeded_remote() -> Arc<MemoryRemoteStore> {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.seed_bundle(arithmetic_bundle(12));
    seed::seed_demo_content(&remote);
    remote
}

pub fn engine_with(
    config: EngineConfig,
    storage: Storage,
    remote: &Arc<MemoryRemoteStore>,
) -> LearningEngine {
    let remote: Arc<dyn RemoteStore> = remote.clone();
    LearningEngine::new(config, storage, remote)
}

/// 内存数据库 + 已加载用户的引擎
pub async fn loaded_engine(config: EngineConfig) -> (LearningEngine, Storage, Arc<MemoryRemoteStore>) {
    let storage = Storage::in_memory().expect("in-memory storage");
    let remote = seeded_remote();
    let mut engine = engine_with(config, storage.clone(), &remote);
    engine.load(USER).await.expect("load user");
    (engine, storage, remote)
}
