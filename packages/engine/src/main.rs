use std::sync::Arc;

use zhangwo_engine::config::EngineConfig;
use zhangwo_engine::logging;
use zhangwo_engine::remote::{MemoryRemoteStore, RemoteStore};
use zhangwo_engine::seed::{self, FRACTIONS_BUNDLE_ID, TIMES_TABLES_BUNDLE_ID};
use zhangwo_engine::storage::SessionType;
use zhangwo_engine::{open_remote, open_storage, EngineResult, LearningEngine};

const DEMO_USER: &str = "demo-student";

/// 脚本化作答：每四题答错一题
fn scripted_answer(index: usize) -> bool {
    index % 4 != 3
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = EngineConfig::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "demo run failed");
        std::process::exit(1);
    }
}

async fn run(config: EngineConfig) -> EngineResult<()> {
    let storage = open_storage(&config)?;
    tracing::info!(db_path = storage.db_path(), "local database ready");

    let remote: Arc<dyn RemoteStore> = if config.api_base_url.is_some() {
        open_remote(&config)?
    } else {
        let memory = Arc::new(MemoryRemoteStore::new());
        seed::seed_demo_content(&memory);
        memory as Arc<dyn RemoteStore>
    };

    let mut engine = LearningEngine::new(config, storage, remote);
    let loaded = engine.load(DEMO_USER).await?;
    tracing::info!(pull = ?loaded.pull, recovered = ?loaded.recovered_session, "profile loaded");

    // A crash-recovered session is finished first
    if loaded.recovered_session.is_some() {
        practice(&mut engine).await?;
    }

    for (bundle_id, session_type) in [
        (FRACTIONS_BUNDLE_ID, SessionType::Practice),
        (TIMES_TABLES_BUNDLE_ID, SessionType::Drill),
    ] {
        let first = engine.start_session(bundle_id, session_type).await?;
        if first.is_exhausted() {
            tracing::info!(bundle_id, rationale = %first.rationale, "nothing to practice");
            continue;
        }
        practice(&mut engine).await?;
    }

    let report = engine.sync_now().await?;
    tracing::info!(
        committed = report.committed,
        sessions = report.sessions_uploaded,
        error = ?report.error,
        "sync finished"
    );

    if let Some(stats) = engine.stats() {
        tracing::info!(
            power_points = stats.power_points,
            hero_level = stats.hero_level,
            streak = stats.streak_count,
            achievements = ?stats.unlocked_achievements,
            "final progress"
        );
    }

    Ok(())
}

async fn practice(engine: &mut LearningEngine) -> EngineResult<()> {
    let mut index = 0;
    while let Some(question) = engine.current_question() {
        tracing::info!(
            question_id = %question.id,
            prompt = question.payload.prompt(),
            rationale = engine.current_rationale().unwrap_or_default(),
            "question"
        );

        let outcome = engine
            .submit_response(scripted_answer(index), 2_000 + index as u64 * 150)
            .await?;
        for update in &outcome.mastery_updates {
            tracing::info!(
                skill = %update.skill_key,
                before = %format!("{:.3}", update.before),
                after = %format!("{:.3}", update.after),
                correct = outcome.is_correct,
                "mastery"
            );
        }
        if outcome.leveled_up {
            tracing::info!(level = outcome.hero_level, "level up");
        }
        index += 1;
    }

    if let Some(session) = engine.session() {
        tracing::info!(
            session_id = %session.id,
            questions = session.logs.len(),
            accuracy = %format!("{:.1}%", session.accuracy()),
            points = session.points_gained,
            status = session.status.as_str(),
            "session finished"
        );
    }
    Ok(())
}
