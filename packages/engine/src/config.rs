//! 引擎配置
//!
//! 所有配置从环境变量读取 (调用方先执行 `dotenvy::dotenv()`)。
//! 非法值回退到默认值。

use std::path::PathBuf;
use std::time::Duration;

use zhangwo_algo::bkt::{DEFAULT_GUESS, DEFAULT_SLIP, DEFAULT_TRANSIT};
use zhangwo_algo::selection::{
    DEFAULT_ACCURACY_WINDOW, DEFAULT_ADVANCE_ACCURACY, DEFAULT_REVIEW_PROBABILITY,
};
use zhangwo_algo::{diagnose_params, BktParams, SelectionParams, DEFAULT_INITIAL_MASTERY, MASTERY_THRESHOLD};

use crate::progression::{DEFAULT_XP_PER_CORRECT, DEFAULT_XP_PER_INCORRECT};
use crate::session::DEFAULT_ABANDONED_TTL_HOURS;
use crate::sync::DEFAULT_SYNC_DEBOUNCE_MS;

/// 每个会话的默认题目上限
pub const DEFAULT_SESSION_QUESTION_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    /// 未设置时使用进程内远端存储
    pub api_base_url: Option<String>,
    pub auth_token: Option<String>,
    pub log_level: String,
    pub sync_debounce: Duration,
    pub bkt: BktParams,
    pub selection: SelectionParams,
    /// 达到上限后会话自动完成
    pub session_question_limit: usize,
    pub abandoned_session_ttl: chrono::Duration,
    pub xp_per_correct: u64,
    pub xp_per_incorrect: u64,
    /// 固定的选题随机种子 (测试与演示)
    pub selection_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/zhangwo.db"),
            api_base_url: None,
            auth_token: None,
            log_level: "info".to_string(),
            sync_debounce: Duration::from_millis(DEFAULT_SYNC_DEBOUNCE_MS),
            bkt: BktParams::default(),
            selection: SelectionParams::default(),
            session_question_limit: DEFAULT_SESSION_QUESTION_LIMIT,
            abandoned_session_ttl: chrono::Duration::hours(DEFAULT_ABANDONED_TTL_HOURS),
            xp_per_correct: DEFAULT_XP_PER_CORRECT,
            xp_per_incorrect: DEFAULT_XP_PER_INCORRECT,
            selection_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("ZHANGWO_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/zhangwo.db"));

        let api_base_url = env_string("ZHANGWO_API_BASE_URL");
        let auth_token = env_string("ZHANGWO_AUTH_TOKEN");
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bkt = BktParams {
            guess: env_probability("ZHANGWO_BKT_GUESS", DEFAULT_GUESS),
            slip: env_probability("ZHANGWO_BKT_SLIP", DEFAULT_SLIP),
            transit: env_probability("ZHANGWO_BKT_TRANSIT", DEFAULT_TRANSIT),
        };
        let diagnostics = diagnose_params(&bkt);
        let bkt = if diagnostics.is_healthy {
            bkt
        } else {
            tracing::warn!(issues = ?diagnostics.issues, "invalid BKT parameters, using defaults");
            BktParams::default()
        };

        let selection = SelectionParams {
            mastery_threshold: MASTERY_THRESHOLD,
            initial_mastery: env_probability("ZHANGWO_INITIAL_MASTERY", DEFAULT_INITIAL_MASTERY),
            review_probability: env_unit_interval("ZHANGWO_REVIEW_PROBABILITY", DEFAULT_REVIEW_PROBABILITY),
            advance_accuracy: env_unit_interval("ZHANGWO_ADVANCE_ACCURACY", DEFAULT_ADVANCE_ACCURACY),
            accuracy_window: DEFAULT_ACCURACY_WINDOW,
        };

        let session_question_limit =
            env_positive_usize("ZHANGWO_SESSION_QUESTION_LIMIT", DEFAULT_SESSION_QUESTION_LIMIT);
        let ttl_hours = env_positive_u64(
            "ZHANGWO_ABANDONED_TTL_HOURS",
            DEFAULT_ABANDONED_TTL_HOURS as u64,
        );

        Self {
            db_path,
            api_base_url,
            auth_token,
            log_level,
            sync_debounce: Duration::from_millis(env_u64(
                "ZHANGWO_SYNC_DEBOUNCE_MS",
                DEFAULT_SYNC_DEBOUNCE_MS,
            )),
            bkt,
            selection,
            session_question_limit,
            abandoned_session_ttl: abandoned_ttl(ttl_hours),
            xp_per_correct: env_u64("ZHANGWO_XP_CORRECT", DEFAULT_XP_PER_CORRECT),
            xp_per_incorrect: env_u64("ZHANGWO_XP_INCORRECT", DEFAULT_XP_PER_INCORRECT),
            selection_seed: std::env::var("ZHANGWO_SELECTION_SEED")
                .ok()
                .and_then(|value| value.parse::<u64>().ok()),
        }
    }
}

/// 超出 chrono 可表示范围的小时数退回默认值
fn abandoned_ttl(hours: u64) -> chrono::Duration {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or_else(|| chrono::Duration::hours(DEFAULT_ABANDONED_TTL_HOURS))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_positive_u64(key: &str, default: u64) -> u64 {
    match env_u64(key, default) {
        0 => default,
        value => value,
    }
}

fn env_positive_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|&value| value > 0)
        .unwrap_or(default)
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// 开区间 (0, 1)
fn env_probability(key: &str, default: f64) -> f64 {
    env_f64(key)
        .filter(|&value| value > 0.0 && value < 1.0)
        .unwrap_or(default)
}

/// 闭区间 [0, 1]
fn env_unit_interval(key: &str, default: f64) -> f64 {
    env_f64(key)
        .filter(|value| (0.0..=1.0).contains(value))
        .unwrap_or(default)
}
