//! # zhangwo-algo - 掌握度学习核心算法库
//!
//! 本 crate 提供纯 Rust 实现的自适应练习算法:
//!
//! - **Bayesian Knowledge Tracing** - 基于答题证据的掌握度估计
//! - **Mastery-gated Selection** - 前置知识门控的下一题选择
//! - **Procedural Drills** - 算术事实题目的程序化生成
//!
//! ## 设计理念
//!
//! - **纯计算** - 无 I/O、无时钟依赖，所有状态由调用方传入
//! - **可复现** - 随机性来自可设种子的 ChaCha8 生成器
//! - **充分测试** - 单元测试与属性测试覆盖所有公开行为
//!
//! ## 模块结构
//!
//! - [`bkt`] - BKT 掌握度更新 (猜测、失误、习得概率)
//! - [`selection`] - 选题引擎 (资格判定、优先知识点、动态训练阶段)
//! - [`generator`] - 训练题目生成 (选择题/数值题、连对放大)
//! - [`sanitize`] - 数据清洗 (数值稳定性、参数诊断)
//! - [`types`] - 公共类型和常量
//!
//! ## 使用示例
//!
//! ```rust
//! use zhangwo_algo::{bkt, MasteryMap, RecentHistory, SelectionContext, SelectionEngine};
//!
//! let posterior = bkt::update(0.25, true);
//! assert!(posterior > 0.25);
//!
//! let mut engine = SelectionEngine::with_seed(42);
//! let mastery = MasteryMap::new();
//! let recent = RecentHistory::default();
//! # let bundle = zhangwo_algo::SubjectBundle {
//! #     id: "empty".into(), title: "Empty".into(), curriculum: vec![], questions: vec![],
//! #     version: "1.0.0".into(), last_updated: "2026-01-01T00:00:00Z".into(), is_dynamic: false,
//! # };
//! let selection = engine.select_next(SelectionContext::new(&bundle, &mastery, &recent));
//! assert!(selection.is_exhausted());
//! ```

// ============================================================================
// 模块声明
// ============================================================================

pub mod bkt;
pub mod generator;
pub mod sanitize;
pub mod selection;
pub mod types;

// ============================================================================
// 重新导出
// ============================================================================

/// 重新导出所有公共类型
pub use types::*;

/// 重新导出 BKT 模型
pub use bkt::{BktParams, MasteryUpdate};

/// 重新导出选题引擎
pub use selection::{SelectionContext, SelectionEngine, SelectionParams};

/// 重新导出参数诊断
pub use sanitize::{diagnose_params, ParamDiagnostics};
