//! Data Sanitization
//!
//! Numerical stability utilities.
//!
//! Functions:
//! - Probability sanitization
//! - Mastery map repair
//! - BKT parameter diagnostics

use crate::bkt::BktParams;
use crate::types::{MasteryMap, MAX_MASTERY, MIN_MASTERY};

/// 参数诊断结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamDiagnostics {
    pub is_healthy: bool,
    pub issues: Vec<String>,
}

/// 检查数组是否包含无效值 (NaN 或 Inf)
pub fn has_invalid_values(arr: &[f64]) -> bool {
    arr.iter().any(|&x| x.is_nan() || x.is_infinite())
}

/// 将概率值限制在掌握度区间内，NaN/Inf 视为最低值
pub fn sanitize_probability(p: f64) -> f64 {
    if !p.is_finite() {
        return MIN_MASTERY;
    }
    p.clamp(MIN_MASTERY, MAX_MASTERY)
}

/// 修复掌握度映射中的越界值，返回被修正的条目数
pub fn sanitize_mastery_map(mastery: &mut MasteryMap) -> usize {
    let mut repaired = 0;
    for value in mastery.values_mut() {
        let clean = sanitize_probability(*value);
        if clean != *value {
            *value = clean;
            repaired += 1;
        }
    }
    repaired
}

/// 诊断 BKT 参数
///
/// 每个参数必须落在 (0, 1)；guess + slip >= 1 时模型退化
/// （答对反而降低掌握度）。
pub fn diagnose_params(params: &BktParams) -> ParamDiagnostics {
    let mut issues = Vec::new();

    let values = [params.guess, params.slip, params.transit];
    if has_invalid_values(&values) {
        issues.push("parameters contain NaN or Inf".to_string());
    }

    for (name, value) in [
        ("guess", params.guess),
        ("slip", params.slip),
        ("transit", params.transit),
    ] {
        if !(value > 0.0 && value < 1.0) {
            issues.push(format!("{name} must be in (0, 1), got {value}"));
        }
    }

    if params.guess + params.slip >= 1.0 {
        issues.push(format!(
            "guess + slip must be < 1, got {}",
            params.guess + params.slip
        ));
    }

    ParamDiagnostics {
        is_healthy: issues.is_empty(),
        issues,
    }
}
