//! Score normalization and classification

use serde::{Deserialize, Serialize};

/// Tag for the sigmoid normalization scheme.
pub const MODEL_VERSION: u32 = 3;

pub const HIGH_THRESHOLD: f64 = 0.70;
pub const MEDIUM_THRESHOLD: f64 = 0.35;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// `1 - exp(-raw / k)`, clamped into [0, 1]. Non-positive or non-finite raw
/// scores map to 0.
pub fn normalize_score(raw: f64, k: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 || !k.is_finite() || k <= 0.0 {
        return if raw == f64::INFINITY { 1.0 } else { 0.0 };
    }
    (1.0 - (-raw / k).exp()).clamp(0.0, 1.0)
}

pub fn classify(normalized: f64) -> RiskLevel {
    if normalized >= HIGH_THRESHOLD {
        RiskLevel::High
    } else if normalized >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
