//! 结构化医疗建议记录
//!
//! 只有通过校验的记录才会被构造；字段名与模型输出的 JSON 一致（snake_case）。

use serde::{Deserialize, Serialize};

/// 未给出紧急程度时的默认值（中度）
pub const DEFAULT_URGENCY: u8 = 3;
/// 未给出科室时的默认科室
pub const DEFAULT_DEPARTMENT: &str = "全科";
pub const MIN_URGENCY: u8 = 1;
pub const MAX_URGENCY: u8 = 5;

/// 非处方药建议
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtcRecommendation {
    pub name: String,
    #[serde(default)]
    pub dose: String,
}

impl OtcRecommendation {
    pub fn new(name: impl Into<String>, dose: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dose: dose.into(),
        }
    }
}

/// 医疗建议：诊断至少一项，紧急程度 1-5（越小越紧急）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MedicalAdvice {
    pub possible_diagnoses: Vec<String>,
    pub urgency_level: u8,
    pub recommended_department: String,
    pub otc_recommendations: Vec<OtcRecommendation>,
    pub self_care_advice: Vec<String>,
    /// 紧急程度是否为默认值而非模型给出（不序列化）
    #[serde(skip)]
    pub urgency_assumed: bool,
}

impl MedicalAdvice {
    /// 写入对话记忆的 assistant 内容
    pub fn to_turn_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    pub fn urgency_description(&self) -> &'static str {
        urgency_description(self.urgency_level)
    }
}

pub fn urgency_description(level: u8) -> &'static str {
    match level {
        1 => "紧急就医 (需立即前往急诊)",
        2 => "高度紧急 (24小时内就医)",
        3 => "中度紧急 (2-3天内就医)",
        4 => "轻度紧急 (1周内就医)",
        5 => "可在家观察 (注意症状变化)",
        _ => "中度紧急",
    }
}
