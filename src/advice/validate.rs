//! 候选记录与校验
//!
//! 各解析阶段只产出宽松的 CandidateAdvice；validate 负责强制规则与默认值，
//! 是构造 MedicalAdvice 的唯一入口。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::advice::record::{
    MedicalAdvice, OtcRecommendation, DEFAULT_DEPARTMENT, DEFAULT_URGENCY, MAX_URGENCY,
    MIN_URGENCY,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("possible_diagnoses must contain at least one entry")]
    EmptyDiagnoses,

    #[error("urgency_level {0} is outside 1-5")]
    UrgencyOutOfRange(i64),

    #[error("urgency_level {0} is not an integer")]
    UrgencyNotInteger(String),

    #[error("otc_recommendations[{0}] has no name")]
    MedicationWithoutName(usize),
}

/// 宽松反序列化的字符串列表：接受数组、单个字符串或 null；对象、数字等其他形态与非字符串项一律丢弃
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_medications<'de, D>(deserializer: D) -> Result<Vec<CandidateOtc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => CandidateOtc {
                name: Some(name),
                dose: None,
            },
            other => serde_json::from_value(other).unwrap_or_default(),
        })
        .collect())
}

fn text_field(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(text_field(Option::<Value>::deserialize(deserializer)?))
}

/// 药品候选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CandidateOtc {
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub dose: Option<String>,
}

/// 未经校验的候选记录
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CandidateAdvice {
    #[serde(default, alias = "possibleDiagnoses", deserialize_with = "lenient_list")]
    pub possible_diagnoses: Vec<String>,
    #[serde(default, alias = "urgencyLevel")]
    pub urgency_level: Option<Value>,
    #[serde(default, alias = "recommendedDepartment", deserialize_with = "lenient_text")]
    pub recommended_department: Option<String>,
    #[serde(default, alias = "otcRecommendations", deserialize_with = "lenient_medications")]
    pub otc_recommendations: Vec<CandidateOtc>,
    #[serde(default, alias = "selfCareAdvice", deserialize_with = "lenient_list")]
    pub self_care_advice: Vec<String>,
}

/// 文本中的第一个数字记号，含可选负号与小数部分（如 "2级" -> "2"，"-2.5" -> "-2.5"）
pub fn first_number(text: &str) -> Option<&str> {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    let pattern = CACHED.get_or_init(|| {
        Regex::new(r"[-－]?\d+(?:\.\d+)?").expect("number regex must compile")
    });
    pattern.find(text).map(|m| m.as_str())
}

/// 数字记号转整数；小数部分非零时返回 None
pub fn integer_token(token: &str) -> Option<i64> {
    let normalized = token.replace('－', "-");
    if let Ok(i) = normalized.parse::<i64>() {
        return Some(i);
    }
    let f: f64 = normalized.parse().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

/// 紧急程度强制转换：返回 (等级, 是否为默认值)
///
/// 缺失或无数字的文本 -> 默认 3；数值超出 1-5 或非整数 -> 校验失败。
pub fn coerce_urgency(value: Option<&Value>) -> Result<(u8, bool), ValidationError> {
    let level = match value {
        None | Some(Value::Null) => return Ok((DEFAULT_URGENCY, true)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f.is_finite() {
                    f as i64
                } else {
                    return Err(ValidationError::UrgencyNotInteger(n.to_string()));
                }
            }
        },
        Some(Value::String(s)) => match first_number(s) {
            Some(token) => integer_token(token)
                .ok_or_else(|| ValidationError::UrgencyNotInteger(token.to_string()))?,
            None => return Ok((DEFAULT_URGENCY, true)),
        },
        Some(_) => return Ok((DEFAULT_URGENCY, true)),
    };

    if (MIN_URGENCY as i64..=MAX_URGENCY as i64).contains(&level) {
        Ok((level as u8, false))
    } else {
        Err(ValidationError::UrgencyOutOfRange(level))
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 校验并补默认值，产出最终记录
pub fn validate(candidate: CandidateAdvice) -> Result<MedicalAdvice, ValidationError> {
    let possible_diagnoses = clean_list(candidate.possible_diagnoses);
    if possible_diagnoses.is_empty() {
        return Err(ValidationError::EmptyDiagnoses);
    }

    let (urgency_level, urgency_assumed) = coerce_urgency(candidate.urgency_level.as_ref())?;

    let recommended_department = candidate
        .recommended_department
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string());

    let mut otc_recommendations = Vec::with_capacity(candidate.otc_recommendations.len());
    for (index, med) in candidate.otc_recommendations.into_iter().enumerate() {
        let name = med
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or(ValidationError::MedicationWithoutName(index))?;
        let dose = med.dose.map(|d| d.trim().to_string()).unwrap_or_default();
        otc_recommendations.push(OtcRecommendation { name, dose });
    }

    if urgency_assumed {
        tracing::warn!(
            "urgency level missing or unreadable, defaulting to {}",
            DEFAULT_URGENCY
        );
    }

    Ok(MedicalAdvice {
        possible_diagnoses,
        urgency_level,
        recommended_department,
        otc_recommendations,
        self_care_advice: clean_list(candidate.self_care_advice),
        urgency_assumed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(value: Value) -> CandidateAdvice {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_record_passes() {
        let advice = validate(candidate(json!({
            "possible_diagnoses": ["偏头痛"],
            "urgency_level": 4,
            "recommended_department": "神经内科",
            "otc_recommendations": [{"name": "布洛芬", "dose": "200mg"}],
            "self_care_advice": ["休息"]
        })))
        .unwrap();
        assert_eq!(advice.urgency_level, 4);
        assert!(!advice.urgency_assumed);
        assert_eq!(advice.otc_recommendations[0].dose, "200mg");
    }

    #[test]
    fn test_empty_diagnoses_rejected() {
        let err = validate(candidate(json!({"possible_diagnoses": [], "urgency_level": 3})));
        assert_eq!(err, Err(ValidationError::EmptyDiagnoses));
        let err = validate(candidate(json!({"possible_diagnoses": ["  "], "urgency_level": 3})));
        assert_eq!(err, Err(ValidationError::EmptyDiagnoses));
    }

    #[test]
    fn test_urgency_out_of_range_rejected() {
        let err = validate(candidate(json!({"possible_diagnoses": ["x"], "urgency_level": 7})));
        assert_eq!(err, Err(ValidationError::UrgencyOutOfRange(7)));
        let err = validate(candidate(json!({"possible_diagnoses": ["x"], "urgency_level": 0})));
        assert_eq!(err, Err(ValidationError::UrgencyOutOfRange(0)));
        let err = validate(candidate(json!({"possible_diagnoses": ["x"], "urgency_level": 2.5})));
        assert!(matches!(err, Err(ValidationError::UrgencyNotInteger(_))));
    }

    #[test]
    fn test_urgency_coercion() {
        assert_eq!(coerce_urgency(Some(&json!("2"))), Ok((2, false)));
        assert_eq!(coerce_urgency(Some(&json!("2级"))), Ok((2, false)));
        assert_eq!(coerce_urgency(Some(&json!(3.0))), Ok((3, false)));
        assert_eq!(coerce_urgency(Some(&json!("高"))), Ok((3, true)));
        assert_eq!(coerce_urgency(None), Ok((3, true)));
        assert_eq!(coerce_urgency(Some(&json!("9"))), Err(ValidationError::UrgencyOutOfRange(9)));
    }

    #[test]
    fn test_defaults_and_lenient_shapes() {
        let advice = validate(candidate(json!({
            "possibleDiagnoses": "感冒",
            "otc_recommendations": ["维C泡腾片"],
            "self_care_advice": null
        })))
        .unwrap();
        assert_eq!(advice.possible_diagnoses, vec!["感冒"]);
        assert_eq!(advice.recommended_department, DEFAULT_DEPARTMENT);
        assert_eq!(advice.urgency_level, DEFAULT_URGENCY);
        assert!(advice.urgency_assumed);
        assert_eq!(advice.otc_recommendations, vec![OtcRecommendation::new("维C泡腾片", "")]);
        assert!(advice.self_care_advice.is_empty());
    }

    #[test]
    fn test_non_text_diagnoses_are_not_accepted() {
        let err = validate(candidate(json!({"possible_diagnoses": {"a": 1}, "urgency_level": 3})));
        assert_eq!(err, Err(ValidationError::EmptyDiagnoses));
        let err = validate(candidate(json!({"possible_diagnoses": 42, "urgency_level": 3})));
        assert_eq!(err, Err(ValidationError::EmptyDiagnoses));
        let err = validate(candidate(json!({"possible_diagnoses": [{"a": 1}, 7], "urgency_level": 3})));
        assert_eq!(err, Err(ValidationError::EmptyDiagnoses));
    }

    #[test]
    fn test_medication_without_name_rejected() {
        let err = validate(candidate(json!({
            "possible_diagnoses": ["x"],
            "urgency_level": 3,
            "otc_recommendations": [{"name": "a"}, {"dose": "1片"}]
        })));
        assert_eq!(err, Err(ValidationError::MedicationWithoutName(1)));
    }

    #[test]
    fn test_urgency_text_keeps_sign_and_fraction() {
        assert_eq!(
            coerce_urgency(Some(&json!("-2"))),
            Err(ValidationError::UrgencyOutOfRange(-2))
        );
        assert_eq!(
            coerce_urgency(Some(&json!("2.5"))),
            Err(ValidationError::UrgencyNotInteger("2.5".into()))
        );
        assert_eq!(coerce_urgency(Some(&json!("2.0级"))), Ok((2, false)));
        let err = validate(candidate(json!({"possible_diagnoses": ["x"], "urgency_level": "-2"})));
        assert_eq!(err, Err(ValidationError::UrgencyOutOfRange(-2)));
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("紧急程度 4 级"), Some("4"));
        assert_eq!(first_number("等级：-3"), Some("-3"));
        assert_eq!(first_number("无"), None);
        assert_eq!(integer_token("4"), Some(4));
        assert_eq!(integer_token("4.5"), None);
    }
}
