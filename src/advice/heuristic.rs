//! 标签式文本抽取
//!
//! 面向不支持结构化输出的模型：逐行扫描固定的中文标签（诊断分析、紧急程度、推荐科室、
//! 药品建议、自我护理建议），按固定分隔符拆分列表，拼出候选记录。
//! 缺失的紧急程度与科室留空，由校验阶段补默认值。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::advice::validate::{first_number, integer_token, CandidateAdvice, CandidateOtc};

/// 列表分隔符（诊断、自我护理建议）
pub const LIST_DELIMITERS: &[char] = &['、', '，', ',', '；', ';'];
/// 多个药品之间的分隔符
const MEDICATION_DELIMITERS: &[char] = &['、', '；', ';'];
/// 药品名与用法之间的分隔符（取第一个）
const NAME_DOSE_DELIMITERS: &[char] = &['，', ',', '：', ':', '(', '（'];
/// 行首的 Markdown / 列表装饰
const LINE_DECORATIONS: &[char] = &['#', '*', '-', '>', '【', '】', ' ', '\t', '•'];

struct LabelPatterns {
    diagnoses: Regex,
    urgency: Regex,
    department: Regex,
    medications: Regex,
    self_care: Regex,
}

fn patterns() -> &'static LabelPatterns {
    static CACHED: OnceLock<LabelPatterns> = OnceLock::new();
    CACHED.get_or_init(|| {
        let build = |labels: &str| {
            Regex::new(&format!(r"^(?:{labels})[\s*】]*[：:][\s*]*(.*)$"))
                .expect("label regex must compile")
        };
        LabelPatterns {
            diagnoses: build("诊断分析|可能的诊断|可能诊断|初步诊断|诊断"),
            urgency: build("紧急程度|紧急等级|紧急级别"),
            department: build("推荐科室|建议科室|就诊科室"),
            medications: build("药品建议|用药建议|推荐药物|非处方药建议"),
            self_care: build("自我护理建议|自我护理|护理建议|生活建议"),
        }
    })
}

/// 行首的列表序号：`1.`、`2、`、`3)`、`（一）`、`二、`
fn list_ordinal() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"^(?:\d+\s*[.．、)）]|[（(][一二三四五六七八九十\d]+[）)]|[一二三四五六七八九十]+[、.．])")
            .expect("ordinal regex must compile")
    })
}

fn strip_decorations(line: &str) -> &str {
    let line = line.trim().trim_start_matches(LINE_DECORATIONS);
    let line = match list_ordinal().find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    };
    line.trim_start_matches(LINE_DECORATIONS).trim()
}

fn split_list(value: &str, delimiters: &[char]) -> Vec<String> {
    value
        .split(delimiters)
        .map(|s| s.trim().trim_end_matches(['。', '.']).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_none_marker(value: &str) -> bool {
    matches!(value.trim(), "" | "无" | "暂无" | "无适用推荐" | "none" | "None")
}

/// 科室取第一个词（字母、数字、汉字），与 `(\w+)` 等价
fn first_word(value: &str) -> Option<String> {
    let word: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!word.is_empty()).then_some(word)
}

fn parse_medication(item: &str) -> CandidateOtc {
    let item = item.trim();
    match item.find(NAME_DOSE_DELIMITERS) {
        Some(pos) => {
            let name = item[..pos].trim();
            let sep_len = item[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
            let dose = item[pos + sep_len..]
                .trim()
                .trim_end_matches([')', '）'])
                .trim();
            CandidateOtc {
                name: Some(name.to_string()),
                dose: (!dose.is_empty()).then(|| dose.to_string()),
            }
        }
        None => CandidateOtc {
            name: Some(item.to_string()),
            dose: None,
        },
    }
}

/// 扫描文本；一个标签都没命中时返回 None
pub fn extract_labeled_fields(text: &str) -> Option<CandidateAdvice> {
    let p = patterns();
    let mut candidate = CandidateAdvice::default();
    let mut matched = false;

    for raw_line in text.lines() {
        let line = strip_decorations(raw_line);
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = p.diagnoses.captures(line) {
            matched = true;
            if candidate.possible_diagnoses.is_empty() {
                candidate.possible_diagnoses = split_list(&caps[1], LIST_DELIMITERS);
            }
        } else if let Some(caps) = p.urgency.captures(line) {
            matched = true;
            if candidate.urgency_level.is_none() {
                candidate.urgency_level = first_number(&caps[1]).map(|token| {
                    integer_token(token)
                        .map(Value::from)
                        .unwrap_or_else(|| Value::from(token))
                });
            }
        } else if let Some(caps) = p.department.captures(line) {
            matched = true;
            if candidate.recommended_department.is_none() {
                candidate.recommended_department = first_word(&caps[1]);
            }
        } else if let Some(caps) = p.medications.captures(line) {
            matched = true;
            let value = &caps[1];
            if !is_none_marker(value) {
                candidate.otc_recommendations.extend(
                    split_list(value, MEDICATION_DELIMITERS)
                        .iter()
                        .map(|item| parse_medication(item)),
                );
            }
        } else if let Some(caps) = p.self_care.captures(line) {
            matched = true;
            if candidate.self_care_advice.is_empty() && !is_none_marker(&caps[1]) {
                candidate.self_care_advice = split_list(&caps[1], LIST_DELIMITERS);
            }
        }
    }

    matched.then_some(candidate)
}
