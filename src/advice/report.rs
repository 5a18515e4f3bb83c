//! 纯文本报告

use std::fmt::Write as _;

use crate::advice::record::MedicalAdvice;

const RULE_WIDTH: usize = 60;
pub const DISCLAIMER: &str =
    "免责声明: 本建议由AI生成，仅供参考，不能替代专业医疗诊断。如有紧急情况请立即就医。用药前请咨询医生或药师。";

fn urgency_warning(level: u8) -> Option<&'static str> {
    match level {
        1 => Some("立即拨打急救电话或前往急诊科！"),
        2 => Some("24小时内就医，不要延误！"),
        _ => None,
    }
}

fn or_fallback<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

pub fn render_report(advice: &MedicalAdvice) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "医疗建议报告");
    let _ = writeln!(out, "{rule}");

    let _ = writeln!(out, "\n[诊断分析]");
    for (i, diagnosis) in advice.possible_diagnoses.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, diagnosis);
    }

    let _ = writeln!(
        out,
        "\n[紧急程度] {}级 - {}",
        advice.urgency_level,
        advice.urgency_description()
    );
    if advice.urgency_assumed {
        let _ = writeln!(out, "  (模型未给出紧急程度，已按默认等级处理)");
    }
    if let Some(warning) = urgency_warning(advice.urgency_level) {
        let _ = writeln!(out, "  !! {warning}");
    }

    let _ = writeln!(out, "[推荐科室] {}", advice.recommended_department);

    if advice.otc_recommendations.is_empty() {
        let _ = writeln!(out, "\n[药品建议] 无适用推荐");
    } else {
        let _ = writeln!(out, "\n[药品建议]");
        for med in &advice.otc_recommendations {
            let _ = writeln!(
                out,
                "  - {}: {}",
                or_fallback(&med.name, "未命名药品"),
                or_fallback(&med.dose, "用法未指定")
            );
        }
    }

    if !advice.self_care_advice.is_empty() {
        let _ = writeln!(out, "\n[自我护理]");
        for (i, tip) in advice.self_care_advice.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, tip);
        }
    }

    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "{DISCLAIMER}");
    let _ = write!(out, "{rule}");
    out
}
