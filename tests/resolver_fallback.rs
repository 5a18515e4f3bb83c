//! 回复解析回退链集成测试：不同模型输出形态下的恢复结果

#[cfg(test)]
mod tests {
    use medassist::advice::{render_report, ResolveError, ResponseResolver, StageFailure};

    const EMBEDDED: &str = r#"{"possible_diagnoses":["胃食管反流"],"urgency_level":"4","recommended_department":"消化内科","otc_recommendations":[{"name":"铝碳酸镁","dose":"饭后嚼服"}],"self_care_advice":["睡前3小时不进食","抬高床头"]}"#;

    #[test]
    fn test_extraction_matches_embedded_json() {
        let resolver = ResponseResolver::default();
        let alone = resolver.resolve(EMBEDDED).unwrap();
        let wrapped = resolver
            .resolve(&format!("根据症状判断：\n{EMBEDDED}\n以上仅供参考。"))
            .unwrap();
        assert_eq!(alone, wrapped);
        assert_eq!(alone.urgency_level, 4);
    }

    #[test]
    fn test_reasoning_model_labeled_output() {
        let text = "<think>患者描述胸口灼热……</think>\n\
                    **诊断分析**：胃食管反流；功能性消化不良\n\
                    **紧急程度**：4级\n\
                    **推荐科室**：消化内科\n\
                    **药品建议**：铝碳酸镁（饭后嚼服）\n\
                    **自我护理建议**：少食多餐、避免辛辣";
        let advice = ResponseResolver::default().resolve(text).unwrap();
        assert_eq!(advice.possible_diagnoses, vec!["胃食管反流", "功能性消化不良"]);
        assert_eq!(advice.urgency_level, 4);
        assert!(!advice.urgency_assumed);
        assert_eq!(advice.otc_recommendations[0].name, "铝碳酸镁");
        assert_eq!(advice.otc_recommendations[0].dose, "饭后嚼服");

        let report = render_report(&advice);
        assert!(report.contains("[推荐科室] 消化内科"));
    }

    #[test]
    fn test_numbered_label_list_resolves() {
        let advice = ResponseResolver::default()
            .resolve("1. 诊断分析：感冒\n2. 紧急程度：4\n3. 推荐科室：内科")
            .unwrap();
        assert_eq!(advice.possible_diagnoses, vec!["感冒"]);
        assert_eq!(advice.urgency_level, 4);
        assert_eq!(advice.recommended_department, "内科");
    }

    #[test]
    fn test_labels_only_get_defaults() {
        let advice = ResponseResolver::default()
            .resolve("可能诊断：偏头痛")
            .unwrap();
        assert_eq!(advice.urgency_level, 3);
        assert_eq!(advice.recommended_department, "全科");
        assert!(render_report(&advice).contains("默认等级"));
    }

    #[test]
    fn test_unrecoverable_text_reports_every_stage() {
        let err = ResponseResolver::default()
            .resolve("很抱歉，我无法提供医疗建议。")
            .unwrap_err();
        let ResolveError::RecoveryFailed { raw, attempts } = err;
        assert_eq!(raw, "很抱歉，我无法提供医疗建议。");
        let stages: Vec<&str> = attempts.iter().map(|a| a.stage).collect();
        assert_eq!(stages, vec!["direct", "extraction", "heuristic"]);
        assert_eq!(attempts[1].failure, StageFailure::NoJson);
        assert_eq!(attempts[2].failure, StageFailure::NoLabels);
    }
}
