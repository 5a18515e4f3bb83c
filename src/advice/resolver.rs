//! 回复解析：有序回退链
//!
//! 整段 JSON -> 最大花括号片段 -> 标签抽取，每个阶段产出候选记录并经过同一校验；
//! 前一阶段失败才尝试下一阶段。全部失败时返回 RecoveryFailed 并保留原始文本。

use thiserror::Error;

use crate::advice::heuristic::extract_labeled_fields;
use crate::advice::record::MedicalAdvice;
use crate::advice::validate::{validate, CandidateAdvice, ValidationError};

/// 单阶段失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    #[error("no JSON object found")]
    NoJson,

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("no recognizable labels")]
    NoLabels,

    #[error("validation failed: {0}")]
    Invalid(#[from] ValidationError),
}

/// 一个阶段的尝试记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageAttempt {
    pub stage: &'static str,
    pub failure: StageFailure,
}

#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// 所有阶段均失败；raw 为原始累积文本，供调用方展示
    #[error("无法解析为有效的医疗建议 ({})", summarize(.attempts))]
    RecoveryFailed {
        raw: String,
        attempts: Vec<StageAttempt>,
    },
}

impl ResolveError {
    pub fn raw(&self) -> &str {
        match self {
            ResolveError::RecoveryFailed { raw, .. } => raw,
        }
    }
}

fn summarize(attempts: &[StageAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.stage, a.failure))
        .collect::<Vec<_>>()
        .join("; ")
}

/// 回退链中的一个阶段：输入整段文本，产出候选记录
pub trait ResolveStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn candidate(&self, text: &str) -> Result<CandidateAdvice, StageFailure>;
}

fn parse_candidate(json: &str) -> Result<CandidateAdvice, StageFailure> {
    serde_json::from_str(json).map_err(|e| StageFailure::Parse(e.to_string()))
}

/// 阶段 1：整段文本即 JSON 对象
#[derive(Debug, Default)]
pub struct DirectParse;

impl ResolveStage for DirectParse {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn candidate(&self, text: &str) -> Result<CandidateAdvice, StageFailure> {
        parse_candidate(text.trim())
    }
}

/// 阶段 2：取第一个 `{` 到最后一个 `}` 的片段（模型在 JSON 外包了说明文字）
#[derive(Debug, Default)]
pub struct BraceExtraction;

/// 最大花括号片段
pub fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

impl ResolveStage for BraceExtraction {
    fn name(&self) -> &'static str {
        "extraction"
    }

    fn candidate(&self, text: &str) -> Result<CandidateAdvice, StageFailure> {
        let span = outermost_braces(text).ok_or(StageFailure::NoJson)?;
        parse_candidate(span)
    }
}

/// 阶段 3：标签抽取
#[derive(Debug, Default)]
pub struct LabelHeuristic;

impl ResolveStage for LabelHeuristic {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn candidate(&self, text: &str) -> Result<CandidateAdvice, StageFailure> {
        extract_labeled_fields(text).ok_or(StageFailure::NoLabels)
    }
}

/// 责任链：按顺序尝试各阶段
pub struct ResponseResolver {
    stages: Vec<Box<dyn ResolveStage>>,
}

impl Default for ResponseResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(DirectParse),
            Box::new(BraceExtraction),
            Box::new(LabelHeuristic),
        ])
    }
}

impl ResponseResolver {
    pub fn new(stages: Vec<Box<dyn ResolveStage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn resolve(&self, text: &str) -> Result<MedicalAdvice, ResolveError> {
        let mut attempts = Vec::new();
        for stage in &self.stages {
            let result = stage
                .candidate(text)
                .and_then(|c| validate(c).map_err(StageFailure::from));
            match result {
                Ok(advice) => {
                    tracing::debug!(stage = stage.name(), "advice resolved");
                    return Ok(advice);
                }
                Err(failure) => {
                    tracing::debug!(stage = stage.name(), "stage failed: {}", failure);
                    attempts.push(StageAttempt {
                        stage: stage.name(),
                        failure,
                    });
                }
            }
        }

        tracing::warn!("recovery failed: {}", summarize(&attempts));
        Err(ResolveError::RecoveryFailed {
            raw: text.to_string(),
            attempts,
        })
    }
}
