//! 会话错误类型
//!
//! 传输层与解析层的终止错误在这里汇合，供事件与 CLI 展示。取消不是错误，以 SessionOutcome::Cancelled 表达。

use thiserror::Error;

use crate::advice::ResolveError;
use crate::intake::IntakeError;
use crate::llm::LlmError;

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] LlmError),

    #[error(transparent)]
    Recovery(#[from] ResolveError),

    #[error(transparent)]
    Intake(#[from] IntakeError),

    /// 后台任务 panic 或被中止
    #[error("Session worker failed: {0}")]
    Worker(String),
}

impl SessionError {
    /// 解析失败时保留的原始文本
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            SessionError::Recovery(e) => Some(e.raw()),
            _ => None,
        }
    }
}
