//! 会话事件：从后台任务发往调用方
//!
//! 同一会话内，Content 严格先于终止事件（Completed / Failed / Cancelled）。

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::advice::MedicalAdvice;
use crate::core::SessionPhase;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionEvent {
    pub session: SessionId,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    Phase { phase: SessionPhase },
    /// 增量文本；is_error 为 true 时是重试提示或流内错误，不计入回复
    Content { text: String, is_error: bool },
    Completed { advice: MedicalAdvice },
    /// raw 在解析失败时携带原始文本
    Failed { message: String, raw: Option<String> },
    Cancelled,
}

impl SessionEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEventKind::Completed { .. }
                | SessionEventKind::Failed { .. }
                | SessionEventKind::Cancelled
        )
    }
}
