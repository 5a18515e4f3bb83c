//! 会话阶段
//!
//! `Idle → Sending → Streaming → Resolving → {Completed, Failed, Cancelled}`；终态不再迁移。

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Sending,
    Streaming,
    Resolving,
    Completed,
    Failed,
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Failed | SessionPhase::Cancelled
        )
    }

    /// 合法迁移；任何非终态都可以进入 Cancelled
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Idle, Sending) => true,
            (Sending, Streaming) | (Sending, Failed) => true,
            (Streaming, Resolving) => true,
            (Resolving, Completed) | (Resolving, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Sending => "sending",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Resolving => "resolving",
            SessionPhase::Completed => "completed",
            SessionPhase::Failed => "failed",
            SessionPhase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
