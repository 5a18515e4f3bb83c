//! 会话监管：单活跃会话与中断管理
//!
//! 同一时刻最多一个后台问诊任务。新任务启动前必须先取消并等待旧任务结束，
//! 这样旧任务的事件不会晚于新任务出现，对话记忆也不会被交错写入。

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::session::SessionOutcome;
use crate::core::{SessionError, SessionId};

/// 正在运行的后台任务
#[derive(Debug)]
pub struct ActiveSession {
    pub id: SessionId,
    cancel: CancellationToken,
    handle: JoinHandle<SessionOutcome>,
}

#[derive(Debug)]
pub struct SessionSupervisor {
    /// 退出应用时取消所有子 token
    root: CancellationToken,
    active: Option<ActiveSession>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            active: None,
        }
    }

    /// 为新任务派生的取消令牌
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 登记新任务；调用前必须已 terminate 旧任务
    pub fn start(&mut self, id: SessionId, cancel: CancellationToken, handle: JoinHandle<SessionOutcome>) {
        debug_assert!(self.active.is_none(), "previous session still registered");
        self.active = Some(ActiveSession { id, cancel, handle });
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active.as_ref().map(|a| a.id)
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| !a.handle.is_finished())
            .unwrap_or(false)
    }

    /// 触发取消（用户 Ctrl+C），不等待
    pub fn cancel(&self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }

    /// 取消全部（退出）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// 等待当前任务自然结束
    pub async fn join(&mut self) -> Option<Result<SessionOutcome, SessionError>> {
        let active = self.active.take()?;
        Some(
            active
                .handle
                .await
                .map_err(|e| SessionError::Worker(e.to_string())),
        )
    }

    /// 取消并等待当前任务结束
    pub async fn terminate(&mut self) -> Option<Result<SessionOutcome, SessionError>> {
        let id = self.active_id()?;
        self.cancel();
        let result = self.join().await;
        tracing::debug!(session = %id, "previous session terminated");
        result
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_cancels_and_waits() {
        let mut supervisor = SessionSupervisor::new();
        let cancel = supervisor.child_token();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
            SessionOutcome::Cancelled {
                partial: "部分".into(),
            }
        });
        supervisor.start(SessionId::new(), cancel, handle);
        assert!(supervisor.active_id().is_some());

        let outcome = supervisor.terminate().await.unwrap().unwrap();
        assert!(matches!(outcome, SessionOutcome::Cancelled { .. }));
        assert!(!supervisor.is_active());
        assert!(supervisor.terminate().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_reaches_children() {
        let supervisor = SessionSupervisor::new();
        let child = supervisor.child_token();
        supervisor.shutdown();
        assert!(child.is_cancelled());
    }
}
