//! 问诊编排器
//!
//! Consultation 持有对话记忆、重试传输与解析链，每次提交在后台任务中运行一个 RequestSession。
//! create_consultation 在其外再包一层命令循环（Submit/Cancel/Clear/History/Quit），供 CLI 使用。

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::advice::ResponseResolver;
use crate::config::AppConfig;
use crate::core::session::{RequestSession, SessionOutcome, Submission};
use crate::core::{SessionError, SessionEvent, SessionId, SessionSupervisor};
use crate::intake::{PatientInfo, SYSTEM_PROMPT};
use crate::llm::{HttpTransport, LlmError, ModelSpec, RetryingTransport};
use crate::memory::{ChatTurn, ConversationMemory};

pub struct Consultation {
    memory: Arc<Mutex<ConversationMemory>>,
    transport: RetryingTransport,
    resolver: Arc<ResponseResolver>,
    system_prompt: Arc<str>,
    supervisor: SessionSupervisor,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Consultation {
    /// 返回编排器与事件接收端
    pub fn new(
        transport: RetryingTransport,
        max_turns: usize,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let consultation = Self {
            memory: Arc::new(Mutex::new(ConversationMemory::new(max_turns))),
            transport,
            resolver: Arc::new(ResponseResolver::default()),
            system_prompt: Arc::from(SYSTEM_PROMPT),
            supervisor: SessionSupervisor::new(),
            events,
        };
        (consultation, rx)
    }

    /// 按配置创建真实 HTTP 传输
    pub fn from_config(
        cfg: &AppConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), LlmError> {
        let api_key = cfg.llm.api_key().ok_or_else(|| {
            LlmError::InvalidRequest(format!("environment variable {} is not set", cfg.llm.api_key_env))
        })?;
        let http = HttpTransport::new(
            &cfg.llm.endpoint,
            &api_key,
            cfg.llm.timeouts.connect(),
            cfg.llm.timeouts.read(),
        )?;
        let transport = RetryingTransport::new(Arc::new(http), cfg.llm.retry.policy());
        tracing::info!(
            endpoint = %cfg.llm.endpoint,
            max_attempts = transport.policy().max_attempts,
            "consultation ready"
        );
        Ok(Self::new(transport, cfg.app.max_context_turns))
    }

    /// 提交新问题；若已有活跃会话，先取消并等待其结束
    pub async fn submit(&mut self, submission: Submission) -> SessionId {
        if let Some(previous) = self.supervisor.terminate().await {
            match previous {
                Ok(outcome) => tracing::debug!("superseded session ended as {}", outcome.phase()),
                Err(e) => tracing::warn!("superseded session: {}", e),
            }
        }

        let session = RequestSession::new(
            self.system_prompt.clone(),
            self.transport.clone(),
            self.resolver.clone(),
            self.memory.clone(),
            self.events.clone(),
        );
        let id = session.id();
        let cancel = self.supervisor.child_token();
        let handle = session.spawn(submission, cancel.clone());
        self.supervisor.start(id, cancel, handle);
        tracing::info!(session = %id, "session started");
        id
    }

    /// 由患者表单生成用户消息后提交
    pub async fn submit_patient(
        &mut self,
        info: &PatientInfo,
        model: ModelSpec,
        temperature: f32,
    ) -> Result<SessionId, SessionError> {
        let text = info.to_user_turn()?;
        Ok(self.submit(Submission::new(text, model, temperature)).await)
    }

    pub fn cancel(&self) {
        self.supervisor.cancel();
    }

    /// 等待当前会话结束；没有会话时返回 None
    pub async fn wait(&mut self) -> Option<Result<SessionOutcome, SessionError>> {
        self.supervisor.join().await
    }

    /// 开始新对话：终止当前会话并清空记忆
    pub async fn clear(&mut self) {
        self.supervisor.terminate().await;
        self.memory.lock().await.clear();
        tracing::info!("conversation cleared");
    }

    pub async fn history(&self) -> Vec<ChatTurn> {
        self.memory.lock().await.history().to_vec()
    }

    pub fn is_active(&self) -> bool {
        self.supervisor.is_active()
    }

    /// 退出：取消所有会话并等待
    pub async fn shutdown(&mut self) {
        self.supervisor.shutdown();
        self.supervisor.join().await;
    }
}

/// 从 CLI 发往编排器的命令
#[derive(Debug)]
pub enum Command {
    /// 提交问题，触发一次问诊请求
    Submit(Submission),
    /// 取消当前生成
    Cancel,
    /// 清空对话记忆
    Clear,
    /// 查询对话历史
    History(oneshot::Sender<Vec<ChatTurn>>),
    /// 退出应用
    Quit,
}

/// 在后台任务中消费命令
pub fn spawn_command_loop(
    mut consultation: Consultation,
) -> (mpsc::UnboundedSender<Command>, JoinHandle<()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let handle = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit(submission) => {
                    consultation.submit(submission).await;
                }
                Command::Cancel => consultation.cancel(),
                Command::Clear => consultation.clear().await,
                Command::History(reply) => {
                    let _ = reply.send(consultation.history().await);
                }
                Command::Quit => break,
            }
        }
        consultation.shutdown().await;
    });
    (cmd_tx, handle)
}

/// 问诊运行时的三个端点：命令发送端、事件接收端、命令循环任务
pub struct ConsultationRuntime {
    pub commands: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub task: JoinHandle<()>,
}

/// 创建问诊运行时；退出时发送 Quit 并等待 task 结束
pub fn create_consultation(cfg: &AppConfig) -> Result<ConsultationRuntime, LlmError> {
    let (consultation, events) = Consultation::from_config(cfg)?;
    let (commands, task) = spawn_command_loop(consultation);
    Ok(ConsultationRuntime {
        commands,
        events,
        task,
    })
}
