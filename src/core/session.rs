//! 单次问诊请求：后台任务中的状态机
//!
//! 记忆 -> 重试传输 -> 流解码 -> 回复解析，终态决定写回记忆的内容：
//! - Completed：用户轮与序列化后的建议都写入
//! - Failed：只保留用户轮
//! - Cancelled：只保留用户轮；已累积的部分文本仍会尝试解析，成功则按 Completed 处理

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::advice::{MedicalAdvice, ResponseResolver};
use crate::core::{SessionError, SessionEvent, SessionEventKind, SessionId, SessionPhase};
use crate::llm::{
    decode_stream, ChatRequest, LlmError, ModelSpec, RetryingTransport, StreamEvent, Termination,
};
use crate::memory::{ChatTurn, ConversationMemory, Message};

/// 一次提交的输入
#[derive(Debug, Clone)]
pub struct Submission {
    pub user_text: String,
    pub model: ModelSpec,
    pub temperature: f32,
}

impl Submission {
    pub fn new(user_text: impl Into<String>, model: ModelSpec, temperature: f32) -> Self {
        Self {
            user_text: user_text.into(),
            model,
            temperature,
        }
    }
}

/// 后台任务的最终结果
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(MedicalAdvice),
    Failed(SessionError),
    /// partial 为取消前已累积的文本
    Cancelled { partial: String },
}

impl SessionOutcome {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionOutcome::Completed(_) => SessionPhase::Completed,
            SessionOutcome::Failed(_) => SessionPhase::Failed,
            SessionOutcome::Cancelled { .. } => SessionPhase::Cancelled,
        }
    }
}

/// 事件发送端；接收方已关闭时静默丢弃
#[derive(Clone)]
struct Emitter {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Emitter {
    fn emit(&self, kind: SessionEventKind) {
        let _ = self.tx.send(SessionEvent {
            session: self.session,
            kind,
        });
    }

    fn content(&self, text: String, is_error: bool) {
        self.emit(SessionEventKind::Content { text, is_error });
    }
}

pub struct RequestSession {
    id: SessionId,
    phase: SessionPhase,
    system_prompt: Arc<str>,
    transport: RetryingTransport,
    resolver: Arc<ResponseResolver>,
    memory: Arc<Mutex<ConversationMemory>>,
    emitter: Emitter,
}

impl RequestSession {
    pub fn new(
        system_prompt: Arc<str>,
        transport: RetryingTransport,
        resolver: Arc<ResponseResolver>,
        memory: Arc<Mutex<ConversationMemory>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let id = SessionId::new();
        Self {
            id,
            phase: SessionPhase::Idle,
            system_prompt,
            transport,
            resolver,
            memory,
            emitter: Emitter {
                session: id,
                tx: events,
            },
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn transition(&mut self, next: SessionPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {} -> {}",
            self.phase,
            next
        );
        tracing::debug!(session = %self.id, "phase {} -> {}", self.phase, next);
        self.phase = next;
        self.emitter.emit(SessionEventKind::Phase { phase: next });
    }

    fn finish(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        self.transition(outcome.phase());
        match &outcome {
            SessionOutcome::Completed(advice) => {
                tracing::info!(session = %self.id, urgency = advice.urgency_level, "exchange completed");
                self.emitter.emit(SessionEventKind::Completed {
                    advice: advice.clone(),
                });
            }
            SessionOutcome::Failed(err) => {
                tracing::warn!(session = %self.id, "exchange failed: {}", err);
                self.emitter.emit(SessionEventKind::Failed {
                    message: err.to_string(),
                    raw: err.raw_text().map(str::to_string),
                });
            }
            SessionOutcome::Cancelled { partial } => {
                tracing::info!(
                    session = %self.id,
                    partial_chars = partial.chars().count(),
                    "exchange cancelled"
                );
                self.emitter.emit(SessionEventKind::Cancelled);
            }
        }
        outcome
    }

    /// 快照上下文并写入用户轮，返回 `[system, 上下文..., 用户]`
    async fn begin(&self, user_text: &str) -> Vec<Message> {
        let mut memory = self.memory.lock().await;
        let context = memory.context();
        memory.append(ChatTurn::user(user_text));

        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(Message::system(self.system_prompt.as_ref()));
        messages.extend(context);
        messages.push(Message::user(user_text));
        messages
    }

    /// 在后台任务中运行；内部任务 panic 时由外层任务补发 Failed 终止事件
    pub fn spawn(self, submission: Submission, cancel: CancellationToken) -> JoinHandle<SessionOutcome> {
        let id = self.id;
        let emitter = self.emitter.clone();
        let worker = tokio::spawn(self.run(submission, cancel));
        tokio::spawn(async move {
            match worker.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(session = %id, "session worker died: {}", e);
                    let err = SessionError::Worker(e.to_string());
                    emitter.emit(SessionEventKind::Phase {
                        phase: SessionPhase::Failed,
                    });
                    emitter.emit(SessionEventKind::Failed {
                        message: err.to_string(),
                        raw: None,
                    });
                    SessionOutcome::Failed(err)
                }
            }
        })
    }

    /// 运行到终态；任何路径都会发出恰好一个终止事件
    pub async fn run(mut self, submission: Submission, cancel: CancellationToken) -> SessionOutcome {
        self.transition(SessionPhase::Sending);
        let messages = self.begin(&submission.user_text).await;
        let request = ChatRequest::new(&submission.model, messages, submission.temperature);
        tracing::info!(
            session = %self.id,
            model = %request.model,
            messages = request.messages.len(),
            "sending request"
        );

        let notices = self.emitter.clone();
        let sent = self
            .transport
            .send(&request, &cancel, |notice| notices.content(notice.message, true))
            .await;
        let stream = match sent {
            Ok(stream) => stream,
            Err(LlmError::Cancelled) => {
                return self.finish(SessionOutcome::Cancelled {
                    partial: String::new(),
                })
            }
            Err(e) => return self.finish(SessionOutcome::Failed(e.into())),
        };

        self.transition(SessionPhase::Streaming);
        let deltas = self.emitter.clone();
        let decoded = decode_stream(stream, &cancel, |event| match event {
            StreamEvent::Content(text) => deltas.content(text, false),
            StreamEvent::Error(message) => deltas.content(message, true),
            StreamEvent::Done => {}
        })
        .await;

        self.transition(SessionPhase::Resolving);
        let cancelled = decoded.termination == Termination::Cancelled;
        if cancelled && decoded.text.trim().is_empty() {
            return self.finish(SessionOutcome::Cancelled {
                partial: decoded.text,
            });
        }

        match self.resolver.resolve(&decoded.text) {
            Ok(advice) => {
                self.memory
                    .lock()
                    .await
                    .append(ChatTurn::assistant(advice.to_turn_content()));
                self.finish(SessionOutcome::Completed(advice))
            }
            Err(_) if cancelled => self.finish(SessionOutcome::Cancelled {
                partial: decoded.text,
            }),
            Err(e) => self.finish(SessionOutcome::Failed(e.into())),
        }
    }
}
