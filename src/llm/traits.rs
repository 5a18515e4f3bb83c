//! 传输层抽象
//!
//! 所有后端（reqwest HTTP / 脚本化 Mock）实现 ChatTransport：每次 open 对应一次 HTTP 尝试，
//! 成功（200）时返回字节流，否则返回状态码与响应体，由 RetryingTransport 决定是否重试。

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

use crate::llm::ChatRequest;

/// 失败发生的阶段；只用于诊断信息，不影响重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// 建立连接阶段（含连接超时）
    Connect,
    /// 读取响应阶段（含读取超时）
    Read,
    Other,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePhase::Connect => write!(f, "connect"),
            FailurePhase::Read => write!(f, "read"),
            FailurePhase::Other => write!(f, "transport"),
        }
    }
}

/// 单次尝试的网络层失败（超时、连接失败、读流中断）
#[derive(Debug, Clone, Error)]
#[error("{phase} failure: {message}")]
pub struct TransportFailure {
    pub phase: FailurePhase,
    pub message: String,
}

impl TransportFailure {
    pub fn new(phase: FailurePhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }

    /// 面向用户的中文描述（区分连接超时与读取超时）
    pub fn describe(&self) -> String {
        match self.phase {
            FailurePhase::Connect => format!("连接失败: {}", self.message),
            FailurePhase::Read => format!("读取超时: {}", self.message),
            FailurePhase::Other => self.message.clone(),
        }
    }
}

/// 成功响应的字节流（SSE 原始字节，块边界任意）
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportFailure>> + Send>>;

/// 单次 HTTP 尝试的结果
pub enum RawResponse {
    /// 状态码 200，流已打开
    Stream(ByteStream),
    /// 非 200：状态码、Retry-After 提示、响应体
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
}

/// Chat Completion 传输：一次调用 = 一次尝试，不做重试
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, request: &ChatRequest) -> Result<RawResponse, TransportFailure>;
}
