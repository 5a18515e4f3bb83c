//! 传输错误分类
//!
//! 瞬时类（网络、429、5xx）在 RetryingTransport 内部吸收，只有重试耗尽后的最终失败越过组件边界。

use std::time::Duration;

use thiserror::Error;

use crate::llm::FailurePhase;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Network error ({phase}) after {attempts} attempts: {message}")]
    NetworkTransient {
        phase: FailurePhase,
        message: String,
        attempts: u32,
    },

    #[error("Rate limited (429) after {attempts} attempts")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    #[error("Server unavailable (HTTP {status}) after {attempts} attempts")]
    ServerUnavailable { status: u16, attempts: u32 },

    /// 其他 4xx：不重试，原样携带服务端 code / message
    #[error("API错误 {code}: {message}")]
    RequestRejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cancelled")]
    Cancelled,
}
