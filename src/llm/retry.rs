//! 重试策略：尝试次数 -> 退避时长 的纯状态机
//!
//! 429 / 5xx / 网络失败共用一个尝试预算；429 优先采用服务端 Retry-After 提示。
//! 其他 4xx 不进入此处，直接由 RetryingTransport 以 RequestRejected 失败。

use std::time::Duration;

use serde::Deserialize;

use crate::llm::{LlmError, TransportFailure};

/// 默认最大尝试次数（含首次）
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// 默认退避基数
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Retry-After 提示的上限，防止服务端给出过长的等待
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
/// RequestRejected 中保留的响应体最大字符数
const REJECTION_BODY_CHARS: usize = 200;

/// 非 200 状态码的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    RateLimited,
    ServerError,
    Rejected,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        429 => StatusClass::RateLimited,
        500..=599 => StatusClass::ServerError,
        _ => StatusClass::Rejected,
    }
}

/// 一次可重试尝试的失败结果
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    RateLimited { retry_after: Option<Duration> },
    ServerError { status: u16 },
    Transient(TransportFailure),
}

/// 策略给出的下一步
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// 等待 delay 后重试；notice 为给调用方展示的进度提示
    Retry { delay: Duration, notice: String },
    GiveUp(LlmError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// 第 attempt 次（0 起）失败后的指数退避：base * 2^attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor)
    }

    /// attempt 为刚失败的尝试序号（0 起）
    pub fn decide(&self, attempt: u32, outcome: &AttemptOutcome) -> RetryDecision {
        let attempts = attempt + 1;
        if attempts >= self.max_attempts {
            return RetryDecision::GiveUp(self.exhausted(attempts, outcome));
        }

        let (delay, notice) = match outcome {
            AttemptOutcome::RateLimited { retry_after } => {
                let delay = retry_after
                    .map(|hint| hint.min(MAX_RETRY_AFTER))
                    .unwrap_or_else(|| self.backoff(attempt));
                (delay, format!("API错误 429，尝试 {attempts}/{}...", self.max_attempts))
            }
            AttemptOutcome::ServerError { status } => (
                self.backoff(attempt),
                format!("API错误 {status}，尝试 {attempts}/{}...", self.max_attempts),
            ),
            AttemptOutcome::Transient(failure) => (
                self.backoff(attempt),
                format!(
                    "网络错误: {}，尝试 {attempts}/{}...",
                    failure.describe(),
                    self.max_attempts
                ),
            ),
        };
        RetryDecision::Retry { delay, notice }
    }

    fn exhausted(&self, attempts: u32, outcome: &AttemptOutcome) -> LlmError {
        match outcome {
            AttemptOutcome::RateLimited { retry_after } => LlmError::RateLimited {
                attempts,
                retry_after: *retry_after,
            },
            AttemptOutcome::ServerError { status } => LlmError::ServerUnavailable {
                status: *status,
                attempts,
            },
            AttemptOutcome::Transient(failure) => LlmError::NetworkTransient {
                phase: failure.phase,
                message: failure.message.clone(),
                attempts,
            },
        }
    }
}

/// 解析 Retry-After（仅支持秒数形式，允许小数）；超出 MAX_RETRY_AFTER 的值截断到上限
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let secs = secs.min(MAX_RETRY_AFTER.as_secs_f64());
    Duration::try_from_secs_f64(secs).ok()
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    code: Option<serde_json::Value>,
    message: Option<String>,
    error: Option<RejectionFields>,
}

#[derive(Debug, Deserialize)]
struct RejectionFields {
    code: Option<serde_json::Value>,
    message: Option<String>,
}

fn code_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 从 4xx 响应体提取 (code, message)：支持 `{code, message}` 与 `{error: {code, message}}`；
/// 无法解析时退回原始状态码与截断后的响应体
pub fn parse_rejection(status: u16, body: &str) -> (String, String) {
    if let Ok(parsed) = serde_json::from_str::<RejectionBody>(body) {
        let (code, message) = match parsed.error {
            Some(inner) => (inner.code.or(parsed.code), inner.message.or(parsed.message)),
            None => (parsed.code, parsed.message),
        };
        if let Some(message) = message.filter(|m| !m.trim().is_empty()) {
            let code = code
                .as_ref()
                .map(code_text)
                .unwrap_or_else(|| status.to_string());
            return (code, message);
        }
    }

    let truncated: String = body.chars().take(REJECTION_BODY_CHARS).collect();
    let message = if truncated.trim().is_empty() {
        "未知错误".to_string()
    } else if body.chars().count() > REJECTION_BODY_CHARS {
        format!("{truncated}...")
    } else {
        truncated
    };
    (status.to_string(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FailurePhase;

    #[test]
    fn test_backoff_is_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(429), StatusClass::RateLimited);
        assert_eq!(classify_status(500), StatusClass::ServerError);
        assert_eq!(classify_status(503), StatusClass::ServerError);
        assert_eq!(classify_status(400), StatusClass::Rejected);
        assert_eq!(classify_status(401), StatusClass::Rejected);
    }

    #[test]
    fn test_decide_retries_until_budget_exhausted() {
        let policy = RetryPolicy::default();
        let outcome = AttemptOutcome::ServerError { status: 503 };
        assert!(matches!(policy.decide(0, &outcome), RetryDecision::Retry { .. }));
        assert!(matches!(policy.decide(1, &outcome), RetryDecision::Retry { .. }));
        match policy.decide(2, &outcome) {
            RetryDecision::GiveUp(LlmError::ServerUnavailable { status, attempts }) => {
                assert_eq!(status, 503);
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected ServerUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_honours_hint() {
        let policy = RetryPolicy::default();
        let outcome = AttemptOutcome::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        match policy.decide(0, &outcome) {
            RetryDecision::Retry { delay, notice } => {
                assert_eq!(delay, Duration::from_secs(5));
                assert!(notice.contains("429"));
                assert!(notice.contains("1/3"));
            }
            other => panic!("Expected Retry, got {other:?}"),
        }

        let huge = AttemptOutcome::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
        };
        match policy.decide(1, &huge) {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, MAX_RETRY_AFTER),
            other => panic!("Expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn test_transient_exhaustion_keeps_phase() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1));
        let outcome =
            AttemptOutcome::Transient(TransportFailure::new(FailurePhase::Connect, "timed out"));
        match policy.decide(0, &outcome) {
            RetryDecision::GiveUp(LlmError::NetworkTransient { phase, attempts, .. }) => {
                assert_eq!(phase, FailurePhase::Connect);
                assert_eq!(attempts, 1);
            }
            other => panic!("Expected NetworkTransient, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 0.5 "), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-1"), None);
    }

    #[test]
    fn test_parse_retry_after_clamps_huge_values() {
        assert_eq!(parse_retry_after("1e20"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("3600"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("inf"), None);
        assert_eq!(parse_retry_after("NaN"), None);
    }

    #[test]
    fn test_parse_rejection_variants() {
        let (code, message) = parse_rejection(400, r#"{"code": 20015, "message": "model not found"}"#);
        assert_eq!(code, "20015");
        assert_eq!(message, "model not found");

        let (code, message) =
            parse_rejection(401, r#"{"error": {"code": "invalid_api_key", "message": "bad key"}}"#);
        assert_eq!(code, "invalid_api_key");
        assert_eq!(message, "bad key");

        let (code, message) = parse_rejection(404, "not found");
        assert_eq!(code, "404");
        assert_eq!(message, "not found");

        let long = "x".repeat(500);
        let (_, message) = parse_rejection(400, &long);
        assert!(message.ends_with("..."));
        assert_eq!(message.chars().count(), REJECTION_BODY_CHARS + 3);
    }
}
