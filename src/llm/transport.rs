//! HTTP 传输与带重试的传输
//!
//! HttpTransport 用 reqwest 发出单次 POST（Bearer 鉴权、连接/读取双超时）；
//! RetryingTransport 在其上按 RetryPolicy 吸收 429 / 5xx / 网络失败，每次重试前回调一条进度提示。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::llm::retry::{classify_status, parse_rejection, parse_retry_after};
use crate::llm::{
    AttemptOutcome, ByteStream, ChatRequest, ChatTransport, FailurePhase, LlmError, RawResponse,
    RetryDecision, RetryPolicy, StatusClass, TransportFailure,
};

/// 默认连接超时（秒）
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// 默认读取超时（秒，两次读之间的最大间隔）
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

fn failure_from_reqwest(error: &reqwest::Error) -> TransportFailure {
    let phase = if error.is_connect() {
        FailurePhase::Connect
    } else if error.is_timeout() || error.is_body() || error.is_decode() {
        FailurePhase::Read
    } else {
        FailurePhase::Other
    };
    TransportFailure::new(phase, error.to_string())
}

/// OpenAI 兼容端点的 reqwest 实现
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: reqwest::Url,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| LlmError::InvalidRequest(format!("invalid endpoint {endpoint}: {e}")))?;
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> Result<RawResponse, TransportFailure> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| failure_from_reqwest(&e))?;

        let status = response.status();
        if status == StatusCode::OK {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| failure_from_reqwest(&e)));
            return Ok(RawResponse::Stream(Box::pin(stream)));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Ok(RawResponse::Status {
            status: status.as_u16(),
            retry_after,
            body,
        })
    }
}

/// 重试前发给调用方的提示（不是终止错误）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    /// 刚失败的尝试序号（1 起）
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub message: String,
}

/// 一次逻辑请求 = 最多 max_attempts 次 HTTP 尝试
#[derive(Clone)]
pub struct RetryingTransport {
    inner: Arc<dyn ChatTransport>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn ChatTransport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 发送请求并返回已打开的流；等待与退避期间均响应取消
    pub async fn send<F>(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        mut on_retry: F,
    ) -> Result<ByteStream, LlmError>
    where
        F: FnMut(RetryNotice),
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                r = self.inner.open(request) => r,
            };

            let outcome = match result {
                Ok(RawResponse::Stream(stream)) => {
                    tracing::debug!(attempt = attempt + 1, "stream opened");
                    return Ok(stream);
                }
                Ok(RawResponse::Status {
                    status,
                    retry_after,
                    body,
                }) => match classify_status(status) {
                    StatusClass::RateLimited => AttemptOutcome::RateLimited { retry_after },
                    StatusClass::ServerError => AttemptOutcome::ServerError { status },
                    StatusClass::Rejected => {
                        let (code, message) = parse_rejection(status, &body);
                        tracing::warn!(status, %code, "request rejected: {}", message);
                        return Err(LlmError::RequestRejected {
                            status,
                            code,
                            message,
                        });
                    }
                },
                Err(failure) => AttemptOutcome::Transient(failure),
            };

            match self.policy.decide(attempt, &outcome) {
                RetryDecision::Retry { delay, notice } => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retrying: {:?}",
                        outcome
                    );
                    on_retry(RetryNotice {
                        attempt: attempt + 1,
                        max_attempts: self.policy.max_attempts,
                        delay,
                        message: notice,
                    });
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                RetryDecision::GiveUp(err) => {
                    tracing::warn!("giving up after {} attempts: {}", attempt + 1, err);
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelSpec, ScriptedReply, ScriptedTransport};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    fn request() -> ChatRequest {
        ChatRequest::new(&ModelSpec::new("m", false), vec![], 0.7)
    }

    #[tokio::test]
    async fn test_503_every_attempt_gives_server_unavailable() {
        let mock = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::status(503),
            ScriptedReply::status(503),
            ScriptedReply::status(503),
            ScriptedReply::status(503),
        ]));
        let transport = RetryingTransport::new(mock.clone(), fast_policy());
        let mut notices = Vec::new();
        let result = transport
            .send(&request(), &CancellationToken::new(), |n| notices.push(n))
            .await;
        assert!(matches!(
            result,
            Err(LlmError::ServerUnavailable { status: 503, attempts: 3 })
        ));
        assert_eq!(mock.attempts(), 3);
        assert_eq!(notices.len(), 2);
        assert!(notices[0].message.contains("503"));
    }

    #[tokio::test]
    async fn test_429_then_ok_succeeds_on_second_attempt() {
        let mock = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::Status {
                status: 429,
                retry_after: Some(Duration::from_millis(1)),
                body: String::new(),
            },
            ScriptedReply::sse_deltas(&["ok"]),
        ]));
        let transport = RetryingTransport::new(mock.clone(), fast_policy());
        let result = transport
            .send(&request(), &CancellationToken::new(), |_| {})
            .await;
        assert!(result.is_ok());
        assert_eq!(mock.attempts(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock = Arc::new(ScriptedTransport::new(vec![ScriptedReply::Status {
            status: 400,
            retry_after: None,
            body: r#"{"code": 20012, "message": "Model does not exist."}"#.to_string(),
        }]));
        let transport = RetryingTransport::new(mock.clone(), fast_policy());
        let result = transport
            .send(&request(), &CancellationToken::new(), |_| {})
            .await;
        match result {
            Err(LlmError::RequestRejected { status, code, message }) => {
                assert_eq!(status, 400);
                assert_eq!(code, "20012");
                assert_eq!(message, "Model does not exist.");
            }
            _ => panic!("Expected RequestRejected"),
        }
        assert_eq!(mock.attempts(), 1);
    }

    #[tokio::test]
    async fn test_network_failures_exhaust_budget() {
        let mock = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::Fail(TransportFailure::new(FailurePhase::Connect, "refused")),
            ScriptedReply::Fail(TransportFailure::new(FailurePhase::Read, "timed out")),
            ScriptedReply::Fail(TransportFailure::new(FailurePhase::Read, "timed out")),
        ]));
        let transport = RetryingTransport::new(mock.clone(), fast_policy());
        let result = transport
            .send(&request(), &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(
            result,
            Err(LlmError::NetworkTransient { phase: FailurePhase::Read, attempts: 3, .. })
        ));
        assert_eq!(mock.attempts(), 3);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let mock = Arc::new(ScriptedTransport::new(vec![ScriptedReply::status(503)]));
        let transport = RetryingTransport::new(
            mock.clone(),
            RetryPolicy::new(3, Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let result = transport
            .send(&request(), &cancel, move |_| trigger.cancel())
            .await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(mock.attempts(), 1);
    }
}
