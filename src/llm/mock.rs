//! 脚本化 Mock 传输（用于测试，无需 API）
//!
//! 按顺序消费预置回复：SSE 字节块、HTTP 状态码或网络失败；脚本耗尽后返回 503。
//! 记录尝试次数与收到的请求，便于断言重试次数和请求体。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};

use crate::llm::{ChatRequest, ChatTransport, RawResponse, TransportFailure};

/// 一次尝试的预置结果
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// 200，依次发送这些字节块后关闭连接
    Sse(Vec<String>),
    /// 200，发送这些字节块后不再有数据也不关闭（用于测试取消）
    SseThenHang(Vec<String>),
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    Fail(TransportFailure),
}

/// 单帧 SSE 文本
pub fn sse_frame(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
    )
}

impl ScriptedReply {
    pub fn status(status: u16) -> Self {
        ScriptedReply::Status {
            status,
            retry_after: None,
            body: String::new(),
        }
    }

    /// 每个 delta 一帧，末尾附 `data: [DONE]`
    pub fn sse_deltas(deltas: &[&str]) -> Self {
        let mut chunks: Vec<String> = deltas.iter().map(|d| sse_frame(d)).collect();
        chunks.push("data: [DONE]\n\n".to_string());
        ScriptedReply::Sse(chunks)
    }

    /// 整段文本按固定字符数切成多帧
    pub fn sse_text(text: &str, chars_per_frame: usize) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let parts: Vec<String> = chars
            .chunks(chars_per_frame.max(1))
            .map(|c| c.iter().collect())
            .collect();
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        Self::sse_deltas(&refs)
    }
}

/// 按脚本回复的传输
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    attempts: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// 已收到的请求（按尝试顺序）
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

fn chunks_to_stream(chunks: Vec<String>) -> impl futures_util::Stream<Item = Result<Bytes, TransportFailure>> {
    stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<_, TransportFailure>(Bytes::from(c)))
            .collect::<Vec<_>>(),
    )
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open(&self, request: &ChatRequest) -> Result<RawResponse, TransportFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());

        match next {
            Some(ScriptedReply::Sse(chunks)) => {
                Ok(RawResponse::Stream(Box::pin(chunks_to_stream(chunks))))
            }
            Some(ScriptedReply::SseThenHang(chunks)) => Ok(RawResponse::Stream(Box::pin(
                chunks_to_stream(chunks).chain(stream::pending()),
            ))),
            Some(ScriptedReply::Status {
                status,
                retry_after,
                body,
            }) => Ok(RawResponse::Status {
                status,
                retry_after,
                body,
            }),
            Some(ScriptedReply::Fail(failure)) => Err(failure),
            None => Ok(RawResponse::Status {
                status: 503,
                retry_after: None,
                body: "script exhausted".to_string(),
            }),
        }
    }
}
