//! SSE 流解码
//!
//! 把传输层的字节流按行重组，剥离 `data:` 前缀，逐帧解析 `choices[0].delta.content`，
//! 产出增量 StreamEvent 并累积完整文本。单帧 JSON 解析失败只丢弃该帧，不终止解码。
//! 取消在每行处理前与每次网络读取时检查；取消后已累积文本仍交给解析器。

use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::llm::ByteStream;

/// 流结束哨兵
pub const DONE_SENTINEL: &str = "[DONE]";
const DATA_PREFIX: &str = "data:";
/// 连续传输错误达到此数视为流已断开
const MAX_CONSECUTIVE_TRANSPORT_ERRORS: usize = 3;

/// 解码过程中的事件；仅在投递给编排器前存在
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done,
    Error(String),
}

/// 单行解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Skip,
    Content(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct ChunkFrame {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// 解码单行（已去掉行尾换行）
pub fn decode_line(line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Skip;
    };
    let payload = payload.trim_start();
    if payload == DONE_SENTINEL {
        return LineOutcome::Done;
    }

    match serde_json::from_str::<ChunkFrame>(payload) {
        Ok(frame) => frame
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|text| !text.is_empty())
            .map(LineOutcome::Content)
            .unwrap_or(LineOutcome::Skip),
        Err(e) => {
            tracing::trace!("dropping unparsable frame: {}", e);
            LineOutcome::Skip
        }
    }
}

/// 字节到行的重组缓冲：块边界可以落在行中间甚至 UTF-8 字符中间
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// 喂入任意字节，返回其中完整的行（不含 `\n` / `\r\n`）
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// 流结束时取出未以换行结尾的残余
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// 解码终止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// 收到 `data: [DONE]`
    Done,
    /// 连接关闭而未收到哨兵
    Closed,
    /// 协作式取消
    Cancelled,
}

/// 解码结果：累积文本与终止原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStream {
    pub text: String,
    pub termination: Termination,
}

/// 有状态解码器：行缓冲 + 文本累积
#[derive(Debug, Default)]
pub struct StreamDecoder {
    lines: LineBuffer,
    text: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 处理一行原始字节；返回 true 表示遇到哨兵
    fn process_line<F>(&mut self, raw: &[u8], on_event: &mut F) -> bool
    where
        F: FnMut(StreamEvent),
    {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                on_event(StreamEvent::Error(format!("invalid utf-8 in stream line: {e}")));
                return false;
            }
        };
        match decode_line(line) {
            LineOutcome::Skip => false,
            LineOutcome::Content(text) => {
                self.text.push_str(&text);
                on_event(StreamEvent::Content(text));
                false
            }
            LineOutcome::Done => {
                on_event(StreamEvent::Done);
                true
            }
        }
    }

    /// 消费整个流直到哨兵、连接关闭或取消
    pub async fn run<F>(
        mut self,
        mut stream: ByteStream,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> DecodedStream
    where
        F: FnMut(StreamEvent),
    {
        let mut transport_errors = 0usize;
        let termination = 'outer: loop {
            if cancel.is_cancelled() {
                break Termination::Cancelled;
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'outer Termination::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    transport_errors = 0;
                    for raw in self.lines.feed(&bytes) {
                        if cancel.is_cancelled() {
                            break 'outer Termination::Cancelled;
                        }
                        if self.process_line(&raw, &mut on_event) {
                            break 'outer Termination::Done;
                        }
                    }
                }
                Some(Err(failure)) => {
                    transport_errors += 1;
                    tracing::warn!("stream read error: {}", failure);
                    on_event(StreamEvent::Error(failure.describe()));
                    if transport_errors >= MAX_CONSECUTIVE_TRANSPORT_ERRORS {
                        break Termination::Closed;
                    }
                }
                None => {
                    if let Some(rest) = self.lines.finish() {
                        if self.process_line(&rest, &mut on_event) {
                            break Termination::Done;
                        }
                    }
                    break Termination::Closed;
                }
            }
        };

        tracing::debug!(
            ?termination,
            chars = self.text.chars().count(),
            "stream decoding finished"
        );
        DecodedStream {
            text: self.text,
            termination,
        }
    }
}

/// 便捷入口：新建解码器并消费流
pub async fn decode_stream<F>(
    stream: ByteStream,
    cancel: &CancellationToken,
    on_event: F,
) -> DecodedStream
where
    F: FnMut(StreamEvent),
{
    StreamDecoder::new().run(stream, cancel, on_event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;

    use crate::llm::{FailurePhase, TransportFailure};

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn byte_stream(chunks: Vec<String>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, TransportFailure>(Bytes::from(c)))
                .collect::<Vec<_>>(),
        ))
    }

    #[test]
    fn test_decode_line_rules() {
        assert_eq!(decode_line(""), LineOutcome::Skip);
        assert_eq!(decode_line(": keep-alive"), LineOutcome::Skip);
        assert_eq!(decode_line("event: message"), LineOutcome::Skip);
        assert_eq!(decode_line("data: [DONE]"), LineOutcome::Done);
        assert_eq!(decode_line("data: {broken"), LineOutcome::Skip);
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            LineOutcome::Skip
        );
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            LineOutcome::Skip
        );
        assert_eq!(
            decode_line(r#"data:{"choices":[{"delta":{"content":"你好"}}]}"#),
            LineOutcome::Content("你好".to_string())
        );
    }

    #[test]
    fn test_line_buffer_handles_split_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.feed(b"data: ab").is_empty());
        let lines = buffer.feed(b"c\r\ndata: x\n");
        assert_eq!(lines, vec![b"data: abc".to_vec(), b"data: x".to_vec()]);
        assert!(buffer.is_empty());
        buffer.feed(b"tail");
        assert_eq!(buffer.finish(), Some(b"tail".to_vec()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_handles_split_utf8() {
        let text = "data: 诊断\n".as_bytes();
        let mut buffer = LineBuffer::default();
        assert!(buffer.feed(&text[..8]).is_empty());
        let lines = buffer.feed(&text[8..]);
        assert_eq!(std::str::from_utf8(&lines[0]).unwrap(), "data: 诊断");
    }

    #[tokio::test]
    async fn test_accumulates_until_done() {
        let chunks = vec![
            frame("{\"possible"),
            "data: {not json}\n\n".to_string(),
            frame("_diagnoses\"")[..10].to_string(),
            frame("_diagnoses\"")[10..].to_string(),
            "data: [DONE]\n\n".to_string(),
            frame("ignored"),
        ];
        let mut events = Vec::new();
        let decoded = decode_stream(byte_stream(chunks), &CancellationToken::new(), |e| {
            events.push(e)
        })
        .await;
        assert_eq!(decoded.text, "{\"possible_diagnoses\"");
        assert_eq!(decoded.termination, Termination::Done);
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("{\"possible".to_string()),
                StreamEvent::Content("_diagnoses\"".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_without_sentinel() {
        let decoded = decode_stream(
            byte_stream(vec![frame("a"), frame("b")]),
            &CancellationToken::new(),
            |_| {},
        )
        .await;
        assert_eq!(decoded.text, "ab");
        assert_eq!(decoded.termination, Termination::Closed);
    }

    #[tokio::test]
    async fn test_line_errors_do_not_stop_decoding() {
        let items: Vec<Result<Bytes, TransportFailure>> = vec![
            Ok(Bytes::from(frame("a"))),
            Ok(Bytes::from_static(b"data: \xff\xfe\n")),
            Err(TransportFailure::new(FailurePhase::Read, "reset")),
            Ok(Bytes::from(frame("b"))),
        ];
        let mut errors = 0;
        let decoded = decode_stream(Box::pin(stream::iter(items)), &CancellationToken::new(), |e| {
            if matches!(e, StreamEvent::Error(_)) {
                errors += 1;
            }
        })
        .await;
        assert_eq!(decoded.text, "ab");
        assert_eq!(errors, 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_read() {
        let cancel = CancellationToken::new();
        let chunks = stream::iter(vec![Ok::<_, TransportFailure>(Bytes::from(frame("partial")))])
            .chain(stream::pending());
        let trigger = cancel.clone();
        let decoded = decode_stream(Box::pin(chunks), &cancel, move |e| {
            if matches!(e, StreamEvent::Content(_)) {
                trigger.cancel();
            }
        })
        .await;
        assert_eq!(decoded.text, "partial");
        assert_eq!(decoded.termination, Termination::Cancelled);
    }
}
