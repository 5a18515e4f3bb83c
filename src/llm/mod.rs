//! LLM 层：传输抽象、重试、SSE 解码、模型目录与请求体

pub mod catalog;
pub mod error;
pub mod mock;
pub mod request;
pub mod retry;
pub mod sse;
pub mod traits;
pub mod transport;

pub use catalog::{default_models, ModelCatalog, ModelEntry, ModelSpec};
pub use error::LlmError;
pub use mock::{sse_frame, ScriptedReply, ScriptedTransport};
pub use request::{ChatRequest, ResponseFormat};
pub use retry::{AttemptOutcome, RetryDecision, RetryPolicy, StatusClass};
pub use sse::{decode_stream, DecodedStream, StreamDecoder, StreamEvent, Termination};
pub use traits::{ByteStream, ChatTransport, FailurePhase, RawResponse, TransportFailure};
pub use transport::{HttpTransport, RetryNotice, RetryingTransport};
