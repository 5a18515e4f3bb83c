//! Chat Completion 请求体
//!
//! `{model, messages, temperature, stream: true, response_format?}`；
//! response_format 仅在模型声明支持结构化输出时携带。

use serde::Serialize;

use crate::llm::ModelSpec;
use crate::memory::Message;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    /// temperature 被限制在 [0, 1]
    pub fn new(model: &ModelSpec, messages: Vec<Message>, temperature: f32) -> Self {
        let temperature = if temperature.is_finite() {
            temperature.clamp(0.0, 1.0)
        } else {
            0.7
        };
        Self {
            model: model.id.clone(),
            messages,
            temperature,
            stream: true,
            response_format: model.structured_output.then(ResponseFormat::json_object),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_format_only_for_structured_models() {
        let json_model = ModelSpec::new("THUDM/GLM-4-9B-0414", true);
        let text_model = ModelSpec::new("deepseek-ai/DeepSeek-R1", false);
        let messages = vec![Message::user("头痛")];

        let body = serde_json::to_value(ChatRequest::new(&json_model, messages.clone(), 0.7)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");

        let body = serde_json::to_value(ChatRequest::new(&text_model, messages, 0.7)).unwrap();
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_temperature_is_clamped() {
        let model = ModelSpec::new("m", false);
        assert_eq!(ChatRequest::new(&model, vec![], 3.0).temperature, 1.0);
        assert_eq!(ChatRequest::new(&model, vec![], -1.0).temperature, 0.0);
        assert_eq!(ChatRequest::new(&model, vec![], f32::NAN).temperature, 0.7);
    }
}
