//! Medassist - Rust 医疗咨询助手
//!
//! 模块划分：
//! - **advice**: 结构化建议记录、校验、回退解析链与文本报告
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 请求状态机、会话监管、事件与编排
//! - **intake**: 患者信息采集与系统提示词
//! - **llm**: 传输抽象、重试、SSE 解码、模型目录（HTTP / Mock）
//! - **memory**: 有界短期对话记忆
//! - **observability**: 日志初始化

pub mod advice;
pub mod config;
pub mod core;
pub mod intake;
pub mod llm;
pub mod memory;
pub mod observability;
