//! 记忆层：有界短期对话记忆

pub mod conversation;

pub use conversation::{eviction_count, format_history, ChatTurn, ConversationMemory, Message, Role};
