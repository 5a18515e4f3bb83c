//! 短期记忆：对话历史
//!
//! 保留最近 max_turns 条消息（按条计，不按问答对计），超出时从最旧处淘汰，
//! 作为下一次请求的前置上下文，并供历史查看使用。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 消息角色（与 Chat Completion API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 发往 API 的单条消息（无时间戳）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 记忆中的一轮发言，追加后不可变
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTurn {
    role: Role,
    content: String,
    timestamp: DateTime<Local>,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// 给定当前长度与上限，返回需要从头部淘汰的条数
pub fn eviction_count(len: usize, max_turns: usize) -> usize {
    len.saturating_sub(max_turns)
}

/// 有界对话记忆：FIFO 淘汰，任意修改后 len <= max_turns
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    history: Vec<ChatTurn>,
    max_turns: usize,
}

impl ConversationMemory {
    /// max_turns 至少为 1
    pub fn new(max_turns: usize) -> Self {
        Self {
            history: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn append(&mut self, turn: ChatTurn) {
        self.history.push(turn);
        let evict = eviction_count(self.history.len(), self.max_turns);
        if evict > 0 {
            self.history.drain(..evict);
        }
    }

    /// 按顺序返回带角色的上下文快照，作为下一次请求的前置消息
    pub fn context(&self) -> Vec<Message> {
        self.history.iter().map(ChatTurn::to_message).collect()
    }

    /// 完整历史（含时间戳）
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// 历史查看格式：`[MM/DD HH:MM] 患者:` / `医生:` 分块
pub fn format_history(turns: &[ChatTurn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let speaker = match turn.role {
            Role::User => "患者",
            Role::Assistant => "医生",
            Role::System => "系统",
        };
        out.push_str(&format!(
            "[{}] {}:\n{}\n\n",
            turn.timestamp.format("%m/%d %H:%M"),
            speaker,
            turn.content
        ));
    }
    out
}
