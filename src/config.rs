//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MEDASSIST__*` 覆盖（双下划线表示嵌套，如 `MEDASSIST__LLM__DEFAULT_MODEL=GLM-4-9B`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
use crate::llm::transport::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS};
use crate::llm::{ModelCatalog, ModelEntry, RetryPolicy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    /// [[models]]：可选模型目录，留空时使用内置列表
    pub models: Vec<ModelEntry>,
}

impl AppConfig {
    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::new(self.models.clone())
    }
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 短期记忆保留的对话轮数（user 与 assistant 各算一轮）
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_turns: 3,
        }
    }
}

/// [llm] 段：端点、凭据、默认模型与采样温度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub endpoint: String,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub default_model: String,
    pub temperature: f32,
    pub timeouts: LlmTimeoutsSection,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.siliconflow.cn/v1/chat/completions".to_string(),
            api_key_env: "SILICONFLOW_API_KEY".to_string(),
            default_model: "DeepSeek-R1".to_string(),
            temperature: 0.7,
            timeouts: LlmTimeoutsSection::default(),
            retry: RetrySection::default(),
        }
    }
}

impl LlmSection {
    /// 从 api_key_env 指向的环境变量读取凭据
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// [llm.timeouts] 段：单次尝试的连接与读取超时（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub connect_secs: u64,
    pub read_secs: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

impl LlmTimeoutsSection {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }
}

/// [llm.retry] 段：尝试次数上限与退避基数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// 从 config 目录加载配置，环境变量 MEDASSIST__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MEDASSIST__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MEDASSIST")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
