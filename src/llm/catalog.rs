//! 模型目录：显示名 -> {id, 是否支持结构化输出}
//!
//! 目录由配置注入（[[models]]），核心只读取，不持有所有权。

use serde::Deserialize;

/// 可选模型的能力描述，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    /// 是否支持 response_format = json_object
    pub structured_output: bool,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, structured_output: bool) -> Self {
        Self {
            id: id.into(),
            structured_output,
        }
    }
}

/// [[models]] 段的一项
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub structured_output: bool,
}

pub fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry {
            name: "DeepSeek-R1".into(),
            id: "deepseek-ai/DeepSeek-R1".into(),
            structured_output: false,
        },
        ModelEntry {
            name: "GLM-4-9B".into(),
            id: "THUDM/GLM-4-9B-0414".into(),
            structured_output: true,
        },
        ModelEntry {
            name: "Qwen2.5-7B".into(),
            id: "Qwen/Qwen2.5-7B-Instruct".into(),
            structured_output: true,
        },
    ]
}

/// 有序目录；按显示名查找
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
}

impl ModelCatalog {
    /// 空列表时退回内置目录
    pub fn new(entries: Vec<ModelEntry>) -> Self {
        let entries = if entries.is_empty() {
            default_models()
        } else {
            entries
        };
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<ModelSpec> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name.trim()))
            .map(|e| ModelSpec::new(e.id.clone(), e.structured_output))
    }

    /// 按名称选择；找不到时用 fallback 名称，再找不到时用第一项
    pub fn select(&self, name: &str, fallback: &str) -> (String, ModelSpec) {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name.trim()))
            .or_else(|| self.entries.iter().find(|e| e.name == fallback))
            .unwrap_or(&self.entries[0]);
        (
            entry.name.clone(),
            ModelSpec::new(entry.id.clone(), entry.structured_output),
        )
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(default_models())
    }
}
