//! 会话与请求类型定义
//!
//! 定义对话历史消息与流式补全请求体。
//! 请求体由本层序列化，模型选择与采样参数由调用方给定。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// 用户消息
    User,
    /// 助手回复
    Assistant,
    /// 系统提示词
    System,
}

/// 会话消息
///
/// 对话历史中的一条消息。生成完成后由外部持久化协作者保存。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 消息 ID
    pub id: String,
    /// 角色
    pub role: MessageRole,
    /// 文本内容
    pub content: String,
    /// 创建时间
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// 创建新消息
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// 创建用户消息
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// 创建助手消息
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// 创建系统消息
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// 采样参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingParams {
    /// 模型名称
    pub model: String,
    /// 温度参数
    pub temperature: Option<f32>,
    /// top_p
    pub top_p: Option<f32>,
    /// 最大输出 token 数
    pub max_tokens: Option<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: Some(0.7),
            top_p: None,
            max_tokens: Some(4096),
        }
    }
}

impl SamplingParams {
    /// 指定模型创建采样参数
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// 请求体中的消息
///
/// 只携带角色与内容，本地字段（id、时间戳）不上行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// 角色
    pub role: MessageRole,
    /// 文本内容
    pub content: String,
}

/// 流式补全请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// 模型名称
    pub model: String,
    /// 消息历史
    pub messages: Vec<WireMessage>,
    /// 恒为 true，本核心只支持流式
    pub stream: bool,
    /// 温度参数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// top_p
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// 最大输出 token 数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// 从历史与采样参数构建请求体
    pub fn new(params: &SamplingParams, history: &[ChatMessage]) -> Self {
        Self {
            model: params.model.clone(),
            messages: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
            stream: true,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
        }
    }
}
