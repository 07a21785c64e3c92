//! 协议事件与流增量类型
//!
//! `ProtocolEvent` 是线协议的封闭中间表示，由 `EventMapper` 产出；
//! `StreamDelta` 是传输层对外的窄输出字母表，刻意隐藏协议事件粒度，
//! 使编排器不依赖具体线协议。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 工具提供方信息
///
/// 随 `tool_call.start` 帧下发的提供方描述，字段均为可选。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderInfo {
    /// 提供方 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// 提供方名称
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// 协议事件
///
/// 线协议 `type` 字段的封闭枚举表示。未识别的类型不会出现在这里，
/// 由 `EventMapper` 直接丢弃以保持前向兼容。
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// 会话流开始
    ChatStart,
    /// 消息开始
    MessageStart,
    /// 消息文本增量
    MessageDelta { text: String },
    /// 消息结束
    MessageEnd,
    /// 思维链开始
    ReasoningStart,
    /// 思维链文本增量
    ReasoningDelta { text: String },
    /// 思维链结束
    ReasoningEnd,
    /// 工具调用开始
    ToolCallStart {
        /// 工具名称
        tool_name: Option<String>,
        /// 提供方信息
        provider: Option<ProviderInfo>,
    },
    /// 工具调用参数增量（部分 JSON 对象）
    ToolCallArguments { arguments: Map<String, Value> },
    /// 工具执行成功，携带累积输出
    ToolCallSuccess { output: Option<String> },
    /// 工具执行失败
    ToolCallFailure { message: Option<String> },
    /// 会话流结束
    ChatEnd,
    /// 上游显式错误帧
    Error { message: String },
}

impl ProtocolEvent {
    /// 是否为工具调用生命周期事件
    ///
    /// 这类事件绕过传输层的窄字母表，经独立通道直达编排器。
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::ToolCallStart { .. }
                | ProtocolEvent::ToolCallArguments { .. }
                | ProtocolEvent::ToolCallSuccess { .. }
                | ProtocolEvent::ToolCallFailure { .. }
        )
    }
}

/// 流增量
///
/// 传输层对编排器的输出类型。`Finished`/`Cancelled`/`Incomplete`
/// 均为终结项，产出后流立即结束。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    /// 消息内容增量
    Content { text: String },
    /// 思维链内容增量
    Reasoning { text: String },
    /// 正常结束
    Finished { reason: String },
    /// 已响应取消（正常终态，不是错误）
    Cancelled,
    /// 连接在 chat.end 前关闭
    Incomplete,
}

impl StreamDelta {
    /// 是否为终结项
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamDelta::Finished { .. } | StreamDelta::Cancelled | StreamDelta::Incomplete
        )
    }
}
