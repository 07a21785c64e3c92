//! 协议事件映射器
//!
//! 将 `SseFrame` 的 JSON 负载按 `type` 字段分发为 `ProtocolEvent`。
//! 单帧解码失败只丢弃该帧并记录日志，从不中断整个流。

use crate::error::ProtocolError;
use crate::sse::events::{ProtocolEvent, ProviderInfo};
use crate::sse::frame::SseFrame;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// 线协议负载
///
/// `type` 为分发键，其余字段按事件类型选择性出现。
#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(rename = "type")]
    kind: String,
    content: Option<String>,
    tool: Option<String>,
    arguments: Option<Map<String, Value>>,
    output: Option<String>,
    provider_info: Option<ProviderInfo>,
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    message: Option<String>,
}

/// 协议事件映射器
///
/// 持有当前帧序列的运行态文本累积（`message_text`/`reasoning_text`）。
/// 该累积仅作诊断用途，最终内容以编排器的累积为准，避免双重累积。
/// 每个会话/生成各自持有独立实例，无进程级共享状态。
#[derive(Debug, Default)]
pub struct EventMapper {
    /// 累积的消息文本
    message_text: String,
    /// 累积的思维链文本
    reasoning_text: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 映射一帧为协议事件
    ///
    /// 返回 `None` 的情况：未识别的 `type`（前向兼容）、
    /// 缺少必要字段的增量帧、JSON 解码失败。
    pub fn map(&mut self, frame: &SseFrame) -> Option<ProtocolEvent> {
        let payload = match Self::decode(frame) {
            Ok(p) => p,
            Err(e) => {
                warn!("[EventMapper] 丢弃无法解析的帧: {} - data: {}", e, frame.data);
                return None;
            }
        };

        match payload.kind.as_str() {
            "chat.start" => {
                self.message_text.clear();
                self.reasoning_text.clear();
                Some(ProtocolEvent::ChatStart)
            }
            "message.start" => {
                self.message_text.clear();
                Some(ProtocolEvent::MessageStart)
            }
            "message.delta" => payload.content.map(|text| {
                self.message_text.push_str(&text);
                ProtocolEvent::MessageDelta { text }
            }),
            "message.end" => Some(ProtocolEvent::MessageEnd),
            "reasoning.start" => {
                self.reasoning_text.clear();
                Some(ProtocolEvent::ReasoningStart)
            }
            "reasoning.delta" => payload.content.map(|text| {
                self.reasoning_text.push_str(&text);
                ProtocolEvent::ReasoningDelta { text }
            }),
            "reasoning.end" => Some(ProtocolEvent::ReasoningEnd),
            "tool_call.start" => Some(ProtocolEvent::ToolCallStart {
                tool_name: payload.tool,
                provider: payload.provider_info,
            }),
            "tool_call.arguments" => Some(ProtocolEvent::ToolCallArguments {
                arguments: payload.arguments.unwrap_or_default(),
            }),
            "tool_call.success" => Some(ProtocolEvent::ToolCallSuccess {
                output: payload.output,
            }),
            "tool_call.failure" => Some(ProtocolEvent::ToolCallFailure {
                message: payload.error.and_then(|e| e.message).or(payload.output),
            }),
            "chat.end" => Some(ProtocolEvent::ChatEnd),
            "error" => payload
                .error
                .and_then(|e| e.message)
                .map(|message| ProtocolEvent::Error { message }),
            other => {
                // 未识别类型静默忽略，保持前向兼容
                debug!("[EventMapper] 忽略未知事件类型: {}", other);
                None
            }
        }
    }

    /// 解码帧负载
    fn decode(frame: &SseFrame) -> Result<RawPayload, ProtocolError> {
        serde_json::from_str(&frame.data).map_err(|e| ProtocolError::MalformedJson(e.to_string()))
    }

    /// 重置运行态累积
    pub fn reset(&mut self) {
        self.message_text.clear();
        self.reasoning_text.clear();
    }

    /// 获取累积的消息文本（诊断用）
    pub fn message_text(&self) -> &str {
        &self.message_text
    }

    /// 获取累积的思维链文本（诊断用）
    pub fn reasoning_text(&self) -> &str {
        &self.reasoning_text
    }
}
