//! chatstream — 流式聊天补全核心
//!
//! 移动端聊天客户端的协议与状态机核心，包含：
//!
//! - `sse`: 增量 SSE 帧解析与协议事件映射（纯函数，无 I/O）
//! - `transport`: 将 HTTP 流式响应转换为可取消的 `StreamDelta` 异步序列
//! - `generation`: 单次生成的编排状态机（累积、统计、工具调用、终态处理）
//! - `cancel`: 协作式取消令牌
//!
//! 数据单向流动：字节 → 帧 → 协议事件 → 流增量 → 累积消息状态 → 统计。
//! 控制反向流动：编排器发起生成请求并下发取消令牌，直达字节读取循环。
//!
//! UI 渲染、历史持久化与凭证管理均为外部协作者，不在本 crate 范围内。

pub mod cancel;
pub mod config;
pub mod error;
pub mod generation;
pub mod logging;
pub mod sse;
pub mod transport;
pub mod types;

pub use cancel::CancellationToken;
pub use config::TransportConfig;
pub use error::{GenerationError, ProtocolError, TransportError};
pub use generation::{
    ConversationStore, GenerationHandle, GenerationOrchestrator, GenerationSnapshot,
    GenerationState, GenerationStats, GenerationUnit, ToolCallState,
};
pub use sse::{EventMapper, ProtocolEvent, ProviderInfo, SseFrame, SseFrameParser, StreamDelta};
pub use transport::StreamTransport;
pub use types::{ChatMessage, ChatRequest, MessageRole, SamplingParams};
