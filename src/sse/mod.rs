//! SSE 解析层
//!
//! 将服务端字节流解析为语义化协议事件，分两级：
//!
//! - `frame`: 字节 → `SseFrame`（行级解码，纯函数，与 chunk 切分方式无关）
//! - `mapper`: `SseFrame` → `ProtocolEvent`（JSON 负载按 `type` 字段分发）
//!
//! 两级均为同步纯状态机，不做任何 I/O，便于脱离网络环境单测。
//! 更换上游线协议只需替换 `mapper`，取消与错误处理留在 `transport` 层。

mod events;
mod frame;
mod mapper;

pub use events::{ProtocolEvent, ProviderInfo, StreamDelta};
pub use frame::{SseFrame, SseFrameParser};
pub use mapper::EventMapper;
