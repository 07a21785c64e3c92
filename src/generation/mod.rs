//! 生成编排层
//!
//! 管理单次助手回复的完整生命周期：
//!
//! - `unit`: 可变累积器 `GenerationUnit` 与工具调用状态
//! - `stats`: 由部分数据派生的实时统计
//! - `orchestrator`: 每会话的生成状态机（启动/取消/订阅/编辑重生成）
//!
//! 状态机：`Idle → Starting → Streaming → {Finalized | Cancelled | Failed}`，
//! 三个终态之后单元冻结，不再接受任何增量。

mod orchestrator;
mod stats;
mod unit;


pub use orchestrator::{
    ConversationStore, GenerationHandle, GenerationOrchestrator, GenerationSnapshot,
    GenerationState,
};
pub use stats::GenerationStats;
pub use unit::{GenerationUnit, ToolCallState};
