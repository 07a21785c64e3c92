//! 错误类型定义
//!
//! 定义流式管线各层的错误分类：
//!
//! - `TransportError`: HTTP 传输层错误，终止当前生成并以 `Failed` 终态上报
//! - `ProtocolError`: 协议帧错误，本地恢复（丢弃单帧后继续解析），从不中断整个流
//! - `GenerationError`: 编排层错误（并发约束、取消、工具执行失败）
//!
//! 重试策略不在本层实现，由上层 HTTP 协作者或调用方决定。

use thiserror::Error;

/// 传输层错误
///
/// 打开流式请求或读取响应字节时发生的错误。
/// 一旦发生即终止当前生成，已累积的部分内容保留不丢弃。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// 认证失败 (HTTP 401)
    #[error("认证失败 (401)")]
    Unauthorized,

    /// 权限不足 (HTTP 403)
    #[error("权限不足 (403)")]
    Forbidden,

    /// 请求限流 (HTTP 429)
    #[error("请求限流 (429), retry_after={retry_after:?}")]
    RateLimited {
        /// 服务端建议的重试等待秒数（来自 Retry-After 响应头）
        retry_after: Option<u64>,
    },

    /// 服务端不可用 (HTTP 5xx)
    #[error("服务端不可用 ({status})")]
    ServerUnavailable { status: u16 },

    /// 其他 HTTP 错误状态码
    #[error("HTTP 错误: {0}")]
    Http(u16),

    /// 连接中断（请求失败或读取中途断开）
    #[error("连接中断: {0}")]
    ConnectionClosed(String),

    /// 上游在流内显式上报的错误帧
    #[error("上游错误: {0}")]
    Upstream(String),
}

impl TransportError {
    /// 从非 2xx 状态码构建传输错误
    ///
    /// # Arguments
    /// * `status` - HTTP 状态码
    /// * `retry_after` - Retry-After 响应头解析出的秒数（仅 429 使用）
    pub fn from_status(status: u16, retry_after: Option<u64>) -> Self {
        match status {
            401 => TransportError::Unauthorized,
            403 => TransportError::Forbidden,
            429 => TransportError::RateLimited { retry_after },
            s if (500..600).contains(&s) => TransportError::ServerUnavailable { status: s },
            s => TransportError::Http(s),
        }
    }

    /// 检查是否为可重试错误
    ///
    /// 本层不做重试，该判定提供给上层调用方使用。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::RateLimited { .. }
                | TransportError::ServerUnavailable { .. }
                | TransportError::ConnectionClosed(_)
        )
    }
}

/// 协议层错误
///
/// 单帧解析失败的分类。恢复策略为丢弃该帧并继续，
/// 上游服务在高负载下偶发输出残缺帧属于正常现象。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 帧结构错误
    #[error("帧格式错误: {0}")]
    MalformedFrame(String),

    /// data 负载不是合法 JSON
    #[error("JSON 解析失败: {0}")]
    MalformedJson(String),
}

/// 生成编排错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// 同一会话同时只允许一个进行中的生成
    #[error("会话 {conversation_id} 已有进行中的生成")]
    AlreadyGenerating { conversation_id: String },

    /// 编辑消息时索引超出历史范围
    #[error("消息索引越界: {index}")]
    MessageIndexOutOfRange { index: usize },

    /// 生成已取消（正常终态，不作为用户可见错误展示）
    #[error("生成已取消")]
    Cancelled,

    /// 传输层错误
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 工具执行失败（记录在对应 ToolCallState 上，不中断生成）
    #[error("工具执行失败: {0}")]
    ToolExecutionFailed(String),
}
