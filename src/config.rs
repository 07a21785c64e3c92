//! 传输配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 传输配置
///
/// 流式请求的目标地址与凭证。连接/读取超时由上层 HTTP 协作者负责，
/// 本层只在 0 以外的值时将 connect 超时传给 HTTP 客户端。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// 服务端基础 URL
    pub base_url: String,
    /// API 密钥（Bearer）
    pub api_key: String,
    /// 连接超时（毫秒），0 表示不设置
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: String::new(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    /// 创建新的传输配置
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// 流式补全端点
    pub fn stream_endpoint(&self) -> String {
        format!("{}/v1/chat/stream", self.base_url.trim_end_matches('/'))
    }

    /// 获取连接超时 Duration
    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout_ms > 0 {
            Some(Duration::from_millis(self.connect_timeout_ms))
        } else {
            None
        }
    }
}
