//! 流式传输层
//!
//! 发起流式补全 POST 请求，将响应字节喂入 SSE 解析层，
//! 以可取消的 `StreamDelta` 异步序列对外发布。
//!
//! 输出字母表刻意收窄：只有内容/思维链增量与终结项。
//! 工具调用生命周期事件绕过该字母表，经独立 mpsc 通道直达编排器，
//! 这样更换线协议只需替换 `EventMapper`，取消与错误处理无需改动。

use crate::cancel::CancellationToken;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::sse::{EventMapper, ProtocolEvent, SseFrameParser, StreamDelta};
use crate::types::ChatRequest;
use futures::{Stream, StreamExt};
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// 流式传输器
///
/// 持有 HTTP 客户端与目标配置，可在多次生成间复用。
#[derive(Debug, Clone)]
pub struct StreamTransport {
    client: Client,
    config: TransportConfig,
}

impl StreamTransport {
    /// 创建新的传输器
    pub fn new(config: TransportConfig) -> Self {
        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        // 客户端构建仅在 TLS 后端缺失等环境问题下失败，此时退回默认客户端
        let client = builder.build().unwrap_or_default();
        Self { client, config }
    }

    /// 使用外部客户端创建传输器
    pub fn with_client(client: Client, config: TransportConfig) -> Self {
        Self { client, config }
    }

    /// 获取配置
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// 打开一次流式生成
    ///
    /// 返回 `StreamDelta` 异步序列。非 2xx 状态在消费响应体之前即以
    /// 类型化错误使流失败；取消令牌在每个字节块处检查，响应取消后
    /// 以 `Cancelled` 终结且不再产出任何项。
    ///
    /// # Arguments
    /// * `request` - 已构建的请求体
    /// * `cancel` - 取消令牌，由编排器下发
    /// * `tool_tx` - 工具调用生命周期事件的旁路通道
    pub fn open(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
        tool_tx: mpsc::Sender<ProtocolEvent>,
    ) -> impl Stream<Item = Result<StreamDelta, TransportError>> + Send + 'static {
        let client = self.client.clone();
        let url = self.config.stream_endpoint();
        let api_key = self.config.api_key.clone();

        async_stream::stream! {
            debug!("[StreamTransport] 发起流式请求: model={}, history_len={}",
                request.model, request.messages.len());

            let response = client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Accept", "text/event-stream")
                .json(&request)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    error!("[StreamTransport] 请求失败: {}", e);
                    yield Err(TransportError::ConnectionClosed(e.to_string()));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                // 不消费响应体：服务端可能压着连接不发 body，
                // 头部一到即以类型化错误终结
                let retry_after = parse_retry_after(response.headers());
                error!("[StreamTransport] 非 2xx 状态: {}", status);
                yield Err(TransportError::from_status(status.as_u16(), retry_after));
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut parser = SseFrameParser::new();
            let mut mapper = EventMapper::new();

            loop {
                // 每个 chunk 前先检查取消
                if cancel.is_cancelled() {
                    debug!("[StreamTransport] 读取循环观察到取消");
                    yield Ok(StreamDelta::Cancelled);
                    return;
                }

                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("[StreamTransport] 等待字节期间被取消");
                        yield Ok(StreamDelta::Cancelled);
                        return;
                    }
                    chunk = byte_stream.next() => chunk,
                };

                let bytes = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        error!("[StreamTransport] 流读取错误: {}", e);
                        yield Err(TransportError::ConnectionClosed(e.to_string()));
                        return;
                    }
                    None => {
                        // 未见 chat.end 即到达 EOF
                        warn!("[StreamTransport] 连接在 chat.end 之前关闭");
                        yield Ok(StreamDelta::Incomplete);
                        return;
                    }
                };

                for frame in parser.push_chunk(&bytes) {
                    let event = match mapper.map(&frame) {
                        Some(ev) => ev,
                        None => continue,
                    };

                    if event.is_tool_event() {
                        // 接收端关闭时丢弃即可，不影响文本流
                        let _ = tool_tx.send(event).await;
                        continue;
                    }

                    match event {
                        ProtocolEvent::MessageDelta { text } => {
                            yield Ok(StreamDelta::Content { text });
                        }
                        ProtocolEvent::ReasoningDelta { text } => {
                            yield Ok(StreamDelta::Reasoning { text });
                        }
                        ProtocolEvent::ChatEnd => {
                            yield Ok(StreamDelta::Finished { reason: "stop".to_string() });
                            return;
                        }
                        ProtocolEvent::Error { message } => {
                            error!("[StreamTransport] 上游错误帧: {}", message);
                            yield Err(TransportError::Upstream(message));
                            return;
                        }
                        // 其余生命周期事件不出现在窄字母表中
                        _ => {}
                    }
                }
            }
        }
    }
}

/// 解析 Retry-After 响应头（秒）
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("60"));
        assert_eq!(parse_retry_after(&headers), Some(60));

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("not-a-number"));
        assert_eq!(parse_retry_after(&headers), None);

        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_open_maps_429_before_body_arrives() {
        use std::time::Duration;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // 只回应状态行与头部，压着连接不发响应体也不关闭
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 429 Too Many Requests\r\nRetry-After: 60\r\n\r\n")
                    .await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        let config = TransportConfig::new(format!("http://{}", addr), "sk-test");
        let transport = StreamTransport::new(config);
        let (tool_tx, _tool_rx) = mpsc::channel(8);
        let request = ChatRequest::new(&crate::types::SamplingParams::default(), &[]);
        let mut stream = std::pin::pin!(transport.open(
            request,
            CancellationToken::new(),
            tool_tx
        ));

        // 头部一到就必须产出类型化错误，不等待响应体
        let item = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("typed status error should arrive without waiting for the body");
        match item {
            Some(Err(TransportError::RateLimited {
                retry_after: Some(60),
            })) => {}
            other => panic!("unexpected item: {:?}", other),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_open_fails_with_connection_error_when_unreachable() {
        // 不可达地址：第一项即为类型化连接错误，无后续项
        let config = TransportConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "sk-test".to_string(),
            connect_timeout_ms: 500,
        };
        let transport = StreamTransport::new(config);
        let (tool_tx, _tool_rx) = mpsc::channel(8);
        let request = ChatRequest::new(&crate::types::SamplingParams::default(), &[]);

        let mut stream = std::pin::pin!(transport.open(
            request,
            CancellationToken::new(),
            tool_tx
        ));

        match stream.next().await {
            Some(Err(TransportError::ConnectionClosed(_))) => {}
            other => panic!("unexpected item: {:?}", other),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_open_observes_pre_cancelled_token() {
        let config = TransportConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "sk-test".to_string(),
            connect_timeout_ms: 500,
        };
        let transport = StreamTransport::new(config);
        let (tool_tx, _tool_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = ChatRequest::new(&crate::types::SamplingParams::default(), &[]);
        let mut stream = std::pin::pin!(transport.open(request, cancel, tool_tx));

        // 连接失败或取消终态都可接受：取消在请求发出后才进入检查点，
        // 对不可达地址请求先行失败
        match stream.next().await {
            Some(Ok(StreamDelta::Cancelled)) | Some(Err(TransportError::ConnectionClosed(_))) => {}
            other => panic!("unexpected item: {:?}", other),
        }
    }
}
