//! SSE 帧解析器
//!
//! 字节级增量解析。上游服务每个事件输出一到两行：
//!
//! ```text
//! event: <可选事件类型>
//! data: <json 负载>
//! ```
//!
//! 每条 `data:` 行自成一帧，不依赖空行作为帧分隔符（上游实际线格式
//! 每事件一行 `data: {json}`，不会产生多行 data 合并的情况）。

/// 一个已解码的 SSE 帧
///
/// 短生命周期：解析出来立即交给 `EventMapper` 消费，不做保留。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` 行记录的事件类型
    pub event_type: Option<String>,
    /// `data:` 行的负载
    pub data: String,
}

/// SSE 帧解析器
///
/// 维护跨 chunk 的行缓冲，输出与字节切分方式无关：
/// 逐字节喂入与整块喂入得到完全相同的帧序列。
#[derive(Debug, Default)]
pub struct SseFrameParser {
    /// 当前未完成行的字节缓冲（可增长，不截断超长行）
    line_buf: Vec<u8>,
    /// 待配对的事件类型，由下一条 data 行取走
    pending_event: Option<String>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一个字节块，返回解析出的完整帧
    ///
    /// 行在 `\n` 处终结；跨 chunk 的半行保留在缓冲中等待后续字节。
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if let Some(frame) = self.take_line() {
                    frames.push(frame);
                }
            } else {
                self.line_buf.push(byte);
            }
        }
        frames
    }

    /// 重置所有缓冲状态
    ///
    /// 用于会话逻辑重启而传输未拆除的场景。
    pub fn reset(&mut self) {
        self.line_buf.clear();
        self.pending_event = None;
    }

    /// 消费当前行缓冲
    ///
    /// 非法 UTF-8 按 lossy 解码，不会 panic。
    fn take_line(&mut self) -> Option<SseFrame> {
        let raw = std::mem::take(&mut self.line_buf);
        let decoded = String::from_utf8_lossy(&raw);
        let line = decoded.trim();

        if line.is_empty() {
            // 空行仅作为兼容性噪声忽略
            return None;
        }

        if let Some(rest) = line.strip_prefix("event:") {
            self.pending_event = Some(rest.trim().to_string());
            return None;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            return Some(SseFrame {
                event_type: self.pending_event.take(),
                data: rest.trim_start().to_string(),
            });
        }

        // 未知行忽略，保持对新增字段的前向兼容
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse_all(input: &[u8]) -> Vec<SseFrame> {
        let mut parser = SseFrameParser::new();
        parser.push_chunk(input)
    }

    #[test]
    fn test_single_data_line() {
        let frames = parse_all(b"data: {\"type\":\"chat.start\"}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type, None);
        assert_eq!(frames[0].data, "{\"type\":\"chat.start\"}");
    }

    #[test]
    fn test_event_line_pairs_with_next_data_line() {
        let frames = parse_all(b"event: delta\ndata: {\"a\":1}\ndata: {\"b\":2}\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event_type.as_deref(), Some("delta"));
        assert_eq!(frames[0].data, "{\"a\":1}");
        // 事件类型只配对一次
        assert_eq!(frames[1].event_type, None);
    }

    #[test]
    fn test_crlf_and_blank_lines_ignored() {
        let frames = parse_all(b"\r\ndata: {\"x\":1}\r\n\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"x\":1}");
    }

    #[test]
    fn test_unknown_lines_ignored() {
        let frames = parse_all(b": comment\nretry: 3000\ndata: {\"x\":1}\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut parser = SseFrameParser::new();
        assert!(parser.push_chunk(b"data: {\"ty").is_empty());
        assert!(parser.push_chunk(b"pe\":\"chat.end\"").is_empty());
        let frames = parser.push_chunk(b"}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"type\":\"chat.end\"}");
    }

    #[test]
    fn test_invalid_utf8_does_not_panic() {
        let mut parser = SseFrameParser::new();
        let mut input = b"data: ".to_vec();
        input.extend_from_slice(&[0xff, 0xfe]);
        input.push(b'\n');
        let frames = parser.push_chunk(&input);
        // lossy 解码，帧仍然产出
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_reset_then_replay_yields_same_frames() {
        let input = b"event: x\ndata: {\"a\":1}\ndata: {\"b\":2}\n";
        let mut parser = SseFrameParser::new();
        let first = parser.push_chunk(input);

        // 中途喂入半行后 reset，重放应得到与首轮相同的序列
        parser.push_chunk(b"data: {\"half");
        parser.reset();
        let second = parser.push_chunk(input);
        assert_eq!(first, second);
    }

    #[test]
    fn test_long_line_not_truncated() {
        let payload = "x".repeat(64 * 1024);
        let input = format!("data: {{\"content\":\"{}\"}}\n", payload);
        let frames = parse_all(input.as_bytes());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.contains(&payload));
    }

    proptest! {
        /// 帧边界不变量：任意切分方式下输出帧序列一致
        #[test]
        fn prop_chunking_does_not_affect_frames(splits in proptest::collection::vec(0usize..120, 0..8)) {
            let input: &[u8] =
                b"event: t\ndata: {\"type\":\"message.delta\",\"content\":\"ab\"}\ndata: {\"type\":\"chat.end\"}\n";

            let expected = parse_all(input);

            let mut cuts: Vec<usize> = splits.iter().map(|s| s % (input.len() + 1)).collect();
            cuts.sort_unstable();

            let mut parser = SseFrameParser::new();
            let mut frames = Vec::new();
            let mut prev = 0;
            for cut in cuts {
                frames.extend(parser.push_chunk(&input[prev..cut]));
                prev = cut;
            }
            frames.extend(parser.push_chunk(&input[prev..]));

            prop_assert_eq!(frames, expected);
        }
    }
}
