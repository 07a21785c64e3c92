//! 生成单元
//!
//! 一次助手回复在生成期间的可变累积器。
//! 生成期间由编排任务独占持有，终态后整体移交外部持久化协作者。

use crate::sse::ProviderInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 工具调用状态
///
/// 不变量：`is_executing` 变为 false 后，`result`/`error` 至多设置其一。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallState {
    /// 稳定排序键，按出现顺序分配
    pub index: u32,
    /// 工具名称
    pub name: String,
    /// 累积的原始 JSON 参数片段（只追加）
    pub arguments: String,
    /// 执行结果
    pub result: Option<String>,
    /// 执行错误
    pub error: Option<String>,
    /// 是否执行中
    pub is_executing: bool,
    /// 提供方信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderInfo>,
}

impl ToolCallState {
    /// 创建执行中的工具调用状态
    pub fn started(index: u32, name: String, provider: Option<ProviderInfo>) -> Self {
        Self {
            index,
            name,
            arguments: String::new(),
            result: None,
            error: None,
            is_executing: true,
            provider,
        }
    }

    /// 追加参数片段
    pub fn append_arguments(&mut self, fragment: &str) {
        self.arguments.push_str(fragment);
    }

    /// 标记执行成功
    pub fn succeed(&mut self, output: Option<String>) {
        self.is_executing = false;
        self.result = Some(output.unwrap_or_default());
        self.error = None;
    }

    /// 标记执行失败
    ///
    /// 工具失败不中断生成，只记录在本状态上。
    pub fn fail(&mut self, message: Option<String>) {
        self.is_executing = false;
        self.error = Some(message.unwrap_or_else(|| "工具执行失败".to_string()));
        self.result = None;
    }
}

/// 生成单元
///
/// 不变量：`is_generating` 自创建起为 true，直到 finalize/cancel/fail
/// 恰好调用其一；之后所有追加操作均为 no-op。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationUnit {
    /// 单元 ID
    pub id: String,
    /// 所属会话 ID
    pub conversation_id: String,
    /// 累积的回复内容（只追加）
    pub content: String,
    /// 累积的思维链内容（只追加，出现过才为 Some）
    pub reasoning: Option<String>,
    /// 工具调用，按协议顺序索引
    pub tool_calls: BTreeMap<u32, ToolCallState>,
    /// 是否生成中
    pub is_generating: bool,
    /// 最终 token 计数（finalize 时落定）
    pub tokens_used: Option<u32>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl GenerationUnit {
    /// 为一个会话创建占位单元
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            content: String::new(),
            reasoning: None,
            tool_calls: BTreeMap::new(),
            is_generating: true,
            tokens_used: None,
            created_at: Utc::now(),
        }
    }

    /// 追加回复内容
    pub fn append_content(&mut self, text: &str) {
        if !self.is_generating {
            return;
        }
        self.content.push_str(text);
    }

    /// 追加思维链内容
    pub fn append_reasoning(&mut self, text: &str) {
        if !self.is_generating {
            return;
        }
        self.reasoning.get_or_insert_with(String::new).push_str(text);
    }

    /// 开始一个新工具调用，返回其索引
    pub fn begin_tool_call(
        &mut self,
        name: Option<String>,
        provider: Option<ProviderInfo>,
    ) -> Option<u32> {
        if !self.is_generating {
            return None;
        }
        let index = self
            .tool_calls
            .keys()
            .next_back()
            .map(|i| i + 1)
            .unwrap_or(0);
        self.tool_calls.insert(
            index,
            ToolCallState::started(index, name.unwrap_or_default(), provider),
        );
        Some(index)
    }

    /// 获取指定索引的工具调用
    pub fn tool_call_mut(&mut self, index: u32) -> Option<&mut ToolCallState> {
        if !self.is_generating {
            return None;
        }
        self.tool_calls.get_mut(&index)
    }

    /// 冻结单元
    ///
    /// finalize/cancel/fail 共用的终态入口，幂等。
    pub fn freeze(&mut self) {
        self.is_generating = false;
    }

    /// 正常完成
    pub fn finalize(&mut self, token_count: u32) {
        self.tokens_used = Some(token_count);
        self.freeze();
    }

    /// 按顺序返回工具调用
    pub fn ordered_tool_calls(&self) -> impl Iterator<Item = &ToolCallState> {
        self.tool_calls.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_is_monotonic_concatenation() {
        let mut unit = GenerationUnit::new("conv-1");
        let deltas = ["He", "l", "lo", ", ", "world"];

        let mut prev_len = 0;
        for d in &deltas {
            unit.append_content(d);
            assert!(unit.content.len() >= prev_len);
            prev_len = unit.content.len();
        }
        assert_eq!(unit.content, "Hello, world");
    }

    #[test]
    fn test_reasoning_created_on_first_delta() {
        let mut unit = GenerationUnit::new("conv-1");
        assert!(unit.reasoning.is_none());

        unit.append_reasoning("think");
        unit.append_reasoning("ing");
        assert_eq!(unit.reasoning.as_deref(), Some("thinking"));
    }

    #[test]
    fn test_frozen_unit_rejects_mutation() {
        let mut unit = GenerationUnit::new("conv-1");
        unit.append_content("kept");
        unit.freeze();

        unit.append_content(" dropped");
        unit.append_reasoning("dropped");
        assert!(unit.begin_tool_call(Some("t".to_string()), None).is_none());

        assert_eq!(unit.content, "kept");
        assert!(unit.reasoning.is_none());
        assert!(unit.tool_calls.is_empty());
        assert!(!unit.is_generating);
    }

    #[test]
    fn test_finalize_records_tokens() {
        let mut unit = GenerationUnit::new("conv-1");
        unit.finalize(42);
        assert_eq!(unit.tokens_used, Some(42));
        assert!(!unit.is_generating);
    }

    #[test]
    fn test_tool_call_indices_are_sequential_and_ordered() {
        let mut unit = GenerationUnit::new("conv-1");
        let a = unit.begin_tool_call(Some("search".to_string()), None).unwrap();
        let b = unit.begin_tool_call(Some("fetch".to_string()), None).unwrap();
        assert_eq!((a, b), (0, 1));

        let names: Vec<&str> = unit.ordered_tool_calls().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search", "fetch"]);
    }

    #[test]
    fn test_tool_call_result_error_exclusive() {
        let mut state = ToolCallState::started(0, "search".to_string(), None);
        state.append_arguments("{\"q\":");
        state.append_arguments("\"rust\"}");
        assert_eq!(state.arguments, "{\"q\":\"rust\"}");

        state.succeed(Some("done".to_string()));
        assert!(!state.is_executing);
        assert_eq!(state.result.as_deref(), Some("done"));
        assert!(state.error.is_none());

        let mut state = ToolCallState::started(1, "fetch".to_string(), None);
        state.fail(None);
        assert!(state.result.is_none());
        assert!(state.error.is_some());
    }
}
