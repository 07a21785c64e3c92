//! 生成编排器
//!
//! 每个会话槽位的生成状态机。启动时创建占位 `GenerationUnit`，
//! 驱动传输层流增量与工具事件旁路通道，实时重算统计并经
//! `watch` 通道发布只读快照；终态时冻结单元，完成态移交持久化协作者。
//!
//! 并发模型：每次生成是一个可取消的异步任务，`GenerationUnit` 的全部
//! 变更都发生在该任务内；不同会话的生成可并行，同一会话同时只允许一个
//! 进行中的生成（由槽位占用检查保证）。

use crate::cancel::CancellationToken;
use crate::error::{GenerationError, TransportError};
use crate::generation::stats::GenerationStats;
use crate::generation::unit::GenerationUnit;
use crate::sse::{ProtocolEvent, StreamDelta};
use crate::transport::StreamTransport;
use crate::types::{ChatMessage, ChatRequest, SamplingParams};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 单次生成的状态
///
/// `Idle` 由槽位不存在表示；`Finalized`/`Cancelled`/`Failed` 为终态。
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationState {
    /// 已创建占位单元，传输流尚未建立
    Starting,
    /// 正在消费流增量
    Streaming,
    /// 正常完成
    Finalized,
    /// 已取消（部分内容保留，无错误标注）
    Cancelled,
    /// 传输失败（部分内容保留并随错误一同展示）
    Failed(TransportError),
}

impl GenerationState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::Finalized | GenerationState::Cancelled | GenerationState::Failed(_)
        )
    }
}

/// 生成快照
///
/// 每次应用增量后发布的只读视图，供渲染层订阅。
#[derive(Debug, Clone)]
pub struct GenerationSnapshot {
    /// 当前累积单元
    pub unit: GenerationUnit,
    /// 实时统计
    pub stats: GenerationStats,
    /// 状态机状态
    pub state: GenerationState,
}

/// 会话持久化协作者
///
/// 完成态的 `GenerationUnit` 经此移交，持久化格式不在本核心范围内。
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 接收一个已完成的生成单元
    async fn persist_unit(&self, unit: GenerationUnit);
}

/// 生成句柄
///
/// 对一次进行中生成的外部引用：取消、订阅快照。
/// 取消可以从任意任务调用，幂等。
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    id: String,
    conversation_id: String,
    cancel: CancellationToken,
    snapshot_rx: watch::Receiver<GenerationSnapshot>,
}

impl GenerationHandle {
    /// 句柄 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 所属会话 ID
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// 触发取消
    ///
    /// 幂等：流自然结束后再调用为 no-op。
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 订阅快照流
    pub fn subscribe(&self) -> watch::Receiver<GenerationSnapshot> {
        self.snapshot_rx.clone()
    }

    /// 读取当前快照
    pub fn snapshot(&self) -> GenerationSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

/// 进行中生成的槽位记录
struct ActiveGeneration {
    handle_id: String,
    cancel: CancellationToken,
}

/// 生成编排器
pub struct GenerationOrchestrator {
    transport: StreamTransport,
    store: Arc<dyn ConversationStore>,
    active: Arc<DashMap<String, ActiveGeneration>>,
}

impl GenerationOrchestrator {
    /// 创建编排器
    pub fn new(transport: StreamTransport, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            transport,
            store,
            active: Arc::new(DashMap::new()),
        }
    }

    /// 启动一次生成
    ///
    /// 同一会话已有进行中的生成时返回 `AlreadyGenerating`。
    pub fn start_generation(
        &self,
        conversation_id: impl Into<String>,
        history: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<GenerationHandle, GenerationError> {
        let conversation_id = conversation_id.into();
        let cancel = CancellationToken::new();
        let (tool_tx, tool_rx) = mpsc::channel(64);
        let request = ChatRequest::new(params, history);
        let deltas = self.transport.open(request, cancel.clone(), tool_tx);
        self.spawn_generation(conversation_id, deltas, tool_rx, cancel)
    }

    /// 编辑历史消息并重新生成
    ///
    /// 语义为「改写历史，然后重新生成」：丢弃 `index` 之后的全部消息、
    /// 改写该消息内容，随后走与 `start_generation` 完全相同的路径。
    /// 返回改写后的历史与新句柄。
    pub fn edit_message(
        &self,
        conversation_id: impl Into<String>,
        history: Vec<ChatMessage>,
        index: usize,
        new_content: impl Into<String>,
        params: &SamplingParams,
    ) -> Result<(Vec<ChatMessage>, GenerationHandle), GenerationError> {
        let history = rewrite_history(history, index, new_content)?;
        let handle = self.start_generation(conversation_id, &history, params)?;
        Ok((history, handle))
    }

    /// 取消句柄对应的生成
    pub fn cancel(&self, handle: &GenerationHandle) {
        handle.cancel();
    }

    /// 按会话取消进行中的生成
    pub fn cancel_conversation(&self, conversation_id: &str) {
        if let Some(slot) = self.active.get(conversation_id) {
            info!("[GenerationOrchestrator] 取消会话生成: {}", conversation_id);
            slot.cancel.cancel();
        }
    }

    /// 订阅句柄的快照流
    pub fn subscribe(&self, handle: &GenerationHandle) -> watch::Receiver<GenerationSnapshot> {
        handle.subscribe()
    }

    /// 会话是否有进行中的生成
    pub fn is_generating(&self, conversation_id: &str) -> bool {
        self.active.contains_key(conversation_id)
    }

    /// 以给定增量流启动生成任务
    ///
    /// `start_generation` 的下半部分，拆出以便用合成流做场景测试。
    pub(crate) fn spawn_generation<S>(
        &self,
        conversation_id: String,
        deltas: S,
        tool_rx: mpsc::Receiver<ProtocolEvent>,
        cancel: CancellationToken,
    ) -> Result<GenerationHandle, GenerationError>
    where
        S: Stream<Item = Result<StreamDelta, TransportError>> + Send + 'static,
    {
        let handle_id = Uuid::new_v4().to_string();

        // 槽位占用检查：同一会话至多一个进行中的生成
        match self.active.entry(conversation_id.clone()) {
            Entry::Occupied(_) => {
                warn!(
                    "[GenerationOrchestrator] 拒绝并发生成: conversation={}",
                    conversation_id
                );
                return Err(GenerationError::AlreadyGenerating { conversation_id });
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveGeneration {
                    handle_id: handle_id.clone(),
                    cancel: cancel.clone(),
                });
            }
        }

        let unit = GenerationUnit::new(conversation_id.clone());
        let started_at = Instant::now();
        let (snapshot_tx, snapshot_rx) = watch::channel(GenerationSnapshot {
            unit: unit.clone(),
            stats: GenerationStats::default(),
            state: GenerationState::Starting,
        });

        debug!(
            "[GenerationOrchestrator] 启动生成: conversation={}, unit={}",
            conversation_id, unit.id
        );

        let store = Arc::clone(&self.store);
        let active = Arc::clone(&self.active);
        let task_cancel = cancel.clone();
        let conv = conversation_id.clone();
        let hid = handle_id.clone();

        tokio::spawn(async move {
            drive_generation(deltas, tool_rx, unit, started_at, &snapshot_tx, store, task_cancel)
                .await;
            // 释放槽位，避免误删后继生成占用的同名槽位
            active.remove_if(&conv, |_, slot| slot.handle_id == hid);
        });

        Ok(GenerationHandle {
            id: handle_id,
            conversation_id,
            cancel,
            snapshot_rx,
        })
    }
}

/// 改写历史：截断 `index` 之后的消息并替换该消息内容
pub(crate) fn rewrite_history(
    mut history: Vec<ChatMessage>,
    index: usize,
    new_content: impl Into<String>,
) -> Result<Vec<ChatMessage>, GenerationError> {
    if index >= history.len() {
        return Err(GenerationError::MessageIndexOutOfRange { index });
    }
    history.truncate(index + 1);
    history[index].content = new_content.into();
    Ok(history)
}

/// 驱动一次生成直到终态
///
/// 增量严格按传输层到达顺序应用，不重排、不合并，
/// 因此统计在终态前单调不减。取消观察到后不再应用任何增量。
pub(crate) async fn drive_generation<S>(
    deltas: S,
    mut tool_rx: mpsc::Receiver<ProtocolEvent>,
    mut unit: GenerationUnit,
    started_at: Instant,
    snapshot_tx: &watch::Sender<GenerationSnapshot>,
    store: Arc<dyn ConversationStore>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<StreamDelta, TransportError>> + Send,
{
    let mut deltas = std::pin::pin!(deltas);
    let mut token_count: u32 = 0;
    let mut current_tool: Option<u32> = None;

    // HTTP 请求在流首次被轮询时才发出，因此 Streaming 不在此处发布：
    // 首个增量（或工具事件）到达前订阅方一直看到 Starting
    loop {
        tokio::select! {
            biased;
            Some(event) = tool_rx.recv() => {
                if cancel.is_cancelled() {
                    continue;
                }
                apply_tool_event(&mut unit, &mut current_tool, event);
                publish(
                    snapshot_tx,
                    &unit,
                    GenerationStats::compute(token_count, started_at, Instant::now(), None),
                    GenerationState::Streaming,
                );
            }
            item = deltas.next() => {
                match item {
                    Some(Ok(StreamDelta::Content { text })) => {
                        // 取消后到达的增量不再应用
                        if cancel.is_cancelled() {
                            continue;
                        }
                        unit.append_content(&text);
                        // 近似计数：每个增量记 1，不走真实分词器
                        token_count += 1;
                        publish(
                            snapshot_tx,
                            &unit,
                            GenerationStats::compute(token_count, started_at, Instant::now(), None),
                            GenerationState::Streaming,
                        );
                    }
                    Some(Ok(StreamDelta::Reasoning { text })) => {
                        if cancel.is_cancelled() {
                            continue;
                        }
                        // 思维链不计入 token 计数
                        unit.append_reasoning(&text);
                        publish(
                            snapshot_tx,
                            &unit,
                            GenerationStats::compute(token_count, started_at, Instant::now(), None),
                            GenerationState::Streaming,
                        );
                    }
                    Some(Ok(StreamDelta::Finished { reason })) => {
                        drain_tool_events(&mut tool_rx, &mut unit, &mut current_tool);
                        let stats = GenerationStats::compute(
                            token_count,
                            started_at,
                            Instant::now(),
                            Some(reason.clone()),
                        );
                        unit.finalize(token_count);
                        publish(snapshot_tx, &unit, stats, GenerationState::Finalized);
                        debug!(
                            "[GenerationOrchestrator] 生成完成: unit={}, tokens={}, reason={}",
                            unit.id, token_count, reason
                        );
                        store.persist_unit(unit.clone()).await;
                        return;
                    }
                    Some(Ok(StreamDelta::Cancelled)) => {
                        unit.freeze();
                        let stats = GenerationStats::compute(
                            token_count,
                            started_at,
                            Instant::now(),
                            None,
                        );
                        publish(snapshot_tx, &unit, stats, GenerationState::Cancelled);
                        debug!("[GenerationOrchestrator] 生成已取消: unit={}", unit.id);
                        return;
                    }
                    Some(Ok(StreamDelta::Incomplete)) => {
                        unit.freeze();
                        let stats = GenerationStats::compute(
                            token_count,
                            started_at,
                            Instant::now(),
                            None,
                        );
                        let err = TransportError::ConnectionClosed(
                            "连接在 chat.end 之前关闭".to_string(),
                        );
                        publish(snapshot_tx, &unit, stats, GenerationState::Failed(err));
                        return;
                    }
                    Some(Err(e)) => {
                        unit.freeze();
                        error!("[GenerationOrchestrator] 生成失败: unit={}, error={}", unit.id, e);
                        let stats = GenerationStats::compute(
                            token_count,
                            started_at,
                            Instant::now(),
                            None,
                        );
                        // 部分内容保留，随错误一同展示
                        publish(snapshot_tx, &unit, stats, GenerationState::Failed(e));
                        return;
                    }
                    None => {
                        // 流在无终结项的情况下耗尽
                        unit.freeze();
                        let stats = GenerationStats::compute(
                            token_count,
                            started_at,
                            Instant::now(),
                            None,
                        );
                        let state = if cancel.is_cancelled() {
                            GenerationState::Cancelled
                        } else {
                            GenerationState::Failed(TransportError::ConnectionClosed(
                                "流意外结束".to_string(),
                            ))
                        };
                        publish(snapshot_tx, &unit, stats, state);
                        return;
                    }
                }
            }
        }
    }
}

/// 终态前清空旁路通道中尚未应用的工具事件
fn drain_tool_events(
    tool_rx: &mut mpsc::Receiver<ProtocolEvent>,
    unit: &mut GenerationUnit,
    current_tool: &mut Option<u32>,
) {
    while let Ok(event) = tool_rx.try_recv() {
        apply_tool_event(unit, current_tool, event);
    }
}

/// 应用一个工具调用生命周期事件
fn apply_tool_event(
    unit: &mut GenerationUnit,
    current_tool: &mut Option<u32>,
    event: ProtocolEvent,
) {
    match event {
        ProtocolEvent::ToolCallStart { tool_name, provider } => {
            *current_tool = unit.begin_tool_call(tool_name, provider);
        }
        ProtocolEvent::ToolCallArguments { arguments } => {
            if let Some(index) = *current_tool {
                if let Some(call) = unit.tool_call_mut(index) {
                    match serde_json::to_string(&arguments) {
                        Ok(fragment) => call.append_arguments(&fragment),
                        Err(e) => warn!("[GenerationOrchestrator] 参数片段序列化失败: {}", e),
                    }
                }
            }
        }
        ProtocolEvent::ToolCallSuccess { output } => {
            if let Some(index) = current_tool.take() {
                if let Some(call) = unit.tool_call_mut(index) {
                    call.succeed(output);
                }
            }
        }
        ProtocolEvent::ToolCallFailure { message } => {
            // 工具失败记录在对应状态上，生成继续
            if let Some(index) = current_tool.take() {
                if let Some(call) = unit.tool_call_mut(index) {
                    call.fail(message);
                }
            }
        }
        other => {
            debug!("[GenerationOrchestrator] 旁路通道忽略非工具事件: {:?}", other);
        }
    }
}

/// 发布一份快照
fn publish(
    snapshot_tx: &watch::Sender<GenerationSnapshot>,
    unit: &GenerationUnit,
    stats: GenerationStats,
    state: GenerationState,
) {
    snapshot_tx.send_replace(GenerationSnapshot {
        unit: unit.clone(),
        stats,
        state,
    });
}
