//! 叙事协调器：事件总线 + 状态存储 + 叙事引擎
//!
//! 每次 `emit` 的固定顺序：
//! 1. 状态存储更新
//! 2. 叙事规则评估（延迟节点进入调度器）
//! 3. 外部处理器（音频、灯光、UI……），按注册顺序
//! 4. 第 2 步产生的零延迟剧情节点，在同一次 `emit` 内发布
//!
//! 处理器通过 [`DispatchContext`] 请求的重入发布，在该处理器返回后立刻完整处理。

use crate::config::EngineConfig;
use crate::event_bus::{DispatchContext, Event, EventBus, EventHandler, EventSink, Payload, SubscriptionHandle};
use crate::state::{GameState, GameStatePatch, StateStore};
use crate::story::StoryEngine;
use std::collections::VecDeque;

pub struct Narrative {
    bus: EventBus,
    store: StateStore,
    story: StoryEngine,
    history: VecDeque<Event>,
    history_limit: usize,
    next_sequence: u64,
    depth: usize,
    max_depth: usize,
    /// 超过最大重入深度的事件，最外层 `emit` 返回前处理
    overflow: VecDeque<(String, Payload)>,
}

impl Narrative {
    pub fn new(config: &EngineConfig) -> Self {
        Narrative {
            bus: EventBus::new(),
            store: StateStore::new(config.story.note_reread_counts),
            story: StoryEngine::new(config.story.clone()),
            history: VecDeque::new(),
            history_limit: config.bus.history_limit,
            next_sequence: 0,
            depth: 0,
            max_depth: config.bus.max_dispatch_depth.max(1),
            overflow: VecDeque::new(),
        }
    }

    // ========== 订阅 ==========

    pub fn subscribe(&mut self, event_name: impl Into<String>, handler: Box<dyn EventHandler>) -> SubscriptionHandle {
        self.bus.subscribe(event_name, handler)
    }

    pub fn subscribe_fn<F>(&mut self, event_name: impl Into<String>, name: &str, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&Event, &mut DispatchContext) -> anyhow::Result<()> + 'static,
    {
        self.bus.subscribe_fn(event_name, name, callback)
    }

    pub fn subscribe_all(&mut self, handler: Box<dyn EventHandler>) -> SubscriptionHandle {
        self.bus.subscribe_all(handler)
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        self.bus.unsubscribe(handle)
    }

    // ========== 发布 ==========

    /// 同步发布一个事件
    pub fn emit(&mut self, name: impl Into<String>, payload: Payload) {
        let name = name.into();
        if self.depth >= self.max_depth {
            tracing::warn!(depth = self.depth, event = %name, "maximum dispatch depth reached, deferring event");
            self.overflow.push_back((name, payload));
            return;
        }

        self.depth += 1;
        self.dispatch(name, payload);
        self.depth -= 1;

        if self.depth == 0 {
            while let Some((name, payload)) = self.overflow.pop_front() {
                self.emit(name, payload);
            }
        }
    }

    fn dispatch(&mut self, name: String, payload: Payload) {
        let event = Event {
            name,
            payload,
            emitted_at_ms: self.story.now(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        tracing::debug!(event = %event.name, sequence = event.sequence, at_ms = event.emitted_at_ms, "emit");

        // 1. 状态
        self.store.apply(&event.name, &event.payload);
        // 2. 叙事规则
        let beats = self.story.evaluate(&event, self.store.state());
        self.remember(&event);

        // 3. 外部处理器（快照）
        for subscriber in self.bus.subscribers_for(&event.name) {
            let (emits, unsubscribes) = self.bus.deliver(&subscriber, &event).into_parts();
            for handle in unsubscribes {
                self.bus.unsubscribe(handle);
            }
            for (name, payload) in emits {
                self.emit(name, payload);
            }
        }

        // 4. 零延迟剧情节点
        for (name, payload) in beats {
            self.emit(name, payload);
        }
    }

    fn remember(&mut self, event: &Event) {
        if self.history_limit == 0 {
            return;
        }
        if self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
    }

    /// 推进模拟时钟，依次执行到期的剧情动作
    pub fn advance(&mut self, dt_ms: u64) {
        let target = self.story.now().saturating_add(dt_ms);
        while let Some(action) = self.story.pop_due(target) {
            tracing::debug!(%action, at_ms = self.story.now(), "story action due");
            for (name, payload) in self.story.run(action) {
                self.emit(name, payload);
            }
        }
        self.story.set_clock(target);
    }

    // ========== 状态 ==========

    pub fn get_state(&self) -> GameState {
        self.store.get_state()
    }

    pub fn state(&self) -> &GameState {
        self.store.state()
    }

    pub fn set_state(&mut self, patch: GameStatePatch) {
        self.store.set_state(patch);
    }

    /// 用当前存储的规则重放事件序列
    pub fn replay<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> GameState {
        self.store.replay(events)
    }

    pub fn story(&self) -> &StoryEngine {
        &self.story
    }

    pub fn story_mut(&mut self) -> &mut StoryEngine {
        &mut self.story
    }

    pub fn now(&self) -> u64 {
        self.story.now()
    }

    /// 新游戏：状态、剧情、历史全部回到初始值；订阅保持不变
    pub fn reset(&mut self) {
        self.store.reset();
        self.story.reset();
        self.history.clear();
    }

    // ========== 调试 ==========

    /// 最近 `n` 个事件，旧的在前
    pub fn history(&self, n: usize) -> Vec<&Event> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).collect()
    }

    pub fn handler_failures(&self) -> u64 {
        self.bus.failure_count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    pub fn events_emitted(&self) -> u64 {
        self.next_sequence
    }
}

impl EventSink for Narrative {
    fn emit(&mut self, name: &str, payload: Payload) {
        Narrative::emit(self, name, payload);
    }
}

impl std::fmt::Debug for Narrative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Narrative")
            .field("state", self.store.state())
            .field("story", &self.story)
            .field("subscribers", &self.bus.subscriber_count())
            .field("events_emitted", &self.next_sequence)
            .finish()
    }
}
