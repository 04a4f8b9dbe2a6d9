//! 游戏进度状态存储
//!
//! `GameState` 只能通过 [`StateStore::apply`] 修改。状态转换是纯函数：
//! 同样的事件序列从初始状态重放，总会得到同样的结果。

use crate::event_bus::{Event, EventName, Payload};
use save::ProgressData;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 初始区域标签
pub const INITIAL_AREA: &str = "entrance";

/// 进度计数器快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub keys_collected: u32,
    pub notes_read: u32,
    pub generator_started: bool,
    pub power_restored: bool,
    pub entity_encounters: u32,
    /// 语义上的区域标签（`entrance`、`corridor`…），不是目录里的区域 id
    pub current_area: String,
}

impl Default for GameState {
    fn default() -> Self {
        GameState {
            keys_collected: 0,
            notes_read: 0,
            generator_started: false,
            power_restored: false,
            entity_encounters: 0,
            current_area: INITIAL_AREA.to_string(),
        }
    }
}

/// 部分覆盖（读档、调试工具）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameStatePatch {
    pub keys_collected: Option<u32>,
    pub notes_read: Option<u32>,
    pub generator_started: Option<bool>,
    pub power_restored: Option<bool>,
    pub entity_encounters: Option<u32>,
    pub current_area: Option<String>,
}

impl GameState {
    fn merge(&mut self, patch: GameStatePatch) {
        if let Some(v) = patch.keys_collected {
            self.keys_collected = v;
        }
        if let Some(v) = patch.notes_read {
            self.notes_read = v;
        }
        if let Some(v) = patch.generator_started {
            self.generator_started = v;
        }
        if let Some(v) = patch.power_restored {
            self.power_restored = v;
        }
        if let Some(v) = patch.entity_encounters {
            self.entity_encounters = v;
        }
        if let Some(v) = patch.current_area {
            self.current_area = v;
        }
    }
}

impl From<&GameState> for ProgressData {
    fn from(state: &GameState) -> Self {
        ProgressData {
            keys_collected: state.keys_collected,
            notes_read: state.notes_read,
            generator_started: state.generator_started,
            power_restored: state.power_restored,
            entity_encounters: state.entity_encounters,
            current_area: state.current_area.clone(),
        }
    }
}

impl From<ProgressData> for GameStatePatch {
    fn from(data: ProgressData) -> Self {
        GameStatePatch {
            keys_collected: Some(data.keys_collected),
            notes_read: Some(data.notes_read),
            generator_started: Some(data.generator_started),
            power_restored: Some(data.power_restored),
            entity_encounters: Some(data.entity_encounters),
            current_area: Some(data.current_area),
        }
    }
}

/// 纯状态转换（重读笔记不计数）
pub fn apply(state: &GameState, event_name: &str, payload: &Payload) -> GameState {
    apply_with(state, event_name, payload, false)
}

/// 纯状态转换；`count_rereads` 为 true 时 `first_read: false` 的笔记也计数
pub fn apply_with(state: &GameState, event_name: &str, payload: &Payload, count_rereads: bool) -> GameState {
    let mut next = state.clone();
    let Ok(name) = EventName::from_str(event_name) else {
        return next;
    };

    match name {
        EventName::KeyCollected => {
            next.keys_collected = next.keys_collected.saturating_add(1);
        }
        EventName::NoteRead => {
            let first_read = payload.get("first_read").and_then(|v| v.as_bool()).unwrap_or(true);
            if first_read || count_rereads {
                next.notes_read = next.notes_read.saturating_add(1);
            }
        }
        EventName::GeneratorStarted => next.generator_started = true,
        EventName::PowerRestored => next.power_restored = true,
        EventName::EntityEncounter => {
            next.entity_encounters = next.entity_encounters.saturating_add(1);
        }
        EventName::AreaEntered => {
            if let Some(area) = payload.get("area").and_then(|v| v.as_str()) {
                next.current_area = area.to_string();
            }
        }
        _ => {}
    }
    next
}

/// 进度的唯一可信来源
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    state: GameState,
    count_rereads: bool,
}

impl StateStore {
    pub fn new(count_rereads: bool) -> Self {
        StateStore {
            state: GameState::default(),
            count_rereads,
        }
    }

    /// 处理一个事件，返回新状态的引用
    pub fn apply(&mut self, event_name: &str, payload: &Payload) -> &GameState {
        self.state = apply_with(&self.state, event_name, payload, self.count_rereads);
        &self.state
    }

    /// 从初始状态重放有序事件序列（不修改存储本身）
    pub fn replay<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> GameState {
        events.into_iter().fold(GameState::default(), |state, event| {
            apply_with(&state, &event.name, &event.payload, self.count_rereads)
        })
    }

    pub fn get_state(&self) -> GameState {
        self.state.clone()
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn set_state(&mut self, patch: GameStatePatch) {
        self.state.merge(patch);
    }

    pub fn reset(&mut self) {
        self.state = GameState::default();
    }
}
