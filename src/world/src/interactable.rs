// src/world/src/interactable.rs
use crate::math::Vec3;
use bincode::{Decode, Encode};
use error::GameError;
use hecs::{Entity, World};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use strum_macros::{Display, EnumString};

/// 可交互物体标识（在一个已加载区域内唯一，跨存档稳定）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode)]
#[serde(transparent)]
pub struct InteractableId(pub String);

impl InteractableId {
    pub fn new(id: impl Into<String>) -> Self {
        InteractableId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InteractableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 可交互物体的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize, Encode, Decode)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InteractableKind {
    Door,
    Note,
    Key,
    Switch,
    Generator,
}

/// 各种类物体的可变数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractableState {
    /// 门 - 可能上锁，需要对应钥匙
    Door {
        #[serde(default)]
        locked: bool,
        #[serde(default)]
        required_key: Option<String>,
        #[serde(default)]
        is_open: bool,
        #[serde(default)]
        target_area: Option<String>,
        /// 追逐封锁中：钥匙也打不开，封锁解除后恢复原来的锁
        #[serde(default)]
        sealed: bool,
    },
    /// 笔记 - 阅读后显示内容
    Note {
        title: String,
        content: String,
        #[serde(default)]
        is_read: bool,
    },
    /// 钥匙 - 拾取后进入背包并从世界移除
    Key {
        key_id: String,
        display_name: String,
    },
    /// 开关 - 切换状态并通知其控制的系统
    Switch {
        #[serde(default)]
        is_on: bool,
        controls: String,
    },
    /// 发电机 - 只能启动一次
    Generator {
        #[serde(default)]
        is_running: bool,
        powers: String,
    },
}

impl InteractableState {
    pub fn kind(&self) -> InteractableKind {
        match self {
            InteractableState::Door { .. } => InteractableKind::Door,
            InteractableState::Note { .. } => InteractableKind::Note,
            InteractableState::Key { .. } => InteractableKind::Key,
            InteractableState::Switch { .. } => InteractableKind::Switch,
            InteractableState::Generator { .. } => InteractableKind::Generator,
        }
    }

    /// HUD 上显示的交互提示
    pub fn prompt(&self) -> &'static str {
        match self {
            InteractableState::Door { sealed: true, .. } | InteractableState::Door { locked: true, .. } => "Locked",
            InteractableState::Door { .. } => "Press E to open",
            InteractableState::Note { .. } => "Press E to read",
            InteractableState::Key { .. } => "Press E to pick up",
            InteractableState::Switch { .. } => "Press E to flip switch",
            InteractableState::Generator { .. } => "Press E to start generator",
        }
    }
}

/// 区域数据中的可交互物体描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractableSpec {
    pub id: String,
    pub position: Vec3,
    pub state: InteractableState,
}

impl InteractableSpec {
    pub fn new(id: impl Into<String>, position: Vec3, state: InteractableState) -> Self {
        InteractableSpec {
            id: id.into(),
            position,
            state,
        }
    }
}

/// 世界中的一个可交互物体（hecs 组件）
#[derive(Debug, Clone, PartialEq)]
pub struct Interactable {
    pub id: InteractableId,
    pub position: Vec3,
    pub active: bool,
    pub state: InteractableState,
    /// 注册顺序，距离相同时用于打破平局
    pub order: u32,
}

impl Interactable {
    pub fn kind(&self) -> InteractableKind {
        self.state.kind()
    }

    pub fn prompt(&self) -> &'static str {
        self.state.prompt()
    }
}

/// 存档用的物体状态；被消耗的物体以 `active == false` 记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct InteractableRecord {
    pub id: InteractableId,
    pub active: bool,
    pub state: InteractableState,
}

/// 交互范围内的候选物体
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: InteractableId,
    pub position: Vec3,
    pub distance: f32,
    pub order: u32,
}

/// 当前区域的可交互物体注册表
///
/// 物体作为 hecs 实体存放；`index` 将稳定的物体 id 映射到实体，
/// `consumed` 保留已被消耗（已从世界移除）的物体以便存档。
pub struct InteractableRegistry {
    world: World,
    index: HashMap<InteractableId, Entity>,
    consumed: Vec<Interactable>,
    next_order: u32,
}

impl InteractableRegistry {
    pub fn new() -> Self {
        InteractableRegistry {
            world: World::new(),
            index: HashMap::new(),
            consumed: Vec::new(),
            next_order: 0,
        }
    }

    /// 从区域描述构建注册表
    pub fn from_specs(area: &str, specs: &[InteractableSpec]) -> Result<Self, GameError> {
        let mut registry = InteractableRegistry::new();
        for spec in specs {
            registry
                .spawn(spec)
                .map_err(|reason| GameError::area_data(area, reason))?;
        }
        Ok(registry)
    }

    /// 注册一个物体；id 重复时返回错误原因
    pub fn spawn(&mut self, spec: &InteractableSpec) -> Result<InteractableId, String> {
        let id = InteractableId::new(spec.id.clone());
        if id.0.is_empty() {
            return Err("interactable id must not be empty".to_string());
        }
        if self.index.contains_key(&id) {
            return Err(format!("duplicate interactable id '{}'", id));
        }

        let order = self.next_order;
        self.next_order += 1;

        let entity = self.world.spawn((Interactable {
            id: id.clone(),
            position: spec.position,
            active: true,
            state: spec.state.clone(),
            order,
        },));
        self.index.insert(id.clone(), entity);
        Ok(id)
    }

    /// 获取物体的副本
    pub fn get(&self, id: &InteractableId) -> Option<Interactable> {
        let entity = *self.index.get(id)?;
        self.world
            .get::<&Interactable>(entity)
            .ok()
            .map(|item| (*item).clone())
    }

    /// 对物体执行可变操作
    pub fn with_mut<R>(&mut self, id: &InteractableId, f: impl FnOnce(&mut Interactable) -> R) -> Option<R> {
        let entity = *self.index.get(id)?;
        let mut item = self.world.get::<&mut Interactable>(entity).ok()?;
        Some(f(&mut item))
    }

    /// 在 `range` 内的所有激活物体，按距离、注册顺序排序
    pub fn candidates_within(&self, origin: Vec3, range: f32) -> Vec<Candidate> {
        let mut found: Vec<Candidate> = self
            .world
            .query::<&Interactable>()
            .iter()
            .filter(|(_, item)| item.active)
            .filter_map(|(_, item)| {
                let distance = origin.distance(item.position);
                (distance <= range).then(|| Candidate {
                    id: item.id.clone(),
                    position: item.position,
                    distance,
                    order: item.order,
                })
            })
            .collect();

        found.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.order.cmp(&b.order)));
        found
    }

    /// 消耗物体：标记为非激活并从世界中移除
    pub fn consume(&mut self, id: &InteractableId) -> Option<Interactable> {
        let entity = self.index.remove(id)?;
        let mut item = self.world.get::<&Interactable>(entity).ok().map(|item| (*item).clone())?;
        if let Err(e) = self.world.despawn(entity) {
            tracing::warn!(interactable = %id, error = %e, "consumed interactable was already despawned");
        }
        item.active = false;
        self.consumed.push(item.clone());
        Some(item)
    }

    pub fn contains(&self, id: &InteractableId) -> bool {
        self.index.contains_key(id)
    }

    /// 按注册顺序列出仍在世界中的物体
    pub fn iter_ordered(&self) -> Vec<Interactable> {
        let mut items: Vec<Interactable> = self
            .world
            .query::<&Interactable>()
            .iter()
            .map(|(_, item)| item.clone())
            .collect();
        items.sort_by_key(|item| item.order);
        items
    }

    pub fn consumed(&self) -> &[Interactable] {
        &self.consumed
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn records(&self) -> Vec<InteractableRecord> {
        let mut all = self.iter_ordered();
        all.extend(self.consumed.iter().cloned());
        all.sort_by_key(|item| item.order);
        all.into_iter()
            .map(|item| InteractableRecord {
                id: item.id,
                active: item.active,
                state: item.state,
            })
            .collect()
    }

    /// 恢复存档状态；`active == false` 的记录会把对应物体移出世界
    pub fn restore(&mut self, records: &[InteractableRecord]) {
        for record in records {
            if !self.contains(&record.id) {
                tracing::warn!(interactable = %record.id, "saved interactable not present in area, skipping");
                continue;
            }
            self.with_mut(&record.id, |item| item.state = record.state.clone());
            if !record.active {
                self.consume(&record.id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.world.clear();
        self.index.clear();
        self.consumed.clear();
        self.next_order = 0;
    }
}

impl Default for InteractableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InteractableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractableRegistry")
            .field("live", &self.index.len())
            .field("consumed", &self.consumed.len())
            .finish()
    }
}
