//! 交互解析：玩家瞄准的是哪个物体，按下交互键之后发生什么
//!
//! 每帧根据玩家位置和视线方向重新计算当前目标；`try_interact` 按物体种类分派，
//! 修改物体状态并通过 [`EventSink`] 发布对应的玩法事件。
//! 与渲染引擎的交互只有射线查询和 `dispose` 两种。

use crate::event_bus::{EventName, EventSink, Payload};
use save::InventoryEntry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use world::{Interactable, InteractableId, InteractableKind, InteractableRegistry, InteractableState, Vec3, ray_sphere_distance};

/// 玩家眼睛位置与视线方向
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerPose {
    pub position: Vec3,
    pub look: Vec3,
}

impl PlayerPose {
    pub fn new(position: Vec3, look: Vec3) -> Self {
        PlayerPose { position, look }
    }

    /// 看向某个点
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let look = (target - position).normalized().unwrap_or(Vec3::FORWARD);
        PlayerPose { position, look }
    }
}

/// 射线查询结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PickHit {
    /// 射线是否击中任何东西（包括墙壁等不可交互物体）
    pub hit: bool,
    /// 最近的命中是否是可交互物体
    pub target: Option<InteractableId>,
}

/// 渲染/物理引擎的窄接口
pub trait RenderBridge {
    /// 从 `origin` 沿 `direction` 发射射线，返回最近的命中
    fn pick(&self, origin: Vec3, direction: Vec3) -> PickHit;

    /// 射线是否击中指定物体（被遮挡时为 false）
    fn intersects(&self, origin: Vec3, direction: Vec3, id: &InteractableId) -> bool {
        self.pick(origin, direction).target.as_ref() == Some(id)
    }

    /// 物体被消耗后释放其网格等资源
    fn dispose(&mut self, _id: &InteractableId) {}
}

/// 无渲染时使用的射线检测：每个物体是一个包围球，另可加入不可交互的遮挡球
#[derive(Debug, Clone, Default)]
pub struct SphereCaster {
    bounds: Vec<(Option<InteractableId>, Vec3, f32)>,
    disposed: Vec<InteractableId>,
}

impl SphereCaster {
    pub const DEFAULT_RADIUS: f32 = 0.5;

    pub fn new() -> Self {
        Self::default()
    }

    /// 为注册表中的每个物体生成默认大小的包围球
    pub fn from_interactables<'a>(items: impl IntoIterator<Item = &'a Interactable>) -> Self {
        let mut caster = Self::new();
        for item in items {
            caster.add(item.id.clone(), item.position, Self::DEFAULT_RADIUS);
        }
        caster
    }

    pub fn add(&mut self, id: InteractableId, center: Vec3, radius: f32) {
        self.bounds.push((Some(id), center, radius));
    }

    /// 墙、柱子之类挡住视线的东西
    pub fn add_occluder(&mut self, center: Vec3, radius: f32) {
        self.bounds.push((None, center, radius));
    }

    pub fn disposed(&self) -> &[InteractableId] {
        &self.disposed
    }
}

impl RenderBridge for SphereCaster {
    fn pick(&self, origin: Vec3, direction: Vec3) -> PickHit {
        let nearest = self
            .bounds
            .iter()
            .filter_map(|(id, center, radius)| {
                ray_sphere_distance(origin, direction, *center, *radius).map(|d| (d, id))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match nearest {
            Some((_, id)) => PickHit {
                hit: true,
                target: id.clone(),
            },
            None => PickHit::default(),
        }
    }

    fn dispose(&mut self, id: &InteractableId) {
        self.bounds.retain(|(bound, _, _)| bound.as_ref() != Some(id));
        self.disposed.push(id.clone());
    }
}

/// 背包里的一把钥匙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyItem {
    pub key_id: String,
    pub display_name: String,
}

impl From<&KeyItem> for InventoryEntry {
    fn from(item: &KeyItem) -> Self {
        InventoryEntry {
            key_id: item.key_id.clone(),
            display_name: item.display_name.clone(),
        }
    }
}

impl From<InventoryEntry> for KeyItem {
    fn from(entry: InventoryEntry) -> Self {
        KeyItem {
            key_id: entry.key_id,
            display_name: entry.display_name,
        }
    }
}

/// 按拾取顺序排列的钥匙
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    keys: Vec<KeyItem>,
}

impl Inventory {
    pub fn add(&mut self, item: KeyItem) {
        self.keys.push(item);
    }

    pub fn has(&self, key_id: &str) -> bool {
        self.keys.iter().any(|k| k.key_id == key_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyItem> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn entries(&self) -> Vec<InventoryEntry> {
        self.keys.iter().map(InventoryEntry::from).collect()
    }
}

impl FromIterator<KeyItem> for Inventory {
    fn from_iter<I: IntoIterator<Item = KeyItem>>(iter: I) -> Self {
        Inventory {
            keys: iter.into_iter().collect(),
        }
    }
}

/// 成功交互的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    DoorUnlocked { id: InteractableId, key_id: String },
    DoorToggled { id: InteractableId, is_open: bool, target_area: Option<String> },
    NoteRead { id: InteractableId, first_read: bool },
    KeyCollected { id: InteractableId, key_id: String },
    SwitchToggled { id: InteractableId, is_on: bool },
    GeneratorStarted { id: InteractableId },
}

impl Interaction {
    pub fn id(&self) -> &InteractableId {
        match self {
            Interaction::DoorUnlocked { id, .. }
            | Interaction::DoorToggled { id, .. }
            | Interaction::NoteRead { id, .. }
            | Interaction::KeyCollected { id, .. }
            | Interaction::SwitchToggled { id, .. }
            | Interaction::GeneratorStarted { id } => id,
        }
    }
}

/// 交互被拒绝的原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractionDenied {
    #[error("nothing to interact with")]
    NothingToInteract,

    #[error("{id} is locked")]
    Locked {
        id: InteractableId,
        required_key: Option<String>,
    },

    #[error("{id} is sealed until the lockdown ends")]
    Sealed { id: InteractableId },

    #[error("{id} is already running")]
    AlreadyRunning { id: InteractableId },
}

impl InteractionDenied {
    /// `interaction_denied` 事件里的 `reason` 字段
    pub fn reason(&self) -> &'static str {
        match self {
            InteractionDenied::NothingToInteract => "nothing_to_interact",
            InteractionDenied::Locked { .. } => "locked",
            InteractionDenied::Sealed { .. } => "sealed",
            InteractionDenied::AlreadyRunning { .. } => "already_running",
        }
    }
}

fn payload<const N: usize>(fields: [(&str, serde_json::Value); N]) -> Payload {
    fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[derive(Debug, Clone)]
pub struct InteractionResolver {
    range: f32,
    inventory: Inventory,
    current: Option<InteractableId>,
}

impl InteractionResolver {
    pub fn new(range: f32) -> Self {
        InteractionResolver {
            range,
            inventory: Inventory::default(),
            current: None,
        }
    }

    /// 每帧调用：重新选择当前瞄准的物体
    pub fn update(
        &mut self,
        registry: &InteractableRegistry,
        pose: PlayerPose,
        bridge: &dyn RenderBridge,
    ) -> Option<&InteractableId> {
        self.current = registry
            .candidates_within(pose.position, self.range)
            .into_iter()
            .find(|candidate| bridge.intersects(pose.position, pose.look, &candidate.id))
            .map(|candidate| candidate.id);
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&InteractableId> {
        self.current.as_ref()
    }

    /// 当前目标的 HUD 提示
    pub fn prompt(&self, registry: &InteractableRegistry) -> Option<&'static str> {
        let id = self.current.as_ref()?;
        registry.get(id).map(|item| item.prompt())
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn set_inventory(&mut self, inventory: Inventory) {
        self.inventory = inventory;
    }

    /// 切换区域后旧目标失效
    pub fn clear_target(&mut self) {
        self.current = None;
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.inventory.clear();
    }

    /// 玩家按下交互键
    pub fn try_interact(
        &mut self,
        registry: &mut InteractableRegistry,
        bridge: &mut dyn RenderBridge,
        sink: &mut dyn EventSink,
    ) -> Result<Interaction, InteractionDenied> {
        let target = self
            .current
            .as_ref()
            .and_then(|id| registry.get(id))
            .filter(|item| item.active);
        let Some(target) = target else {
            self.current = None;
            tracing::debug!("interact pressed with no target");
            return Err(InteractionDenied::NothingToInteract);
        };

        let result = self.resolve(&target, registry, bridge, sink);
        if let Err(denied) = &result {
            tracing::debug!(id = %target.id, reason = denied.reason(), "interaction denied");
            sink.emit(
                EventName::InteractionDenied.as_str(),
                payload([
                    ("id", json!(target.id.as_str())),
                    ("kind", json!(target.kind().to_string())),
                    ("reason", json!(denied.reason())),
                ]),
            );
        }
        result
    }

    fn resolve(
        &mut self,
        target: &Interactable,
        registry: &mut InteractableRegistry,
        bridge: &mut dyn RenderBridge,
        sink: &mut dyn EventSink,
    ) -> Result<Interaction, InteractionDenied> {
        let id = target.id.clone();

        match &target.state {
            InteractableState::Door { sealed: true, .. } => Err(InteractionDenied::Sealed { id }),

            InteractableState::Door {
                locked: true,
                required_key,
                ..
            } => {
                let key = required_key.as_deref().filter(|key| self.inventory.has(key));
                let Some(key) = key else {
                    return Err(InteractionDenied::Locked {
                        id,
                        required_key: required_key.clone(),
                    });
                };
                let key_id = key.to_string();

                registry.with_mut(&id, |item| {
                    if let InteractableState::Door { locked, .. } = &mut item.state {
                        *locked = false;
                    }
                });
                sink.emit(
                    EventName::DoorUnlocked.as_str(),
                    payload([("id", json!(id.as_str())), ("key", json!(key_id))]),
                );
                Ok(Interaction::DoorUnlocked { id, key_id })
            }

            InteractableState::Door {
                is_open, target_area, ..
            } => {
                let is_open = !*is_open;
                registry.with_mut(&id, |item| {
                    if let InteractableState::Door { is_open: open, .. } = &mut item.state {
                        *open = is_open;
                    }
                });
                sink.emit(
                    EventName::DoorOpened.as_str(),
                    payload([
                        ("id", json!(id.as_str())),
                        ("is_open", json!(is_open)),
                        ("target_area", json!(target_area)),
                    ]),
                );
                Ok(Interaction::DoorToggled {
                    id,
                    is_open,
                    target_area: target_area.clone(),
                })
            }

            InteractableState::Note { title, content, is_read } => {
                let first_read = !*is_read;
                registry.with_mut(&id, |item| {
                    if let InteractableState::Note { is_read, .. } = &mut item.state {
                        *is_read = true;
                    }
                });
                sink.emit(
                    EventName::NoteRead.as_str(),
                    payload([
                        ("id", json!(id.as_str())),
                        ("title", json!(title)),
                        ("content", json!(content)),
                        ("first_read", json!(first_read)),
                    ]),
                );
                Ok(Interaction::NoteRead { id, first_read })
            }

            InteractableState::Key { key_id, display_name } => {
                sink.emit(
                    EventName::KeyCollected.as_str(),
                    payload([("id", json!(key_id)), ("name", json!(display_name))]),
                );
                self.inventory.add(KeyItem {
                    key_id: key_id.clone(),
                    display_name: display_name.clone(),
                });
                registry.consume(&id);
                bridge.dispose(&id);
                self.current = None;
                Ok(Interaction::KeyCollected {
                    id,
                    key_id: key_id.clone(),
                })
            }

            InteractableState::Switch { is_on, controls } => {
                let is_on = !*is_on;
                registry.with_mut(&id, |item| {
                    if let InteractableState::Switch { is_on: on, .. } = &mut item.state {
                        *on = is_on;
                    }
                });
                sink.emit(
                    EventName::SwitchToggled.as_str(),
                    payload([
                        ("id", json!(id.as_str())),
                        ("is_on", json!(is_on)),
                        ("controls", json!(controls)),
                    ]),
                );
                Ok(Interaction::SwitchToggled { id, is_on })
            }

            InteractableState::Generator { is_running: true, .. } => Err(InteractionDenied::AlreadyRunning { id }),

            InteractableState::Generator { powers, .. } => {
                registry.with_mut(&id, |item| {
                    if let InteractableState::Generator { is_running, .. } = &mut item.state {
                        *is_running = true;
                    }
                });
                sink.emit(
                    EventName::GeneratorStarted.as_str(),
                    payload([("id", json!(id.as_str())), ("powers", json!(powers))]),
                );
                Ok(Interaction::GeneratorStarted { id })
            }
        }
    }

    pub fn target_kind(&self, registry: &InteractableRegistry) -> Option<InteractableKind> {
        let id = self.current.as_ref()?;
        registry.get(id).map(|item| item.kind())
    }
}
