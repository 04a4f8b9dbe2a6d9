//! 游戏编排：区域加载、每帧推进、交互入口、存读档
//!
//! `Game` 把两个事件生产者（触发器系统、交互解析器）接到叙事协调器上。
//! 外部子系统只通过订阅事件和只读访问器与它交互。

use crate::config::EngineConfig;
use crate::event_bus::{DispatchContext, Event, EventHandler, EventName, Payload, SubscriptionHandle};
use crate::interaction::{Interaction, InteractionDenied, InteractionResolver, Inventory, KeyItem, PlayerPose, RenderBridge};
use crate::narrative::Narrative;
use crate::state::GameState;
use error::GameError;
use save::{SAVE_VERSION, SaveData, SaveMetadata};
use serde_json::json;
use std::time::SystemTime;
use world::{
    AreaCatalog, AreaDefinition, Interactable, InteractableId, InteractableRegistry, InteractableState, TriggerSystem, Vec3,
};

pub struct Game {
    config: EngineConfig,
    catalog: AreaCatalog,
    narrative: Narrative,
    triggers: TriggerSystem,
    registry: InteractableRegistry,
    resolver: InteractionResolver,
    loaded_area: Option<String>,
    /// 追逐封锁生效的区域
    lockdown_area: Option<String>,
    pose: PlayerPose,
}

impl Game {
    /// 使用配置里的区域目录（`areas_file`，否则内置目录）创建游戏；不会自动加载区域
    pub fn new(config: EngineConfig) -> Result<Self, GameError> {
        let catalog = match &config.areas_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                AreaCatalog::from_json(&text)?
            }
            None => AreaCatalog::builtin(),
        };
        Self::with_catalog(config, catalog)
    }

    pub fn with_catalog(config: EngineConfig, catalog: AreaCatalog) -> Result<Self, GameError> {
        if !catalog.contains(&config.start_area) {
            return Err(GameError::InvalidAreaReference(config.start_area.clone()));
        }

        let mode = config.triggers.repeat_mode;
        Ok(Game {
            narrative: Narrative::new(&config),
            triggers: TriggerSystem::new(mode),
            registry: InteractableRegistry::new(),
            resolver: InteractionResolver::new(config.interaction.range),
            loaded_area: None,
            lockdown_area: None,
            pose: PlayerPose::default(),
            catalog,
            config,
        })
    }

    /// 加载起始区域（订阅者注册完之后调用，才能收到 `scene_loaded`）
    pub fn start(&mut self) -> Result<(), GameError> {
        let start = self.config.start_area.clone();
        self.load_area(&start)
    }

    // ========== 区域 ==========

    /// 拆掉当前区域（触发器、物体、待执行的剧情任务），实例化新区域
    ///
    /// 区域 id 未知或区域数据无效时返回错误，当前区域保持不变。
    pub fn load_area(&mut self, area_id: &str) -> Result<(), GameError> {
        let area = self
            .catalog
            .get(area_id)
            .cloned()
            .ok_or_else(|| GameError::InvalidAreaReference(area_id.to_string()))?;
        let (triggers, registry) = self.instantiate(&area)?;

        let cancelled = self.narrative.story_mut().cancel_all();
        self.triggers = triggers;
        self.registry = registry;
        self.resolver.clear_target();
        self.loaded_area = Some(area.id.clone());
        self.pose = PlayerPose::new(area.player_start, Vec3::FORWARD);
        self.narrative.story_mut().observe_player(area.player_start);

        tracing::info!(
            area = %area.id,
            interactables = self.registry.len(),
            triggers = self.triggers.len(),
            cancelled,
            "area loaded"
        );
        self.emit_scene_loaded(&area, false);
        self.sync_lockdown();
        Ok(())
    }

    fn instantiate(&self, area: &AreaDefinition) -> Result<(TriggerSystem, InteractableRegistry), GameError> {
        area.validate()?;
        let triggers = TriggerSystem::from_specs(&area.id, &area.triggers, self.config.triggers.repeat_mode)?;
        let registry = InteractableRegistry::from_specs(&area.id, &area.interactables)?;
        Ok((triggers, registry))
    }

    fn emit_scene_loaded(&mut self, area: &AreaDefinition, restored: bool) {
        let mut payload = Payload::new();
        payload.insert("area".into(), json!(area.id));
        payload.insert("data".into(), serde_json::Value::Object(area.scene_data()));
        if restored {
            payload.insert("restored".into(), json!(true));
        }
        self.narrative.emit(EventName::SceneLoaded.as_str(), payload);
    }

    /// 追逐封锁：追逐开始时所在区域的门全部封住，供电恢复后解封
    ///
    /// 封锁期间离开再回来，这个区域的门重新封住；其他区域不受影响。
    fn sync_lockdown(&mut self) {
        let active = self.narrative.story().lockdown_active();
        if !active {
            self.lockdown_area = None;
        } else if self.lockdown_area.is_none() {
            self.lockdown_area = self.loaded_area.clone();
        }
        let seal = active && self.lockdown_area.is_some() && self.lockdown_area == self.loaded_area;

        let doors: Vec<InteractableId> = self
            .registry
            .iter_ordered()
            .into_iter()
            .filter(|item| matches!(item.state, InteractableState::Door { sealed, .. } if sealed != seal))
            .map(|item| item.id)
            .collect();
        if doors.is_empty() {
            return;
        }
        for id in &doors {
            self.registry.with_mut(id, |item| {
                if let InteractableState::Door { sealed, .. } = &mut item.state {
                    *sealed = seal;
                }
            });
        }

        let area = self.loaded_area.clone().unwrap_or_default();
        tracing::info!(area = %area, doors = doors.len(), sealed = seal, "area lockdown changed");
        let name = if seal { EventName::AreaLocked } else { EventName::AreaUnlocked };
        let mut payload = Payload::new();
        payload.insert("area".into(), json!(area));
        payload.insert("doors".into(), json!(doors.iter().map(|id| id.as_str()).collect::<Vec<_>>()));
        self.narrative.emit(name.as_str(), payload);
    }

    // ========== 每帧 ==========

    /// 推进一帧：剧情定时器 → 空间触发器 → 当前交互目标
    pub fn tick(&mut self, dt_ms: u64, pose: PlayerPose, bridge: &dyn RenderBridge) {
        self.pose = pose;
        self.narrative.story_mut().observe_player(pose.position);

        self.narrative.advance(dt_ms);

        for firing in self.triggers.evaluate(pose.position) {
            self.narrative.emit(firing.event_name, firing.payload);
        }
        self.sync_lockdown();

        self.resolver.update(&self.registry, pose, bridge);
    }

    /// 玩家按下交互键
    pub fn try_interact(&mut self, bridge: &mut dyn RenderBridge) -> Result<Interaction, InteractionDenied> {
        let result = self
            .resolver
            .try_interact(&mut self.registry, bridge, &mut self.narrative);
        self.sync_lockdown();
        result
    }

    // ========== 订阅 ==========

    pub fn subscribe(&mut self, event_name: impl Into<String>, handler: Box<dyn EventHandler>) -> SubscriptionHandle {
        self.narrative.subscribe(event_name, handler)
    }

    pub fn subscribe_fn<F>(&mut self, event_name: impl Into<String>, name: &str, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&Event, &mut DispatchContext) -> anyhow::Result<()> + 'static,
    {
        self.narrative.subscribe_fn(event_name, name, callback)
    }

    pub fn subscribe_all(&mut self, handler: Box<dyn EventHandler>) -> SubscriptionHandle {
        self.narrative.subscribe_all(handler)
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        self.narrative.unsubscribe(handle)
    }

    /// 直接发布事件（调试工具、脚本）
    pub fn emit(&mut self, name: &str, payload: Payload) {
        self.narrative.emit(name, payload);
        self.sync_lockdown();
    }

    // ========== 只读访问 ==========

    pub fn state(&self) -> GameState {
        self.narrative.get_state()
    }

    pub fn inventory(&self) -> &Inventory {
        self.resolver.inventory()
    }

    pub fn interaction_prompt(&self) -> Option<&'static str> {
        self.resolver.prompt(&self.registry)
    }

    pub fn current_target(&self) -> Option<&InteractableId> {
        self.resolver.current()
    }

    pub fn loaded_area(&self) -> Option<&str> {
        self.loaded_area.as_deref()
    }

    pub fn player_start(&self) -> Option<Vec3> {
        let id = self.loaded_area.as_deref()?;
        self.catalog.get(id).map(|area| area.player_start)
    }

    pub fn pose(&self) -> PlayerPose {
        self.pose
    }

    pub fn interactables(&self) -> Vec<Interactable> {
        self.registry.iter_ordered()
    }

    pub fn interactable(&self, id: &str) -> Option<Interactable> {
        self.registry.get(&InteractableId::new(id))
    }

    pub fn triggers(&self) -> &TriggerSystem {
        &self.triggers
    }

    pub fn catalog(&self) -> &AreaCatalog {
        &self.catalog
    }

    pub fn narrative(&self) -> &Narrative {
        &self.narrative
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock_ms(&self) -> u64 {
        self.narrative.now()
    }

    // ========== 存读档 ==========

    pub fn snapshot(&self) -> Result<SaveData, GameError> {
        let area_id = self
            .loaded_area
            .clone()
            .ok_or_else(|| GameError::SaveError(anyhow::anyhow!("no area loaded")))?;
        let area_name = self
            .catalog
            .get(&area_id)
            .map(|area| area.name.clone())
            .unwrap_or_default();
        let clock_ms = self.narrative.now();

        Ok(SaveData {
            version: SAVE_VERSION,
            metadata: SaveMetadata {
                timestamp: SystemTime::now(),
                area_id: area_id.clone(),
                area_name,
                play_time: clock_ms as f64 / 1000.0,
            },
            loaded_area: area_id,
            progress: self.narrative.state().into(),
            inventory: self.resolver.inventory().entries(),
            interactables: self.registry.records(),
            triggers: self.triggers.records(),
            story: self.narrative.story().snapshot(),
            clock_ms,
            player_position: self.pose.position,
        })
    }

    /// 从存档恢复；之后的行为与存档时完全一致
    pub fn restore(&mut self, data: SaveData) -> Result<(), GameError> {
        let data = data.migrate()?;
        data.validate()?;

        let area = self
            .catalog
            .get(&data.loaded_area)
            .cloned()
            .ok_or_else(|| GameError::InvalidAreaReference(data.loaded_area.clone()))?;
        let (mut triggers, mut registry) = self.instantiate(&area)?;
        triggers.restore(&data.triggers);
        registry.restore(&data.interactables);

        self.narrative.reset();
        self.narrative.set_state(data.progress.into());
        self.narrative.story_mut().restore(&data.story, data.clock_ms);
        self.narrative.story_mut().observe_player(data.player_position);

        self.triggers = triggers;
        self.registry = registry;
        self.resolver.clear_target();
        self.resolver
            .set_inventory(data.inventory.into_iter().map(KeyItem::from).collect());
        self.loaded_area = Some(area.id.clone());
        self.lockdown_area = None;
        self.pose = PlayerPose::new(data.player_position, Vec3::FORWARD);

        tracing::info!(area = %area.id, clock_ms = data.clock_ms, "game restored");
        self.emit_scene_loaded(&area, true);
        self.sync_lockdown();
        Ok(())
    }

    /// 新游戏：取消定时器、清空背包、恢复初始状态并重新加载起始区域
    pub fn reset(&mut self) -> Result<(), GameError> {
        self.narrative.reset();
        self.resolver.reset();
        self.loaded_area = None;
        self.lockdown_area = None;
        tracing::info!("game reset");
        self.start()
    }
}

impl std::fmt::Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("loaded_area", &self.loaded_area)
            .field("narrative", &self.narrative)
            .field("registry", &self.registry)
            .field("triggers", &self.triggers.len())
            .finish()
    }
}
