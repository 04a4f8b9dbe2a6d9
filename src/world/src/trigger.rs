// src/world/src/trigger.rs
use crate::Payload;
use crate::math::Vec3;
use bincode::{Decode, Encode};
use error::GameError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 触发器标识（在一个已加载区域内唯一）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode)]
#[serde(transparent)]
pub struct TriggerId(pub String);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 可重复触发器的重新触发策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    /// 每次进入区域只触发一次，玩家完全离开半径后才重新武装
    #[default]
    Edge,
    /// 玩家停留在区域内的每一帧都触发
    Continuous,
}

/// 区域数据中的触发器描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub center: Vec3,
    pub radius: f32,
    pub event: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub repeatable: bool,
}

impl TriggerSpec {
    pub fn new(center: Vec3, radius: f32, event: impl Into<String>, payload: Payload) -> Self {
        TriggerSpec {
            id: None,
            center,
            radius,
            event: event.into(),
            payload,
            repeatable: false,
        }
    }

    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// 一个已注册的空间触发器
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    id: TriggerId,
    center: Vec3,
    radius: f32,
    event_name: String,
    payload: Payload,
    armed: bool,
    repeatable: bool,
}

impl Trigger {
    /// 创建一个新的已武装触发器，半径必须为正
    pub fn new(
        id: TriggerId,
        center: Vec3,
        radius: f32,
        event_name: impl Into<String>,
        payload: Payload,
        repeatable: bool,
    ) -> Result<Self, GameError> {
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(GameError::area_data(
                id.0.clone(),
                format!("trigger radius must be positive, got {}", radius),
            ));
        }
        Ok(Trigger {
            id,
            center,
            radius,
            event_name: event_name.into(),
            payload,
            armed: true,
            repeatable,
        })
    }

    pub fn id(&self) -> &TriggerId {
        &self.id
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    /// 玩家位置是否在触发半径内（边界包含在内）
    pub fn contains(&self, point: Vec3) -> bool {
        point.distance(self.center) <= self.radius
    }

    /// 永久解除（一次性触发器在触发后调用）
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

/// 一次触发的结果，由调用方发布到事件总线
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFiring {
    pub trigger: TriggerId,
    pub event_name: String,
    pub payload: Payload,
}

/// 存档用的触发器状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TriggerRecord {
    pub id: TriggerId,
    pub armed: bool,
}

/// 每个已加载区域的触发器集合
#[derive(Debug, Default)]
pub struct TriggerSystem {
    triggers: Vec<Trigger>,
    mode: RepeatMode,
}

impl TriggerSystem {
    pub fn new(mode: RepeatMode) -> Self {
        TriggerSystem {
            triggers: Vec::new(),
            mode,
        }
    }

    /// 从区域描述构建触发器集合；未显式命名的触发器按 `区域:trigger:序号` 命名
    pub fn from_specs(area: &str, specs: &[TriggerSpec], mode: RepeatMode) -> Result<Self, GameError> {
        let mut system = TriggerSystem::new(mode);
        for (index, spec) in specs.iter().enumerate() {
            let id = spec
                .id
                .clone()
                .unwrap_or_else(|| format!("{}:trigger:{}", area, index));
            let trigger = Trigger::new(
                TriggerId(id),
                spec.center,
                spec.radius,
                spec.event.clone(),
                spec.payload.clone(),
                spec.repeatable,
            )
            .map_err(|e| match e {
                GameError::InvalidAreaData { reason, .. } => GameError::area_data(area, reason),
                other => other,
            })?;
            system.register(trigger).map_err(|e| match e {
                GameError::InvalidAreaData { reason, .. } => GameError::area_data(area, reason),
                other => other,
            })?;
        }
        Ok(system)
    }

    /// 注册触发器（按注册顺序评估）
    pub fn register(&mut self, trigger: Trigger) -> Result<(), GameError> {
        if self.triggers.iter().any(|t| t.id == trigger.id) {
            return Err(GameError::area_data(
                trigger.id.0.clone(),
                format!("duplicate trigger id '{}'", trigger.id),
            ));
        }
        self.triggers.push(trigger);
        Ok(())
    }

    /// 每帧调用一次：返回本帧触发的事件，顺序与注册顺序一致
    pub fn evaluate(&mut self, player: Vec3) -> Vec<TriggerFiring> {
        let mode = self.mode;
        let mut fired = Vec::new();

        for trigger in &mut self.triggers {
            let inside = trigger.contains(player);

            if !trigger.repeatable {
                if trigger.armed && inside {
                    trigger.armed = false;
                    fired.push(Self::firing(trigger));
                }
                continue;
            }

            match mode {
                RepeatMode::Edge => {
                    if inside && trigger.armed {
                        trigger.armed = false;
                        fired.push(Self::firing(trigger));
                    } else if !inside && !trigger.armed {
                        trigger.armed = true;
                    }
                }
                RepeatMode::Continuous => {
                    if inside && trigger.armed {
                        fired.push(Self::firing(trigger));
                    }
                }
            }
        }

        for firing in &fired {
            tracing::trace!(trigger = %firing.trigger, event = %firing.event_name, "trigger fired");
        }
        fired
    }

    fn firing(trigger: &Trigger) -> TriggerFiring {
        TriggerFiring {
            trigger: trigger.id.clone(),
            event_name: trigger.event_name.clone(),
            payload: trigger.payload.clone(),
        }
    }

    pub fn get(&self, id: &TriggerId) -> Option<&Trigger> {
        self.triggers.iter().find(|t| &t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn armed_count(&self) -> usize {
        self.triggers.iter().filter(|t| t.armed).count()
    }

    pub fn mode(&self) -> RepeatMode {
        self.mode
    }

    pub fn records(&self) -> Vec<TriggerRecord> {
        self.triggers
            .iter()
            .map(|t| TriggerRecord {
                id: t.id.clone(),
                armed: t.armed,
            })
            .collect()
    }

    /// 恢复存档中的武装状态；存档中不存在的触发器保持原状
    pub fn restore(&mut self, records: &[TriggerRecord]) {
        for record in records {
            match self.triggers.iter_mut().find(|t| t.id == record.id) {
                Some(trigger) => trigger.armed = record.armed,
                None => tracing::warn!(trigger = %record.id, "saved trigger not present in area, skipping"),
            }
        }
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(area: &str) -> Payload {
        let mut map = Payload::new();
        map.insert("area".to_string(), json!(area));
        map
    }

    fn one_shot(system: &mut TriggerSystem, id: &str, center: Vec3, radius: f32) {
        system
            .register(Trigger::new(TriggerId(id.into()), center, radius, "area_entered", payload(id), false).unwrap())
            .unwrap();
    }

    #[test]
    fn rejects_non_positive_radius() {
        assert!(Trigger::new(TriggerId("t".into()), Vec3::ZERO, 0.0, "e", Payload::new(), false).is_err());
        assert!(Trigger::new(TriggerId("t".into()), Vec3::ZERO, -1.0, "e", Payload::new(), false).is_err());
        assert!(Trigger::new(TriggerId("t".into()), Vec3::ZERO, f32::NAN, "e", Payload::new(), false).is_err());
    }

    #[test]
    fn boundary_counts_as_inside() {
        let trigger = Trigger::new(TriggerId("t".into()), Vec3::ZERO, 2.0, "e", Payload::new(), false).unwrap();
        assert!(trigger.contains(Vec3::new(2.0, 0.0, 0.0)));
        assert!(!trigger.contains(Vec3::new(2.01, 0.0, 0.0)));
    }

    #[test]
    fn one_shot_fires_once_even_after_reentry() {
        let mut system = TriggerSystem::new(RepeatMode::Edge);
        one_shot(&mut system, "hall", Vec3::ZERO, 2.0);

        let inside = Vec3::new(0.5, 0.0, 0.0);
        let outside = Vec3::new(10.0, 0.0, 0.0);

        assert_eq!(system.evaluate(inside).len(), 1);
        for _ in 0..5 {
            assert!(system.evaluate(inside).is_empty());
        }
        assert!(system.evaluate(outside).is_empty());
        assert!(system.evaluate(inside).is_empty());
        assert!(!system.get(&TriggerId("hall".into())).unwrap().is_armed());
    }

    #[test]
    fn overlapping_triggers_fire_in_registration_order() {
        let mut system = TriggerSystem::new(RepeatMode::Edge);
        one_shot(&mut system, "second_registered_first", Vec3::new(1.0, 0.0, 0.0), 3.0);
        one_shot(&mut system, "first_registered_second", Vec3::ZERO, 3.0);

        let fired = system.evaluate(Vec3::new(0.5, 0.0, 0.0));
        let ids: Vec<_> = fired.iter().map(|f| f.trigger.0.as_str()).collect();
        assert_eq!(ids, vec!["second_registered_first", "first_registered_second"]);
    }

    #[test]
    fn edge_mode_rearms_only_after_exit() {
        let mut system = TriggerSystem::new(RepeatMode::Edge);
        system
            .register(Trigger::new(TriggerId("hum".into()), Vec3::ZERO, 1.0, "generator_proximity", Payload::new(), true).unwrap())
            .unwrap();

        let inside = Vec3::ZERO;
        let outside = Vec3::new(5.0, 0.0, 0.0);

        assert_eq!(system.evaluate(inside).len(), 1);
        assert!(system.evaluate(inside).is_empty());
        assert!(system.evaluate(outside).is_empty());
        assert_eq!(system.evaluate(inside).len(), 1);
    }

    #[test]
    fn continuous_mode_fires_every_resident_tick() {
        let mut system = TriggerSystem::new(RepeatMode::Continuous);
        system
            .register(Trigger::new(TriggerId("hum".into()), Vec3::ZERO, 1.0, "generator_proximity", Payload::new(), true).unwrap())
            .unwrap();

        let total: usize = (0..4).map(|_| system.evaluate(Vec3::ZERO).len()).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn unnamed_specs_get_area_scoped_ids() {
        let specs = vec![
            TriggerSpec::new(Vec3::ZERO, 2.0, "area_entered", payload("entrance")),
            TriggerSpec::new(Vec3::new(0.0, 0.0, 8.0), 2.0, "approaching_corridor", Payload::new()).with_id("approach"),
        ];
        let system = TriggerSystem::from_specs("asylum_entrance", &specs, RepeatMode::Edge).unwrap();
        let ids: Vec<_> = system.iter().map(|t| t.id().0.clone()).collect();
        assert_eq!(ids, vec!["asylum_entrance:trigger:0".to_string(), "approach".to_string()]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let specs = vec![
            TriggerSpec::new(Vec3::ZERO, 2.0, "a", Payload::new()).with_id("dup"),
            TriggerSpec::new(Vec3::ZERO, 2.0, "b", Payload::new()).with_id("dup"),
        ];
        let err = TriggerSystem::from_specs("basement", &specs, RepeatMode::Edge).unwrap_err();
        assert!(matches!(err, GameError::InvalidAreaData { ref area, .. } if area == "basement"));
    }

    #[test]
    fn records_restore_armed_flags() {
        let mut system = TriggerSystem::new(RepeatMode::Edge);
        one_shot(&mut system, "a", Vec3::ZERO, 1.0);
        one_shot(&mut system, "b", Vec3::new(10.0, 0.0, 0.0), 1.0);
        system.evaluate(Vec3::ZERO);

        let records = system.records();
        let mut fresh = TriggerSystem::new(RepeatMode::Edge);
        one_shot(&mut fresh, "a", Vec3::ZERO, 1.0);
        one_shot(&mut fresh, "b", Vec3::new(10.0, 0.0, 0.0), 1.0);
        fresh.restore(&records);

        assert_eq!(fresh.records(), records);
        assert!(fresh.evaluate(Vec3::ZERO).is_empty());
    }
}
