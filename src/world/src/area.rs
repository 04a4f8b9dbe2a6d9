// src/world/src/area.rs
//! 区域静态数据，以及区域加载器使用的目录

use crate::Payload;
use crate::interactable::{InteractableSpec, InteractableState};
use crate::math::Vec3;
use crate::trigger::TriggerSpec;
use error::GameError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};

/// 一个手工编排的区域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaDefinition {
    pub id: String,
    pub name: String,
    pub player_start: Vec3,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub lighting: String,
    #[serde(default)]
    pub interactables: Vec<InteractableSpec>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
}

impl AreaDefinition {
    /// 加载前的完整校验，避免加载到一半才失败
    pub fn validate(&self) -> Result<(), GameError> {
        if self.id.is_empty() {
            return Err(GameError::area_data("<unnamed>", "area id must not be empty"));
        }

        let mut seen = HashSet::new();
        for spec in &self.interactables {
            if !seen.insert(spec.id.as_str()) {
                return Err(GameError::area_data(
                    &self.id,
                    format!("duplicate interactable id '{}'", spec.id),
                ));
            }
        }

        for (index, trigger) in self.triggers.iter().enumerate() {
            if !(trigger.radius > 0.0) {
                return Err(GameError::area_data(
                    &self.id,
                    format!("trigger #{} has non-positive radius {}", index, trigger.radius),
                ));
            }
            if trigger.event.is_empty() {
                return Err(GameError::area_data(&self.id, format!("trigger #{} has no event name", index)));
            }
        }

        Ok(())
    }

    /// `scene_loaded` 负载中的 `data` 部分
    pub fn scene_data(&self) -> Payload {
        let mut data = Payload::new();
        data.insert("name".into(), json!(self.name));
        data.insert("environment".into(), json!(self.environment));
        data.insert("lighting".into(), json!(self.lighting));
        data.insert(
            "player_start".into(),
            json!([self.player_start.x, self.player_start.y, self.player_start.z]),
        );
        data
    }
}

/// 加载器已知的全部区域，按 id 索引
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AreaCatalog {
    areas: BTreeMap<String, AreaDefinition>,
}

impl AreaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, area: AreaDefinition) -> Result<(), GameError> {
        area.validate()?;
        self.areas.insert(area.id.clone(), area);
        Ok(())
    }

    /// 从 JSON 数组解析区域定义
    pub fn from_json(json: &str) -> Result<Self, GameError> {
        let areas: Vec<AreaDefinition> =
            serde_json::from_str(json).map_err(|e| GameError::DeserializationError(e.to_string()))?;
        let mut catalog = AreaCatalog::new();
        for area in areas {
            catalog.insert(area)?;
        }
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&AreaDefinition> {
        self.areas.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.areas.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.areas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// 内置的疗养院：入口、走廊、限制区、地下室
    pub fn builtin() -> Self {
        let mut catalog = AreaCatalog::new();
        for area in [asylum_entrance(), main_corridor(), restricted_area(), basement()] {
            // 内置数据有测试覆盖，这里失败属于编程错误
            if let Err(e) = catalog.insert(area) {
                tracing::error!(error = %e, "builtin area failed validation");
            }
        }
        catalog
    }
}

fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn area_entered(center: Vec3, radius: f32, area: &str) -> TriggerSpec {
    TriggerSpec::new(center, radius, "area_entered", payload(&[("area", json!(area))]))
}

fn encounter(center: Vec3, radius: f32, intensity: u32) -> TriggerSpec {
    TriggerSpec::new(
        center,
        radius,
        "entity_encounter",
        payload(&[
            ("intensity", json!(intensity)),
            ("position", json!([center.x, center.y, center.z])),
        ]),
    )
}

fn note(id: &str, position: Vec3, title: &str, content: &str) -> InteractableSpec {
    InteractableSpec::new(
        id,
        position,
        InteractableState::Note {
            title: title.into(),
            content: content.into(),
            is_read: false,
        },
    )
}

fn door(id: &str, position: Vec3, required_key: Option<&str>, target_area: Option<&str>) -> InteractableSpec {
    InteractableSpec::new(
        id,
        position,
        InteractableState::Door {
            locked: required_key.is_some(),
            required_key: required_key.map(str::to_string),
            is_open: false,
            target_area: target_area.map(str::to_string),
            sealed: false,
        },
    )
}

fn key(id: &str, position: Vec3, key_id: &str, display_name: &str) -> InteractableSpec {
    InteractableSpec::new(
        id,
        position,
        InteractableState::Key {
            key_id: key_id.into(),
            display_name: display_name.into(),
        },
    )
}

fn asylum_entrance() -> AreaDefinition {
    AreaDefinition {
        id: "asylum_entrance".into(),
        name: "Asylum Entrance".into(),
        player_start: Vec3::new(0.0, 1.8, -5.0),
        environment: "entrance_hall".into(),
        lighting: "dim".into(),
        interactables: vec![
            note(
                "entrance_patient_log",
                Vec3::new(2.0, 1.0, 0.0),
                "Patient Log - Day 1",
                "The new treatment shows promise. Subjects report vivid hallucinations but remain docile. \
                 Dr. Hartwell believes we are close to a breakthrough in consciousness manipulation.",
            ),
            key("entrance_office_key", Vec3::new(-3.0, 1.0, 2.0), "office_key", "Office Key"),
            door("entrance_office_door", Vec3::new(0.0, 0.0, 10.0), Some("office_key"), Some("main_corridor")),
        ],
        triggers: vec![
            area_entered(Vec3::new(0.0, 0.0, 5.0), 2.0, "entrance"),
            TriggerSpec::new(Vec3::new(0.0, 0.0, 8.0), 2.0, "approaching_corridor", Payload::new()),
        ],
    }
}

fn main_corridor() -> AreaDefinition {
    AreaDefinition {
        id: "main_corridor".into(),
        name: "Main Corridor".into(),
        player_start: Vec3::new(0.0, 1.8, -8.0),
        environment: "long_corridor".into(),
        lighting: "flickering".into(),
        interactables: vec![
            note(
                "corridor_research_notes",
                Vec3::new(5.0, 1.0, 0.0),
                "Research Notes - Dr. Hartwell",
                "Day 47: The subjects have begun to change. Something is wrong. They speak of shadows that \
                 move independently, of whispers in empty rooms. I fear we have opened a door that should \
                 have remained closed.",
            ),
            InteractableSpec::new(
                "corridor_lights",
                Vec3::new(-4.0, 1.5, 3.0),
                InteractableState::Switch {
                    is_on: false,
                    controls: "lighting".into(),
                },
            ),
            door("corridor_restricted_door", Vec3::new(0.0, 0.0, 15.0), None, Some("restricted_area")),
        ],
        triggers: vec![
            encounter(Vec3::new(0.0, 0.0, 0.0), 3.0, 1),
            area_entered(Vec3::new(0.0, 0.0, 10.0), 2.0, "corridor"),
        ],
    }
}

fn restricted_area() -> AreaDefinition {
    AreaDefinition {
        id: "restricted_area".into(),
        name: "Restricted Research Wing".into(),
        player_start: Vec3::new(0.0, 1.8, -5.0),
        environment: "research_wing".into(),
        lighting: "emergency".into(),
        interactables: vec![
            note(
                "restricted_final_log",
                Vec3::new(3.0, 1.0, 5.0),
                "FINAL LOG - EVACUATION ORDER",
                "Day 73: IMMEDIATE EVACUATION ORDERED. The entity has manifested. It feeds on light, grows \
                 stronger in darkness. All personnel must evacuate immediately. May God forgive us for what \
                 we have unleashed.",
            ),
            InteractableSpec::new(
                "main_generator",
                Vec3::new(-5.0, 0.0, 8.0),
                InteractableState::Generator {
                    is_running: false,
                    powers: "exit_lighting".into(),
                },
            ),
            door("restricted_exit_door", Vec3::new(0.0, 0.0, 12.0), Some("exit_key"), Some("exit")),
            door("restricted_stairwell", Vec3::new(6.0, 0.0, 12.0), None, Some("basement")),
        ],
        triggers: vec![
            area_entered(Vec3::new(0.0, 0.0, 0.0), 5.0, "restricted"),
            encounter(Vec3::new(-2.0, 0.0, 6.0), 2.0, 3),
            TriggerSpec::new(Vec3::new(-5.0, 0.0, 8.0), 2.0, "generator_proximity", Payload::new()).repeatable(),
        ],
    }
}

fn basement() -> AreaDefinition {
    AreaDefinition {
        id: "basement".into(),
        name: "Basement".into(),
        player_start: Vec3::new(0.0, -2.2, 75.0),
        environment: "basement".into(),
        lighting: "minimal".into(),
        interactables: vec![
            key("basement_exit_key", Vec3::new(4.0, -3.0, 84.0), "exit_key", "Exit Key"),
            InteractableSpec::new(
                "basement_breaker",
                Vec3::new(-6.0, -2.5, 86.0),
                InteractableState::Switch {
                    is_on: false,
                    controls: "final_sequence".into(),
                },
            ),
            door("basement_stairwell", Vec3::new(0.0, -4.0, 73.0), None, Some("restricted_area")),
        ],
        triggers: vec![
            area_entered(Vec3::new(0.0, -4.0, 80.0), 3.0, "basement"),
            encounter(Vec3::new(0.0, -4.0, 85.0), 2.0, 3),
        ],
    }
}
