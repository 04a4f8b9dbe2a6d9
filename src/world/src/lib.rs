//! 世界数据：区域目录、空间触发器与可交互物体注册表
//!
//! 本 crate 只负责"世界里有什么"以及它们的状态变化，不直接发布事件：
//! 触发器评估返回触发结果，由上层的叙事总线负责发布。

pub mod area;
pub mod interactable;
pub mod math;
pub mod trigger;

pub use area::{AreaCatalog, AreaDefinition};
pub use interactable::{
    Candidate, Interactable, InteractableId, InteractableKind, InteractableRecord, InteractableRegistry,
    InteractableSpec, InteractableState,
};
pub use math::{Vec3, ray_sphere_distance};
pub use trigger::{RepeatMode, Trigger, TriggerFiring, TriggerId, TriggerRecord, TriggerSpec, TriggerSystem};

/// 事件负载：字符串键到任意 JSON 值的映射
pub type Payload = serde_json::Map<String, serde_json::Value>;
