//! 第一人称恐怖探索游戏的叙事编排核心
//!
//! 本 crate 决定"发生什么"以及"何时发生"：空间触发器和交互解析器产生玩法事件，
//! [`narrative::Narrative`] 协调器把它们折叠进 [`state::GameState`] 并推导剧情节点，
//! 音频、灯光和 UI 通过事件总线监听。

pub mod config;
pub mod event_bus;
pub mod game;
pub mod interaction;
pub mod logging;
pub mod narrative;
pub mod scheduler;
pub mod state;
pub mod story;

pub use config::EngineConfig;
pub use event_bus::{DispatchContext, Event, EventHandler, EventName, EventSink, Payload, SubscriptionHandle};
pub use game::Game;
pub use interaction::{Interaction, InteractionDenied, PlayerPose, RenderBridge, SphereCaster};
pub use narrative::Narrative;
pub use state::{GameState, GameStatePatch};
pub use story::{StoryAction, StoryBeat};
