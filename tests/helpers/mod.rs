//! Shared fixtures for the integration tests: a recording subscriber, a
//! bridge whose ray always hits what the test says, and game builders.

#![allow(dead_code)]

use nightward::config::PursuitConfig;
use nightward::event_bus::{DispatchContext, Event, EventHandler, Payload};
use nightward::interaction::{PickHit, PlayerPose, RenderBridge};
use nightward::{EngineConfig, Game};
use std::cell::RefCell;
use std::rc::Rc;
use world::{InteractableId, Vec3};

/// Subscribes to every event and keeps a copy of each, in dispatch order.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Rc<RefCell<Vec<Event>>>,
}

struct RecordingHandler {
    events: Rc<RefCell<Vec<Event>>>,
}

impl EventHandler for RecordingHandler {
    fn handle(&mut self, event: &Event, _ctx: &mut DispatchContext) -> anyhow::Result<()> {
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

impl Recorder {
    pub fn attach(game: &mut Game) -> Self {
        let recorder = Recorder::default();
        game.subscribe_all(Box::new(RecordingHandler {
            events: Rc::clone(&recorder.events),
        }));
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.borrow().iter().map(|e| e.name.clone()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.borrow().iter().filter(|e| e.name == name).count()
    }

    /// `type` of every `story_trigger` seen so far.
    pub fn beats(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.name == "story_trigger")
            .filter_map(|e| e.str_field("type").map(String::from))
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

/// Ray queries answer with whatever the test aimed at; occlusion is the test's call.
#[derive(Debug, Default)]
pub struct ScriptedBridge {
    pub aimed: Option<InteractableId>,
    pub disposed: Vec<InteractableId>,
}

impl ScriptedBridge {
    pub fn aim(&mut self, id: &str) {
        self.aimed = Some(InteractableId::new(id));
    }

    pub fn look_away(&mut self) {
        self.aimed = None;
    }
}

impl RenderBridge for ScriptedBridge {
    fn pick(&self, _origin: Vec3, _direction: Vec3) -> PickHit {
        PickHit {
            hit: self.aimed.is_some(),
            target: self.aimed.clone(),
        }
    }

    fn dispose(&mut self, id: &InteractableId) {
        self.disposed.push(id.clone());
    }
}

/// Stock config without the pursuit, so encounter counts stay predictable.
pub fn quiet_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.story.pursuit = PursuitConfig {
        enabled: false,
        ..PursuitConfig::default()
    };
    config
}

/// Game in `area` with a recorder attached before the area loads.
pub fn game_in(area: &str, config: EngineConfig) -> (Game, Recorder) {
    let mut game = Game::new(config).expect("builtin catalog");
    let recorder = Recorder::attach(&mut game);
    game.start().expect("start area loads");
    if game.loaded_area() != Some(area) {
        game.load_area(area).expect("area exists");
    }
    (game, recorder)
}

pub fn standing_at(x: f32, y: f32, z: f32) -> PlayerPose {
    PlayerPose::new(Vec3::new(x, y, z), Vec3::FORWARD)
}

pub fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}
