//! 无界面驱动：按脚本走完内置的疗养院
//!
//! 用法：`nightward [--continue] [config.toml]`

use anyhow::{Context, Result, bail};
use error::handle_error;
use nightward::event_bus::{DispatchContext, Event, EventHandler, EventName};
use nightward::interaction::{Interaction, PlayerPose, SphereCaster};
use nightward::{EngineConfig, Game, logging, simple_handler};
use save::{AutoSave, SaveSystem};
use std::time::Duration;
use world::Vec3;

/// 每帧的模拟时长
const FRAME_MS: u64 = 100;
/// 走一步的最大距离
const STRIDE: f32 = 1.0;
/// 交互时站在物体前多远
const REACH: f32 = 1.5;

simple_handler!(AudioCues, "audio_cues", |event: &Event, _ctx: &mut DispatchContext| {
    let cue = match event.known() {
        Some(EventName::DoorOpened) => "door_creak",
        Some(EventName::DoorUnlocked) => "lock_click",
        Some(EventName::KeyCollected) => "key_jingle",
        Some(EventName::NoteRead) => "paper_rustle",
        Some(EventName::SwitchToggled) => "switch_clack",
        Some(EventName::GeneratorStarted) => "generator_hum",
        Some(EventName::EntityEncounter) => "entity_screech",
        Some(EventName::StoryTrigger) => match event.str_field("type") {
            Some("entity_aggressive") | Some("chase_sequence") => "heartbeat_fast",
            _ => "ambient_sting",
        },
        Some(EventName::InteractionDenied) => "denied_buzz",
        Some(EventName::AreaLocked) => "bolts_slam",
        Some(EventName::AreaUnlocked) => "bolts_release",
        _ => return Ok(()),
    };
    tracing::info!(subsystem = "audio", cue, "play");
    Ok(())
});

/// 灯光系统：响应开关、供电和警报
struct LightingConsole {
    level: &'static str,
}

impl EventHandler for LightingConsole {
    fn handle(&mut self, event: &Event, _ctx: &mut DispatchContext) -> anyhow::Result<()> {
        let level = match event.known() {
            Some(EventName::SwitchToggled) if event.bool_field("is_on") == Some(true) => "lit",
            Some(EventName::SwitchToggled) => "dark",
            Some(EventName::PowerRestored) => "emergency_exit",
            Some(EventName::StoryTrigger) if event.str_field("type") == Some("chase_sequence") => "red_alarm",
            Some(EventName::SceneLoaded) => event
                .payload
                .get("data")
                .and_then(|d| d.get("lighting"))
                .and_then(|l| l.as_str())
                .map(|l| if l == "emergency" { "emergency" } else { "ambient" })
                .unwrap_or("ambient"),
            _ => return Ok(()),
        };
        if level != self.level {
            self.level = level;
            tracing::info!(subsystem = "lighting", level, "lighting changed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "lighting_console"
    }
}

/// HUD：区域名、笔记内容、剧情文本
struct UiConsole;

impl EventHandler for UiConsole {
    fn handle(&mut self, event: &Event, _ctx: &mut DispatchContext) -> anyhow::Result<()> {
        match event.known() {
            Some(EventName::SceneLoaded) => {
                let name = event
                    .payload
                    .get("data")
                    .and_then(|d| d.get("name"))
                    .and_then(|n| n.as_str())
                    .context("scene_loaded without area name")?;
                println!("\n== {} ==", name);
            }
            Some(EventName::NoteRead) => {
                let title = event.str_field("title").unwrap_or("(untitled)");
                let content = event.str_field("content").unwrap_or_default();
                println!("[note] {}\n       {}", title, content);
            }
            Some(EventName::StoryTrigger) => {
                if let Some(message) = event.str_field("message") {
                    println!(">> {}", message);
                }
            }
            Some(EventName::KeyCollected) => {
                println!("[inventory] + {}", event.str_field("name").unwrap_or("key"));
            }
            Some(EventName::InteractionDenied) => {
                println!("[hud] {}", event.str_field("reason").unwrap_or("denied"));
            }
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ui_console"
    }
}

/// 脚本化的玩家：走路、瞄准、交互
struct Walkthrough {
    game: Game,
    bridge: SphereCaster,
    escaped: bool,
}

impl Walkthrough {
    fn new(game: Game) -> Self {
        let bridge = SphereCaster::from_interactables(&game.interactables());
        Walkthrough {
            game,
            bridge,
            escaped: false,
        }
    }

    fn rebuild_bridge(&mut self) {
        self.bridge = SphereCaster::from_interactables(&self.game.interactables());
    }

    /// 直线走到目标点，每步一帧
    fn walk_to(&mut self, target: Vec3) {
        loop {
            let here = self.game.pose().position;
            let offset = target - here;
            let distance = offset.length();
            if distance <= f32::EPSILON {
                return;
            }
            let look = offset.normalized().unwrap_or(Vec3::FORWARD);
            if distance <= STRIDE {
                self.game.tick(FRAME_MS, PlayerPose::new(target, look), &self.bridge);
                return;
            }
            let step = offset * (STRIDE / distance);
            self.game.tick(FRAME_MS, PlayerPose::new(here + step, look), &self.bridge);
        }
    }

    fn wait(&mut self, ms: u64) {
        let pose = self.game.pose();
        for _ in 0..ms.div_ceil(FRAME_MS) {
            self.game.tick(FRAME_MS, pose, &self.bridge);
        }
    }

    /// 走到物体前面，看向它并按下交互键
    fn use_item(&mut self, id: &str) -> Result<Option<Interaction>> {
        let item = self
            .game
            .interactable(id)
            .with_context(|| format!("'{}' is not in the current area", id))?;

        let here = self.game.pose().position;
        let away = Vec3::new(here.x - item.position.x, 0.0, here.z - item.position.z)
            .normalized()
            .unwrap_or(Vec3::new(0.0, 0.0, -1.0));
        let mut stand = item.position + away * REACH;
        stand.y = here.y;

        self.walk_to(stand);
        self.game
            .tick(FRAME_MS, PlayerPose::looking_at(stand, item.position), &self.bridge);
        if let Some(prompt) = self.game.interaction_prompt() {
            tracing::debug!(id, prompt, "aiming");
        }

        match self.game.try_interact(&mut self.bridge) {
            Ok(interaction) => {
                self.follow_door(&interaction)?;
                Ok(Some(interaction))
            }
            Err(denied) => {
                tracing::info!(id, %denied, "interaction denied");
                Ok(None)
            }
        }
    }

    /// 打开的门通往别的区域时加载它
    fn follow_door(&mut self, interaction: &Interaction) -> Result<()> {
        let Interaction::DoorToggled {
            is_open: true,
            target_area: Some(target),
            ..
        } = interaction
        else {
            return Ok(());
        };

        if !self.game.catalog().contains(target) {
            tracing::info!(target = %target, "door leads outside the asylum");
            self.escaped = true;
            return Ok(());
        }
        self.game.load_area(target)?;
        self.rebuild_bridge();
        Ok(())
    }

    /// 交互直到门打开（上锁的门先解锁）
    fn go_through(&mut self, door: &str) -> Result<()> {
        for _ in 0..2 {
            if let Some(Interaction::DoorToggled { is_open: true, .. }) = self.use_item(door)? {
                return Ok(());
            }
        }
        bail!("could not get through '{}'", door)
    }

    fn run(&mut self) -> Result<()> {
        // 入口
        self.wait(500);
        self.walk_to(Vec3::new(0.0, 1.8, 5.0));
        self.use_item("entrance_patient_log")?;
        self.use_item("entrance_office_key")?;
        self.wait(2500);
        self.go_through("entrance_office_door")?;

        // 主走廊
        self.walk_to(Vec3::new(0.0, 1.8, 0.0));
        self.use_item("corridor_lights")?;
        self.use_item("corridor_research_notes")?;
        self.walk_to(Vec3::new(0.0, 1.8, 10.0));
        self.go_through("corridor_restricted_door")?;

        // 限制区
        self.walk_to(Vec3::new(0.0, 1.8, 0.0));
        self.use_item("restricted_final_log")?;
        self.use_item("restricted_exit_door")?;
        self.use_item("main_generator")?;
        self.wait(3500);
        self.go_through("restricted_stairwell")?;

        // 地下室
        self.walk_to(Vec3::new(0.0, -2.2, 80.0));
        self.use_item("basement_exit_key")?;
        self.use_item("basement_breaker")?;
        self.go_through("basement_stairwell")?;

        // 回到限制区，从出口离开
        self.go_through("restricted_exit_door")?;
        Ok(())
    }
}

fn main() -> Result<()> {
    let mut continue_saved = false;
    let mut config_path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--continue" => continue_saved = true,
            _ => config_path = Some(arg),
        }
    }

    let config = match &config_path {
        Some(path) => EngineConfig::load(path).with_context(|| format!("Failed to load config {}", path))?,
        None => EngineConfig::default(),
    };
    logging::init(&config.logging);

    let save_system = SaveSystem::new(&config.save.dir, config.save.max_slots)?;
    let mut auto_save = AutoSave::new(save_system, Duration::from_secs(config.save.autosave_interval_secs));

    let mut game = Game::new(config)?;
    game.subscribe_all(Box::new(AudioCues::new()));
    game.subscribe_all(Box::new(LightingConsole { level: "off" }));
    for name in [
        EventName::SceneLoaded,
        EventName::NoteRead,
        EventName::StoryTrigger,
        EventName::KeyCollected,
        EventName::InteractionDenied,
    ] {
        game.subscribe(name.as_str(), Box::new(UiConsole));
    }

    match auto_save.save_system.load_game(0) {
        Ok(data) if continue_saved => {
            println!("Continuing from {} ({:.0}s played)", data.metadata.area_name, data.metadata.play_time);
            if let Err(e) = game.restore(data) {
                eprintln!("{}", handle_error(&e));
                game.start()?;
            }
        }
        Err(e) if continue_saved => {
            eprintln!("{}", handle_error(&e));
            game.start()?;
        }
        _ => game.start()?,
    }

    let mut walkthrough = Walkthrough::new(game);
    let outcome = if continue_saved {
        // 读档后只让时间流逝，看剩下的剧情如何发展
        walkthrough.wait(10_000);
        Ok(())
    } else {
        walkthrough.run()
    };

    let game = &walkthrough.game;
    let state = game.state();
    match outcome {
        Err(e) => eprintln!("Walkthrough stopped: {:#}", e),
        Ok(()) if walkthrough.escaped => println!("\nYou step into the night air. You escaped."),
        Ok(()) => println!("\nThe asylum is quiet. For now."),
    }
    println!(
        "keys: {}  notes: {}  encounters: {}  power: {}  area: {}",
        state.keys_collected, state.notes_read, state.entity_encounters, state.power_restored, state.current_area
    );
    tracing::info!(
        events = game.narrative().events_emitted(),
        handler_failures = game.narrative().handler_failures(),
        clock_ms = game.clock_ms(),
        "session finished"
    );

    auto_save.force_save(&game.snapshot()?)?;
    println!("💾 Game saved to {}", auto_save.save_system.save_dir().display());
    Ok(())
}
