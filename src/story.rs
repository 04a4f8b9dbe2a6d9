//! 叙事推进引擎
//!
//! 在状态存储更新之后、外部处理器之前，对每个事件评估一次剧情规则，
//! 决定是否合成更高层的 `story_trigger` 事件。延迟的剧情节点作为可取消任务
//! 放进虚拟时钟调度器；切换区域或重置游戏时全部取消。

use crate::config::{BeatPolicy, PursuitConfig, StoryConfig};
use crate::event_bus::{Event, EventName, Payload};
use crate::scheduler::{Scheduler, TaskId};
use crate::state::GameState;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use save::{PendingTaskData, StoryData};
use serde_json::json;
use std::collections::BTreeSet;
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};
use world::Vec3;

/// 剧情节点（`story_trigger` 的 `type` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StoryBeat {
    EntityIntroduction,
    BackstoryReveal,
    PowerRestored,
    EntityAggressive,
    ChaseSequence,
}

impl StoryBeat {
    /// 屏幕上显示的叙事文本
    pub fn message(self) -> &'static str {
        match self {
            StoryBeat::EntityIntroduction => "You hear a faint whisper echoing through the halls...",
            StoryBeat::BackstoryReveal => "The experiments... they went too far...",
            StoryBeat::PowerRestored => "Emergency lighting activated. Exit route available.",
            StoryBeat::EntityAggressive => "It knows you're here. RUN.",
            StoryBeat::ChaseSequence => "UNAUTHORIZED ACCESS DETECTED",
        }
    }

    pub fn payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("type".into(), json!(self.as_ref()));
        payload.insert("message".into(), json!(self.message()));
        payload
    }
}

/// 延迟执行的剧情动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StoryAction {
    /// 第一把钥匙之后，实体现身
    EntityIntroduction,
    /// 发电机启动之后恢复供电
    PowerRestoration,
    /// 追逐中的下一次遭遇
    PursuitEncounter,
}

/// 追逐用的确定性 RNG
///
/// 只保存种子和已进行的掷骰次数，读档时从种子重放同样次数的掷骰即可恢复状态。
#[derive(Debug, Clone)]
pub struct PursuitRng {
    rng: Pcg32,
    seed: u64,
    rolls: u64,
}

/// 一次追逐掷骰的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PursuitRoll {
    pub interval_ms: u64,
    pub offset_x: f32,
    pub offset_z: f32,
}

impl PursuitRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Pcg32::seed_from_u64(seed),
            seed,
            rolls: 0,
        }
    }

    /// 恢复到"从 `seed` 开始已掷 `rolls` 次"的状态
    pub fn restore(seed: u64, rolls: u64, config: &PursuitConfig) -> Self {
        let mut rng = Self::new(seed);
        for _ in 0..rolls {
            rng.roll(config);
        }
        rng
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rolls(&self) -> u64 {
        self.rolls
    }

    pub fn roll(&mut self, config: &PursuitConfig) -> PursuitRoll {
        self.rolls += 1;
        let interval_ms = self.rng.random_range(config.min_interval_ms..=config.max_interval_ms);
        let half = config.spread.abs() / 2.0;
        let (offset_x, offset_z) = if half > 0.0 {
            (self.rng.random_range(-half..=half), self.rng.random_range(-half..=half))
        } else {
            (0.0, 0.0)
        };
        PursuitRoll {
            interval_ms,
            offset_x,
            offset_z,
        }
    }
}

/// 需要发布的事件（名称、负载）
pub type Emission = (String, Payload);

fn story_trigger(beat: StoryBeat) -> Emission {
    (EventName::StoryTrigger.as_str().to_string(), beat.payload())
}

pub struct StoryEngine {
    config: StoryConfig,
    fired: BTreeSet<StoryBeat>,
    scheduler: Scheduler<StoryAction>,
    pursuit_task: Option<TaskId>,
    rng: PursuitRng,
    last_player_position: Vec3,
}

impl StoryEngine {
    pub fn new(config: StoryConfig) -> Self {
        let rng = PursuitRng::new(config.pursuit.seed);
        StoryEngine {
            config,
            fired: BTreeSet::new(),
            scheduler: Scheduler::new(),
            pursuit_task: None,
            rng,
            last_player_position: Vec3::ZERO,
        }
    }

    /// 对一个已经应用到状态上的事件评估剧情规则
    ///
    /// 返回需要立即发布的剧情节点；有延迟的节点进入调度器。
    pub fn evaluate(&mut self, event: &Event, state: &GameState) -> Vec<Emission> {
        let mut immediate = Vec::new();
        let Some(name) = event.known() else {
            return immediate;
        };

        match name {
            EventName::KeyCollected if state.keys_collected >= 1 => {
                let delay = self.config.entity_introduction_delay_ms;
                self.run_once_after(StoryBeat::EntityIntroduction, delay, StoryAction::EntityIntroduction, &mut immediate);
            }
            EventName::NoteRead if state.notes_read == 1 => {
                if self.mark_fired(StoryBeat::BackstoryReveal) {
                    self.beat_now(StoryBeat::BackstoryReveal, event, &mut immediate);
                }
            }
            EventName::GeneratorStarted => {
                let delay = self.config.power_restoration_delay_ms;
                self.run_once_after(StoryBeat::PowerRestored, delay, StoryAction::PowerRestoration, &mut immediate);
            }
            EventName::EntityEncounter if state.entity_encounters >= self.config.aggressive_threshold => {
                let first = self.mark_fired(StoryBeat::EntityAggressive);
                if first || self.config.aggressive_policy == BeatPolicy::Repeat {
                    self.beat_now(StoryBeat::EntityAggressive, event, &mut immediate);
                }
            }
            EventName::AreaEntered => match event.str_field("area") {
                Some("restricted") => {
                    if self.mark_fired(StoryBeat::ChaseSequence) {
                        self.beat_now(StoryBeat::ChaseSequence, event, &mut immediate);
                        self.start_pursuit();
                    }
                }
                Some("basement") => self.start_pursuit(),
                _ => {}
            },
            _ => {}
        }

        immediate
    }

    fn beat_now(&self, beat: StoryBeat, cause: &Event, immediate: &mut Vec<Emission>) {
        tracing::info!(%beat, cause = %cause.name, "story beat");
        immediate.push(story_trigger(beat));
    }

    fn mark_fired(&mut self, beat: StoryBeat) -> bool {
        self.fired.insert(beat)
    }

    /// 延迟节点只在真正执行时记为已触发；排队中的同一动作不会重复排队
    fn run_once_after(&mut self, beat: StoryBeat, delay_ms: u64, action: StoryAction, immediate: &mut Vec<Emission>) {
        if self.has_fired(beat) || self.is_pending(action) {
            return;
        }
        self.run_after(delay_ms, action, immediate);
    }

    fn is_pending(&self, action: StoryAction) -> bool {
        self.scheduler.pending().iter().any(|task| *task.task == action)
    }

    fn run_after(&mut self, delay_ms: u64, action: StoryAction, immediate: &mut Vec<Emission>) {
        if delay_ms == 0 {
            immediate.extend(self.run(action));
        } else {
            let id = self.scheduler.schedule(delay_ms, action);
            tracing::debug!(%action, delay_ms, task = %id, "story action scheduled");
        }
    }

    /// 执行一个到期的动作，返回要发布的事件
    pub fn run(&mut self, action: StoryAction) -> Vec<Emission> {
        match action {
            StoryAction::EntityIntroduction => {
                self.mark_fired(StoryBeat::EntityIntroduction);
                tracing::info!(beat = %StoryBeat::EntityIntroduction, "story beat");
                vec![story_trigger(StoryBeat::EntityIntroduction)]
            }
            StoryAction::PowerRestoration => {
                self.mark_fired(StoryBeat::PowerRestored);
                tracing::info!(beat = %StoryBeat::PowerRestored, "story beat");
                vec![
                    (EventName::PowerRestored.as_str().to_string(), Payload::new()),
                    story_trigger(StoryBeat::PowerRestored),
                ]
            }
            StoryAction::PursuitEncounter => {
                self.pursuit_task = None;
                let roll = self.schedule_pursuit();
                let origin = self.last_player_position;
                let position = Vec3::new(origin.x + roll.offset_x, origin.y, origin.z + roll.offset_z);

                let mut payload = Payload::new();
                payload.insert("intensity".into(), json!(self.config.pursuit.intensity));
                payload.insert("position".into(), json!([position.x, position.y, position.z]));
                payload.insert("source".into(), json!("pursuit"));
                vec![(EventName::EntityEncounter.as_str().to_string(), payload)]
            }
        }
    }

    /// 开始追逐（已在追逐或被配置禁用时不做任何事）
    pub fn start_pursuit(&mut self) {
        if !self.config.pursuit.enabled || self.pursuit_task.is_some() {
            return;
        }
        tracing::info!("entity pursuit started");
        self.schedule_pursuit();
    }

    fn schedule_pursuit(&mut self) -> PursuitRoll {
        let roll = self.rng.roll(&self.config.pursuit);
        self.pursuit_task = Some(self.scheduler.schedule(roll.interval_ms, StoryAction::PursuitEncounter));
        roll
    }

    pub fn stop_pursuit(&mut self) {
        if let Some(task) = self.pursuit_task.take() {
            self.scheduler.cancel(task);
            tracing::info!("entity pursuit stopped");
        }
    }

    pub fn pursuit_active(&self) -> bool {
        self.pursuit_task.is_some()
    }

    /// 记录玩家位置（追逐遭遇会出现在附近）
    pub fn observe_player(&mut self, position: Vec3) {
        self.last_player_position = position;
    }

    // ========== 时钟 ==========

    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// 取出下一个在 `until_ms` 前到期的动作
    pub fn pop_due(&mut self, until_ms: u64) -> Option<StoryAction> {
        self.scheduler.pop_due(until_ms).map(|(_, action)| action)
    }

    pub fn set_clock(&mut self, now_ms: u64) {
        self.scheduler.set_clock(now_ms);
    }

    /// 取消所有待执行的动作（包括追逐）
    ///
    /// 被取消的延迟节点没有执行过，之后同样的事件会重新排队。
    pub fn cancel_all(&mut self) -> usize {
        self.pursuit_task = None;
        let cancelled = self.scheduler.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "pending story actions cancelled");
        }
        cancelled
    }

    pub fn pending_actions(&self) -> Vec<(StoryAction, u64)> {
        let now = self.scheduler.now();
        self.scheduler
            .pending()
            .into_iter()
            .map(|task| (*task.task, task.due_ms.saturating_sub(now)))
            .collect()
    }

    /// 追逐开始后封锁区域内的门，直到供电恢复
    pub fn lockdown_active(&self) -> bool {
        self.has_fired(StoryBeat::ChaseSequence) && !self.has_fired(StoryBeat::PowerRestored)
    }

    pub fn has_fired(&self, beat: StoryBeat) -> bool {
        self.fired.contains(&beat)
    }

    pub fn fired_beats(&self) -> impl Iterator<Item = StoryBeat> + '_ {
        self.fired.iter().copied()
    }

    /// 新游戏：清空已触发节点、取消任务、重置 RNG
    pub fn reset(&mut self) {
        self.cancel_all();
        self.fired.clear();
        self.rng = PursuitRng::new(self.config.pursuit.seed);
    }

    // ========== 存档 ==========

    pub fn snapshot(&self) -> StoryData {
        StoryData {
            fired_beats: self.fired.iter().map(|b| b.to_string()).collect(),
            pending: self
                .pending_actions()
                .into_iter()
                .map(|(action, due_in_ms)| PendingTaskData {
                    action: action.to_string(),
                    due_in_ms,
                })
                .collect(),
            pursuit_active: self.pursuit_active(),
            rng_seed: self.rng.seed(),
            rng_draws: self.rng.rolls(),
        }
    }

    /// 恢复存档中的剧情状态，时钟回到存档时刻
    pub fn restore(&mut self, data: &StoryData, clock_ms: u64) {
        self.pursuit_task = None;
        self.scheduler.reset_clock(clock_ms);

        self.fired.clear();
        for name in &data.fired_beats {
            match StoryBeat::from_str(name) {
                Ok(beat) => {
                    self.fired.insert(beat);
                }
                Err(_) => tracing::warn!(beat = %name, "unknown story beat in save, skipping"),
            }
        }

        self.rng = PursuitRng::restore(data.rng_seed, data.rng_draws, &self.config.pursuit);

        for task in &data.pending {
            match StoryAction::from_str(&task.action) {
                Ok(action) => {
                    let id = self.scheduler.schedule(task.due_in_ms, action);
                    if action == StoryAction::PursuitEncounter {
                        self.pursuit_task = Some(id);
                    }
                }
                Err(_) => tracing::warn!(action = %task.action, "unknown story action in save, skipping"),
            }
        }

        if data.pursuit_active && self.pursuit_task.is_none() {
            self.start_pursuit();
        }
    }
}

impl std::fmt::Debug for StoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryEngine")
            .field("fired", &self.fired)
            .field("scheduler", &self.scheduler)
            .field("pursuit_active", &self.pursuit_active())
            .finish()
    }
}
