// src/save/src/lib.rs

use anyhow::{Context, Result};
use bincode::{Decode, Encode, config};
use error::GameError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::SystemTime,
};
use world::{InteractableRecord, TriggerRecord, Vec3};

/// 存档元数据
#[derive(Debug, Clone, Encode, Decode, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub timestamp: SystemTime,
    pub area_id: String,
    pub area_name: String,
    pub play_time: f64, // 游戏时长(秒)
}

/// 进度计数，与状态存储逐字段对应
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ProgressData {
    pub keys_collected: u32,
    pub notes_read: u32,
    pub generator_started: bool,
    pub power_restored: bool,
    pub entity_encounters: u32,
    pub current_area: String,
}

/// 一把已拾取的钥匙，按拾取顺序
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub key_id: String,
    pub display_name: String,
}

/// 存档时仍在等待时钟的剧情任务
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct PendingTaskData {
    /// 动作名，例如 `power_restoration`
    pub action: String,
    pub due_in_ms: u64,
}

/// 剧情引擎状态：已触发的节点和仍在排队的任务
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct StoryData {
    pub fired_beats: Vec<String>,
    #[serde(default)]
    pub pending: Vec<PendingTaskData>,
    #[serde(default)]
    pub pursuit_active: bool,
    #[serde(default)]
    pub rng_seed: u64,
    #[serde(default)]
    pub rng_draws: u64,
}

/// 存档数据(包含叙事核心的完整状态)
#[derive(Debug, Clone, Encode, Decode, Serialize, Deserialize)]
pub struct SaveData {
    #[serde(default = "default_version")]
    pub version: u32,

    pub metadata: SaveMetadata,

    /// 已加载区域的目录 id（不是语义上的 `current_area` 标签）
    pub loaded_area: String,

    pub progress: ProgressData,

    #[serde(default)]
    pub inventory: Vec<InventoryEntry>,

    #[serde(default)]
    pub interactables: Vec<InteractableRecord>,

    #[serde(default)]
    pub triggers: Vec<TriggerRecord>,

    #[serde(default)]
    pub story: StoryData,

    /// 存档时的模拟时钟
    #[serde(default)]
    pub clock_ms: u64,

    #[serde(default)]
    pub player_position: Vec3,
}

/// 当前存档格式版本
pub const SAVE_VERSION: u32 = 1;

fn default_version() -> u32 {
    SAVE_VERSION
}

impl SaveData {
    /// 将旧版本存档升级到当前版本
    pub fn migrate(mut self) -> Result<Self, GameError> {
        match self.version {
            // 版本 0 的存档没有剧情任务与追逐状态，其余字段已有默认值
            0 => {
                self.story.pending.clear();
                self.story.pursuit_active = false;
                self.version = SAVE_VERSION;
                Ok(self)
            }
            SAVE_VERSION => Ok(self),
            newer => Err(GameError::VersionMismatch(format!(
                "cannot migrate save version {} (current {})",
                newer, SAVE_VERSION
            ))),
        }
    }

    /// 校验存档数据完整性
    pub fn validate(&self) -> Result<(), GameError> {
        if self.version > SAVE_VERSION {
            return Err(GameError::VersionMismatch(format!(
                "save version {} is newer than supported version {}",
                self.version, SAVE_VERSION
            )));
        }

        if self.loaded_area.is_empty() {
            return Err(GameError::CorruptedSave);
        }

        let mut ids: Vec<&str> = self.interactables.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(GameError::CorruptedSave);
        }

        Ok(())
    }
}

/// 存档系统
pub struct SaveSystem {
    save_dir: PathBuf,
    max_slots: usize,
}

impl SaveSystem {
    /// 初始化存档系统
    pub fn new(save_dir: impl AsRef<Path>, max_slots: usize) -> Result<Self, GameError> {
        let save_dir = save_dir.as_ref();

        // 创建存档目录(如果不存在)
        if !save_dir.exists() {
            fs::create_dir_all(save_dir).context("Failed to create save directory")?;
        }

        Ok(Self {
            save_dir: save_dir.to_path_buf(),
            max_slots,
        })
    }

    /// 获取所有存档列表(按时间倒序)
    pub fn list_saves(&self) -> Result<Vec<SaveMetadata>, GameError> {
        let mut saves = Vec::new();

        let entries = fs::read_dir(&self.save_dir).context("Failed to read save directory")?;

        for entry in entries {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_file() && path.extension().is_some_and(|ext| ext == "sav") {
                let mut file =
                    fs::File::open(&path).context(format!("Failed to open save file: {:?}", path))?;

                let data: SaveData = bincode::decode_from_std_read(&mut file, config::standard())
                    .context(format!("Failed to deserialize save file: {:?}", path))?;

                saves.push(data.metadata);
            }
        }

        // 最新的在前
        saves.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(saves)
    }

    /// 保存游戏状态（先写临时文件，再原子性重命名）
    pub fn save_game(&self, slot: usize, data: &SaveData) -> Result<(), GameError> {
        let path = self.save_path(slot).ok_or(GameError::InvalidSlot)?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).context("Failed to create temporary save file")?;

        bincode::encode_into_std_write(data, &mut file, config::standard())
            .context("Failed to serialize save data")?;

        file.flush().context("Failed to flush save data")?;

        fs::rename(temp_path, &path).context("Failed to commit save file")?;

        tracing::info!(slot, area = %data.loaded_area, "game saved");
        Ok(())
    }

    /// 加载游戏状态
    pub fn load_game(&self, slot: usize) -> Result<SaveData, GameError> {
        let path = self.save_path(slot).ok_or(GameError::InvalidSlot)?;

        let mut file = fs::File::open(&path).context(format!("Save file not found: {:?}", path))?;

        let data: SaveData = bincode::decode_from_std_read(&mut file, config::standard())?;

        let data = data.migrate()?;
        data.validate()?;

        tracing::info!(slot, area = %data.loaded_area, "game loaded");
        Ok(data)
    }

    /// 删除存档
    pub fn delete_save(&self, slot: usize) -> Result<(), GameError> {
        let path = self.save_path(slot).ok_or(GameError::InvalidSlot)?;

        if path.exists() {
            fs::remove_file(path).context("Failed to delete save file")?;
        }

        Ok(())
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// 检查指定槽位是否有存档
    pub fn has_save(&self, slot: usize) -> bool {
        self.save_path(slot).is_some_and(|path| path.exists())
    }

    /// 获取存档文件路径
    pub fn save_path(&self, slot: usize) -> Option<PathBuf> {
        if slot >= self.max_slots {
            return None;
        }
        Some(self.save_dir.join(format!("save_{}.sav", slot)))
    }
}

/// 自动保存功能（总是写入 0 号槽位）
pub struct AutoSave {
    pub save_system: SaveSystem,
    pub interval: Duration,
    pub last_save: Option<SystemTime>,
}

impl AutoSave {
    pub fn new(save_system: SaveSystem, interval: Duration) -> Self {
        Self {
            save_system,
            interval,
            last_save: None,
        }
    }

    /// 检查是否需要自动保存，保存时返回 true
    pub fn check_auto_save(&mut self, game_data: &SaveData) -> Result<bool, GameError> {
        let now = SystemTime::now();
        let should_save = match self.last_save {
            // 系统时钟回拨时也保存一次
            Some(last) => now.duration_since(last).map_or(true, |elapsed| elapsed >= self.interval),
            None => true,
        };

        if should_save {
            self.save_system.save_game(0, game_data)?;
            self.last_save = Some(now);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// 强制立即保存（忽略自动保存间隔）
    pub fn force_save(&mut self, save_data: &SaveData) -> Result<(), GameError> {
        self.save_system.save_game(0, save_data)?;
        self.last_save = Some(SystemTime::now());
        Ok(())
    }

    pub fn last_save_time(&self) -> Option<SystemTime> {
        self.last_save
    }

    pub fn save_interval(&self) -> Duration {
        self.interval
    }

    pub fn set_save_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }
}
