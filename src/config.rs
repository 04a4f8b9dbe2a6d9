//! 引擎配置
//!
//! 每个字段都有与正式游戏一致的默认值，空的 TOML 文件（或没有文件）即为默认行为。

use serde::Deserialize;
use std::path::{Path, PathBuf};
use world::RepeatMode;

/// 加载配置时可能出现的错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("failed to read config file: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("failed to parse config TOML: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },

    /// 能解析，但取值互相矛盾
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for error::GameError {
    fn from(err: ConfigError) -> Self {
        error::GameError::Config(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 新游戏或重置时加载的区域
    pub start_area: String,
    /// 可选的 JSON 区域目录，替换内置目录
    pub areas_file: Option<PathBuf>,
    pub interaction: InteractionConfig,
    pub triggers: TriggerConfig,
    pub bus: BusConfig,
    pub story: StoryConfig,
    pub save: SaveConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_area: "asylum_entrance".to_string(),
            areas_file: None,
            interaction: InteractionConfig::default(),
            triggers: TriggerConfig::default(),
            bus: BusConfig::default(),
            story: StoryConfig::default(),
            save: SaveConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.interaction.range > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "interaction.range must be positive, got {}",
                self.interaction.range
            )));
        }
        if self.bus.max_dispatch_depth == 0 {
            return Err(ConfigError::Invalid("bus.max_dispatch_depth must be at least 1".into()));
        }
        let pursuit = &self.story.pursuit;
        if pursuit.min_interval_ms == 0 || pursuit.min_interval_ms > pursuit.max_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "story.pursuit interval {}..{} ms is empty",
                pursuit.min_interval_ms, pursuit.max_interval_ms
            )));
        }
        if self.save.max_slots == 0 {
            return Err(ConfigError::Invalid("save.max_slots must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub range: f32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self { range: 3.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub repeat_mode: RepeatMode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 超过此深度的嵌套发布先缓冲，等最外层发布返回前再处理
    pub max_dispatch_depth: usize,
    pub history_limit: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_dispatch_depth: 16,
            history_limit: 256,
        }
    }
}

/// 剧情节点每局只触发一次，还是每个满足条件的事件都触发
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatPolicy {
    #[default]
    Once,
    Repeat,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    pub entity_introduction_delay_ms: u64,
    pub power_restoration_delay_ms: u64,
    pub aggressive_threshold: u32,
    pub aggressive_policy: BeatPolicy,
    /// 重读已读笔记是否计入 `notes_read`
    pub note_reread_counts: bool,
    pub pursuit: PursuitConfig,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            entity_introduction_delay_ms: 2000,
            power_restoration_delay_ms: 3000,
            aggressive_threshold: 3,
            aggressive_policy: BeatPolicy::Once,
            note_reread_counts: false,
            pursuit: PursuitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PursuitConfig {
    pub enabled: bool,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    /// 实体出现位置所在的、以玩家为中心的正方形边长
    pub spread: f32,
    pub intensity: u32,
    pub seed: u64,
}

impl Default for PursuitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: 3000,
            max_interval_ms: 5000,
            spread: 10.0,
            intensity: 2,
            seed: 0x5eed_a51e,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub dir: PathBuf,
    pub max_slots: usize,
    pub autosave_interval_secs: u64,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("saves"),
            max_slots: 5,
            autosave_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 未设置 `RUST_LOG` 时使用的 `EnvFilter` 指令
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.interaction.range, 3.0);
        assert_eq!(config.story.power_restoration_delay_ms, 3000);
        assert_eq!(config.triggers.repeat_mode, RepeatMode::Edge);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            start_area = "main_corridor"

            [story]
            aggressive_policy = "repeat"

            [story.pursuit]
            enabled = false

            [triggers]
            repeat_mode = "continuous"
            "#,
        )
        .unwrap();

        assert_eq!(config.start_area, "main_corridor");
        assert_eq!(config.story.aggressive_policy, BeatPolicy::Repeat);
        assert_eq!(config.story.aggressive_threshold, 3);
        assert!(!config.story.pursuit.enabled);
        assert_eq!(config.story.pursuit.min_interval_ms, 3000);
        assert_eq!(config.triggers.repeat_mode, RepeatMode::Continuous);
    }

    #[test]
    fn rejects_nonsense_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("[interaction]\nrange = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("[story.pursuit]\nmin_interval_ms = 9000\nmax_interval_ms = 10"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("start_area = 4"),
            Err(ConfigError::Toml { .. })
        ));
    }
}
