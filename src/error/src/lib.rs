//! 游戏错误处理模块
//!
//! 处理叙事核心运行过程中可能出现的错误：区域引用、区域数据、存档系统、序列化、IO、配置等。
//! 处理器失败与交互被拒绝不属于这里：前者在事件总线内部隔离，后者是类型化的交互结果。

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

/// 游戏运行过程中可能出现的错误类型
#[derive(Debug, Error)]
pub enum GameError {
    /// 请求加载的区域不存在（当前区域保持不变）
    #[error("Unknown area: {0}")]
    InvalidAreaReference(String),

    /// 区域数据不合法（重复的物体 id、非正的触发半径等）
    #[error("Invalid data in area '{area}': {reason}")]
    InvalidAreaData { area: String, reason: String },

    /// 存档系统错误
    #[error("Save system error: {0}")]
    SaveError(#[from] anyhow::Error),

    /// IO操作错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// 反序列化错误
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// 无效的存档槽位
    #[error("Invalid save slot")]
    InvalidSlot,

    /// 存档数据损坏
    #[error("Corrupted save data")]
    CorruptedSave,

    /// 存档版本不兼容
    #[error("Incompatible save version: {0}")]
    VersionMismatch(String),

    /// 配置文件错误
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GameError {
    /// 构造区域数据错误
    pub fn area_data(area: impl Into<String>, reason: impl Into<String>) -> Self {
        GameError::InvalidAreaData {
            area: area.into(),
            reason: reason.into(),
        }
    }
}

impl From<DecodeError> for GameError {
    fn from(err: DecodeError) -> Self {
        // 二进制解码出现非法 utf-8 时，通常意味着存档文件被截断或篡改
        if err.to_string().contains("invalid utf-8 sequence") {
            GameError::CorruptedSave
        } else {
            GameError::DeserializationError(err.to_string())
        }
    }
}

impl From<EncodeError> for GameError {
    fn from(err: EncodeError) -> Self {
        GameError::SerializationError(err.to_string())
    }
}

/// 处理游戏错误并转换为用户友好的消息
pub fn handle_error(error: &GameError) -> String {
    match error {
        GameError::InvalidAreaReference(area) => format!("区域不存在: {}", area),
        GameError::CorruptedSave => "存档数据已损坏，无法加载".to_string(),
        GameError::InvalidSlot => "无效的存档槽位".to_string(),
        GameError::VersionMismatch(v) => format!("存档版本不兼容: {}", v),
        GameError::IoError(e) => match e.kind() {
            std::io::ErrorKind::NotFound => "存档文件不存在".to_string(),
            std::io::ErrorKind::PermissionDenied => "没有权限访问存档文件".to_string(),
            _ => format!("IO错误: {}", e),
        },
        _ => error.to_string(),
    }
}
