// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 解码器错误类型
//!
//! - `ConfigError`: 构建阶段的配置错误, 解码不会开始
//! - `DecodeError`: 单次解码调用的错误, 只影响该图片

use thiserror::Error;

/// 配置错误 (构建解码器时检查)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("seed_threshold ({seed}) must not be below keypoint_threshold ({keypoint})")]
    SeedBelowKeypoint { seed: f32, keypoint: f32 },

    #[error("force_complete_pose requires keypoint_threshold == 0.0, got {keypoint}")]
    ForceCompleteThreshold { keypoint: f32 },

    #[error("invalid value for `{name}`: {value}")]
    InvalidValue { name: &'static str, value: f32 },

    #[error("decoder unknown for head names: {0:?}")]
    UnknownHeads(Vec<String>),

    #[error("skeleton edge {edge} ({a}, {b}) out of range for {keypoints} keypoints")]
    SkeletonEdge {
        edge: usize,
        a: usize,
        b: usize,
        keypoints: usize,
    },

    #[error("`{name}` has {actual} entries, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("worker pool size must be positive")]
    ZeroWorkers,

    #[error("failed to load config `{path}`: {reason}")]
    Load { path: String, reason: String },
}

/// 单次解码错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("malformed field `{head}`: {reason}")]
    MalformedField { head: String, reason: String },

    #[error("decode worker failed: {0}")]
    Worker(String),
}

impl DecodeError {
    pub(crate) fn malformed(head: impl Into<String>, reason: impl Into<String>) -> Self {
        DecodeError::MalformedField {
            head: head.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
