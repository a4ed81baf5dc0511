// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 解码器配置 - 可通过JSON文件调整参数
//!
//! 配置在解码开始前构建并校验一次, 之后只读共享.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::skeleton::Skeleton;

/// 连接评分方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMethod {
    /// min(CAF置信度, 目标CifHr置信度), 更快
    Max,
    /// CAF置信度 × 目标邻域CifHr双线性插值, 更准
    #[default]
    Blend,
}

impl std::str::FromStr for ConnectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max" => Ok(ConnectionMethod::Max),
            "blend" => Ok(ConnectionMethod::Blend),
            other => Err(format!("unknown connection method: {}", other)),
        }
    }
}

/// 解码器参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    // === 阈值 ===
    pub seed_threshold: f32,             // 种子最小置信度
    pub keypoint_threshold: Option<f32>, // 关键点过滤, None 时按 force_complete_pose 推导
    pub instance_threshold: f32,         // 实例评分过滤
    pub v_threshold: f32,                // CifHr 累积的可见度阈值
    pub caf_threshold: f32,              // CAF 置信度阈值
    pub cif_neighbors: f32,              // CifHr 核幅度归一化 (每个关节的投票单元数)

    // === 组装策略 ===
    pub connection_method: ConnectionMethod,
    pub greedy: bool,
    pub force_complete_pose: bool,
    pub reverse_match: bool,
    pub dense_connections: bool,
    pub dense_coupling: f32,

    // === 多尺度 ===
    pub multi_scale: bool,
    pub multi_scale_hflip: bool,

    // === 后处理 ===
    pub nms_keypoints: bool,
    pub iou_threshold: f32, // CifDet 检测框 NMS

    // === 运行 ===
    pub workers: Option<usize>,
    pub profile: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            seed_threshold: 0.2,
            keypoint_threshold: None,
            instance_threshold: 0.0,
            v_threshold: 0.1,
            caf_threshold: 0.2,
            cif_neighbors: 16.0,

            connection_method: ConnectionMethod::Blend,
            greedy: false,
            force_complete_pose: true,
            reverse_match: true,
            dense_connections: false,
            dense_coupling: 0.01,

            multi_scale: false,
            multi_scale_hflip: true,

            nms_keypoints: true,
            iou_threshold: 0.7,

            workers: None,
            profile: false,
        }
    }
}

impl DecoderConfig {
    /// 生效的关键点阈值: 强制补全时为 0.0, 否则 0.001
    pub fn keypoint_threshold(&self) -> f32 {
        self.keypoint_threshold
            .unwrap_or(if self.force_complete_pose { 0.0 } else { 0.001 })
    }

    /// 校验阈值不变量
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = [
            ("seed_threshold", self.seed_threshold),
            ("keypoint_threshold", self.keypoint_threshold()),
            ("instance_threshold", self.instance_threshold),
            ("v_threshold", self.v_threshold),
            ("caf_threshold", self.caf_threshold),
            ("iou_threshold", self.iou_threshold),
        ];
        for (name, value) in unit {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue { name, value });
            }
        }
        if !self.dense_coupling.is_finite() || self.dense_coupling < 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "dense_coupling",
                value: self.dense_coupling,
            });
        }
        if !self.cif_neighbors.is_finite() || self.cif_neighbors <= 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "cif_neighbors",
                value: self.cif_neighbors,
            });
        }
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }

        let keypoint = self.keypoint_threshold();
        if self.force_complete_pose && keypoint != 0.0 {
            return Err(ConfigError::ForceCompleteThreshold { keypoint });
        }
        if self.seed_threshold < keypoint {
            return Err(ConfigError::SeedBelowKeypoint {
                seed: self.seed_threshold,
                keypoint,
            });
        }
        Ok(())
    }

    /// 从JSON文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let err = |reason: String| ConfigError::Load {
            path: path.display().to_string(),
            reason,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| err(e.to_string()))?;
        fs::write(path, json).map_err(|e| err(e.to_string()))
    }
}

/// 单个尺度的 head 布局与距离约束
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleConfig {
    pub cif_index: usize,
    /// 该尺度的 CAF head, 依次拼接成完整的边列表 (caf + caf25)
    pub caf_indices: Vec<usize>,
    pub min_scale: f32,
    pub min_distance: f32,
    pub max_distance: Option<f32>,
}

/// 多尺度 head 布局
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConfig {
    pub scales: Vec<ScaleConfig>,
    /// 每条边的置信度缩放 (稠密辅助边使用 dense_coupling)
    pub confidence_scales: Option<Vec<f32>>,
}

const MULTI_SCALE_MIN_SCALES: [f32; 5] = [0.0, 12.0, 16.0, 24.0, 40.0];
const MULTI_SCALE_MAX_DISTANCES: [Option<f32>; 5] =
    [Some(160.0), Some(240.0), Some(320.0), Some(480.0), None];

impl FieldConfig {
    /// 单尺度: heads = (cif, caf[, caf25])
    pub fn single(dense: bool) -> Self {
        Self {
            scales: vec![ScaleConfig {
                cif_index: 0,
                caf_indices: if dense { vec![1, 2] } else { vec![1] },
                min_scale: 0.0,
                min_distance: 0.0,
                max_distance: None,
            }],
            confidence_scales: None,
        }
    }

    /// 多尺度: 每个尺度占 3 个 head (cif, caf, caf25), hflip 时尺度列表重复一遍
    pub fn multi_scale(dense: bool, hflip: bool) -> Self {
        let repeats = if hflip { 2 } else { 1 };
        let mut scales = Vec::with_capacity(5 * repeats);
        for v in 0..5 * repeats {
            let i = v % 5;
            let min_scale = MULTI_SCALE_MIN_SCALES[i];
            scales.push(ScaleConfig {
                cif_index: v * 3,
                caf_indices: if dense {
                    vec![v * 3 + 1, v * 3 + 2]
                } else {
                    vec![v * 3 + 1]
                },
                min_scale,
                min_distance: min_scale * 3.0,
                max_distance: MULTI_SCALE_MAX_DISTANCES[i],
            });
        }
        Self {
            scales,
            confidence_scales: None,
        }
    }

    /// 根据解码配置与骨架构建
    pub fn from_config(config: &DecoderConfig, skeleton: &Skeleton) -> Self {
        let mut field_config = if config.multi_scale {
            Self::multi_scale(config.dense_connections, config.multi_scale_hflip)
        } else {
            Self::single(config.dense_connections)
        };
        if config.dense_connections {
            field_config.confidence_scales = Some(
                std::iter::repeat(1.0)
                    .take(skeleton.edges().len())
                    .chain(std::iter::repeat(config.dense_coupling).take(skeleton.dense_edges().len()))
                    .collect(),
            );
        }
        field_config
    }
}
