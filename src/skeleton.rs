// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 骨架拓扑定义 (关键点名称 + 连接边)
//!
//! 边使用 1-based 关键点索引, 与训练侧的 head 元数据一致.
//! 静止姿态 (rest pose) 使用图像坐标系 (y 轴向下).

use once_cell::sync::Lazy;

use crate::error::ConfigError;

/// COCO 17 关键点名称
pub const COCO_KEYPOINTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// COCO 人体骨架 (1-based)
pub const COCO_PERSON_SKELETON: [(usize, usize); 19] = [
    (16, 14),
    (14, 12),
    (17, 15),
    (15, 13),
    (12, 13),
    (6, 12),
    (7, 13),
    (6, 7),
    (6, 8),
    (7, 9),
    (8, 10),
    (9, 11),
    (2, 3),
    (1, 2),
    (1, 3),
    (2, 4),
    (3, 5),
    (4, 6),
    (5, 7),
];

/// 稠密连接中不属于基础骨架的辅助边 (1-based)
pub const DENSER_COCO_PERSON_CONNECTIONS: [(usize, usize); 25] = [
    (1, 4),
    (1, 5),
    (4, 5),
    (1, 6),
    (1, 7),
    (2, 6),
    (3, 7),
    (6, 13),
    (7, 12),
    (6, 10),
    (7, 11),
    (8, 9),
    (10, 11),
    (10, 12),
    (11, 13),
    (10, 14),
    (11, 15),
    (12, 15),
    (13, 14),
    (12, 16),
    (13, 17),
    (14, 17),
    (15, 16),
    (14, 15),
    (16, 17),
];

/// 直立人体静止姿态 (单位约为半个头高, y 向下)
const COCO_UPRIGHT_POSE: [(f32, f32); 17] = [
    (0.0, -9.3),   // nose
    (-0.35, -9.7), // left_eye
    (0.35, -9.7),  // right_eye
    (-0.7, -9.5),  // left_ear
    (0.7, -9.5),   // right_ear
    (-1.4, -8.0),  // left_shoulder
    (1.4, -8.0),   // right_shoulder
    (-1.75, -6.0), // left_elbow
    (1.75, -6.2),  // right_elbow
    (-1.75, -4.0), // left_wrist
    (1.75, -4.2),  // right_wrist
    (-1.26, -4.0), // left_hip
    (1.26, -4.0),  // right_hip
    (-1.4, -2.0),  // left_knee
    (1.4, -2.1),   // right_knee
    (-1.4, 0.0),   // left_ankle
    (1.4, -0.1),   // right_ankle
];

/// 牙科关键点 (dental plugin)
pub const DENTAL_KEYPOINTS: [&str; 6] = [
    "cej_left",
    "cej_right",
    "aeac_left",
    "aeac_right",
    "apex_left",
    "apex_right",
];

pub const DENTAL_SKELETON: [(usize, usize); 4] = [(1, 3), (3, 5), (2, 4), (4, 6)];

const DENTAL_POSE: [(f32, f32); 6] = [
    (-2.9, -4.0),
    (2.9, -4.0),
    (-2.0, -2.0),
    (2.0, -2.0),
    (-2.5, 0.0),
    (2.5, 0.0),
];

const DENTAL_SCORE_WEIGHTS: [f32; 6] = [10.0, 3.0, 1.0, 0.1, 0.1, 0.1];

/// COCO 人体预设 (含稠密辅助边与静止姿态)
pub static COCO_PERSON: Lazy<Skeleton> = Lazy::new(|| {
    Skeleton::new(
        COCO_KEYPOINTS.iter().map(|s| s.to_string()).collect(),
        COCO_PERSON_SKELETON.to_vec(),
    )
    .with_dense_edges(DENSER_COCO_PERSON_CONNECTIONS.to_vec())
    .with_rest_pose(COCO_UPRIGHT_POSE.to_vec())
    .with_categories(vec!["person".to_string()])
});

/// 牙齿预设
pub static DENTAL: Lazy<Skeleton> = Lazy::new(|| {
    Skeleton::new(
        DENTAL_KEYPOINTS.iter().map(|s| s.to_string()).collect(),
        DENTAL_SKELETON.to_vec(),
    )
    .with_rest_pose(DENTAL_POSE.to_vec())
    .with_score_weights(DENTAL_SCORE_WEIGHTS.to_vec())
    .with_categories(vec!["tooth".to_string()])
});

/// 骨架拓扑
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    keypoints: Vec<String>,
    edges: Vec<(usize, usize)>,
    dense_edges: Vec<(usize, usize)>,
    rest_pose: Option<Vec<(f32, f32)>>,
    score_weights: Option<Vec<f32>>,
    categories: Vec<String>,
}

impl Skeleton {
    pub fn new(keypoints: Vec<String>, edges: Vec<(usize, usize)>) -> Self {
        Self {
            keypoints,
            edges,
            dense_edges: Vec::new(),
            rest_pose: None,
            score_weights: None,
            categories: Vec::new(),
        }
    }

    /// 仅检测 (CifDet) 使用: 没有关键点, 只有类别
    pub fn detection(categories: Vec<String>) -> Self {
        Self::new(Vec::new(), Vec::new()).with_categories(categories)
    }

    pub fn with_dense_edges(mut self, dense_edges: Vec<(usize, usize)>) -> Self {
        self.dense_edges = dense_edges;
        self
    }

    pub fn with_rest_pose(mut self, rest_pose: Vec<(f32, f32)>) -> Self {
        self.rest_pose = Some(rest_pose);
        self
    }

    pub fn with_score_weights(mut self, score_weights: Vec<f32>) -> Self {
        self.score_weights = Some(score_weights);
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn keypoints(&self) -> &[String] {
        &self.keypoints
    }

    pub fn n_keypoints(&self) -> usize {
        self.keypoints.len()
    }

    /// 基础骨架边 (1-based)
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn dense_edges(&self) -> &[(usize, usize)] {
        &self.dense_edges
    }

    pub fn rest_pose(&self) -> Option<&[(f32, f32)]> {
        self.rest_pose.as_deref()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// 解码使用的边 (0-based), 稠密模式下追加辅助边
    pub fn decoding_edges(&self, dense: bool) -> Vec<(usize, usize)> {
        let dense_edges: &[(usize, usize)] = if dense { &self.dense_edges } else { &[] };
        self.edges
            .iter()
            .chain(dense_edges.iter())
            .map(|&(a, b)| (a - 1, b - 1))
            .collect()
    }

    /// 归一化的实例评分权重
    ///
    /// 默认前三个 (按置信度降序) 权重为 3, 其余为 1
    pub fn score_weights(&self) -> Vec<f32> {
        let n = self.n_keypoints();
        let mut weights = match &self.score_weights {
            Some(w) => w.clone(),
            None => (0..n).map(|i| if i < 3 { 3.0 } else { 1.0 }).collect(),
        };
        let sum: f32 = weights.iter().sum();
        if sum > 0.0 {
            weights.iter_mut().for_each(|w| *w /= sum);
        }
        weights
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.n_keypoints();
        for (edge, &(a, b)) in self.edges.iter().chain(self.dense_edges.iter()).enumerate() {
            if a == 0 || b == 0 || a > n || b > n || a == b {
                return Err(ConfigError::SkeletonEdge {
                    edge,
                    a,
                    b,
                    keypoints: n,
                });
            }
        }
        if let Some(pose) = &self.rest_pose {
            if pose.len() != n {
                return Err(ConfigError::LengthMismatch {
                    name: "rest_pose",
                    expected: n,
                    actual: pose.len(),
                });
            }
        }
        if let Some(weights) = &self.score_weights {
            if weights.len() != n {
                return Err(ConfigError::LengthMismatch {
                    name: "score_weights",
                    expected: n,
                    actual: weights.len(),
                });
            }
            if let Some(&bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
                return Err(ConfigError::InvalidValue {
                    name: "score_weights",
                    value: bad,
                });
            }
        }
        Ok(())
    }
}
