// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// CifSeeds: 从原始 CIF 场中提取候选关节 (种子)
// 只做阈值过滤, 不做非极大值抑制; 重复种子由占用网格在组装阶段处理

use crate::fields::{CifDetField, CifField};

/// 种子 (图像坐标)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seed {
    pub field: usize,
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub score: f32,
}

/// 检测种子 (CifDet), 带检测框尺寸
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetSeed {
    pub field: usize,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub score: f32,
}

pub struct CifSeeds {
    threshold: f32,
    seeds: Vec<Seed>,
}

impl CifSeeds {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            seeds: Vec::new(),
        }
    }

    /// 追加一个尺度的种子 (按类别、行优先顺序)
    pub fn fill(&mut self, cif: &CifField<'_>) -> &mut Self {
        for k in 0..cif.n_fields() {
            for v in cif.vectors(k, self.threshold) {
                self.seeds.push(Seed {
                    field: k,
                    x: v.x,
                    y: v.y,
                    scale: v.scale,
                    score: v.confidence.clamp(0.0, 1.0),
                });
            }
        }
        self
    }

    /// 所有尺度的种子按分数降序 (稳定排序, 同分保持插入顺序)
    pub fn get(mut self) -> Vec<Seed> {
        self.seeds.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.seeds
    }
}

/// CifDet 种子
pub fn det_seeds(fields: &[CifDetField<'_>], threshold: f32) -> Vec<DetSeed> {
    let mut seeds = Vec::new();
    for field in fields {
        for k in 0..field.n_fields() {
            for v in field.vectors(k, threshold) {
                seeds.push(DetSeed {
                    field: k,
                    x: v.x,
                    y: v.y,
                    w: v.w,
                    h: v.h,
                    score: v.confidence.clamp(0.0, 1.0),
                });
            }
        }
    }
    seeds.sort_by(|a, b| b.score.total_cmp(&a.score));
    seeds
}
