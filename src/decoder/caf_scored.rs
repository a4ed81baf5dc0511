// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// CafScored: 关联场评分
// 每个尺度、每条边的 CAF 单元按长度约束过滤后, 正反两个方向各存一份;
// 查询时按源端距离加权, 再与目标关节的 CifHr 置信度组合

use crate::config::ConnectionMethod;
use crate::decoder::cif_hr::CifHr;
use crate::fields::CafField;

/// 源端匹配窗口的最小 sigma (像素)
const MIN_SIGMA: f32 = 0.5;

/// 一条有向关联: 源端 -> 目标端
#[derive(Debug, Clone, Copy, PartialEq)]
struct Association {
    confidence: f32,
    src: (f32, f32, f32),
    dst: (f32, f32, f32),
}

/// 候选目标关节
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub score: f32,
}

/// 一个尺度的全部关联, [edge] -> 列表
#[derive(Debug, Clone, Default)]
struct ScaleAssociations {
    forward: Vec<Vec<Association>>,
    backward: Vec<Vec<Association>>,
}

pub struct CafScored<'a> {
    cifhr: &'a CifHr,
    /// 0-based (起点关键点, 终点关键点)
    skeleton: &'a [(usize, usize)],
    confidence_scales: Option<&'a [f32]>,
    method: ConnectionMethod,
    score_th: f32,
    scales: Vec<ScaleAssociations>,
}

impl<'a> CafScored<'a> {
    pub fn new(
        cifhr: &'a CifHr,
        skeleton: &'a [(usize, usize)],
        confidence_scales: Option<&'a [f32]>,
        method: ConnectionMethod,
        score_th: f32,
    ) -> Self {
        Self {
            cifhr,
            skeleton,
            confidence_scales,
            method,
            score_th,
            scales: Vec::new(),
        }
    }

    pub fn n_scales(&self) -> usize {
        self.scales.len()
    }

    /// 添加一个尺度; `cafs` 的场依次拼接成完整的边列表
    pub fn fill(&mut self, cafs: &[CafField<'_>], min_distance: f32, max_distance: Option<f32>) {
        let n_edges = self.skeleton.len();
        let mut assoc = ScaleAssociations {
            forward: vec![Vec::new(); n_edges],
            backward: vec![Vec::new(); n_edges],
        };

        let mut edge = 0;
        for caf in cafs {
            for e in 0..caf.n_fields() {
                if edge >= n_edges {
                    break;
                }
                for v in caf.vectors(e, self.score_th) {
                    let length = v.length();
                    if length < min_distance {
                        continue;
                    }
                    if let Some(max_distance) = max_distance {
                        if length > max_distance {
                            continue;
                        }
                    }
                    let p1 = (v.x1, v.y1, v.s1.max(0.0));
                    let p2 = (v.x2, v.y2, v.s2.max(0.0));
                    assoc.forward[edge].push(Association {
                        confidence: v.confidence.min(1.0),
                        src: p1,
                        dst: p2,
                    });
                    assoc.backward[edge].push(Association {
                        confidence: v.confidence.min(1.0),
                        src: p2,
                        dst: p1,
                    });
                }
                edge += 1;
            }
        }
        self.scales.push(assoc);
    }

    /// 从 (x, y) 出发沿边 `edge` 寻找另一端的候选
    ///
    /// `forward` 为真时从边的起点走向终点. 只在 `scales` 指定的尺度中查找.
    /// 返回按分数降序排列的候选 (稳定排序), 可能为空.
    pub fn query(
        &self,
        edge: usize,
        forward: bool,
        scales: &[usize],
        x: f32,
        y: f32,
        xy_scale: f32,
    ) -> Vec<Candidate> {
        let Some(&(j1, j2)) = self.skeleton.get(edge) else {
            return Vec::new();
        };
        let target = if forward { j2 } else { j1 };
        let sigma = (0.5 * xy_scale).max(MIN_SIGMA);
        let sigma2 = sigma * sigma;
        let window = 4.0 * sigma;
        let edge_scale = self
            .confidence_scales
            .and_then(|s| s.get(edge).copied())
            .unwrap_or(1.0);

        let mut candidates = Vec::new();
        for &scale_i in scales {
            let Some(assoc) = self.scales.get(scale_i) else {
                continue;
            };
            let list = if forward {
                &assoc.forward[edge]
            } else {
                &assoc.backward[edge]
            };
            for a in list {
                let (dx, dy) = (a.src.0 - x, a.src.1 - y);
                if dx.abs() > window || dy.abs() > window {
                    continue;
                }
                let caf_confidence = a.confidence * (-0.5 * (dx * dx + dy * dy) / sigma2).exp();
                let score = edge_scale * self.combine(caf_confidence, target, a.dst.0, a.dst.1);
                if score > 0.0 {
                    candidates.push(Candidate {
                        x: a.dst.0,
                        y: a.dst.1,
                        scale: a.dst.2,
                        score,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates
    }

    fn combine(&self, caf_confidence: f32, target: usize, x: f32, y: f32) -> f32 {
        match self.method {
            ConnectionMethod::Max => caf_confidence.min(self.cifhr.value(target, x, y)),
            ConnectionMethod::Blend => {
                caf_confidence * self.cifhr.value_interpolated(target, x, y).min(1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldSet;
    use ndarray::{Array3, Array4};

    /// 一条从 (4, 4) 到 (12, 4) 的关联, stride 4
    fn caf_fields(c: f32) -> FieldSet {
        let mut data = Array4::<f32>::zeros((1, 7, 3, 3));
        data[[0, 0, 1, 2]] = c;
        // cell (row 1, col 2): x1 = (2 - 1) * 4, x2 = (2 + 1) * 4
        data[[0, 1, 1, 2]] = -1.0;
        data[[0, 2, 1, 2]] = 0.0;
        data[[0, 3, 1, 2]] = 1.0;
        data[[0, 4, 1, 2]] = 0.0;
        data[[0, 5, 1, 2]] = 1.0;
        data[[0, 6, 1, 2]] = 1.0;
        FieldSet::default().push("caf", 4, data)
    }

    fn flat_cifhr(value: f32) -> CifHr {
        CifHr::from_accumulated(Array3::from_elem((2, 20, 20), value), 0.1, 1.0)
    }

    #[test]
    fn test_forward_and_backward() {
        let cifhr = flat_cifhr(1.0);
        let fields = caf_fields(0.8);
        let mut scored = CafScored::new(&cifhr, &[(0, 1)], None, ConnectionMethod::Max, 0.2);
        scored.fill(&[fields.caf(0).unwrap()], 0.0, None);

        let fwd = scored.query(0, true, &[0], 4.0, 4.0, 4.0);
        assert_eq!(fwd.len(), 1);
        assert_eq!((fwd[0].x, fwd[0].y), (12.0, 4.0));
        assert!((fwd[0].score - 0.8).abs() < 1e-6);

        let bwd = scored.query(0, false, &[0], 12.0, 4.0, 4.0);
        assert_eq!((bwd[0].x, bwd[0].y), (4.0, 4.0));

        // 远离源端: 无候选
        assert!(scored.query(0, true, &[0], 40.0, 4.0, 4.0).is_empty());
    }

    #[test]
    fn test_distance_bounds() {
        let cifhr = flat_cifhr(1.0);
        let fields = caf_fields(0.8);
        let mut scored = CafScored::new(&cifhr, &[(0, 1)], None, ConnectionMethod::Max, 0.2);
        scored.fill(&[fields.caf(0).unwrap()], 10.0, None);
        scored.fill(&[fields.caf(0).unwrap()], 0.0, Some(6.0));
        assert!(scored.query(0, true, &[0], 4.0, 4.0, 4.0).is_empty());
        assert!(scored.query(0, true, &[1], 4.0, 4.0, 4.0).is_empty());
    }

    #[test]
    fn test_max_uses_target_confidence() {
        let cifhr = flat_cifhr(0.3);
        let fields = caf_fields(0.8);
        let mut scored = CafScored::new(&cifhr, &[(0, 1)], None, ConnectionMethod::Max, 0.2);
        scored.fill(&[fields.caf(0).unwrap()], 0.0, None);
        let c = scored.query(0, true, &[0], 4.0, 4.0, 4.0);
        assert!((c[0].score - 0.3).abs() < 1e-6);

        let mut blended = CafScored::new(&cifhr, &[(0, 1)], None, ConnectionMethod::Blend, 0.2);
        blended.fill(&[fields.caf(0).unwrap()], 0.0, None);
        let c = blended.query(0, true, &[0], 4.0, 4.0, 4.0);
        assert!((c[0].score - 0.24).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_scales_attenuate() {
        let cifhr = flat_cifhr(1.0);
        let fields = caf_fields(0.8);
        let mut scored = CafScored::new(
            &cifhr,
            &[(0, 1)],
            Some(&[0.01][..]),
            ConnectionMethod::Max,
            0.2,
        );
        scored.fill(&[fields.caf(0).unwrap()], 0.0, None);
        let c = scored.query(0, true, &[0], 4.0, 4.0, 4.0);
        assert!((c[0].score - 0.008).abs() < 1e-6);
    }

    #[test]
    fn test_below_caf_threshold() {
        let cifhr = flat_cifhr(1.0);
        let fields = caf_fields(0.1);
        let mut scored = CafScored::new(&cifhr, &[(0, 1)], None, ConnectionMethod::Max, 0.2);
        scored.fill(&[fields.caf(0).unwrap()], 0.0, None);
        assert!(scored.query(0, true, &[0], 4.0, 4.0, 4.0).is_empty());
    }
}
