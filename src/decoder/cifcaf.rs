// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// CifCaf: 由 CIF/CAF 场贪心组装姿态实例
//
// 流程:
//   CIF ──> CifHr ──┐
//   CIF ──> 种子 ───┼──> 逐个种子生长 (CafScored + 占用网格) ──> 补全 ──> 评分过滤
//   CAF ──> CafScored
//
// 已提交的关节不会回退或被覆盖

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::annotation::{Annotation, Joint};
use crate::config::{DecoderConfig, FieldConfig};
use crate::decoder::caf_scored::{CafScored, Candidate};
use crate::decoder::cif_hr::CifHr;
use crate::decoder::cif_seeds::CifSeeds;
use crate::decoder::observer::DecodeObserver;
use crate::decoder::occupancy::Occupancy;
use crate::error::{ConfigError, DecodeError, Result};
use crate::fields::{CafField, FieldSet};
use crate::skeleton::Skeleton;

const OCCUPANCY_REDUCTION: f32 = 2.0;
const OCCUPANCY_MIN_SCALE: f32 = 4.0;

/// 从某个关节出发的一条边
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Connection {
    edge: usize,
    target: usize,
    forward: bool,
}

/// 已评估的待提交连接 (非贪心模式的堆元素)
#[derive(Debug, Clone, Copy)]
struct Frontier {
    score: f32,
    edge: usize,
    seq: usize,
    target: usize,
    joint: Joint,
}

// 分数高者优先, 同分时边序号小者优先, 再按插入顺序
impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.edge.cmp(&self.edge))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

/// 强制补全的泛洪队列元素, 源关节置信度高者优先
#[derive(Debug, Clone, Copy)]
struct Completion {
    confidence: f32,
    seq: usize,
    source: usize,
    target: usize,
}

impl Ord for Completion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.confidence
            .total_cmp(&other.confidence)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Completion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Completion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Completion {}

#[derive(Debug, Clone)]
pub struct CifCaf {
    config: DecoderConfig,
    field_config: FieldConfig,
    keypoints: Arc<Vec<String>>,
    /// 输出骨架 (1-based 基础边)
    skeleton: Arc<Vec<(usize, usize)>>,
    /// 解码用的边 (0-based, 稠密模式含辅助边)
    edges: Vec<(usize, usize)>,
    by_source: Vec<Vec<Connection>>,
    /// (min_scale, 尺度索引), 按 min_scale 升序
    scale_groups: Vec<(f32, Vec<usize>)>,
    rest_pose: Option<Vec<(f32, f32)>>,
    score_weights: Vec<f32>,
}

impl CifCaf {
    pub fn new(
        skeleton: &Skeleton,
        config: &DecoderConfig,
        field_config: FieldConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        skeleton.validate()?;

        let edges = skeleton.decoding_edges(config.dense_connections);
        if let Some(scales) = &field_config.confidence_scales {
            if scales.len() != edges.len() {
                return Err(ConfigError::LengthMismatch {
                    name: "confidence_scales",
                    expected: edges.len(),
                    actual: scales.len(),
                });
            }
        }
        if field_config.scales.is_empty() {
            return Err(ConfigError::LengthMismatch {
                name: "scales",
                expected: 1,
                actual: 0,
            });
        }

        let mut by_source = vec![Vec::new(); skeleton.n_keypoints()];
        for (edge, &(j1, j2)) in edges.iter().enumerate() {
            by_source[j1].push(Connection {
                edge,
                target: j2,
                forward: true,
            });
            by_source[j2].push(Connection {
                edge,
                target: j1,
                forward: false,
            });
        }

        let mut scale_groups: Vec<(f32, Vec<usize>)> = Vec::new();
        for (i, scale) in field_config.scales.iter().enumerate() {
            match scale_groups.iter_mut().find(|(m, _)| *m == scale.min_scale) {
                Some((_, members)) => members.push(i),
                None => scale_groups.push((scale.min_scale, vec![i])),
            }
        }
        scale_groups.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(Self {
            config: config.clone(),
            field_config,
            keypoints: Arc::new(skeleton.keypoints().to_vec()),
            skeleton: Arc::new(skeleton.edges().to_vec()),
            edges,
            by_source,
            scale_groups,
            rest_pose: skeleton.rest_pose().map(|p| p.to_vec()),
            score_weights: skeleton.score_weights(),
        })
    }

    pub fn n_keypoints(&self) -> usize {
        self.keypoints.len()
    }

    pub fn field_config(&self) -> &FieldConfig {
        &self.field_config
    }

    pub fn score_weights(&self) -> &[f32] {
        &self.score_weights
    }

    pub fn decode(&self, fields: &FieldSet, observer: &dyn DecodeObserver) -> Result<Vec<Annotation>> {
        let n_keypoints = self.n_keypoints();
        let mut cifs = Vec::with_capacity(self.field_config.scales.len());
        let mut cafs: Vec<Vec<CafField<'_>>> = Vec::with_capacity(self.field_config.scales.len());
        for scale in &self.field_config.scales {
            let cif = fields.cif(scale.cif_index, scale.min_scale)?;
            if cif.n_fields() != n_keypoints {
                return Err(DecodeError::malformed(
                    &fields.heads[scale.cif_index].name,
                    format!("expected {} keypoint fields, got {}", n_keypoints, cif.n_fields()),
                ));
            }

            let scale_cafs = scale
                .caf_indices
                .iter()
                .map(|&i| fields.caf(i))
                .collect::<Result<Vec<_>>>()?;
            let n_edges: usize = scale_cafs.iter().map(|c| c.n_fields()).sum();
            let caf_name = scale
                .caf_indices
                .first()
                .map_or("caf", |&i| fields.heads[i].name.as_str());
            if n_edges != self.edges.len() {
                return Err(DecodeError::malformed(
                    caf_name,
                    format!("expected {} edge fields, got {}", self.edges.len(), n_edges),
                ));
            }
            if let Some(caf) = scale_cafs
                .iter()
                .find(|c| c.n_fields() > 0 && c.grid() != cif.grid())
            {
                return Err(DecodeError::malformed(
                    caf_name,
                    format!("grid {:?} does not match cif grid {:?}", caf.grid(), cif.grid()),
                ));
            }

            cifs.push(cif);
            cafs.push(scale_cafs);
        }

        let cifhr = CifHr::from_cifs(&cifs, self.config.v_threshold, self.config.cif_neighbors);
        observer.cifhr(&cifhr);

        let mut seeds = CifSeeds::new(self.config.seed_threshold);
        for cif in &cifs {
            seeds.fill(cif);
        }
        let seeds = seeds.get();
        observer.seeds(&seeds);

        let mut caf_scored = CafScored::new(
            &cifhr,
            &self.edges,
            self.field_config.confidence_scales.as_deref(),
            self.config.connection_method,
            self.config.caf_threshold,
        );
        for (scale, scale_cafs) in self.field_config.scales.iter().zip(&cafs) {
            caf_scored.fill(scale_cafs, scale.min_distance, scale.max_distance);
        }

        let (h, w) = cifhr.shape();
        let mut occupancy = Occupancy::new(
            (n_keypoints, h, w),
            OCCUPANCY_REDUCTION,
            OCCUPANCY_MIN_SCALE,
        );

        let mut annotations = Vec::new();
        for seed in &seeds {
            if occupancy.is_occupied(seed.field, seed.x, seed.y) {
                continue;
            }
            let mut ann = Annotation::new(self.keypoints.clone(), self.skeleton.clone());
            ann.joints[seed.field] = Some(Joint::new(seed.x, seed.y, seed.scale, seed.score));
            occupancy.mark(seed.field, seed.x, seed.y, seed.scale);

            self.grow(&mut ann, seed.field, &caf_scored, &mut occupancy);
            if self.config.force_complete_pose {
                self.complete(&mut ann, &cifhr);
            }
            if let Some(ann) = self.finalize(ann, observer) {
                annotations.push(ann);
            }
        }
        observer.occupancy(&occupancy);

        annotations.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(
            seeds = seeds.len(),
            associations = self.edges.len(),
            annotations = annotations.len(),
            "cifcaf decoded"
        );
        Ok(annotations)
    }

    /// min_scale 不超过 `scale` 的最大尺度组; 比所有 min_scale 都小时用最小的一组
    fn scale_group(&self, scale: f32) -> &[usize] {
        self.scale_groups
            .iter()
            .rev()
            .find(|(min_scale, _)| *min_scale <= scale)
            .or_else(|| self.scale_groups.first())
            .map(|(_, members)| members.as_slice())
            .unwrap_or(&[])
    }

    fn grow(
        &self,
        ann: &mut Annotation,
        start: usize,
        caf_scored: &CafScored<'_>,
        occupancy: &mut Occupancy,
    ) {
        if self.config.greedy {
            let mut queue: VecDeque<(usize, Connection)> = self.by_source[start]
                .iter()
                .map(|c| (start, *c))
                .collect();
            while let Some((source, conn)) = queue.pop_front() {
                if ann.is_set(conn.target) {
                    continue;
                }
                let Some(src) = ann.joint(source).copied() else {
                    continue;
                };
                let Some(joint) = self.connection_value(&src, conn, caf_scored, occupancy) else {
                    continue;
                };
                Self::commit(ann, conn.target, joint, occupancy);
                queue.extend(self.by_source[conn.target].iter().map(|c| (conn.target, *c)));
            }
        } else {
            let mut heap = BinaryHeap::new();
            let mut seq = 0;
            self.push_frontier(&mut heap, &mut seq, ann, start, caf_scored, occupancy);
            while let Some(entry) = heap.pop() {
                if ann.is_set(entry.target) {
                    continue;
                }
                Self::commit(ann, entry.target, entry.joint, occupancy);
                self.push_frontier(&mut heap, &mut seq, ann, entry.target, caf_scored, occupancy);
            }
        }
    }

    fn push_frontier(
        &self,
        heap: &mut BinaryHeap<Frontier>,
        seq: &mut usize,
        ann: &Annotation,
        source: usize,
        caf_scored: &CafScored<'_>,
        occupancy: &Occupancy,
    ) {
        let Some(src) = ann.joint(source).copied() else {
            return;
        };
        for conn in &self.by_source[source] {
            if ann.is_set(conn.target) {
                continue;
            }
            if let Some(joint) = self.connection_value(&src, *conn, caf_scored, occupancy) {
                heap.push(Frontier {
                    score: joint.confidence,
                    edge: conn.edge,
                    seq: *seq,
                    target: conn.target,
                    joint,
                });
                *seq += 1;
            }
        }
    }

    /// 评估一条连接: 取分数最高且未被占据的候选, 可选反向匹配校验
    fn connection_value(
        &self,
        src: &Joint,
        conn: Connection,
        caf_scored: &CafScored<'_>,
        occupancy: &Occupancy,
    ) -> Option<Joint> {
        let keypoint_threshold = self.config.keypoint_threshold();
        let candidates = caf_scored.query(
            conn.edge,
            conn.forward,
            self.scale_group(src.scale),
            src.x,
            src.y,
            src.scale,
        );
        for cand in candidates {
            if occupancy.is_occupied(conn.target, cand.x, cand.y) {
                continue;
            }
            let confidence = (cand.score * src.confidence).sqrt().min(1.0);
            // 候选按分数降序, 后面的只会更低
            if confidence < keypoint_threshold {
                return None;
            }
            if self.config.reverse_match && !self.reverse_matches(src, &cand, conn, caf_scored) {
                continue;
            }
            return Some(Joint::new(cand.x, cand.y, cand.scale, confidence));
        }
        None
    }

    /// 从候选反向查询, 最佳结果须落在源关节附近 (L1 距离不超过源关节尺度)
    fn reverse_matches(
        &self,
        src: &Joint,
        cand: &Candidate,
        conn: Connection,
        caf_scored: &CafScored<'_>,
    ) -> bool {
        let back = caf_scored.query(
            conn.edge,
            !conn.forward,
            self.scale_group(cand.scale),
            cand.x,
            cand.y,
            cand.scale,
        );
        back.first().is_some_and(|b| {
            (b.x - src.x).abs() + (b.y - src.y).abs() <= src.scale.max(1.0)
        })
    }

    fn commit(ann: &mut Annotation, target: usize, joint: Joint, occupancy: &mut Occupancy) {
        ann.joints[target] = Some(joint);
        occupancy.mark(target, joint.x, joint.y, joint.scale);
    }

    /// 强制补全: 沿骨架边泛洪, 按静止姿态预测位置并在 CifHr 上就近取最大值
    fn complete(&self, ann: &mut Annotation, cifhr: &CifHr) {
        let n = ann.joints.len();
        if ann.n_set() == 0 || ann.n_set() == n {
            return;
        }
        let ratio = self.size_ratio(ann);

        let mut heap = BinaryHeap::new();
        let mut seq = 0;
        for source in 0..n {
            if let Some(joint) = ann.joint(source) {
                self.push_completions(&mut heap, &mut seq, ann, source, joint.confidence);
            }
        }
        while let Some(entry) = heap.pop() {
            if ann.is_set(entry.target) {
                continue;
            }
            let Some(src) = ann.joint(entry.source).copied() else {
                continue;
            };
            ann.joints[entry.target] =
                Some(self.forced_joint(entry.source, entry.target, &src, ratio, cifhr));
            self.push_completions(&mut heap, &mut seq, ann, entry.target, 0.0);
        }

        // 与已设置关节不连通的关节, 以置信度最高的关节为锚点
        let anchor = (0..n)
            .filter_map(|i| ann.joint(i).map(|j| (i, *j)))
            .fold(None, |best: Option<(usize, Joint)>, (i, j)| match best {
                Some((_, b)) if b.confidence >= j.confidence => best,
                _ => Some((i, j)),
            });
        let Some((anchor, anchor_joint)) = anchor else {
            return;
        };
        for target in 0..n {
            if !ann.is_set(target) {
                ann.joints[target] =
                    Some(self.forced_joint(anchor, target, &anchor_joint, ratio, cifhr));
            }
        }
    }

    fn push_completions(
        &self,
        heap: &mut BinaryHeap<Completion>,
        seq: &mut usize,
        ann: &Annotation,
        source: usize,
        confidence: f32,
    ) {
        for conn in &self.by_source[source] {
            if !ann.is_set(conn.target) {
                heap.push(Completion {
                    confidence,
                    seq: *seq,
                    source,
                    target: conn.target,
                });
                *seq += 1;
            }
        }
    }

    fn forced_joint(
        &self,
        source: usize,
        target: usize,
        src: &Joint,
        ratio: Option<f32>,
        cifhr: &CifHr,
    ) -> Joint {
        let (px, py) = match (self.rest_pose.as_deref(), ratio) {
            (Some(rest), Some(ratio)) => (
                src.x + (rest[target].0 - rest[source].0) * ratio,
                src.y + (rest[target].1 - rest[source].1) * ratio,
            ),
            _ => (src.x, src.y),
        };
        let (x, y) = cifhr
            .argmax_near(target, px, py, src.scale.max(1.0))
            .map_or((px, py), |(x, y, _)| (x, y));
        Joint::forced(x, y, src.scale)
    }

    /// 实例与静止姿态的尺寸比: 两端都已设置的边上 观测长度/静止长度 的均值
    fn size_ratio(&self, ann: &Annotation) -> Option<f32> {
        let rest = self.rest_pose.as_deref()?;
        let ratios: Vec<f32> = self
            .edges
            .iter()
            .filter_map(|&(a, b)| {
                let (ja, jb) = (ann.joint(a)?, ann.joint(b)?);
                let rest_length = (rest[a].0 - rest[b].0).hypot(rest[a].1 - rest[b].1);
                if rest_length <= 0.0 {
                    return None;
                }
                Some((ja.x - jb.x).hypot(ja.y - jb.y) / rest_length)
            })
            .collect();
        if ratios.is_empty() {
            return None;
        }
        Some(ratios.iter().sum::<f32>() / ratios.len() as f32)
    }

    fn finalize(&self, mut ann: Annotation, observer: &dyn DecodeObserver) -> Option<Annotation> {
        let threshold = self.config.keypoint_threshold();
        for joint in ann.joints.iter_mut() {
            if matches!(joint, Some(j) if !j.forced && j.confidence < threshold) {
                *joint = None;
            }
        }
        ann.rescore(&self.score_weights);
        observer.instance(&ann);
        (ann.score >= self.config.instance_threshold && ann.n_confident() > 0).then_some(ann)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionMethod, ScaleConfig};
    use crate::decoder::observer::NoopObserver;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    const STRIDE: u32 = 4;

    fn cif_peak(data: &mut Array4<f32>, k: usize, x: f32, y: f32, c: f32, scale: f32) {
        let s = STRIDE as f32;
        let (col, row) = ((x / s) as usize, (y / s) as usize);
        data[[k, 0, row, col]] = c;
        data[[k, 1, row, col]] = x / s - col as f32;
        data[[k, 2, row, col]] = y / s - row as f32;
        data[[k, 3, row, col]] = scale / s;
    }

    fn caf_link(data: &mut Array4<f32>, e: usize, p1: (f32, f32), p2: (f32, f32), c: f32) {
        let s = STRIDE as f32;
        let col = ((p1.0 + p2.0) / 2.0 / s).round() as usize;
        let row = ((p1.1 + p2.1) / 2.0 / s).round() as usize;
        data[[e, 0, row, col]] = c;
        data[[e, 1, row, col]] = p1.0 / s - col as f32;
        data[[e, 2, row, col]] = p1.1 / s - row as f32;
        data[[e, 3, row, col]] = p2.0 / s - col as f32;
        data[[e, 4, row, col]] = p2.1 / s - row as f32;
        data[[e, 5, row, col]] = 1.0;
        data[[e, 6, row, col]] = 1.0;
    }

    fn chain_skeleton(n: usize) -> Skeleton {
        Skeleton::new(
            (0..n).map(|i| format!("k{}", i)).collect(),
            (1..n).map(|i| (i, i + 1)).collect(),
        )
        .with_rest_pose((0..n).map(|i| (i as f32, 0.0)).collect())
    }

    fn test_config() -> DecoderConfig {
        DecoderConfig {
            cif_neighbors: 1.0,
            connection_method: ConnectionMethod::Max,
            force_complete_pose: false,
            ..Default::default()
        }
    }

    /// 关节 0 在 (8, 8), 关节 1 在 (24, 8); `linked` 为真时 CAF 连接两者
    fn two_joint_fields(linked: bool) -> FieldSet {
        let mut cif = Array4::<f32>::zeros((2, 4, 12, 12));
        cif_peak(&mut cif, 0, 8.0, 8.0, 0.9, 4.0);
        cif_peak(&mut cif, 1, 24.0, 8.0, 0.8, 4.0);
        let mut caf = Array4::<f32>::zeros((1, 7, 12, 12));
        if linked {
            caf_link(&mut caf, 0, (8.0, 8.0), (24.0, 8.0), 0.9);
        }
        FieldSet::default()
            .push("cif", STRIDE, cif)
            .push("caf", STRIDE, caf)
    }

    fn decode(config: &DecoderConfig, skeleton: &Skeleton, fields: &FieldSet) -> Vec<Annotation> {
        let field_config = FieldConfig::from_config(config, skeleton);
        CifCaf::new(skeleton, config, field_config)
            .unwrap()
            .decode(fields, &NoopObserver)
            .unwrap()
    }

    #[test]
    fn test_connected_pair() {
        let anns = decode(&test_config(), &chain_skeleton(2), &two_joint_fields(true));
        assert_eq!(anns.len(), 1);
        let j1 = anns[0].joint(1).unwrap();
        assert_eq!((j1.x, j1.y), (24.0, 8.0));
        assert_relative_eq!(j1.confidence, (0.8f32 * 0.9).sqrt(), epsilon = 1e-5);
        assert_relative_eq!(anns[0].score, 0.5 * 0.9 + 0.5 * (0.8f32 * 0.9).sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_greedy_matches_heap_on_chain() {
        let config = DecoderConfig {
            greedy: true,
            ..test_config()
        };
        let greedy = decode(&config, &chain_skeleton(2), &two_joint_fields(true));
        let heap = decode(&test_config(), &chain_skeleton(2), &two_joint_fields(true));
        assert_eq!(greedy, heap);
    }

    #[test]
    fn test_missing_caf_leaves_joint_absent() {
        let anns = decode(&test_config(), &chain_skeleton(2), &two_joint_fields(false));
        // 两个关节各自成为独立实例
        assert_eq!(anns.len(), 2);
        assert!(anns[0].joint(1).is_none());
        assert_relative_eq!(anns[0].score, 0.45, epsilon = 1e-6);
        assert_relative_eq!(anns[1].score, 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_force_complete_uses_rest_pose() {
        let mut cif = Array4::<f32>::zeros((3, 4, 12, 12));
        cif_peak(&mut cif, 0, 8.0, 8.0, 0.9, 4.0);
        cif_peak(&mut cif, 1, 24.0, 8.0, 0.8, 4.0);
        // 低于种子阈值, 但在 CifHr 中可见
        cif_peak(&mut cif, 2, 40.0, 8.0, 0.15, 4.0);
        let mut caf = Array4::<f32>::zeros((2, 7, 12, 12));
        caf_link(&mut caf, 0, (8.0, 8.0), (24.0, 8.0), 0.9);
        let fields = FieldSet::default()
            .push("cif", STRIDE, cif)
            .push("caf", STRIDE, caf);

        let config = DecoderConfig {
            force_complete_pose: true,
            ..test_config()
        };
        let anns = decode(&config, &chain_skeleton(3), &fields);
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].n_set(), 3);
        let forced = anns[0].joint(2).unwrap();
        assert!(forced.forced);
        assert_eq!(forced.confidence, 0.0);
        assert_eq!((forced.x, forced.y), (40.0, 8.0));
        assert!(!anns[0].joint(1).unwrap().forced);
    }

    #[test]
    fn test_force_complete_without_edges() {
        let mut cif = Array4::<f32>::zeros((2, 4, 6, 6));
        cif_peak(&mut cif, 0, 8.0, 8.0, 0.9, 4.0);
        let fields = FieldSet::default()
            .push("cif", STRIDE, cif)
            .push("caf", STRIDE, Array4::zeros((0, 7, 6, 6)));
        let skeleton = Skeleton::new(vec!["a".into(), "b".into()], Vec::new());
        let config = DecoderConfig {
            force_complete_pose: true,
            ..test_config()
        };
        let anns = decode(&config, &skeleton, &fields);
        assert_eq!(anns.len(), 1);
        let forced = anns[0].joint(1).unwrap();
        assert!(forced.forced);
        assert_eq!((forced.x, forced.y), (8.0, 8.0));
    }

    #[test]
    fn test_wrong_field_count_is_malformed() {
        let skeleton = chain_skeleton(3);
        let config = test_config();
        let decoder =
            CifCaf::new(&skeleton, &config, FieldConfig::from_config(&config, &skeleton)).unwrap();
        let result = decoder.decode(&two_joint_fields(true), &NoopObserver);
        assert!(matches!(result, Err(DecodeError::MalformedField { .. })));
    }

    #[test]
    fn test_scale_group_selection() {
        let scale = |min_scale: f32, cif_index: usize| ScaleConfig {
            cif_index,
            caf_indices: vec![cif_index + 1],
            min_scale,
            min_distance: 0.0,
            max_distance: None,
        };
        let field_config = FieldConfig {
            scales: vec![scale(8.0, 0), scale(16.0, 2), scale(8.0, 4)],
            confidence_scales: None,
        };
        let decoder = CifCaf::new(&chain_skeleton(2), &test_config(), field_config).unwrap();
        assert_eq!(decoder.scale_group(2.0), &[0, 2]);
        assert_eq!(decoder.scale_group(12.0), &[0, 2]);
        assert_eq!(decoder.scale_group(30.0), &[1]);
    }

    #[test]
    fn test_frontier_order() {
        let entry = |score: f32, edge: usize, seq: usize| Frontier {
            score,
            edge,
            seq,
            target: 0,
            joint: Joint::default(),
        };
        let mut heap = BinaryHeap::new();
        heap.push(entry(0.5, 3, 0));
        heap.push(entry(0.9, 4, 1));
        heap.push(entry(0.5, 1, 2));
        heap.push(entry(0.5, 1, 3));
        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|e| (e.edge, e.seq))
            .collect();
        assert_eq!(order, vec![(4, 1), (1, 2), (1, 3), (3, 0)]);
    }

    #[test]
    fn test_confidence_scales_length_checked() {
        let skeleton = chain_skeleton(2);
        let config = test_config();
        let field_config = FieldConfig {
            confidence_scales: Some(vec![1.0, 1.0]),
            ..FieldConfig::single(false)
        };
        assert!(matches!(
            CifCaf::new(&skeleton, &config, field_config),
            Err(ConfigError::LengthMismatch { .. })
        ));
    }
}
