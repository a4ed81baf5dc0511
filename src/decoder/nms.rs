// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 后处理抑制:
// - 检测框: 同类别 IoU 非极大值抑制
// - 关键点: 高分实例先占据关节位置, 低分实例落在已占区域的关节被抑制

use crate::annotation::{Annotation, AnnotationDet, Joint};
use crate::decoder::occupancy::Occupancy;

const KEYPOINT_REDUCTION: f32 = 2.0;
const KEYPOINT_MIN_SCALE: f32 = 4.0;

/// 检测框 NMS, 结果按分数降序
pub fn non_max_suppression(xs: &mut Vec<AnnotationDet>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.score.total_cmp(&b1.score));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].category_id != xs[index].category_id {
                continue;
            }
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 关键点 NMS 参数
#[derive(Debug, Clone, Copy)]
pub struct KeypointNms<'a> {
    /// 图像尺寸 (H, W)
    pub shape: (usize, usize),
    pub keypoint_threshold: f32,
    pub instance_threshold: f32,
    /// 被抑制的关节保留位置并置为强制关节 (强制补全模式), 否则删除
    pub keep_suppressed: bool,
    pub score_weights: &'a [f32],
}

impl KeypointNms<'_> {
    pub fn apply(&self, mut annotations: Vec<Annotation>) -> Vec<Annotation> {
        annotations.sort_by(|a, b| b.score.total_cmp(&a.score));
        let n_keypoints = annotations.first().map_or(0, |a| a.joints.len());
        let mut occupancy = Occupancy::new(
            (n_keypoints, self.shape.0, self.shape.1),
            KEYPOINT_REDUCTION,
            KEYPOINT_MIN_SCALE,
        );

        for ann in annotations.iter_mut() {
            for (f, slot) in ann.joints.iter_mut().enumerate() {
                let Some(joint) = *slot else {
                    continue;
                };
                if joint.forced || joint.confidence <= 0.0 {
                    continue;
                }
                if occupancy.is_occupied(f, joint.x, joint.y) {
                    *slot = self
                        .keep_suppressed
                        .then(|| Joint::forced(joint.x, joint.y, joint.scale));
                } else {
                    occupancy.mark(f, joint.x, joint.y, joint.scale);
                }
            }
        }

        for ann in annotations.iter_mut() {
            for slot in ann.joints.iter_mut() {
                if matches!(slot, Some(j) if !j.forced && j.confidence < self.keypoint_threshold) {
                    *slot = None;
                }
            }
            ann.rescore(self.score_weights);
        }
        annotations.retain(|a| a.score >= self.instance_threshold && a.n_confident() > 0);
        annotations.sort_by(|a, b| b.score.total_cmp(&a.score));
        annotations
    }
}
