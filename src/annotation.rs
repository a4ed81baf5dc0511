// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 解码输出: 姿态实例与检测框

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 单个关节 (图像坐标)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Joint {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub confidence: f32,
    /// 由强制补全填入 (置信度恒为 0)
    pub forced: bool,
}

impl Joint {
    pub fn new(x: f32, y: f32, scale: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            scale,
            confidence,
            forced: false,
        }
    }

    pub fn forced(x: f32, y: f32, scale: f32) -> Self {
        Self {
            x,
            y,
            scale,
            confidence: 0.0,
            forced: true,
        }
    }
}

/// 姿态实例
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    /// 关键点名称
    pub keypoints: Arc<Vec<String>>,
    /// 输出骨架 (1-based, 不含稠密辅助边)
    pub skeleton: Arc<Vec<(usize, usize)>>,
    pub joints: Vec<Option<Joint>>,
    pub score: f32,
}

impl Annotation {
    pub fn new(keypoints: Arc<Vec<String>>, skeleton: Arc<Vec<(usize, usize)>>) -> Self {
        let n = keypoints.len();
        Self {
            keypoints,
            skeleton,
            joints: vec![None; n],
            score: 0.0,
        }
    }

    pub fn joint(&self, i: usize) -> Option<&Joint> {
        self.joints.get(i).and_then(|j| j.as_ref())
    }

    pub fn is_set(&self, i: usize) -> bool {
        self.joint(i).is_some()
    }

    /// 已设置的关节数
    pub fn n_set(&self) -> usize {
        self.joints.iter().flatten().count()
    }

    /// 置信度大于 0 的关节数
    pub fn n_confident(&self) -> usize {
        self.joints.iter().flatten().filter(|j| j.confidence > 0.0).count()
    }

    /// 已设置关节的外接框
    pub fn bbox(&self) -> Option<Bbox> {
        let mut joints = self.joints.iter().flatten();
        let first = joints.next()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
        for j in joints {
            x0 = x0.min(j.x);
            y0 = y0.min(j.y);
            x1 = x1.max(j.x);
            y1 = y1.max(j.y);
        }
        Some(Bbox::new(x0, y0, x1 - x0, y1 - y0, self.score))
    }

    /// 按权重计算实例评分: 置信度降序后与归一化权重逐项相乘求和
    pub(crate) fn rescore(&mut self, weights: &[f32]) {
        let mut v: Vec<f32> = self
            .joints
            .iter()
            .map(|j| j.map_or(0.0, |j| j.confidence))
            .collect();
        v.sort_by(|a, b| b.total_cmp(a));
        self.score = v.iter().zip(weights).map(|(v, w)| v * w).sum();
    }
}

/// 检测框 (左上角 + 宽高)
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Bbox {
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            confidence,
        }
    }

    /// 以 (cx, cy) 为中心
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self::new(cx - width / 2., cy - height / 2., width, height, confidence)
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    /// 交并比, 退化框 (并集为 0) 返回 0
    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 检测实例 (CifDet)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationDet {
    pub category: String,
    /// 1-based
    pub category_id: usize,
    pub score: f32,
    pub bbox: Bbox,
}

/// 一张图片的解码结果
#[derive(Clone, PartialEq, Default, Serialize)]
pub struct DecodeResult {
    pub annotations: Vec<Annotation>,
    pub detections: Vec<AnnotationDet>,
}

impl std::fmt::Debug for DecodeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeResult")
            .field(
                "Annotations",
                &format_args!(
                    "{} (scores {:?})",
                    self.annotations.len(),
                    self.annotations.iter().map(|a| a.score).collect::<Vec<_>>()
                ),
            )
            .field("Detections", &self.detections)
            .finish()
    }
}

impl DecodeResult {
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty() && self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn annotation(n: usize) -> Annotation {
        Annotation::new(
            Arc::new((0..n).map(|i| format!("k{}", i)).collect()),
            Arc::new(Vec::new()),
        )
    }

    #[test]
    fn test_bbox_of_joints() {
        let mut ann = annotation(3);
        assert!(ann.bbox().is_none());
        ann.joints[0] = Some(Joint::new(10.0, 20.0, 1.0, 0.5));
        ann.joints[2] = Some(Joint::forced(30.0, 5.0, 1.0));
        let bbox = ann.bbox().unwrap();
        assert_eq!((bbox.xmin(), bbox.ymin()), (10.0, 5.0));
        assert_eq!((bbox.width(), bbox.height()), (20.0, 15.0));
        assert_eq!(ann.n_set(), 2);
        assert_eq!(ann.n_confident(), 1);
    }

    #[test]
    fn test_rescore_sorted_weights() {
        let mut ann = annotation(4);
        ann.joints[3] = Some(Joint::new(0.0, 0.0, 1.0, 0.9));
        ann.joints[0] = Some(Joint::new(0.0, 0.0, 1.0, 0.3));
        ann.rescore(&[0.5, 0.25, 0.25, 0.0]);
        assert_relative_eq!(ann.score, 0.9 * 0.5 + 0.3 * 0.25);
    }

    #[test]
    fn test_iou() {
        let a = Bbox::new(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = Bbox::new(5.0, 0.0, 10.0, 10.0, 1.0);
        assert_relative_eq!(a.iou(&b), 50.0 / 150.0);
        assert_eq!(a.iou(&Bbox::new(20.0, 20.0, 1.0, 1.0, 1.0)), 0.0);
        assert_eq!(Bbox::default().iou(&Bbox::default()), 0.0);
        let c = Bbox::from_center(5.0, 5.0, 10.0, 10.0, 1.0);
        assert_relative_eq!(a.iou(&c), 1.0);
    }
}
