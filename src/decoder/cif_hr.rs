// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// CifHr: 把低分辨率 CIF 场光栅化到图像分辨率的置信度面
// 每个可见单元在 (x, y) 处叠加一个截断高斯核, 累加并封顶, 不做平均

use ndarray::{Array3, ArrayViewMut2, Axis};

use crate::fields::{CifDetField, CifField};

/// 高斯核截断半径 (以 sigma 为单位)
const TRUNCATE: f32 = 1.0;
/// 累加上限
const MAX_VALUE: f32 = 1.0;

/// 高分辨率置信度面 (每个关键点类别一个通道)
#[derive(Debug, Clone, PartialEq)]
pub struct CifHr {
    accumulated: Array3<f32>,
    v_threshold: f32,
    neighbors: f32,
}

impl CifHr {
    pub fn new(n_fields: usize, shape: (usize, usize), v_threshold: f32, neighbors: f32) -> Self {
        Self {
            accumulated: Array3::zeros((n_fields, shape.0, shape.1)),
            v_threshold,
            neighbors,
        }
    }

    /// 直接使用已光栅化的置信度面
    pub fn from_accumulated(accumulated: Array3<f32>, v_threshold: f32, neighbors: f32) -> Self {
        Self {
            accumulated,
            v_threshold,
            neighbors,
        }
    }

    /// 由多个尺度的 CIF 场构建, 输出尺寸取各尺度的最大值
    pub fn from_cifs(cifs: &[CifField<'_>], v_threshold: f32, neighbors: f32) -> Self {
        let n_fields = cifs.first().map(|c| c.n_fields()).unwrap_or(0);
        let shape = cifs
            .iter()
            .map(|c| c.hr_shape())
            .fold((0, 0), |a, b| (a.0.max(b.0), a.1.max(b.1)));
        let mut cifhr = Self::new(n_fields, shape, v_threshold, neighbors);
        for cif in cifs {
            cifhr.accumulate(cif, cifs.len());
        }
        cifhr
    }

    /// 由 CifDet 场构建 (核宽度取检测框短边的 0.1 倍)
    pub fn from_cifdets(fields: &[CifDetField<'_>], v_threshold: f32, neighbors: f32) -> Self {
        let n_fields = fields.first().map(|c| c.n_fields()).unwrap_or(0);
        let shape = fields
            .iter()
            .map(|c| c.hr_shape())
            .fold((0, 0), |a, b| (a.0.max(b.0), a.1.max(b.1)));
        let mut cifhr = Self::new(n_fields, shape, v_threshold, neighbors);
        let n_scales = fields.len() as f32;
        for field in fields {
            for k in 0..field.n_fields().min(n_fields) {
                let mut plane = cifhr.accumulated.index_axis_mut(Axis(0), k);
                for v in field.vectors(k, 0.0).filter(|v| v.confidence > v_threshold) {
                    let sigma = (0.1 * v.w.min(v.h)).max(1.0);
                    add_gauss_with_max(
                        &mut plane,
                        v.x,
                        v.y,
                        sigma,
                        v.confidence / neighbors / n_scales,
                    );
                }
            }
        }
        cifhr
    }

    fn accumulate(&mut self, cif: &CifField<'_>, n_scales: usize) {
        let n_scales = n_scales.max(1) as f32;
        let n_fields = cif.n_fields().min(self.accumulated.dim().0);
        let (v_threshold, neighbors) = (self.v_threshold, self.neighbors);
        for k in 0..n_fields {
            let mut plane = self.accumulated.index_axis_mut(Axis(0), k);
            for v in cif.vectors(k, 0.0).filter(|v| v.confidence > v_threshold) {
                let sigma = (0.5 * v.scale).max(1.0);
                add_gauss_with_max(
                    &mut plane,
                    v.x,
                    v.y,
                    sigma,
                    v.confidence / neighbors / n_scales,
                );
            }
        }
    }

    pub fn accumulated(&self) -> &Array3<f32> {
        &self.accumulated
    }

    pub fn n_fields(&self) -> usize {
        self.accumulated.dim().0
    }

    /// (H, W)
    pub fn shape(&self) -> (usize, usize) {
        let (_, h, w) = self.accumulated.dim();
        (h, w)
    }

    /// 最近像素取值, 越界返回 0
    pub fn value(&self, f: usize, x: f32, y: f32) -> f32 {
        let (n, h, w) = self.accumulated.dim();
        if f >= n || !x.is_finite() || !y.is_finite() {
            return 0.0;
        }
        let (xi, yi) = (x.round(), y.round());
        if xi < 0.0 || yi < 0.0 || xi >= w as f32 || yi >= h as f32 {
            return 0.0;
        }
        self.accumulated[[f, yi as usize, xi as usize]]
    }

    /// 双线性插值取值, 越界部分按 0 处理
    pub fn value_interpolated(&self, f: usize, x: f32, y: f32) -> f32 {
        let (n, h, w) = self.accumulated.dim();
        if f >= n || !x.is_finite() || !y.is_finite() {
            return 0.0;
        }
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let at = |xx: f32, yy: f32| -> f32 {
            if xx < 0.0 || yy < 0.0 || xx >= w as f32 || yy >= h as f32 {
                0.0
            } else {
                self.accumulated[[f, yy as usize, xx as usize]]
            }
        };
        at(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + at(x0 + 1.0, y0) * fx * (1.0 - fy)
            + at(x0, y0 + 1.0) * (1.0 - fx) * fy
            + at(x0 + 1.0, y0 + 1.0) * fx * fy
    }

    /// 在 (x, y) 周围 radius 像素的方窗内寻找最大值位置
    ///
    /// 返回 (x, y, value); 窗口全为 0 或完全越界时返回 None.
    /// 同值时取行优先的第一个.
    pub fn argmax_near(&self, f: usize, x: f32, y: f32, radius: f32) -> Option<(f32, f32, f32)> {
        let (n, h, w) = self.accumulated.dim();
        if f >= n || h == 0 || w == 0 || !x.is_finite() || !y.is_finite() {
            return None;
        }
        let lo = |c: f32, len: usize| (c - radius).floor().clamp(0.0, (len - 1) as f32) as usize;
        let hi = |c: f32, len: usize| (c + radius).ceil().clamp(0.0, (len - 1) as f32) as usize;
        let (minx, maxx, miny, maxy) = (lo(x, w), hi(x, w), lo(y, h), hi(y, h));

        let mut best: Option<(f32, f32, f32)> = None;
        for yy in miny..=maxy {
            for xx in minx..=maxx {
                let v = self.accumulated[[f, yy, xx]];
                if v > best.map_or(0.0, |b| b.2) {
                    best = Some((xx as f32, yy as f32, v));
                }
            }
        }
        best
    }
}

/// 在 (x, y) 处叠加截断高斯核, 结果封顶为 MAX_VALUE
fn add_gauss_with_max(plane: &mut ArrayViewMut2<'_, f32>, x: f32, y: f32, sigma: f32, v: f32) {
    let (h, w) = plane.dim();
    if h == 0 || w == 0 || !x.is_finite() || !y.is_finite() {
        return;
    }
    let radius = TRUNCATE * sigma;
    if x + radius < 0.0 || y + radius < 0.0 || x - radius > (w - 1) as f32 || y - radius > (h - 1) as f32
    {
        return;
    }
    let minx = (x - radius).ceil().max(0.0) as usize;
    let maxx = ((x + radius).floor() as usize).min(w - 1);
    let miny = (y - radius).ceil().max(0.0) as usize;
    let maxy = ((y + radius).floor() as usize).min(h - 1);

    let sigma2 = sigma * sigma;
    for yy in miny..=maxy {
        let dy = yy as f32 - y;
        for xx in minx..=maxx {
            let dx = xx as f32 - x;
            let vv = v * (-0.5 * (dx * dx + dy * dy) / sigma2).exp();
            let t = &mut plane[[yy, xx]];
            *t = (*t + vv).min(MAX_VALUE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldSet;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    fn single_cif(c: f32, row: usize, col: usize, scale: f32) -> FieldSet {
        let mut data = Array4::<f32>::zeros((2, 4, 5, 5));
        data[[0, 0, row, col]] = c;
        data[[0, 3, row, col]] = scale;
        FieldSet::default().push("cif", 4, data)
    }

    #[test]
    fn test_accumulate_peak_at_center() {
        let fields = single_cif(0.8, 2, 2, 2.0);
        let cifhr = CifHr::from_cifs(&[fields.cif(0, 0.0).unwrap()], 0.1, 1.0);
        assert_eq!(cifhr.shape(), (17, 17));
        assert_relative_eq!(cifhr.value(0, 8.0, 8.0), 0.8, epsilon = 1e-6);
        assert!(cifhr.value(0, 9.0, 8.0) < 0.8);
        assert!(cifhr.value(0, 9.0, 8.0) > 0.0);
        // 截断半径之外为 0
        assert_eq!(cifhr.value(0, 13.0, 8.0), 0.0);
        // 其他类别保持为 0
        assert_eq!(cifhr.accumulated().index_axis(Axis(0), 1).sum(), 0.0);
    }

    #[test]
    fn test_below_v_threshold_ignored() {
        let fields = single_cif(0.05, 2, 2, 2.0);
        let cifhr = CifHr::from_cifs(&[fields.cif(0, 0.0).unwrap()], 0.1, 1.0);
        assert_eq!(cifhr.accumulated().sum(), 0.0);
    }

    #[test]
    fn test_accumulation_capped() {
        let mut plane = Array3::<f32>::zeros((1, 5, 5));
        let mut view = plane.index_axis_mut(Axis(0), 0);
        for _ in 0..5 {
            add_gauss_with_max(&mut view, 2.0, 2.0, 1.0, 0.4);
        }
        assert_relative_eq!(plane[[0, 2, 2]], 1.0);
    }

    #[test]
    fn test_neighbors_normalization() {
        let fields = single_cif(0.8, 2, 2, 2.0);
        let cifhr = CifHr::from_cifs(&[fields.cif(0, 0.0).unwrap()], 0.1, 16.0);
        assert_relative_eq!(cifhr.value(0, 8.0, 8.0), 0.05, epsilon = 1e-6);
    }

    #[test]
    fn test_interpolation() {
        let mut cifhr = CifHr::new(1, (3, 3), 0.1, 1.0);
        cifhr.accumulated[[0, 1, 1]] = 1.0;
        assert_relative_eq!(cifhr.value_interpolated(0, 1.0, 1.0), 1.0);
        assert_relative_eq!(cifhr.value_interpolated(0, 1.5, 1.0), 0.5);
        assert_relative_eq!(cifhr.value_interpolated(0, 1.5, 1.5), 0.25);
        assert_eq!(cifhr.value_interpolated(0, -5.0, 1.0), 0.0);
    }

    #[test]
    fn test_argmax_near() {
        let mut cifhr = CifHr::new(1, (10, 10), 0.1, 1.0);
        cifhr.accumulated[[0, 4, 6]] = 0.3;
        cifhr.accumulated[[0, 8, 8]] = 0.9;
        assert_eq!(cifhr.argmax_near(0, 5.0, 5.0, 2.0), Some((6.0, 4.0, 0.3)));
        assert_eq!(cifhr.argmax_near(0, 1.0, 1.0, 1.0), None);
    }
}
