// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 占用网格: 按类别记录已被实例占据的粗粒度区域
// 标记只增不减, 每次解码调用新建一个

use ndarray::Array3;

#[derive(Debug, Clone, PartialEq)]
pub struct Occupancy {
    occupancy: Array3<bool>,
    reduction: f32,
    min_scale_reduced: f32,
}

impl Occupancy {
    /// `shape` 为 (类别数, 图像高, 图像宽)
    pub fn new(shape: (usize, usize, usize), reduction: f32, min_scale: f32) -> Self {
        let (n, h, w) = shape;
        Self {
            occupancy: Array3::from_elem(
                (n, (h as f32 / reduction) as usize + 1, (w as f32 / reduction) as usize + 1),
                false,
            ),
            reduction,
            min_scale_reduced: min_scale / reduction,
        }
    }

    pub fn n_fields(&self) -> usize {
        self.occupancy.dim().0
    }

    pub fn grid(&self) -> &Array3<bool> {
        &self.occupancy
    }

    /// 占据 (x, y) 周围半宽 max(min_scale, scale) 的方形区域
    pub fn mark(&mut self, f: usize, x: f32, y: f32, scale: f32) {
        let (n, h, w) = self.occupancy.dim();
        if f >= n || !x.is_finite() || !y.is_finite() {
            return;
        }
        let (xr, yr) = (x / self.reduction, y / self.reduction);
        let half = self.min_scale_reduced.max(scale / self.reduction);
        let half = if half.is_finite() { half } else { self.min_scale_reduced };

        // 越界点截断到最近的边缘单元, 至少占据一个单元
        let range = |c: f32, len: usize| -> (usize, usize) {
            let last = (len - 1) as f32;
            let lo = (c - half).floor().clamp(0.0, last);
            let hi = (c + half).floor().clamp(0.0, last);
            (lo as usize, hi as usize)
        };
        let ((minx, maxx), (miny, maxy)) = (range(xr, w), range(yr, h));
        for yy in miny..=maxy {
            for xx in minx..=maxx {
                self.occupancy[[f, yy, xx]] = true;
            }
        }
    }

    /// (x, y) 所在单元是否已被占据 (坐标截断到网格内); 越界类别视为已占据
    pub fn is_occupied(&self, f: usize, x: f32, y: f32) -> bool {
        let (n, h, w) = self.occupancy.dim();
        if f >= n {
            return true;
        }
        if !x.is_finite() || !y.is_finite() {
            return true;
        }
        let xi = (x / self.reduction).floor().clamp(0.0, (w - 1) as f32) as usize;
        let yi = (y / self.reduction).floor().clamp(0.0, (h - 1) as f32) as usize;
        self.occupancy[[f, yi, xi]]
    }

    pub fn count(&self) -> usize {
        self.occupancy.iter().filter(|o| **o).count()
    }
}
