// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 网络输出场 (Field) 的只读视图
//!
//! 每个 head 是一个 `[n_fields, channels, H, W]` 张量, 附带下采样步长:
//! - cif:    channels = [c, dx, dy, s]
//! - caf:    channels = [c, dx1, dy1, dx2, dy2, s1, s2]
//! - cifdet: channels = [c, dx, dy, w, h]
//!
//! 偏移与尺度均为网格单位, 图像坐标 = (网格索引 + 偏移) * stride

use ndarray::{s, Array4, ArrayView2, ArrayView4};
use phf::phf_map;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

/// Head 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadKind {
    Cif,
    Caf,
    Caf25,
    CifDet,
}

static HEAD_KINDS: phf::Map<&'static str, HeadKind> = phf_map! {
    "cif" => HeadKind::Cif,
    "caf" => HeadKind::Caf,
    "caf25" => HeadKind::Caf25,
    "cifdet" => HeadKind::CifDet,
};

impl HeadKind {
    pub fn from_name(name: &str) -> Option<Self> {
        HEAD_KINDS.get(name).copied()
    }

    /// 每个场的通道数
    pub fn channels(&self) -> usize {
        match self {
            HeadKind::Cif => 4,
            HeadKind::Caf | HeadKind::Caf25 => 7,
            HeadKind::CifDet => 5,
        }
    }

    fn is_caf(&self) -> bool {
        matches!(self, HeadKind::Caf | HeadKind::Caf25)
    }
}

/// 单个 head 的输出张量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Head {
    pub name: String,
    pub stride: u32,
    pub data: Array4<f32>,
}

impl Head {
    pub fn new(name: impl Into<String>, stride: u32, data: Array4<f32>) -> Self {
        Self {
            name: name.into(),
            stride,
            data,
        }
    }

    pub fn kind(&self) -> Option<HeadKind> {
        HeadKind::from_name(&self.name)
    }

    /// (n_fields, H, W)
    pub fn grid(&self) -> (usize, usize, usize) {
        let (n, _, h, w) = self.data.dim();
        (n, h, w)
    }
}

/// 一次解码调用的全部输入场
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSet {
    pub heads: Vec<Head>,
}

impl FieldSet {
    pub fn new(heads: Vec<Head>) -> Self {
        Self { heads }
    }

    pub fn push(mut self, name: impl Into<String>, stride: u32, data: Array4<f32>) -> Self {
        self.heads.push(Head::new(name, stride, data));
        self
    }

    pub fn head_names(&self) -> Vec<&str> {
        self.heads.iter().map(|h| h.name.as_str()).collect()
    }

    /// 输入图像尺寸 (H, W), 取各 head 高分辨率尺寸的最大值
    pub fn image_shape(&self) -> (usize, usize) {
        self.heads
            .iter()
            .map(|head| {
                let (_, _, h, w) = head.data.dim();
                let stride = head.stride as usize;
                (h.saturating_sub(1) * stride + 1, w.saturating_sub(1) * stride + 1)
            })
            .fold((0, 0), |a, b| (a.0.max(b.0), a.1.max(b.1)))
    }

    /// 取出并校验指定类型的 head
    fn checked(&self, index: usize, expect: fn(HeadKind) -> bool) -> Result<&Head> {
        let head = self.heads.get(index).ok_or_else(|| {
            DecodeError::malformed(
                format!("#{}", index),
                format!("head index out of range ({} heads)", self.heads.len()),
            )
        })?;
        let kind = head
            .kind()
            .filter(|k| expect(*k))
            .ok_or_else(|| DecodeError::malformed(&head.name, "unexpected head type"))?;
        let channels = head.data.dim().1;
        if channels != kind.channels() {
            return Err(DecodeError::malformed(
                &head.name,
                format!("expected {} channels, got {}", kind.channels(), channels),
            ));
        }
        if head.stride == 0 {
            return Err(DecodeError::malformed(&head.name, "stride must be positive"));
        }
        Ok(head)
    }

    pub fn cif(&self, index: usize, min_scale: f32) -> Result<CifField<'_>> {
        let head = self.checked(index, |k| k == HeadKind::Cif)?;
        Ok(CifField {
            data: head.data.view(),
            stride: head.stride as f32,
            min_scale,
        })
    }

    pub fn caf(&self, index: usize) -> Result<CafField<'_>> {
        let head = self.checked(index, |k| k.is_caf())?;
        Ok(CafField {
            data: head.data.view(),
            stride: head.stride as f32,
        })
    }

    pub fn cifdet(&self, index: usize) -> Result<CifDetField<'_>> {
        let head = self.checked(index, |k| k == HeadKind::CifDet)?;
        Ok(CifDetField {
            data: head.data.view(),
            stride: head.stride as f32,
        })
    }
}

/// CIF 单元 (图像坐标)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CifVector {
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

/// CAF 单元 (图像坐标), 1 为边的起点, 2 为终点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CafVector {
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub s1: f32,
    pub x2: f32,
    pub y2: f32,
    pub s2: f32,
}

impl CafVector {
    pub fn length(&self) -> f32 {
        ((self.x2 - self.x1).powi(2) + (self.y2 - self.y1).powi(2)).sqrt()
    }
}

/// CifDet 单元 (图像坐标)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetVector {
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// 遍历一个场的全部网格单元, 行优先
fn cells<'a>(plane: ArrayView2<'a, f32>) -> impl Iterator<Item = (usize, usize, f32)> + 'a {
    let (h, w) = plane.dim();
    (0..h)
        .flat_map(move |row| (0..w).map(move |col| (row, col, plane[[row, col]])))
        .filter(|(_, _, c)| c.is_finite())
}

#[derive(Debug, Clone, Copy)]
pub struct CifField<'a> {
    data: ArrayView4<'a, f32>,
    stride: f32,
    min_scale: f32,
}

impl<'a> CifField<'a> {
    pub fn n_fields(&self) -> usize {
        self.data.dim().0
    }

    pub fn grid(&self) -> (usize, usize) {
        let (_, _, h, w) = self.data.dim();
        (h, w)
    }

    pub fn stride(&self) -> f32 {
        self.stride
    }

    /// 高分辨率输出的尺寸
    pub fn hr_shape(&self) -> (usize, usize) {
        let (h, w) = self.grid();
        (
            (h.saturating_sub(1) as f32 * self.stride) as usize + 1,
            (w.saturating_sub(1) as f32 * self.stride) as usize + 1,
        )
    }

    /// 第 k 个关键点场中置信度不低于 `min_confidence` 且满足最小尺度的单元
    pub fn vectors(&self, k: usize, min_confidence: f32) -> impl Iterator<Item = CifVector> + 'a {
        let field = self.data.slice_move(s![k, .., .., ..]);
        let stride = self.stride;
        let min_scale = self.min_scale;
        cells(field.index_axis_move(ndarray::Axis(0), 0))
            .filter(move |&(_, _, c)| c >= min_confidence)
            .map(move |(row, col, c)| CifVector {
                confidence: c,
                x: (col as f32 + field[[1, row, col]]) * stride,
                y: (row as f32 + field[[2, row, col]]) * stride,
                scale: field[[3, row, col]] * stride,
            })
            .filter(move |v| min_scale <= 0.0 || v.scale >= min_scale)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CafField<'a> {
    data: ArrayView4<'a, f32>,
    stride: f32,
}

impl<'a> CafField<'a> {
    pub fn n_fields(&self) -> usize {
        self.data.dim().0
    }

    pub fn grid(&self) -> (usize, usize) {
        let (_, _, h, w) = self.data.dim();
        (h, w)
    }

    pub fn stride(&self) -> f32 {
        self.stride
    }

    /// 第 e 条边的场中置信度高于 `threshold` 的单元
    pub fn vectors(&self, e: usize, threshold: f32) -> impl Iterator<Item = CafVector> + 'a {
        let field = self.data.slice_move(s![e, .., .., ..]);
        let stride = self.stride;
        cells(field.index_axis_move(ndarray::Axis(0), 0))
            .filter(move |&(_, _, c)| c > threshold)
            .map(move |(row, col, c)| {
                let (fx, fy) = (col as f32, row as f32);
                CafVector {
                    confidence: c,
                    x1: (fx + field[[1, row, col]]) * stride,
                    y1: (fy + field[[2, row, col]]) * stride,
                    x2: (fx + field[[3, row, col]]) * stride,
                    y2: (fy + field[[4, row, col]]) * stride,
                    s1: field[[5, row, col]] * stride,
                    s2: field[[6, row, col]] * stride,
                }
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CifDetField<'a> {
    data: ArrayView4<'a, f32>,
    stride: f32,
}

impl<'a> CifDetField<'a> {
    pub fn n_fields(&self) -> usize {
        self.data.dim().0
    }

    pub fn hr_shape(&self) -> (usize, usize) {
        let (_, _, h, w) = self.data.dim();
        (
            (h.saturating_sub(1) as f32 * self.stride) as usize + 1,
            (w.saturating_sub(1) as f32 * self.stride) as usize + 1,
        )
    }

    pub fn vectors(&self, k: usize, min_confidence: f32) -> impl Iterator<Item = DetVector> + 'a {
        let field = self.data.slice_move(s![k, .., .., ..]);
        let stride = self.stride;
        cells(field.index_axis_move(ndarray::Axis(0), 0))
            .filter(move |&(_, _, c)| c >= min_confidence)
            .map(move |(row, col, c)| DetVector {
                confidence: c,
                x: (col as f32 + field[[1, row, col]]) * stride,
                y: (row as f32 + field[[2, row, col]]) * stride,
                w: field[[3, row, col]] * stride,
                h: field[[4, row, col]] * stride,
            })
    }
}
