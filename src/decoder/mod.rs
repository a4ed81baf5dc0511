// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 解码器统一接口与实现
//!
//! # 架构说明
//!
//! ## 解码器类型
//! - **CifCaf**: 姿态解码, CIF + CAF (可选 caf25 稠密辅助边, 可多尺度)
//!   - 文件: `cifcaf.rs`
//! - **CifDet**: 检测解码, 只有 cifdet 场
//!   - 文件: `cifdet.rs`
//!
//! ## 公共组件
//! - `cif_hr.rs`: 高分辨率置信度面
//! - `cif_seeds.rs`: 种子提取
//! - `caf_scored.rs`: 关联评分
//! - `occupancy.rs`: 占用网格
//! - `nms.rs`: 检测框 / 关键点抑制
//! - `observer.rs`: 调试回调
//! - `processor.rs`: 单张与批量解码入口
//!
//! ## 使用示例
//! ```ignore
//! use pifpaf_decoder::{DecoderConfig, Processor, skeleton::COCO_PERSON};
//!
//! let processor = Processor::new(&["cif", "caf"], &COCO_PERSON, DecoderConfig::default())?;
//! let result = processor.decode(&fields)?;
//! ```

use crate::annotation::DecodeResult;
use crate::config::{DecoderConfig, FieldConfig};
use crate::error::{ConfigError, Result};
use crate::fields::{FieldSet, HeadKind};
use crate::skeleton::Skeleton;

pub mod caf_scored;
pub mod cif_hr;
pub mod cif_seeds;
pub mod cifcaf;
pub mod cifdet;
pub mod nms;
pub mod observer;
pub mod occupancy;
pub mod processor;

pub use caf_scored::{CafScored, Candidate};
pub use cif_hr::CifHr;
pub use cif_seeds::{CifSeeds, DetSeed, Seed};
pub use cifcaf::CifCaf;
pub use cifdet::CifDet;
pub use observer::{DecodeObserver, NoopObserver, TraceObserver};
pub use occupancy::Occupancy;
pub use processor::Processor;

/// 统一的解码接口
///
/// ```text
/// FieldSet ──> decode ──> DecodeResult (姿态实例 / 检测框)
/// ```
pub trait Decode {
    /// 解码一张图片的全部输出场
    fn decode(&self, fields: &FieldSet, observer: &dyn DecodeObserver) -> Result<DecodeResult>;

    /// 是否输出姿态实例 (决定是否做关键点 NMS)
    fn is_pose(&self) -> bool;

    fn name(&self) -> &'static str;
}

impl Decode for CifCaf {
    fn decode(&self, fields: &FieldSet, observer: &dyn DecodeObserver) -> Result<DecodeResult> {
        Ok(DecodeResult {
            annotations: CifCaf::decode(self, fields, observer)?,
            detections: Vec::new(),
        })
    }

    fn is_pose(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "cifcaf"
    }
}

impl Decode for CifDet {
    fn decode(&self, fields: &FieldSet, observer: &dyn DecodeObserver) -> Result<DecodeResult> {
        Ok(DecodeResult {
            annotations: Vec::new(),
            detections: CifDet::decode(self, fields, observer)?,
        })
    }

    fn is_pose(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "cifdet"
    }
}

/// 解码器 (根据 head 名称一次性选定)
#[derive(Debug, Clone)]
pub enum Decoder {
    CifCaf(CifCaf),
    CifDet(CifDet),
}

impl Decoder {
    /// 根据 head 名称选择解码器
    ///
    /// - `cifdet` (可按尺度重复) → CifDet
    /// - `cif, caf` 或 `cif, caf, caf25` (可按尺度重复) → CifCaf
    /// - 其他组合 → `ConfigError::UnknownHeads`
    pub fn from_heads(
        head_names: &[&str],
        skeleton: &Skeleton,
        config: &DecoderConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let unknown = || ConfigError::UnknownHeads(head_names.iter().map(|s| s.to_string()).collect());
        let kinds = head_names
            .iter()
            .map(|name| HeadKind::from_name(name))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(unknown)?;
        if kinds.is_empty() {
            return Err(unknown());
        }

        if kinds.iter().all(|k| *k == HeadKind::CifDet) {
            let decoder = CifDet::new(
                skeleton.categories().to_vec(),
                config,
                (0..kinds.len()).collect(),
            )?;
            return Ok(Decoder::CifDet(decoder));
        }

        const POSE_GROUPS: [&[HeadKind]; 2] = [
            &[HeadKind::Cif, HeadKind::Caf, HeadKind::Caf25],
            &[HeadKind::Cif, HeadKind::Caf],
        ];
        let is_pose = POSE_GROUPS
            .iter()
            .any(|group| kinds.len() % group.len() == 0 && kinds.chunks(group.len()).all(|c| c == *group));
        if !is_pose {
            return Err(unknown());
        }

        // head 布局必须与多尺度配置吻合
        let field_config = FieldConfig::from_config(config, skeleton);
        let kind_at = |i: usize| kinds.get(i).copied();
        let layout_ok = field_config.scales.iter().all(|scale| {
            kind_at(scale.cif_index) == Some(HeadKind::Cif)
                && scale
                    .caf_indices
                    .iter()
                    .all(|&i| matches!(kind_at(i), Some(HeadKind::Caf | HeadKind::Caf25)))
        });
        if !layout_ok {
            return Err(unknown());
        }
        Ok(Decoder::CifCaf(CifCaf::new(skeleton, config, field_config)?))
    }

    fn inner(&self) -> &dyn Decode {
        match self {
            Decoder::CifCaf(d) => d,
            Decoder::CifDet(d) => d,
        }
    }
}

impl Decode for Decoder {
    fn decode(&self, fields: &FieldSet, observer: &dyn DecodeObserver) -> Result<DecodeResult> {
        self.inner().decode(fields, observer)
    }

    fn is_pose(&self) -> bool {
        self.inner().is_pose()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{COCO_PERSON, DENTAL};

    #[test]
    fn test_select_cifcaf() {
        let config = DecoderConfig::default();
        let decoder = Decoder::from_heads(&["cif", "caf"], &COCO_PERSON, &config).unwrap();
        assert_eq!(decoder.name(), "cifcaf");
        assert!(decoder.is_pose());
        let decoder = Decoder::from_heads(&["cif", "caf", "caf25"], &DENTAL, &config).unwrap();
        assert!(matches!(decoder, Decoder::CifCaf(_)));
    }

    #[test]
    fn test_select_cifdet() {
        let skeleton = Skeleton::detection(vec!["car".into()]);
        let decoder =
            Decoder::from_heads(&["cifdet"], &skeleton, &DecoderConfig::default()).unwrap();
        assert_eq!(decoder.name(), "cifdet");
        assert!(!decoder.is_pose());
    }

    #[test]
    fn test_unknown_heads() {
        let config = DecoderConfig::default();
        let cases: [&[&str]; 4] = [&["cif"], &["caf", "cif"], &["cif", "caf", "pif"], &[]];
        for heads in cases {
            assert!(matches!(
                Decoder::from_heads(heads, &COCO_PERSON, &config),
                Err(ConfigError::UnknownHeads(_))
            ));
        }
    }

    #[test]
    fn test_dense_requires_caf25() {
        let config = DecoderConfig {
            dense_connections: true,
            ..Default::default()
        };
        assert!(Decoder::from_heads(&["cif", "caf"], &COCO_PERSON, &config).is_err());
        assert!(Decoder::from_heads(&["cif", "caf", "caf25"], &COCO_PERSON, &config).is_ok());
    }

    #[test]
    fn test_multi_scale_layout() {
        let config = DecoderConfig {
            multi_scale: true,
            multi_scale_hflip: false,
            ..Default::default()
        };
        let heads: Vec<&str> = (0..5).flat_map(|_| ["cif", "caf", "caf25"]).collect();
        assert!(Decoder::from_heads(&heads, &COCO_PERSON, &config).is_ok());
        assert!(Decoder::from_heads(&heads[..6], &COCO_PERSON, &config).is_err());
    }
}
