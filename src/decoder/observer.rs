// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 调试观察者: 在解码各阶段结束时收到中间结果, 不影响解码输出

use tracing::debug;

use crate::annotation::Annotation;
use crate::decoder::cif_hr::CifHr;
use crate::decoder::cif_seeds::Seed;
use crate::decoder::occupancy::Occupancy;

/// 解码阶段回调, 默认全部为空操作
pub trait DecodeObserver: Send + Sync {
    /// CifHr 累积完成
    fn cifhr(&self, _cifhr: &CifHr) {}

    /// 种子提取完成 (已排序)
    fn seeds(&self, _seeds: &[Seed]) {}

    /// 所有实例组装完成后的占用网格
    fn occupancy(&self, _occupancy: &Occupancy) {}

    /// 单个实例完成评分 (过滤之前)
    fn instance(&self, _annotation: &Annotation) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DecodeObserver for NoopObserver {}

/// 通过 tracing 输出各阶段摘要
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceObserver;

impl DecodeObserver for TraceObserver {
    fn cifhr(&self, cifhr: &CifHr) {
        let (h, w) = cifhr.shape();
        let max = cifhr.accumulated().iter().copied().fold(0.0f32, f32::max);
        debug!(fields = cifhr.n_fields(), h, w, max, "cifhr accumulated");
    }

    fn seeds(&self, seeds: &[Seed]) {
        debug!(
            count = seeds.len(),
            best = seeds.first().map_or(0.0, |s| s.score),
            "seeds extracted"
        );
    }

    fn occupancy(&self, occupancy: &Occupancy) {
        debug!(
            fields = occupancy.n_fields(),
            occupied = occupancy.count(),
            "occupancy after assembly"
        );
    }

    fn instance(&self, annotation: &Annotation) {
        debug!(
            score = annotation.score,
            joints = annotation.n_set(),
            "instance assembled"
        );
    }
}
