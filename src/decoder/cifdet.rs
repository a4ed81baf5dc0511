// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// CifDet: 只有检测场 (无 CAF) 的解码器, 每个未被占据的种子直接成为一个检测框

use tracing::debug;

use crate::annotation::{AnnotationDet, Bbox};
use crate::config::DecoderConfig;
use crate::decoder::cif_hr::CifHr;
use crate::decoder::cif_seeds::{det_seeds, Seed};
use crate::decoder::nms::non_max_suppression;
use crate::decoder::observer::DecodeObserver;
use crate::decoder::occupancy::Occupancy;
use crate::error::{ConfigError, DecodeError, Result};
use crate::fields::FieldSet;

const OCCUPANCY_REDUCTION: f32 = 2.0;
const OCCUPANCY_MIN_SCALE: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct CifDet {
    config: DecoderConfig,
    categories: Vec<String>,
    head_indices: Vec<usize>,
}

impl CifDet {
    pub fn new(
        categories: Vec<String>,
        config: &DecoderConfig,
        head_indices: Vec<usize>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        if categories.is_empty() {
            return Err(ConfigError::LengthMismatch {
                name: "categories",
                expected: 1,
                actual: 0,
            });
        }
        Ok(Self {
            config: config.clone(),
            categories,
            head_indices,
        })
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn decode(&self, fields: &FieldSet, observer: &dyn DecodeObserver) -> Result<Vec<AnnotationDet>> {
        let mut dets = Vec::with_capacity(self.head_indices.len());
        for &index in &self.head_indices {
            let field = fields.cifdet(index)?;
            if field.n_fields() != self.categories.len() {
                return Err(DecodeError::malformed(
                    &fields.heads[index].name,
                    format!(
                        "expected {} category fields, got {}",
                        self.categories.len(),
                        field.n_fields()
                    ),
                ));
            }
            dets.push(field);
        }

        let cifhr = CifHr::from_cifdets(&dets, self.config.v_threshold, self.config.cif_neighbors);
        observer.cifhr(&cifhr);

        let seeds = det_seeds(&dets, self.config.seed_threshold);
        observer.seeds(
            &seeds
                .iter()
                .map(|s| Seed {
                    field: s.field,
                    x: s.x,
                    y: s.y,
                    scale: 0.1 * s.w.min(s.h),
                    score: s.score,
                })
                .collect::<Vec<_>>(),
        );

        let (h, w) = cifhr.shape();
        let mut occupancy = Occupancy::new(
            (self.categories.len(), h, w),
            OCCUPANCY_REDUCTION,
            OCCUPANCY_MIN_SCALE,
        );
        let mut detections = Vec::new();
        for seed in &seeds {
            if occupancy.is_occupied(seed.field, seed.x, seed.y) {
                continue;
            }
            occupancy.mark(seed.field, seed.x, seed.y, 0.1 * seed.w.min(seed.h));
            detections.push(AnnotationDet {
                category: self.categories[seed.field].clone(),
                category_id: seed.field + 1,
                score: seed.score,
                bbox: Bbox::from_center(seed.x, seed.y, seed.w, seed.h, seed.score),
            });
        }
        observer.occupancy(&occupancy);

        let n_candidates = detections.len();
        non_max_suppression(&mut detections, self.config.iou_threshold);
        detections.retain(|d| d.score >= self.config.instance_threshold);
        debug!(
            seeds = seeds.len(),
            candidates = n_candidates,
            detections = detections.len(),
            "cifdet decoded"
        );
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::observer::NoopObserver;
    use ndarray::Array4;

    fn det_cell(data: &mut Array4<f32>, k: usize, row: usize, col: usize, c: f32, w: f32, h: f32) {
        data[[k, 0, row, col]] = c;
        data[[k, 3, row, col]] = w;
        data[[k, 4, row, col]] = h;
    }

    fn decoder(config: &DecoderConfig) -> CifDet {
        CifDet::new(vec!["car".into(), "bike".into()], config, vec![0]).unwrap()
    }

    #[test]
    fn test_detections_and_nms() {
        let mut data = Array4::<f32>::zeros((2, 5, 16, 16));
        det_cell(&mut data, 0, 4, 4, 0.9, 4.0, 4.0);
        // 同类别, 中心 (36, 32) 不在占用区域内, 但与第一个框 IoU 0.78: 由 NMS 去除
        det_cell(&mut data, 0, 4, 5, 0.8, 4.0, 4.0);
        data[[0, 1, 4, 5]] = -0.5;
        det_cell(&mut data, 1, 10, 10, 0.6, 2.0, 2.0);
        let fields = FieldSet::default().push("cifdet", 8, data);

        let out = decoder(&DecoderConfig::default())
            .decode(&fields, &NoopObserver)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].category, "car");
        assert_eq!(out[0].category_id, 1);
        assert_eq!(out[0].bbox.xmin(), 16.0);
        assert_eq!(out[0].bbox.width(), 32.0);
        assert_eq!(out[1].category, "bike");
    }

    #[test]
    fn test_occupied_seed_skipped() {
        let mut data = Array4::<f32>::zeros((2, 5, 8, 8));
        det_cell(&mut data, 0, 2, 2, 0.9, 4.0, 4.0);
        det_cell(&mut data, 0, 2, 3, 0.5, 1.0, 1.0);
        let fields = FieldSet::default().push("cifdet", 1, data);
        let out = decoder(&DecoderConfig::default())
            .decode(&fields, &NoopObserver)
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_instance_threshold() {
        let mut data = Array4::<f32>::zeros((2, 5, 8, 8));
        det_cell(&mut data, 1, 2, 2, 0.3, 1.0, 1.0);
        let fields = FieldSet::default().push("cifdet", 4, data);
        let config = DecoderConfig {
            instance_threshold: 0.5,
            ..Default::default()
        };
        assert!(decoder(&config).decode(&fields, &NoopObserver).unwrap().is_empty());
    }

    #[test]
    fn test_category_count_mismatch() {
        let fields = FieldSet::default().push("cifdet", 4, Array4::zeros((3, 5, 4, 4)));
        assert!(matches!(
            decoder(&DecoderConfig::default()).decode(&fields, &NoopObserver),
            Err(DecodeError::MalformedField { .. })
        ));
    }
}
