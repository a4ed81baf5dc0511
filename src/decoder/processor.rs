// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Processor: 解码入口
//
// 单张: 校验 → 解码 → 关键点 NMS → 过滤排序
// 批量: 有界工作池
//   [主线程] ──jobs──> [worker 0..N] ──results──> [主线程按输入顺序收集]
// 某个 worker 的 panic 只影响当前那一张图片

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::annotation::DecodeResult;
use crate::config::DecoderConfig;
use crate::decoder::nms::KeypointNms;
use crate::decoder::observer::{DecodeObserver, NoopObserver};
use crate::decoder::{Decode, Decoder};
use crate::error::{ConfigError, DecodeError, Result};
use crate::fields::FieldSet;
use crate::skeleton::Skeleton;

pub struct Processor {
    decoder: Decoder,
    config: DecoderConfig,
    head_names: Vec<String>,
    score_weights: Vec<f32>,
    observer: Arc<dyn DecodeObserver>,
}

impl Processor {
    pub fn new(
        head_names: &[&str],
        skeleton: &Skeleton,
        config: DecoderConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let decoder = Decoder::from_heads(head_names, skeleton, &config)?;
        Ok(Self {
            decoder,
            head_names: head_names.iter().map(|s| s.to_string()).collect(),
            score_weights: skeleton.score_weights(),
            config,
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn DecodeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// 解码一张图片
    pub fn decode(&self, fields: &FieldSet) -> Result<DecodeResult> {
        let names = fields.head_names();
        if names != self.head_names {
            return Err(DecodeError::malformed(
                names.join(","),
                format!("expected heads {:?}", self.head_names),
            ));
        }

        let t_decode = Instant::now();
        let mut result = self.decoder.decode(fields, self.observer.as_ref())?;
        if self.config.profile {
            info!("[Decode {}]: {:?}", self.decoder.name(), t_decode.elapsed());
        }

        if self.decoder.is_pose() && self.config.nms_keypoints {
            let t_nms = Instant::now();
            let nms = KeypointNms {
                shape: fields.image_shape(),
                keypoint_threshold: self.config.keypoint_threshold(),
                instance_threshold: self.config.instance_threshold,
                keep_suppressed: self.config.force_complete_pose,
                score_weights: &self.score_weights,
            };
            result.annotations = nms.apply(result.annotations);
            if self.config.profile {
                info!("[Keypoint NMS]: {:?}", t_nms.elapsed());
            }
        }

        result
            .annotations
            .retain(|a| a.score >= self.config.instance_threshold);
        result
            .annotations
            .sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(
            annotations = result.annotations.len(),
            detections = result.detections.len(),
            "decode done"
        );
        Ok(result)
    }

    /// panic 转换为 `DecodeError::Worker`
    fn decode_guarded(&self, fields: &FieldSet) -> Result<DecodeResult> {
        panic::catch_unwind(AssertUnwindSafe(|| self.decode(fields))).unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(%reason, "decode worker panicked");
            Err(DecodeError::Worker(reason))
        })
    }

    /// 批量解码, 结果与输入一一对应
    pub fn decode_batch(&self, batch: Vec<FieldSet>) -> Vec<Result<DecodeResult>> {
        let n = batch.len();
        if n == 0 {
            return Vec::new();
        }
        let workers = self.config.workers.unwrap_or(n).clamp(1, n);
        let t_batch = Instant::now();

        if workers == 1 {
            let results: Vec<_> = batch.iter().map(|fields| self.decode_guarded(fields)).collect();
            if self.config.profile {
                info!("[Decode batch x{} inline]: {:?}", n, t_batch.elapsed());
            }
            return results;
        }

        let (job_tx, job_rx): (Sender<(usize, FieldSet)>, Receiver<(usize, FieldSet)>) =
            bounded(workers);
        let (result_tx, result_rx): (
            Sender<(usize, Result<DecodeResult>)>,
            Receiver<(usize, Result<DecodeResult>)>,
        ) = bounded(n);

        let mut results: Vec<Option<Result<DecodeResult>>> = (0..n).map(|_| None).collect();
        thread::scope(|s| {
            for id in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                s.spawn(move || {
                    let mut done = 0usize;
                    for (index, fields) in job_rx.iter() {
                        let result = self.decode_guarded(&fields);
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                        done += 1;
                    }
                    debug!(worker = id, jobs = done, "decode worker finished");
                });
            }
            drop(job_rx);
            drop(result_tx);

            for job in batch.into_iter().enumerate() {
                if job_tx.send(job).is_err() {
                    warn!("all decode workers exited early");
                    break;
                }
            }
            drop(job_tx);

            for (index, result) in result_rx.iter() {
                results[index] = Some(result);
            }
        });

        if self.config.profile {
            info!(
                "[Decode batch x{} on {} workers]: {:?}",
                n,
                workers,
                t_batch.elapsed()
            );
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(DecodeError::Worker("job was not completed".to_string()))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn one_keypoint() -> Skeleton {
        Skeleton::new(vec!["nose".into()], Vec::new())
    }

    fn fields(c: f32) -> FieldSet {
        let mut cif = Array4::<f32>::zeros((1, 4, 8, 8));
        cif[[0, 0, 3, 3]] = c;
        cif[[0, 3, 3, 3]] = 1.0;
        FieldSet::default()
            .push("cif", 8, cif)
            .push("caf", 8, Array4::zeros((0, 7, 8, 8)))
    }

    #[test]
    fn test_decode_single() {
        let processor = Processor::new(&["cif", "caf"], &one_keypoint(), DecoderConfig::default()).unwrap();
        let result = processor.decode(&fields(0.9)).unwrap();
        assert_eq!(result.annotations.len(), 1);
        assert!((result.annotations[0].score - 0.9).abs() < 1e-6);
        assert!(result.detections.is_empty());
    }

    #[test]
    fn test_head_names_checked() {
        let processor = Processor::new(&["cif", "caf"], &one_keypoint(), DecoderConfig::default()).unwrap();
        let fields = FieldSet::default().push("cif", 8, Array4::zeros((1, 4, 2, 2)));
        assert!(matches!(
            processor.decode(&fields),
            Err(DecodeError::MalformedField { .. })
        ));
    }

    #[test]
    fn test_batch_keeps_order_and_isolates_errors() {
        let config = DecoderConfig {
            workers: Some(3),
            ..Default::default()
        };
        let processor = Processor::new(&["cif", "caf"], &one_keypoint(), config).unwrap();
        let bad = FieldSet::default()
            .push("cif", 8, Array4::zeros((1, 3, 8, 8)))
            .push("caf", 8, Array4::zeros((0, 7, 8, 8)));
        let batch = vec![fields(0.9), bad, fields(0.5), fields(0.1), fields(0.7)];
        let results = processor.decode_batch(batch);
        assert_eq!(results.len(), 5);
        assert!(results[1].is_err());
        let scores: Vec<f32> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|r| r.annotations.first().map_or(0.0, |a| a.score))
            .collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.0, 0.7]);
    }

    struct PanicOnLowSeed;

    impl DecodeObserver for PanicOnLowSeed {
        fn seeds(&self, seeds: &[crate::decoder::Seed]) {
            if seeds.iter().any(|s| s.score < 0.6) {
                panic!("low seed");
            }
        }
    }

    #[test]
    fn test_worker_panic_isolated() {
        let config = DecoderConfig {
            workers: Some(2),
            ..Default::default()
        };
        let processor = Processor::new(&["cif", "caf"], &one_keypoint(), config)
            .unwrap()
            .with_observer(Arc::new(PanicOnLowSeed));
        let results = processor.decode_batch(vec![fields(0.9), fields(0.5), fields(0.8)]);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(DecodeError::Worker("low seed".to_string())));
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_empty_batch() {
        let processor = Processor::new(&["cif", "caf"], &one_keypoint(), DecoderConfig::default()).unwrap();
        assert!(processor.decode_batch(Vec::new()).is_empty());
    }
}
