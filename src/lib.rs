#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotation; // 解码输出 (姿态实例 / 检测框)
pub mod config; // 解码参数与多尺度布局
pub mod decoder; // 解码器接口与实现
pub mod error; // 错误类型
pub mod fields; // 网络输出场
pub mod skeleton; // 骨架拓扑与预设

pub use crate::annotation::{Annotation, AnnotationDet, Bbox, DecodeResult, Joint};
pub use crate::config::{ConnectionMethod, DecoderConfig, FieldConfig, ScaleConfig};
pub use crate::decoder::{
    Decode, DecodeObserver, Decoder, NoopObserver, Processor, TraceObserver,
};
pub use crate::error::{ConfigError, DecodeError};
pub use crate::fields::{FieldSet, Head, HeadKind};
pub use crate::skeleton::Skeleton;
