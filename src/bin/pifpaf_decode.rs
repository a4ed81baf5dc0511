// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 命令行解码工具
///
/// 读取网络输出场的 JSON 导出, 解码后输出 JSON 结果
///
/// 输入格式:
/// - 单张: `{"heads": [{"name": "cif", "stride": 8, "data": <ndarray>}, ...]}`
/// - 批量: `{"images": [<单张>, ...]}`
///
/// `<ndarray>` 为 ndarray 的 serde 格式: `{"v": 1, "dim": [n, c, h, w], "data": [...]}`
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pifpaf_decoder::skeleton::{COCO_PERSON, DENTAL};
use pifpaf_decoder::{
    ConnectionMethod, Decode, DecodeResult, DecoderConfig, FieldSet, Processor, Skeleton,
    TraceObserver,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 骨架预设
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    /// COCO 人体 17 关键点
    Coco,
    /// 牙齿 6 关键点
    Dental,
}

/// 解码参数
#[derive(Parser, Debug)]
#[command(author, version, about = "PifPaf 场解码工具", long_about = None)]
struct Args {
    /// 输入场文件 (JSON)
    #[arg(short, long)]
    input: PathBuf,

    /// 输出文件, 默认写到标准输出
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 解码配置文件 (JSON), 未给出的字段使用默认值
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 骨架预设
    #[arg(short, long, value_enum, default_value_t = Preset::Coco)]
    skeleton: Preset,

    /// 检测类别 (逗号分隔), 仅 cifdet 使用, 默认取预设的类别
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// 连接评分方法: max 或 blend
    #[arg(long)]
    connection_method: Option<ConnectionMethod>,

    /// 贪心组装 (广度优先)
    #[arg(long)]
    greedy: bool,

    /// 关闭强制补全
    #[arg(long)]
    no_force_complete: bool,

    /// 多尺度解码
    #[arg(long)]
    multi_scale: bool,

    /// 工作线程数, 默认等于批量大小
    #[arg(short, long)]
    workers: Option<usize>,

    /// 输出各阶段耗时
    #[arg(long)]
    profile: bool,

    /// 输出各阶段调试摘要
    #[arg(long)]
    trace: bool,

    /// 格式化输出
    #[arg(long)]
    pretty: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Input {
    Batch { images: Vec<FieldSet> },
    Single(FieldSet),
}

#[derive(Serialize)]
struct Output {
    image: usize,
    #[serde(flatten)]
    result: Option<DecodeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn build_config(args: &Args) -> Result<DecoderConfig> {
    let mut config = match &args.config {
        Some(path) => DecoderConfig::load(path)?,
        None => DecoderConfig::default(),
    };
    if let Some(method) = args.connection_method {
        config.connection_method = method;
    }
    config.greedy |= args.greedy;
    config.multi_scale |= args.multi_scale;
    config.profile |= args.profile;
    if args.no_force_complete {
        config.force_complete_pose = false;
        config.keypoint_threshold = None;
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    config.validate()?;
    Ok(config)
}

fn build_skeleton(args: &Args) -> Skeleton {
    let skeleton = match args.skeleton {
        Preset::Coco => (*COCO_PERSON).clone(),
        Preset::Dental => (*DENTAL).clone(),
    };
    if args.categories.is_empty() {
        skeleton
    } else {
        skeleton.with_categories(args.categories.clone())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args)?;
    let skeleton = build_skeleton(&args);

    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let images = match serde_json::from_str::<Input>(&raw)
        .with_context(|| format!("failed to parse {}", args.input.display()))?
    {
        Input::Batch { images } => images,
        Input::Single(fields) => vec![fields],
    };
    let Some(first) = images.first() else {
        bail!("no images in {}", args.input.display());
    };

    let head_names: Vec<String> = first.head_names().into_iter().map(String::from).collect();
    let names: Vec<&str> = head_names.iter().map(|s| s.as_str()).collect();
    let n_images = images.len();
    let mut processor = Processor::new(&names, &skeleton, config)?;
    if args.trace {
        processor = processor.with_observer(Arc::new(TraceObserver));
    }
    info!(
        "📦 解码器: {} | heads: {:?} | 图片: {}",
        processor.decoder().name(),
        head_names,
        n_images
    );

    let t_start = std::time::Instant::now();
    let outputs: Vec<Output> = processor
        .decode_batch(images)
        .into_iter()
        .enumerate()
        .map(|(image, result)| match result {
            Ok(result) => Output {
                image,
                result: Some(result),
                error: None,
            },
            Err(e) => Output {
                image,
                result: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    let n_failed = outputs.iter().filter(|o| o.error.is_some()).count();
    info!(
        "✅ 完成: {} 张, 失败 {} 张, 耗时 {:?}",
        outputs.len(),
        n_failed,
        t_start.elapsed()
    );

    let json = if args.pretty {
        serde_json::to_string_pretty(&outputs)?
    } else {
        serde_json::to_string(&outputs)?
    };
    match &args.output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
