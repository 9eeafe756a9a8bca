use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::bounded;
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use multicam_track::detection::types::RegionCandidate;
use multicam_track::detection::{GreedyMatcher, WindowTracker};
use multicam_track::export::floor_plan;
use multicam_track::instance::RetainingInstanceManager;
use multicam_track::pipeline::{FieldNames, RegionAggregator};
use multicam_track::shared_states::{SharedState, SharedStates};
use multicam_track::visualizer::{BoxOverlay, InstancesVisualizer};
use multicam_track::{
    Datum, FeedOutcome, HandleLedger, InstanceRegistry, Pipeline, PipelineConfig, SyncBarrier,
    TrackerFeed,
};

/// 多摄像头检测回放: 同步 → 匹配 → 跟踪 → 平面图 JSON
///
/// 直接运行: cargo run --bin scouter -- -c pipeline.json -r replay.jsonl
#[derive(Parser, Debug)]
#[command(author, version, about = "多摄像头检测回放", long_about = None)]
struct Args {
    /// 流水线配置文件
    #[arg(short, long)]
    config: PathBuf,

    /// 回放文件 (每行一个 JSON 检测记录)
    #[arg(short, long)]
    replay: PathBuf,

    /// 实例注册表名称
    #[arg(long, default_value = "instance_states")]
    states_id: String,

    /// 叠加层 PNG 输出目录
    #[arg(short, long)]
    overlay_dir: Option<PathBuf>,

    /// 匹配距离上限 (世界坐标)
    #[arg(long, default_value_t = 500.0)]
    match_distance: f32,
}

/// 回放记录
#[derive(Debug, Clone, Deserialize)]
struct ReplayRecord {
    source: String,
    camera_id: i32,
    timestamp: u64,
    #[serde(default)]
    offset_x: i32,
    #[serde(default)]
    offset_y: i32,
    /// 图像文件; 缺省时用 width x height 的空白帧
    #[serde(default)]
    image: Option<PathBuf>,
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
    #[serde(default)]
    regions: Vec<RegionCandidate>,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn load_replay(path: &Path) -> anyhow::Result<BTreeMap<String, Vec<ReplayRecord>>> {
    let file = fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut by_source: BTreeMap<String, Vec<ReplayRecord>> = BTreeMap::new();
    for (no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ReplayRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid replay record", path.display(), no + 1))?;
        by_source.entry(record.source.clone()).or_default().push(record);
    }
    Ok(by_source)
}

/// 回放记录 → 检测元组
fn to_datum(fields: &FieldNames, record: &ReplayRecord) -> anyhow::Result<Datum> {
    let png = match &record.image {
        Some(path) => fs::read(path).with_context(|| format!("cannot read {}", path.display()))?,
        None => {
            let mut out = Cursor::new(Vec::new());
            RgbImage::new(record.width.max(1), record.height.max(1))
                .write_to(&mut out, image::ImageFormat::Png)?;
            out.into_inner()
        }
    };
    let mut regions = Vec::with_capacity(record.regions.len());
    for r in &record.regions {
        regions.push(Datum::Blob(r.serialize()?));
    }
    Ok(Datum::map([
        (fields.camera_id.clone(), Datum::Int(record.camera_id as i64)),
        (fields.image.clone(), Datum::Blob(png)),
        (fields.offset_x.clone(), Datum::Int(record.offset_x as i64)),
        (fields.offset_y.clone(), Datum::Int(record.offset_y as i64)),
        (fields.timestamp.clone(), Datum::Int(record.timestamp as i64)),
        (fields.regions.clone(), Datum::Array(regions)),
    ]))
}

fn build(args: &Args, config: &PipelineConfig) -> anyhow::Result<SharedStates> {
    let ledger = HandleLedger::new();
    let registry = Arc::new(InstanceRegistry::new(
        Box::new(RetainingInstanceManager::new(config.instance_manager_params()?)),
        Arc::clone(&ledger),
    ));
    let feed = TrackerFeed::new(
        Box::new(WindowTracker::new(config.tracker_params()?)),
        Arc::clone(&registry),
    );
    let pipeline = Pipeline::new(
        args.states_id.clone(),
        SyncBarrier::new(config.frame_input_keys.clone(), config.sync.clone()),
        RegionAggregator::new(FieldNames::default(), ledger),
        Box::new(GreedyMatcher::new(args.match_distance)),
        config.kthreshold,
        feed,
    )?;

    let shared = SharedStates::new();
    shared.add(args.states_id.clone(), SharedState::Registry(Arc::clone(&registry)))?;
    shared.add("pipeline", SharedState::Pipeline(Arc::new(pipeline)))?;
    if args.overlay_dir.is_some() {
        let visualizer =
            InstancesVisualizer::new(registry, Box::new(BoxOverlay::new()), &config.visualizer)?;
        shared.add("visualizer", SharedState::Visualizer(Arc::new(visualizer)))?;
    }
    Ok(shared)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("cannot load config {}", args.config.display()))?;
    let replay = load_replay(&args.replay)?;
    for source in replay.keys() {
        if !config.frame_input_keys.contains(source) {
            bail!("replay source '{}' is not in frame_input_keys", source);
        }
    }
    if let Some(dir) = &args.overlay_dir {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let shared = build(&args, &config)?;
    let pipeline = shared.pipeline("pipeline")?;
    let visualizer = shared.visualizer("visualizer").ok();
    info!(
        sources = ?config.frame_input_keys,
        records = replay.values().map(Vec::len).sum::<usize>(),
        "replay started"
    );

    // 每个输入源一个读取线程 → 主线程
    let (tx, rx) = bounded::<(String, u64, Datum)>(64);
    let mut readers = Vec::new();
    for (source, records) in replay {
        let tx = tx.clone();
        let fields = FieldNames::default();
        readers.push(thread::spawn(move || {
            for record in records {
                match to_datum(&fields, &record) {
                    Ok(item) => {
                        if tx.send((source.clone(), record.timestamp, item)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(source = %source, timestamp = record.timestamp, "skip record: {:#}", e),
                }
            }
            debug!(source = %source, "reader finished");
        }));
    }
    drop(tx);

    let mut ticks = 0u64;
    for (source, key, item) in rx {
        let tick = match pipeline.on_detection(&source, key, item) {
            Ok(Some(tick)) => tick,
            Ok(None) => continue,
            Err(e) => {
                // 只丢弃这一帧
                error!(source = %source, key, "tick aborted: {}", e);
                continue;
            }
        };
        let FeedOutcome::Tracked(tracked) = tick.outcome else {
            continue;
        };
        ticks += 1;

        let states: Vec<_> = tracked.snapshot.states().iter().map(|s| &**s).collect();
        for record in floor_plan(states, config.floor_id, tick.timestamp) {
            println!("{}", serde_json::to_string(&record)?);
        }

        if let (Some(vis), Some(dir)) = (&visualizer, &args.overlay_dir) {
            let img = vis.render(&tick.frames, &tracked.result.trackees)?;
            let path = dir.join(format!("{:016}.png", tick.timestamp));
            img.save(&path)
                .with_context(|| format!("cannot write {}", path.display()))?;
        }
    }

    for r in readers {
        if r.join().is_err() {
            error!("reader thread panicked");
        }
    }
    info!(ticks, pending = pipeline.barrier().pending(), "replay finished");
    shared.terminate_all();
    Ok(())
}
