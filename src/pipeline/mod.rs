/// 多摄像头处理流水线 (Multi-camera processing pipeline)
///
/// 所有阶段都在投递数据的线程上同步执行:
/// - barrier:    按检测时间汇合各摄像头的检测结果
/// - aggregator: 元组 → 帧 / 区域
/// - matcher:    跨摄像头匹配 (外部组件)
/// - feed:       驱动跟踪器并更新实例注册表
pub mod aggregator;
pub mod barrier;
pub mod feed;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::datum::Datum;
use crate::detection::detector::{detect_regions, Detector};
use crate::detection::matcher::{run_matcher, CrossCameraMatcher};
use crate::detection::types::{FrameSet, TrackingResult};
use crate::error::{CoreError, Result};
use crate::instance::{InstanceRegistry, Snapshot};

pub use aggregator::{frame_to_datum, FieldNames, RegionAggregator};
pub use barrier::SyncBarrier;
pub use feed::{FeedOutcome, FeedState, TrackerFeed};

// ========== 输出元组 ==========

/// 实例状态元组字段
pub const STATES_ID: &str = "states_id";
pub const STATES_COUNT: &str = "states_count";
pub const STATE: &str = "state";
/// 跟踪对象元组字段
pub const TRACKEE_COUNT: &str = "trackee_count";
pub const TIMESTAMP: &str = "timestamp";

/// 快照 → 每个实例一个元组 `{states_id, states_count, state, timestamp}`
pub fn state_tuples(states_id: &str, snapshot: &Snapshot, timestamp: u64) -> Result<Vec<Datum>> {
    let states = snapshot.states();
    let mut out = Vec::with_capacity(states.len());
    for s in states {
        out.push(Datum::map([
            (STATES_ID, Datum::from(states_id)),
            (STATES_COUNT, Datum::Int(states.len() as i64)),
            (STATE, Datum::Blob(s.serialize()?)),
            (TIMESTAMP, Datum::Int(timestamp as i64)),
        ]));
    }
    Ok(out)
}

/// 跟踪结果 → 每个跟踪对象一个元组
/// `{states_id, trackee_count, id, color_id, moving_detected, interpolated, timestamp}`
pub fn trackee_tuples(
    states_id: &str,
    fields: &FieldNames,
    result: &TrackingResult,
) -> Result<Vec<Datum>> {
    let mut out = Vec::with_capacity(result.trackees.len());
    for t in &result.trackees {
        out.push(Datum::map([
            (STATES_ID.to_string(), Datum::from(states_id)),
            (TRACKEE_COUNT.to_string(), Datum::Int(result.trackees.len() as i64)),
            (fields.trackee_id.clone(), Datum::Int(t.id as i64)),
            (fields.color_id.clone(), Datum::Int(t.color_id as i64)),
            (fields.moving_detected.clone(), Datum::Blob(t.candidate.serialize()?)),
            (fields.interpolated.clone(), Datum::Bool(t.interpolated)),
            (fields.timestamp.clone(), Datum::Int(t.timestamp as i64)),
        ]));
    }
    Ok(out)
}

// ========== 流水线 ==========

/// 一个同步周期的输出
#[derive(Debug)]
pub struct Tick {
    pub timestamp: u64,
    pub frames: FrameSet,
    pub outcome: FeedOutcome,
}

pub struct Pipeline {
    states_id: String,
    barrier: SyncBarrier<Datum>,
    aggregator: RegionAggregator,
    matcher: Box<dyn CrossCameraMatcher>,
    threshold: f32,
    feed: TrackerFeed,
    detector: Option<Box<dyn Detector>>,
    terminated: AtomicBool,
}

impl Pipeline {
    pub fn new(
        states_id: impl Into<String>,
        barrier: SyncBarrier<Datum>,
        aggregator: RegionAggregator,
        matcher: Box<dyn CrossCameraMatcher>,
        threshold: f32,
        feed: TrackerFeed,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CoreError::Config(format!(
                "matcher threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        Ok(Self {
            states_id: states_id.into(),
            barrier,
            aggregator,
            matcher,
            threshold,
            feed,
            detector: None,
            terminated: AtomicBool::new(false),
        })
    }

    /// 设置单摄像头检测器 (使用 `on_frame` 时需要)
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn states_id(&self) -> &str {
        &self.states_id
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        self.feed.registry()
    }

    pub fn aggregator(&self) -> &RegionAggregator {
        &self.aggregator
    }

    pub fn feed(&self) -> &TrackerFeed {
        &self.feed
    }

    pub fn barrier(&self) -> &SyncBarrier<Datum> {
        &self.barrier
    }

    fn check_alive(&self) -> Result<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(CoreError::Terminated("pipeline"));
        }
        Ok(())
    }

    /// 原始帧 → 检测 → 汇合
    ///
    /// 输入是帧元组; 检测结果以 `regions` 字段附加后交给 `on_detection`。
    pub fn on_frame(&self, source: &str, frame: Datum) -> Result<Option<Tick>> {
        self.check_alive()?;
        let detector = self
            .detector
            .as_deref()
            .ok_or_else(|| CoreError::lookup("no detector configured for on_frame"))?;

        let parsed = self.aggregator.frame(&frame)?;
        let regions = detect_regions(detector, &parsed, self.aggregator.ledger())?;
        let mut blobs = Vec::with_capacity(regions.len());
        for r in &regions {
            blobs.push(Datum::Blob(r.serialize()?));
        }

        let Datum::Map(mut item) = frame else {
            return Err(CoreError::format("frame tuple must be a map"));
        };
        item.insert(self.aggregator.fields().regions.clone(), Datum::Array(blobs));
        self.on_detection(source, parsed.timestamp, Datum::Map(item))
    }

    /// 一个摄像头的检测结果到达
    ///
    /// `item` 为 `{camera_id, img, offset_x, offset_y, timestamp, regions: [blob]}`。
    /// 所有期望的输入源到齐之前返回 None。
    /// 格式错误的元组在进入同步屏障之前就被拒绝,不影响其他输入源。
    pub fn on_detection(&self, source: &str, key: u64, item: Datum) -> Result<Option<Tick>> {
        self.check_alive()?;
        self.aggregator.validate(&item)?;
        self.barrier.aggregate(source, key, item)?;
        let Some(items) = self.barrier.pop(key) else {
            debug!(source, key, "waiting for other sources");
            return Ok(None);
        };

        let frames = self.aggregator.frames(&items)?;
        let regions = self.aggregator.camera_regions(&items)?;
        let candidates = run_matcher(
            self.matcher.as_ref(),
            self.threshold,
            &regions,
            self.aggregator.ledger(),
        )?;
        drop(regions);

        let outcome = self.feed.feed(&frames, &candidates, key)?;
        Ok(Some(Tick {
            timestamp: key,
            frames,
            outcome,
        }))
    }

    /// 释放所有有状态组件 (幂等)
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.barrier.clear();
        self.feed.terminate();
        self.registry().terminate();
        info!(states_id = %self.states_id, "pipeline terminated");
    }
}
