//! 多目标跟踪公共组件
//! Common components for multi-object tracking

use tracing::debug;

use super::types::{FrameSet, MovingCandidate, Point3, Trackee, TrackingResult};
use crate::config::TrackerParams;
use crate::error::{CoreError, Result};
use crate::handle::Handle;

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
///
/// 原生跟踪器都应实现此接口。每次 push 一批跨摄像头候选,
/// 累积到足够帧数后 ready() 返回 true,随后调用一次 track()。
pub trait Tracker: Send {
    /// 推入一帧的候选 (候选可以为空)
    fn push(
        &mut self,
        frames: &FrameSet,
        candidates: &[Handle<MovingCandidate>],
        timestamp: u64,
    ) -> Result<()>;

    /// 是否已累积足够输入
    fn ready(&self) -> bool;

    /// 执行一次跟踪
    fn track(&mut self, timestamp: u64) -> Result<TrackingResult>;

    /// 释放内部资源 (幂等)
    fn terminate(&mut self) {}
}

// ========== 参考实现 ==========

/// 跟踪对象内部状态
#[derive(Clone, Debug)]
struct Track {
    id: u64,
    position: Point3,
    candidate: MovingCandidate,
    /// 连续丢失帧数
    frames_lost: u32,
}

/// 窗口跟踪器: 累积 `accept_frames` 帧后按最近邻贪心关联
pub struct WindowTracker {
    params: TrackerParams,
    buffer: Vec<(u64, Vec<MovingCandidate>)>,
    tracks: Vec<Track>,
    next_id: u64,
    terminated: bool,
}

impl WindowTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            buffer: Vec::new(),
            tracks: Vec::new(),
            next_id: 1,
            terminated: false,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// 单帧关联,返回本帧匹配到观测的轨迹ID
    fn associate(&mut self, candidates: Vec<MovingCandidate>) -> Vec<u64> {
        let mut pairs = Vec::new();
        for (ti, t) in self.tracks.iter().enumerate() {
            for (ci, c) in candidates.iter().enumerate() {
                let d = t.position.distance(&c.centroid());
                if d <= self.params.max_distance {
                    pairs.push((d, ti, ci));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| (a.1, a.2).cmp(&(b.1, b.2))));

        let mut track_used = vec![false; self.tracks.len()];
        let mut cand_used = vec![false; candidates.len()];
        let mut assigned = Vec::new();
        for (_, ti, ci) in pairs {
            if track_used[ti] || cand_used[ci] {
                continue;
            }
            track_used[ti] = true;
            cand_used[ci] = true;
            assigned.push((ti, ci));
        }

        let mut slots: Vec<Option<MovingCandidate>> = candidates.into_iter().map(Some).collect();
        let mut matched = Vec::new();
        for (ti, ci) in assigned {
            if let Some(c) = slots[ci].take() {
                let t = &mut self.tracks[ti];
                t.position = c.centroid();
                t.candidate = c;
                t.frames_lost = 0;
                matched.push(t.id);
            }
        }

        for (ti, used) in track_used.iter().enumerate() {
            if !used {
                self.tracks[ti].frames_lost += 1;
            }
        }
        let max_lost = self.params.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        // 新目标
        for c in slots.into_iter().flatten() {
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track {
                id,
                position: c.centroid(),
                candidate: c,
                frames_lost: 0,
            });
            matched.push(id);
        }
        matched
    }
}

impl Tracker for WindowTracker {
    fn push(
        &mut self,
        _frames: &FrameSet,
        candidates: &[Handle<MovingCandidate>],
        timestamp: u64,
    ) -> Result<()> {
        if self.terminated {
            return Err(CoreError::Terminated("tracker"));
        }
        let owned = candidates.iter().map(|c| (**c).clone()).collect();
        self.buffer.push((timestamp, owned));
        Ok(())
    }

    fn ready(&self) -> bool {
        !self.terminated && self.buffer.len() >= self.params.accept_frames.max(1)
    }

    fn track(&mut self, timestamp: u64) -> Result<TrackingResult> {
        if self.terminated {
            return Err(CoreError::Terminated("tracker"));
        }
        let mut observed = Vec::new();
        for (_, candidates) in std::mem::take(&mut self.buffer) {
            observed = self.associate(candidates);
        }

        let trackees = self
            .tracks
            .iter()
            .map(|t| Trackee {
                id: t.id,
                color_id: t.id,
                candidate: t.candidate.clone(),
                interpolated: !observed.contains(&t.id),
                timestamp,
            })
            .collect::<Vec<_>>();

        debug!(
            tracks = trackees.len(),
            observed = observed.len(),
            timestamp,
            "window tracker step"
        );
        Ok(TrackingResult {
            timestamp,
            trackees,
        })
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.buffer.clear();
        self.tracks.clear();
    }
}

// ========== 工具函数 ==========

/// 根据ID生成不同颜色
pub fn id_to_color(id: u64) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0; // 黄金角度采样
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
