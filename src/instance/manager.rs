//! 实例管理器 (Instance manager)
//!
//! 按跟踪器分配的 ID 合并跟踪结果,实例的保留策略由管理器自己决定。

use std::collections::BTreeMap;

use tracing::debug;

use super::state::InstanceState;
use crate::config::InstanceManagerParams;
use crate::detection::types::{FrameSet, Tag, Trackee, TrackingResult};
use crate::error::{CoreError, Result};

/// 实例管理器接口 (外部实现)
pub trait InstanceManager: Send + Sync {
    /// 合并一次 track() 的输出
    fn update(&mut self, frames: &FrameSet, result: &TrackingResult) -> Result<()>;

    /// 当前所有实例 (按 ID 升序)
    fn current_states(&self) -> Vec<InstanceState>;

    /// 释放内部资源 (幂等)
    fn terminate(&mut self) {}
}

struct Entry {
    state: InstanceState,
    /// 连续未被跟踪器报告的周期数
    missing: u32,
}

/// 保留型实例管理器: 跟踪器不再报告的实例最多保留 `max_missing_cycles` 个周期
pub struct RetainingInstanceManager {
    params: InstanceManagerParams,
    entries: BTreeMap<u64, Entry>,
    terminated: bool,
}

impl RetainingInstanceManager {
    pub fn new(params: InstanceManagerParams) -> Self {
        Self {
            params,
            entries: BTreeMap::new(),
            terminated: false,
        }
    }

    fn apply(&self, state: &mut InstanceState, trackee: &Trackee, frames: &FrameSet, timestamp: u64) {
        let candidate = &trackee.candidate;
        if !candidate.members.is_empty() {
            state.position = candidate.centroid();
            state.height = candidate.mean_height();
        }
        state.timestamp = timestamp;

        // 插值帧没有新的观测,保留上一次的检测区域
        if trackee.interpolated {
            return;
        }
        state.detections = candidate
            .members
            .iter()
            .filter(|m| frames.is_empty() || frames.contains_key(&m.camera_id))
            .map(|m| (m.camera_id, m.clone()))
            .collect();

        for tag in candidate.members.iter().flat_map(|m| m.tags.iter()) {
            if tag.score < self.params.min_tag_score {
                continue;
            }
            merge_tag(&mut state.tags, tag);
        }
    }
}

/// 同一 key 只保留得分最高的标签
fn merge_tag(tags: &mut Vec<Tag>, tag: &Tag) {
    match tags.iter_mut().find(|t| t.key == tag.key) {
        Some(existing) if existing.score < tag.score => *existing = tag.clone(),
        Some(_) => {}
        None => tags.push(tag.clone()),
    }
}

impl InstanceManager for RetainingInstanceManager {
    fn update(&mut self, frames: &FrameSet, result: &TrackingResult) -> Result<()> {
        if self.terminated {
            return Err(CoreError::Terminated("instance manager"));
        }

        let mut seen = Vec::with_capacity(result.trackees.len());
        for trackee in &result.trackees {
            let mut state = match self.entries.remove(&trackee.id) {
                Some(entry) => entry.state,
                None => {
                    debug!(id = trackee.id, "new instance");
                    InstanceState::new(trackee.id, trackee.candidate.centroid(), result.timestamp)
                }
            };
            self.apply(&mut state, trackee, frames, result.timestamp);
            self.entries.insert(trackee.id, Entry { state, missing: 0 });
            seen.push(trackee.id);
        }

        let max_missing = self.params.max_missing_cycles;
        self.entries.retain(|id, entry| {
            if seen.contains(id) {
                return true;
            }
            entry.missing += 1;
            entry.missing <= max_missing
        });
        Ok(())
    }

    fn current_states(&self) -> Vec<InstanceState> {
        self.entries.values().map(|e| e.state.clone()).collect()
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.entries.clear();
    }
}
