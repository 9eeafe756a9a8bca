//! 实例快照 (Instance state snapshot)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detection::types::{Point3, RegionCandidate, Tag};
use crate::error::Result;

/// 实例快照 (某一时刻一个被跟踪实例的不可变状态)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub id: u64,
    pub position: Point3,
    pub height: f32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// camera_id → 该摄像头下的检测区域
    #[serde(default)]
    pub detections: BTreeMap<i32, RegionCandidate>,
    pub timestamp: u64,
}

impl InstanceState {
    pub fn new(id: u64, position: Point3, timestamp: u64) -> Self {
        Self {
            id,
            position,
            height: 0.0,
            tags: Vec::new(),
            detections: BTreeMap::new(),
            timestamp,
        }
    }

    /// 按 key 查找得分最高的标签
    pub fn tag(&self, key: &str) -> Option<&Tag> {
        self.tags
            .iter()
            .filter(|t| t.key == key)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
