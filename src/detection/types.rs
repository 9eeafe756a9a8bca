use std::collections::BTreeMap;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::handle::Handle;

/// 多摄像头检测数据结构定义
/// Data structures shared by the detection, matching and tracking stages

// ========== 帧 ==========

/// 摄像头帧 (一次同步周期后即释放)
#[derive(Clone, Debug)]
pub struct CameraFrame {
    pub camera_id: i32,
    pub image: Handle<RgbImage>,
    pub offset_x: i32,
    pub offset_y: i32,
    pub timestamp: u64, // 采集时间 [us]
}

/// camera_id → 帧 (按摄像头ID有序)
pub type FrameSet = BTreeMap<i32, CameraFrame>;

// ========== 检测区域 ==========

/// 检测框 (Detection bounding box)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 平移 (投影坐标 → 帧坐标)
    pub fn shifted(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }
}

/// 三维坐标
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// 识别标签 (key=value, score)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
    pub score: f32,
}

/// 单摄像头检测区域
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionCandidate {
    pub bbox: BBox,
    pub confidence: f32,
    pub camera_id: i32,
    pub position: Point3, // 估计的世界坐标
    pub height: f32,      // 估计身高
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl RegionCandidate {
    pub fn new(camera_id: i32, bbox: BBox, confidence: f32, position: Point3) -> Self {
        Self {
            bbox,
            confidence,
            camera_id,
            position,
            height: 0.0,
            feature: None,
            tags: Vec::new(),
        }
    }

    /// 序列化为不透明字节串
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// 同一摄像头的检测区域集合 (匹配器输入)
#[derive(Debug)]
pub struct CameraRegions {
    pub camera_id: i32,
    pub candidates: Vec<Handle<RegionCandidate>>,
}

// ========== 跨摄像头候选 ==========

/// 跨摄像头关联后的运动候选 (每个摄像头至多一个区域)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovingCandidate {
    pub members: Vec<RegionCandidate>,
}

impl MovingCandidate {
    pub fn new(members: Vec<RegionCandidate>) -> Self {
        Self { members }
    }

    /// 各摄像头估计位置的平均
    pub fn centroid(&self) -> Point3 {
        if self.members.is_empty() {
            return Point3::default();
        }
        let n = self.members.len() as f32;
        let (x, y, z) = self.members.iter().fold((0.0, 0.0, 0.0), |acc, m| {
            (acc.0 + m.position.x, acc.1 + m.position.y, acc.2 + m.position.z)
        });
        Point3::new(x / n, y / n, z / n)
    }

    pub fn mean_height(&self) -> f32 {
        if self.members.is_empty() {
            return 0.0;
        }
        self.members.iter().map(|m| m.height).sum::<f32>() / self.members.len() as f32
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ========== 跟踪结果 ==========

/// 跟踪对象 (跟踪器输出的一条)
#[derive(Clone, Debug, PartialEq)]
pub struct Trackee {
    /// 跟踪器分配的ID
    pub id: u64,
    pub color_id: u64,
    pub candidate: MovingCandidate,
    /// 本帧无观测,由跟踪器插值得到
    pub interpolated: bool,
    pub timestamp: u64,
}

/// 一次 track() 的输出
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackingResult {
    pub timestamp: u64,
    pub trackees: Vec<Trackee>,
}

impl TrackingResult {
    pub fn ids(&self) -> Vec<u64> {
        self.trackees.iter().map(|t| t.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid() {
        let a = RegionCandidate::new(0, BBox::default(), 0.9, Point3::new(0.0, 0.0, 0.0));
        let b = RegionCandidate::new(1, BBox::default(), 0.8, Point3::new(2.0, 4.0, 0.0));
        let mv = MovingCandidate::new(vec![a, b]);
        assert_eq!(mv.centroid(), Point3::new(1.0, 2.0, 0.0));
        assert_eq!(MovingCandidate::default().centroid(), Point3::default());
    }

    #[test]
    fn test_region_blob() {
        let mut r = RegionCandidate::new(3, BBox::new(1.0, 2.0, 11.0, 42.0), 0.7, Point3::new(1.0, 1.0, 0.0));
        r.tags.push(Tag {
            key: "gender".into(),
            value: "female".into(),
            score: 0.8,
        });
        let blob = r.serialize().unwrap();
        assert_eq!(RegionCandidate::deserialize(&blob).unwrap(), r);
        assert!(RegionCandidate::deserialize(b"\x00\x01").is_err());
    }
}
