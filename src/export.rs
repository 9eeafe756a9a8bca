//! JSON 导出 (JSON export of instance states and regions)
//!
//! - 实例: `{id, tags, position, detections}`
//! - 区域: `{bbox, confidence, tags, camera_id, position, height, feature}`
//! - 平面图: `{time, instances: {id, location: {x, y, floor_id}, labels: ["key=value"]}}`

use serde::Serialize;
use serde_json::Value;

use crate::datum::Datum;
use crate::detection::types::{BBox, Point3, RegionCandidate, Tag};
use crate::error::Result;
use crate::instance::InstanceState;

#[derive(Debug, Serialize)]
pub struct RegionJson<'a> {
    pub bbox: &'a BBox,
    pub confidence: f32,
    pub tags: &'a [Tag],
    pub camera_id: i32,
    pub position: &'a Point3,
    pub height: f32,
    pub feature: &'a [f32],
}

impl<'a> From<&'a RegionCandidate> for RegionJson<'a> {
    fn from(r: &'a RegionCandidate) -> Self {
        Self {
            bbox: &r.bbox,
            confidence: r.confidence,
            tags: &r.tags,
            camera_id: r.camera_id,
            position: &r.position,
            height: r.height,
            feature: r.feature.as_deref().unwrap_or(&[]),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InstanceJson<'a> {
    pub id: u64,
    pub tags: &'a [Tag],
    pub position: &'a Point3,
    pub detections: Vec<RegionJson<'a>>,
}

impl<'a> From<&'a InstanceState> for InstanceJson<'a> {
    fn from(s: &'a InstanceState) -> Self {
        Self {
            id: s.id,
            tags: &s.tags,
            position: &s.position,
            detections: s.detections.values().map(RegionJson::from).collect(),
        }
    }
}

pub fn region_to_json(region: &RegionCandidate) -> Result<Value> {
    Ok(serde_json::to_value(RegionJson::from(region))?)
}

/// 区域字节串数组 → JSON 数组
pub fn regions_to_json(blobs: &[Datum]) -> Result<Value> {
    let mut out = Vec::with_capacity(blobs.len());
    for b in blobs {
        let region = RegionCandidate::deserialize(b.as_blob()?)?;
        out.push(region_to_json(&region)?);
    }
    Ok(Value::Array(out))
}

pub fn instance_to_json(state: &InstanceState) -> Result<Value> {
    Ok(serde_json::to_value(InstanceJson::from(state))?)
}

/// 实例字节串 → JSON; 空字节串得到空对象
pub fn instance_blob_to_json(blob: &[u8]) -> Result<Value> {
    if blob.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    instance_to_json(&InstanceState::deserialize(blob)?)
}

/// 实例字节串数组 → JSON 数组 (跳过空字节串)
pub fn instances_to_json(blobs: &[Datum]) -> Result<Value> {
    let mut out = Vec::with_capacity(blobs.len());
    for b in blobs {
        let blob = b.as_blob()?;
        if blob.is_empty() {
            continue;
        }
        out.push(instance_blob_to_json(blob)?);
    }
    Ok(Value::Array(out))
}

// ========== 平面图 ==========

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub x: f32,
    pub y: f32,
    pub floor_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloorInstance {
    pub id: u64,
    pub location: Location,
    pub labels: Vec<String>,
}

/// 平面图记录 (每个实例一条)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloorPlanRecord {
    /// [us]
    pub time: u64,
    pub instances: FloorInstance,
}

impl FloorPlanRecord {
    pub fn new(state: &InstanceState, floor_id: i64, time: u64) -> Self {
        Self {
            time,
            instances: FloorInstance {
                id: state.id,
                location: Location {
                    x: state.position.x,
                    y: state.position.y,
                    floor_id,
                },
                labels: state
                    .tags
                    .iter()
                    .map(|t| format!("{}={}", t.key, t.value))
                    .collect(),
            },
        }
    }
}

pub fn floor_plan<'a>(
    states: impl IntoIterator<Item = &'a InstanceState>,
    floor_id: i64,
    time: u64,
) -> Vec<FloorPlanRecord> {
    states
        .into_iter()
        .map(|s| FloorPlanRecord::new(s, floor_id, time))
        .collect()
}

/// 实例字节串数组 → 平面图记录
pub fn floor_plan_from_blobs(blobs: &[Datum], floor_id: i64, time: u64) -> Result<Vec<FloorPlanRecord>> {
    let mut out = Vec::with_capacity(blobs.len());
    for b in blobs {
        let state = InstanceState::deserialize(b.as_blob()?)?;
        out.push(FloorPlanRecord::new(&state, floor_id, time));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> InstanceState {
        let mut s = InstanceState::new(12, Point3::new(4.5, 8.25, 0.0), 1);
        s.tags.push(Tag {
            key: "gender".into(),
            value: "female".into(),
            score: 0.5,
        });
        let mut r = RegionCandidate::new(2, BBox::new(1.0, 2.0, 3.0, 4.0), 0.5, s.position);
        r.height = 160.0;
        s.detections.insert(2, r);
        s
    }

    #[test]
    fn test_instance_json() {
        let v = instance_to_json(&state()).unwrap();
        assert_eq!(v["id"], json!(12));
        assert_eq!(v["position"], json!({"x": 4.5, "y": 8.25, "z": 0.0}));
        assert_eq!(v["tags"][0]["key"], json!("gender"));
        let d = &v["detections"][0];
        assert_eq!(d["camera_id"], json!(2));
        assert_eq!(d["bbox"], json!({"x1": 1.0, "y1": 2.0, "x2": 3.0, "y2": 4.0}));
        assert_eq!(d["height"], json!(160.0));
        assert_eq!(d["feature"], json!([]));
    }

    #[test]
    fn test_blobs_to_json() {
        let blobs = vec![Datum::Blob(state().serialize().unwrap()), Datum::Blob(Vec::new())];
        let v = instances_to_json(&blobs).unwrap();
        assert_eq!(v.as_array().map(|a| a.len()), Some(1));
        assert_eq!(instance_blob_to_json(&[]).unwrap(), json!({}));
        assert!(instances_to_json(&[Datum::Int(1)]).unwrap_err().is_format());
    }

    #[test]
    fn test_regions_json() {
        let mut r = RegionCandidate::new(1, BBox::default(), 0.75, Point3::default());
        r.feature = Some(vec![0.5, 0.25]);
        let v = regions_to_json(&[Datum::Blob(r.serialize().unwrap())]).unwrap();
        assert_eq!(v[0]["feature"], json!([0.5, 0.25]));
        assert_eq!(v[0]["confidence"], json!(0.75));
    }

    #[test]
    fn test_floor_plan() {
        let records = floor_plan_from_blobs(&[Datum::Blob(state().serialize().unwrap())], 3, 1_000).unwrap();
        let v = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(
            v,
            json!({
                "time": 1000,
                "instances": {
                    "id": 12,
                    "location": {"x": 4.5, "y": 8.25, "floor_id": 3},
                    "labels": ["gender=female"]
                }
            })
        );
    }
}
