//! 区域汇总 (Region aggregator)
//! 职责: 流元组 → 帧 / 检测区域 / 运动候选 / 跟踪对象
//!
//! 任何必填字段缺失或类型错误都返回 FormatError;
//! 已经构造好的句柄随局部变量一起 Drop,不会泄漏。

use std::sync::Arc;

use image::RgbImage;

use crate::datum::Datum;
use crate::detection::types::{
    CameraFrame, CameraRegions, FrameSet, MovingCandidate, RegionCandidate, Trackee,
    TrackingResult,
};
use crate::error::{CoreError, Result};
use crate::handle::{Handle, HandleLedger};

/// 元组字段名
#[derive(Debug, Clone)]
pub struct FieldNames {
    pub camera_id: String,
    pub image: String,
    pub offset_x: String,
    pub offset_y: String,
    pub timestamp: String,
    pub regions: String,
    pub color_id: String,
    pub moving_detected: String,
    pub interpolated: String,
    pub trackee_id: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            camera_id: "camera_id".into(),
            image: "img".into(),
            offset_x: "offset_x".into(),
            offset_y: "offset_y".into(),
            timestamp: "timestamp".into(),
            regions: "regions".into(),
            color_id: "color_id".into(),
            moving_detected: "moving_detected".into(),
            interpolated: "interpolated".into(),
            trackee_id: "id".into(),
        }
    }
}

pub struct RegionAggregator {
    fields: FieldNames,
    ledger: Arc<HandleLedger>,
}

impl RegionAggregator {
    pub fn new(fields: FieldNames, ledger: Arc<HandleLedger>) -> Self {
        Self { fields, ledger }
    }

    pub fn ledger(&self) -> &Arc<HandleLedger> {
        &self.ledger
    }

    pub fn fields(&self) -> &FieldNames {
        &self.fields
    }

    /// 图像字节 → 图像句柄 (PNG/JPEG 等 image 支持的格式)
    pub fn decode_image(&self, bytes: &[u8]) -> Result<Handle<RgbImage>> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| CoreError::format(format!("cannot decode image: {}", e)))?;
        Ok(Handle::new(img.to_rgb8(), &self.ledger))
    }

    /// 单个帧元组 → 帧
    pub fn frame(&self, raw: &Datum) -> Result<CameraFrame> {
        let f = &self.fields;
        let camera_id = to_i32(raw.get(&f.camera_id)?.as_int()?, &f.camera_id)?;
        let offset_x = to_i32(raw.get(&f.offset_x)?.as_int()?, &f.offset_x)?;
        let offset_y = to_i32(raw.get(&f.offset_y)?.as_int()?, &f.offset_y)?;
        let timestamp = to_u64(raw.get(&f.timestamp)?.to_int()?, &f.timestamp)?;
        let image = self.decode_image(raw.get(&f.image)?.as_blob()?)?;

        Ok(CameraFrame {
            camera_id,
            image,
            offset_x,
            offset_y,
            timestamp,
        })
    }

    /// 多个帧元组 → camera_id → 帧
    pub fn frames(&self, raw: &[Datum]) -> Result<FrameSet> {
        let mut frames = FrameSet::new();
        for r in raw {
            let frame = self.frame(r)?;
            let camera_id = frame.camera_id;
            if frames.insert(camera_id, frame).is_some() {
                return Err(CoreError::format(format!(
                    "camera {} appears twice in one frame set",
                    camera_id
                )));
            }
        }
        Ok(frames)
    }

    /// 区域字节串数组 → 区域 (保持输入顺序)
    pub fn regions(&self, blobs: &[Datum]) -> Result<Vec<Handle<RegionCandidate>>> {
        let mut regions = Vec::with_capacity(blobs.len());
        for b in blobs {
            let region = RegionCandidate::deserialize(b.as_blob()?)?;
            regions.push(Handle::new(region, &self.ledger));
        }
        Ok(regions)
    }

    /// `{camera_id, regions: [blob]}` 数组 → 匹配器输入
    pub fn camera_regions(&self, groups: &[Datum]) -> Result<Vec<CameraRegions>> {
        let mut out = Vec::with_capacity(groups.len());
        for g in groups {
            let camera_id = to_i32(g.get(&self.fields.camera_id)?.to_int()?, &self.fields.camera_id)?;
            let candidates = self.regions(g.get(&self.fields.regions)?.as_array()?)?;
            out.push(CameraRegions {
                camera_id,
                candidates,
            });
        }
        Ok(out)
    }

    /// 检查单个检测元组能否转换为帧和区域 (进入同步屏障之前调用)
    ///
    /// 转换出的句柄立即释放,只返回 FormatError。
    pub fn validate(&self, raw: &Datum) -> Result<()> {
        let _frame = self.frame(raw)?;
        let _regions = self.camera_regions(std::slice::from_ref(raw))?;
        Ok(())
    }

    /// 运动候选字节串数组 → 运动候选
    pub fn moving_candidates(&self, blobs: &[Datum]) -> Result<Vec<Handle<MovingCandidate>>> {
        let mut out = Vec::with_capacity(blobs.len());
        for b in blobs {
            let mv = MovingCandidate::deserialize(b.as_blob()?)?;
            out.push(Handle::new(mv, &self.ledger));
        }
        Ok(out)
    }

    /// 跟踪对象元组数组 → 跟踪结果
    ///
    /// 每个元素: `{id, color_id, moving_detected: blob, interpolated, timestamp}`;
    /// 缺少 id 时沿用 color_id。
    pub fn tracking_result(&self, timestamp: u64, raw: &[Datum]) -> Result<Handle<TrackingResult>> {
        let f = &self.fields;
        let mut trackees = Vec::with_capacity(raw.len());
        for r in raw {
            let color_id = to_u64(r.get(&f.color_id)?.as_int()?, &f.color_id)?;
            let id = match r.get(&f.trackee_id) {
                Ok(v) => to_u64(v.as_int()?, &f.trackee_id)?,
                Err(_) => color_id,
            };
            let candidate = MovingCandidate::deserialize(r.get(&f.moving_detected)?.as_blob()?)?;
            trackees.push(Trackee {
                id,
                color_id,
                candidate,
                interpolated: r.get(&f.interpolated)?.as_bool()?,
                timestamp: to_u64(r.get(&f.timestamp)?.as_int()?, &f.timestamp)?,
            });
        }
        Ok(Handle::new(
            TrackingResult {
                timestamp,
                trackees,
            },
            &self.ledger,
        ))
    }
}

fn to_i32(v: i64, field: &str) -> Result<i32> {
    i32::try_from(v).map_err(|_| CoreError::format(format!("{} out of range: {}", field, v)))
}

fn to_u64(v: i64, field: &str) -> Result<u64> {
    u64::try_from(v).map_err(|_| CoreError::format(format!("{} must not be negative: {}", field, v)))
}

/// 帧 → 流元组 (与 `RegionAggregator::frame` 对应, 图像编码为 PNG)
pub fn frame_to_datum(fields: &FieldNames, frame: &CameraFrame) -> Result<Datum> {
    let mut png = std::io::Cursor::new(Vec::new());
    frame
        .image
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| CoreError::format(format!("cannot encode image: {}", e)))?;
    Ok(Datum::map([
        (fields.camera_id.clone(), Datum::Int(frame.camera_id as i64)),
        (fields.image.clone(), Datum::Blob(png.into_inner())),
        (fields.offset_x.clone(), Datum::Int(frame.offset_x as i64)),
        (fields.offset_y.clone(), Datum::Int(frame.offset_y as i64)),
        (fields.timestamp.clone(), Datum::Int(frame.timestamp as i64)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{BBox, Point3};

    fn png(w: u32, h: u32, fill: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, image::Rgb([fill, fill, fill]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn raw_frame(camera_id: i64, image: Datum) -> Datum {
        Datum::map([
            ("camera_id", Datum::Int(camera_id)),
            ("img", image),
            ("offset_x", Datum::Int(10)),
            ("offset_y", Datum::Int(20)),
            ("timestamp", Datum::Int(1_500_000)),
        ])
    }

    fn region_blob(camera_id: i32, x: f32) -> Datum {
        let r = RegionCandidate::new(camera_id, BBox::new(x, 0.0, x + 10.0, 30.0), 0.9, Point3::new(x, 0.0, 0.0));
        Datum::Blob(r.serialize().unwrap())
    }

    fn aggregator() -> RegionAggregator {
        RegionAggregator::new(FieldNames::default(), HandleLedger::new())
    }

    #[test]
    fn test_frames() {
        let agg = aggregator();
        let raw = vec![raw_frame(1, Datum::Blob(png(4, 3, 7))), raw_frame(0, Datum::Blob(png(2, 2, 9)))];
        let frames = agg.frames(&raw).unwrap();
        assert_eq!(frames.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(frames[&1].image.dimensions(), (4, 3));
        assert_eq!(frames[&1].offset_x, 10);
        assert_eq!(frames[&1].timestamp, 1_500_000);
        assert_eq!(agg.ledger().live(), 2);
        drop(frames);
        assert_eq!(agg.ledger().live(), 0);
    }

    #[test]
    fn test_frames_are_independent() {
        let agg = aggregator();
        let raw = vec![raw_frame(0, Datum::Blob(png(2, 2, 5)))];
        let first = agg.frames(&raw).unwrap();
        let second = agg.frames(&raw).unwrap();
        assert_eq!(*first[&0].image, *second[&0].image);
        drop(first);
        assert_eq!(second[&0].image.get_pixel(1, 1).0, [5, 5, 5]);
        assert_eq!(agg.ledger().live(), 1);
    }

    #[test]
    fn test_frames_failure_releases_all() {
        let agg = aggregator();
        let raw = vec![
            raw_frame(0, Datum::Blob(png(2, 2, 1))),
            raw_frame(1, Datum::Blob(png(2, 2, 1))),
            raw_frame(2, Datum::Int(3)),
        ];
        let err = agg.frames(&raw).unwrap_err();
        assert!(err.is_format());
        assert_eq!(agg.ledger().acquired(), 2);
        assert_eq!(agg.ledger().live(), 0);
    }

    #[test]
    fn test_frames_missing_field_and_bad_image() {
        let agg = aggregator();
        let missing = Datum::map([("camera_id", Datum::Int(0))]);
        assert!(agg.frames(&[missing]).unwrap_err().is_format());

        let garbage = raw_frame(0, Datum::Blob(vec![1, 2, 3]));
        assert!(agg.frames(&[garbage]).unwrap_err().is_format());
        assert_eq!(agg.ledger().live(), 0);
    }

    #[test]
    fn test_duplicate_camera_rejected() {
        let agg = aggregator();
        let raw = vec![raw_frame(0, Datum::Blob(png(2, 2, 1))), raw_frame(0, Datum::Blob(png(2, 2, 1)))];
        assert!(agg.frames(&raw).unwrap_err().is_format());
        assert_eq!(agg.ledger().live(), 0);
    }

    #[test]
    fn test_regions_keep_order() {
        let agg = aggregator();
        let blobs = vec![region_blob(0, 5.0), region_blob(0, 1.0), region_blob(0, 3.0)];
        let regions = agg.regions(&blobs).unwrap();
        let xs: Vec<f32> = regions.iter().map(|r| r.bbox.x1).collect();
        assert_eq!(xs, vec![5.0, 1.0, 3.0]);
    }

    #[test]
    fn test_regions_malformed_releases() {
        let agg = aggregator();
        let blobs = vec![region_blob(0, 5.0), Datum::Blob(b"not a region".to_vec())];
        assert!(agg.regions(&blobs).unwrap_err().is_format());
        assert_eq!(agg.ledger().live(), 0);
    }

    #[test]
    fn test_camera_regions() {
        let agg = aggregator();
        let groups = vec![
            Datum::map([
                ("camera_id", Datum::Int(0)),
                ("regions", Datum::Array(vec![region_blob(0, 1.0), region_blob(0, 2.0)])),
            ]),
            Datum::map([("camera_id", Datum::Int(1)), ("regions", Datum::Array(vec![]))]),
        ];
        let cams = agg.camera_regions(&groups).unwrap();
        assert_eq!(cams.len(), 2);
        assert_eq!(cams[0].candidates.len(), 2);
        assert!(cams[1].candidates.is_empty());

        let bad = vec![Datum::map([("camera_id", Datum::Int(0))])];
        assert!(agg.camera_regions(&bad).is_err());
    }

    #[test]
    fn test_validate_detection_item() {
        let agg = aggregator();
        let Datum::Map(mut item) = raw_frame(0, Datum::Blob(png(2, 2, 1))) else {
            unreachable!()
        };
        // 缺少 regions
        let no_regions = Datum::Map(item.clone());
        assert!(agg.validate(&no_regions).unwrap_err().is_format());

        item.insert("regions".into(), Datum::Array(vec![Datum::Blob(b"junk".to_vec())]));
        assert!(agg.validate(&Datum::Map(item.clone())).unwrap_err().is_format());

        item.insert("regions".into(), Datum::Array(vec![region_blob(0, 1.0)]));
        agg.validate(&Datum::Map(item)).unwrap();
        assert_eq!(agg.ledger().live(), 0);
    }

    #[test]
    fn test_tracking_result() {
        let agg = aggregator();
        let mv = MovingCandidate::default().serialize().unwrap();
        let raw = vec![
            Datum::map([
                ("color_id", Datum::Int(4)),
                ("moving_detected", Datum::Blob(mv.clone())),
                ("interpolated", Datum::Bool(false)),
                ("timestamp", Datum::Int(99)),
            ]),
            Datum::map([
                ("id", Datum::Int(12)),
                ("color_id", Datum::Int(5)),
                ("moving_detected", Datum::Blob(mv)),
                ("interpolated", Datum::Bool(true)),
                ("timestamp", Datum::Int(99)),
            ]),
        ];
        let tr = agg.tracking_result(99, &raw).unwrap();
        assert_eq!(tr.ids(), vec![4, 12]);
        assert!(tr.trackees[1].interpolated);

        let bad = vec![Datum::map([("color_id", Datum::Int(1))])];
        assert!(agg.tracking_result(99, &bad).is_err());
    }

    #[test]
    fn test_frame_datum_round_trip() {
        let agg = aggregator();
        let fields = FieldNames::default();
        let frame = agg.frame(&raw_frame(3, Datum::Blob(png(3, 3, 42)))).unwrap();
        let back = agg.frame(&frame_to_datum(&fields, &frame).unwrap()).unwrap();
        assert_eq!(back.camera_id, 3);
        assert_eq!(*back.image, *frame.image);
    }
}
