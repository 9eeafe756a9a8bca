//! 检测阶段 (Detector stage)
//! 职责: 帧 → 检测 → 掩膜过滤 → 身高估计 → 区域句柄

use std::sync::Arc;

use image::RgbImage;
use tracing::debug;

use super::types::{CameraFrame, RegionCandidate};
use crate::error::Result;
use crate::handle::{Handle, HandleLedger};

/// 单摄像头检测器接口 (外部实现)
pub trait Detector: Send + Sync {
    /// 在投影后的图像上检测
    fn detect(&self, image: &RgbImage, offset_x: i32, offset_y: i32)
        -> Result<Vec<RegionCandidate>>;

    /// 返回 true 表示区域落在掩膜内,应当丢弃
    fn filter_by_mask(&self, candidate: &RegionCandidate) -> bool;

    /// 原地估计身高
    fn estimate_height(&self, candidate: &mut RegionCandidate, offset_x: i32, offset_y: i32);
}

/// 对一帧执行完整的检测流程
pub fn detect_regions(
    detector: &dyn Detector,
    frame: &CameraFrame,
    ledger: &Arc<HandleLedger>,
) -> Result<Vec<Handle<RegionCandidate>>> {
    let raw = detector.detect(&frame.image, frame.offset_x, frame.offset_y)?;
    let detected = raw.len();

    let mut regions = Vec::with_capacity(detected);
    for candidate in raw {
        let mut region = Handle::new(candidate, ledger);
        if detector.filter_by_mask(&region) {
            continue;
        }
        detector.estimate_height(&mut region, frame.offset_x, frame.offset_y);
        region.camera_id = frame.camera_id;
        regions.push(region);
    }

    debug!(
        camera_id = frame.camera_id,
        detected,
        kept = regions.len(),
        "detect_regions"
    );
    Ok(regions)
}
