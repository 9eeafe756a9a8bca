//! 检测框叠加渲染 (Box overlay renderer)
//! 各摄像头画面横向拼接,实例检测框按 ID 着色

use std::collections::BTreeMap;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::OverlayRenderer;
use crate::config::CameraParameter;
use crate::detection::tracker::id_to_color;
use crate::detection::types::{BBox, FrameSet, Trackee};
use crate::error::Result;
use crate::handle::Handle;
use crate::instance::InstanceState;

/// 单个摄像头在画布上的位置
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tile {
    x: u32,
    scale: f32,
    offset_x: i32,
    offset_y: i32,
}

#[derive(Debug, Default, Clone)]
pub struct BoxOverlay {
    /// 插值得到的跟踪对象也画出来
    pub draw_interpolated: bool,
}

impl BoxOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn draw_box(canvas: &mut RgbImage, tile: &Tile, bbox: &BBox, color: Rgb<u8>, inset: i32) {
        let b = bbox.shifted(-tile.offset_x as f32, -tile.offset_y as f32);
        let x = (b.x1 * tile.scale) as i32 + tile.x as i32 + inset;
        let y = (b.y1 * tile.scale) as i32 + inset;
        let w = ((b.width() * tile.scale) as i32 - inset * 2).max(1) as u32;
        let h = ((b.height() * tile.scale) as i32 - inset * 2).max(1) as u32;
        draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(w, h), color);
    }
}

fn color_of(id: u64) -> Rgb<u8> {
    let (r, g, b) = id_to_color(id);
    Rgb([r, g, b])
}

impl OverlayRenderer for BoxOverlay {
    fn draw(
        &self,
        frames: &FrameSet,
        states: &[Handle<InstanceState>],
        trackees: &[Trackee],
        cameras: &BTreeMap<i32, CameraParameter>,
    ) -> Result<RgbImage> {
        // 布局
        let mut tiles = BTreeMap::new();
        let mut scaled = Vec::new();
        let (mut width, mut height) = (0u32, 0u32);
        for (camera_id, frame) in frames {
            let param = cameras.get(camera_id).cloned().unwrap_or_default();
            if !param.visible {
                continue;
            }
            let scale = if param.scale > 0.0 { param.scale } else { 1.0 };
            let (w, h) = frame.image.dimensions();
            let sw = ((w as f32 * scale) as u32).max(1);
            let sh = ((h as f32 * scale) as u32).max(1);
            tiles.insert(
                *camera_id,
                Tile {
                    x: width,
                    scale,
                    offset_x: frame.offset_x,
                    offset_y: frame.offset_y,
                },
            );
            scaled.push((width, imageops::resize(&*frame.image, sw, sh, FilterType::Triangle)));
            width += sw;
            height = height.max(sh);
        }

        let mut canvas = RgbImage::new(width, height);
        for (x, img) in &scaled {
            imageops::overlay(&mut canvas, img, *x as i64, 0);
        }

        for state in states {
            let color = color_of(state.id);
            for (camera_id, region) in &state.detections {
                if let Some(tile) = tiles.get(camera_id) {
                    Self::draw_box(&mut canvas, tile, &region.bbox, color, 0);
                }
            }
        }

        // 跟踪对象画在实例框内侧一个像素
        for trackee in trackees {
            if trackee.interpolated && !self.draw_interpolated {
                continue;
            }
            let color = color_of(trackee.color_id);
            for member in &trackee.candidate.members {
                if let Some(tile) = tiles.get(&member.camera_id) {
                    Self::draw_box(&mut canvas, tile, &member.bbox, color, 1);
                }
            }
        }
        Ok(canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{CameraFrame, MovingCandidate, Point3, RegionCandidate};
    use crate::handle::HandleLedger;

    fn frames(ledger: &std::sync::Arc<HandleLedger>) -> FrameSet {
        let mut frames = FrameSet::new();
        for camera_id in 0..2 {
            frames.insert(
                camera_id,
                CameraFrame {
                    camera_id,
                    image: Handle::new(RgbImage::new(40, 30), ledger),
                    offset_x: 100,
                    offset_y: 0,
                    timestamp: 0,
                },
            );
        }
        frames
    }

    fn region(camera_id: i32) -> RegionCandidate {
        RegionCandidate::new(camera_id, BBox::new(110.0, 5.0, 120.0, 25.0), 0.9, Point3::default())
    }

    #[test]
    fn test_tiles_and_boxes() {
        let ledger = HandleLedger::new();
        let mut state = InstanceState::new(3, Point3::default(), 0);
        state.detections.insert(1, region(1));
        let states = vec![Handle::new(state, &ledger)];

        let img = BoxOverlay::new()
            .draw(&frames(&ledger), &states, &[], &BTreeMap::new())
            .unwrap();
        assert_eq!(img.dimensions(), (80, 30));
        // 摄像头1 从 x=40 开始, 框左上角 (40 + 10, 5)
        assert_eq!(*img.get_pixel(50, 5), color_of(3));
        assert_eq!(*img.get_pixel(10, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_hidden_and_scaled_cameras() {
        let ledger = HandleLedger::new();
        let mut cameras = BTreeMap::new();
        cameras.insert(
            0,
            CameraParameter {
                visible: false,
                ..Default::default()
            },
        );
        cameras.insert(
            1,
            CameraParameter {
                scale: 0.5,
                ..Default::default()
            },
        );
        let img = BoxOverlay::new().draw(&frames(&ledger), &[], &[], &cameras).unwrap();
        assert_eq!(img.dimensions(), (20, 15));
    }

    #[test]
    fn test_interpolated_trackees_skipped() {
        let ledger = HandleLedger::new();
        let trackee = Trackee {
            id: 5,
            color_id: 5,
            candidate: MovingCandidate::new(vec![region(0)]),
            interpolated: true,
            timestamp: 0,
        };
        let fs = frames(&ledger);
        let plain = BoxOverlay::new().draw(&fs, &[], &[trackee.clone()], &BTreeMap::new()).unwrap();
        assert_eq!(*plain.get_pixel(11, 6), Rgb([0, 0, 0]));

        let all = BoxOverlay {
            draw_interpolated: true,
        }
        .draw(&fs, &[], &[trackee], &BTreeMap::new())
        .unwrap();
        assert_eq!(*all.get_pixel(11, 6), color_of(5));
    }
}
