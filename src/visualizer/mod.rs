/// 实例可视化 (Instances visualizer)
///
/// 从注册表快照渲染叠加层。绘制期间一直持有注册表读锁,
/// 绘制中途不会有 update 改变实例。
pub mod overlay;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use image::RgbImage;
use tracing::info;

use crate::config::{CameraParameter, VisualizerParams};
use crate::detection::types::{FrameSet, Trackee};
use crate::error::{CoreError, Result};
use crate::handle::Handle;
use crate::instance::{InstanceRegistry, InstanceState};

pub use overlay::BoxOverlay;

/// 叠加层渲染器接口
pub trait OverlayRenderer: Send + Sync {
    fn draw(
        &self,
        frames: &FrameSet,
        states: &[Handle<InstanceState>],
        trackees: &[Trackee],
        cameras: &BTreeMap<i32, CameraParameter>,
    ) -> Result<RgbImage>;
}

pub struct InstancesVisualizer {
    registry: Arc<InstanceRegistry>,
    renderer: Box<dyn OverlayRenderer>,
    cameras: RwLock<BTreeMap<i32, CameraParameter>>,
}

impl InstancesVisualizer {
    /// 加载摄像头参数文件后构造
    pub fn new(
        registry: Arc<InstanceRegistry>,
        renderer: Box<dyn OverlayRenderer>,
        params: &VisualizerParams,
    ) -> Result<Self> {
        let cameras = params.load_cameras()?;
        info!(cameras = cameras.len(), "visualizer camera parameters loaded");
        Ok(Self::with_cameras(registry, renderer, cameras))
    }

    pub fn with_cameras(
        registry: Arc<InstanceRegistry>,
        renderer: Box<dyn OverlayRenderer>,
        cameras: BTreeMap<i32, CameraParameter>,
    ) -> Self {
        Self {
            registry,
            renderer,
            cameras: RwLock::new(cameras),
        }
    }

    /// 用当前快照渲染一帧
    pub fn render(&self, frames: &FrameSet, trackees: &[Trackee]) -> Result<RgbImage> {
        let cameras = self.cameras.read().unwrap_or_else(PoisonError::into_inner);
        let (_, drawn) = self.registry.with_snapshot(|snapshot| {
            self.renderer
                .draw(frames, snapshot.states(), trackees, &cameras)
        })?;
        drawn
    }

    /// 热更新单个摄像头参数 (只能更新已注册的摄像头)
    pub fn update_camera_parameter(&self, camera_id: i32, param: CameraParameter) -> Result<()> {
        let mut cameras = self.cameras.write().unwrap_or_else(PoisonError::into_inner);
        match cameras.get_mut(&camera_id) {
            Some(slot) => {
                *slot = param;
                info!(camera_id, "camera parameter updated");
                Ok(())
            }
            None => Err(CoreError::lookup(format!(
                "camera {} is not registered in the visualizer",
                camera_id
            ))),
        }
    }

    pub fn camera_parameter(&self, camera_id: i32) -> Option<CameraParameter> {
        self.cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&camera_id)
            .cloned()
    }
}
