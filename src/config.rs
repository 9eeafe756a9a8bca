//! 配置参数 (JSON 文件,构造时加载一次)
//! Pipeline, tracker, instance manager and camera parameters

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// 读取并解析 JSON 配置文件
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| CoreError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| CoreError::Config(format!("cannot parse {}: {}", path.display(), e)))
}

// ========== 同步策略 ==========

/// 同步屏障策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPolicy {
    /// 比最新 key 早于此窗口的未完成组会被淘汰, 迟到的输入被拒绝 [us], None 表示永不淘汰
    pub stale_after_us: Option<u64>,
    /// 组的最大数量, 超出时淘汰最早的未完成组 (已到齐的组保留到 pop)
    pub max_pending: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            stale_after_us: Some(10_000_000), // 10s
            max_pending: 1024,
        }
    }
}

// ========== 跟踪器参数 ==========

/// 跟踪器参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// 累积多少帧后 ready
    pub accept_frames: usize,
    /// 关联距离上限 (世界坐标)
    pub max_distance: f32,
    /// 最大允许丢失帧数
    pub max_lost_frames: u32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            accept_frames: 1,
            max_distance: 300.0,
            max_lost_frames: 30,
        }
    }
}

// ========== 实例管理参数 ==========

/// 实例管理器参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceManagerParams {
    /// 跟踪器不再报告后保留的周期数
    pub max_missing_cycles: u32,
    /// 低于此分数的标签不合并进实例
    pub min_tag_score: f32,
}

impl Default for InstanceManagerParams {
    fn default() -> Self {
        Self {
            max_missing_cycles: 0,
            min_tag_score: 0.0,
        }
    }
}

// ========== 摄像头参数 ==========

/// 单摄像头参数 (可视化用)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParameter {
    pub label: String,
    /// 绘制时的缩放比例
    pub scale: f32,
    pub visible: bool,
}

impl Default for CameraParameter {
    fn default() -> Self {
        Self {
            label: String::new(),
            scale: 1.0,
            visible: true,
        }
    }
}

/// 可视化参数: camera_ids 与 camera_parameter_files 一一对应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerParams {
    pub camera_ids: Vec<i32>,
    pub camera_parameter_files: Vec<PathBuf>,
}

impl VisualizerParams {
    /// 读取所有摄像头参数文件
    pub fn load_cameras(&self) -> Result<BTreeMap<i32, CameraParameter>> {
        if self.camera_ids.len() != self.camera_parameter_files.len() {
            return Err(CoreError::Config(
                "camera ID size and camera parameter file size must be same".to_string(),
            ));
        }
        let mut cameras = BTreeMap::new();
        for (id, path) in self.camera_ids.iter().zip(&self.camera_parameter_files) {
            cameras.insert(*id, load_json(path)?);
        }
        Ok(cameras)
    }
}

// ========== 流水线配置 ==========

/// 流水线配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 需要同步的输入源名称 (顺序即输出顺序)
    pub frame_input_keys: Vec<String>,
    #[serde(default = "default_kthreshold")]
    pub kthreshold: f32,
    #[serde(default)]
    pub floor_id: i64,
    #[serde(default)]
    pub sync: SyncPolicy,
    #[serde(default)]
    pub tracker_param_file: Option<PathBuf>,
    #[serde(default)]
    pub instance_manager_param_file: Option<PathBuf>,
    #[serde(default)]
    pub visualizer: VisualizerParams,
}

fn default_kthreshold() -> f32 {
    0.5
}

impl PipelineConfig {
    pub fn new(frame_input_keys: Vec<String>) -> Self {
        Self {
            frame_input_keys,
            kthreshold: default_kthreshold(),
            floor_id: 0,
            sync: SyncPolicy::default(),
            tracker_param_file: None,
            instance_manager_param_file: None,
            visualizer: VisualizerParams::default(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: PipelineConfig = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_input_keys.is_empty() {
            return Err(CoreError::Config("frame_input_keys must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.kthreshold) {
            return Err(CoreError::Config(format!(
                "kthreshold must be in [0, 1], got {}",
                self.kthreshold
            )));
        }
        if self.visualizer.camera_ids.len() != self.visualizer.camera_parameter_files.len() {
            return Err(CoreError::Config(
                "camera ID size and camera parameter file size must be same".into(),
            ));
        }
        Ok(())
    }

    pub fn tracker_params(&self) -> Result<TrackerParams> {
        match &self.tracker_param_file {
            Some(path) => load_json(path),
            None => Ok(TrackerParams::default()),
        }
    }

    pub fn instance_manager_params(&self) -> Result<InstanceManagerParams> {
        match &self.instance_manager_param_file {
            Some(path) => load_json(path),
            None => Ok(InstanceManagerParams::default()),
        }
    }
}
