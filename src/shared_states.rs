//! 命名组件表 (Named shared states)
//!
//! 组件之间用构造时注入的引用通信; 这里只是给外部 (命令行、流引擎)
//! 按名字取组件的薄工厂。名字不存在或类型不符返回 LookupError。

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::error::{CoreError, Result};
use crate::instance::InstanceRegistry;
use crate::pipeline::{Pipeline, TrackerFeed};
use crate::visualizer::InstancesVisualizer;

#[derive(Clone)]
pub enum SharedState {
    Registry(Arc<InstanceRegistry>),
    Feed(Arc<TrackerFeed>),
    Pipeline(Arc<Pipeline>),
    Visualizer(Arc<InstancesVisualizer>),
}

impl SharedState {
    pub fn kind(&self) -> &'static str {
        match self {
            SharedState::Registry(_) => "instance_registry",
            SharedState::Feed(_) => "tracker_feed",
            SharedState::Pipeline(_) => "pipeline",
            SharedState::Visualizer(_) => "instances_visualizer",
        }
    }

    fn terminate(&self) {
        match self {
            SharedState::Registry(r) => r.terminate(),
            SharedState::Feed(f) => f.terminate(),
            SharedState::Pipeline(p) => p.terminate(),
            SharedState::Visualizer(_) => {}
        }
    }
}

#[derive(Default)]
pub struct SharedStates {
    states: RwLock<BTreeMap<String, SharedState>>,
}

impl SharedStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册组件,同名已存在时返回 LookupError
    pub fn add(&self, name: impl Into<String>, state: SharedState) -> Result<()> {
        let name = name.into();
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        if states.contains_key(&name) {
            return Err(CoreError::lookup(format!("shared state '{}' already exists", name)));
        }
        info!(name = %name, kind = state.kind(), "shared state added");
        states.insert(name, state);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<SharedState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::lookup(format!("shared state '{}' is not found", name)))
    }

    pub fn registry(&self, name: &str) -> Result<Arc<InstanceRegistry>> {
        match self.get(name)? {
            SharedState::Registry(r) => Ok(r),
            other => Err(wrong_kind(name, "instance_registry", &other)),
        }
    }

    pub fn feed(&self, name: &str) -> Result<Arc<TrackerFeed>> {
        match self.get(name)? {
            SharedState::Feed(f) => Ok(f),
            other => Err(wrong_kind(name, "tracker_feed", &other)),
        }
    }

    pub fn pipeline(&self, name: &str) -> Result<Arc<Pipeline>> {
        match self.get(name)? {
            SharedState::Pipeline(p) => Ok(p),
            other => Err(wrong_kind(name, "pipeline", &other)),
        }
    }

    pub fn visualizer(&self, name: &str) -> Result<Arc<InstancesVisualizer>> {
        match self.get(name)? {
            SharedState::Visualizer(v) => Ok(v),
            other => Err(wrong_kind(name, "instances_visualizer", &other)),
        }
    }

    /// 移除并 terminate
    pub fn remove(&self, name: &str) -> Result<()> {
        let removed = self
            .states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| CoreError::lookup(format!("shared state '{}' is not found", name)))?;
        removed.terminate();
        Ok(())
    }

    /// terminate 所有组件 (幂等)
    pub fn terminate_all(&self) {
        let states = std::mem::take(&mut *self.states.write().unwrap_or_else(PoisonError::into_inner));
        for (name, state) in states {
            state.terminate();
            info!(name = %name, "shared state terminated");
        }
    }
}

fn wrong_kind(name: &str, expected: &str, actual: &SharedState) -> CoreError {
    CoreError::lookup(format!(
        "shared state '{}' is a {}, not a {}",
        name,
        actual.kind(),
        expected
    ))
}
