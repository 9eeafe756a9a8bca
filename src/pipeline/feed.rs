//! 跟踪器驱动 (Tracker feed)
//! 状态机: Accumulating → Tracked → Accumulating
//!
//! 跟踪器放在一把互斥锁后面, push → ready → track → update 整个序列都在锁内,
//! 同一次 ready 只会触发一次 track(),注册表的更新也按顺序进行。

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::detection::tracker::Tracker;
use crate::detection::types::{FrameSet, MovingCandidate};
use crate::error::{CoreError, Result};
use crate::handle::Handle;
use crate::instance::{InstanceRegistry, Tracked};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// 还在累积输入
    Accumulating,
    /// 刚完成一次跟踪
    Tracked,
}

#[derive(Debug)]
pub enum FeedOutcome {
    /// 跟踪器还没 ready,不是错误
    Pending { timestamp: u64 },
    Tracked(Tracked),
}

impl FeedOutcome {
    pub fn tracked(self) -> Option<Tracked> {
        match self {
            FeedOutcome::Tracked(t) => Some(t),
            FeedOutcome::Pending { .. } => None,
        }
    }
}

struct FeedInner {
    tracker: Box<dyn Tracker>,
    state: FeedState,
    terminated: bool,
}

pub struct TrackerFeed {
    inner: Mutex<FeedInner>,
    registry: Arc<InstanceRegistry>,
}

impl TrackerFeed {
    pub fn new(tracker: Box<dyn Tracker>, registry: Arc<InstanceRegistry>) -> Self {
        Self {
            inner: Mutex::new(FeedInner {
                tracker,
                state: FeedState::Accumulating,
                terminated: false,
            }),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn state(&self) -> FeedState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    /// 推入一批候选; ready 后跟踪一次并更新注册表
    pub fn feed(
        &self,
        frames: &FrameSet,
        candidates: &[Handle<MovingCandidate>],
        timestamp: u64,
    ) -> Result<FeedOutcome> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Self::push(&mut inner, frames, candidates, timestamp)?;
        self.track_locked(&mut inner, frames, timestamp)
    }

    /// 只推入,返回跟踪器是否 ready
    pub fn push_and_check(
        &self,
        frames: &FrameSet,
        candidates: &[Handle<MovingCandidate>],
        timestamp: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Self::push(&mut inner, frames, candidates, timestamp)?;
        let ready = inner.tracker.ready();
        if !ready {
            debug!(timestamp, "tracker is not ready yet");
        }
        Ok(ready)
    }

    /// ready 时跟踪一次并更新注册表
    pub fn track_if_ready(&self, frames: &FrameSet, timestamp: u64) -> Result<FeedOutcome> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.terminated {
            return Err(CoreError::Terminated("tracker feed"));
        }
        self.track_locked(&mut inner, frames, timestamp)
    }

    fn push(
        inner: &mut FeedInner,
        frames: &FrameSet,
        candidates: &[Handle<MovingCandidate>],
        timestamp: u64,
    ) -> Result<()> {
        if inner.terminated {
            return Err(CoreError::Terminated("tracker feed"));
        }
        inner.tracker.push(frames, candidates, timestamp)?;
        inner.state = FeedState::Accumulating;
        Ok(())
    }

    fn track_locked(
        &self,
        inner: &mut FeedInner,
        frames: &FrameSet,
        timestamp: u64,
    ) -> Result<FeedOutcome> {
        match self
            .registry
            .track_and_get_states(inner.tracker.as_mut(), frames, timestamp)?
        {
            Some(tracked) => {
                inner.state = FeedState::Tracked;
                debug!(
                    timestamp,
                    trackees = tracked.result.trackees.len(),
                    instances = tracked.snapshot.states().len(),
                    "tracked"
                );
                Ok(FeedOutcome::Tracked(tracked))
            }
            None => {
                debug!(timestamp, "tracker is not ready yet");
                Ok(FeedOutcome::Pending { timestamp })
            }
        }
    }

    /// 释放跟踪器 (幂等)
    pub fn terminate(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.terminated {
            return;
        }
        inner.terminated = true;
        inner.tracker.terminate();
        info!("tracker feed terminated");
    }
}
