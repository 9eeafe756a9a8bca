//! 实例注册表 (Instance registry)
//!
//! 读写锁保护实例管理器: update 独占写, 快照共享读,
//! 所以快照永远不会和 update 交错。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use super::manager::InstanceManager;
use super::state::InstanceState;
use crate::detection::tracker::Tracker;
use crate::detection::types::{FrameSet, TrackingResult};
use crate::error::{CoreError, Result};
use crate::handle::{Handle, HandleLedger};

/// 某一时刻的实例快照
///
/// 没有实例时返回 `Empty`, 与状态列表区分开; `States` 里的列表一定非空。
#[derive(Debug)]
pub enum Snapshot {
    Empty {
        generation: u64,
    },
    States {
        generation: u64,
        states: Vec<Handle<InstanceState>>,
    },
}

impl Snapshot {
    /// 生成该快照时已完成的 update 次数
    pub fn generation(&self) -> u64 {
        match self {
            Snapshot::Empty { generation } | Snapshot::States { generation, .. } => *generation,
        }
    }

    pub fn states(&self) -> &[Handle<InstanceState>] {
        match self {
            Snapshot::Empty { .. } => &[],
            Snapshot::States { states, .. } => states,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Snapshot::Empty { .. })
    }

    pub fn ids(&self) -> Vec<u64> {
        self.states().iter().map(|s| s.id).collect()
    }
}

/// 一次跟踪 + 更新的输出
#[derive(Debug)]
pub struct Tracked {
    pub result: Handle<TrackingResult>,
    pub snapshot: Snapshot,
}

struct Inner {
    manager: Box<dyn InstanceManager>,
    generation: u64,
}

pub struct InstanceRegistry {
    inner: RwLock<Inner>,
    ledger: Arc<HandleLedger>,
    terminated: AtomicBool,
}

impl InstanceRegistry {
    pub fn new(manager: Box<dyn InstanceManager>, ledger: Arc<HandleLedger>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                manager,
                generation: 0,
            }),
            ledger,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn ledger(&self) -> &Arc<HandleLedger> {
        &self.ledger
    }

    fn check_alive(&self) -> Result<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(CoreError::Terminated("instance registry"));
        }
        Ok(())
    }

    /// 合并一次跟踪结果,返回新的 generation
    pub fn update(&self, frames: &FrameSet, result: &TrackingResult) -> Result<u64> {
        self.check_alive()?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.manager.update(frames, result)?;
        inner.generation += 1;
        debug!(
            generation = inner.generation,
            trackees = result.trackees.len(),
            "instance registry updated"
        );
        Ok(inner.generation)
    }

    /// 当前快照
    pub fn current_states(&self) -> Result<Snapshot> {
        self.with_snapshot(|_| ()).map(|(snapshot, _)| snapshot)
    }

    /// 持有读锁执行 f, f 返回前不会有 update 发生
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Result<(Snapshot, R)> {
        self.check_alive()?;
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.snapshot_of(&inner);
        let out = f(&snapshot);
        drop(inner);
        Ok((snapshot, out))
    }

    /// 跟踪 + 更新 + 快照一步完成
    ///
    /// 跟踪器未 ready 时返回 None, 不调用 track()。
    /// 写锁在 update 和取快照期间一直持有,快照恰好反映本次更新。
    pub fn track_and_get_states(
        &self,
        tracker: &mut dyn Tracker,
        frames: &FrameSet,
        timestamp: u64,
    ) -> Result<Option<Tracked>> {
        self.check_alive()?;
        if !tracker.ready() {
            return Ok(None);
        }
        let result = Handle::new(tracker.track(timestamp)?, &self.ledger);

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.manager.update(frames, &result)?;
        inner.generation += 1;
        let snapshot = self.snapshot_of(&inner);
        Ok(Some(Tracked { result, snapshot }))
    }

    fn snapshot_of(&self, inner: &Inner) -> Snapshot {
        let states = inner.manager.current_states();
        if states.is_empty() {
            debug!(generation = inner.generation, "instance states is empty");
            return Snapshot::Empty {
                generation: inner.generation,
            };
        }
        Snapshot::States {
            generation: inner.generation,
            states: states
                .into_iter()
                .map(|s| Handle::new(s, &self.ledger))
                .collect(),
        }
    }

    /// 释放实例管理器 (幂等)
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .manager
            .terminate();
        info!("instance registry terminated");
    }
}
