//! 同步屏障 (Sync barrier)
//!
//! 多个摄像头的检测结果异步到达,按检测时间 (key) 汇合。
//! 所有期望的输入源都到齐后 pop 才会返回,每个 key 只释放一次。

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::config::SyncPolicy;
use crate::error::{CoreError, Result};

pub struct SyncBarrier<T> {
    expected: Vec<String>,
    policy: SyncPolicy,
    groups: RwLock<BTreeMap<u64, HashMap<String, T>>>,
}

impl<T> SyncBarrier<T> {
    pub fn new(expected: Vec<String>, policy: SyncPolicy) -> Self {
        Self {
            expected,
            policy,
            groups: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn expected_sources(&self) -> &[String] {
        &self.expected
    }

    /// 放入一个输入源在 key 时刻的数据,不产生输出
    ///
    /// key 已落在过期窗口之外时不写入,返回 StaleError。
    pub fn aggregate(&self, source: &str, key: u64, item: T) -> Result<()> {
        if !self.expected.iter().any(|s| s == source) {
            return Err(CoreError::format(format!(
                "source '{}' is not one of {:?}",
                source, self.expected
            )));
        }

        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(horizon) = self.horizon(&groups) {
            if key < horizon {
                warn!(source, key, horizon, "late item rejected by sync barrier");
                return Err(CoreError::Stale { key, horizon });
            }
        }
        let group = groups.entry(key).or_default();
        if group.insert(source.to_string(), item).is_some() {
            warn!(source, key, "duplicated item replaced in sync group");
        }
        self.evict(&mut groups, key);
        Ok(())
    }

    /// key 对应的组是否已到齐; 到齐则取出 (按期望源顺序) 并清除
    pub fn pop(&self, key: u64) -> Option<Vec<T>> {
        {
            let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
            if !groups.get(&key).is_some_and(|g| self.is_complete(g)) {
                return None;
            }
        }

        // 升级为写锁后重新检查,保证只释放一次
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if !groups.get(&key).is_some_and(|g| self.is_complete(g)) {
            return None;
        }
        let mut group = groups.remove(&key)?;
        let items = self
            .expected
            .iter()
            .filter_map(|name| group.remove(name))
            .collect();
        debug!(key, sources = self.expected.len(), "sync group released");
        Some(items)
    }

    /// 尚未到齐的组数
    pub fn pending(&self) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 丢弃所有未完成的组 (幂等)
    pub fn clear(&self) {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_complete(&self, group: &HashMap<String, T>) -> bool {
        self.expected.iter().all(|name| group.contains_key(name))
    }

    /// 最新 key 减去过期窗口; 早于它的 key 不再接收
    fn horizon(&self, groups: &BTreeMap<u64, HashMap<String, T>>) -> Option<u64> {
        let window = self.policy.stale_after_us?;
        let newest = groups.keys().next_back()?;
        Some(newest.saturating_sub(window))
    }

    // 已到齐但尚未 pop 的组和刚写入的组都不驱逐
    fn evict(&self, groups: &mut BTreeMap<u64, HashMap<String, T>>, current: u64) {
        if let Some(horizon) = self.horizon(groups) {
            let stale: Vec<u64> = groups
                .iter()
                .filter(|(k, g)| **k < horizon && **k != current && !self.is_complete(g))
                .map(|(k, _)| *k)
                .collect();
            for key in stale {
                groups.remove(&key);
                warn!(key, horizon, "stale sync group evicted");
            }
        }

        while groups.len() > self.policy.max_pending.max(1) {
            let oldest = groups
                .iter()
                .find(|(k, g)| **k != current && !self.is_complete(g))
                .map(|(k, _)| *k);
            let Some(oldest) = oldest else {
                break;
            };
            groups.remove(&oldest);
            warn!(key = oldest, "sync group evicted, too many pending groups");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn barrier(sources: &[&str]) -> SyncBarrier<String> {
        SyncBarrier::new(
            sources.iter().map(|s| s.to_string()).collect(),
            SyncPolicy::default(),
        )
    }

    #[test]
    fn test_two_sources() {
        let b = barrier(&["cap1", "cap2"]);
        let t0 = 1_000_000;
        b.aggregate("cap1", t0, "item_cap1".into()).unwrap();
        assert_eq!(b.pop(t0), None);

        b.aggregate("cap2", t0, "item_cap2".into()).unwrap();
        assert_eq!(b.pop(t0), Some(vec!["item_cap1".to_string(), "item_cap2".to_string()]));
        assert_eq!(b.pop(t0), None);
        assert_eq!(b.pending(), 0);
    }

    #[test]
    fn test_output_follows_expected_order() {
        let b = barrier(&["cap1", "cap2"]);
        b.aggregate("cap2", 5, "second".into()).unwrap();
        b.aggregate("cap1", 5, "first".into()).unwrap();
        assert_eq!(b.pop(5), Some(vec!["first".to_string(), "second".to_string()]));
    }

    #[test]
    fn test_single_source_passes_through() {
        let b = barrier(&["cap1"]);
        b.aggregate("cap1", 10, "a".into()).unwrap();
        assert_eq!(b.pop(10), Some(vec!["a".to_string()]));
        b.aggregate("cap1", 11, "b".into()).unwrap();
        assert_eq!(b.pop(11), Some(vec!["b".to_string()]));
    }

    #[test]
    fn test_unsynchronized_keys_wait() {
        let b = barrier(&["cap1", "cap2"]);
        b.aggregate("cap1", 100, "a".into()).unwrap();
        b.aggregate("cap2", 200, "b".into()).unwrap();
        assert_eq!(b.pop(200), None);

        b.aggregate("cap1", 200, "c".into()).unwrap();
        assert_eq!(b.pop(200).map(|v| v.len()), Some(2));
        assert_eq!(b.pending(), 1);
    }

    #[test]
    fn test_unknown_source_rejected() {
        let b = barrier(&["cap1"]);
        assert!(b.aggregate("cap9", 1, "x".into()).unwrap_err().is_format());
        assert_eq!(b.pending(), 0);
    }

    #[test]
    fn test_stale_groups_evicted() {
        let b = SyncBarrier::new(
            vec!["cap1".to_string(), "cap2".to_string()],
            SyncPolicy {
                stale_after_us: Some(1_000),
                max_pending: 16,
            },
        );
        b.aggregate("cap1", 0, 1).unwrap();
        b.aggregate("cap1", 500, 2).unwrap();
        assert_eq!(b.pending(), 2);
        b.aggregate("cap1", 1_600, 3).unwrap();
        // 0 和 500 都早于 1600 - 1000
        assert_eq!(b.pending(), 1);

        // 迟到的 cap2@0 不再写入,调用方能看到
        let err = b.aggregate("cap2", 0, 4).unwrap_err();
        assert!(matches!(err, CoreError::Stale { key: 0, horizon: 600 }));
        assert_eq!(b.pending(), 1);
        assert_eq!(b.pop(0), None);

        // 窗口边界上的 key 仍然接收
        b.aggregate("cap2", 600, 5).unwrap();
        assert_eq!(b.pending(), 2);
    }

    #[test]
    fn test_window_resets_after_release() {
        let b = SyncBarrier::new(
            vec!["cap1".to_string()],
            SyncPolicy {
                stale_after_us: Some(100),
                max_pending: 16,
            },
        );
        b.aggregate("cap1", 1_000, 1).unwrap();
        // 组已 pop,窗口随之清空,不再有参照
        assert_eq!(b.pop(1_000), Some(vec![1]));
        b.aggregate("cap1", 10, 2).unwrap();
        assert_eq!(b.pop(10), Some(vec![2]));
    }

    #[test]
    fn test_max_pending_bound() {
        let b = SyncBarrier::new(
            vec!["cap1".to_string(), "cap2".to_string()],
            SyncPolicy {
                stale_after_us: None,
                max_pending: 3,
            },
        );
        for k in 0..10 {
            b.aggregate("cap1", k, k).unwrap();
        }
        assert_eq!(b.pending(), 3);
        b.aggregate("cap2", 9, 90).unwrap();
        assert_eq!(b.pop(9), Some(vec![9, 90]));
    }

    #[test]
    fn test_max_pending_keeps_complete_groups() {
        let b = SyncBarrier::new(
            vec!["cap1".to_string(), "cap2".to_string()],
            SyncPolicy {
                stale_after_us: None,
                max_pending: 2,
            },
        );
        // key 0 已到齐,但还没有被 pop
        b.aggregate("cap1", 0, 1).unwrap();
        b.aggregate("cap2", 0, 2).unwrap();
        b.aggregate("cap1", 1, 3).unwrap();
        b.aggregate("cap1", 2, 4).unwrap();
        // 驱逐的是未到齐的 1,而不是 0
        assert_eq!(b.pending(), 2);
        assert_eq!(b.pop(0), Some(vec![1, 2]));
        b.aggregate("cap2", 2, 5).unwrap();
        assert_eq!(b.pop(2), Some(vec![4, 5]));
        assert_eq!(b.pending(), 0);
    }

    #[test]
    fn test_max_pending_with_only_complete_groups() {
        let b = SyncBarrier::new(
            vec!["cap1".to_string()],
            SyncPolicy {
                stale_after_us: None,
                max_pending: 1,
            },
        );
        // 单输入源的组写入即到齐,全部保留到 pop
        for k in 0..3 {
            b.aggregate("cap1", k, k).unwrap();
        }
        assert_eq!(b.pending(), 3);
        for k in 0..3 {
            assert_eq!(b.pop(k), Some(vec![k]));
        }
    }

    #[test]
    fn test_concurrent_release_at_most_once() {
        let b = Arc::new(barrier(&["cap1", "cap2"]));
        for key in 0..200u64 {
            b.aggregate("cap1", key, format!("a{}", key)).unwrap();
            b.aggregate("cap2", key, format!("b{}", key)).unwrap();
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let b = Arc::clone(&b);
                let tx = tx.clone();
                thread::spawn(move || {
                    for key in 0..200u64 {
                        if let Some(items) = b.pop(key) {
                            tx.send((key, items.len())).unwrap();
                        }
                    }
                })
            })
            .collect();
        drop(tx);
        for h in handles {
            h.join().unwrap();
        }

        let released: Vec<(u64, usize)> = rx.iter().collect();
        assert_eq!(released.len(), 200);
        assert!(released.iter().all(|(_, n)| *n == 2));
    }
}
