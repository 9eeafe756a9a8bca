//! 原生资源句柄 (Scoped native handles)
//!
//! 帧、候选区域、跟踪结果、实例状态在原生库里都需要显式释放。
//! 这里统一用 `Handle<T>` 包装: 创建时在 `HandleLedger` 记账, Drop 时销账,
//! 所以任何退出路径 (包括 `?` 提前返回) 都会释放。

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 句柄账本: 记录获取/释放次数,用于检查泄漏
#[derive(Debug, Default)]
pub struct HandleLedger {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl HandleLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 当前存活的句柄数
    pub fn live(&self) -> u64 {
        self.acquired
            .load(Ordering::Acquire)
            .saturating_sub(self.released.load(Ordering::Acquire))
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }
}

/// 作用域句柄,离开作用域即释放
pub struct Handle<T> {
    value: T,
    ledger: Arc<HandleLedger>,
}

impl<T> Handle<T> {
    pub fn new(value: T, ledger: &Arc<HandleLedger>) -> Self {
        ledger.acquired.fetch_add(1, Ordering::AcqRel);
        Self {
            value,
            ledger: Arc::clone(ledger),
        }
    }

    pub fn ledger(&self) -> &Arc<HandleLedger> {
        &self.ledger
    }
}

impl<T: Clone> Clone for Handle<T> {
    /// 克隆得到一个独立的句柄 (独立记账)
    fn clone(&self) -> Self {
        Handle::new(self.value.clone(), &self.ledger)
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Handle<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::AcqRel);
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: PartialEq> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_on_drop() {
        let ledger = HandleLedger::new();
        {
            let _a = Handle::new(1u32, &ledger);
            let _b = Handle::new(2u32, &ledger);
            assert_eq!(ledger.live(), 2);
        }
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.acquired(), 2);
        assert_eq!(ledger.released(), 2);
    }

    #[test]
    fn test_clone_is_independent() {
        let ledger = HandleLedger::new();
        let a = Handle::new(vec![1u8, 2, 3], &ledger);
        let b = a.clone();
        assert_eq!(ledger.live(), 2);
        drop(a);
        assert_eq!(ledger.live(), 1);
        assert_eq!(*b, vec![1, 2, 3]);
    }

    #[test]
    fn test_release_on_early_return() {
        fn build(ledger: &Arc<HandleLedger>, fail_at: usize) -> Result<Vec<Handle<usize>>, ()> {
            let mut out = Vec::new();
            for i in 0..5 {
                if i == fail_at {
                    return Err(());
                }
                out.push(Handle::new(i, ledger));
            }
            Ok(out)
        }

        let ledger = HandleLedger::new();
        assert!(build(&ledger, 3).is_err());
        assert_eq!(ledger.acquired(), 3);
        assert_eq!(ledger.live(), 0);
    }
}
