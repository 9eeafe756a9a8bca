//! 跨摄像头匹配 (Cross-camera matching)
//!
//! 匹配算法本身属于外部组件; `run_matcher` 负责阈值校验、空输入短路和结果的句柄包装。
//! `GreedyMatcher` 是一个按世界坐标距离贪心关联的参考实现。

use std::sync::Arc;

use tracing::debug;

use super::types::{CameraRegions, MovingCandidate, RegionCandidate};
use crate::error::{CoreError, Result};
use crate::handle::{Handle, HandleLedger};

/// 跨摄像头匹配器接口 (对固定输入必须是确定性的)
pub trait CrossCameraMatcher: Send + Sync {
    fn match_regions(&self, threshold: f32, regions: &[CameraRegions])
        -> Result<Vec<MovingCandidate>>;
}

/// 调用匹配器并包装结果
pub fn run_matcher(
    matcher: &dyn CrossCameraMatcher,
    threshold: f32,
    regions: &[CameraRegions],
    ledger: &Arc<HandleLedger>,
) -> Result<Vec<Handle<MovingCandidate>>> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(CoreError::format(format!(
            "matcher threshold must be in [0, 1], got {}",
            threshold
        )));
    }
    if regions.iter().all(|r| r.candidates.is_empty()) {
        return Ok(Vec::new());
    }

    let matched = matcher.match_regions(threshold, regions)?;
    debug!(
        cameras = regions.len(),
        candidates = matched.len(),
        "cross camera matching done"
    );
    Ok(matched
        .into_iter()
        .map(|c| Handle::new(c, ledger))
        .collect())
}

// ========== 参考实现 ==========

/// 贪心匹配器: 相似度 = 1 - 距离 / max_distance
#[derive(Debug, Clone)]
pub struct GreedyMatcher {
    max_distance: f32,
}

impl GreedyMatcher {
    pub fn new(max_distance: f32) -> Self {
        Self {
            max_distance: max_distance.max(f32::EPSILON),
        }
    }

    fn similarity(&self, a: &RegionCandidate, b: &RegionCandidate) -> f32 {
        (1.0 - a.position.distance(&b.position) / self.max_distance).clamp(0.0, 1.0)
    }
}

impl Default for GreedyMatcher {
    fn default() -> Self {
        Self::new(500.0)
    }
}

impl CrossCameraMatcher for GreedyMatcher {
    fn match_regions(
        &self,
        threshold: f32,
        regions: &[CameraRegions],
    ) -> Result<Vec<MovingCandidate>> {
        // (camera索引, 区域索引) 对,按相似度降序
        let mut pairs = Vec::new();
        for (ci, a) in regions.iter().enumerate() {
            for (cj, b) in regions.iter().enumerate().skip(ci + 1) {
                if a.camera_id == b.camera_id {
                    continue;
                }
                for (ri, ra) in a.candidates.iter().enumerate() {
                    for (rj, rb) in b.candidates.iter().enumerate() {
                        let s = self.similarity(ra, rb);
                        if s >= threshold {
                            pairs.push((s, (ci, ri), (cj, rj)));
                        }
                    }
                }
            }
        }
        pairs.sort_by(|x, y| {
            y.0.total_cmp(&x.0)
                .then_with(|| x.1.cmp(&y.1))
                .then_with(|| x.2.cmp(&y.2))
        });

        let mut groups: Vec<Vec<(usize, usize)>> = Vec::new();
        let mut owner = std::collections::HashMap::new();
        for (_, a, b) in pairs {
            match (owner.get(&a).copied(), owner.get(&b).copied()) {
                (None, None) => {
                    owner.insert(a, groups.len());
                    owner.insert(b, groups.len());
                    groups.push(vec![a, b]);
                }
                (Some(g), None) => {
                    if !groups[g].iter().any(|m| m.0 == b.0) {
                        owner.insert(b, g);
                        groups[g].push(b);
                    }
                }
                (None, Some(g)) => {
                    if !groups[g].iter().any(|m| m.0 == a.0) {
                        owner.insert(a, g);
                        groups[g].push(a);
                    }
                }
                // 已分属不同组,不合并
                (Some(_), Some(_)) => {}
            }
        }

        // 未匹配的区域各自成组
        for (ci, cams) in regions.iter().enumerate() {
            for ri in 0..cams.candidates.len() {
                if !owner.contains_key(&(ci, ri)) {
                    groups.push(vec![(ci, ri)]);
                }
            }
        }

        for g in groups.iter_mut() {
            g.sort_unstable();
        }
        groups.sort_by(|x, y| x[0].cmp(&y[0]));

        Ok(groups
            .into_iter()
            .map(|g| {
                MovingCandidate::new(
                    g.into_iter()
                        .map(|(ci, ri)| (*regions[ci].candidates[ri]).clone())
                        .collect(),
                )
            })
            .collect())
    }
}
