//! 状态追踪器 - 全进程共享状态
//!
//! ## 职责
//!
//! 1. **去重认领**：每个食谱 id 全程只允许被认领一次，这是防止同一条
//!    食谱出现在多个合集时被重复抓取 / 重复导出的唯一同步点
//! 2. **生命周期状态机**：`Claimed → DetailLoaded → Exported → MemoryCleared`，
//!    乱序转移被拒绝并记录警告，而不是被悄悄接受或重排
//! 3. **运行计数**：已处理合集数、已处理食谱数、错误列表
//!
//! ## 并发模型
//!
//! 整个追踪器只有一把锁。跨条目的不变量（一次认领）需要单一串行化点，
//! 因此不拆分为每条目一把锁。所有方法都是短临界区，不跨 await 持锁。

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{error, warn};

use crate::models::RecipeState;

/// 状态追踪器
///
/// 唯一被多个工作者并发修改的对象；以 `Arc<StateTracker>` 注入，
/// 不做所有权转移。
#[derive(Debug, Default)]
pub struct StateTracker {
    inner: Mutex<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    /// id → 生命周期状态；不在表中即为"未见过"
    states: HashMap<String, RecipeState>,
    processed_collections: usize,
    processed_recipes: usize,
    errors: Vec<String>,
}

/// 某一时刻的状态汇总（只读）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub claimed: usize,
    pub detail_loaded: usize,
    pub exported: usize,
    pub memory_cleared: usize,
    pub failed: usize,
    pub total_recipes: usize,
    pub processed_collections: usize,
    pub processed_recipes: usize,
    pub error_count: usize,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试认领一条食谱的独占处理权
    ///
    /// 第一次调用返回 true 并进入 `Claimed`；此后对同一 id 的任何调用
    /// 都返回 false 且无副作用。
    pub fn claim_for_processing(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if inner.states.contains_key(id) {
            return false;
        }
        inner.states.insert(id.to_string(), RecipeState::Claimed);
        true
    }

    /// 详情页已抓取：`Claimed → DetailLoaded`
    pub fn mark_detail_loaded(&self, id: &str) {
        self.transition(id, RecipeState::DetailLoaded, &[RecipeState::Claimed]);
    }

    /// 导出记录已写出：`Claimed|DetailLoaded → Exported`
    ///
    /// 乱序调用记录警告后忽略（不终止运行）。
    pub fn mark_exported(&self, id: &str) {
        self.transition(
            id,
            RecipeState::Exported,
            &[RecipeState::Claimed, RecipeState::DetailLoaded],
        );
    }

    /// 是否允许释放该食谱的重量级字段（仅当权威状态为 `Exported`）
    pub fn can_clear_memory(&self, id: &str) -> bool {
        let inner = self.lock();
        inner.states.get(id) == Some(&RecipeState::Exported)
    }

    /// 内存已释放：`Exported → MemoryCleared`
    pub fn mark_memory_cleared(&self, id: &str) {
        self.transition(id, RecipeState::MemoryCleared, &[RecipeState::Exported]);
    }

    /// 标记该食谱处理失败（终态；不阻塞其他食谱）
    pub fn mark_failed(&self, id: &str) {
        let mut inner = self.lock();
        inner.states.insert(id.to_string(), RecipeState::Failed);
    }

    /// 记录一条错误（绝不失败）
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        let mut inner = self.lock();
        inner.errors.push(message);
    }

    /// 合集处理完成计数 +1
    pub fn add_processed_collection(&self) {
        self.lock().processed_collections += 1;
    }

    /// 食谱处理完成计数 +1
    pub fn add_processed_recipe(&self) {
        self.lock().processed_recipes += 1;
    }

    /// 只读汇总，用于最终报告
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock();
        let mut snapshot = StateSnapshot {
            claimed: 0,
            detail_loaded: 0,
            exported: 0,
            memory_cleared: 0,
            failed: 0,
            total_recipes: inner.states.len(),
            processed_collections: inner.processed_collections,
            processed_recipes: inner.processed_recipes,
            error_count: inner.errors.len(),
        };
        for state in inner.states.values() {
            match state {
                RecipeState::Claimed => snapshot.claimed += 1,
                RecipeState::DetailLoaded => snapshot.detail_loaded += 1,
                RecipeState::Exported => snapshot.exported += 1,
                RecipeState::MemoryCleared => snapshot.memory_cleared += 1,
                RecipeState::Failed => snapshot.failed += 1,
            }
        }
        snapshot
    }

    /// 错误列表的副本
    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    /// 带前置状态检查的转移；不满足时记录生命周期违规并拒绝
    fn transition(&self, id: &str, to: RecipeState, allowed_from: &[RecipeState]) {
        let mut inner = self.lock();
        let current = inner.states.get(id).copied();
        match current {
            Some(state) if allowed_from.contains(&state) => {
                inner.states.insert(id.to_string(), to);
            }
            Some(state) => {
                warn!(
                    "⚠️ 生命周期顺序违规: 食谱 {} 不允许 {} → {}，已拒绝",
                    id, state, to
                );
            }
            None => {
                warn!("⚠️ 生命周期顺序违规: 食谱 {} 尚未认领就请求 {}，已拒绝", id, to);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        // 锁中毒意味着某个持锁线程 panic，此时计数已不可信
        self.inner.lock().expect("状态追踪器的锁已中毒")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_claim_returns_true_exactly_once() {
        let tracker = StateTracker::new();
        assert!(tracker.claim_for_processing("r1"));
        assert!(!tracker.claim_for_processing("r1"));
        assert!(!tracker.claim_for_processing("r1"));
        assert!(tracker.claim_for_processing("r2"));
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let tracker = StateTracker::new();
        assert!(tracker.claim_for_processing("r1"));
        tracker.mark_detail_loaded("r1");
        assert!(!tracker.can_clear_memory("r1"));
        tracker.mark_exported("r1");
        assert!(tracker.can_clear_memory("r1"));
        tracker.mark_memory_cleared("r1");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.memory_cleared, 1);
        assert_eq!(snapshot.total_recipes, 1);
    }

    #[test]
    fn test_export_without_detail_load_is_allowed() {
        // Claimed → Exported 是合法捷径（详情与导出在同一所有者手里）
        let tracker = StateTracker::new();
        assert!(tracker.claim_for_processing("r1"));
        tracker.mark_exported("r1");
        assert!(tracker.can_clear_memory("r1"));
    }

    #[test]
    fn test_out_of_order_clear_is_refused() {
        let tracker = StateTracker::new();
        assert!(tracker.claim_for_processing("r1"));
        tracker.mark_detail_loaded("r1");
        // 尚未导出，清理必须被拒绝
        assert!(!tracker.can_clear_memory("r1"));
        tracker.mark_memory_cleared("r1");
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.memory_cleared, 0);
        assert_eq!(snapshot.detail_loaded, 1);
    }

    #[test]
    fn test_exported_is_not_regressed_by_detail_loaded() {
        let tracker = StateTracker::new();
        assert!(tracker.claim_for_processing("r1"));
        tracker.mark_exported("r1");
        tracker.mark_detail_loaded("r1");
        assert!(tracker.can_clear_memory("r1"));
    }

    #[test]
    fn test_failed_is_terminal() {
        let tracker = StateTracker::new();
        assert!(tracker.claim_for_processing("r1"));
        tracker.mark_failed("r1");
        tracker.mark_exported("r1");
        assert!(!tracker.can_clear_memory("r1"));
        assert_eq!(tracker.snapshot().failed, 1);
    }

    #[test]
    fn test_record_error_accumulates() {
        let tracker = StateTracker::new();
        tracker.record_error("boom 1");
        tracker.record_error("boom 2");
        assert_eq!(tracker.snapshot().error_count, 2);
        assert_eq!(tracker.errors().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_claims_win_exactly_once() {
        let tracker = Arc::new(StateTracker::new());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                tracker.claim_for_processing("shared-id")
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(tracker.snapshot().total_recipes, 1);
    }
}
