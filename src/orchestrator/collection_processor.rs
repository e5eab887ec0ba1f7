//! 单个合集处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责一个合集的端到端处理：
//!
//! 1. **独占会话**：为合集页创建自己的会话，发现完成后立即释放
//! 2. **发现存根**：滚动到底后提取全部食谱存根，记录实际数量
//! 3. **数量核对**：收藏合集额外读取页头数量，不一致只警告
//! 4. **认领分发**：通过状态追踪器认领后提交到共享食谱池
//! 5. **清单写出**：全部存根（无论是否导出）写入清单文件
//! 6. **内存清理**：本批食谱完成后释放已导出记录的重量级字段
//!
//! 任何失败都在本层被拦下并记入错误列表，绝不中断其他合集。

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::{Session, SessionFactory};
use crate::config::FilterPatterns;
use crate::models::{Collection, CollectionKind, Recipe};
use crate::services::{OutputSink, PageExtractor, PageLogger};
use crate::tracker::StateTracker;
use crate::workflow::{ProcessResult, RecipeCtx, RecipeFlow};

/// 合集处理所需的共享依赖
///
/// `recipe_pool` 是全局唯一的内层食谱池，在所有合集之间共享，
/// 因此食谱级并发与同时活跃的合集数量无关。
pub struct CollectionDeps {
    pub session_factory: Arc<dyn SessionFactory>,
    pub extractor: Arc<dyn PageExtractor>,
    pub sink: Arc<dyn OutputSink>,
    pub tracker: Arc<StateTracker>,
    pub page_logger: Arc<PageLogger>,
    pub patterns: Arc<FilterPatterns>,
    pub recipe_pool: Arc<Semaphore>,
    pub continue_on_error: bool,
}

/// 处理单个合集
///
/// 返回同一个合集值（已填充发现结果）。失败的合集原样返回，
/// 错误已记入状态追踪器。
pub async fn process_collection(
    deps: Arc<CollectionDeps>,
    mut collection: Collection,
    collection_index: usize,
) -> Collection {
    let worker = format!("collection-{}", collection_index);
    deps.page_logger
        .log_event(&worker, "START collection", &collection.title);

    let handles = match discover_and_submit(&deps, &mut collection, &worker).await {
        Ok(handles) => handles,
        Err(e) => {
            deps.page_logger.log_event(
                &worker,
                "ERROR collection",
                &format!("{} - {}", collection.title, e),
            );
            deps.tracker
                .record_error(format!("合集 {} 处理失败: {}", collection.title, e));
            return collection;
        }
    };

    // 等待本合集提交的所有食谱任务完成
    let mut processed = Vec::new();
    let mut failed = 0usize;
    for handle in handles {
        match handle.await {
            Ok(ProcessResult::Exported(recipe)) => processed.push(recipe),
            Ok(ProcessResult::Failed) => failed += 1,
            Err(e) => {
                deps.tracker.record_error(format!("食谱任务执行失败: {}", e));
                failed += 1;
            }
        }
    }

    if failed > 0 && !deps.continue_on_error {
        // 快速失败模式：食谱失败升级为合集失败（已在食谱层记录过明细）
        deps.tracker.record_error(format!(
            "合集 {} 因 {} 条食谱失败而中止（continue_on_error = false）",
            collection.title, failed
        ));
        deps.page_logger.log_event(
            &worker,
            "ERROR collection",
            &format!("{} - {} 条食谱失败", collection.title, failed),
        );
        return collection;
    }

    cleanup_recipe_memory(&deps, &mut processed);
    deps.tracker.add_processed_collection();

    deps.page_logger.log_event(
        &worker,
        "COMPLETE collection",
        &format!("{} ({} 条导出)", collection.title, processed.len()),
    );
    collection
}

/// 会话生命周期包装：发现 + 分发结束后立即释放会话，
/// 不让漫长的食谱尾巴占着合集会话
async fn discover_and_submit(
    deps: &Arc<CollectionDeps>,
    collection: &mut Collection,
    worker: &str,
) -> Result<Vec<JoinHandle<ProcessResult>>> {
    let session = deps.session_factory.create().await?;
    let result = discover_on(deps, session.as_ref(), collection, worker).await;
    if let Err(e) = session.close().await {
        debug!("关闭合集会话失败（忽略）: {}", e);
    }
    result
}

async fn discover_on(
    deps: &Arc<CollectionDeps>,
    session: &dyn Session,
    collection: &mut Collection,
    worker: &str,
) -> Result<Vec<JoinHandle<ProcessResult>>> {
    deps.page_logger.log_navigation(worker, &collection.url);
    session.navigate(&collection.url).await?;
    deps.extractor.settle(session, collection.kind).await?;

    let stubs = deps
        .extractor
        .collection_stubs(session, collection.kind)
        .await?;
    collection.discovered_count = stubs.len();
    info!("✓ 合集 {} 发现 {} 条食谱", collection.title, stubs.len());

    // 收藏合集：页头数量与实际数量不一致是客户端渲染不完整的征兆，非错误
    if collection.kind == CollectionKind::Saved {
        collection.header_count = deps.extractor.header_count(session).await.unwrap_or(None);
        if let Some(header) = collection.header_count {
            if header != collection.discovered_count {
                warn!(
                    "⚠️ 合集 {} 数量不一致: 页头 {} 条，页面实际 {} 条",
                    collection.title, header, collection.discovered_count
                );
            }
        }
    }

    // 排除规则对整个合集只判定一次
    let excluded = deps.patterns.is_excluded_from_export(&collection.title);
    if excluded {
        info!(
            "合集 {} 被排除在 JSON 导出之外（清单仍会生成）",
            collection.title
        );
    }

    let flow = Arc::new(RecipeFlow::new(
        Arc::clone(&deps.session_factory),
        Arc::clone(&deps.extractor),
        Arc::clone(&deps.sink),
        Arc::clone(&deps.tracker),
        Arc::clone(&deps.page_logger),
    ));

    let mut handles = Vec::new();
    let mut seq = 0usize;
    for stub in stubs {
        // 清单记录全部发现的存根，与认领 / 过滤结果无关
        collection.recipes.push(stub.clone());

        if excluded || !deps.patterns.recipe_matches(&stub.title) {
            continue;
        }
        // 去重认领：同一条食谱出现在多个合集时只有一个认领者
        if !deps.tracker.claim_for_processing(&stub.id) {
            debug!("食谱 {} 已被其他合集认领，跳过", stub.id);
            continue;
        }
        collection.export_recipes.push(stub.clone());

        seq += 1;
        let ctx = RecipeCtx::new(
            collection.title.clone(),
            collection.kind,
            format!("{}-recipe-{}", worker, seq),
        );
        let flow = Arc::clone(&flow);
        // 共享内层池：拿到许可才派发下一条
        let permit = deps.recipe_pool.clone().acquire_owned().await?;
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            flow.run(&stub, &ctx).await
        }));
    }

    collection.build_listing_text();
    deps.sink.write_collection_listing(
        &collection.listing_label(),
        &collection.listing_text,
        collection.recipes.len(),
    )?;

    Ok(handles)
}

/// 本批食谱完成后的内存清理
///
/// 只是内存优化：导出记录此前已持久化，清理与否不影响输出正确性。
/// 追踪器里不是 `Exported` 状态的食谱会被拒绝清理。
fn cleanup_recipe_memory(deps: &Arc<CollectionDeps>, recipes: &mut [Recipe]) {
    let mut cleared = 0usize;
    let mut saved_bytes = 0usize;
    for recipe in recipes.iter_mut() {
        if !deps.tracker.can_clear_memory(&recipe.id) {
            continue;
        }
        let before = recipe.estimated_memory();
        if recipe.clear_heavy_fields() {
            deps.tracker.mark_memory_cleared(&recipe.id);
            cleared += 1;
            saved_bytes += before.saturating_sub(recipe.estimated_memory());
        }
    }
    if cleared > 0 {
        debug!("🧹 内存清理: {} 条食谱，释放约 {} 字符", cleared, saved_bytes);
    }
}
