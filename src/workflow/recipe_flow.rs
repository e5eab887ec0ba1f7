//! 食谱处理流程 - 流程层
//!
//! 核心职责：定义"一条食谱"的完整处理流程
//!
//! 流程顺序：
//! 1. 创建独占会话 → 导航到详情页
//! 2. 提取内容 → DetailLoaded
//! 3. 构建导出记录 → 持久化写出 → Exported
//! 4. 无论成败都释放会话
//!
//! 任何一步失败都在本层被拦下：记录 Failed + 错误日志后正常返回，
//! 绝不让工作池看到未处理的失败任务。

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::browser::{Session, SessionFactory};
use crate::models::{Recipe, RecipeRef};
use crate::services::{OutputSink, PageExtractor, PageLogger};
use crate::tracker::StateTracker;
use crate::utils::logging::truncate_text;
use crate::workflow::recipe_ctx::RecipeCtx;

/// 食谱处理结果
#[derive(Debug)]
pub enum ProcessResult {
    /// 导出成功，携带完整记录（供内存清理阶段使用）
    Exported(Recipe),
    /// 处理失败（已记录，不影响其他食谱）
    Failed,
}

/// 食谱处理流程
///
/// - 编排单条食谱的完整处理
/// - 不持有工作池，不认识 Vec<RecipeRef>
/// - 只依赖能力层（extractor / sink / tracker / logger）
pub struct RecipeFlow {
    session_factory: Arc<dyn SessionFactory>,
    extractor: Arc<dyn PageExtractor>,
    sink: Arc<dyn OutputSink>,
    tracker: Arc<StateTracker>,
    page_logger: Arc<PageLogger>,
}

impl RecipeFlow {
    /// 创建新的食谱处理流程
    pub fn new(
        session_factory: Arc<dyn SessionFactory>,
        extractor: Arc<dyn PageExtractor>,
        sink: Arc<dyn OutputSink>,
        tracker: Arc<StateTracker>,
        page_logger: Arc<PageLogger>,
    ) -> Self {
        Self {
            session_factory,
            extractor,
            sink,
            tracker,
            page_logger,
        }
    }

    /// 处理一条已认领的食谱
    ///
    /// 错误在本层消化：失败的食谱被标记为 Failed 并记录错误，
    /// 返回值不携带 Err。
    pub async fn run(&self, recipe_ref: &RecipeRef, ctx: &RecipeCtx) -> ProcessResult {
        self.page_logger
            .log_event(&ctx.worker, "START recipe", &recipe_ref.title);

        match self.process(recipe_ref, ctx).await {
            Ok(recipe) => {
                self.page_logger
                    .log_event(&ctx.worker, "COMPLETE recipe", &recipe.title);
                info!(
                    "[{}] ✓ 食谱导出成功: {}",
                    ctx.collection_title,
                    truncate_text(&recipe.title, 60)
                );
                ProcessResult::Exported(recipe)
            }
            Err(e) => {
                self.page_logger.log_event(
                    &ctx.worker,
                    "ERROR recipe",
                    &format!("{} - {}", recipe_ref.title, e),
                );
                self.tracker.mark_failed(&recipe_ref.id);
                self.tracker.record_error(format!(
                    "食谱 {} {} 处理失败: {}",
                    recipe_ref.title, ctx, e
                ));
                ProcessResult::Failed
            }
        }
    }

    /// 会话生命周期包装：创建 → 使用 → 所有路径上释放
    async fn process(&self, recipe_ref: &RecipeRef, ctx: &RecipeCtx) -> Result<Recipe> {
        let session = self.session_factory.create().await?;
        let result = self.process_on(session.as_ref(), recipe_ref, ctx).await;
        // 无论写出是否成功都关闭会话
        if let Err(e) = session.close().await {
            debug!("关闭会话失败（忽略）: {}", e);
        }
        result
    }

    async fn process_on(
        &self,
        session: &dyn Session,
        recipe_ref: &RecipeRef,
        ctx: &RecipeCtx,
    ) -> Result<Recipe> {
        self.page_logger.log_navigation(&ctx.worker, &recipe_ref.url);
        session.navigate(&recipe_ref.url).await?;

        let mut recipe = Recipe::from_ref(recipe_ref);
        let detail = self.extractor.recipe_detail(session, ctx.kind).await?;
        recipe.apply_detail(detail);
        self.tracker.mark_detail_loaded(&recipe.id);

        let record = recipe.to_export_record();
        self.sink.write_recipe_record(&recipe.id, &record)?;
        recipe.mark_exported();
        self.tracker.mark_exported(&recipe.id);
        self.tracker.add_processed_recipe();

        Ok(recipe)
    }
}
