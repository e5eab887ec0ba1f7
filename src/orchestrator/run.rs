//! 运行协调器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责资源管理和两级并发调度。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：加载 cookie、启动浏览器、组装能力层
//! 2. **引导发现**：单线程依次发现固定 / 自定义 / 收藏分组与官方数量
//! 3. **认证校验**：调度任何任务之前先确认会话可信，失败立即中止
//! 4. **并发控制**：外层合集池 + 全局共享的内层食谱池（两把 Semaphore）
//! 5. **总索引**：全部工作完成后按 (类型, 标题) 排序写出
//! 6. **全局统计**：汇总处理数量、错误数量与内存状态
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个合集的细节，向下委托 collection_processor
//! - **资源所有者**：唯一持有会话工厂和输出能力的模块
//! - **故障隔离**：单个合集 / 食谱的失败只记录，不中断运行

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use url::Url;

use crate::browser::{launch_browser, load_cookies, CdpSessionFactory, Session, SessionFactory};
use crate::config::{Config, FilterPatterns};
use crate::error::AppError;
use crate::models::{Collection, CollectionKind};
use crate::orchestrator::collection_processor::{process_collection, CollectionDeps};
use crate::services::{
    CollectionDiscovery, FsOutputSink, JsPageExtractor, OutputSink, PageExtractor, PageLogger,
};
use crate::tracker::{StateSnapshot, StateTracker};

/// 登录页标题（认证失败的判定依据之一）
const LOGIN_TITLES: &[&str] = &["Sign in", "Login", "Anmelden"];

/// 总索引中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub kind: CollectionKind,
    pub title: String,
    pub count: usize,
}

/// 运行报告
#[derive(Debug)]
pub struct RunReport {
    pub processed_collections: usize,
    pub processed_recipes: usize,
    pub error_count: usize,
    pub index: Vec<IndexEntry>,
}

/// 应用主结构
pub struct App {
    config: Config,
    patterns: Arc<FilterPatterns>,
    session_factory: Arc<dyn SessionFactory>,
    extractor: Arc<dyn PageExtractor>,
    sink: Arc<dyn OutputSink>,
    tracker: Arc<StateTracker>,
    page_logger: Arc<PageLogger>,
}

impl App {
    /// 初始化应用：加载 cookie、启动浏览器、组装生产实现
    pub async fn initialize(config: Config) -> Result<Self> {
        for issue in config.validate() {
            warn!("⚠️ 配置检查: {}", issue);
        }

        // 认证凭据必须在启动浏览器之前就绪
        let cookies = load_cookies(&config.cookies_file)?;

        let browser = launch_browser(config.headless).await?;
        let session_factory = Arc::new(CdpSessionFactory::new(
            browser,
            cookies,
            config.base_url.clone(),
            Duration::from_secs(config.page_load_timeout_secs),
        ));

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| AppError::Config(format!("非法 base_url '{}': {}", config.base_url, e)))?;
        let extractor = Arc::new(JsPageExtractor::new(
            base_url,
            Duration::from_millis(config.scroll_delay_ms),
            config.max_scroll_retries,
            Duration::from_secs(config.image_download_timeout_secs),
        ));
        let sink = Arc::new(FsOutputSink::new(
            config.output_dir.clone(),
            config.json_dir.clone(),
        ));
        let page_logger = Arc::new(PageLogger::new(config.page_log_file.clone()));

        Self::with_components(config, session_factory, extractor, sink, page_logger)
    }

    /// 用外部提供的能力实现组装应用（测试用同一入口）
    pub fn with_components(
        config: Config,
        session_factory: Arc<dyn SessionFactory>,
        extractor: Arc<dyn PageExtractor>,
        sink: Arc<dyn OutputSink>,
        page_logger: Arc<PageLogger>,
    ) -> Result<Self> {
        let patterns = Arc::new(config.compile_patterns()?);
        Ok(Self {
            config,
            patterns,
            session_factory,
            extractor,
            sink,
            tracker: Arc::new(StateTracker::new()),
            page_logger,
        })
    }

    pub fn tracker(&self) -> Arc<StateTracker> {
        Arc::clone(&self.tracker)
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunReport> {
        log_startup(&self.config);

        // ========== 引导阶段（单线程） ==========
        // 三类分组的发现依赖前一步留下的页面状态，刻意不并行
        let bootstrap = self.session_factory.create().await?;
        let discovery_result = self.bootstrap_discovery(bootstrap.as_ref()).await;
        if let Err(e) = bootstrap.close().await {
            warn!("关闭引导会话失败（忽略）: {}", e);
        }
        let all_collections = discovery_result?;

        // ========== 过滤与调度 ==========
        let (included, skipped): (Vec<Collection>, Vec<Collection>) = all_collections
            .into_iter()
            .partition(|c| should_process_collection(c, self.config.saved_collections, &self.patterns));
        for collection in &skipped {
            info!("跳过合集 {} （未匹配过滤条件）", collection.title);
        }
        log_schedule(&self.config, included.len());

        let deps = Arc::new(CollectionDeps {
            session_factory: Arc::clone(&self.session_factory),
            extractor: Arc::clone(&self.extractor),
            sink: Arc::clone(&self.sink),
            tracker: Arc::clone(&self.tracker),
            page_logger: Arc::clone(&self.page_logger),
            patterns: Arc::clone(&self.patterns),
            recipe_pool: Arc::new(Semaphore::new(self.config.recipe_workers)),
            continue_on_error: self.config.continue_on_error,
        });
        let collection_pool = Arc::new(Semaphore::new(self.config.collection_workers));

        let mut handles = Vec::new();
        for (index, collection) in included.into_iter().enumerate() {
            let permit = collection_pool.clone().acquire_owned().await?;
            let deps = Arc::clone(&deps);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                process_collection(deps, collection, index + 1).await
            }));
        }

        // 等待全部合集任务完成；完成顺序不保证，也不需要保证
        let mut finished = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(collection) => {
                    info!("✓ 合集处理完成: {}", collection.title);
                    finished.push(collection);
                }
                Err(e) => {
                    self.tracker.record_error(format!("合集任务执行失败: {}", e));
                }
            }
        }

        // ========== 总索引与汇总 ==========
        finished.extend(skipped);
        let (index_text, index) = build_master_index(&finished);
        self.sink.write_master_index(&index_text, index.len())?;

        let snapshot = self.tracker.snapshot();
        print_summary(&snapshot);

        Ok(RunReport {
            processed_collections: snapshot.processed_collections,
            processed_recipes: snapshot.processed_recipes,
            error_count: snapshot.error_count,
            index,
        })
    }

    /// 引导会话上的认证校验 + 顺序发现
    async fn bootstrap_discovery(&self, session: &dyn Session) -> Result<Vec<Collection>> {
        let collections_url = self.config.collections_url();
        self.page_logger.log_navigation("bootstrap", &collections_url);
        session
            .navigate(&collections_url)
            .await
            .context("无法打开合集列表页")?;

        self.verify_authentication(session).await?;

        let base_url = Url::parse(&self.config.base_url)
            .map_err(|e| AppError::Config(format!("非法 base_url: {}", e)))?;
        let discovery = CollectionDiscovery::new(base_url);

        let mut collections = discovery.discover_fixed(session).await?;
        collections.extend(discovery.discover_custom(session).await?);
        collections.extend(
            discovery
                .discover_saved(session, self.extractor.as_ref())
                .await?,
        );

        // 官方数量读取失败不影响运行，总索引退回实际数量
        self.page_logger
            .log_navigation("bootstrap", &self.config.manage_lists_url());
        if let Err(e) = discovery
            .fill_official_counts(session, &self.config.manage_lists_url(), &mut collections)
            .await
        {
            warn!("⚠️ 官方数量读取失败，总索引使用实际数量: {}", e);
        }

        info!("✓ 共发现 {} 个合集", collections.len());
        Ok(collections)
    }

    /// 认证校验：失败是致命错误，不调度任何任务
    async fn verify_authentication(&self, session: &dyn Session) -> Result<()> {
        if let Some(title) = session.title().await? {
            if LOGIN_TITLES.contains(&title.as_str()) {
                return Err(AppError::Authentication(format!(
                    "仍停留在登录页 (标题: {})，cookie 可能已过期，请重新保存",
                    title
                ))
                .into());
            }
        }

        let authenticated = session
            .eval("document.cookie.includes('v-authenticated')".to_string())
            .await?
            .as_bool()
            .unwrap_or(false);
        if !authenticated {
            return Err(AppError::Authentication(
                "认证 cookie 缺失或已失效，请重新保存 cookie".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// 合集调度前的包含判定
///
/// 包含条件：收藏合集且显式开启收藏导出；或没有配置合集过滤；
/// 或合集标题匹配过滤正则。未包含的合集完全跳过，不消耗会话。
pub fn should_process_collection(
    collection: &Collection,
    saved_enabled: bool,
    patterns: &FilterPatterns,
) -> bool {
    if collection.kind == CollectionKind::Saved && saved_enabled {
        return true;
    }
    match &patterns.collection {
        None => true,
        Some(re) => re.is_match(&collection.title),
    }
}

/// 构建总索引：按 (类型, 标题) 排序，与任务完成顺序无关
pub fn build_master_index(collections: &[Collection]) -> (String, Vec<IndexEntry>) {
    let mut entries: Vec<IndexEntry> = collections
        .iter()
        .map(|c| IndexEntry {
            kind: c.kind,
            title: c.title.clone(),
            count: c.index_count(),
        })
        .collect();
    entries.sort_by(|a, b| (a.kind, &a.title).cmp(&(b.kind, &b.title)));

    let mut text = String::new();
    for entry in &entries {
        text.push_str(&format!("{}\t{}\t{}\n", entry.count, entry.kind, entry.title));
    }
    (text, entries)
}

// ========== 日志辅助函数 ==========

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 并发食谱导出模式");
    info!("📊 合集并发: {}", config.collection_workers);
    info!("📊 食谱并发: {} (全局共享)", config.recipe_workers);
    info!("📊 会话上限: {}", config.max_concurrent_sessions());
    info!("{}", "=".repeat(60));
}

fn log_schedule(config: &Config, included: usize) {
    info!(
        "📦 将以 {} 个合集并发处理 {} 个合集",
        config.collection_workers, included
    );
    info!("💡 食谱任务进入全局共享池，与活跃合集数量无关\n");
}

fn print_summary(snapshot: &StateSnapshot) {
    info!("\n{}", "=".repeat(60));
    if snapshot.processed_collections == 0 && snapshot.processed_recipes == 0 {
        // 与一般错误区分开：多半是过滤条件或配置问题
        warn!("⚠️ 没有任何合集或食谱被处理，请检查过滤条件与配置");
        info!("{}", "=".repeat(60));
        return;
    }
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!(
        "✅ 已处理 {} 个合集，共 {} 条食谱",
        snapshot.processed_collections, snapshot.processed_recipes
    );
    info!(
        "🧹 内存状态: {} 条已清理, {} 条已导出, {} 条仍在内存",
        snapshot.memory_cleared, snapshot.exported, snapshot.detail_loaded
    );
    if snapshot.failed > 0 {
        info!("❌ 失败: {} 条食谱", snapshot.failed);
    }
    if snapshot.error_count > 0 {
        info!("❌ 运行期间共记录 {} 个错误", snapshot.error_count);
    }
    info!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;

    fn patterns(pattern: Option<&str>) -> FilterPatterns {
        let config = Config {
            pattern: pattern.map(|s| s.to_string()),
            ..Default::default()
        };
        config.compile_patterns().unwrap()
    }

    fn collection(title: &str, kind: CollectionKind) -> Collection {
        Collection::new(title, format!("https://x/{}", title), kind)
    }

    #[test]
    fn test_inclusion_no_pattern_takes_everything() {
        let p = patterns(None);
        assert!(should_process_collection(
            &collection("Soups", CollectionKind::Custom),
            false,
            &p
        ));
        assert!(should_process_collection(
            &collection("Bookmarks", CollectionKind::Bookmark),
            false,
            &p
        ));
        assert!(should_process_collection(
            &collection("Favorites", CollectionKind::Saved),
            false,
            &p
        ));
    }

    #[test]
    fn test_inclusion_pattern_gates_saved_unless_flag_set() {
        let p = patterns(Some("Soup"));
        let saved = collection("Favorites", CollectionKind::Saved);
        assert!(!should_process_collection(&saved, false, &p));
        assert!(should_process_collection(&saved, true, &p));
    }

    #[test]
    fn test_inclusion_pattern_filters_by_title() {
        let p = patterns(Some("Soup"));
        assert!(should_process_collection(
            &collection("Winter Soups", CollectionKind::Custom),
            false,
            &p
        ));
        assert!(!should_process_collection(
            &collection("Mains", CollectionKind::Custom),
            false,
            &p
        ));
    }

    #[test]
    fn test_inclusion_saved_flag_overrides_pattern() {
        let p = patterns(Some("Soup"));
        assert!(should_process_collection(
            &collection("Favorites", CollectionKind::Saved),
            true,
            &p
        ));
    }

    #[test]
    fn test_master_index_sorted_by_kind_then_title() {
        let mut soups = collection("Soups", CollectionKind::Custom);
        soups.discovered_count = 2;
        let mut mains = collection("Mains", CollectionKind::Custom);
        mains.discovered_count = 2;
        let mut favorites = collection("Favorites", CollectionKind::Saved);
        favorites.discovered_count = 2;

        // 完成顺序故意打乱
        let (text, entries) = build_master_index(&[favorites, soups, mains]);
        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Mains", "Soups", "Favorites"]);
        assert_eq!(text, "2\tcustom\tMains\n2\tcustom\tSoups\n2\tsaved\tFavorites\n");
    }

    #[test]
    fn test_master_index_prefers_official_count() {
        let mut soups = collection("Soups", CollectionKind::Custom);
        soups.discovered_count = 2;
        soups.official_count = Some(5);
        let (text, entries) = build_master_index(&[soups]);
        assert_eq!(entries[0].count, 5);
        assert!(text.starts_with("5\t"));
    }

    #[test]
    fn test_master_index_is_deterministic_across_orders() {
        let a = collection("Alpha", CollectionKind::Bookmark);
        let b = collection("Beta", CollectionKind::Custom);
        let c = collection("Gamma", CollectionKind::Saved);
        let (text1, _) = build_master_index(&[a.clone(), b.clone(), c.clone()]);
        let (text2, _) = build_master_index(&[c, a, b]);
        assert_eq!(text1, text2);
    }
}
