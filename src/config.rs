use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时处理的合集数量（外层工作池大小）
    pub collection_workers: usize,
    /// 所有合集共享的食谱工作池大小（内层）
    pub recipe_workers: usize,
    /// 标题过滤模式：`合集正则[::食谱正则]`，为空表示不过滤
    pub pattern: Option<String>,
    /// 是否包含收藏合集
    pub saved_collections: bool,
    /// 标题匹配这些正则的合集不导出 JSON（仍会生成清单）
    pub excluded_collection_patterns: Vec<String>,
    /// 站点基础 URL
    pub base_url: String,
    /// 区域代码（决定"我的食谱"页面路径）
    pub locale: String,
    /// 输出目录
    pub output_dir: PathBuf,
    /// JSON 记录子目录
    pub json_dir: String,
    /// 认证 cookie 文件
    pub cookies_file: String,
    /// 页面抓取计时日志文件
    pub page_log_file: String,
    /// 页面加载超时（秒）
    pub page_load_timeout_secs: u64,
    /// 滚动等待间隔（毫秒）
    pub scroll_delay_ms: u64,
    /// 滚动加载的最大重试次数，达到上限接受部分结果
    pub max_scroll_retries: usize,
    /// 图片下载超时（秒）
    pub image_download_timeout_secs: u64,
    /// 单条食谱失败后是否继续处理其余食谱
    pub continue_on_error: bool,
    /// 是否以无头模式启动浏览器
    pub headless: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection_workers: 3,
            recipe_workers: 2,
            pattern: None,
            saved_collections: false,
            excluded_collection_patterns: vec!["^ZZ".to_string()],
            base_url: "https://cookidoo.thermomix.com".to_string(),
            locale: "en-US".to_string(),
            output_dir: PathBuf::from("./output"),
            json_dir: "json_food".to_string(),
            cookies_file: "cookies.json".to_string(),
            page_log_file: "log.txt".to_string(),
            page_load_timeout_secs: 30,
            scroll_delay_ms: 1000,
            max_scroll_retries: 3,
            image_download_timeout_secs: 30,
            continue_on_error: true,
            headless: true,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 加载配置：config.toml（可选）+ 环境变量覆盖
    pub fn load() -> AppResult<Self> {
        let mut config = if Path::new("config.toml").exists() {
            Self::from_file("config.toml")?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&text).map_err(|e| AppError::Config(e.to_string()))
    }

    /// 用环境变量覆盖当前配置
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("COLLECTION_WORKERS") {
            self.collection_workers = v;
        }
        if let Some(v) = env_parse("RECIPE_WORKERS") {
            self.recipe_workers = v;
        }
        if let Ok(v) = std::env::var("DUMP_PATTERN") {
            self.pattern = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = env_parse("SAVED_COLLECTIONS") {
            self.saved_collections = v;
        }
        if let Ok(v) = std::env::var("BASE_URL") {
            self.base_url = v;
        }
        if let Ok(v) = std::env::var("DUMP_LOCALE") {
            self.locale = v;
        }
        if let Ok(v) = std::env::var("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("COOKIES_FILE") {
            self.cookies_file = v;
        }
        if let Some(v) = env_parse("PAGE_LOAD_TIMEOUT_SECS") {
            self.page_load_timeout_secs = v;
        }
        if let Some(v) = env_parse("MAX_SCROLL_RETRIES") {
            self.max_scroll_retries = v;
        }
        if let Some(v) = env_parse("CONTINUE_ON_ERROR") {
            self.continue_on_error = v;
        }
        if let Some(v) = env_parse("HEADLESS") {
            self.headless = v;
        }
        if let Some(v) = env_parse("VERBOSE_LOGGING") {
            self.verbose_logging = v;
        }
    }

    /// "我的食谱"（合集列表）页面地址
    pub fn collections_url(&self) -> String {
        format!("{}/organize/{}/my-recipes", self.base_url, self.locale)
    }

    /// 自定义合集管理页地址（读取官方数量用）
    pub fn manage_lists_url(&self) -> String {
        format!(
            "{}/organize/{}/transclude/manage-custom-list-modal/r1000",
            self.base_url, self.locale
        )
    }

    /// 并发会话数量上限（报告用）
    pub fn max_concurrent_sessions(&self) -> usize {
        self.collection_workers * (1 + self.recipe_workers)
    }

    /// 编译标题过滤与排除正则
    ///
    /// 模式格式为 `合集正则[::食谱正则]`；没有 `::` 时整体视为合集正则。
    pub fn compile_patterns(&self) -> AppResult<FilterPatterns> {
        let (collection, recipe) = match &self.pattern {
            None => (None, None),
            Some(raw) => match raw.split_once("::") {
                None => (Some(compile(raw)?), None),
                Some((coll, rec)) => {
                    let coll = if coll.is_empty() {
                        None
                    } else {
                        Some(compile(coll)?)
                    };
                    let rec = if rec.is_empty() {
                        None
                    } else {
                        Some(compile(rec)?)
                    };
                    (coll, rec)
                }
            },
        };

        let mut excluded = Vec::new();
        for pattern in &self.excluded_collection_patterns {
            // 排除正则不区分大小写
            excluded.push(
                regex::RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| AppError::Config(format!("非法排除正则 '{}': {}", pattern, e)))?,
            );
        }

        Ok(FilterPatterns {
            collection,
            recipe,
            excluded,
        })
    }

    /// 检查配置取值，返回问题列表（仅警告，不中止）
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.collection_workers == 0 {
            issues.push("collection_workers 必须至少为 1".to_string());
        }
        if self.recipe_workers == 0 {
            issues.push("recipe_workers 必须至少为 1".to_string());
        }
        if self.page_load_timeout_secs < 5 {
            issues.push("page_load_timeout_secs 建议至少 5 秒".to_string());
        }
        if self.max_scroll_retries == 0 {
            issues.push("max_scroll_retries 必须至少为 1".to_string());
        }
        if self.max_concurrent_sessions() > 50 {
            issues.push(format!(
                "并发会话上限 {} 可能消耗过多资源",
                self.max_concurrent_sessions()
            ));
        }
        issues
    }
}

fn compile(pattern: &str) -> AppResult<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Config(format!("非法正则 '{}': {}", pattern, e)))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// 编译后的标题过滤规则
///
/// 合集正则与食谱正则是合取关系：合集先按合集正则筛选，
/// 被选中的合集内部再按食谱正则筛选单条食谱。
#[derive(Debug, Default)]
pub struct FilterPatterns {
    /// 合集标题过滤
    pub collection: Option<Regex>,
    /// 食谱标题过滤
    pub recipe: Option<Regex>,
    /// 合集级 JSON 导出排除
    pub excluded: Vec<Regex>,
}

impl FilterPatterns {
    /// 该合集是否被排除在 JSON 导出之外（清单仍然会生成）
    pub fn is_excluded_from_export(&self, collection_title: &str) -> bool {
        self.excluded.iter().any(|re| re.is_match(collection_title))
    }

    /// 该食谱标题是否通过食谱级过滤
    pub fn recipe_matches(&self, recipe_title: &str) -> bool {
        match &self.recipe {
            Some(re) => re.is_match(recipe_title),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_split_collection_only() {
        let config = Config {
            pattern: Some("Soup".to_string()),
            ..Default::default()
        };
        let patterns = config.compile_patterns().unwrap();
        assert!(patterns.collection.is_some());
        assert!(patterns.recipe.is_none());
        assert!(patterns.collection.unwrap().is_match("Winter Soups"));
    }

    #[test]
    fn test_pattern_split_both_scopes() {
        let config = Config {
            pattern: Some("Mains::Chicken".to_string()),
            ..Default::default()
        };
        let patterns = config.compile_patterns().unwrap();
        assert!(patterns.collection.as_ref().unwrap().is_match("Mains"));
        assert!(patterns.recipe_matches("Chicken Curry"));
        assert!(!patterns.recipe_matches("Beef Stew"));
    }

    #[test]
    fn test_pattern_recipe_scope_only() {
        let config = Config {
            pattern: Some("::Cake".to_string()),
            ..Default::default()
        };
        let patterns = config.compile_patterns().unwrap();
        assert!(patterns.collection.is_none());
        assert!(patterns.recipe_matches("Carrot Cake"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = Config {
            pattern: Some("[unclosed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.compile_patterns(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_exclusion_is_case_insensitive() {
        let patterns = Config::default().compile_patterns().unwrap();
        assert!(patterns.is_excluded_from_export("ZZ Archived"));
        assert!(patterns.is_excluded_from_export("zz old stuff"));
        assert!(!patterns.is_excluded_from_export("Soups"));
    }

    #[test]
    fn test_session_bound_arithmetic() {
        let config = Config {
            collection_workers: 3,
            recipe_workers: 2,
            ..Default::default()
        };
        assert_eq!(config.max_concurrent_sessions(), 9);
    }

    #[test]
    fn test_validate_flags_zero_workers() {
        let config = Config {
            collection_workers: 0,
            ..Default::default()
        };
        assert!(!config.validate().is_empty());
    }
}
