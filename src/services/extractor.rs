//! 页面内容提取服务 - 业务能力层
//!
//! 把"当前已导航的页面"变成结构化数据：合集页 → 食谱存根列表，
//! 详情页 → 完整内容字段。提取通过在页面内执行 JS 完成，
//! 一次 eval 拿回全部字段，避免逐元素往返。
//!
//! "滚动直到完全渲染"协议也由本服务负责：滚动、重数瓦片、点击
//! "加载更多"，连续无新增达到重试上限后接受部分结果退出（非错误）。

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::browser::Session;
use crate::error::AppError;
use crate::models::{CollectionKind, RecipeDetail, RecipeRef};

/// 页面内容提取能力
///
/// 对"页面已导航完成"这一前提是纯函数；滚动协议是调用提取前的
/// 准备步骤，由本 trait 一并提供。
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// 滚动合集页直到不再出现新瓦片（或达到重试上限）
    async fn settle(&self, session: &dyn Session, kind: CollectionKind) -> Result<()>;

    /// 从合集页提取食谱存根列表
    async fn collection_stubs(
        &self,
        session: &dyn Session,
        kind: CollectionKind,
    ) -> Result<Vec<RecipeRef>>;

    /// 读取收藏合集页头显示的数量（没有则为 None）
    async fn header_count(&self, session: &dyn Session) -> Result<Option<usize>>;

    /// 从详情页提取完整内容字段
    async fn recipe_detail(
        &self,
        session: &dyn Session,
        kind: CollectionKind,
    ) -> Result<RecipeDetail>;
}

/// 基于页面内 JS 执行的生产实现
pub struct JsPageExtractor {
    base_url: Url,
    scroll_delay: Duration,
    max_scroll_retries: usize,
    http: reqwest::Client,
}

/// 合集页单个瓦片的原始数据
#[derive(Debug, Deserialize)]
struct RawStub {
    id: Option<String>,
    title: String,
    url: String,
}

/// 详情页一次 eval 拿回的原始数据
#[derive(Debug, Default, Deserialize)]
struct RawDetail {
    title: String,
    language: String,
    #[serde(default)]
    ingredients: Vec<String>,
    #[serde(default)]
    directions: Vec<String>,
    #[serde(default)]
    my_notes: Vec<String>,
    #[serde(default)]
    notes: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    scaling: Vec<String>,
    #[serde(default)]
    prep_time: String,
    #[serde(default)]
    total_time: String,
    #[serde(default)]
    servings: String,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    devices: Vec<String>,
    #[serde(default)]
    imported_by: String,
    #[serde(default)]
    imported_from: String,
}

impl JsPageExtractor {
    pub fn new(
        base_url: Url,
        scroll_delay: Duration,
        max_scroll_retries: usize,
        image_timeout: Duration,
    ) -> Self {
        Self {
            base_url,
            scroll_delay,
            max_scroll_retries,
            http: reqwest::Client::builder()
                .timeout(image_timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn tile_count(&self, session: &dyn Session) -> Result<usize> {
        let value = session
            .eval("document.querySelectorAll('core-tile').length".to_string())
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn do_scroll(&self, session: &dyn Session) -> Result<()> {
        session
            .eval(
                r#"
                (() => {
                    window.scrollTo(0, document.body.scrollHeight);
                    window.scrollBy(0, 71);
                    window.scrollBy(0, 833);
                    const tiles = document.querySelectorAll('core-tile');
                    if (tiles.length > 0) {
                        tiles[tiles.length - 1].scrollIntoView();
                    }
                    return tiles.length;
                })()
                "#
                .to_string(),
            )
            .await?;
        tokio::time::sleep(self.scroll_delay).await;
        Ok(())
    }

    /// 点击"加载更多"按钮，返回是否点到了
    async fn click_load_more(&self, session: &dyn Session) -> Result<bool> {
        let value = session
            .eval(
                r#"
                (() => {
                    const button = document.getElementById('load-more--button');
                    if (button) { button.click(); return true; }
                    return false;
                })()
                "#
                .to_string(),
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// 下载食谱图片并编码为 base64（失败只警告，不影响记录其余部分）
    async fn download_image(&self, image_url: &str) -> String {
        if image_url.is_empty() {
            return String::new();
        }
        match self.http.get(image_url).send().await {
            Ok(response) => match response.bytes().await {
                Ok(bytes) => BASE64.encode(&bytes),
                Err(e) => {
                    warn!("⚠️ 图片读取失败 ({}): {}", image_url, e);
                    String::new()
                }
            },
            Err(e) => {
                warn!("⚠️ 图片下载失败 ({}): {}", image_url, e);
                String::new()
            }
        }
    }

    fn absolutize(&self, href: &str) -> Option<String> {
        self.base_url.join(href).ok().map(|u| u.to_string())
    }
}

#[async_trait]
impl PageExtractor for JsPageExtractor {
    async fn settle(&self, session: &dyn Session, kind: CollectionKind) -> Result<()> {
        // 书签与自建食谱页不分页，无需滚动
        if !matches!(kind, CollectionKind::Custom | CollectionKind::Saved) {
            return Ok(());
        }

        let mut previous = 0usize;
        let mut retries = 0usize;
        loop {
            self.do_scroll(session).await?;
            let current = self.tile_count(session).await?;
            if current == previous {
                if self.click_load_more(session).await? {
                    self.do_scroll(session).await?;
                } else {
                    retries += 1;
                    if retries >= self.max_scroll_retries {
                        // 重试上限：接受部分结果继续，而不是报错
                        warn!(
                            "⚠️ 滚动 {} 次后不再出现新瓦片，以当前 {} 个为准",
                            retries, current
                        );
                        break;
                    }
                }
            } else {
                retries = 0;
            }
            previous = current;
        }
        debug!("页面滚动完成，共 {} 个瓦片", previous);
        Ok(())
    }

    async fn collection_stubs(
        &self,
        session: &dyn Session,
        kind: CollectionKind,
    ) -> Result<Vec<RecipeRef>> {
        // 自建食谱的 id 在 id 属性，其余在 data-recipe-id
        let id_attr = if kind == CollectionKind::Created {
            "id"
        } else {
            "data-recipe-id"
        };
        let js_code = format!(
            r#"
            (() => {{
                return Array.from(document.querySelectorAll('core-tile')).map(tile => {{
                    const link = tile.querySelector('a');
                    const name = tile.querySelector('.core-tile__description-text');
                    return {{
                        id: tile.getAttribute('{}'),
                        title: name ? name.textContent.trim() : '',
                        url: link ? link.getAttribute('href') || '' : ''
                    }};
                }});
            }})()
            "#,
            id_attr
        );

        let value = session.eval(js_code).await?;
        let raw: Vec<RawStub> = serde_json::from_value(value)
            .map_err(|e| AppError::Extraction(format!("合集瓦片解析失败: {}", e)))?;

        let mut stubs = Vec::new();
        for stub in raw {
            let id = match stub.id {
                Some(id) if !id.is_empty() => id,
                _ => continue,
            };
            if stub.title.is_empty() || stub.url.is_empty() {
                continue;
            }
            let Some(url) = self.absolutize(&stub.url) else {
                continue;
            };
            stubs.push(RecipeRef::new(id, stub.title, url));
        }
        Ok(stubs)
    }

    async fn header_count(&self, session: &dyn Session) -> Result<Option<usize>> {
        let value = session
            .eval(
                r#"
                (() => {
                    const header = document.querySelector('.cdp-header__count');
                    return header ? header.textContent.trim() : null;
                })()
                "#
                .to_string(),
            )
            .await?;
        Ok(value.as_str().and_then(parse_header_count))
    }

    async fn recipe_detail(
        &self,
        session: &dyn Session,
        kind: CollectionKind,
    ) -> Result<RecipeDetail> {
        let value = session.eval(DETAIL_JS.to_string()).await?;
        let raw: RawDetail = serde_json::from_value(value)
            .map_err(|e| AppError::Extraction(format!("详情页解析失败: {}", e)))?;

        if raw.title.is_empty() {
            return Err(AppError::Extraction("详情页缺少食谱标题".to_string()).into());
        }

        let photo_data = self.download_image(&raw.image_url).await;
        Ok(assemble_detail(raw, kind, photo_data))
    }
}

/// 详情页一次性提取脚本
///
/// 选择器对应站点当前版本的详情页结构；段落标题（h5）与条目（li）
/// 的展开方式和清单页保持一致。
const DETAIL_JS: &str = r#"
(() => {
    const text = (el) => el ? el.textContent.trim() : '';
    const collapse = (s) => s.replace(/ +/g, ' ').trim();

    const ingredients = Array.from(
        document.querySelectorAll('#ingredients-section h5, #ingredients-section li')
    ).map(el => el.tagName === 'H5'
        ? '\n' + text(el) + ':\n'
        : collapse(el.textContent.replace(/\n/g, ' ')));

    const directions = Array.from(
        document.querySelectorAll('#preparation-steps-section h5, #preparation-steps-section li')
    ).map(el => el.tagName === 'H5'
        ? text(el) + ':'
        : collapse(el.textContent.replace(/\n/g, '')));

    const cook = {};
    document.querySelectorAll('.recipe-card__cook-params [class*="icon--"]').forEach(el => {
        const cls = Array.from(el.classList).find(c => c.startsWith('icon--'));
        const value = el.nextElementSibling ? text(el.nextElementSibling) : '';
        if (cls && value) { cook[cls] = value; }
    });

    const authorName = document.querySelector('.cr-author-card__heading-group core-user-name');
    const authorLink = document.querySelector('.cr-author-card__link');
    const image = document.querySelector('.recipe-card__image');

    return {
        title: text(document.querySelector('.recipe-card__name')),
        language: document.documentElement.lang || '',
        ingredients: ingredients,
        directions: directions,
        my_notes: Array.from(document.querySelectorAll('p.core-note__text'))
            .map(el => text(el)),
        notes: Array.from(document.querySelectorAll('#tips-section p, #tips-section li'))
            .map(el => collapse(el.textContent)),
        tags: Array.from(document.querySelectorAll('.core-tags-wrapper__tags-container a'))
            .map(a => a.textContent.replace('#', '').replace(/\n/g, '').trim().toLowerCase()),
        scaling: Array.from(
            document.querySelectorAll('.rdp-serving-size__variants-section core-toggle-button a')
        ).map(a => text(a)),
        prep_time: cook['icon--time-preparation'] || '',
        total_time: cook['icon--time'] || '',
        servings: cook['icon--servings'] || '',
        image_url: image ? (image.src || '') : '',
        devices: Array.from(document.querySelectorAll('recipe-device'))
            .map(el => text(el)).filter(t => /^TM[567]/.test(t)),
        imported_by: authorName ? text(authorName) : '',
        imported_from: authorLink ? (authorLink.href || '') : ''
    };
})()
"#;

/// 把原始提取数据组装成内容字段（按合集类型套用不同规则）
fn assemble_detail(raw: RawDetail, kind: CollectionKind, photo_data: String) -> RecipeDetail {
    let mut categories;
    let source;
    if kind == CollectionKind::Created {
        categories = vec!["Thermomix".to_string(), "Created Recipes".to_string()];
        source = "Cookidoo - Created Recipe".to_string();
    } else {
        categories = vec!["Thermomix".to_string(), "Cookidoo Recipes".to_string()];
        source = "Cookidoo".to_string();
    }

    // 设备适配标注
    if raw.devices == ["TM7"] {
        categories.push("TM7 Only".to_string());
    }
    if !raw.devices.iter().any(|d| d == "TM7") {
        categories.push("Not TM7".to_string());
    }

    let ingredients = fix_text(&raw.ingredients.join("\n"))
        .replace("\n>>>or", "\n   or")
        .trim()
        .to_string();
    let directions = fix_text(&raw.directions.join("\n\n")).trim().to_string();
    let my_notes = fix_text(&raw.my_notes.join("\n\n")).trim().to_string();

    let mut notes = fix_text(&raw.notes.join("\n\n")).trim().to_string();
    if kind == CollectionKind::Created {
        // 自建食谱补上导入来源
        let mut imported = String::new();
        if !raw.imported_by.is_empty() {
            imported.push_str(&format!(" by {}", raw.imported_by));
        }
        if !raw.imported_from.is_empty() {
            imported.push_str(&format!(" from {}", raw.imported_from));
        }
        if !imported.is_empty() && !notes.contains("Imported ") {
            notes = format!("Imported{}\n\n{}", imported, notes);
        }
        // 自建食谱的备注里可能写了分类
        if let Some(extra) = categories_from_notes(&notes) {
            categories.extend(extra);
        }
    }

    let prep_time = strip_prefix_word(&fix_time(&raw.prep_time), "Prep");
    let total_time = strip_prefix_word(&fix_time(&raw.total_time), "Total");

    RecipeDetail {
        title: raw.title,
        language: raw.language,
        categories,
        source,
        ingredients,
        directions,
        notes,
        my_notes,
        // 标签和缩放档位只在收藏类食谱上出现
        tags: if kind == CollectionKind::Created {
            Vec::new()
        } else {
            raw.tags
        },
        prep_time,
        total_time,
        servings: fix_text(&raw.servings),
        scaling: if kind == CollectionKind::Created {
            Vec::new()
        } else {
            raw.scaling
        },
        photo_data,
    }
}

/// 从备注中解析 `Categories: a, b.` 形式的分类
fn categories_from_notes(notes: &str) -> Option<Vec<String>> {
    let re = Regex::new(r"Categories:\s*([^.]+)").ok()?;
    let captured = re.captures(notes)?.get(1)?.as_str();
    Some(
        captured
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// 替换站点私有 Unicode 字形并规整空白
fn fix_text(text: &str) -> String {
    const GLYPHS: &[(char, &str)] = &[
        ('\u{e001}', "knead"),
        ('\u{e002}', "stir"),
        ('\u{e003}', "reverse"),
        ('\u{e004}', "forward"),
        ('\u{e008}', "Varoma"),
        ('\u{e00b}', "Turbo"),
        ('\u{e00c}', "Sugar Stages"),
        ('\u{e00d}', "Rice Cooker"),
        ('\u{e011}', "Pre-clean"),
        ('\u{e014}', "Steam"),
        ('\u{e016}', "Kettle"),
        ('\u{e018}', "Slow Cook"),
        ('\u{e019}', "Warm Up"),
        ('\u{e01e}', "Blend"),
        ('\u{e026}', "High Heat"),
        ('\u{e02d}', "Sous Vide"),
        ('\u{e02e}', "Ferment"),
        ('\u{e031}', "Thicken"),
        ('\u{e032}', "Timer"),
        ('\u{e033}', "Egg Boiler"),
        ('\u{e036}', "Grating"),
        ('\u{e037}', "Slicing"),
        ('\u{e038}', "Peeler"),
        ('\u{e04c}', "Spiralize"),
        ('\u{e904}', "Spiralize"),
        ('\u{e937}', "Open Cooking"),
    ];
    let mut result = text.to_string();
    for (glyph, replacement) in GLYPHS {
        result = result.replace(*glyph, replacement);
    }
    result = result.replace('\u{00a0}', " ");
    let re = Regex::new(" +").expect("固定正则");
    re.replace_all(&result, " ").into_owned()
}

/// 把时间字符串规整为 `N hr` / `N min` 形式
fn fix_time(text: &str) -> String {
    let hours = Regex::new(r"([0-9]+) *h[a-z]*").expect("固定正则");
    let minutes = Regex::new(r"([0-9]+) *mi[a-z]*").expect("固定正则");
    let newlines = Regex::new(r" *\n *").expect("固定正则");
    let result = hours.replace_all(text, "$1 hr");
    let result = minutes.replace_all(&result, "$1 min");
    newlines.replace_all(&result, " ").trim().to_string()
}

/// 去掉 `Prep.` / `Total` 一类的前缀词
fn strip_prefix_word(text: &str, word: &str) -> String {
    let re = Regex::new(&format!(r"^{}\.* *", word)).expect("固定正则");
    re.replace(text, "").into_owned()
}

/// 解析 "12 Recipes" 形式的页头数量
fn parse_header_count(text: &str) -> Option<usize> {
    let re = Regex::new(r"([0-9]+)").expect("固定正则");
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_text_replaces_private_glyphs() {
        assert_eq!(fix_text("mix \u{e002} 5 min"), "mix stir 5 min");
        assert_eq!(fix_text("a\u{00a0}b"), "a b");
        assert_eq!(fix_text("too   many spaces"), "too many spaces");
    }

    #[test]
    fn test_fix_time_normalizes_units() {
        assert_eq!(fix_time("1 hour 20 minutes"), "1 hr 20 min");
        assert_eq!(fix_time("35 min"), "35 min");
        assert_eq!(fix_time("2h"), "2 hr");
    }

    #[test]
    fn test_strip_prefix_word() {
        assert_eq!(strip_prefix_word("Prep. 20 min", "Prep"), "20 min");
        assert_eq!(strip_prefix_word("Total 1 hr", "Total"), "1 hr");
        assert_eq!(strip_prefix_word("20 min", "Prep"), "20 min");
    }

    #[test]
    fn test_parse_header_count() {
        assert_eq!(parse_header_count("12 Recipes"), Some(12));
        assert_eq!(parse_header_count("1 Recipe"), Some(1));
        assert_eq!(parse_header_count("Recipes"), None);
    }

    #[test]
    fn test_categories_from_notes() {
        let notes = "Very tasty. Categories: Dessert, Quick. Enjoy!";
        assert_eq!(
            categories_from_notes(notes),
            Some(vec!["Dessert".to_string(), "Quick".to_string()])
        );
        assert_eq!(categories_from_notes("no categories here"), None);
    }

    #[test]
    fn test_assemble_detail_created_kind() {
        let raw = RawDetail {
            title: "My Bread".to_string(),
            language: "en".to_string(),
            ingredients: vec!["500 g flour".to_string()],
            notes: vec!["Categories: Baking".to_string()],
            tags: vec!["bread".to_string()],
            scaling: vec!["x2".to_string()],
            devices: vec!["TM6".to_string()],
            ..Default::default()
        };
        let detail = assemble_detail(raw, CollectionKind::Created, String::new());
        assert_eq!(detail.source, "Cookidoo - Created Recipe");
        assert!(detail.categories.contains(&"Created Recipes".to_string()));
        assert!(detail.categories.contains(&"Baking".to_string()));
        assert!(detail.categories.contains(&"Not TM7".to_string()));
        // 自建食谱没有标签和缩放档位
        assert!(detail.tags.is_empty());
        assert!(detail.scaling.is_empty());
    }

    #[test]
    fn test_assemble_detail_saved_kind_keeps_tags() {
        let raw = RawDetail {
            title: "Soup".to_string(),
            tags: vec!["winter".to_string()],
            devices: vec!["TM7".to_string()],
            ..Default::default()
        };
        let detail = assemble_detail(raw, CollectionKind::Saved, String::new());
        assert_eq!(detail.source, "Cookidoo");
        assert_eq!(detail.tags, vec!["winter"]);
        assert!(detail.categories.contains(&"TM7 Only".to_string()));
        assert!(!detail.categories.contains(&"Not TM7".to_string()));
    }
}
