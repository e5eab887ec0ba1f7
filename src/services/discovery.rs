//! 合集发现服务 - 业务能力层
//!
//! 在引导会话上发现三类分组：固定分组（书签 + 自建食谱）、自定义合集、
//! 收藏合集，以及自定义合集的官方数量。后一步依赖前一步留下的页面状态，
//! 因此发现阶段是刻意单线程的，不做并行。

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::browser::Session;
use crate::error::AppError;
use crate::models::{Collection, CollectionKind};
use crate::services::extractor::PageExtractor;

/// 合集发现能力
///
/// 所有方法都假定引导会话已经停在"我的食谱"页面（或由方法自己导航）。
pub struct CollectionDiscovery {
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct RawLink {
    title: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawCount {
    title: String,
    count_text: String,
}

impl CollectionDiscovery {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// 固定分组：书签列表 + 自建食谱
    pub async fn discover_fixed(&self, session: &dyn Session) -> Result<Vec<Collection>> {
        let value = session
            .eval(
                r#"
                (() => {
                    const bookmark = document.querySelector("a[data-type='bookmarklist']");
                    const created = document.querySelector("li.is-customer-recipe a");
                    return {
                        bookmark_url: bookmark ? (bookmark.getAttribute('href') || '') : '',
                        created_url: created ? (created.getAttribute('href') || '') : ''
                    };
                })()
                "#
                .to_string(),
            )
            .await?;

        #[derive(Debug, Deserialize)]
        struct FixedLinks {
            bookmark_url: String,
            created_url: String,
        }
        let links: FixedLinks =
            serde_json::from_value(value).context("固定分组链接解析失败")?;
        if links.bookmark_url.is_empty() || links.created_url.is_empty() {
            return Err(AppError::discovery("固定分组", "页面上找不到书签或自建食谱入口").into());
        }

        let collections = vec![
            Collection::new(
                "Bookmarks",
                self.absolutize(&links.bookmark_url)?,
                CollectionKind::Bookmark,
            ),
            Collection::new(
                "Created recipes",
                self.absolutize(&links.created_url)?,
                CollectionKind::Created,
            ),
        ];
        info!("✓ 发现固定分组 {} 个", collections.len());
        Ok(collections)
    }

    /// 自定义合集列表
    pub async fn discover_custom(&self, session: &dyn Session) -> Result<Vec<Collection>> {
        let value = session
            .eval(
                r#"
                (() => {
                    const list = document.getElementById('filter--created');
                    if (!list) { return null; }
                    return Array.from(list.querySelectorAll('.dropzone')).map(el => {
                        const title = el.querySelector('organize-title');
                        const link = el.querySelector('a');
                        return {
                            title: title ? title.textContent.trim() : '',
                            url: link ? (link.getAttribute('href') || '') : ''
                        };
                    });
                })()
                "#
                .to_string(),
            )
            .await?;

        if value.is_null() {
            return Err(AppError::discovery("自定义合集", "页面上找不到自定义合集列表").into());
        }
        let links: Vec<RawLink> =
            serde_json::from_value(value).context("自定义合集列表解析失败")?;

        let mut collections = Vec::new();
        for link in links {
            if link.title.is_empty() || link.url.is_empty() {
                continue;
            }
            collections.push(Collection::new(
                link.title,
                self.absolutize(&link.url)?,
                CollectionKind::Custom,
            ));
        }
        info!("✓ 发现自定义合集 {} 个", collections.len());
        Ok(collections)
    }

    /// 收藏合集列表
    ///
    /// 需要先跳转到收藏列表页并滚动到底；收藏合集标题不保证唯一，
    /// 统一把 URL 中的 id 追加到标题后面区分。
    pub async fn discover_saved(
        &self,
        session: &dyn Session,
        extractor: &dyn PageExtractor,
    ) -> Result<Vec<Collection>> {
        let value = session
            .eval(
                r#"
                (() => {
                    const wrapper = document.querySelector('.collection-wrapper');
                    if (!wrapper) { return ''; }
                    const link = wrapper.querySelector('.core-list-cell__wrapper');
                    return link ? (link.getAttribute('href') || '') : '';
                })()
                "#
                .to_string(),
            )
            .await?;
        let list_href = value.as_str().unwrap_or("").to_string();
        if list_href.is_empty() {
            return Err(AppError::discovery("收藏合集", "页面上找不到收藏列表入口").into());
        }

        session.navigate(&self.absolutize(&list_href)?).await?;
        extractor.settle(session, CollectionKind::Saved).await?;

        let value = session
            .eval(
                r#"
                (() => {
                    return Array.from(document.querySelectorAll('core-tiles-list core-tile')).map(el => {
                        const name = el.querySelector('.core-tile__description-text');
                        const link = el.querySelector('a');
                        return {
                            title: name ? name.textContent.trim() : '',
                            url: link ? (link.getAttribute('href') || '') : ''
                        };
                    });
                })()
                "#
                .to_string(),
            )
            .await?;
        let links: Vec<RawLink> = serde_json::from_value(value).context("收藏合集列表解析失败")?;

        let mut collections = Vec::new();
        for link in links {
            if link.title.is_empty() || link.url.is_empty() {
                continue;
            }
            let url = self.absolutize(&link.url)?;
            let title = match saved_collection_id(&url) {
                Some(id) => format!("{} ({})", link.title, id),
                None => link.title,
            };
            collections.push(Collection::new(title, url, CollectionKind::Saved));
        }
        info!("✓ 发现收藏合集 {} 个", collections.len());
        Ok(collections)
    }

    /// 从管理页读取自定义合集的官方数量，写回对应合集
    pub async fn fill_official_counts(
        &self,
        session: &dyn Session,
        manage_url: &str,
        collections: &mut [Collection],
    ) -> Result<()> {
        session.navigate(manage_url).await?;
        let label = match session.title().await? {
            Some(title) if !title.is_empty() => title,
            _ => session.url().await?.unwrap_or_default(),
        };
        tracing::debug!("从管理页 {} 读取官方数量", label);

        let value = session
            .eval(
                r#"
                (() => {
                    return Array.from(document.querySelectorAll('button.core-dropdown-list__item')).map(el => {
                        const title = el.querySelector('.core-list-cell__title');
                        const subtitle = el.querySelector('.core-list-cell__subtitle');
                        return {
                            title: title ? title.textContent.trim() : '',
                            count_text: subtitle ? subtitle.textContent.trim() : ''
                        };
                    });
                })()
                "#
                .to_string(),
            )
            .await?;
        let counts: Vec<RawCount> = serde_json::from_value(value).context("官方数量解析失败")?;

        // 重名的自定义合集数量不可靠，跳过并警告
        let mut seen = std::collections::HashMap::new();
        for collection in collections.iter_mut() {
            if collection.kind == CollectionKind::Custom {
                *seen.entry(collection.title.clone()).or_insert(0usize) += 1;
            }
        }

        for entry in counts {
            let Some(count) = parse_count(&entry.count_text) else {
                continue;
            };
            match seen.get(&entry.title) {
                Some(1) => {
                    for collection in collections.iter_mut() {
                        if collection.kind == CollectionKind::Custom
                            && collection.title == entry.title
                        {
                            collection.official_count = Some(count);
                        }
                    }
                }
                Some(_) => {
                    warn!("⚠️ 自定义合集 {} 重名，官方数量不可靠，跳过", entry.title);
                }
                None => {
                    warn!("⚠️ 管理页出现未知合集 {}", entry.title);
                }
            }
        }
        Ok(())
    }

    fn absolutize(&self, href: &str) -> Result<String> {
        Ok(self
            .base_url
            .join(href)
            .with_context(|| format!("非法链接: {}", href))?
            .to_string())
    }
}

/// 从收藏合集 URL 取出末段 id（去掉锚点）
fn saved_collection_id(url: &str) -> Option<String> {
    let trimmed = url.split('#').next().unwrap_or(url);
    let id = trimmed.rsplit('/').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// 解析 "12 Recipes" 形式的数量文本
fn parse_count(text: &str) -> Option<usize> {
    text.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_collection_id_strips_anchor() {
        assert_eq!(
            saved_collection_id("https://x/collection/en-US/p/col123#main"),
            Some("col123".to_string())
        );
        assert_eq!(
            saved_collection_id("https://x/collection/en-US/p/col123"),
            Some("col123".to_string())
        );
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("12 Recipes"), Some(12));
        assert_eq!(parse_count("1 Recipe"), Some(1));
        assert_eq!(parse_count("Recipes"), None);
    }
}
