//! 合集数据模型

use serde::{Deserialize, Serialize};

use super::recipe::RecipeRef;

/// 合集类型
///
/// 决定该合集页适用的提取规则与默认的导出策略。
/// 枚举声明顺序与字符串形式的字典序一致，派生的 `Ord` 可直接用于总索引排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// 书签列表
    Bookmark,
    /// 自建食谱
    Created,
    /// 自定义合集
    Custom,
    /// 收藏的站方合集（仅在显式开启时处理）
    Saved,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Bookmark => "bookmark",
            CollectionKind::Created => "created",
            CollectionKind::Custom => "custom",
            CollectionKind::Saved => "saved",
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个合集：命名的食谱分组
///
/// 被其合集处理任务独占，处理完成后作为值交还给编排层。
#[derive(Debug, Clone)]
pub struct Collection {
    pub title: String,
    pub url: String,
    pub kind: CollectionKind,
    /// 页面上发现的全部存根（无论是否被认领 / 过滤）
    pub recipes: Vec<RecipeRef>,
    /// 认领成功且通过过滤、提交导出的存根
    pub export_recipes: Vec<RecipeRef>,
    /// 清单文本（按 id 排序，一行一条）
    pub listing_text: String,
    /// 页面实际发现的数量
    pub discovered_count: usize,
    /// 收藏合集页头显示的数量（渲染不完整时会与实际数量不一致）
    pub header_count: Option<usize>,
    /// 管理页读到的官方数量（存在时总索引优先使用）
    pub official_count: Option<usize>,
}

impl Collection {
    pub fn new(title: impl Into<String>, url: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            kind,
            recipes: Vec::new(),
            export_recipes: Vec::new(),
            listing_text: String::new(),
            discovered_count: 0,
            header_count: None,
            official_count: None,
        }
    }

    /// 总索引使用的数量：官方数量优先，否则用实际发现数量
    pub fn index_count(&self) -> usize {
        self.official_count.unwrap_or(self.discovered_count)
    }

    /// 清单文件名标签
    pub fn listing_label(&self) -> String {
        format!("{} {}", self.kind, self.title)
    }

    /// 生成清单文本：按 id 排序，`id<TAB>url<TAB>标题`，末尾换行
    pub fn build_listing_text(&mut self) {
        let mut sorted: Vec<&RecipeRef> = self.recipes.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let mut text = sorted
            .iter()
            .map(|r| format!("{}\t{}\t{}", r.id, r.url, r.title))
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        self.listing_text = text;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_matches_lexicographic() {
        let mut kinds = vec![
            CollectionKind::Saved,
            CollectionKind::Bookmark,
            CollectionKind::Custom,
            CollectionKind::Created,
        ];
        kinds.sort();
        let strs: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(strs, vec!["bookmark", "created", "custom", "saved"]);
    }

    #[test]
    fn test_index_count_prefers_official() {
        let mut collection = Collection::new("Soups", "https://x/c1", CollectionKind::Custom);
        collection.discovered_count = 12;
        assert_eq!(collection.index_count(), 12);
        collection.official_count = Some(15);
        assert_eq!(collection.index_count(), 15);
    }

    #[test]
    fn test_listing_text_sorted_by_id() {
        let mut collection = Collection::new("Soups", "https://x/c1", CollectionKind::Custom);
        collection.recipes = vec![
            RecipeRef::new("r9", "Last", "https://x/r9"),
            RecipeRef::new("r1", "First", "https://x/r1"),
        ];
        collection.build_listing_text();
        assert_eq!(
            collection.listing_text,
            "r1\thttps://x/r1\tFirst\nr9\thttps://x/r9\tLast\n"
        );
    }

    #[test]
    fn test_empty_listing_has_no_trailing_newline() {
        let mut collection = Collection::new("Empty", "https://x/c0", CollectionKind::Custom);
        collection.build_listing_text();
        assert_eq!(collection.listing_text, "");
    }
}
