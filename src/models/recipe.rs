//! 食谱数据模型
//!
//! `RecipeRef` 是发现阶段产生的最小身份（id + 标题 + URL），创建后不可变；
//! `Recipe` 在详情页处理阶段由唯一的所有者填充内容字段。
//! 生命周期状态的权威副本在 [`crate::tracker::StateTracker`] 中，
//! 这里的本地状态只服务于所有者自己的内存管理判断。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// 食谱生命周期状态
///
/// 合法转移顺序：`Claimed → DetailLoaded → Exported → MemoryCleared`，
/// 任意状态都可以进入终态 `Failed`。`MemoryCleared` 严格晚于 `Exported`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeState {
    /// 已赢得独占处理权（每个 id 全程只发生一次）
    Claimed,
    /// 详情页已抓取并解析
    DetailLoaded,
    /// 导出记录已持久化写出
    Exported,
    /// 重量级字段已释放
    MemoryCleared,
    /// 处理失败（终态，不影响其他食谱）
    Failed,
}

impl RecipeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipeState::Claimed => "claimed",
            RecipeState::DetailLoaded => "detail_loaded",
            RecipeState::Exported => "exported",
            RecipeState::MemoryCleared => "memory_cleared",
            RecipeState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RecipeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 食谱存根 - 合集发现阶段的最小身份
///
/// 身份就是 `id`：同一个 id 出现在多个合集中时指向同一条食谱。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeRef {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl RecipeRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
        }
    }
}

/// 详情页提取出的内容字段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeDetail {
    pub title: String,
    pub language: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub source: String,
    #[serde(default)]
    pub ingredients: String,
    #[serde(default)]
    pub directions: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub my_notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub prep_time: String,
    #[serde(default)]
    pub total_time: String,
    #[serde(default)]
    pub servings: String,
    #[serde(default)]
    pub scaling: Vec<String>,
    #[serde(default)]
    pub photo_data: String,
}

/// 食谱照片
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipePhoto {
    pub filename: String,
    pub name: String,
    pub data: String,
}

/// 完整食谱记录
///
/// 只被拥有它的食谱处理任务修改，处理期间绝不跨线程共享。
#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: String,
    pub title: String,
    pub url: String,
    pub language: String,
    pub categories: Vec<String>,
    pub source: String,
    pub source_url: String,
    pub ingredients: String,
    pub directions: String,
    pub notes: String,
    pub my_notes: String,
    pub tags: Vec<String>,
    pub prep_time: String,
    pub total_time: String,
    pub servings: String,
    pub scaling: Vec<String>,
    pub photo_data: String,
    pub photos: Vec<RecipePhoto>,
    state: RecipeState,
}

impl Recipe {
    /// 从存根创建（认领成功之后）
    pub fn from_ref(recipe_ref: &RecipeRef) -> Self {
        Self {
            id: recipe_ref.id.clone(),
            title: recipe_ref.title.clone(),
            url: recipe_ref.url.clone(),
            language: String::new(),
            categories: Vec::new(),
            source: String::new(),
            source_url: recipe_ref.url.clone(),
            ingredients: String::new(),
            directions: String::new(),
            notes: String::new(),
            my_notes: String::new(),
            tags: Vec::new(),
            prep_time: String::new(),
            total_time: String::new(),
            servings: String::new(),
            scaling: Vec::new(),
            photo_data: String::new(),
            photos: Vec::new(),
            state: RecipeState::Claimed,
        }
    }

    pub fn state(&self) -> RecipeState {
        self.state
    }

    /// 填入详情页内容并进入 `DetailLoaded`
    pub fn apply_detail(&mut self, detail: RecipeDetail) {
        if !detail.title.is_empty() {
            self.title = detail.title;
        }
        self.language = detail.language;
        self.categories = detail.categories;
        self.source = detail.source;
        self.ingredients = detail.ingredients;
        self.directions = detail.directions;
        self.notes = detail.notes;
        self.my_notes = detail.my_notes;
        self.tags = detail.tags;
        self.prep_time = detail.prep_time;
        self.total_time = detail.total_time;
        self.servings = detail.servings;
        self.scaling = detail.scaling;
        if !detail.photo_data.is_empty() {
            self.photos = vec![RecipePhoto {
                filename: format!("{}.jpg", self.id),
                name: "1".to_string(),
                data: detail.photo_data.clone(),
            }];
        }
        self.photo_data = detail.photo_data;
        self.state = RecipeState::DetailLoaded;
    }

    /// 标记导出记录已写出
    pub fn mark_exported(&mut self) {
        self.state = RecipeState::Exported;
    }

    /// 构建导出记录（Paprika 3 兼容格式）
    ///
    /// 空字段被丢弃；serde_json 的默认 Map 按键排序，写出即有序。
    pub fn to_export_record(&self) -> JsonValue {
        let mut record = serde_json::Map::new();
        let mut put = |key: &str, value: JsonValue| {
            let empty = match &value {
                JsonValue::String(s) => s.is_empty(),
                JsonValue::Array(a) => a.is_empty(),
                _ => false,
            };
            if !empty {
                record.insert(key.to_string(), value);
            }
        };

        put("source", json!(self.source));
        put("source_url", json!(self.source_url));
        put("language", json!(self.language));
        put("name", json!(self.title));
        put("categories", json!(self.categories));
        put("ingredients", json!(self.ingredients));
        put("directions", json!(self.directions));
        put("notes", json!(self.notes));
        put("mynotes", json!(self.my_notes));
        put("tags", json!(self.tags));
        put("scaling", json!(self.scaling));
        put("prep_time", json!(self.prep_time));
        put("total_time", json!(self.total_time));
        put("servings", json!(self.servings));
        put("photo_data", json!(self.photo_data));
        put("photos", serde_json::to_value(&self.photos).unwrap_or(JsonValue::Null));

        JsonValue::Object(record)
    }

    /// 释放重量级字段，返回是否真的清理了
    ///
    /// 只有本地状态已是 `Exported` 才允许清理；调用方还必须先通过
    /// 追踪器的 `can_clear_memory` 检查权威状态。
    pub fn clear_heavy_fields(&mut self) -> bool {
        if self.state != RecipeState::Exported {
            return false;
        }
        self.ingredients.clear();
        self.directions.clear();
        self.notes.clear();
        self.my_notes.clear();
        self.photo_data.clear();
        self.photos.clear();
        self.state = RecipeState::MemoryCleared;
        true
    }

    /// 粗略估算当前占用的字符数（内存统计用）
    pub fn estimated_memory(&self) -> usize {
        self.id.len()
            + self.title.len()
            + self.url.len()
            + self.ingredients.len()
            + self.directions.len()
            + self.notes.len()
            + self.my_notes.len()
            + self.photo_data.len()
            + self.photos.iter().map(|p| p.data.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_recipe() -> Recipe {
        let mut recipe = Recipe::from_ref(&RecipeRef::new("r123", "Tomato Soup", "https://x/r123"));
        recipe.apply_detail(RecipeDetail {
            title: "Tomato Soup".to_string(),
            language: "en".to_string(),
            ingredients: "500 g tomatoes".to_string(),
            directions: "Cook.".to_string(),
            photo_data: "aGVsbG8=".to_string(),
            ..Default::default()
        });
        recipe
    }

    #[test]
    fn test_clear_refused_before_export() {
        let mut recipe = loaded_recipe();
        assert_eq!(recipe.state(), RecipeState::DetailLoaded);
        assert!(!recipe.clear_heavy_fields());
        assert_eq!(recipe.ingredients, "500 g tomatoes");
    }

    #[test]
    fn test_clear_after_export_releases_heavy_fields() {
        let mut recipe = loaded_recipe();
        recipe.mark_exported();
        let before = recipe.estimated_memory();
        assert!(recipe.clear_heavy_fields());
        assert!(recipe.estimated_memory() < before);
        assert_eq!(recipe.state(), RecipeState::MemoryCleared);
        assert!(recipe.ingredients.is_empty());
        assert!(recipe.photos.is_empty());
        // 身份字段保留
        assert_eq!(recipe.id, "r123");
        assert_eq!(recipe.title, "Tomato Soup");
    }

    #[test]
    fn test_export_record_drops_empty_fields() {
        let mut recipe = loaded_recipe();
        recipe.mark_exported();
        let record = recipe.to_export_record();
        let obj = record.as_object().unwrap();
        assert!(obj.contains_key("ingredients"));
        assert!(obj.contains_key("name"));
        // notes 为空，不应出现
        assert!(!obj.contains_key("notes"));
        assert!(!obj.contains_key("tags"));
    }

    #[test]
    fn test_export_record_keys_are_sorted() {
        let mut recipe = loaded_recipe();
        recipe.mark_exported();
        let record = recipe.to_export_record();
        let keys: Vec<&String> = record.as_object().unwrap().keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
